//! Persisted results of an experiment: named tensors saved as JSON.

use std::collections::BTreeMap;
use std::fs;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use bp_types::{BpResult, ExperimentError};
use chrono::{DateTime, Utc};
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// Tensors keyed by field name (`x`, `y`, `mae_post`, one per calibration
/// parameter, ...), plus the metadata that locates the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub experiment_id: Uuid,
    pub config: String,
    pub acquisition: String,
    /// `None` when the auxiliary model is not used.
    pub mismatch: Option<f64>,
    pub created_at: DateTime<Utc>,
    fields: BTreeMap<String, ArrayD<f64>>,
}

impl RunRecord {
    pub fn new(
        experiment_id: Uuid,
        config: impl Into<String>,
        acquisition: impl Into<String>,
        mismatch: Option<f64>,
    ) -> Self {
        Self {
            experiment_id,
            config: config.into(),
            acquisition: acquisition.into(),
            mismatch,
            created_at: Utc::now(),
            fields: BTreeMap::new(),
        }
    }

    /// Store a tensor, replacing any previous field of the same name.
    pub fn insert(&mut self, field: impl Into<String>, tensor: ArrayD<f64>) {
        self.fields.insert(field.into(), tensor);
    }

    pub fn get(&self, field: &str) -> Result<&ArrayD<f64>, ExperimentError> {
        self.fields
            .get(field)
            .ok_or_else(|| ExperimentError::FieldNotFound {
                field: field.to_string(),
            })
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn file_name(&self) -> String {
        match self.mismatch {
            None => "constant.json".to_string(),
            Some(m) => format!("mismatch={m:.2}.json"),
        }
    }

    /// `<root>/<config>/<acquisition>/<file_name>`
    pub fn path_under(&self, root: &Path) -> PathBuf {
        root.join(&self.config)
            .join(&self.acquisition)
            .join(self.file_name())
    }

    /// Write the record below `root`, creating directories as needed.
    pub fn save(&self, root: &Path) -> BpResult<PathBuf> {
        // JSON has no NaN; reject rather than write an unreadable file.
        if let Some((name, _)) = self
            .fields
            .iter()
            .find(|(_, t)| t.iter().any(|v| !v.is_finite()))
        {
            return Err(bp_types::validation_error!("field {name} contains non-finite values"));
        }
        let path = self.path_under(root);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let writer = BufWriter::new(fs::File::create(&path)?);
        serde_json::to_writer(writer, self)?;
        info!(path = %path.display(), fields = self.fields.len(), "saved run record");
        Ok(path)
    }

    pub fn load(path: impl AsRef<Path>) -> BpResult<Self> {
        let reader = BufReader::new(fs::File::open(path.as_ref())?);
        Ok(serde_json::from_reader(reader)?)
    }
}
