//! Lifecycle tracking for experiments and their repetitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique experiment identifier.
pub type ExperimentId = Uuid;

/// Lifecycle state shared by experiments and repetitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Best observation seen so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestObservation {
    pub step: usize,
    pub x: Vec<f64>,
    pub objective: f64,
}

/// Status of one BO repetition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepetitionStatus {
    pub id: Uuid,
    pub experiment_id: ExperimentId,
    pub repetition: usize,
    pub state: RunState,
    pub steps_completed: usize,
    pub best: Option<BestObservation>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl RepetitionStatus {
    pub fn new(experiment_id: ExperimentId, repetition: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            experiment_id,
            repetition,
            state: RunState::Pending,
            steps_completed: 0,
            best: None,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.state = RunState::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self) {
        self.state = RunState::Completed;
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: String) {
        self.state = RunState::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }

    /// Record an observation, keeping it if it improves the maximum.
    pub fn update_best(&mut self, step: usize, x: &[f64], objective: f64) {
        let improves = match &self.best {
            None => true,
            Some(current) => objective > current.objective,
        };
        if improves && objective.is_finite() {
            self.best = Some(BestObservation {
                step,
                x: x.to_vec(),
                objective,
            });
        }
    }
}

/// Aggregate status of an experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentStatus {
    pub id: ExperimentId,
    pub config_name: String,
    pub state: RunState,
    pub repetitions: Vec<RepetitionStatus>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl ExperimentStatus {
    pub fn new(config_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            config_name: config_name.into(),
            state: RunState::Pending,
            repetitions: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.state = RunState::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self) {
        self.state = RunState::Completed;
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: String) {
        self.state = RunState::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }

    pub fn repetitions_completed(&self) -> usize {
        self.repetitions
            .iter()
            .filter(|r| r.state == RunState::Completed)
            .count()
    }

    pub fn repetitions_failed(&self) -> usize {
        self.repetitions
            .iter()
            .filter(|r| r.state == RunState::Failed)
            .count()
    }

    /// Best observation across all repetitions.
    pub fn best(&self) -> Option<&BestObservation> {
        self.repetitions
            .iter()
            .filter_map(|r| r.best.as_ref())
            .max_by(|a, b| {
                a.objective
                    .partial_cmp(&b.objective)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    }
}
