use approx::assert_relative_eq;
use bp_calibration::{
    CalibrationLayer, CalibrationSpec, Constraint, DataTransform, EvaluatedModel, FlattenOptions,
    FnModel, LinearInputOptions, LinearOptions, LinearOutputOptions, MeanFunction, OffsetOptions,
    ParameterOptions, PriorMean, ScaleOptions, SharedModel, TransformPipeline,
};
use ndarray::{array, Array2};

fn bumpy_model() -> SharedModel {
    FnModel::new("bumpy", 2, 1, |x| vec![(x[0] * 1.3).sin() + 0.5 * x[1] * x[1]]).shared()
}

fn grid() -> Array2<f64> {
    array![
        [0.0, 0.0],
        [0.25, 0.75],
        [0.5, 0.5],
        [0.9, 0.1],
        [1.0, 1.0]
    ]
}

fn pipeline() -> TransformPipeline {
    let input = DataTransform::normalize(array![-2.0, -1.0], array![2.0, 3.0]).unwrap();
    let mut outcome = DataTransform::standardize(1);
    outcome
        .fit(array![[-1.0], [0.5], [2.0], [4.0]].view())
        .unwrap();
    TransformPipeline::new(input, outcome)
}

fn every_layer() -> Vec<CalibrationLayer> {
    vec![
        CalibrationLayer::identity(),
        CalibrationLayer::linear_input(&LinearInputOptions::default().with_x_dim(2)).unwrap(),
        CalibrationLayer::linear_output(&LinearOutputOptions::default()).unwrap(),
        CalibrationLayer::linear(&LinearOptions {
            input: LinearInputOptions::default().with_x_dim(2),
            output: LinearOutputOptions::default(),
        })
        .unwrap(),
        CalibrationLayer::output_offset(&OffsetOptions::default()).unwrap(),
        CalibrationLayer::output_scale(&ScaleOptions::default()).unwrap(),
        CalibrationLayer::fixed_offset(1, 0.0).unwrap(),
    ]
}

#[test]
fn layers_at_identity_values_reproduce_uncalibrated_mean() {
    let x = grid();
    let baseline = PriorMean::uncalibrated(pipeline(), bumpy_model())
        .unwrap()
        .evaluate(x.view(), 0)
        .unwrap();

    for layer in every_layer() {
        let kind = layer.kind();
        let mean = PriorMean::new(pipeline(), bumpy_model(), layer).unwrap();
        let y = mean.evaluate(x.view(), 7).unwrap();
        for (a, b) in y.iter().zip(baseline.iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-10);
        }
        assert_eq!(y.dim(), (5, 1), "{kind:?}");
    }
}

#[test]
fn flatten_at_zero_weight_reproduces_model() {
    let x = grid();
    let baseline = PriorMean::uncalibrated(pipeline(), bumpy_model())
        .unwrap()
        .evaluate(x.view(), 0)
        .unwrap();
    let layer =
        CalibrationLayer::flatten(&FlattenOptions::default().with_w_lim(0.0, 0.0).with_step_range(0, 1))
            .unwrap();
    let mean = PriorMean::new(pipeline(), bumpy_model(), layer).unwrap();
    for step in [0, 3, 50] {
        let y = mean.evaluate(x.view(), step).unwrap();
        for (a, b) in y.iter().zip(baseline.iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-10);
        }
    }
}

#[test]
fn linear_calibration_matches_closed_form() {
    let model = bumpy_model();
    let layer = CalibrationLayer::linear(&LinearOptions {
        input: LinearInputOptions::default().with_x_dim(2),
        output: LinearOutputOptions::default(),
    })
    .unwrap();
    let mut mean = PriorMean::new(TransformPipeline::identity(2, 1), model.clone(), layer).unwrap();

    let (a, s, b, t) = (array![1.5, 0.8], array![-0.2, 0.4], 2.5, -0.3);
    {
        let l = mean.layer_mut();
        l.parameter_mut("x_scale").unwrap().set_value(a.view()).unwrap();
        l.parameter_mut("x_shift").unwrap().set_value(s.view()).unwrap();
        l.parameter_mut("y_scale").unwrap().fill_value(b).unwrap();
        l.parameter_mut("y_shift").unwrap().fill_value(t).unwrap();
    }

    let x = grid();
    let y = mean.evaluate(x.view(), 0).unwrap();
    let x_corrected = (&x + &s) * &a;
    let expected = model.evaluate(x_corrected.view()).unwrap() * b + t;
    for (got, want) in y.iter().zip(expected.iter()) {
        assert_relative_eq!(*got, *want, epsilon = 1e-10);
    }
}

#[test]
fn output_offset_adds_fixed_shift() {
    let model = bumpy_model();
    let layer = CalibrationLayer::output_offset(&OffsetOptions::default().with_initial(5e-3)).unwrap();
    assert!(layer.parameter("y_shift").unwrap().prior().is_none());
    assert!(!layer.parameter("y_shift").unwrap().is_constrained());

    let mean = PriorMean::new(TransformPipeline::identity(2, 1), model.clone(), layer).unwrap();
    let x = grid();
    let y = mean.evaluate(x.view(), 0).unwrap();
    let expected = model.evaluate(x.view()).unwrap() + 0.005;
    assert_eq!(y.dim(), (x.nrows(), 1));
    for (got, want) in y.iter().zip(expected.iter()) {
        assert_relative_eq!(*got, *want, epsilon = 1e-12);
    }
}

#[test]
fn raw_mutation_is_visible_in_evaluation() {
    let layer = CalibrationLayer::output_scale(
        &ScaleOptions::default().with_y_scale(ParameterOptions::new().with_constraint(Constraint::Positive)),
    )
    .unwrap();
    let mut mean = PriorMean::new(TransformPipeline::identity(2, 1), bumpy_model(), layer).unwrap();
    let x = array![[0.5, 0.5]];
    let base = bumpy_model().evaluate(x.view()).unwrap()[[0, 0]];

    for raw in [-1.0, 0.0, 2.0] {
        mean.load_raw_parameters(&[raw]).unwrap();
        let scale = Constraint::Positive.transform(raw);
        let y = mean.evaluate(x.view(), 0).unwrap();
        assert_relative_eq!(y[[0, 0]], scale * base, epsilon = 1e-12);
        assert_relative_eq!(mean.named_values()[0].1[0], scale, epsilon = 1e-12);
    }
}

#[test]
fn flatten_uses_the_supplied_step() {
    let spec = CalibrationSpec::Flatten(
        FlattenOptions::default()
            .with_step_range(5, 15)
            .with_w_lim(0.01, 0.99),
    );
    let mut mean = PriorMean::new(
        TransformPipeline::identity(2, 1),
        bumpy_model(),
        CalibrationLayer::from_spec(&spec).unwrap(),
    )
    .unwrap();
    mean.layer_mut()
        .parameter_mut("constant")
        .unwrap()
        .fill_value(1.0)
        .unwrap();

    let x = array![[0.0, 0.0]];
    for (step, w) in [(0, 0.01), (5, 0.01), (10, 0.50), (15, 0.99), (20, 0.99)] {
        let y = mean.evaluate(x.view(), step).unwrap();
        assert_relative_eq!(y[[0, 0]], w, epsilon = 1e-12);
    }
}

#[test]
fn layer_state_survives_json() {
    let mut layer = CalibrationLayer::linear_output(&LinearOutputOptions::default()).unwrap();
    layer.parameter_mut("y_scale").unwrap().fill_value(3.5).unwrap();
    let json = serde_json::to_string(&layer).unwrap();
    let restored: CalibrationLayer = serde_json::from_str(&json).unwrap();
    assert_eq!(restored, layer);
    assert_relative_eq!(restored.parameter("y_scale").unwrap().value()[0], 3.5, epsilon = 1e-12);
}
