use std::sync::Arc;

use vole::losses::{
    adaptive_power_loss, binary_crossentropy, binary_crossentropy_logits,
    categorical_cross_entropy, categorical_cross_entropy_logits, huber_loss, loss_from_name,
    mean_absolute_error, mean_squared_error, sparse_categorical_cross_entropy_logits,
    AdaptivePowerConfig, LossFn, LossOptions,
};
use vole::prelude::*;

fn assert_approx_vec(got: &[f64], want: &[f64], tol: f64) {
    assert_eq!(got.len(), want.len(), "lengths differ: {:?} vs {:?}", got, want);
    for (i, (g, w)) in got.iter().zip(want.iter()).enumerate() {
        assert!(
            (g - w).abs() <= tol,
            "element {}: got {}, want {} (tol {})",
            i,
            g,
            w,
            tol
        );
    }
}

/// Evaluate `loss` on concrete buffers by building a graph with one
/// parameter per buffer and running it through the interpreter.
fn eval_loss(loss: &LossFn, labels: &[Buffer], predictions: &[Buffer]) -> Result<Vec<f64>> {
    let g = Graph::new("loss_eval");
    let mut inputs = Vec::new();
    let mut label_nodes = Vec::new();
    for (i, b) in labels.iter().enumerate() {
        label_nodes.push(g.parameter(format!("label{}", i), b.shape().clone(), b.dtype()));
        inputs.push(b.clone());
    }
    let mut pred_nodes = Vec::new();
    for (i, b) in predictions.iter().enumerate() {
        pred_nodes.push(g.parameter(format!("pred{}", i), b.shape().clone(), b.dtype()));
        inputs.push(b.clone());
    }
    let out = loss(&label_nodes, &pred_nodes)?;
    let exe = compile(
        Arc::new(Interp::new()),
        &[out],
        &CompileOptions::quiet(),
    )?;
    Ok(exe.execute(inputs, &[])?[0].to_f64_vec())
}

fn f64s(vals: &[f64], shape: impl Into<Shape>) -> Buffer {
    Buffer::from_slice(vals, shape).unwrap()
}

fn bools(vals: &[bool], shape: impl Into<Shape>) -> Buffer {
    Buffer::from_bool_slice(vals, shape).unwrap()
}

#[test]
fn test_mse_and_mae_values() {
    let mse: LossFn = Box::new(mean_squared_error);
    let mae: LossFn = Box::new(mean_absolute_error);
    let labels = f64s(&[1.0, 2.0], 2);
    let preds = f64s(&[0.0, 0.0], 2);

    let out = eval_loss(&mse, &[labels.clone()], &[preds.clone()]).unwrap();
    assert_approx_vec(&out, &[2.5], 1e-12);
    let out = eval_loss(&mae, &[labels.clone()], &[preds]).unwrap();
    assert_approx_vec(&out, &[1.5], 1e-12);

    // Perfect predictions give exactly zero.
    let out = eval_loss(&mse, &[labels.clone()], &[labels]).unwrap();
    assert_approx_vec(&out, &[0.0], 0.0);
}

#[test]
fn test_mse_weights_and_mask() {
    let mse: LossFn = Box::new(mean_squared_error);
    let labels = f64s(&[1.0, 2.0], 2);
    let preds = f64s(&[0.0, 0.0], 2);

    // Weighted: [1*2, 4*0], mean over both elements.
    let weights = f64s(&[2.0, 0.0], 2);
    let out = eval_loss(&mse, &[labels.clone(), weights], &[preds.clone()]).unwrap();
    assert_approx_vec(&out, &[1.0], 1e-12);

    // Masked: the second element contributes zero but still counts in the
    // mean.
    let mask = bools(&[true, false], 2);
    let out = eval_loss(&mse, &[labels, mask], &[preds]).unwrap();
    assert_approx_vec(&out, &[0.5], 1e-12);
}

#[test]
fn test_mask_suppresses_non_finite_predictions() {
    let huber = huber_loss(1.0).unwrap();
    let labels = f64s(&[1.0, 1.0], 2);
    let preds = f64s(&[0.5, f64::NAN], 2);
    let mask = bools(&[true, false], 2);
    let out = eval_loss(&huber, &[labels, mask], &[preds]).unwrap();
    // Masked positions are exact zeros even when the prediction is NaN.
    assert!((out[0] - 0.125).abs() < 1e-12);
    assert_eq!(out[1], 0.0);
}

#[test]
fn test_binary_crossentropy_matches_logits_form() {
    let bce: LossFn = Box::new(binary_crossentropy);
    let bce_logits: LossFn = Box::new(binary_crossentropy_logits);
    let logits: Vec<f64> = vec![-4.0, -1.0, 0.0, 0.5, 3.0];
    let labels: Vec<f64> = vec![1.0, 0.0, 1.0, 0.0, 1.0];
    let probs: Vec<f64> = logits.iter().map(|x| 1.0 / (1.0 + (-x).exp())).collect();

    let from_probs = eval_loss(
        &bce,
        &[f64s(&labels, 5)],
        &[f64s(&probs, 5)],
    )
    .unwrap();
    let from_logits = eval_loss(
        &bce_logits,
        &[f64s(&labels, 5)],
        &[f64s(&logits, 5)],
    )
    .unwrap();
    assert_approx_vec(&from_logits, &from_probs, 1e-9);

    // The logits form stays finite where sigmoid saturates to exactly 0/1.
    let extreme = eval_loss(
        &bce_logits,
        &[f64s(&[1.0, 0.0], 2)],
        &[f64s(&[-800.0, 800.0], 2)],
    )
    .unwrap();
    assert!(extreme.iter().all(|v| v.is_finite()));
    assert_approx_vec(&extreme, &[800.0, 800.0], 1e-9);
}

#[test]
fn test_huber_piecewise() {
    let huber = huber_loss(1.0).unwrap();
    let labels = f64s(&[0.0, 0.0, 0.0], 3);
    // Errors 0.5 (quadratic), 1.0 (boundary), 3.0 (linear).
    let preds = f64s(&[0.5, 1.0, 3.0], 3);
    let out = eval_loss(&huber, &[labels], &[preds]).unwrap();
    assert_approx_vec(&out, &[0.125, 0.5, 2.5], 1e-12);
}

#[test]
fn test_adaptive_power_loss_shapes() {
    // Equal powers collapse to |error|^p.
    let apl = adaptive_power_loss(AdaptivePowerConfig {
        power_near: 2.0,
        power_far: 2.0,
        ..Default::default()
    })
    .unwrap();
    let labels = f64s(&[0.0, 0.0], 2);
    let preds = f64s(&[0.5, 3.0], 2);
    let out = eval_loss(&apl, &[labels.clone()], &[preds.clone()]).unwrap();
    assert_approx_vec(&out, &[0.25, 9.0], 1e-9);

    // At the middle delta the exponent is the midpoint of near and far.
    let apl = adaptive_power_loss(AdaptivePowerConfig::default()).unwrap();
    let out = eval_loss(&apl, &[f64s(&[0.0], 1)], &[f64s(&[1.0], 1)]).unwrap();
    assert_approx_vec(&out, &[1.0], 1e-9);

    // Large errors tend towards the far exponent (here linear).
    let out = eval_loss(&apl, &[f64s(&[0.0], 1)], &[f64s(&[1000.0], 1)]).unwrap();
    assert!(out[0] > 1000.0 && out[0] < 2000.0);
}

#[test]
fn test_categorical_cross_entropy_values() {
    let cce: LossFn = Box::new(categorical_cross_entropy);
    let labels = f64s(&[1.0, 0.0, 0.0, 1.0], (2, 2));
    let preds = f64s(&[0.9, 0.1, 0.2, 0.8], (2, 2));
    let out = eval_loss(&cce, &[labels], &[preds]).unwrap();
    assert_approx_vec(&out, &[-(0.9f64.ln()), -(0.8f64.ln())], 1e-6);
}

#[test]
fn test_sparse_matches_dense_logits() {
    let dense: LossFn = Box::new(categorical_cross_entropy_logits);
    let sparse: LossFn = Box::new(sparse_categorical_cross_entropy_logits);
    let logits = f64s(&[2.0, 1.0, -1.0, 0.5, 3.0, 0.0], (2, 3));

    let dense_labels = f64s(&[0.0, 1.0, 0.0, 0.0, 0.0, 1.0], (2, 3));
    let sparse_labels = Buffer::from_slice(&[1i64, 2], (2, 1)).unwrap();

    let from_dense = eval_loss(&dense, &[dense_labels], &[logits.clone()]).unwrap();
    let from_sparse = eval_loss(&sparse, &[sparse_labels], &[logits]).unwrap();
    assert_approx_vec(&from_sparse, &from_dense, 1e-12);
}

#[test]
fn test_categorical_logits_mask_zeroes_examples() {
    let dense: LossFn = Box::new(categorical_cross_entropy_logits);
    let logits = f64s(&[2.0, 1.0, 500.0, -500.0], (2, 2));
    let labels = f64s(&[1.0, 0.0, 1.0, 0.0], (2, 2));
    let mask = bools(&[true, false], 2);
    let out = eval_loss(&dense, &[labels, mask], &[logits]).unwrap();
    assert!(out[0].is_finite() && out[0] > 0.0);
    assert_eq!(out[1], 0.0);
}

#[test]
fn test_loss_from_name_end_to_end() {
    let opts = LossOptions {
        huber_delta: 2.0,
        ..Default::default()
    };
    let huber = loss_from_name("huber", &opts).unwrap();
    let out = eval_loss(&huber, &[f64s(&[0.0], 1)], &[f64s(&[1.0], 1)]).unwrap();
    // |error| = 1 < delta = 2, so still in the quadratic zone.
    assert_approx_vec(&out, &[0.5], 1e-12);

    assert!(loss_from_name("no_such_loss", &LossOptions::default()).is_err());
}

#[test]
fn test_mask_zeroes_weighted_positions() {
    // Raw per-example Huber losses of exactly [1.0, 1.0]: with delta = 1,
    // an error of 1.5 lands in the linear zone at 1*(1.5 - 0.5) = 1.
    let huber = huber_loss(1.0).unwrap();
    let labels = f64s(&[0.0, 0.0], 2);
    let preds = f64s(&[1.5, 1.5], 2);
    let weights = f64s(&[2.0, 3.0], 2);
    let mask = bools(&[true, false], 2);
    let out = eval_loss(&huber, &[labels, weights, mask], &[preds]).unwrap();
    // The mask wins over the weight at masked positions.
    assert_approx_vec(&out, &[2.0, 0.0], 1e-12);
}

#[test]
fn test_weights_in_either_label_position() {
    let mae: LossFn = Box::new(mean_absolute_error);
    let labels = f64s(&[1.0, 3.0], 2);
    let preds = f64s(&[0.0, 0.0], 2);
    let weights = f64s(&[1.0, 0.0], 2);
    let mask = bools(&[true, true], 2);

    let a = eval_loss(
        &mae,
        &[labels.clone(), weights.clone(), mask.clone()],
        &[preds.clone()],
    )
    .unwrap();
    let b = eval_loss(&mae, &[labels, mask, weights], &[preds]).unwrap();
    assert_approx_vec(&a, &b, 0.0);
    assert_approx_vec(&a, &[0.5], 1e-12);
}
