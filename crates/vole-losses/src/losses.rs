use vole_core::{DType, Error, Node, Result, Shape, TensorType};

use crate::LossFn;

// Loss functions
//
// All losses take `(labels, predictions)` slices. `labels[0]` holds the true
// values; any later entries are classified by type: an entry matching the
// expected weights type is a per-example weight tensor, a Bool entry with the
// same dimensions is a mask. Masks are applied by conditional select (masked
// positions become exact zeros), never by multiplication, so NaN or Inf in a
// masked-out position cannot leak into the result.
//
// MSE and MAE reduce to a scalar mean over every element (masked ones
// contribute zero to the numerator but still count in the denominator). All
// other losses return per-example values and leave reduction to the caller.

pub const EPSILON_16: f64 = 1e-4;
pub const EPSILON_32: f64 = 1e-7;
pub const EPSILON_64: f64 = 1e-8;

/// The numerical-stability epsilon associated with a float dtype.
pub fn epsilon_for_dtype(dtype: DType) -> Result<f64> {
    match dtype {
        DType::F16 | DType::BF16 => Ok(EPSILON_16),
        DType::F32 => Ok(EPSILON_32),
        DType::F64 => Ok(EPSILON_64),
        other => Err(Error::Configuration(format!(
            "no epsilon value defined for dtype {}",
            other
        ))),
    }
}

fn first<'a>(nodes: &'a [Node], what: &'static str) -> Result<&'a Node> {
    nodes.first().ok_or(Error::Arity {
        what,
        expected: 1,
        got: 0,
    })
}

fn check_same_type(labels: &Node, predictions: &Node) -> Result<()> {
    if labels.dtype() != predictions.dtype() {
        return Err(Error::DTypeMismatch {
            expected: predictions.dtype(),
            got: labels.dtype(),
        });
    }
    if labels.shape() != predictions.shape() {
        return Err(Error::ShapeMismatch {
            expected: predictions.shape(),
            got: labels.shape(),
        });
    }
    Ok(())
}

/// Classify the extra `labels` entries into weights and mask.
///
/// `weights_type` is the type weights must have; a mask must be Bool with
/// the same dimensions. First match wins per slot; an entry matching
/// neither is an error. When both are present the weights are zeroed where
/// the mask is false, so callers that only apply weights still honor the
/// mask.
pub fn check_labels_for_weights_and_mask(
    weights_type: &TensorType,
    labels: &[Node],
) -> Result<(Option<Node>, Option<Node>)> {
    let mut weights: Option<Node> = None;
    let mut mask: Option<Node> = None;
    // labels[0] holds the actual labels.
    for (ii, extra) in labels.iter().enumerate().skip(1) {
        let ttype = extra.ttype();
        if weights.is_none() && ttype == *weights_type {
            weights = Some(extra.clone());
        } else if mask.is_none()
            && ttype.dtype == DType::Bool
            && ttype.shape == weights_type.shape
        {
            mask = Some(extra.clone());
        } else {
            return Err(Error::UnrecognizedAuxiliary {
                index: ii,
                got: ttype,
                weights: weights_type.clone(),
            });
        }
    }
    if let (Some(w), Some(m)) = (&weights, &mask) {
        weights = Some(m.where_cond(w, &w.zeros_like()?)?);
    }
    Ok((weights, mask))
}

fn apply_weights_and_mask(
    mut loss: Node,
    weights: Option<&Node>,
    mask: Option<&Node>,
) -> Result<Node> {
    if let Some(w) = weights {
        loss = loss.mul(w)?;
    }
    if let Some(m) = mask {
        loss = m.where_cond(&loss, &loss.zeros_like()?)?;
    }
    Ok(loss)
}

/// Mean squared error, reduced to a scalar mean over all elements.
pub fn mean_squared_error(labels: &[Node], predictions: &[Node]) -> Result<Node> {
    let predictions0 = first(predictions, "predictions")?;
    let labels0 = first(labels, "labels")?;
    check_same_type(labels0, predictions0)?;
    let (weights, mask) = check_labels_for_weights_and_mask(&labels0.ttype(), labels)?;
    let diff = labels0.sub(predictions0)?;
    let loss = diff.mul(&diff)?;
    let loss = apply_weights_and_mask(loss, weights.as_ref(), mask.as_ref())?;
    loss.mean_all()
}

/// Mean absolute error, reduced to a scalar mean over all elements.
pub fn mean_absolute_error(labels: &[Node], predictions: &[Node]) -> Result<Node> {
    let predictions0 = first(predictions, "predictions")?;
    let labels0 = first(labels, "labels")?;
    check_same_type(labels0, predictions0)?;
    let (weights, mask) = check_labels_for_weights_and_mask(&labels0.ttype(), labels)?;
    let loss = labels0.sub(predictions0)?.abs()?;
    let loss = apply_weights_and_mask(loss, weights.as_ref(), mask.as_ref())?;
    loss.mean_all()
}

/// Per-example binary cross-entropy over probability predictions.
///
/// `labels[0]` is converted to the predictions' dtype, so bools or 0/1
/// integers work. Predictions are taken as-is: a prediction of exactly 0 or
/// 1 on the wrong label yields an infinite loss. Use
/// [`binary_crossentropy_logits`] for the numerically stable form.
pub fn binary_crossentropy(labels: &[Node], predictions: &[Node]) -> Result<Node> {
    let predictions0 = first(predictions, "predictions")?;
    let labels0 = first(labels, "labels")?.convert(predictions0.dtype())?;
    check_same_type(&labels0, predictions0)?;
    let (weights, mask) = check_labels_for_weights_and_mask(&labels0.ttype(), labels)?;
    let loss = labels0
        .mul(&predictions0.log()?)?
        .add(&labels0.one_minus()?.mul(&predictions0.one_minus()?.log()?)?)?
        .neg()?;
    apply_weights_and_mask(loss, weights.as_ref(), mask.as_ref())
}

/// Per-example binary cross-entropy over logits, assuming
/// `predictions = sigmoid(logits)`.
///
/// Evaluated as `max(x, 0) - x*y + log1p(exp(-|x|))`, which is stable for
/// logits of any magnitude. Labels may differ in rank from the logits as
/// long as the element counts match.
pub fn binary_crossentropy_logits(labels: &[Node], logits: &[Node]) -> Result<Node> {
    let logits0 = first(logits, "logits")?;
    let mut labels0 = first(labels, "labels")?.convert(logits0.dtype())?;
    if labels0.shape().elem_count() != logits0.shape().elem_count() {
        return Err(Error::ShapeMismatch {
            expected: logits0.shape(),
            got: labels0.shape(),
        });
    }
    if labels0.rank() != logits0.rank() {
        labels0 = labels0.reshape(logits0.shape())?;
    }
    let (weights, mask) = check_labels_for_weights_and_mask(&labels0.ttype(), labels)?;
    let log_part = logits0.abs()?.neg()?.exp()?.log1p()?;
    let prod_part = logits0.mul(&labels0)?;
    let max_part = logits0.maximum(&logits0.zeros_like()?)?;
    let loss = max_part.sub(&prod_part)?.add(&log_part)?;
    apply_weights_and_mask(loss, weights.as_ref(), mask.as_ref())
}

/// The weights type for categorical losses: the labels' dimensions without
/// the class axis, in the predictions' dtype.
fn categorical_weights_type(labels0: &Node, predictions_dtype: DType) -> TensorType {
    let dims = labels0.dims();
    let batch_dims = &dims[..dims.len().saturating_sub(1)];
    TensorType::new(Shape::new(batch_dims.to_vec()), predictions_dtype)
}

/// Per-example cross-entropy over dense probability predictions.
///
/// `labels[0]` holds a distribution over the last axis (typically one-hot);
/// predictions hold probabilities. Predictions are clamped into
/// `[eps, 1-eps]` for the dtype's epsilon before the log.
pub fn categorical_cross_entropy(labels: &[Node], predictions: &[Node]) -> Result<Node> {
    let predictions0 = first(predictions, "predictions")?;
    let labels0 = first(labels, "labels")?;
    let weights_type = categorical_weights_type(labels0, predictions0.dtype());
    let (weights, mask) = check_labels_for_weights_and_mask(&weights_type, labels)?;
    check_same_type(labels0, predictions0)?;
    if labels0.rank() == 0 {
        return Err(Error::Configuration(
            "categorical labels need a class axis".to_string(),
        ));
    }
    let eps = epsilon_for_dtype(predictions0.dtype())?;
    let clipped = predictions0.clamp(eps, 1.0 - eps)?;
    let last = labels0.rank() - 1;
    let loss = labels0.mul(&clipped.log()?)?.neg()?.sum(&[last], false)?;
    apply_weights_and_mask(loss, weights.as_ref(), mask.as_ref())
}

/// Per-example cross-entropy over dense labels and raw logits.
///
/// Goes through log-softmax rather than an explicit softmax, so it is stable
/// for logits of any magnitude. With a mask, masked-out examples have their
/// logits zeroed before the softmax so they cannot overflow, and their loss
/// is zero.
pub fn categorical_cross_entropy_logits(labels: &[Node], logits: &[Node]) -> Result<Node> {
    let logits0 = first(logits, "logits")?;
    let labels0 = first(labels, "labels")?;
    let weights_type = categorical_weights_type(labels0, logits0.dtype());
    let (weights, mask) = check_labels_for_weights_and_mask(&weights_type, labels)?;
    categorical_cross_logits_impl(labels0, logits0, weights.as_ref(), mask.as_ref())
}

fn categorical_cross_logits_impl(
    labels: &Node,
    logits: &Node,
    weights: Option<&Node>,
    mask: Option<&Node>,
) -> Result<Node> {
    check_same_type(labels, logits)?;
    if logits.rank() == 0 {
        return Err(Error::Configuration(
            "categorical logits need a class axis".to_string(),
        ));
    }
    let mut logits = logits.clone();
    if let Some(m) = mask {
        let mut dims = m.dims();
        dims.push(1);
        let expanded = m.reshape(dims)?.broadcast_to(logits.shape())?;
        logits = expanded.where_cond(&logits, &logits.zeros_like()?)?;
    }
    let last = logits.rank() - 1;
    let log_predictions = logits.log_softmax(last)?;
    let loss = labels.mul(&log_predictions)?.neg()?.sum(&[last], false)?;
    apply_weights_and_mask(loss, weights, mask)
}

/// Per-example cross-entropy over sparse integer labels and raw logits.
///
/// `labels[0]` must be an integer tensor of the same rank as the logits with
/// a trailing axis of size 1 holding the true class index. It is expanded to
/// one-hot and handed to the dense logits form.
pub fn sparse_categorical_cross_entropy_logits(labels: &[Node], logits: &[Node]) -> Result<Node> {
    let logits0 = first(logits, "logits")?;
    let labels0 = first(labels, "labels")?;
    if !labels0.dtype().is_int() {
        return Err(Error::Configuration(format!(
            "sparse labels must be integers, got {}",
            labels0.dtype()
        )));
    }
    if labels0.rank() != logits0.rank() {
        return Err(Error::ShapeMismatch {
            expected: logits0.shape(),
            got: labels0.shape(),
        });
    }
    let labels_dims = labels0.dims();
    let rank = labels_dims.len();
    if rank == 0 || labels_dims[rank - 1] != 1 {
        return Err(Error::Configuration(format!(
            "sparse labels must have a trailing axis of size 1 holding the class index, got shape {}",
            labels0.shape()
        )));
    }
    let weights_type = TensorType::new(
        Shape::new(labels_dims[..rank - 1].to_vec()),
        logits0.dtype(),
    );
    let (weights, mask) = check_labels_for_weights_and_mask(&weights_type, labels)?;

    // Drop the trailing axis; one_hot re-adds it as the class axis.
    let depth = *logits0.dims().last().ok_or_else(|| {
        Error::Configuration("logits must have a class axis".to_string())
    })?;
    let reduced = labels0.reshape(Shape::new(labels_dims[..rank - 1].to_vec()))?;
    let dense = reduced.one_hot(depth, logits0.dtype())?;
    categorical_cross_logits_impl(&dense, logits0, weights.as_ref(), mask.as_ref())
}

/// Build a Huber loss with the given `delta`: quadratic within `delta` of
/// the target, linear beyond it. 1.0 is a good default. Per-example, not
/// reduced.
pub fn huber_loss(delta: f64) -> Result<LossFn> {
    if delta <= 0.0 {
        return Err(Error::Configuration(format!(
            "huber loss requires delta > 0 (1.0 being a good default), got {}",
            delta
        )));
    }
    Ok(Box::new(move |labels, predictions| {
        let predictions0 = first(predictions, "predictions")?;
        let labels0 = first(labels, "labels")?;
        check_same_type(labels0, predictions0)?;
        let (weights, mask) = check_labels_for_weights_and_mask(&labels0.ttype(), labels)?;

        let delta_const = labels0.graph().scalar(labels0.dtype(), delta);
        let abs_errors = labels0.sub(predictions0)?.abs()?;
        let quadratic = abs_errors.minimum(&delta_const)?;
        // Same as max(abs - delta, 0), expressed without a second branch so
        // the gradient through abs_errors is not doubled.
        let linear = abs_errors.sub(&quadratic)?;
        let loss = quadratic
            .mul(&quadratic)?
            .mul_scalar(0.5)?
            .add(&delta_const.mul(&linear)?)?;
        apply_weights_and_mask(loss, weights.as_ref(), mask.as_ref())
    }))
}

/// Shape of an [`adaptive_power_loss`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptivePowerConfig {
    /// Exponent the loss tends to when |labels - predictions| is small.
    pub power_near: f64,
    /// Exponent the loss tends to when |labels - predictions| is large.
    pub power_far: f64,
    /// The error at which the exponent is the midpoint of near and far.
    pub middle_delta: f64,
    /// How sudden the transition between the two exponents is.
    pub sharpness: f64,
}

impl Default for AdaptivePowerConfig {
    fn default() -> Self {
        AdaptivePowerConfig {
            power_near: 2.0,
            power_far: 1.0,
            middle_delta: 1.0,
            sharpness: 1.0,
        }
    }
}

/// Build an adaptive power loss: `|labels - predictions| ^ p` where the
/// exponent `p` transitions smoothly from `power_near` for small errors to
/// `power_far` for large ones. With the default config (near 2, far 1) it
/// behaves like a Huber loss. Per-example, not reduced.
///
/// The exponent is computed through a sigmoid of the log error, using
/// whichever of the two algebraically equal forms is finite for that sign,
/// and is treated as a constant by gradients so NaNs cannot flow back
/// through it.
pub fn adaptive_power_loss(config: AdaptivePowerConfig) -> Result<LossFn> {
    if config.middle_delta <= 0.0 {
        return Err(Error::Configuration(format!(
            "adaptive power loss requires middle_delta > 0, got {}",
            config.middle_delta
        )));
    }
    if config.sharpness <= 0.0 {
        return Err(Error::Configuration(format!(
            "adaptive power loss requires sharpness > 0, got {}",
            config.sharpness
        )));
    }
    Ok(Box::new(move |labels, predictions| {
        let predictions0 = first(predictions, "predictions")?;
        let labels0 = first(labels, "labels")?;
        check_same_type(labels0, predictions0)?;
        let (weights, mask) = check_labels_for_weights_and_mask(&labels0.ttype(), labels)?;

        let dtype = predictions0.dtype();
        let graph = predictions0.graph();
        let delta = labels0.sub(predictions0)?.abs()?;
        let loss = if config.power_near == config.power_far {
            delta.pow(&graph.scalar(dtype, config.power_near))?
        } else {
            let normalized = delta.mul_scalar(1.0 / config.middle_delta)?;
            let eps = graph.scalar(dtype, epsilon_for_dtype(dtype)?);
            let ln_delta = normalized.maximum(&eps)?.log()?;
            let scaled = ln_delta
                .mul_scalar((config.power_near - config.power_far) / config.sharpness)?;

            // version1 is finite for positive scaled values, version2 for
            // negative ones.
            let version1 = scaled
                .sigmoid()?
                .mul_scalar(config.power_far - config.power_near)?
                .add_scalar(config.power_near)?;
            let version2 = scaled
                .neg()?
                .sigmoid()?
                .mul_scalar(config.power_near - config.power_far)?
                .add_scalar(config.power_far)?;
            let power = scaled
                .greater(&graph.scalar(dtype, 0.0))?
                .where_cond(&version1, &version2)?
                .stop_gradient()?;
            delta.pow(&power)?
        };
        apply_weights_and_mask(loss, weights.as_ref(), mask.as_ref())
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use vole_core::Graph;

    #[test]
    fn test_epsilon_values() {
        assert_eq!(epsilon_for_dtype(DType::F16).unwrap(), 1e-4);
        assert_eq!(epsilon_for_dtype(DType::BF16).unwrap(), 1e-4);
        assert_eq!(epsilon_for_dtype(DType::F32).unwrap(), 1e-7);
        assert_eq!(epsilon_for_dtype(DType::F64).unwrap(), 1e-8);
        assert!(epsilon_for_dtype(DType::I64).is_err());
    }

    #[test]
    fn test_weights_and_mask_classified_in_either_order() {
        let g = Graph::new("f");
        let labels = g.parameter("labels", 4, DType::F32);
        let w = g.parameter("w", 4, DType::F32);
        let m = g.parameter("m", 4, DType::Bool);
        let wt = labels.ttype();

        let (weights, mask) =
            check_labels_for_weights_and_mask(&wt, &[labels.clone(), w.clone(), m.clone()])
                .unwrap();
        assert!(weights.is_some());
        assert!(mask.is_some());

        let (weights, mask) =
            check_labels_for_weights_and_mask(&wt, &[labels.clone(), m, w]).unwrap();
        assert!(weights.is_some());
        assert!(mask.is_some());

        let (weights, mask) = check_labels_for_weights_and_mask(&wt, &[labels]).unwrap();
        assert!(weights.is_none());
        assert!(mask.is_none());
    }

    #[test]
    fn test_unrecognized_auxiliary() {
        let g = Graph::new("f");
        let labels = g.parameter("labels", 4, DType::F32);
        let odd = g.parameter("odd", 7, DType::F32);
        let err = check_labels_for_weights_and_mask(&labels.ttype(), &[labels, odd]).unwrap_err();
        match err {
            Error::UnrecognizedAuxiliary { index, .. } => assert_eq!(index, 1),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_losses_reject_shape_mismatch() {
        let g = Graph::new("f");
        let labels = g.parameter("labels", 4, DType::F32);
        let preds = g.parameter("preds", 5, DType::F32);
        assert!(mean_squared_error(&[labels.clone()], &[preds.clone()]).is_err());
        assert!(mean_absolute_error(&[labels.clone()], &[preds.clone()]).is_err());
        assert!(binary_crossentropy_logits(&[labels], &[preds]).is_err());
    }

    #[test]
    fn test_regression_losses_reduce_to_scalar() {
        let g = Graph::new("f");
        let labels = g.parameter("labels", (2, 3), DType::F32);
        let preds = g.parameter("preds", (2, 3), DType::F32);
        let mse = mean_squared_error(&[labels.clone()], &[preds.clone()]).unwrap();
        assert_eq!(mse.shape(), Shape::scalar());
        let mae = mean_absolute_error(&[labels], &[preds]).unwrap();
        assert_eq!(mae.shape(), Shape::scalar());
    }

    #[test]
    fn test_per_example_losses_keep_batch_shape() {
        let g = Graph::new("f");
        let labels = g.parameter("labels", 4, DType::F32);
        let logits = g.parameter("logits", 4, DType::F32);
        let loss = binary_crossentropy_logits(&[labels], &[logits]).unwrap();
        assert_eq!(loss.shape(), Shape::from(4));

        let dense = g.parameter("dense", (2, 3), DType::F32);
        let class_logits = g.parameter("class_logits", (2, 3), DType::F32);
        let loss = categorical_cross_entropy_logits(&[dense], &[class_logits]).unwrap();
        assert_eq!(loss.shape(), Shape::from(2));
    }

    #[test]
    fn test_bce_logits_reshapes_labels() {
        let g = Graph::new("f");
        let labels = g.parameter("labels", 4, DType::I64);
        let logits = g.parameter("logits", (4, 1), DType::F32);
        assert!(binary_crossentropy_logits(&[labels], &[logits]).is_ok());
    }

    #[test]
    fn test_sparse_labels_validated() {
        let g = Graph::new("f");
        let logits = g.parameter("logits", (2, 3), DType::F32);

        let float_labels = g.parameter("a", (2, 1), DType::F32);
        assert!(matches!(
            sparse_categorical_cross_entropy_logits(&[float_labels], &[logits.clone()]),
            Err(Error::Configuration(_))
        ));

        let wrong_rank = g.parameter("b", 2, DType::I64);
        assert!(sparse_categorical_cross_entropy_logits(&[wrong_rank], &[logits.clone()]).is_err());

        let wide = g.parameter("c", (2, 2), DType::I64);
        assert!(matches!(
            sparse_categorical_cross_entropy_logits(&[wide], &[logits.clone()]),
            Err(Error::Configuration(_))
        ));

        let good = g.parameter("d", (2, 1), DType::I64);
        let loss = sparse_categorical_cross_entropy_logits(&[good], &[logits]).unwrap();
        assert_eq!(loss.shape(), Shape::from(2));
    }

    #[test]
    fn test_huber_requires_positive_delta() {
        assert!(huber_loss(0.0).is_err());
        assert!(huber_loss(-1.0).is_err());
        assert!(huber_loss(1.0).is_ok());
    }

    #[test]
    fn test_adaptive_power_config_validated() {
        let bad = AdaptivePowerConfig {
            middle_delta: 0.0,
            ..Default::default()
        };
        assert!(adaptive_power_loss(bad).is_err());
        let bad = AdaptivePowerConfig {
            sharpness: -1.0,
            ..Default::default()
        };
        assert!(adaptive_power_loss(bad).is_err());
        assert!(adaptive_power_loss(AdaptivePowerConfig::default()).is_ok());
    }
}
