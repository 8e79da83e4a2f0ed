//! # vole-losses
//!
//! Loss functions over symbolic [`vole_core`] graphs.
//!
//! Every loss shares one calling convention: `(labels, predictions)` slices
//! of graph nodes, where `labels[0]` holds the true values and later label
//! entries may carry per-example weights and/or a boolean mask (recognized
//! by type, in either order). Most losses return per-example values and
//! leave reduction to the caller; the plain regression losses (MSE, MAE)
//! reduce to a scalar mean themselves.
//!
//! Losses can be constructed directly, or by name through [`LossKind`] /
//! [`loss_from_name`] with parameters carried in [`LossOptions`].

pub mod losses;
pub mod registry;

pub use losses::{
    adaptive_power_loss, binary_crossentropy, binary_crossentropy_logits,
    categorical_cross_entropy, categorical_cross_entropy_logits,
    check_labels_for_weights_and_mask, huber_loss, mean_absolute_error, mean_squared_error,
    sparse_categorical_cross_entropy_logits, AdaptivePowerConfig,
};
pub use registry::{loss_from_name, make_loss, LossKind, LossOptions};

use vole_core::{Node, Result};

/// A loss function: maps `(labels, predictions)` to a loss node.
///
/// Boxed so losses with captured parameters (Huber's delta, the adaptive
/// power shape) and plain functions share one type.
pub type LossFn = Box<dyn Fn(&[Node], &[Node]) -> Result<Node> + Send + Sync>;
