//! # Vole
//!
//! Umbrella crate tying the workspace together:
//! - [`vole_core`] — symbolic graphs, shapes, dtypes, and host buffers
//! - [`vole_backend`] — lowering, the runtime boundary, and executables
//! - [`vole_losses`] — standard loss functions over graphs
//! - [`hyperparams`] — a string-keyed parameter store and loss selection
//! - [`plot`] — sampling univariate functions through a runtime and
//!   rendering them as SVG line charts
//!
//! ```no_run
//! use std::sync::Arc;
//! use vole::prelude::*;
//!
//! fn main() -> vole::Result<()> {
//!     let runtime = Arc::new(Interp::new());
//!     let curve = vole::plot::sample(runtime, "square", |x| x.mul(x))?;
//!     vole::plot::render("/tmp/square.svg", "x^2", &[curve])?;
//!     Ok(())
//! }
//! ```

pub mod hyperparams;
pub mod plot;

pub use vole_backend::{
    compile, CompileOptions, CompileStats, Executable, Interp, Program, ProgramId, Runtime,
};
pub use vole_core::{
    Buffer, BufferData, DType, Error, Graph, Node, ParamSpec, Result, Shape, TensorType,
};
pub use vole_losses as losses;
pub use vole_losses::{LossFn, LossKind, LossOptions};

pub mod prelude {
    pub use crate::hyperparams::Params;
    pub use crate::plot::Curve;
    pub use vole_backend::{compile, CompileOptions, Executable, Interp, Runtime};
    pub use vole_core::{Buffer, DType, Graph, Node, Result, Shape, TensorType};
    pub use vole_losses::{loss_from_name, LossFn, LossKind, LossOptions};
}
