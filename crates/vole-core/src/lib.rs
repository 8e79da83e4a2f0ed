//! # vole-core
//!
//! Core building blocks for Vole: symbolic computation graphs and the host
//! values they are compiled against.
//!
//! This crate provides:
//! - [`Graph`] / [`Node`] — a single-computation build context and its
//!   symbolic values, with eager shape/dtype inference on every operator
//! - [`Shape`] / [`TensorType`] — dimension lists and (shape, dtype) pairs
//! - [`DType`] — element types (F16, BF16, F32, F64, U8, I32, I64, Bool)
//! - [`Buffer`] — a concrete host tensor value passed into/out of execution
//! - [`Error`] / [`Result`] — the single error taxonomy used workspace-wide

pub mod buffer;
pub mod dtype;
pub mod error;
pub mod graph;
pub mod shape;

pub use buffer::{data_from_f64, Buffer, BufferData};
pub use dtype::{DType, WithDType};
pub use error::{Error, Result};
pub use graph::{BinaryOp, CmpOp, Graph, Node, NodeId, Op, ParamSpec, ReduceOp, UnaryOp};
pub use shape::{Shape, TensorType};
