//! # vole-backend
//!
//! The compile-and-execute half of Vole.
//!
//! A symbolic [`vole_core::Graph`] is lowered into a flat [`Program`]
//! (slot-based instruction tape with liveness information), loaded into a
//! [`Runtime`], and wrapped in an [`Executable`] that owns the loaded-program
//! handle for its whole lifecycle:
//!
//! ```text
//! Uninitialized → Compiled → (Executed)* → Finalized
//! ```
//!
//! `compile` produces a Compiled executable; `execute` is repeatable;
//! `finalize` is legal from every state, idempotent, and terminal.
//!
//! [`Interp`] is the reference runtime: a host interpreter with a
//! loaded-program registry, used by the tests and the plot sampler.

pub mod executable;
pub mod interp;
pub mod program;
pub mod runtime;

pub use executable::{compile, Executable};
pub use interp::Interp;
pub use program::{lower, CompileStats, Instr, Program};
pub use runtime::{CompileOptions, ProgramId, Runtime};
