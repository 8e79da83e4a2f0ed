use std::fmt;

use vole_core::{Buffer, Result};

use crate::program::Program;

// Runtime — the accelerator-runtime boundary
//
// Everything below this trait is opaque to the rest of the workspace: a
// runtime turns a lowered Program into a loaded program behind an id, runs
// it against buffers, and destroys it. The trait mirrors what the executable
// lifecycle needs and nothing more.

/// Opaque handle to a loaded program inside a runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramId(pub u64);

/// Per-compile options.
///
/// `quiet` suppresses the runtime's compile-time chatter for this one call;
/// it is a scoped parameter, not a process-wide flag.
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    pub quiet: bool,
}

impl CompileOptions {
    pub fn quiet() -> Self {
        CompileOptions { quiet: true }
    }
}

/// A compilation-and-execution runtime.
///
/// Implementations are expected to be shared behind an `Arc` and must be
/// safe to call from multiple threads; a single loaded program, however, is
/// treated as owned by one logical caller at a time (callers serialize
/// access to one executable themselves).
pub trait Runtime: fmt::Debug + Send + Sync + 'static {
    /// Backend identifier used in error tags and log messages.
    fn name(&self) -> &str;

    /// Whether the runtime is still usable. A runtime may be shut down
    /// independently of the executables holding references to it.
    fn is_valid(&self) -> bool;

    /// Load a lowered program, returning its handle.
    fn load(&self, program: Program, opts: &CompileOptions) -> Result<ProgramId>;

    /// Run a loaded program. `donate` is either empty (donate nothing) or
    /// one flag per input; a donated input's storage may be released or
    /// reused by the runtime and must not be touched by the caller again.
    /// Outputs come back in the program's output order.
    fn execute(&self, id: ProgramId, inputs: Vec<Buffer>, donate: &[bool]) -> Result<Vec<Buffer>>;

    /// Release a loaded program. Each handle may be destroyed exactly once.
    fn destroy(&self, id: ProgramId) -> Result<()>;
}
