use std::sync::Arc;

use vole_core::{Buffer, Error, Node, ParamSpec, Result, TensorType};

use crate::program::lower;
use crate::runtime::{CompileOptions, ProgramId, Runtime};

// Executable — lifecycle manager for one compiled computation
//
// An Executable owns a loaded-program handle inside a runtime and the
// metadata needed to validate calls on the host side: parameter specs and
// output types, in order. `finalize` releases the handle and clears the
// metadata; it is idempotent and also runs on Drop, so leaking an
// Executable never leaks the runtime-side program.

/// A compiled computation, ready to execute.
#[derive(Debug)]
pub struct Executable {
    runtime: Option<Arc<dyn Runtime>>,
    program: Option<ProgramId>,
    name: String,
    params: Vec<ParamSpec>,
    outputs: Vec<TensorType>,
}

/// Compile `outputs` (all from one build context) against `runtime`.
///
/// Output order here fixes the buffer order returned by
/// [`Executable::execute`]; parameter order was fixed by the declaration
/// order on the graph.
pub fn compile(
    runtime: Arc<dyn Runtime>,
    outputs: &[Node],
    opts: &CompileOptions,
) -> Result<Executable> {
    let first = outputs.first().ok_or_else(|| {
        Error::Configuration("cannot compile a computation with no outputs".to_string())
    })?;
    let graph = first.graph().clone();
    for out in &outputs[1..] {
        if !graph.same_graph(out.graph()) {
            return Err(Error::Configuration(
                "outputs belong to different build contexts".to_string(),
            ));
        }
    }
    let name = graph.name();
    let wrap = |source: Error| Error::Compilation {
        backend: runtime.name().to_string(),
        name: name.clone(),
        source: Box::new(source),
    };
    let program = lower(&graph, outputs).map_err(&wrap)?;
    let output_types = program.output_types.clone();
    let id = runtime.load(program, opts).map_err(&wrap)?;
    Ok(Executable {
        params: graph.params(),
        runtime: Some(runtime),
        program: Some(id),
        name,
        outputs: output_types,
    })
}

impl Executable {
    /// The source computation's name, kept through finalization for log
    /// messages.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parameter name and type for each expected input, in call order.
    /// Empty after finalization.
    pub fn inputs(&self) -> &[ParamSpec] {
        &self.params
    }

    /// Output types, in the order buffers come back from `execute`.
    /// Empty after finalization.
    pub fn outputs(&self) -> &[TensorType] {
        &self.outputs
    }

    /// Error unless this executable is still usable: not finalized, and
    /// its runtime not shut down underneath it.
    pub fn assert_valid(&self) -> Result<()> {
        let runtime = match (&self.runtime, &self.program) {
            (Some(rt), Some(_)) => rt,
            _ => {
                return Err(Error::InvalidState(format!(
                    "executable {:?} has been finalized",
                    self.name
                )))
            }
        };
        if !runtime.is_valid() {
            return Err(Error::InvalidState(format!(
                "runtime {:?} behind executable {:?} is no longer valid",
                runtime.name(),
                self.name
            )));
        }
        Ok(())
    }

    /// Run the computation.
    ///
    /// `inputs` must match the parameter list in count and type. `donate`
    /// is either empty or one flag per input; a donated input's storage may
    /// be released by the runtime as soon as the program is done with it.
    /// Outputs come back in compile-time output order.
    pub fn execute(&self, inputs: Vec<Buffer>, donate: &[bool]) -> Result<Vec<Buffer>> {
        self.assert_valid()?;
        if inputs.len() != self.params.len() {
            return Err(Error::Arity {
                what: "execute inputs",
                expected: self.params.len(),
                got: inputs.len(),
            });
        }
        if !donate.is_empty() && donate.len() != self.params.len() {
            return Err(Error::Arity {
                what: "donate flags",
                expected: self.params.len(),
                got: donate.len(),
            });
        }
        let runtime = self.runtime.as_ref().expect("checked by assert_valid");
        let program = self.program.expect("checked by assert_valid");
        runtime
            .execute(program, inputs, donate)
            .map_err(|source| Error::Execution {
                backend: runtime.name().to_string(),
                name: self.name.clone(),
                source: Box::new(source),
            })
    }

    /// Release the runtime-side program and clear all metadata. Safe to
    /// call any number of times, in any state; errors from the runtime are
    /// logged, not returned, since the executable is unusable afterwards
    /// either way.
    pub fn finalize(&mut self) {
        if let (Some(runtime), Some(program)) = (self.runtime.take(), self.program.take()) {
            if runtime.is_valid() {
                if let Err(err) = runtime.destroy(program) {
                    log::warn!(
                        target: "vole::exec",
                        "failed to destroy program for executable {:?}: {}",
                        self.name,
                        err
                    );
                }
            }
        }
        self.params.clear();
        self.outputs.clear();
    }
}

impl Drop for Executable {
    fn drop(&mut self) {
        self.finalize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::Interp;
    use vole_core::{DType, Graph};

    fn quiet() -> CompileOptions {
        CompileOptions::quiet()
    }

    #[test]
    fn test_compile_requires_outputs() {
        let rt: Arc<dyn Runtime> = Arc::new(Interp::new());
        assert!(matches!(
            compile(rt, &[], &quiet()),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_compile_rejects_mixed_contexts() {
        let g1 = Graph::new("f");
        let g2 = Graph::new("g");
        let a = g1.parameter("a", 1, DType::F64);
        let b = g2.parameter("b", 1, DType::F64);
        let rt: Arc<dyn Runtime> = Arc::new(Interp::new());
        assert!(matches!(
            compile(rt, &[a, b], &quiet()),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_metadata_order() {
        let g = Graph::new("meta");
        let a = g.parameter("first", (2, 2), DType::F32);
        let b = g.parameter("second", 2, DType::I64);
        let s = a.sum_all().unwrap();
        let rt: Arc<dyn Runtime> = Arc::new(Interp::new());
        let exe = compile(rt, &[s, b], &quiet()).unwrap();
        assert_eq!(exe.name(), "meta");
        assert_eq!(exe.inputs().len(), 2);
        assert_eq!(exe.inputs()[0].name, "first");
        assert_eq!(exe.inputs()[1].ttype, TensorType::new(2, DType::I64));
        assert_eq!(exe.outputs().len(), 2);
        assert_eq!(exe.outputs()[0], TensorType::new((), DType::F32));
    }

    #[test]
    fn test_execute_and_arity_checks() {
        let g = Graph::new("f");
        let a = g.parameter("a", 2, DType::F64);
        let b = g.parameter("b", 2, DType::F64);
        let c = a.add(&b).unwrap();
        let rt: Arc<dyn Runtime> = Arc::new(Interp::new());
        let exe = compile(rt, &[c], &quiet()).unwrap();

        let x = Buffer::from_slice(&[1.0, 2.0], 2).unwrap();
        let y = Buffer::from_slice(&[10.0, 20.0], 2).unwrap();
        let out = exe.execute(vec![x.clone(), y.clone()], &[]).unwrap();
        assert_eq!(out[0].to_f64_vec(), vec![11.0, 22.0]);

        assert!(matches!(
            exe.execute(vec![x.clone()], &[]),
            Err(Error::Arity { what: "execute inputs", .. })
        ));
        assert!(matches!(
            exe.execute(vec![x.clone(), y.clone()], &[true]),
            Err(Error::Arity { what: "donate flags", .. })
        ));

        // Donation is legal and the executable stays reusable.
        let out = exe.execute(vec![x, y], &[true, false]).unwrap();
        assert_eq!(out[0].to_f64_vec(), vec![11.0, 22.0]);
    }

    #[test]
    fn test_execute_wraps_runtime_errors() {
        let g = Graph::new("f");
        let a = g.parameter("a", 2, DType::F64);
        let rt: Arc<dyn Runtime> = Arc::new(Interp::new());
        let exe = compile(rt, &[a], &quiet()).unwrap();
        let wrong = Buffer::from_slice(&[1.0f32, 2.0], 2).unwrap();
        match exe.execute(vec![wrong], &[]) {
            Err(Error::Execution { backend, name, .. }) => {
                assert_eq!(backend, "interp");
                assert_eq!(name, "f");
            }
            other => panic!("expected Execution error, got {:?}", other),
        }
    }

    #[test]
    fn test_finalize_idempotent() {
        let g = Graph::new("f");
        let a = g.parameter("a", 1, DType::F64);
        let rt: Arc<dyn Runtime> = Arc::new(Interp::new());
        let mut exe = compile(rt, &[a], &quiet()).unwrap();
        assert!(exe.assert_valid().is_ok());

        exe.finalize();
        exe.finalize();
        assert!(exe.inputs().is_empty());
        assert!(exe.outputs().is_empty());
        assert_eq!(exe.name(), "f");
        assert!(matches!(exe.assert_valid(), Err(Error::InvalidState(_))));
        assert!(exe.execute(vec![], &[]).is_err());
    }

    #[test]
    fn test_runtime_shutdown_invalidates() {
        let g = Graph::new("f");
        let a = g.parameter("a", 1, DType::F64);
        let rt = Arc::new(Interp::new());
        let exe = compile(rt.clone(), &[a], &quiet()).unwrap();
        rt.shutdown();
        assert!(matches!(exe.assert_valid(), Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_drop_releases_program() {
        let g = Graph::new("f");
        let a = g.parameter("a", 1, DType::F64);
        let rt = Arc::new(Interp::new());
        let id;
        {
            let exe = compile(rt.clone(), &[a], &quiet()).unwrap();
            id = exe.program.expect("compiled");
        }
        // The handle is gone once the executable is dropped.
        assert!(rt.destroy(id).is_err());
    }
}
