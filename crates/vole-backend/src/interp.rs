use std::collections::HashMap;
use std::sync::Mutex;

use vole_core::{
    data_from_f64, BinaryOp, Buffer, BufferData, CmpOp, Error, ReduceOp, Result, Shape,
    TensorType, UnaryOp,
};

use crate::program::{Instr, Program};
use crate::runtime::{CompileOptions, ProgramId, Runtime};

// Interp — the reference runtime
//
// A host interpreter over the lowered instruction tape. Values are evaluated
// through f64 (bool as 0/1), which keeps one kernel per instruction instead
// of one per dtype pair; results are narrowed back to the slot's dtype after
// every instruction, so reduced-precision dtypes round the same way a real
// device would between ops.

#[derive(Debug, Default)]
struct InterpInner {
    programs: HashMap<u64, Program>,
    next_id: u64,
    shut_down: bool,
}

/// Host interpreter runtime with a loaded-program registry.
#[derive(Debug, Default)]
pub struct Interp {
    inner: Mutex<InterpInner>,
}

impl Interp {
    pub fn new() -> Self {
        Interp::default()
    }

    /// Invalidate the runtime: drop every loaded program and fail all
    /// future calls. Executables still holding handles observe this
    /// through [`Runtime::is_valid`].
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock().expect("interp lock poisoned");
        inner.shut_down = true;
        inner.programs.clear();
    }
}

impl Runtime for Interp {
    fn name(&self) -> &str {
        "interp"
    }

    fn is_valid(&self) -> bool {
        !self.inner.lock().expect("interp lock poisoned").shut_down
    }

    fn load(&self, program: Program, opts: &CompileOptions) -> Result<ProgramId> {
        let mut inner = self.inner.lock().expect("interp lock poisoned");
        if inner.shut_down {
            return Err(Error::InvalidState("runtime is shut down".to_string()));
        }
        if !opts.quiet {
            log::debug!(target: "vole::interp", "loaded {:?}: {}", program.name, program.stats);
        }
        let id = inner.next_id;
        inner.next_id += 1;
        inner.programs.insert(id, program);
        Ok(ProgramId(id))
    }

    fn execute(&self, id: ProgramId, inputs: Vec<Buffer>, donate: &[bool]) -> Result<Vec<Buffer>> {
        let program = {
            let inner = self.inner.lock().expect("interp lock poisoned");
            if inner.shut_down {
                return Err(Error::InvalidState("runtime is shut down".to_string()));
            }
            inner
                .programs
                .get(&id.0)
                .cloned()
                .ok_or_else(|| {
                    Error::InvalidState(format!("unknown or destroyed program handle {}", id.0))
                })?
        };
        run_program(&program, inputs, donate)
    }

    fn destroy(&self, id: ProgramId) -> Result<()> {
        let mut inner = self.inner.lock().expect("interp lock poisoned");
        if inner.programs.remove(&id.0).is_none() {
            return Err(Error::InvalidState(format!(
                "unknown or destroyed program handle {}",
                id.0
            )));
        }
        Ok(())
    }
}

fn run_program(program: &Program, inputs: Vec<Buffer>, donate: &[bool]) -> Result<Vec<Buffer>> {
    if inputs.len() != program.param_types.len() {
        return Err(Error::Arity {
            what: "inputs",
            expected: program.param_types.len(),
            got: inputs.len(),
        });
    }
    for (input, want) in inputs.iter().zip(program.param_types.iter()) {
        if input.dtype() != want.dtype {
            return Err(Error::DTypeMismatch {
                expected: want.dtype,
                got: input.dtype(),
            });
        }
        if input.shape() != &want.shape {
            return Err(Error::ShapeMismatch {
                expected: want.shape.clone(),
                got: input.shape().clone(),
            });
        }
    }

    let mut slots: Vec<Option<Buffer>> = vec![None; program.slot_types.len()];
    let mut outputs: Option<Vec<Buffer>> = None;

    for instr in &program.instrs {
        match instr {
            Instr::LoadParam { index, dst } => {
                slots[*dst] = Some(inputs[*index].clone());
            }
            Instr::Constant { value, dst } => {
                slots[*dst] = Some(value.clone());
            }
            Instr::Iota { axis, dst } => {
                let ttype = &program.slot_types[*dst];
                let strides = ttype.shape.stride_contiguous();
                let n = ttype.elem_count();
                let (axis_stride, axis_dim) = (strides[*axis], ttype.shape.dims()[*axis]);
                let vals = (0..n).map(|i| ((i / axis_stride) % axis_dim) as f64);
                slots[*dst] = Some(materialize(vals.collect(), ttype)?);
            }
            Instr::Unary { op, src, dst } => {
                let vals: Vec<f64> = slot(&slots, *src)?
                    .to_f64_vec()
                    .into_iter()
                    .map(|v| eval_unary(*op, v))
                    .collect();
                slots[*dst] = Some(materialize(vals, &program.slot_types[*dst])?);
            }
            Instr::Binary { op, lhs, rhs, dst } => {
                let ttype = &program.slot_types[*dst];
                let l = read_broadcast(slot(&slots, *lhs)?, &ttype.shape);
                let r = read_broadcast(slot(&slots, *rhs)?, &ttype.shape);
                let vals: Vec<f64> = l
                    .into_iter()
                    .zip(r)
                    .map(|(a, b)| eval_binary(*op, a, b))
                    .collect();
                slots[*dst] = Some(materialize(vals, ttype)?);
            }
            Instr::Cmp { op, lhs, rhs, dst } => {
                let ttype = &program.slot_types[*dst];
                let l = read_broadcast(slot(&slots, *lhs)?, &ttype.shape);
                let r = read_broadcast(slot(&slots, *rhs)?, &ttype.shape);
                let bits: Vec<u8> = l
                    .into_iter()
                    .zip(r)
                    .map(|(a, b)| eval_cmp(*op, a, b) as u8)
                    .collect();
                slots[*dst] = Some(Buffer::new(BufferData::Bool(bits), ttype.shape.clone())?);
            }
            Instr::Select {
                cond,
                on_true,
                on_false,
                dst,
            } => {
                let ttype = &program.slot_types[*dst];
                let c = read_broadcast(slot(&slots, *cond)?, &ttype.shape);
                let t = read_broadcast(slot(&slots, *on_true)?, &ttype.shape);
                let f = read_broadcast(slot(&slots, *on_false)?, &ttype.shape);
                let vals: Vec<f64> = c
                    .into_iter()
                    .zip(t.into_iter().zip(f))
                    .map(|(c, (t, f))| if c != 0.0 { t } else { f })
                    .collect();
                slots[*dst] = Some(materialize(vals, ttype)?);
            }
            Instr::Reshape { src, dst } => {
                let ttype = &program.slot_types[*dst];
                slots[*dst] = Some(slot(&slots, *src)?.reshaped(ttype.shape.clone())?);
            }
            Instr::Broadcast { src, dst } => {
                let ttype = &program.slot_types[*dst];
                let vals = read_broadcast(slot(&slots, *src)?, &ttype.shape);
                slots[*dst] = Some(materialize(vals, ttype)?);
            }
            Instr::Reduce { op, src, axes, dst } => {
                let ttype = &program.slot_types[*dst];
                let buf = slot(&slots, *src)?;
                let vals = eval_reduce(*op, buf, axes, &ttype.shape);
                slots[*dst] = Some(materialize(vals, ttype)?);
            }
            Instr::OneHot { src, depth, dst } => {
                let ttype = &program.slot_types[*dst];
                let src_vals = slot(&slots, *src)?.to_f64_vec();
                let mut vals = vec![0.0; src_vals.len() * depth];
                for (i, v) in src_vals.iter().enumerate() {
                    let class = *v as i64;
                    // Out-of-range classes yield an all-zero row.
                    if class >= 0 && (class as usize) < *depth {
                        vals[i * depth + class as usize] = 1.0;
                    }
                }
                slots[*dst] = Some(materialize(vals, ttype)?);
            }
            Instr::Convert { src, dst } => {
                let ttype = &program.slot_types[*dst];
                let vals = slot(&slots, *src)?.to_f64_vec();
                slots[*dst] = Some(materialize(vals, ttype)?);
            }
            Instr::Clamp { src, min, max, dst } => {
                let vals: Vec<f64> = slot(&slots, *src)?
                    .to_f64_vec()
                    .into_iter()
                    .map(|v| v.clamp(*min, *max))
                    .collect();
                slots[*dst] = Some(materialize(vals, &program.slot_types[*dst])?);
            }
            Instr::Affine { src, mul, add, dst } => {
                let vals: Vec<f64> = slot(&slots, *src)?
                    .to_f64_vec()
                    .into_iter()
                    .map(|v| v * mul + add)
                    .collect();
                slots[*dst] = Some(materialize(vals, &program.slot_types[*dst])?);
            }
            Instr::Copy { src, dst } => {
                slots[*dst] = Some(slot(&slots, *src)?.clone());
            }
            Instr::Free { slot } => {
                // Caller-owned inputs are released only when donated.
                match program.param_slots.iter().position(|s| s == slot) {
                    Some(pi) if donate.get(pi).copied().unwrap_or(false) => {
                        slots[*slot] = None;
                    }
                    Some(_) => {}
                    None => slots[*slot] = None,
                }
            }
            Instr::Tuple { srcs } => {
                let mut out = Vec::with_capacity(srcs.len());
                for &s in srcs {
                    out.push(slot(&slots, s)?.clone());
                }
                outputs = Some(out);
            }
        }
    }

    outputs.ok_or_else(|| Error::msg("program ended without producing outputs"))
}

fn slot<'a>(slots: &'a [Option<Buffer>], idx: usize) -> Result<&'a Buffer> {
    slots[idx]
        .as_ref()
        .ok_or_else(|| Error::msg(format!("slot {} read after release", idx)))
}

/// Narrow f64 values into a buffer of the slot's type.
fn materialize(vals: Vec<f64>, ttype: &TensorType) -> Result<Buffer> {
    Buffer::new(
        data_from_f64(vals.into_iter(), ttype.dtype),
        ttype.shape.clone(),
    )
}

/// Read a buffer's values expanded to `target` under broadcasting rules.
fn read_broadcast(buf: &Buffer, target: &Shape) -> Vec<f64> {
    let vals = buf.to_f64_vec();
    if buf.shape() == target {
        return vals;
    }
    let bstrides = buf.shape().broadcast_strides(target);
    let tstrides = target.stride_contiguous();
    let tdims = target.dims();
    (0..target.elem_count())
        .map(|flat| {
            let mut off = 0;
            for d in 0..tdims.len() {
                let coord = (flat / tstrides[d]) % tdims[d];
                off += coord * bstrides[d];
            }
            vals[off]
        })
        .collect()
}

fn eval_unary(op: UnaryOp, v: f64) -> f64 {
    match op {
        UnaryOp::Neg => -v,
        UnaryOp::Abs => v.abs(),
        UnaryOp::Exp => v.exp(),
        UnaryOp::Log => v.ln(),
        UnaryOp::Log1p => v.ln_1p(),
        UnaryOp::Sigmoid => 1.0 / (1.0 + (-v).exp()),
    }
}

fn eval_binary(op: BinaryOp, a: f64, b: f64) -> f64 {
    match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::Pow => a.powf(b),
        BinaryOp::Min => a.min(b),
        BinaryOp::Max => a.max(b),
    }
}

fn eval_cmp(op: CmpOp, a: f64, b: f64) -> bool {
    match op {
        CmpOp::Eq => a == b,
        CmpOp::Ne => a != b,
        CmpOp::Gt => a > b,
        CmpOp::Ge => a >= b,
        CmpOp::Lt => a < b,
        CmpOp::Le => a <= b,
    }
}

fn eval_reduce(op: ReduceOp, src: &Buffer, axes: &[usize], out_shape: &Shape) -> Vec<f64> {
    let vals = src.to_f64_vec();
    let sdims = src.dims();
    let sstrides = src.shape().stride_contiguous();
    let reduce_all = axes.is_empty();

    let init = match op {
        ReduceOp::Sum => 0.0,
        ReduceOp::Max => f64::NEG_INFINITY,
    };
    let mut acc = vec![init; out_shape.elem_count().max(1)];

    // Output strides over the kept axes of the source, in source axis order.
    // Keep-dims and squeezed outputs share the same flat layout.
    let kept: Vec<usize> = (0..sdims.len())
        .filter(|d| !reduce_all && !axes.contains(d))
        .collect();
    let mut kept_strides = vec![0usize; sdims.len()];
    {
        let mut stride = 1usize;
        for &d in kept.iter().rev() {
            kept_strides[d] = stride;
            stride *= sdims[d];
        }
    }

    for (flat, v) in vals.iter().enumerate() {
        let mut out_idx = 0;
        for d in 0..sdims.len() {
            let coord = (flat / sstrides[d]) % sdims[d];
            out_idx += coord * kept_strides[d];
        }
        match op {
            ReduceOp::Sum => acc[out_idx] += v,
            ReduceOp::Max => {
                if *v > acc[out_idx] {
                    acc[out_idx] = *v
                }
            }
        }
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::lower;
    use std::sync::Arc;
    use vole_core::{DType, Graph};

    fn run(graph: &Graph, outputs: &[vole_core::Node], inputs: Vec<Buffer>) -> Vec<Buffer> {
        let rt = Arc::new(Interp::new());
        let program = lower(graph, outputs).unwrap();
        let id = rt.load(program, &CompileOptions::quiet()).unwrap();
        let out = rt.execute(id, inputs, &[]).unwrap();
        rt.destroy(id).unwrap();
        out
    }

    #[test]
    fn test_add_broadcast() {
        let g = Graph::new("f");
        let a = g.parameter("a", (2, 3), DType::F64);
        let b = g.parameter("b", 3, DType::F64);
        let c = a.add(&b).unwrap();
        let out = run(
            &g,
            &[c],
            vec![
                Buffer::from_slice(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], (2, 3)).unwrap(),
                Buffer::from_slice(&[10.0, 20.0, 30.0], 3).unwrap(),
            ],
        );
        assert_eq!(out[0].to_f64_vec(), vec![11.0, 22.0, 33.0, 14.0, 25.0, 36.0]);
    }

    #[test]
    fn test_reduce_axes() {
        let g = Graph::new("f");
        let a = g.parameter("a", (2, 3), DType::F64);
        let rows = a.sum(&[1], false).unwrap();
        let total = a.sum_all().unwrap();
        let m = a.reduce_max(&[0], true).unwrap();
        let out = run(
            &g,
            &[rows, total, m],
            vec![Buffer::from_slice(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], (2, 3)).unwrap()],
        );
        assert_eq!(out[0].to_f64_vec(), vec![6.0, 15.0]);
        assert_eq!(out[1].to_f64_vec(), vec![21.0]);
        assert_eq!(out[2].to_f64_vec(), vec![4.0, 5.0, 6.0]);
        assert_eq!(out[2].dims(), &[1, 3]);
    }

    #[test]
    fn test_select_and_cmp() {
        let g = Graph::new("f");
        let a = g.parameter("a", 4, DType::F64);
        let zero = g.scalar(DType::F64, 0.0);
        let relu = a.greater(&zero).unwrap().where_cond(&a, &a.zeros_like().unwrap()).unwrap();
        let out = run(
            &g,
            &[relu],
            vec![Buffer::from_slice(&[-1.0, 2.0, -3.0, 4.0], 4).unwrap()],
        );
        assert_eq!(out[0].to_f64_vec(), vec![0.0, 2.0, 0.0, 4.0]);
    }

    #[test]
    fn test_one_hot() {
        let g = Graph::new("f");
        let a = g.parameter("a", 3, DType::I64);
        let h = a.one_hot(3, DType::F64).unwrap();
        let out = run(
            &g,
            &[h],
            vec![Buffer::from_slice(&[0i64, 2, 1], 3).unwrap()],
        );
        assert_eq!(
            out[0].to_f64_vec(),
            vec![1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 1.0, 0.0]
        );
    }

    #[test]
    fn test_iota() {
        let g = Graph::new("f");
        let x = g.iota((2, 3), DType::F64, 1).unwrap();
        let out = run(&g, &[x], vec![]);
        assert_eq!(out[0].to_f64_vec(), vec![0.0, 1.0, 2.0, 0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_log_softmax_sums_to_one() {
        let g = Graph::new("f");
        let x = g.parameter("x", (1, 3), DType::F64);
        let p = x.log_softmax(1).unwrap().exp().unwrap().sum(&[1], false).unwrap();
        let out = run(
            &g,
            &[p],
            vec![Buffer::from_slice(&[100.0, 101.0, 102.0], (1, 3)).unwrap()],
        );
        assert!((out[0].to_f64_vec()[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_f32_narrowing_between_ops() {
        let g = Graph::new("f");
        let a = g.parameter("a", 1, DType::F32);
        let b = a.add(&a).unwrap();
        let out = run(
            &g,
            &[b],
            vec![Buffer::from_slice(&[0.1f32], 1).unwrap()],
        );
        assert_eq!(out[0].dtype(), DType::F32);
        assert!((out[0].to_f64_vec()[0] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_destroy_twice_errors() {
        let g = Graph::new("f");
        let a = g.parameter("a", 1, DType::F64);
        let rt = Interp::new();
        let id = rt
            .load(lower(&g, &[a]).unwrap(), &CompileOptions::quiet())
            .unwrap();
        rt.destroy(id).unwrap();
        assert!(matches!(rt.destroy(id), Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_shutdown_rejects_load_and_execute() {
        let g = Graph::new("f");
        let a = g.parameter("a", 1, DType::F64);
        let rt = Interp::new();
        let id = rt
            .load(lower(&g, &[a.clone()]).unwrap(), &CompileOptions::quiet())
            .unwrap();
        rt.shutdown();
        assert!(!rt.is_valid());
        assert!(rt
            .execute(id, vec![Buffer::from_slice(&[1.0], 1).unwrap()], &[])
            .is_err());
        assert!(rt
            .load(lower(&g, &[a]).unwrap(), &CompileOptions::quiet())
            .is_err());
    }

    #[test]
    fn test_input_type_checked() {
        let g = Graph::new("f");
        let a = g.parameter("a", 2, DType::F64);
        let rt = Interp::new();
        let id = rt
            .load(lower(&g, &[a]).unwrap(), &CompileOptions::quiet())
            .unwrap();
        let wrong_dtype = Buffer::from_slice(&[1.0f32, 2.0], 2).unwrap();
        assert!(matches!(
            rt.execute(id, vec![wrong_dtype], &[]),
            Err(Error::DTypeMismatch { .. })
        ));
        let wrong_shape = Buffer::from_slice(&[1.0f64, 2.0, 3.0], 3).unwrap();
        assert!(rt.execute(id, vec![wrong_shape], &[]).is_err());
        assert!(matches!(
            rt.execute(id, vec![], &[]),
            Err(Error::Arity { .. })
        ));
    }
}
