use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Instant;

use vole_core::{
    BinaryOp, Buffer, CmpOp, Error, Graph, Node, NodeId, Op, ReduceOp, Result, TensorType, UnaryOp,
};

// Lowering — Graph → flat execution program
//
// The backend intermediate representation is a slot-based instruction tape:
// every reachable node gets one buffer slot, instructions reference slots by
// index, and a liveness pass inserts Free instructions after each value's
// last use so dead intermediates (and donated inputs) are released early.
//
// Multiple outputs are combined by a final Tuple instruction; the runtime
// un-tuples them back into an ordered buffer list at execution time.

/// A single operation in the lowered program.
#[derive(Debug, Clone)]
pub enum Instr {
    /// Load the caller-provided input for parameter `index`.
    LoadParam { index: usize, dst: usize },
    /// Materialize an embedded literal.
    Constant { value: Buffer, dst: usize },
    /// Index values along `axis` of the destination shape.
    Iota { axis: usize, dst: usize },
    Unary {
        op: UnaryOp,
        src: usize,
        dst: usize,
    },
    Binary {
        op: BinaryOp,
        lhs: usize,
        rhs: usize,
        dst: usize,
    },
    Cmp {
        op: CmpOp,
        lhs: usize,
        rhs: usize,
        dst: usize,
    },
    Select {
        cond: usize,
        on_true: usize,
        on_false: usize,
        dst: usize,
    },
    Reshape { src: usize, dst: usize },
    Broadcast { src: usize, dst: usize },
    Reduce {
        op: ReduceOp,
        src: usize,
        axes: Vec<usize>,
        dst: usize,
    },
    OneHot {
        src: usize,
        depth: usize,
        dst: usize,
    },
    Convert { src: usize, dst: usize },
    Clamp {
        src: usize,
        min: f64,
        max: f64,
        dst: usize,
    },
    Affine {
        src: usize,
        mul: f64,
        add: f64,
        dst: usize,
    },
    /// Identity (stop-gradient lowers to this; the tape has no gradients).
    Copy { src: usize, dst: usize },
    /// Release a slot after its last use. For parameter slots the runtime
    /// honors this only when the input was donated.
    Free { slot: usize },
    /// Gather the program outputs, in declaration order.
    Tuple { srcs: Vec<usize> },
}

/// Statistics from lowering, logged by runtimes unless compiled quietly.
#[derive(Debug, Clone)]
pub struct CompileStats {
    pub num_instructions: usize,
    pub num_source_nodes: usize,
    pub num_slots: usize,
    pub num_frees: usize,
    pub lower_time_us: u64,
}

impl fmt::Display for CompileStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} instructions ({} source nodes), {} slots, {} frees, lowered in {}μs",
            self.num_instructions,
            self.num_source_nodes,
            self.num_slots,
            self.num_frees,
            self.lower_time_us,
        )
    }
}

/// A lowered program: the backend IR handed to a [`crate::Runtime`].
#[derive(Debug, Clone)]
pub struct Program {
    /// Computation name, from the source graph.
    pub name: String,
    /// Flat instruction tape, executed sequentially.
    pub instrs: Vec<Instr>,
    /// Type of the value in each slot.
    pub slot_types: Vec<TensorType>,
    /// Expected input types, by parameter index.
    pub param_types: Vec<TensorType>,
    /// Slot holding each parameter, by parameter index.
    pub param_slots: Vec<usize>,
    /// Output types, in the order given to `lower`.
    pub output_types: Vec<TensorType>,
    pub stats: CompileStats,
}

/// Lower `outputs` (all from `graph`) into a flat program.
///
/// Only nodes reachable from the outputs are materialized, except that every
/// declared parameter is always loaded: the parameter list fixes the
/// executable's input arity whether or not an output consumes it.
pub fn lower(graph: &Graph, outputs: &[Node]) -> Result<Program> {
    let start = Instant::now();
    if outputs.is_empty() {
        return Err(Error::Configuration(
            "a computation needs at least one output".to_string(),
        ));
    }
    for out in outputs {
        if !graph.same_graph(out.graph()) {
            return Err(Error::Configuration(
                "output node belongs to a different build context".to_string(),
            ));
        }
    }

    let num_nodes = graph.num_nodes();
    let params = graph.params();

    // Reachability from the outputs, plus every parameter node.
    let mut reachable: HashSet<usize> = HashSet::new();
    let mut stack: Vec<usize> = outputs.iter().map(|n| n.id().0).collect();
    for id in 0..num_nodes {
        if matches!(graph.op(NodeId(id)), Op::Param { .. }) {
            stack.push(id);
        }
    }
    while let Some(id) = stack.pop() {
        if !reachable.insert(id) {
            continue;
        }
        for dep in op_inputs(&graph.op(NodeId(id))) {
            stack.push(dep.0);
        }
    }

    // Ascending id order is a topological order by construction.
    let mut order: Vec<usize> = reachable.iter().copied().collect();
    order.sort_unstable();

    // Dense slot assignment.
    let mut node_to_slot: HashMap<usize, usize> = HashMap::new();
    let mut slot_types: Vec<TensorType> = Vec::with_capacity(order.len());
    for &id in &order {
        node_to_slot.insert(id, slot_types.len());
        slot_types.push(graph.ttype(NodeId(id)));
    }

    let mut param_slots = vec![usize::MAX; params.len()];

    // Instruction tape plus production/consumption tracking for liveness.
    let mut instrs: Vec<Instr> = Vec::with_capacity(order.len() + 1);
    let mut last_used_at: HashMap<usize, usize> = HashMap::new();
    for &id in &order {
        let op = graph.op(NodeId(id));
        let dst = node_to_slot[&id];
        let instr_idx = instrs.len();
        for dep in op_inputs(&op) {
            last_used_at.insert(node_to_slot[&dep.0], instr_idx);
        }
        instrs.push(lower_op(op, dst, &node_to_slot, &mut param_slots));
    }

    // Outputs are consumed by the final Tuple.
    let output_slots: Vec<usize> = outputs.iter().map(|n| node_to_slot[&n.id().0]).collect();
    let tuple_idx = instrs.len();
    for &slot in &output_slots {
        last_used_at.insert(slot, tuple_idx);
    }
    instrs.push(Instr::Tuple {
        srcs: output_slots.clone(),
    });

    // Insert frees after each non-output value's last use. Latest positions
    // first so earlier insertion points stay valid.
    let output_set: HashSet<usize> = output_slots.iter().copied().collect();
    let mut free_points: Vec<(usize, usize)> = last_used_at
        .iter()
        .filter(|(slot, _)| !output_set.contains(slot))
        .map(|(&slot, &at)| (slot, at))
        .collect();
    // Values never consumed (unused parameters) are freed right after load.
    for (idx, &slot) in param_slots.iter().enumerate() {
        if slot == usize::MAX {
            return Err(Error::Configuration(format!(
                "parameter {} was declared but never interned",
                idx
            )));
        }
        if !last_used_at.contains_key(&slot) && !output_set.contains(&slot) {
            // The load instruction for this slot is its own last use.
            let at = instrs
                .iter()
                .position(|i| matches!(i, Instr::LoadParam { dst, .. } if *dst == slot))
                .unwrap_or(0);
            free_points.push((slot, at));
        }
    }
    free_points.sort_by(|a, b| b.1.cmp(&a.1));
    let num_frees = free_points.len();
    for (slot, after_idx) in free_points {
        let insert_pos = (after_idx + 1).min(instrs.len());
        instrs.insert(insert_pos, Instr::Free { slot });
    }

    let stats = CompileStats {
        num_instructions: instrs.len(),
        num_source_nodes: num_nodes,
        num_slots: slot_types.len(),
        num_frees,
        lower_time_us: start.elapsed().as_micros() as u64,
    };

    Ok(Program {
        name: graph.name(),
        instrs,
        slot_types,
        param_types: params.into_iter().map(|p| p.ttype).collect(),
        param_slots,
        output_types: outputs.iter().map(|n| n.ttype()).collect(),
        stats,
    })
}

/// The node ids an op reads.
fn op_inputs(op: &Op) -> Vec<NodeId> {
    match op {
        Op::Param { .. } | Op::Constant(_) | Op::Iota { .. } => Vec::new(),
        Op::Unary(_, a) => vec![*a],
        Op::Binary(_, a, b) | Op::Cmp(_, a, b) => vec![*a, *b],
        Op::Select {
            cond,
            on_true,
            on_false,
        } => vec![*cond, *on_true, *on_false],
        Op::Reshape(a)
        | Op::Broadcast(a)
        | Op::Convert(a)
        | Op::StopGradient(a) => vec![*a],
        Op::Reduce { src, .. }
        | Op::OneHot { src, .. }
        | Op::Clamp { src, .. }
        | Op::Affine { src, .. } => vec![*src],
    }
}

fn lower_op(
    op: Op,
    dst: usize,
    slots: &HashMap<usize, usize>,
    param_slots: &mut [usize],
) -> Instr {
    let s = |id: NodeId| slots[&id.0];
    match op {
        Op::Param { index } => {
            param_slots[index] = dst;
            Instr::LoadParam { index, dst }
        }
        Op::Constant(value) => Instr::Constant { value, dst },
        Op::Iota { axis } => Instr::Iota { axis, dst },
        Op::Unary(op, a) => Instr::Unary { op, src: s(a), dst },
        Op::Binary(op, a, b) => Instr::Binary {
            op,
            lhs: s(a),
            rhs: s(b),
            dst,
        },
        Op::Cmp(op, a, b) => Instr::Cmp {
            op,
            lhs: s(a),
            rhs: s(b),
            dst,
        },
        Op::Select {
            cond,
            on_true,
            on_false,
        } => Instr::Select {
            cond: s(cond),
            on_true: s(on_true),
            on_false: s(on_false),
            dst,
        },
        Op::Reshape(a) => Instr::Reshape { src: s(a), dst },
        Op::Broadcast(a) => Instr::Broadcast { src: s(a), dst },
        Op::Reduce { op, src, axes, .. } => Instr::Reduce {
            op,
            src: s(src),
            axes,
            dst,
        },
        Op::OneHot { src, depth } => Instr::OneHot {
            src: s(src),
            depth,
            dst,
        },
        Op::Convert(a) => Instr::Convert { src: s(a), dst },
        Op::Clamp { src, min, max } => Instr::Clamp {
            src: s(src),
            min,
            max,
            dst,
        },
        Op::Affine { src, mul, add } => Instr::Affine {
            src: s(src),
            mul,
            add,
            dst,
        },
        Op::StopGradient(a) => Instr::Copy { src: s(a), dst },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vole_core::DType;

    #[test]
    fn test_lower_empty_outputs() {
        let g = Graph::new("f");
        assert!(matches!(
            lower(&g, &[]),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_lower_add() {
        let g = Graph::new("add");
        let a = g.parameter("a", 3, DType::F64);
        let b = g.parameter("b", 3, DType::F64);
        let c = a.add(&b).unwrap();
        let p = lower(&g, &[c]).unwrap();
        assert_eq!(p.name, "add");
        assert_eq!(p.param_types.len(), 2);
        assert_eq!(p.output_types, vec![TensorType::new(3, DType::F64)]);
        assert!(matches!(p.instrs.last(), Some(Instr::Tuple { srcs }) if srcs.len() == 1));
    }

    #[test]
    fn test_unused_parameter_still_loaded() {
        let g = Graph::new("f");
        let a = g.parameter("a", 3, DType::F64);
        let _unused = g.parameter("b", 3, DType::F64);
        let out = a.abs().unwrap();
        let p = lower(&g, &[out]).unwrap();
        assert_eq!(p.param_types.len(), 2);
        let loads = p
            .instrs
            .iter()
            .filter(|i| matches!(i, Instr::LoadParam { .. }))
            .count();
        assert_eq!(loads, 2);
    }

    #[test]
    fn test_dead_intermediates_freed() {
        let g = Graph::new("f");
        let a = g.parameter("a", 3, DType::F64);
        let t = a.abs().unwrap();
        let out = t.neg().unwrap();
        let p = lower(&g, &[out]).unwrap();
        // `a` and `t` both die before the tuple.
        assert!(p.stats.num_frees >= 2);
    }

    #[test]
    fn test_unreachable_nodes_skipped() {
        let g = Graph::new("f");
        let a = g.parameter("a", 3, DType::F64);
        let _dead = a.exp().unwrap();
        let out = a.neg().unwrap();
        let p = lower(&g, &[out]).unwrap();
        assert!(p.stats.num_slots < g.num_nodes());
    }
}
