use std::fmt;
use std::sync::{Arc, RwLock};

use crate::buffer::Buffer;
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::shape::{Shape, TensorType};

// Graph — one computation build context
//
// A Graph interns nodes as they are constructed; a Node is a cheap handle
// (graph reference + id) whose operators append new nodes and infer the
// result type eagerly. Ops only ever reference earlier ids, so ascending id
// order is already a topological order — the lowering relies on this.
//
// Validation failures are ordinary errors, never panics: a bad shape or
// dtype surfaces at the operator call that caused it.

/// Identifies a node within its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub usize);

/// Element-wise unary operations. All require a float operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Abs,
    Exp,
    Log,
    Log1p,
    Sigmoid,
}

/// Element-wise binary operations (with broadcasting).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Min,
    Max,
}

/// Element-wise comparisons; result dtype is Bool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

/// Reductions along a set of axes (empty = all axes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Max,
}

/// The operation recorded for each node.
#[derive(Debug, Clone)]
pub enum Op {
    /// Declared parameter; `index` is its position in the parameter list.
    Param { index: usize },
    /// Embedded literal value.
    Constant(Buffer),
    /// Index values along `axis`, counting from 0.
    Iota { axis: usize },
    Unary(UnaryOp, NodeId),
    Binary(BinaryOp, NodeId, NodeId),
    Cmp(CmpOp, NodeId, NodeId),
    /// Conditional select: cond ? on_true : on_false, element-wise.
    Select {
        cond: NodeId,
        on_true: NodeId,
        on_false: NodeId,
    },
    Reshape(NodeId),
    Broadcast(NodeId),
    Reduce {
        op: ReduceOp,
        src: NodeId,
        axes: Vec<usize>,
        keep: bool,
    },
    /// Expand integer values into a trailing one-hot class axis.
    OneHot { src: NodeId, depth: usize },
    /// Dtype cast.
    Convert(NodeId),
    /// Clamp into [min, max] (scalar bounds, fixed at build time).
    Clamp { src: NodeId, min: f64, max: f64 },
    /// Fused scalar transform: x * mul + add.
    Affine { src: NodeId, mul: f64, add: f64 },
    /// Identity for the forward value; blocks gradient flow in consumers
    /// that differentiate through the graph.
    StopGradient(NodeId),
}

/// A declared parameter: name and type, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: String,
    pub ttype: TensorType,
}

#[derive(Debug)]
struct NodeData {
    op: Op,
    ttype: TensorType,
}

#[derive(Debug)]
struct GraphInner {
    name: String,
    nodes: Vec<NodeData>,
    params: Vec<ParamSpec>,
}

/// One computation build context. Cloning shares the context.
#[derive(Clone, Debug)]
pub struct Graph(Arc<RwLock<GraphInner>>);

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Graph(Arc::new(RwLock::new(GraphInner {
            name: name.into(),
            nodes: Vec::new(),
            params: Vec::new(),
        })))
    }

    /// The computation name given at construction.
    pub fn name(&self) -> String {
        self.0.read().expect("graph lock poisoned").name.clone()
    }

    /// Whether two graph handles refer to the same build context.
    pub fn same_graph(&self, other: &Graph) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Number of nodes interned so far.
    pub fn num_nodes(&self) -> usize {
        self.0.read().expect("graph lock poisoned").nodes.len()
    }

    /// The declared parameters, in declaration order.
    pub fn params(&self) -> Vec<ParamSpec> {
        self.0.read().expect("graph lock poisoned").params.clone()
    }

    /// The operation recorded for `id`.
    pub fn op(&self, id: NodeId) -> Op {
        self.0.read().expect("graph lock poisoned").nodes[id.0].op.clone()
    }

    /// The inferred type of `id`.
    pub fn ttype(&self, id: NodeId) -> TensorType {
        self.0.read().expect("graph lock poisoned").nodes[id.0]
            .ttype
            .clone()
    }

    fn push(&self, op: Op, ttype: TensorType) -> Node {
        let mut inner = self.0.write().expect("graph lock poisoned");
        let id = NodeId(inner.nodes.len());
        inner.nodes.push(NodeData { op, ttype });
        Node {
            graph: self.clone(),
            id,
        }
    }

    /// Declare a named parameter. Parameter order is the order of these
    /// calls and fixes the input order of the compiled executable.
    pub fn parameter(
        &self,
        name: impl Into<String>,
        shape: impl Into<Shape>,
        dtype: DType,
    ) -> Node {
        let ttype = TensorType::new(shape, dtype);
        let index = {
            let mut inner = self.0.write().expect("graph lock poisoned");
            inner.params.push(ParamSpec {
                name: name.into(),
                ttype: ttype.clone(),
            });
            inner.params.len() - 1
        };
        self.push(Op::Param { index }, ttype)
    }

    /// Embed a literal buffer as a constant node.
    pub fn constant(&self, value: Buffer) -> Node {
        let ttype = value.ttype().clone();
        self.push(Op::Constant(value), ttype)
    }

    /// A rank-0 constant.
    pub fn scalar(&self, dtype: DType, value: f64) -> Node {
        self.constant(Buffer::scalar(value, dtype))
    }

    /// Index values along `axis` of `shape`, as `dtype`.
    pub fn iota(&self, shape: impl Into<Shape>, dtype: DType, axis: usize) -> Result<Node> {
        let shape = shape.into();
        if axis >= shape.rank() {
            return Err(Error::Configuration(format!(
                "iota axis {} out of range for shape {}",
                axis, shape
            )));
        }
        Ok(self.push(Op::Iota { axis }, TensorType::new(shape, dtype)))
    }
}

/// A symbolic value in a [`Graph`]. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Node {
    graph: Graph,
    id: NodeId,
}

impl Node {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn ttype(&self) -> TensorType {
        self.graph.ttype(self.id)
    }

    pub fn shape(&self) -> Shape {
        self.ttype().shape
    }

    pub fn dims(&self) -> Vec<usize> {
        self.shape().dims().to_vec()
    }

    pub fn rank(&self) -> usize {
        self.shape().rank()
    }

    pub fn dtype(&self) -> DType {
        self.ttype().dtype
    }

    fn check_same_graph(&self, other: &Node) -> Result<()> {
        if !self.graph.same_graph(&other.graph) {
            return Err(Error::Configuration(
                "nodes belong to different build contexts".to_string(),
            ));
        }
        Ok(())
    }

    fn require_float(&self, what: &str) -> Result<()> {
        if !self.dtype().is_float() {
            return Err(Error::Configuration(format!(
                "{} requires a float operand, got {}",
                what,
                self.dtype()
            )));
        }
        Ok(())
    }

    //  Unary ops

    fn unary(&self, op: UnaryOp, what: &str) -> Result<Node> {
        self.require_float(what)?;
        Ok(self.graph.push(Op::Unary(op, self.id), self.ttype()))
    }

    pub fn neg(&self) -> Result<Node> {
        self.unary(UnaryOp::Neg, "neg")
    }

    pub fn abs(&self) -> Result<Node> {
        self.unary(UnaryOp::Abs, "abs")
    }

    pub fn exp(&self) -> Result<Node> {
        self.unary(UnaryOp::Exp, "exp")
    }

    pub fn log(&self) -> Result<Node> {
        self.unary(UnaryOp::Log, "log")
    }

    /// log(1 + x), accurate for small x.
    pub fn log1p(&self) -> Result<Node> {
        self.unary(UnaryOp::Log1p, "log1p")
    }

    pub fn sigmoid(&self) -> Result<Node> {
        self.unary(UnaryOp::Sigmoid, "sigmoid")
    }

    //  Binary ops

    fn binary(&self, op: BinaryOp, rhs: &Node) -> Result<Node> {
        self.check_same_graph(rhs)?;
        let (lt, rt) = (self.ttype(), rhs.ttype());
        if lt.dtype != rt.dtype {
            return Err(Error::DTypeMismatch {
                expected: lt.dtype,
                got: rt.dtype,
            });
        }
        if lt.dtype == DType::Bool {
            return Err(Error::Configuration(
                "arithmetic on bool tensors is not defined; convert first".to_string(),
            ));
        }
        let shape = Shape::broadcast_shape(&lt.shape, &rt.shape)?;
        Ok(self.graph.push(
            Op::Binary(op, self.id, rhs.id),
            TensorType::new(shape, lt.dtype),
        ))
    }

    pub fn add(&self, rhs: &Node) -> Result<Node> {
        self.binary(BinaryOp::Add, rhs)
    }

    pub fn sub(&self, rhs: &Node) -> Result<Node> {
        self.binary(BinaryOp::Sub, rhs)
    }

    pub fn mul(&self, rhs: &Node) -> Result<Node> {
        self.binary(BinaryOp::Mul, rhs)
    }

    pub fn div(&self, rhs: &Node) -> Result<Node> {
        self.binary(BinaryOp::Div, rhs)
    }

    /// Element-wise power: self ^ rhs.
    pub fn pow(&self, rhs: &Node) -> Result<Node> {
        self.binary(BinaryOp::Pow, rhs)
    }

    pub fn minimum(&self, rhs: &Node) -> Result<Node> {
        self.binary(BinaryOp::Min, rhs)
    }

    pub fn maximum(&self, rhs: &Node) -> Result<Node> {
        self.binary(BinaryOp::Max, rhs)
    }

    //  Comparisons

    fn cmp(&self, op: CmpOp, rhs: &Node) -> Result<Node> {
        self.check_same_graph(rhs)?;
        let (lt, rt) = (self.ttype(), rhs.ttype());
        if lt.dtype != rt.dtype {
            return Err(Error::DTypeMismatch {
                expected: lt.dtype,
                got: rt.dtype,
            });
        }
        let shape = Shape::broadcast_shape(&lt.shape, &rt.shape)?;
        Ok(self.graph.push(
            Op::Cmp(op, self.id, rhs.id),
            TensorType::new(shape, DType::Bool),
        ))
    }

    pub fn eq(&self, rhs: &Node) -> Result<Node> {
        self.cmp(CmpOp::Eq, rhs)
    }

    pub fn ne(&self, rhs: &Node) -> Result<Node> {
        self.cmp(CmpOp::Ne, rhs)
    }

    pub fn greater(&self, rhs: &Node) -> Result<Node> {
        self.cmp(CmpOp::Gt, rhs)
    }

    pub fn greater_equal(&self, rhs: &Node) -> Result<Node> {
        self.cmp(CmpOp::Ge, rhs)
    }

    pub fn less(&self, rhs: &Node) -> Result<Node> {
        self.cmp(CmpOp::Lt, rhs)
    }

    pub fn less_equal(&self, rhs: &Node) -> Result<Node> {
        self.cmp(CmpOp::Le, rhs)
    }

    //  Conditional select

    /// Element-wise select with `self` as the condition (dtype Bool):
    /// where self is true take `on_true`, elsewhere `on_false`.
    pub fn where_cond(&self, on_true: &Node, on_false: &Node) -> Result<Node> {
        self.check_same_graph(on_true)?;
        self.check_same_graph(on_false)?;
        if self.dtype() != DType::Bool {
            return Err(Error::DTypeMismatch {
                expected: DType::Bool,
                got: self.dtype(),
            });
        }
        let (tt, ft) = (on_true.ttype(), on_false.ttype());
        if tt.dtype != ft.dtype {
            return Err(Error::DTypeMismatch {
                expected: tt.dtype,
                got: ft.dtype,
            });
        }
        let branches = Shape::broadcast_shape(&tt.shape, &ft.shape)?;
        let shape = Shape::broadcast_shape(&self.shape(), &branches)?;
        Ok(self.graph.push(
            Op::Select {
                cond: self.id,
                on_true: on_true.id,
                on_false: on_false.id,
            },
            TensorType::new(shape, tt.dtype),
        ))
    }

    //  Shape ops

    /// Reinterpret as `shape`; element counts must match.
    pub fn reshape(&self, shape: impl Into<Shape>) -> Result<Node> {
        let shape = shape.into();
        let own = self.shape();
        if shape.elem_count() != own.elem_count() {
            return Err(Error::ShapeMismatch {
                expected: own,
                got: shape,
            });
        }
        Ok(self
            .graph
            .push(Op::Reshape(self.id), self.ttype().with_shape(shape)))
    }

    /// Broadcast to `shape` following the right-aligned rules.
    pub fn broadcast_to(&self, shape: impl Into<Shape>) -> Result<Node> {
        let shape = shape.into();
        let own = self.shape();
        if !own.broadcasts_to(&shape) {
            return Err(Error::ShapeMismatch {
                expected: shape,
                got: own,
            });
        }
        Ok(self
            .graph
            .push(Op::Broadcast(self.id), self.ttype().with_shape(shape)))
    }

    //  Reductions

    fn reduce(&self, op: ReduceOp, axes: &[usize], keep: bool) -> Result<Node> {
        let own = self.shape();
        for &a in axes {
            if a >= own.rank() {
                return Err(Error::Configuration(format!(
                    "reduce axis {} out of range for shape {}",
                    a, own
                )));
            }
        }
        let dims: Vec<usize> = if axes.is_empty() {
            // Empty axis list reduces everything.
            if keep {
                vec![1; own.rank()]
            } else {
                Vec::new()
            }
        } else {
            own.dims()
                .iter()
                .enumerate()
                .filter_map(|(i, &d)| {
                    if axes.contains(&i) {
                        if keep {
                            Some(1)
                        } else {
                            None
                        }
                    } else {
                        Some(d)
                    }
                })
                .collect()
        };
        Ok(self.graph.push(
            Op::Reduce {
                op,
                src: self.id,
                axes: axes.to_vec(),
                keep,
            },
            self.ttype().with_shape(dims),
        ))
    }

    /// Sum over `axes` (empty = all).
    pub fn sum(&self, axes: &[usize], keep: bool) -> Result<Node> {
        self.reduce(ReduceOp::Sum, axes, keep)
    }

    /// Max over `axes` (empty = all).
    pub fn reduce_max(&self, axes: &[usize], keep: bool) -> Result<Node> {
        self.reduce(ReduceOp::Max, axes, keep)
    }

    /// Scalar sum of all elements.
    pub fn sum_all(&self) -> Result<Node> {
        self.sum(&[], false)
    }

    /// Scalar mean of all elements.
    pub fn mean_all(&self) -> Result<Node> {
        let n = self.shape().elem_count();
        if n == 0 {
            return Err(Error::Configuration(
                "mean over an empty tensor".to_string(),
            ));
        }
        self.sum_all()?.affine(1.0 / n as f64, 0.0)
    }

    //  Misc

    /// Expand integer values into a trailing one-hot axis of size `depth`,
    /// producing `dtype` values.
    pub fn one_hot(&self, depth: usize, dtype: DType) -> Result<Node> {
        if !self.dtype().is_int() {
            return Err(Error::Configuration(format!(
                "one_hot requires integer values, got {}",
                self.dtype()
            )));
        }
        if depth == 0 {
            return Err(Error::Configuration("one_hot depth must be > 0".to_string()));
        }
        let mut dims = self.dims();
        dims.push(depth);
        Ok(self.graph.push(
            Op::OneHot {
                src: self.id,
                depth,
            },
            TensorType::new(dims, dtype),
        ))
    }

    /// Cast to `dtype`. Bool converts to 0/1; non-zero converts to true.
    pub fn convert(&self, dtype: DType) -> Result<Node> {
        if dtype == self.dtype() {
            return Ok(self.clone());
        }
        Ok(self.graph.push(
            Op::Convert(self.id),
            TensorType::new(self.shape(), dtype),
        ))
    }

    /// Clamp every element into [min, max].
    pub fn clamp(&self, min: f64, max: f64) -> Result<Node> {
        self.require_float("clamp")?;
        if min > max {
            return Err(Error::Configuration(format!(
                "clamp bounds inverted: min {} > max {}",
                min, max
            )));
        }
        Ok(self.graph.push(
            Op::Clamp {
                src: self.id,
                min,
                max,
            },
            self.ttype(),
        ))
    }

    /// Fused scalar transform: self * mul + add.
    pub fn affine(&self, mul: f64, add: f64) -> Result<Node> {
        self.require_float("affine")?;
        Ok(self.graph.push(
            Op::Affine {
                src: self.id,
                mul,
                add,
            },
            self.ttype(),
        ))
    }

    pub fn add_scalar(&self, v: f64) -> Result<Node> {
        self.affine(1.0, v)
    }

    pub fn mul_scalar(&self, v: f64) -> Result<Node> {
        self.affine(v, 0.0)
    }

    /// 1 - self.
    pub fn one_minus(&self) -> Result<Node> {
        self.affine(-1.0, 1.0)
    }

    /// Identity whose gradient is treated as zero by differentiating
    /// consumers.
    pub fn stop_gradient(&self) -> Result<Node> {
        Ok(self.graph.push(Op::StopGradient(self.id), self.ttype()))
    }

    /// A zero tensor with this node's type.
    pub fn zeros_like(&self) -> Result<Node> {
        self.graph
            .scalar(self.dtype(), 0.0)
            .broadcast_to(self.shape())
    }

    /// Numerically stable log-softmax along `axis`:
    /// x - max(x) - log(sum(exp(x - max(x)))).
    pub fn log_softmax(&self, axis: usize) -> Result<Node> {
        self.require_float("log_softmax")?;
        if axis >= self.rank() {
            return Err(Error::Configuration(format!(
                "log_softmax axis {} out of range for shape {}",
                axis,
                self.shape()
            )));
        }
        let max = self.reduce_max(&[axis], true)?;
        let shifted = self.sub(&max)?;
        let lse = shifted.exp()?.sum(&[axis], true)?.log()?;
        shifted.sub(&lse)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}: {}", self.id.0, self.ttype())
    }
}
