use std::fmt;

use crate::dtype::DType;

// Shape — N-dimensional shape
//
// A Shape is the list of dimension sizes of a tensor: [] for a scalar,
// [5] for a vector, [2, 3] for a matrix. The broadcasting helpers below
// implement the usual NumPy rules (align from the right, a dimension of 1
// repeats) and are shared by graph inference and the reference interpreter.

/// N-dimensional shape of a tensor value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Shape(Vec<usize>);

impl Shape {
    /// Create a shape from a vector of dimension sizes.
    pub fn new(dims: Vec<usize>) -> Self {
        Shape(dims)
    }

    /// The scalar shape (rank 0, one element).
    pub fn scalar() -> Self {
        Shape(Vec::new())
    }

    /// The dimension sizes as a slice.
    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Total number of elements; a scalar shape has 1.
    pub fn elem_count(&self) -> usize {
        self.0.iter().product()
    }

    /// Size of a specific dimension.
    pub fn dim(&self, d: usize) -> crate::Result<usize> {
        self.0
            .get(d)
            .copied()
            .ok_or_else(|| crate::Error::msg(format!("dimension {} out of range for shape {}", d, self)))
    }

    /// Row-major (C-order) strides for this shape.
    pub fn stride_contiguous(&self) -> Vec<usize> {
        let mut strides = vec![0usize; self.rank()];
        if self.rank() > 0 {
            strides[self.rank() - 1] = 1;
            for i in (0..self.rank() - 1).rev() {
                strides[i] = strides[i + 1] * self.0[i + 1];
            }
        }
        strides
    }

    /// Compute the broadcast output shape from two input shapes.
    ///
    /// Shapes are aligned from the right; dimensions are compatible when
    /// equal or when one of them is 1; missing leading dimensions count as 1.
    pub fn broadcast_shape(lhs: &Shape, rhs: &Shape) -> crate::Result<Shape> {
        let l = lhs.dims();
        let r = rhs.dims();
        let max_rank = l.len().max(r.len());
        let mut out = Vec::with_capacity(max_rank);

        for i in 0..max_rank {
            let ld = if i < l.len() { l[l.len() - 1 - i] } else { 1 };
            let rd = if i < r.len() { r[r.len() - 1 - i] } else { 1 };
            if ld == rd {
                out.push(ld);
            } else if ld == 1 {
                out.push(rd);
            } else if rd == 1 {
                out.push(ld);
            } else {
                return Err(crate::Error::ShapeMismatch {
                    expected: lhs.clone(),
                    got: rhs.clone(),
                });
            }
        }
        out.reverse();
        Ok(Shape::new(out))
    }

    /// Whether this shape can be broadcast to `target` (right-aligned,
    /// each dimension equal or 1, rank not exceeding the target's).
    pub fn broadcasts_to(&self, target: &Shape) -> bool {
        let s = self.dims();
        let t = target.dims();
        if s.len() > t.len() {
            return false;
        }
        let offset = t.len() - s.len();
        s.iter()
            .enumerate()
            .all(|(i, &d)| d == t[i + offset] || d == 1)
    }

    /// Strides to read this shape's (contiguous) data as if it had the
    /// `target` broadcast shape: broadcast dimensions get stride 0.
    pub fn broadcast_strides(&self, target: &Shape) -> Vec<usize> {
        let s = self.dims();
        let t = target.dims();
        let own = self.stride_contiguous();
        let mut out = vec![0usize; t.len()];
        let offset = t.len() - s.len();
        for i in 0..s.len() {
            if s[i] == t[i + offset] {
                out[i + offset] = own[i];
            }
            // Dimension of 1 against a larger target dimension: stride 0.
        }
        out
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, "]")
    }
}

impl From<()> for Shape {
    fn from(_: ()) -> Self {
        Shape::scalar()
    }
}

impl From<usize> for Shape {
    fn from(d: usize) -> Self {
        Shape(vec![d])
    }
}

impl From<(usize, usize)> for Shape {
    fn from((d0, d1): (usize, usize)) -> Self {
        Shape(vec![d0, d1])
    }
}

impl From<(usize, usize, usize)> for Shape {
    fn from((d0, d1, d2): (usize, usize, usize)) -> Self {
        Shape(vec![d0, d1, d2])
    }
}

impl From<Vec<usize>> for Shape {
    fn from(v: Vec<usize>) -> Self {
        Shape(v)
    }
}

impl From<&[usize]> for Shape {
    fn from(s: &[usize]) -> Self {
        Shape(s.to_vec())
    }
}

// TensorType — a shape paired with an element type
//
// Parameter and output metadata on executables, and the weight/mask
// classification in the loss library, need shape and dtype together.

/// A (shape, dtype) pair describing one tensor value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TensorType {
    pub shape: Shape,
    pub dtype: DType,
}

impl TensorType {
    pub fn new(shape: impl Into<Shape>, dtype: DType) -> Self {
        TensorType {
            shape: shape.into(),
            dtype,
        }
    }

    pub fn elem_count(&self) -> usize {
        self.shape.elem_count()
    }

    /// Same type, different shape.
    pub fn with_shape(&self, shape: impl Into<Shape>) -> Self {
        TensorType::new(shape, self.dtype)
    }
}

impl fmt::Display for TensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.dtype, self.shape)
    }
}
