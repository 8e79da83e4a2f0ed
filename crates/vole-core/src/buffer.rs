use std::sync::Arc;

use crate::dtype::{DType, WithDType};
use crate::error::{Error, Result};
use crate::shape::{Shape, TensorType};

// Buffer — a concrete host tensor value
//
// Buffers are what executables consume and produce. Storage is a typed
// vector behind an Arc, so cloning a Buffer is cheap and "donating" one to
// an execution is a meaningful hint: the runtime may release the storage at
// the input's last use instead of holding it for the whole call.
//
// The f64 host view (`to_f64_vec` / `from_f64_iter`) is the lingua franca
// the reference interpreter computes through; results are materialized back
// into the destination dtype afterwards.

/// Typed storage for one buffer. Bool is stored as 0/1 bytes.
#[derive(Debug, Clone)]
pub enum BufferData {
    F16(Vec<half::f16>),
    BF16(Vec<half::bf16>),
    F32(Vec<f32>),
    F64(Vec<f64>),
    U8(Vec<u8>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    Bool(Vec<u8>),
}

impl BufferData {
    /// The dtype this storage holds.
    pub fn dtype(&self) -> DType {
        match self {
            BufferData::F16(_) => DType::F16,
            BufferData::BF16(_) => DType::BF16,
            BufferData::F32(_) => DType::F32,
            BufferData::F64(_) => DType::F64,
            BufferData::U8(_) => DType::U8,
            BufferData::I32(_) => DType::I32,
            BufferData::I64(_) => DType::I64,
            BufferData::Bool(_) => DType::Bool,
        }
    }

    /// Number of elements in this storage.
    pub fn len(&self) -> usize {
        match self {
            BufferData::F16(v) => v.len(),
            BufferData::BF16(v) => v.len(),
            BufferData::F32(v) => v.len(),
            BufferData::F64(v) => v.len(),
            BufferData::U8(v) => v.len(),
            BufferData::I32(v) => v.len(),
            BufferData::I64(v) => v.len(),
            BufferData::Bool(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A concrete, host-resident tensor value.
#[derive(Debug, Clone)]
pub struct Buffer {
    ttype: TensorType,
    data: Arc<BufferData>,
}

impl Buffer {
    /// Wrap typed storage with a shape. The element count must match.
    pub fn new(data: BufferData, shape: impl Into<Shape>) -> Result<Self> {
        let shape = shape.into();
        if data.len() != shape.elem_count() {
            crate::bail!(
                "buffer element count mismatch: shape {} requires {} elements, got {}",
                shape,
                shape.elem_count(),
                data.len()
            );
        }
        let dtype = data.dtype();
        Ok(Buffer {
            ttype: TensorType::new(shape, dtype),
            data: Arc::new(data),
        })
    }

    /// Build a buffer from a typed slice; the dtype is taken from `T`.
    pub fn from_slice<T: WithDType>(data: &[T], shape: impl Into<Shape>) -> Result<Self> {
        // Qualified call: NumCast's supertrait also offers a `to_f64`, with
        // an Option return, through the WithDType bound.
        Buffer::from_f64_iter(data.iter().map(|v| WithDType::to_f64(*v)), shape, T::DTYPE)
    }

    /// Build a buffer of `dtype` from f64 values, converting each element.
    pub fn from_f64_slice(data: &[f64], shape: impl Into<Shape>, dtype: DType) -> Result<Self> {
        Buffer::from_f64_iter(data.iter().copied(), shape, dtype)
    }

    /// Build a buffer of `dtype` from an iterator of f64 values.
    pub fn from_f64_iter(
        data: impl Iterator<Item = f64>,
        shape: impl Into<Shape>,
        dtype: DType,
    ) -> Result<Self> {
        Buffer::new(data_from_f64(data, dtype), shape)
    }

    /// Build a boolean buffer.
    pub fn from_bool_slice(data: &[bool], shape: impl Into<Shape>) -> Result<Self> {
        let bytes = data.iter().map(|&b| b as u8).collect();
        Buffer::new(BufferData::Bool(bytes), shape)
    }

    /// A rank-0 buffer holding one value.
    pub fn scalar(value: f64, dtype: DType) -> Self {
        Buffer::from_f64_iter(std::iter::once(value), Shape::scalar(), dtype)
            .expect("scalar buffer is always well-formed")
    }

    /// A zero-filled buffer.
    pub fn zeros(shape: impl Into<Shape>, dtype: DType) -> Self {
        let shape = shape.into();
        let n = shape.elem_count();
        Buffer::from_f64_iter(std::iter::repeat(0.0).take(n), shape, dtype)
            .expect("zeros buffer is always well-formed")
    }

    pub fn ttype(&self) -> &TensorType {
        &self.ttype
    }

    pub fn shape(&self) -> &Shape {
        &self.ttype.shape
    }

    pub fn dims(&self) -> &[usize] {
        self.ttype.shape.dims()
    }

    pub fn dtype(&self) -> DType {
        self.ttype.dtype
    }

    pub fn elem_count(&self) -> usize {
        self.ttype.elem_count()
    }

    pub fn data(&self) -> &BufferData {
        &self.data
    }

    /// Same storage under a different shape with the same element count.
    pub fn reshaped(&self, shape: impl Into<Shape>) -> Result<Buffer> {
        let shape = shape.into();
        if shape.elem_count() != self.elem_count() {
            return Err(Error::ShapeMismatch {
                expected: self.shape().clone(),
                got: shape,
            });
        }
        Ok(Buffer {
            ttype: self.ttype.with_shape(shape),
            data: Arc::clone(&self.data),
        })
    }

    /// Copy the elements out as f64 values. Bool yields 0.0/1.0.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        match self.data.as_ref() {
            BufferData::F16(v) => v.iter().map(|x| x.to_f64()).collect(),
            BufferData::BF16(v) => v.iter().map(|x| x.to_f64()).collect(),
            BufferData::F32(v) => v.iter().map(|&x| x as f64).collect(),
            BufferData::F64(v) => v.clone(),
            BufferData::U8(v) => v.iter().map(|&x| x as f64).collect(),
            BufferData::I32(v) => v.iter().map(|&x| x as f64).collect(),
            BufferData::I64(v) => v.iter().map(|&x| x as f64).collect(),
            BufferData::Bool(v) => v.iter().map(|&x| (x != 0) as u8 as f64).collect(),
        }
    }

    /// Copy a boolean buffer out as bools. Fails for non-Bool buffers.
    pub fn to_bool_vec(&self) -> Result<Vec<bool>> {
        match self.data.as_ref() {
            BufferData::Bool(v) => Ok(v.iter().map(|&x| x != 0).collect()),
            _ => Err(Error::DTypeMismatch {
                expected: DType::Bool,
                got: self.dtype(),
            }),
        }
    }
}

/// Materialize f64 values into typed storage for `dtype`.
/// Bool maps any non-zero value to true.
pub fn data_from_f64(data: impl Iterator<Item = f64>, dtype: DType) -> BufferData {
    match dtype {
        DType::F16 => BufferData::F16(data.map(half::f16::from_f64).collect()),
        DType::BF16 => BufferData::BF16(data.map(half::bf16::from_f64).collect()),
        DType::F32 => BufferData::F32(data.map(|v| v as f32).collect()),
        DType::F64 => BufferData::F64(data.collect()),
        DType::U8 => BufferData::U8(data.map(|v| v as u8).collect()),
        DType::I32 => BufferData::I32(data.map(|v| v as i32).collect()),
        DType::I64 => BufferData::I64(data.map(|v| v as i64).collect()),
        DType::Bool => BufferData::Bool(data.map(|v| (v != 0.0) as u8).collect()),
    }
}
