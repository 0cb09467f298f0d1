// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.


//! Tensor descriptors and dense tensor values
//!
//! Descriptors carry the static metadata the optimizer reasons about
//! (shape, element type, layout hint). Values are the dense buffers the
//! reference backend computes with; every element type is evaluated as `f32`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a tensor within one graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TensorId(pub u32);

impl fmt::Display for TensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Element type of a tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DataType {
    #[default]
    F32,
    F16,
    BF16,
    F8,
    I8,
    /// Packed 4-bit integers, accounted as one byte per element
    I4,
}

impl DataType {
    /// Storage size of one element in bytes
    pub fn size_bytes(&self) -> usize {
        match self {
            DataType::F32 => 4,
            DataType::F16 | DataType::BF16 => 2,
            DataType::F8 | DataType::I8 | DataType::I4 => 1,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DataType::F32 => "float32",
            DataType::F16 => "float16",
            DataType::BF16 => "bfloat16",
            DataType::F8 => "float8",
            DataType::I8 => "int8",
            DataType::I4 => "int4",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Memory order hint attached to a tensor descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MemoryLayout {
    #[default]
    RowMajor,
    ColumnMajor,
    /// Channels-first image layout
    Nchw,
    /// Channels-last image layout
    Nhwc,
}

/// Static metadata of a tensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorDescriptor {
    /// Dimensions, outermost first
    pub shape: Vec<usize>,
    /// Element type
    pub dtype: DataType,
    /// Diagnostic name
    pub name: String,
    /// Layout hint, rewritten by the layout pass
    pub layout: MemoryLayout,
    /// Whether the tensor holds a compile-time literal
    pub is_constant: bool,
}

impl TensorDescriptor {
    pub fn new(name: impl Into<String>, shape: Vec<usize>, dtype: DataType) -> Self {
        Self {
            shape,
            dtype,
            name: name.into(),
            layout: MemoryLayout::default(),
            is_constant: false,
        }
    }

    /// Mark the descriptor as describing a literal
    pub fn constant(mut self) -> Self {
        self.is_constant = true;
        self
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn total_elements(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn size_bytes(&self) -> usize {
        self.total_elements() * self.dtype.size_bytes()
    }
}

/// Dense row-major tensor value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorValue {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl TensorValue {
    /// Build a value, returning `None` when the buffer does not match the shape
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Option<Self> {
        if shape.iter().product::<usize>() != data.len() {
            return None;
        }
        Some(Self { shape, data })
    }

    pub fn scalar(value: f32) -> Self {
        Self { shape: Vec::new(), data: vec![value] }
    }

    pub fn zeros(shape: Vec<usize>) -> Self {
        let len = shape.iter().product();
        Self { shape, data: vec![0.0; len] }
    }

    /// One-dimensional value
    pub fn vector(data: Vec<f32>) -> Self {
        Self { shape: vec![data.len()], data }
    }

    /// Two-dimensional value built from rows of equal length
    pub fn matrix(rows: &[&[f32]]) -> Option<Self> {
        let cols = rows.first().map_or(0, |r| r.len());
        if rows.iter().any(|r| r.len() != cols) {
            return None;
        }
        let data = rows.iter().flat_map(|r| r.iter().copied()).collect();
        Some(Self { shape: vec![rows.len(), cols], data })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_parts(self) -> (Vec<usize>, Vec<f32>) {
        (self.shape, self.data)
    }

    /// Apply `f` to every element
    pub fn map(&self, f: impl Fn(f32) -> f32) -> Self {
        Self {
            shape: self.shape.clone(),
            data: self.data.iter().map(|&x| f(x)).collect(),
        }
    }
}
