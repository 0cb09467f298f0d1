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


//! Operation kinds
//!
//! `OpKind` is a closed enumeration. Fused kinds are described by a
//! decomposition table so that backends and the optimizer derive their
//! behavior from data instead of per-kind branches.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Enum representing every operation the graph IR can express.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OpKind {
    // Literals and plumbing
    Constant,
    Identity,
    // Linear algebra
    MatMul,
    Conv2d,
    // Activations
    Relu,
    Gelu,
    Silu,
    Softmax,
    // Normalization
    LayerNorm,
    BatchNorm,
    RmsNorm,
    // Attention
    Attention,
    MultiHeadAttention,
    // Element-wise
    Add,
    Mul,
    Div,
    // Shape and reductions
    Reshape,
    Transpose,
    ReduceSum,
    ReduceMax,
    Concat,
    /// User-defined operation resolved through the registry's custom table
    Custom,
    // Fused operations (produced by the optimizer)
    FusedMatMulRelu,
    FusedMatMulGelu,
    FusedConvBatchNormRelu,
    FusedLayerNormAttention,
    FusedMatMulSilu,
    FusedRmsNormAttention,
    FusedMatMulLayerNormGelu,
}

impl OpKind {
    /// Every kind, base kinds first
    pub const ALL: [OpKind; 29] = [
        OpKind::Constant,
        OpKind::Identity,
        OpKind::MatMul,
        OpKind::Conv2d,
        OpKind::Relu,
        OpKind::Gelu,
        OpKind::Silu,
        OpKind::Softmax,
        OpKind::LayerNorm,
        OpKind::BatchNorm,
        OpKind::RmsNorm,
        OpKind::Attention,
        OpKind::MultiHeadAttention,
        OpKind::Add,
        OpKind::Mul,
        OpKind::Div,
        OpKind::Reshape,
        OpKind::Transpose,
        OpKind::ReduceSum,
        OpKind::ReduceMax,
        OpKind::Concat,
        OpKind::Custom,
        OpKind::FusedMatMulRelu,
        OpKind::FusedMatMulGelu,
        OpKind::FusedConvBatchNormRelu,
        OpKind::FusedLayerNormAttention,
        OpKind::FusedMatMulSilu,
        OpKind::FusedRmsNormAttention,
        OpKind::FusedMatMulLayerNormGelu,
    ];

    /// Component kinds a fused kind executes, in order. `None` for base kinds.
    pub fn components(&self) -> Option<&'static [OpKind]> {
        match self {
            OpKind::FusedMatMulRelu => Some(&[OpKind::MatMul, OpKind::Relu]),
            OpKind::FusedMatMulGelu => Some(&[OpKind::MatMul, OpKind::Gelu]),
            OpKind::FusedConvBatchNormRelu => Some(&[OpKind::Conv2d, OpKind::BatchNorm, OpKind::Relu]),
            OpKind::FusedLayerNormAttention => Some(&[OpKind::LayerNorm, OpKind::MultiHeadAttention]),
            OpKind::FusedMatMulSilu => Some(&[OpKind::MatMul, OpKind::Silu]),
            OpKind::FusedRmsNormAttention => Some(&[OpKind::RmsNorm, OpKind::MultiHeadAttention]),
            OpKind::FusedMatMulLayerNormGelu => Some(&[OpKind::MatMul, OpKind::LayerNorm, OpKind::Gelu]),
            _ => None,
        }
    }

    pub fn is_fused(&self) -> bool {
        self.components().is_some()
    }

    /// Pure kinds have no side effects and may be evaluated at compile time
    pub fn is_pure(&self) -> bool {
        !matches!(self, OpKind::Custom)
    }

    /// Converts a mnemonic to an `OpKind`, case-insensitively.
    pub fn from_mnemonic(mnemonic: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.to_mnemonic().eq_ignore_ascii_case(mnemonic))
    }

    /// Converts an `OpKind` to its mnemonic.
    pub fn to_mnemonic(&self) -> &'static str {
        match self {
            OpKind::Constant => "Constant",
            OpKind::Identity => "Identity",
            OpKind::MatMul => "MatMul",
            OpKind::Conv2d => "Conv2D",
            OpKind::Relu => "ReLU",
            OpKind::Gelu => "GELU",
            OpKind::Silu => "SiLU",
            OpKind::Softmax => "Softmax",
            OpKind::LayerNorm => "LayerNorm",
            OpKind::BatchNorm => "BatchNorm",
            OpKind::RmsNorm => "RMSNorm",
            OpKind::Attention => "Attention",
            OpKind::MultiHeadAttention => "MultiHeadAttention",
            OpKind::Add => "Add",
            OpKind::Mul => "Multiply",
            OpKind::Div => "Divide",
            OpKind::Reshape => "Reshape",
            OpKind::Transpose => "Transpose",
            OpKind::ReduceSum => "ReduceSum",
            OpKind::ReduceMax => "ReduceMax",
            OpKind::Concat => "Concat",
            OpKind::Custom => "Custom",
            OpKind::FusedMatMulRelu => "FusedMatMulReLU",
            OpKind::FusedMatMulGelu => "FusedMatMulGELU",
            OpKind::FusedConvBatchNormRelu => "FusedConvBNReLU",
            OpKind::FusedLayerNormAttention => "FusedLayerNormAttention",
            OpKind::FusedMatMulSilu => "FusedMatMulSiLU",
            OpKind::FusedRmsNormAttention => "FusedRMSNormAttention",
            OpKind::FusedMatMulLayerNormGelu => "FusedMatMulLNGELU",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_mnemonic())
    }
}
