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


//! Error taxonomy shared by construction, optimization and dispatch

use crate::node::NodeId;
use crate::ops::OpKind;
use crate::tensor::TensorId;
use thiserror::Error;

/// Errors raised by reference kernels
#[derive(Error, Debug, Clone, PartialEq)]
pub enum KernelError {
    #[error("expected {expected} inputs, got {actual}")]
    Arity { expected: usize, actual: usize },
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),
    #[error("invalid rank: {0}")]
    InvalidRank(String),
    #[error("invalid attribute `{key}`: {reason}")]
    InvalidAttribute { key: String, reason: String },
    #[error("no reference kernel for {0}")]
    Unsupported(OpKind),
    #[error("handler did not produce {0}")]
    MissingOutput(TensorId),
}

/// Errors that can occur while building, optimizing or executing a graph
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    /// Malformed reference found while building or validating the graph
    #[error("Invalid graph: {0}")]
    InvalidGraph(String),
    /// A pass produced a graph violating the DAG or SSA invariants
    #[error("Graph corruption in pass `{pass}`: {reason}")]
    GraphCorruption { pass: String, reason: String },
    #[error("No handler registered for {op} (node {node})")]
    UnknownOp { node: NodeId, op: OpKind },
    #[error("Missing input {tensor} for node {node}")]
    MissingInput { node: NodeId, tensor: TensorId },
    #[error("Graph output {0} was not produced")]
    MissingOutput(TensorId),
    /// A fusion rule matched but the intermediate tensor is read elsewhere
    #[error("Unsound fusion: {tensor} has fan-out {fan_out}")]
    FusionUnsound { tensor: TensorId, fan_out: usize },
    #[error("Kernel failure in {op} (node {node}): {source}")]
    Kernel {
        node: NodeId,
        op: OpKind,
        #[source]
        source: KernelError,
    },
}

pub type GraphResult<T> = Result<T, GraphError>;
