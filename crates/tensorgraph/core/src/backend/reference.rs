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


//! Reference CPU backend
//!
//! Registers one handler per kind the reference kernels implement. Fused
//! kinds are registered from the same table as base kinds, so adding a fused
//! kind needs no change here.

use crate::backend::{BackendRegistry, ValueStore};
use crate::error::{GraphError, GraphResult};
use crate::kernels;
use crate::node::GraphNode;
use crate::ops::OpKind;
use crate::tensor::TensorValue;

/// Register every supported kind in `registry`
pub fn register(registry: &mut BackendRegistry) {
    for kind in OpKind::ALL.into_iter().filter(|kind| kernels::supports(*kind)) {
        registry.register(kind, execute_node);
    }
}

/// Evaluate `node` without touching a store
pub fn evaluate(node: &GraphNode, inputs: &[&TensorValue]) -> GraphResult<Vec<TensorValue>> {
    let outputs = kernels::evaluate(node, inputs).map_err(|source| GraphError::Kernel {
        node: node.id,
        op: node.op_kind,
        source,
    })?;
    if outputs.len() != node.outputs.len() {
        return Err(GraphError::Kernel {
            node: node.id,
            op: node.op_kind,
            source: crate::error::KernelError::Arity {
                expected: node.outputs.len(),
                actual: outputs.len(),
            },
        });
    }
    Ok(outputs)
}

fn execute_node(node: &GraphNode, store: &mut ValueStore) -> GraphResult<()> {
    let outputs = {
        let inputs = store.inputs_for(node)?;
        evaluate(node, &inputs)?
    };
    for (id, value) in node.outputs.iter().zip(outputs) {
        store.insert(*id, value);
    }
    Ok(())
}
