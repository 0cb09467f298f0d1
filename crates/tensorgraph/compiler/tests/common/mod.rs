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

//! Graph builders and assertions shared by the integration tests

#![allow(dead_code)]

use tensorgraph_compiler::runtime::Outputs;
use tensorgraph_core::{ComputationalGraph, DataType, GraphNode, OpKind, TensorDescriptor, TensorId, TensorValue};

pub fn desc(name: &str, shape: Vec<usize>) -> TensorDescriptor {
    TensorDescriptor::new(name, shape, DataType::F32)
}

pub fn square(name: &str) -> TensorDescriptor {
    desc(name, vec![2, 2])
}

pub fn matrix(rows: &[&[f32]]) -> TensorValue {
    TensorValue::matrix(rows).expect("rows must have equal length")
}

/// Handles of the tensors in [`matmul_relu`]
pub struct MatMulRelu {
    pub graph: ComputationalGraph,
    pub a: TensorId,
    pub b: TensorId,
    pub c: TensorId,
    pub d: TensorId,
}

/// `[MatMul(a, b) -> c, Relu(c) -> d]` with outputs `{d}`
pub fn matmul_relu() -> MatMulRelu {
    let mut graph = ComputationalGraph::new();
    let a = graph.add_input(square("a"));
    let b = graph.add_input(square("b"));
    let c = graph.add_tensor(square("c"));
    let d = graph.add_tensor(square("d"));
    graph
        .add_node(GraphNode::new(OpKind::MatMul, "matmul", vec![a, b], vec![c]))
        .expect("matmul references known tensors");
    graph
        .add_node(GraphNode::new(OpKind::Relu, "relu", vec![c], vec![d]))
        .expect("relu references known tensors");
    graph.mark_output(d).expect("d is registered");
    MatMulRelu { graph, a, b, c, d }
}

pub fn sample_inputs(a: TensorId, b: TensorId) -> Vec<(TensorId, TensorValue)> {
    vec![(a, matrix(&[&[1.0, -2.0], &[3.0, 0.5]])), (b, matrix(&[&[0.5, 1.0], &[-1.0, 2.0]]))]
}

pub fn values_match(expected: f32, actual: f32) -> bool {
    if expected.is_nan() || actual.is_nan() {
        return expected.is_nan() && actual.is_nan();
    }
    if expected == actual {
        return true;
    }
    (expected - actual).abs() <= 1e-4 * expected.abs().max(actual.abs()).max(1.0)
}

pub fn assert_outputs_match(expected: &Outputs, actual: &Outputs) {
    assert_eq!(expected.keys().collect::<Vec<_>>(), actual.keys().collect::<Vec<_>>(), "output sets differ");
    for (id, value) in expected {
        let other = &actual[id];
        assert_eq!(value.shape(), other.shape(), "shape of {id} differs");
        for (x, y) in value.data().iter().zip(other.data()) {
            assert!(values_match(*x, *y), "{id}: {x} vs {y}");
        }
    }
}
