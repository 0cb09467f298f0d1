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

//! Sample transformer block used by the CLI and benchmarks

use tensorgraph_core::{AttrValue, ComputationalGraph, DataType, GraphNode, GraphResult, OpKind, TensorDescriptor, TensorId, TensorValue};

/// Dimensions of the sample block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformerBlockSpec {
    pub seq_len: usize,
    pub hidden: usize,
    pub num_heads: usize,
}

impl Default for TransformerBlockSpec {
    fn default() -> Self {
        Self { seq_len: 8, hidden: 64, num_heads: 8 }
    }
}

/// A built sample graph with the handles needed to run it
#[derive(Debug, Clone)]
pub struct SampleGraph {
    pub graph: ComputationalGraph,
    pub input: TensorId,
    pub output: TensorId,
    pub spec: TransformerBlockSpec,
}

impl SampleGraph {
    /// Deterministic activations for the graph input
    pub fn sample_input(&self) -> TensorValue {
        let shape = vec![self.spec.seq_len, self.spec.hidden];
        let len = self.spec.seq_len * self.spec.hidden;
        let data = (0..len).map(|i| ((i * 13 % 29) as f32 - 14.0) / 16.0).collect();
        TensorValue::new(shape.clone(), data).unwrap_or_else(|| TensorValue::zeros(shape))
    }

    pub fn inputs(&self) -> Vec<(TensorId, TensorValue)> {
        vec![(self.input, self.sample_input())]
    }
}

fn weights(spec: &TransformerBlockSpec, salt: usize) -> TensorValue {
    let shape = vec![spec.hidden, spec.hidden];
    let data = (0..spec.hidden * spec.hidden)
        .map(|i| (((i + salt) * 37 % 17) as f32 - 8.0) / 64.0)
        .collect();
    TensorValue::new(shape.clone(), data).unwrap_or_else(|| TensorValue::zeros(shape))
}

/// `fc1 -> relu1 -> ln1 -> attn1 -> fc2 -> gelu1` with literal weights
pub fn build_transformer_block(spec: TransformerBlockSpec) -> GraphResult<SampleGraph> {
    let activation = |name: &str| TensorDescriptor::new(name, vec![spec.seq_len, spec.hidden], DataType::F32);

    let mut graph = ComputationalGraph::new();
    let input = graph.add_input(activation("x"));
    let w1 = graph.add_constant("w1", weights(&spec, 0))?;
    let w2 = graph.add_constant("w2", weights(&spec, 5))?;

    let h1 = graph.add_tensor(activation("h1"));
    let h2 = graph.add_tensor(activation("h2"));
    let h3 = graph.add_tensor(activation("h3"));
    let h4 = graph.add_tensor(activation("h4"));
    let h5 = graph.add_tensor(activation("h5"));
    let output = graph.add_tensor(activation("y"));

    graph.add_node(GraphNode::new(OpKind::MatMul, "fc1", vec![input, w1], vec![h1]))?;
    graph.add_node(GraphNode::new(OpKind::Relu, "relu1", vec![h1], vec![h2]))?;
    graph.add_node(GraphNode::new(OpKind::LayerNorm, "ln1", vec![h2], vec![h3]))?;
    graph.add_node(
        GraphNode::new(OpKind::MultiHeadAttention, "attn1", vec![h3], vec![h4])
            .with_attr("num_heads", AttrValue::Int(spec.num_heads as i64)),
    )?;
    graph.add_node(GraphNode::new(OpKind::MatMul, "fc2", vec![h4, w2], vec![h5]))?;
    graph.add_node(GraphNode::new(OpKind::Gelu, "gelu1", vec![h5], vec![output]))?;
    graph.mark_output(output)?;

    Ok(SampleGraph { graph, input, output, spec })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_graph_is_valid() {
        let sample = build_transformer_block(TransformerBlockSpec::default()).unwrap();
        assert!(sample.graph.validate().is_ok());
        assert_eq!(sample.graph.node_count(), 8);
        assert_eq!(sample.sample_input().shape(), &[8, 64]);
    }

    #[test]
    fn test_weights_are_deterministic() {
        let spec = TransformerBlockSpec { seq_len: 2, hidden: 4, num_heads: 2 };
        assert_eq!(weights(&spec, 3), weights(&spec, 3));
        assert_ne!(weights(&spec, 0), weights(&spec, 5));
    }
}
