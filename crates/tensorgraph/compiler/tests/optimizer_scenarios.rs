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

//! Integration tests for the optimization pipeline
//!
//! These tests build small graphs through the public IR and check the
//! rewritten graph and the statistics the compiler reports.

mod common;

use common::{desc, matmul_relu, matrix, square};
use tensorgraph_compiler::optimizer::{OptimizationPass, OptimizationPipeline, OptimizationResult};
use tensorgraph_compiler::{ModelCompiler, OptimizationConfig};
use tensorgraph_core::{AttrValue, ComputationalGraph, GraphError, GraphNode, GraphResult, OpKind, TensorValue};

/// Scenario: MatMul feeding a sole Relu collapses into one fused node
#[test]
fn test_matmul_relu_fuses_at_level_two() {
    let mut fixture = matmul_relu();
    let mut compiler = ModelCompiler::with_level(2);
    let stats = compiler.compile(&mut fixture.graph).expect("compilation should succeed");

    let nodes = fixture.graph.nodes();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].op_kind, OpKind::FusedMatMulRelu);
    assert_eq!(nodes[0].inputs, vec![fixture.a, fixture.b]);
    assert_eq!(nodes[0].outputs, vec![fixture.d]);
    assert!(fixture.graph.tensor(fixture.c).is_none(), "interior tensor should be dropped");
    assert_eq!(stats.nodes_fused, 1);
    assert_eq!(stats.fusions_blocked, 0);
}

/// Scenario: a second reader of the intermediate blocks fusion
#[test]
fn test_shared_intermediate_blocks_fusion() {
    let mut fixture = matmul_relu();
    let e = fixture.graph.add_tensor(square("e"));
    fixture
        .graph
        .add_node(GraphNode::new(OpKind::Identity, "copy", vec![fixture.c], vec![e]))
        .expect("identity references known tensors");
    fixture.graph.mark_output(e).expect("e is registered");

    let mut compiler = ModelCompiler::with_level(2);
    let stats = compiler.compile(&mut fixture.graph).expect("compilation should succeed");

    let kinds: Vec<OpKind> = fixture.graph.nodes().iter().map(|n| n.op_kind).collect();
    assert_eq!(kinds, vec![OpKind::MatMul, OpKind::Relu, OpKind::Identity]);
    assert_eq!(stats.nodes_fused, 0);
    assert_eq!(stats.fusions_blocked, 1);
    assert!(compiler.warnings().iter().any(|w| w.pass_name == "operator_fusion" && w.message.contains("fan-out 2")));
}

/// Scenario: Add of two literals is folded before the MatMul consuming it
#[test]
fn test_literal_add_is_folded() {
    for level in 1..=3 {
        let mut graph = ComputationalGraph::new();
        let lit1 = graph.add_constant("lit1", matrix(&[&[1.0, 2.0], &[3.0, 4.0]])).expect("literal");
        let lit2 = graph.add_constant("lit2", matrix(&[&[10.0, 20.0], &[30.0, 40.0]])).expect("literal");
        let w = graph.add_input(square("w"));
        let x = graph.add_tensor(square("x"));
        let y = graph.add_tensor(square("y"));
        graph.add_node(GraphNode::new(OpKind::Add, "add", vec![lit1, lit2], vec![x])).expect("add");
        graph.add_node(GraphNode::new(OpKind::MatMul, "matmul", vec![x, w], vec![y])).expect("matmul");
        graph.mark_output(y).expect("y is registered");

        let stats = ModelCompiler::with_level(level).compile(&mut graph).expect("compilation should succeed");

        assert!(graph.nodes().iter().all(|n| n.op_kind != OpKind::Add), "level {level}");
        let producer = graph.producer_of(x).expect("x keeps a producer");
        assert!(producer.is_constant());
        assert_eq!(producer.literal().map(TensorValue::data), Some(&[11.0, 22.0, 33.0, 44.0][..]));
        assert!(graph.tensor(x).is_some_and(|t| t.is_constant));
        assert_eq!(graph.nodes().iter().filter(|n| n.op_kind == OpKind::MatMul).count(), 1);
        assert_eq!(graph.node_count(), 2, "folded literal plus matmul at level {level}");
        assert_eq!(stats.constants_folded, 1);
        assert_eq!(stats.dead_nodes_removed, 2);
        assert!(graph.tensor(lit1).is_none() && graph.tensor(lit2).is_none());
    }
}

/// Pass that makes two nodes produce the same tensor
struct DuplicateProducer;

impl OptimizationPass for DuplicateProducer {
    fn name(&self) -> &str {
        "duplicate_producer"
    }

    fn description(&self) -> &str {
        "breaks single assignment on purpose"
    }

    fn optimize(&mut self, graph: ComputationalGraph, _config: &OptimizationConfig) -> GraphResult<OptimizationResult<ComputationalGraph>> {
        let mut nodes = graph.nodes().to_vec();
        let mut copy = nodes[0].clone();
        copy.name = "shadow".into();
        nodes.push(copy);
        Ok(OptimizationResult {
            output: graph.rebuild(nodes),
            changed: true,
            counters: Default::default(),
            warnings: Vec::new(),
        })
    }
}

/// Literal chain added consumers-first, longer than the folding sweep cap
#[test]
fn test_reversed_literal_chain_folds_in_one_compile() {
    let mut graph = ComputationalGraph::new();
    let tensors: Vec<_> = (0..=70).map(|i| graph.add_tensor(desc(&format!("t{i}"), vec![2]))).collect();
    for i in (1..=70).rev() {
        graph
            .add_node(GraphNode::new(OpKind::Relu, format!("relu{i}"), vec![tensors[i - 1]], vec![tensors[i]]))
            .expect("chain references known tensors");
    }
    graph
        .add_node(GraphNode::constant("seed", tensors[0], TensorValue::vector(vec![-2.0, 5.0])))
        .expect("seed references a known tensor");
    graph.mark_output(tensors[70]).expect("output is registered");

    let stats = ModelCompiler::with_level(1).compile(&mut graph).expect("compilation should succeed");

    assert_eq!(stats.constants_folded, 70);
    assert_eq!(graph.node_count(), 1);
    let producer = graph.producer_of(tensors[70]).expect("output keeps a producer");
    assert_eq!(producer.op_kind, OpKind::Constant);
    assert_eq!(producer.literal().map(TensorValue::data), Some(&[0.0, 5.0][..]));
}

/// A pass that corrupts the graph is rejected and nothing is committed
#[test]
fn test_corrupting_pass_rolls_back() {
    let mut fixture = matmul_relu();
    let snapshot = fixture.graph.clone();

    let mut pipeline = OptimizationPipeline::for_level(OptimizationConfig::with_level(1));
    pipeline.add_pass(DuplicateProducer);
    let mut compiler = ModelCompiler::with_level(1);
    let err = compiler.compile_with(&mut fixture.graph, &mut pipeline).expect_err("corruption must be reported");

    assert!(matches!(err, GraphError::GraphCorruption { ref pass, .. } if pass == "duplicate_producer"));
    assert_eq!(fixture.graph, snapshot);
    assert!(!fixture.graph.is_optimized());
}

/// A cyclic graph is rejected before any pass runs
#[test]
fn test_cycle_is_reported_as_invalid_graph() {
    let mut graph = ComputationalGraph::new();
    let p = graph.add_tensor(square("p"));
    let q = graph.add_tensor(square("q"));
    graph.add_node(GraphNode::new(OpKind::Relu, "forward", vec![p], vec![q])).expect("relu");
    graph.add_node(GraphNode::new(OpKind::Gelu, "back", vec![q], vec![p])).expect("gelu");
    graph.mark_output(q).expect("q is registered");
    let snapshot = graph.clone();

    let err = ModelCompiler::with_level(2).compile(&mut graph).expect_err("cycle must be rejected");
    match err {
        GraphError::InvalidGraph(reason) => assert!(reason.contains("cycle")),
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(graph, snapshot);
}

/// Level 0 commits the graph unchanged with a cached order
#[test]
fn test_level_zero_keeps_nodes() {
    let mut fixture = matmul_relu();
    let before = fixture.graph.nodes().to_vec();
    let stats = ModelCompiler::with_level(0).compile(&mut fixture.graph).expect("compilation should succeed");
    assert_eq!(fixture.graph.nodes(), before.as_slice());
    assert!(fixture.graph.is_optimized());
    assert_eq!(fixture.graph.execution_order(), Some(&[0usize, 1][..]));
    assert_eq!(stats.graph_reduction_percent(), 0.0);
}

/// Identical graphs compile to identical node lists and orders
#[test]
fn test_compilation_is_deterministic() {
    let build = || {
        let mut fixture = matmul_relu();
        ModelCompiler::with_level(3).compile(&mut fixture.graph).expect("compilation should succeed");
        fixture.graph
    };
    let first = build();
    let second = build();
    assert_eq!(first.nodes(), second.nodes());
    assert_eq!(first.execution_order(), second.execution_order());
}

/// Transformer block: fc -> relu -> layernorm -> attention -> fc -> gelu
fn transformer_block(norm: OpKind) -> ComputationalGraph {
    let mut graph = ComputationalGraph::new();
    let x = graph.add_input(desc("input", vec![4, 8]));
    let w1 = graph.add_constant("fc1_weight", TensorValue::zeros(vec![8, 8])).expect("weight");
    let h1 = graph.add_tensor(desc("fc1_out", vec![4, 8]));
    let h2 = graph.add_tensor(desc("relu1_out", vec![4, 8]));
    let h3 = graph.add_tensor(desc("ln1_out", vec![4, 8]));
    let h4 = graph.add_tensor(desc("attn1_out", vec![4, 8]));
    let w2 = graph.add_input(desc("fc2_weight", vec![8, 8]));
    let h5 = graph.add_tensor(desc("fc2_out", vec![4, 8]));
    let out = graph.add_tensor(desc("output", vec![4, 8]));

    graph.add_node(GraphNode::new(OpKind::MatMul, "fc1", vec![x, w1], vec![h1])).expect("fc1");
    graph.add_node(GraphNode::new(OpKind::Relu, "relu1", vec![h1], vec![h2])).expect("relu1");
    graph.add_node(GraphNode::new(norm, "ln1", vec![h2], vec![h3])).expect("ln1");
    graph
        .add_node(GraphNode::new(OpKind::MultiHeadAttention, "attn1", vec![h3], vec![h4]).with_attr("num_heads", AttrValue::Int(2)))
        .expect("attn1");
    graph.add_node(GraphNode::new(OpKind::MatMul, "fc2", vec![h4, w2], vec![h5])).expect("fc2");
    graph.add_node(GraphNode::new(OpKind::Gelu, "gelu1", vec![h5], vec![out])).expect("gelu1");
    graph.mark_output(out).expect("output is registered");
    graph
}

#[test]
fn test_transformer_block_standard_fusion() {
    let mut graph = transformer_block(OpKind::LayerNorm);
    let mut compiler = ModelCompiler::with_level(2);
    let stats = compiler.compile(&mut graph).expect("compilation should succeed");

    let kinds: Vec<OpKind> = graph.nodes().iter().map(|n| n.op_kind).collect();
    assert_eq!(
        kinds,
        vec![OpKind::Constant, OpKind::FusedMatMulRelu, OpKind::FusedLayerNormAttention, OpKind::FusedMatMulGelu]
    );
    assert_eq!(stats.original_nodes, 7);
    assert_eq!(stats.optimized_nodes, 4);
    assert_eq!(stats.nodes_fused, 3);
    let attention = &graph.nodes()[2];
    assert_eq!(attention.name, "fused_ln1_attn1");
    assert_eq!(attention.attr_int("num_heads"), Some(2));
    assert!(compiler.export_stats().contains("Graph Reduction:       42.9%"));
}

#[test]
fn test_rms_norm_attention_needs_level_three() {
    let mut standard = transformer_block(OpKind::RmsNorm);
    ModelCompiler::with_level(2).compile(&mut standard).expect("compilation should succeed");
    assert!(standard.nodes().iter().any(|n| n.op_kind == OpKind::RmsNorm));

    let mut experimental = transformer_block(OpKind::RmsNorm);
    let stats = ModelCompiler::with_level(3).compile(&mut experimental).expect("compilation should succeed");
    assert!(experimental.nodes().iter().any(|n| n.op_kind == OpKind::FusedRmsNormAttention));
    assert_eq!(stats.nodes_fused, 3);
}

#[test]
fn test_matmul_layernorm_gelu_triple_at_level_three() {
    let mut graph = ComputationalGraph::new();
    let x = graph.add_input(square("x"));
    let w = graph.add_input(square("w"));
    let h = graph.add_tensor(square("h"));
    let n = graph.add_tensor(square("n"));
    let y = graph.add_tensor(square("y"));
    graph.add_node(GraphNode::new(OpKind::MatMul, "proj", vec![x, w], vec![h])).expect("proj");
    graph.add_node(GraphNode::new(OpKind::LayerNorm, "norm", vec![h], vec![n])).expect("norm");
    graph.add_node(GraphNode::new(OpKind::Gelu, "act", vec![n], vec![y])).expect("act");
    graph.mark_output(y).expect("y is registered");

    let stats = ModelCompiler::with_level(3).compile(&mut graph).expect("compilation should succeed");
    assert_eq!(graph.node_count(), 1);
    assert_eq!(graph.nodes()[0].op_kind, OpKind::FusedMatMulLayerNormGelu);
    assert_eq!(graph.nodes()[0].name, "fused_proj_norm_act");
    assert_eq!(stats.nodes_fused, 2);
}
