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

//! Randomized properties of the optimizer over generated graphs
//!
//! Graphs are random DAGs of shape-preserving operations on 3x3 matrices, so
//! every reference kernel succeeds and any difference between optimized and
//! unoptimized execution is a miscompilation. Nodes are added in a shuffled
//! order and carry random kernel attributes.

mod common;

use common::{assert_outputs_match, desc};
use proptest::prelude::*;
use std::collections::HashSet;
use tensorgraph_compiler::optimizer::OptimizationPipeline;
use tensorgraph_compiler::optimizer::analysis::live_nodes;
use tensorgraph_compiler::optimizer::passes::FUSION_RULES;
use tensorgraph_compiler::{ExecutionDispatcher, ModelCompiler, OptimizationConfig};
use tensorgraph_core::{AttrValue, Attributes, BackendRegistry, ComputationalGraph, GraphNode, OpKind, TensorId, TensorValue};

const KINDS: &[OpKind] = &[
    OpKind::Relu,
    OpKind::Gelu,
    OpKind::Silu,
    OpKind::Identity,
    OpKind::Softmax,
    OpKind::LayerNorm,
    OpKind::RmsNorm,
    OpKind::Attention,
    OpKind::MultiHeadAttention,
    OpKind::MatMul,
    OpKind::Add,
    OpKind::Mul,
];

fn is_binary(kind: OpKind) -> bool {
    matches!(kind, OpKind::MatMul | OpKind::Add | OpKind::Mul)
}

#[derive(Debug, Clone)]
struct NodeSpec {
    kind: usize,
    lhs: usize,
    rhs: usize,
    output: bool,
    attributes: Attributes,
}

#[derive(Debug, Clone)]
struct GraphSpec {
    inputs: Vec<Vec<f32>>,
    constants: Vec<Vec<f32>>,
    nodes: Vec<NodeSpec>,
    /// Order in which the nodes are added to the graph
    insertion: Vec<usize>,
}

/// Optional `epsilon`, `gamma` and `num_heads`; head counts divide the width of 3
fn attributes() -> impl Strategy<Value = Attributes> {
    (
        prop::option::weighted(0.3, 1e-3f64..5.0),
        prop::option::weighted(0.3, 0.5f64..2.0),
        prop::option::weighted(0.3, prop::sample::select(vec![1i64, 3])),
    )
        .prop_map(|(epsilon, gamma, heads)| {
            let mut attributes = Attributes::new();
            if let Some(epsilon) = epsilon {
                attributes.insert("epsilon".to_string(), AttrValue::Float(epsilon));
            }
            if let Some(gamma) = gamma {
                attributes.insert("gamma".to_string(), AttrValue::Float(gamma));
            }
            if let Some(heads) = heads {
                attributes.insert("num_heads".to_string(), AttrValue::Int(heads));
            }
            attributes
        })
}

fn matrix_data() -> impl Strategy<Value = Vec<f32>> {
    prop::collection::vec(-2.0f32..2.0, 9)
}

fn node_spec() -> impl Strategy<Value = NodeSpec> {
    (0..KINDS.len(), any::<usize>(), any::<usize>(), prop::bool::weighted(0.2), attributes()).prop_map(|(kind, lhs, rhs, output, attributes)| {
        NodeSpec {
            kind,
            lhs,
            rhs,
            output,
            attributes,
        }
    })
}

fn graph_spec() -> impl Strategy<Value = GraphSpec> {
    (
        prop::collection::vec(matrix_data(), 1..3),
        prop::collection::vec(matrix_data(), 0..3),
        prop::collection::vec(node_spec(), 1..12),
    )
        .prop_flat_map(|(inputs, constants, nodes)| {
            let insertion = Just((0..nodes.len()).collect::<Vec<usize>>()).prop_shuffle();
            (Just(inputs), Just(constants), Just(nodes), insertion)
        })
        .prop_map(|(inputs, constants, nodes, insertion)| GraphSpec {
            inputs,
            constants,
            nodes,
            insertion,
        })
}

fn value(data: &[f32]) -> TensorValue {
    TensorValue::new(vec![3, 3], data.to_vec()).expect("nine elements")
}

/// Build the graph and the feeds for its inputs
fn build(spec: &GraphSpec) -> (ComputationalGraph, Vec<(TensorId, TensorValue)>) {
    let mut graph = ComputationalGraph::new();
    let mut available = Vec::new();
    let mut feeds = Vec::new();

    for (i, data) in spec.inputs.iter().enumerate() {
        let id = graph.add_input(desc(&format!("in{i}"), vec![3, 3]));
        available.push(id);
        feeds.push((id, value(data)));
    }
    for (i, data) in spec.constants.iter().enumerate() {
        let id = graph.add_constant(&format!("lit{i}"), value(data)).expect("literal");
        available.push(id);
    }
    // Tensors first so nodes can be added in any order
    let outputs: Vec<TensorId> = (0..spec.nodes.len()).map(|i| graph.add_tensor(desc(&format!("t{i}"), vec![3, 3]))).collect();
    let mut pending = Vec::with_capacity(spec.nodes.len());
    for (i, node) in spec.nodes.iter().enumerate() {
        let kind = KINDS[node.kind];
        let lhs = available[node.lhs % available.len()];
        let inputs = if is_binary(kind) { vec![lhs, available[node.rhs % available.len()]] } else { vec![lhs] };
        let mut built = GraphNode::new(kind, format!("n{i}"), inputs, vec![outputs[i]]);
        built.attributes = node.attributes.clone();
        pending.push(Some(built));
        if node.output || i + 1 == spec.nodes.len() {
            graph.mark_output(outputs[i]).expect("output is registered");
        }
        available.push(outputs[i]);
    }
    for &index in &spec.insertion {
        if let Some(node) = pending[index].take() {
            graph.add_node(node).expect("node references known tensors");
        }
    }
    (graph, feeds)
}

fn compiled(graph: &ComputationalGraph, level: u8) -> ComputationalGraph {
    let mut graph = graph.clone();
    ModelCompiler::with_level(level).compile(&mut graph).expect("generated graphs compile");
    graph
}

/// One fusion rule instantiated as a chain over 3x3 matrices
#[derive(Debug, Clone)]
struct ChainSpec {
    rule: usize,
    members: Vec<Attributes>,
    insertion: Vec<usize>,
    x: Vec<f32>,
    w: Vec<f32>,
}

fn chain_spec() -> impl Strategy<Value = ChainSpec> {
    (
        any::<usize>(),
        prop::collection::vec(attributes(), 3),
        Just(vec![0usize, 1, 2]).prop_shuffle(),
        matrix_data(),
        matrix_data(),
    )
        .prop_map(|(rule, members, insertion, x, w)| ChainSpec { rule, members, insertion, x, w })
}

/// Build the chain, returning the graph, its feeds and whether members disagree on an attribute
fn build_chain(spec: &ChainSpec, pattern: &[OpKind]) -> (ComputationalGraph, Vec<(TensorId, TensorValue)>, bool) {
    let mut graph = ComputationalGraph::new();
    let x = graph.add_input(desc("x", vec![3, 3]));
    let w = graph.add_input(desc("w", vec![3, 3]));
    let outputs: Vec<TensorId> = (0..pattern.len()).map(|i| graph.add_tensor(desc(&format!("t{i}"), vec![3, 3]))).collect();

    let mut pending: Vec<Option<GraphNode>> = Vec::new();
    for (i, kind) in pattern.iter().enumerate() {
        let inputs = match (i, kind) {
            (0, OpKind::MatMul) => vec![x, w],
            (0, _) => vec![x],
            _ => vec![outputs[i - 1]],
        };
        let mut node = GraphNode::new(*kind, format!("m{i}"), inputs, vec![outputs[i]]);
        node.attributes = spec.members[i].clone();
        pending.push(Some(node));
    }
    for &index in &spec.insertion {
        if let Some(node) = pending.get_mut(index).and_then(Option::take) {
            graph.add_node(node).expect("chain references known tensors");
        }
    }
    graph.mark_output(outputs[pattern.len() - 1]).expect("output is registered");

    let members = &spec.members[..pattern.len()];
    let conflict = members.iter().enumerate().any(|(i, left)| {
        members[i + 1..]
            .iter()
            .any(|right| left.iter().any(|(key, value)| right.get(key).is_some_and(|other| other != value)))
    });
    (graph, vec![(x, value(&spec.x)), (w, value(&spec.w))], conflict)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Optimized execution produces the outputs of plain execution
    #[test]
    fn test_optimization_is_sound(spec in graph_spec(), level in 0u8..=3) {
        let (graph, feeds) = build(&spec);
        let dispatcher = ExecutionDispatcher::new(BackendRegistry::reference_cpu(), OptimizationConfig::with_level(level));
        let expected = dispatcher.run(&graph, feeds.clone()).expect("reference run");

        let mut optimized = graph.clone();
        let actual = dispatcher.execute(&mut optimized, feeds).expect("optimized run");
        prop_assert!(optimized.node_count() <= graph.node_count());
        assert_outputs_match(&expected, &actual);
    }

    /// Fusing a chain whose members carry their own attributes preserves its result
    #[test]
    fn test_fusion_with_member_attributes_is_sound(spec in chain_spec(), level in 2u8..=3) {
        let rules: Vec<_> = FUSION_RULES.iter().filter(|rule| !rule.pattern.contains(&OpKind::Conv2d)).collect();
        let rule = rules[spec.rule % rules.len()];
        let (graph, feeds, conflict) = build_chain(&spec, rule.pattern);

        let dispatcher = ExecutionDispatcher::new(BackendRegistry::reference_cpu(), OptimizationConfig::with_level(level));
        let expected = dispatcher.run(&graph, feeds.clone()).expect("reference run");
        let mut optimized = graph.clone();
        let actual = dispatcher.execute(&mut optimized, feeds).expect("optimized run");
        assert_outputs_match(&expected, &actual);

        if level >= rule.min_level && !conflict {
            prop_assert_eq!(optimized.node_count(), 1);
            prop_assert_eq!(optimized.nodes()[0].op_kind, rule.fused);
        }
    }

    /// Running the pipeline over its own output changes nothing
    #[test]
    fn test_optimization_is_idempotent(spec in graph_spec(), level in 0u8..=3) {
        let (graph, _) = build(&spec);
        let once = compiled(&graph, level);
        let outcome = OptimizationPipeline::for_level(OptimizationConfig::with_level(level))
            .run(&once)
            .expect("optimized graphs stay valid");
        prop_assert_eq!(outcome.graph.nodes(), once.nodes());
        prop_assert_eq!(outcome.graph.tensors(), once.tensors());
        prop_assert_eq!(outcome.stats.nodes_fused + outcome.stats.constants_folded + outcome.stats.dead_nodes_removed, 0);
    }

    /// Every surviving node contributes to an output and every output survives
    #[test]
    fn test_dead_code_elimination_is_minimal(spec in graph_spec(), level in 1u8..=3) {
        let (graph, _) = build(&spec);
        let optimized = compiled(&graph, level);
        prop_assert_eq!(live_nodes(&optimized).len(), optimized.node_count());
        prop_assert_eq!(optimized.graph_outputs(), graph.graph_outputs());
        for output in optimized.graph_outputs() {
            prop_assert!(optimized.producer_of(*output).is_some());
        }
    }

    /// No node reads a tensor that fusion removed
    #[test]
    fn test_fusion_never_drops_a_read_tensor(spec in graph_spec(), level in 2u8..=3) {
        let (graph, _) = build(&spec);
        let optimized = compiled(&graph, level);
        let producers = optimized.producers();
        for node in optimized.nodes() {
            for input in &node.inputs {
                prop_assert!(optimized.tensor(*input).is_some());
                prop_assert!(optimized.graph_inputs().contains(input) || producers.contains_key(input));
            }
        }
        // Removed tensors are never outputs
        let kept: HashSet<TensorId> = optimized.tensors().keys().copied().collect();
        for id in graph.tensors().keys() {
            if !kept.contains(id) {
                prop_assert!(!graph.graph_outputs().contains(id));
            }
        }
    }

    /// When every intermediate is a graph output nothing may be fused
    #[test]
    fn test_escaping_intermediates_block_fusion(spec in graph_spec(), level in 2u8..=3) {
        let mut spec = spec;
        for node in &mut spec.nodes {
            node.output = true;
        }
        let (graph, _) = build(&spec);
        let mut optimized = graph.clone();
        let stats = ModelCompiler::with_level(level).compile(&mut optimized).expect("generated graphs compile");
        prop_assert_eq!(stats.nodes_fused, 0);
        prop_assert!(optimized.nodes().iter().all(|n| !n.op_kind.is_fused()));
    }

    /// After folding no pure node has only literal inputs
    #[test]
    fn test_constant_folding_is_complete(spec in graph_spec(), level in 1u8..=3) {
        let (graph, _) = build(&spec);
        let optimized = compiled(&graph, level);
        let literal: HashSet<TensorId> = optimized
            .nodes()
            .iter()
            .filter(|n| n.is_constant())
            .flat_map(|n| n.outputs.iter().copied())
            .collect();
        for node in optimized.nodes() {
            let foldable = !node.is_constant()
                && node.op_kind.is_pure()
                && !node.inputs.is_empty()
                && node.inputs.iter().all(|input| literal.contains(input));
            prop_assert!(!foldable, "{} was not folded", node.name);
        }
    }

    /// Compiling equal graphs yields equal results
    #[test]
    fn test_compilation_is_deterministic(spec in graph_spec(), level in 0u8..=3) {
        let (graph, _) = build(&spec);
        let first = compiled(&graph, level);
        let second = compiled(&graph, level);
        prop_assert_eq!(first.nodes(), second.nodes());
        prop_assert_eq!(first.execution_order(), second.execution_order());
    }
}
