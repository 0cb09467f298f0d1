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

//! Operator fusion pass
//!
//! Fusion is driven by [`FUSION_RULES`]: a pattern of base kinds, the fused
//! kind it collapses into and the lowest optimization level enabling it.
//! Adding a fused kernel is a table edit plus a decomposition entry on
//! [`OpKind`].
//!
//! A chain is matched syntactically from its head: every member but the last
//! has exactly one output, and the next member reads exactly that tensor and
//! nothing else. Before a chain is rewritten each interior tensor is checked
//! against the whole graph. If anything outside the chain reads it, or it is
//! a graph output, the fusion would drop a value still needed elsewhere, so
//! the candidate is rejected with a `FusionUnsound` diagnostic.

use crate::config::OptimizationConfig;
use crate::optimizer::framework::{OptimizationPass, OptimizationResult, OptimizationWarning, PassCounters};
use std::collections::{BTreeSet, HashMap, HashSet};
use tensorgraph_core::{Attributes, ComputationalGraph, GraphError, GraphNode, GraphResult, NodeId, OpKind, TensorId, component_attr_key};
use tracing::{debug, warn};

/// A pattern of base kinds and the fused kind replacing it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FusionRule {
    pub pattern: &'static [OpKind],
    pub fused: OpKind,
    pub min_level: u8,
}

impl FusionRule {
    pub const fn new(pattern: &'static [OpKind], fused: OpKind, min_level: u8) -> Self {
        Self { pattern, fused, min_level }
    }
}

/// Fusion rules, longest patterns first
pub const FUSION_RULES: &[FusionRule] = &[
    FusionRule::new(&[OpKind::Conv2d, OpKind::BatchNorm, OpKind::Relu], OpKind::FusedConvBatchNormRelu, 2),
    FusionRule::new(&[OpKind::MatMul, OpKind::LayerNorm, OpKind::Gelu], OpKind::FusedMatMulLayerNormGelu, 3),
    FusionRule::new(&[OpKind::MatMul, OpKind::Relu], OpKind::FusedMatMulRelu, 2),
    FusionRule::new(&[OpKind::MatMul, OpKind::Gelu], OpKind::FusedMatMulGelu, 2),
    FusionRule::new(&[OpKind::LayerNorm, OpKind::MultiHeadAttention], OpKind::FusedLayerNormAttention, 2),
    FusionRule::new(&[OpKind::LayerNorm, OpKind::Attention], OpKind::FusedLayerNormAttention, 2),
    FusionRule::new(&[OpKind::MatMul, OpKind::Silu], OpKind::FusedMatMulSilu, 3),
    FusionRule::new(&[OpKind::RmsNorm, OpKind::MultiHeadAttention], OpKind::FusedRmsNormAttention, 3),
    FusionRule::new(&[OpKind::RmsNorm, OpKind::Attention], OpKind::FusedRmsNormAttention, 3),
];

/// Statistics about fusion across invocations
#[derive(Debug, Clone, Default)]
pub struct FusionStats {
    pub chains_fused: usize,
    pub nodes_absorbed: usize,
    pub rounds: usize,
    pub unsound_candidates: usize,
    pub attribute_conflicts: usize,
}

/// Operator fusion restricted to the rules up to a given level
#[derive(Debug)]
pub struct OperatorFusion {
    name: &'static str,
    level: u8,
    stats: FusionStats,
}

/// One chain selected for rewriting during a round
#[derive(Debug)]
struct FusionPlan {
    /// Node positions, head first
    chain: Vec<usize>,
    interior: Vec<TensorId>,
    node: GraphNode,
}

/// Diagnostics already reported during one invocation
#[derive(Debug, Default)]
struct Diagnostics {
    unsound: HashSet<TensorId>,
    conflicts: HashSet<NodeId>,
    warnings: Vec<OptimizationWarning>,
    blocked: usize,
}

impl OperatorFusion {
    /// Level 2 rules
    pub fn standard() -> Self {
        Self {
            name: "operator_fusion",
            level: 2,
            stats: FusionStats::default(),
        }
    }

    /// Level 2 and level 3 rules
    pub fn experimental() -> Self {
        Self {
            name: "experimental_fusion",
            level: 3,
            stats: FusionStats::default(),
        }
    }

    pub fn stats(&self) -> &FusionStats {
        &self.stats
    }

    pub fn rules(&self) -> impl Iterator<Item = &'static FusionRule> + '_ {
        FUSION_RULES.iter().filter(move |rule| rule.min_level <= self.level)
    }

    /// Select non-overlapping chains in a left-to-right sweep
    fn plan_round(&mut self, graph: &ComputationalGraph, diagnostics: &mut Diagnostics) -> Vec<FusionPlan> {
        let nodes = graph.nodes();
        let fan_out = graph.fan_out();
        let consumers = graph.consumers();
        let mut claimed: HashSet<usize> = HashSet::new();
        let mut plans = Vec::new();

        let rules: Vec<&'static FusionRule> = self.rules().collect();

        for head in 0..nodes.len() {
            if claimed.contains(&head) {
                continue;
            }
            for rule in rules.iter().copied() {
                let Some(chain) = match_chain(nodes, head, rule.pattern, &consumers) else {
                    continue;
                };
                if chain.iter().any(|position| claimed.contains(position)) {
                    continue;
                }

                let interior: Vec<TensorId> = chain[..chain.len() - 1].iter().map(|position| nodes[*position].outputs[0]).collect();
                let unsound = interior
                    .iter()
                    .find_map(|tensor| check_fan_out(*tensor, &fan_out, graph.graph_outputs()).err().map(|err| (*tensor, err)));
                if let Some((tensor, err)) = unsound {
                    if diagnostics.unsound.insert(tensor) {
                        self.stats.unsound_candidates += 1;
                        diagnostics.blocked += 1;
                        debug!(head = %nodes[head].id, fused = %rule.fused, "fusion blocked: {err}");
                        diagnostics
                            .warnings
                            .push(OptimizationWarning::new(self.name, format!("{} not formed at {}: {err}", rule.fused, nodes[head].id)));
                    }
                    continue;
                }

                let Some(attributes) = union_attributes(chain.iter().map(|position| &nodes[*position])) else {
                    if diagnostics.conflicts.insert(nodes[head].id) {
                        self.stats.attribute_conflicts += 1;
                        diagnostics.warnings.push(OptimizationWarning::new(
                            self.name,
                            format!("{} not formed at {}: conflicting attributes", rule.fused, nodes[head].id),
                        ));
                    }
                    continue;
                };

                let node = fused_node(nodes, &chain, rule.fused, attributes);
                claimed.extend(chain.iter().copied());
                plans.push(FusionPlan { chain, interior, node });
                break;
            }
        }
        plans
    }
}

/// Follow `pattern` from `head` through sole-input consumers
fn match_chain(nodes: &[GraphNode], head: usize, pattern: &[OpKind], consumers: &HashMap<TensorId, Vec<usize>>) -> Option<Vec<usize>> {
    if nodes[head].op_kind != pattern[0] || nodes[head].custom_op().is_some() {
        return None;
    }
    let mut chain = vec![head];
    let mut current = head;
    for kind in &pattern[1..] {
        let node = &nodes[current];
        if node.outputs.len() != 1 {
            return None;
        }
        let tensor = node.outputs[0];
        let next = consumers.get(&tensor)?.iter().copied().find(|position| {
            let candidate = &nodes[*position];
            candidate.op_kind == *kind && candidate.custom_op().is_none() && candidate.inputs.len() == 1 && candidate.inputs[0] == tensor
        })?;
        chain.push(next);
        current = next;
    }
    Some(chain)
}

/// Fail unless `tensor` is read by exactly one node slot and is not a graph output
pub fn check_fan_out(tensor: TensorId, fan_out: &HashMap<TensorId, usize>, graph_outputs: &BTreeSet<TensorId>) -> GraphResult<()> {
    let readers = fan_out.get(&tensor).copied().unwrap_or(0) + usize::from(graph_outputs.contains(&tensor));
    if readers == 1 {
        Ok(())
    } else {
        Err(GraphError::FusionUnsound { tensor, fan_out: readers })
    }
}

/// Union of the chain's attributes, `None` when two members disagree on a key
fn union_attributes<'a>(chain: impl IntoIterator<Item = &'a GraphNode>) -> Option<Attributes> {
    let mut merged = Attributes::new();
    for node in chain {
        for (key, value) in &node.attributes {
            match merged.get(key) {
                Some(existing) if existing != value => return None,
                Some(_) => {}
                None => {
                    merged.insert(key.clone(), value.clone());
                }
            }
        }
    }
    Some(merged)
}

/// Fused node carrying the union plus every member's attributes scoped to its component
fn fused_node(nodes: &[GraphNode], chain: &[usize], kind: OpKind, mut attributes: Attributes) -> GraphNode {
    for (index, position) in chain.iter().enumerate() {
        for (key, value) in &nodes[*position].attributes {
            attributes.insert(component_attr_key(index, key), value.clone());
        }
    }
    let head = &nodes[chain[0]];
    let tail = &nodes[chain[chain.len() - 1]];
    let names: Vec<&str> = chain.iter().map(|position| nodes[*position].name.as_str()).collect();
    GraphNode {
        id: head.id,
        op_kind: kind,
        name: format!("fused_{}", names.join("_")),
        inputs: head.inputs.clone(),
        outputs: tail.outputs.clone(),
        attributes,
    }
}

/// Rebuild the node list with each chain collapsed into its fused node
fn apply(graph: &ComputationalGraph, plans: Vec<FusionPlan>) -> ComputationalGraph {
    let mut fused_at: HashMap<usize, GraphNode> = HashMap::new();
    let mut absorbed: HashSet<usize> = HashSet::new();
    let mut dropped: HashSet<TensorId> = HashSet::new();
    for plan in plans {
        absorbed.extend(plan.chain[1..].iter().copied());
        dropped.extend(plan.interior);
        fused_at.insert(plan.chain[0], plan.node);
    }

    let nodes: Vec<GraphNode> = graph
        .nodes()
        .iter()
        .enumerate()
        .filter_map(|(position, node)| match fused_at.remove(&position) {
            Some(fused) => Some(fused),
            None if absorbed.contains(&position) => None,
            None => Some(node.clone()),
        })
        .collect();

    let mut next = graph.rebuild(nodes);
    next.retain_tensors(|id, _| !dropped.contains(&id));
    next
}

impl OptimizationPass for OperatorFusion {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "Collapses producer-consumer chains into fused kernels"
    }

    fn can_optimize(&self, graph: &ComputationalGraph, _config: &OptimizationConfig) -> bool {
        graph.node_count() >= 2
    }

    fn optimize(&mut self, graph: ComputationalGraph, config: &OptimizationConfig) -> GraphResult<OptimizationResult<ComputationalGraph>> {
        let mut graph = graph;
        let mut diagnostics = Diagnostics::default();
        let mut absorbed = 0;
        let mut rounds = 0;

        loop {
            if rounds == config.max_fusion_rounds {
                warn!(pass = self.name, rounds, "fusion round limit reached");
                break;
            }
            rounds += 1;
            self.stats.rounds += 1;

            let plans = self.plan_round(&graph, &mut diagnostics);
            if plans.is_empty() {
                break;
            }
            for plan in &plans {
                debug!(fused = %plan.node.op_kind, name = %plan.node.name, "fused chain");
                absorbed += plan.chain.len() - 1;
            }
            self.stats.chains_fused += plans.len();
            graph = apply(&graph, plans);
        }

        self.stats.nodes_absorbed += absorbed;
        Ok(OptimizationResult {
            output: graph,
            changed: absorbed > 0,
            counters: PassCounters {
                nodes_fused: absorbed,
                fusions_blocked: diagnostics.blocked,
                ..PassCounters::default()
            },
            warnings: diagnostics.warnings,
        })
    }
}
