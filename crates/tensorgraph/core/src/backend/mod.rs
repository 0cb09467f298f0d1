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


//! Backend registry and per-call value store
//!
//! A registry is an explicit table from operation kind to handler,
//! constructed by the caller and injected into a dispatcher. Several
//! registries with different backends can coexist in one process.

pub mod reference;

use crate::error::{GraphError, GraphResult};
use crate::node::GraphNode;
use crate::ops::OpKind;
use crate::tensor::{TensorId, TensorValue};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Tensor values materialized during one execution call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValueStore {
    values: HashMap<TensorId, TensorValue>,
}

impl ValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: TensorId, value: TensorValue) {
        self.values.insert(id, value);
    }

    pub fn get(&self, id: TensorId) -> Option<&TensorValue> {
        self.values.get(&id)
    }

    pub fn contains(&self, id: TensorId) -> bool {
        self.values.contains_key(&id)
    }

    pub fn remove(&mut self, id: TensorId) -> Option<TensorValue> {
        self.values.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Values of `node`'s inputs, in input order
    pub fn inputs_for(&self, node: &GraphNode) -> GraphResult<Vec<&TensorValue>> {
        node.inputs
            .iter()
            .map(|id| self.values.get(id).ok_or(GraphError::MissingInput { node: node.id, tensor: *id }))
            .collect()
    }
}

impl FromIterator<(TensorId, TensorValue)> for ValueStore {
    fn from_iter<I: IntoIterator<Item = (TensorId, TensorValue)>>(iter: I) -> Self {
        Self { values: iter.into_iter().collect() }
    }
}

/// Handler executing one node against a value store
///
/// Handlers must be reentrant: a dispatcher may invoke the same handler
/// from several threads, each with its own store.
pub trait OpHandler: Send + Sync {
    fn execute(&self, node: &GraphNode, store: &mut ValueStore) -> GraphResult<()>;
}

impl<F> OpHandler for F
where
    F: Fn(&GraphNode, &mut ValueStore) -> GraphResult<()> + Send + Sync,
{
    fn execute(&self, node: &GraphNode, store: &mut ValueStore) -> GraphResult<()> {
        self(node, store)
    }
}

/// Channel order a backend prefers for image tensors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChannelOrder {
    #[default]
    ChannelsFirst,
    ChannelsLast,
}

/// Memory order preferences of a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LayoutPreference {
    pub channel_order: ChannelOrder,
    /// Store matrix-multiply weights column-major
    pub column_major_weights: bool,
}

/// Table of handlers keyed by operation kind and by custom op name
#[derive(Clone)]
pub struct BackendRegistry {
    name: String,
    handlers: HashMap<OpKind, Arc<dyn OpHandler>>,
    custom: HashMap<String, Arc<dyn OpHandler>>,
    layout: LayoutPreference,
}

impl BackendRegistry {
    /// Create an empty registry
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handlers: HashMap::new(),
            custom: HashMap::new(),
            layout: LayoutPreference::default(),
        }
    }

    /// Registry populated with the reference CPU kernels
    pub fn reference_cpu() -> Self {
        let mut registry = Self::new("reference-cpu");
        reference::register(&mut registry);
        registry
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn register(&mut self, kind: OpKind, handler: impl OpHandler + 'static) {
        self.handlers.insert(kind, Arc::new(handler));
    }

    /// Register a handler for `Custom` nodes naming `name` in their `custom_op` attribute
    pub fn register_custom(&mut self, name: impl Into<String>, handler: impl OpHandler + 'static) {
        self.custom.insert(name.into(), Arc::new(handler));
    }

    pub fn unregister(&mut self, kind: OpKind) -> bool {
        self.handlers.remove(&kind).is_some()
    }

    pub fn supports(&self, kind: OpKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    pub fn set_layout_preference(&mut self, layout: LayoutPreference) {
        self.layout = layout;
    }

    pub fn layout_preference(&self) -> LayoutPreference {
        self.layout
    }

    /// Handler for `node`: its named custom handler first, then its kind's handler
    pub fn resolve(&self, node: &GraphNode) -> GraphResult<&dyn OpHandler> {
        if let Some(handler) = node.custom_op().and_then(|name| self.custom.get(name)) {
            return Ok(handler.as_ref());
        }
        self.handlers
            .get(&node.op_kind)
            .map(|handler| handler.as_ref())
            .ok_or(GraphError::UnknownOp { node: node.id, op: node.op_kind })
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.handlers.keys().collect();
        kinds.sort();
        f.debug_struct("BackendRegistry")
            .field("name", &self.name)
            .field("kinds", &kinds)
            .field("custom", &self.custom.keys().collect::<Vec<_>>())
            .field("layout", &self.layout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{AttrValue, CUSTOM_OP_ATTR, NodeId};

    fn noop(_: &GraphNode, _: &mut ValueStore) -> GraphResult<()> {
        Ok(())
    }

    #[test]
    fn test_resolve_unknown_kind() {
        let registry = BackendRegistry::new("empty");
        let node = GraphNode::new(OpKind::MatMul, "mm", vec![], vec![]);
        assert!(matches!(registry.resolve(&node), Err(GraphError::UnknownOp { op: OpKind::MatMul, .. })));
    }

    #[test]
    fn test_custom_handler_takes_precedence() {
        let mut registry = BackendRegistry::new("test");
        registry.register_custom("sparse_matmul", |node: &GraphNode, store: &mut ValueStore| -> GraphResult<()> {
            store.insert(node.outputs[0], TensorValue::scalar(1.0));
            Ok(())
        });
        let node = GraphNode::new(OpKind::Custom, "sparse", vec![], vec![TensorId(0)])
            .with_attr(CUSTOM_OP_ATTR, AttrValue::Str("sparse_matmul".into()));
        let mut store = ValueStore::new();
        registry.resolve(&node).unwrap().execute(&node, &mut store).unwrap();
        assert_eq!(store.get(TensorId(0)), Some(&TensorValue::scalar(1.0)));
    }

    #[test]
    fn test_custom_without_handler_is_unknown() {
        let mut registry = BackendRegistry::new("test");
        registry.register(OpKind::MatMul, noop);
        let node = GraphNode::new(OpKind::Custom, "c", vec![], vec![]).with_attr(CUSTOM_OP_ATTR, AttrValue::Str("missing".into()));
        assert!(registry.resolve(&node).is_err());
    }

    #[test]
    fn test_inputs_for_reports_missing_tensor() {
        let mut store = ValueStore::new();
        store.insert(TensorId(0), TensorValue::scalar(1.0));
        let mut node = GraphNode::new(OpKind::Add, "add", vec![TensorId(0), TensorId(1)], vec![]);
        node.id = NodeId(4);
        assert_eq!(store.inputs_for(&node).unwrap_err(), GraphError::MissingInput { node: NodeId(4), tensor: TensorId(1) });
    }

    #[test]
    fn test_unregister() {
        let mut registry = BackendRegistry::new("test");
        registry.register(OpKind::Relu, noop);
        assert!(registry.supports(OpKind::Relu));
        assert!(registry.unregister(OpKind::Relu));
        assert!(!registry.supports(OpKind::Relu));
    }
}
