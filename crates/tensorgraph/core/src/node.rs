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


//! Graph nodes and their literal attributes

use crate::ops::OpKind;
use crate::tensor::{TensorId, TensorValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Attribute key holding the literal of a `Constant` node
pub const VALUE_ATTR: &str = "value";

/// Attribute key naming the registry handler of a `Custom` node
pub const CUSTOM_OP_ATTR: &str = "custom_op";

/// Key under which a fused node records attribute `key` of component `index`
pub fn component_attr_key(index: usize, key: &str) -> String {
    format!("{index}/{key}")
}

fn split_component_key(key: &str) -> Option<(usize, &str)> {
    let (index, rest) = key.split_once('/')?;
    Some((index.parse().ok()?, rest))
}

/// Identifier of a node within one graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Literal attribute value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Int(i64),
    Float(f64),
    Str(String),
    Ints(Vec<i64>),
    Floats(Vec<f64>),
    Tensor(TensorValue),
}

/// Ordered attribute map
pub type Attributes = BTreeMap<String, AttrValue>;

/// Node in a computational graph
#[derive(Debug, Clone, PartialEq)]
pub struct GraphNode {
    /// Assigned by the graph when the node is added
    pub id: NodeId,
    pub op_kind: OpKind,
    /// Diagnostic name, not semantically significant
    pub name: String,
    pub inputs: Vec<TensorId>,
    pub outputs: Vec<TensorId>,
    pub attributes: Attributes,
}

impl GraphNode {
    /// Create a node; the id is replaced when the node is added to a graph
    pub fn new(op_kind: OpKind, name: impl Into<String>, inputs: Vec<TensorId>, outputs: Vec<TensorId>) -> Self {
        Self {
            id: NodeId(0),
            op_kind,
            name: name.into(),
            inputs,
            outputs,
            attributes: Attributes::new(),
        }
    }

    /// Literal-producing node
    pub fn constant(name: impl Into<String>, output: TensorId, value: TensorValue) -> Self {
        Self::new(OpKind::Constant, name, Vec::new(), vec![output]).with_attr(VALUE_ATTR, AttrValue::Tensor(value))
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: AttrValue) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// The literal carried by a constant node
    pub fn literal(&self) -> Option<&TensorValue> {
        if !self.inputs.is_empty() {
            return None;
        }
        match self.attributes.get(VALUE_ATTR) {
            Some(AttrValue::Tensor(value)) => Some(value),
            _ => None,
        }
    }

    pub fn is_constant(&self) -> bool {
        self.op_kind == OpKind::Constant && self.literal().is_some()
    }

    pub fn custom_op(&self) -> Option<&str> {
        self.attr_str(CUSTOM_OP_ATTR)
    }

    /// The node as seen by component `index` of its fused kind
    ///
    /// When the node carries component-scoped keys, the view holds only that
    /// component's attributes with the scope stripped. A node without scoped
    /// keys shares all of its attributes with every component.
    pub fn component_view(&self, index: usize) -> GraphNode {
        let scoped = self.attributes.keys().any(|key| split_component_key(key).is_some());
        let attributes = if scoped {
            self.attributes
                .iter()
                .filter_map(|(key, value)| match split_component_key(key) {
                    Some((component, rest)) if component == index => Some((rest.to_string(), value.clone())),
                    _ => None,
                })
                .collect()
        } else {
            self.attributes.clone()
        };
        GraphNode {
            attributes,
            ..self.clone()
        }
    }

    pub fn attr_int(&self, key: &str) -> Option<i64> {
        match self.attributes.get(key) {
            Some(AttrValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    /// Float attribute; integer attributes are widened
    pub fn attr_float(&self, key: &str) -> Option<f64> {
        match self.attributes.get(key) {
            Some(AttrValue::Float(v)) => Some(*v),
            Some(AttrValue::Int(v)) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn attr_ints(&self, key: &str) -> Option<&[i64]> {
        match self.attributes.get(key) {
            Some(AttrValue::Ints(v)) => Some(v),
            _ => None,
        }
    }

    pub fn attr_str(&self, key: &str) -> Option<&str> {
        match self.attributes.get(key) {
            Some(AttrValue::Str(v)) => Some(v),
            _ => None,
        }
    }
}
