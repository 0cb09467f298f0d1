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

//! Execution dispatcher
//!
//! Walks a graph in topological order and hands each node to the handler the
//! injected registry resolves for it. Every call owns a fresh value store, so
//! one dispatcher can run the same optimized graph from several threads.

use crate::config::OptimizationConfig;
use crate::optimizer::ModelCompiler;
use crate::profiling::{ExecutionProfiler, ProfileReport};
use crate::stats::CompilationStats;
use parking_lot::Mutex;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Arc;
use tensorgraph_core::{BackendRegistry, ComputationalGraph, GraphError, GraphNode, GraphResult, KernelError, TensorId, TensorValue, ValueStore};
use tracing::{debug, instrument, trace};

/// Graph outputs produced by one execution call
pub type Outputs = BTreeMap<TensorId, TensorValue>;

/// Runs graphs against an injected backend registry
#[derive(Debug)]
pub struct ExecutionDispatcher {
    registry: Arc<BackendRegistry>,
    compiler: Mutex<ModelCompiler>,
}

impl ExecutionDispatcher {
    /// Create a dispatcher; the registry's layout preference overrides the one in `config`
    pub fn new(registry: BackendRegistry, config: OptimizationConfig) -> Self {
        Self::with_shared_registry(Arc::new(registry), config)
    }

    /// Create a dispatcher sharing a registry with other dispatchers
    pub fn with_shared_registry(registry: Arc<BackendRegistry>, mut config: OptimizationConfig) -> Self {
        config.layout = registry.layout_preference();
        Self {
            registry,
            compiler: Mutex::new(ModelCompiler::new(config)),
        }
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    /// Statistics of the last optimization this dispatcher performed
    pub fn compilation_stats(&self) -> CompilationStats {
        self.compiler.lock().stats().clone()
    }

    /// Optimize `graph` if it is not optimized yet
    pub fn prepare(&self, graph: &mut ComputationalGraph) -> GraphResult<()> {
        if !graph.is_optimized() {
            self.compiler.lock().compile(graph)?;
        }
        Ok(())
    }

    /// Optimize on first use, then run
    #[instrument(skip_all, fields(backend = self.registry.name()))]
    pub fn execute<I>(&self, graph: &mut ComputationalGraph, inputs: I) -> GraphResult<Outputs>
    where
        I: IntoIterator<Item = (TensorId, TensorValue)>,
    {
        self.prepare(graph)?;
        self.run(graph, inputs)
    }

    /// Run `graph` as it is, without optimizing it
    pub fn run<I>(&self, graph: &ComputationalGraph, inputs: I) -> GraphResult<Outputs>
    where
        I: IntoIterator<Item = (TensorId, TensorValue)>,
    {
        let mut store: ValueStore = inputs.into_iter().collect();
        self.dispatch(graph, &mut store, None)?;
        collect_outputs(graph, &mut store)
    }

    /// Run `graph` into a caller-owned store
    pub fn run_with_store(&self, graph: &ComputationalGraph, store: &mut ValueStore) -> GraphResult<()> {
        self.dispatch(graph, store, None)
    }

    /// Run `graph` while recording a profiling session
    pub fn run_profiled<I>(&self, graph: &ComputationalGraph, inputs: I, profiler: &mut ExecutionProfiler) -> GraphResult<(Outputs, ProfileReport)>
    where
        I: IntoIterator<Item = (TensorId, TensorValue)>,
    {
        let mut store: ValueStore = inputs.into_iter().collect();
        profiler.start_session();
        let dispatched = self.dispatch(graph, &mut store, Some(&mut *profiler));
        let session = profiler.end_session();
        dispatched?;

        let threshold = profiler.config().hotspot_threshold_percent;
        let report = session.map(|s| s.report(threshold)).unwrap_or_else(|| ProfileReport::from_profiles(&[], Default::default(), threshold));
        let outputs = collect_outputs(graph, &mut store)?;
        Ok((outputs, report))
    }

    fn dispatch(&self, graph: &ComputationalGraph, store: &mut ValueStore, mut profiler: Option<&mut ExecutionProfiler>) -> GraphResult<()> {
        let order: Cow<'_, [usize]> = match graph.execution_order() {
            Some(order) => Cow::Borrowed(order),
            None => Cow::Owned(graph.topological_order()?),
        };
        debug!(nodes = order.len(), cached = graph.execution_order().is_some(), "dispatching graph");

        for &position in order.iter() {
            let node = &graph.nodes()[position];
            let handler = self.registry.resolve(node)?;
            if let Some(missing) = node.inputs.iter().find(|id| !store.contains(**id)) {
                return Err(GraphError::MissingInput {
                    node: node.id,
                    tensor: *missing,
                });
            }

            trace!(node = %node.id, op = %node.op_kind, "executing node");
            if let Some(profiler) = profiler.as_deref_mut() {
                profiler.start_node(node);
            }
            handler.execute(node, store)?;
            if let Some(missing) = node.outputs.iter().find(|id| !store.contains(**id)) {
                return Err(GraphError::Kernel {
                    node: node.id,
                    op: node.op_kind,
                    source: KernelError::MissingOutput(*missing),
                });
            }
            if let Some(profiler) = profiler.as_deref_mut() {
                profiler.end_node(node, produced_bytes(graph, node, store));
            }
        }
        Ok(())
    }
}

/// Bytes of `node`'s outputs, sized by their declared dtype
fn produced_bytes(graph: &ComputationalGraph, node: &GraphNode, store: &ValueStore) -> usize {
    node.outputs
        .iter()
        .filter_map(|id| {
            let value = store.get(*id)?;
            let dtype = graph.tensor(*id).map(|descriptor| descriptor.dtype).unwrap_or_default();
            Some(value.len() * dtype.size_bytes())
        })
        .sum()
}

fn collect_outputs(graph: &ComputationalGraph, store: &mut ValueStore) -> GraphResult<Outputs> {
    graph
        .graph_outputs()
        .iter()
        .map(|id| store.remove(*id).map(|value| (*id, value)).ok_or(GraphError::MissingOutput(*id)))
        .collect()
}
