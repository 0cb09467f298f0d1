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

//! Execution profiler
//!
//! Records per-node wall time and output size while a dispatcher runs a
//! graph, then aggregates the records by operation kind.

use crate::profiling::hotspots::{Hotspot, HotspotDetector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};
use tensorgraph_core::{GraphNode, NodeId, OpKind};

/// Configuration for the execution profiler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilerConfig {
    /// Whether to time each node
    pub enable_timing: bool,
    /// Whether to record the bytes each node produces
    pub track_memory: bool,
    /// Share of node time, in percent, from which an op kind is a hotspot
    pub hotspot_threshold_percent: f32,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            enable_timing: true,
            track_memory: true,
            hotspot_threshold_percent: 20.0,
        }
    }
}

/// Profiling data for a single node execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeProfile {
    pub node: NodeId,
    pub name: String,
    pub op_kind: OpKind,
    pub execution_time: Duration,
    /// Bytes of the values the node produced, sized by descriptor dtype
    pub memory_bytes: usize,
}

/// Aggregate for one operation kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpStats {
    pub count: usize,
    pub total_time: Duration,
    pub avg_time: Duration,
    /// Share of total node time
    pub percentage: f64,
}

/// Overall profiling session data
#[derive(Debug, Clone)]
pub struct ProfilingSession {
    pub node_profiles: Vec<NodeProfile>,
    pub total_time: Duration,
    pub start_time: Instant,
}

impl ProfilingSession {
    fn new() -> Self {
        Self {
            node_profiles: Vec::new(),
            total_time: Duration::default(),
            start_time: Instant::now(),
        }
    }

    /// Aggregate the recorded nodes into a report
    pub fn report(&self, hotspot_threshold_percent: f32) -> ProfileReport {
        ProfileReport::from_profiles(&self.node_profiles, self.total_time, hotspot_threshold_percent)
    }
}

/// Aggregated view of one profiled execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileReport {
    /// Wall time of the whole session
    pub total_time: Duration,
    pub total_memory_bytes: usize,
    pub num_operations: usize,
    pub op_breakdown: BTreeMap<OpKind, OpStats>,
    pub node_profiles: Vec<NodeProfile>,
    pub hotspots: Vec<Hotspot>,
}

impl ProfileReport {
    pub fn from_profiles(profiles: &[NodeProfile], total_time: Duration, hotspot_threshold_percent: f32) -> Self {
        let mut detector = HotspotDetector::new(hotspot_threshold_percent);
        let mut per_kind: BTreeMap<OpKind, (usize, Duration)> = BTreeMap::new();
        for profile in profiles {
            let entry = per_kind.entry(profile.op_kind).or_default();
            entry.0 += 1;
            entry.1 += profile.execution_time;
            detector.record_timing(profile.op_kind, profile.execution_time);
        }

        let node_time: Duration = profiles.iter().map(|p| p.execution_time).sum();
        let op_breakdown = per_kind
            .into_iter()
            .map(|(kind, (count, time))| {
                let percentage = if node_time.is_zero() { 0.0 } else { time.as_secs_f64() * 100.0 / node_time.as_secs_f64() };
                let stats = OpStats {
                    count,
                    total_time: time,
                    avg_time: time / count as u32,
                    percentage,
                };
                (kind, stats)
            })
            .collect();

        Self {
            total_time,
            total_memory_bytes: profiles.iter().map(|p| p.memory_bytes).sum(),
            num_operations: profiles.len(),
            op_breakdown,
            node_profiles: profiles.to_vec(),
            hotspots: detector.detect_hotspots(),
        }
    }

    pub fn total_memory_mb(&self) -> f64 {
        self.total_memory_bytes as f64 / (1024.0 * 1024.0)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for ProfileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Execution Profile:")?;
        writeln!(f, "  Total Time:       {:.3} ms", self.total_time.as_secs_f64() * 1000.0)?;
        writeln!(f, "  Total Memory:     {:.3} MB", self.total_memory_mb())?;
        writeln!(f, "  Operations:       {}", self.num_operations)?;

        let mut kinds: Vec<(&OpKind, &OpStats)> = self.op_breakdown.iter().collect();
        kinds.sort_by(|a, b| b.1.total_time.cmp(&a.1.total_time).then(a.0.cmp(b.0)));
        for (kind, stats) in kinds {
            writeln!(
                f,
                "  {:<26} x{:<4} {:>10.3} ms  avg {:>9.3} ms  {:>5.1}%",
                kind.to_string(),
                stats.count,
                stats.total_time.as_secs_f64() * 1000.0,
                stats.avg_time.as_secs_f64() * 1000.0,
                stats.percentage
            )?;
        }
        for hotspot in &self.hotspots {
            writeln!(f, "  hotspot: {} ({:?}, {:.1}%)", hotspot.op_kind, hotspot.hotspot_type, hotspot.percentage)?;
        }
        Ok(())
    }
}

/// Profiler fed by the execution dispatcher
#[derive(Debug, Clone, Default)]
pub struct ExecutionProfiler {
    config: ProfilerConfig,
    current_session: Option<ProfilingSession>,
    node_start: Option<Instant>,
}

impl ExecutionProfiler {
    pub fn new(config: ProfilerConfig) -> Self {
        Self {
            config,
            current_session: None,
            node_start: None,
        }
    }

    pub fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    /// Start a new profiling session, discarding any session in progress
    pub fn start_session(&mut self) {
        self.current_session = Some(ProfilingSession::new());
        self.node_start = None;
    }

    /// End the current profiling session
    pub fn end_session(&mut self) -> Option<ProfilingSession> {
        self.node_start = None;
        let mut session = self.current_session.take()?;
        session.total_time = session.start_time.elapsed();
        Some(session)
    }

    pub fn current_session(&self) -> Option<&ProfilingSession> {
        self.current_session.as_ref()
    }

    pub fn start_node(&mut self, _node: &GraphNode) {
        if self.config.enable_timing && self.current_session.is_some() {
            self.node_start = Some(Instant::now());
        }
    }

    /// Record the node started by the matching `start_node`
    pub fn end_node(&mut self, node: &GraphNode, memory_bytes: usize) {
        let execution_time = self.node_start.take().map(|start| start.elapsed()).unwrap_or_default();
        let memory_bytes = if self.config.track_memory { memory_bytes } else { 0 };
        if let Some(session) = self.current_session.as_mut() {
            session.node_profiles.push(NodeProfile {
                node: node.id,
                name: node.name.clone(),
                op_kind: node.op_kind,
                execution_time,
                memory_bytes,
            });
        }
    }

    /// Report over the session in progress
    pub fn generate_report(&self) -> Option<ProfileReport> {
        let session = self.current_session.as_ref()?;
        Some(ProfileReport::from_profiles(
            &session.node_profiles,
            session.start_time.elapsed(),
            self.config.hotspot_threshold_percent,
        ))
    }
}
