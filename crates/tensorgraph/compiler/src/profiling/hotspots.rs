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

//! Hotspot detection over operation kinds

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tensorgraph_core::OpKind;

/// Types of performance hotspots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HotspotType {
    /// Matrix multiplies, convolutions and attention
    ComputeBound,
    /// Normalizations, reductions and data movement
    MemoryBound,
    /// Already fused kernels
    FusedKernel,
    /// Cheap element-wise work
    Elementwise,
}

/// A detected performance hotspot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hotspot {
    pub hotspot_type: HotspotType,
    pub op_kind: OpKind,
    /// Severity score (0.0 to 1.0)
    pub severity: f32,
    pub time_spent: Duration,
    /// Percentage of total node time
    pub percentage: f32,
    pub suggestions: Vec<String>,
}

/// Hotspot detector
#[derive(Debug, Clone)]
pub struct HotspotDetector {
    /// Share of total time, in percent, from which a kind counts as a hotspot
    threshold: f32,
    timing_data: BTreeMap<OpKind, Duration>,
    total_time: Duration,
}

impl HotspotDetector {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            timing_data: BTreeMap::new(),
            total_time: Duration::default(),
        }
    }

    /// Add time spent in one node of `kind`
    pub fn record_timing(&mut self, kind: OpKind, duration: Duration) {
        *self.timing_data.entry(kind).or_default() += duration;
        self.total_time += duration;
    }

    /// Kinds whose share of time meets the threshold, most severe first
    pub fn detect_hotspots(&self) -> Vec<Hotspot> {
        let mut hotspots = Vec::new();

        for (kind, &duration) in &self.timing_data {
            let percentage = if self.total_time.as_nanos() > 0 {
                duration.as_nanos() as f32 / self.total_time.as_nanos() as f32 * 100.0
            } else {
                0.0
            };

            if percentage > 0.0 && percentage >= self.threshold {
                let hotspot_type = classify_hotspot(*kind);
                hotspots.push(Hotspot {
                    hotspot_type,
                    op_kind: *kind,
                    severity: (percentage / 100.0).min(1.0),
                    time_spent: duration,
                    percentage,
                    suggestions: generate_suggestions(*kind, hotspot_type),
                });
            }
        }

        hotspots.sort_by(|a, b| b.severity.total_cmp(&a.severity).then(a.op_kind.cmp(&b.op_kind)));
        hotspots
    }

    pub fn get_statistics(&self) -> HotspotStatistics {
        let hotspots = self.detect_hotspots();
        HotspotStatistics {
            total_kinds: self.timing_data.len(),
            hotspot_count: hotspots.len(),
            total_time: self.total_time,
            hotspot_time: hotspots.iter().map(|h| h.time_spent).sum(),
        }
    }
}

/// Statistics about detected hotspots
#[derive(Debug, Clone, PartialEq)]
pub struct HotspotStatistics {
    pub total_kinds: usize,
    pub hotspot_count: usize,
    pub total_time: Duration,
    pub hotspot_time: Duration,
}

fn classify_hotspot(kind: OpKind) -> HotspotType {
    if kind.is_fused() {
        return HotspotType::FusedKernel;
    }
    match kind {
        OpKind::MatMul | OpKind::Conv2d | OpKind::Attention | OpKind::MultiHeadAttention | OpKind::Custom => HotspotType::ComputeBound,
        OpKind::LayerNorm
        | OpKind::BatchNorm
        | OpKind::RmsNorm
        | OpKind::Softmax
        | OpKind::ReduceSum
        | OpKind::ReduceMax
        | OpKind::Reshape
        | OpKind::Transpose
        | OpKind::Concat => HotspotType::MemoryBound,
        _ => HotspotType::Elementwise,
    }
}

fn generate_suggestions(kind: OpKind, hotspot_type: HotspotType) -> Vec<String> {
    let mut suggestions = Vec::new();

    match hotspot_type {
        HotspotType::ComputeBound => {
            suggestions.push("Register a tuned backend handler for this kind".to_string());
            suggestions.push("Lower the precision of the weights (F16, BF16 or I8)".to_string());
        }
        HotspotType::MemoryBound => {
            suggestions.push("Fuse into the neighbouring compute kernel".to_string());
            suggestions.push("Check that the layout hint matches the backend preference".to_string());
        }
        HotspotType::FusedKernel => {
            suggestions.push("Profile the components of the fused kernel separately at level 1".to_string());
        }
        HotspotType::Elementwise => {
            suggestions.push("Raise the optimization level so the activation is fused into its producer".to_string());
        }
    }

    match kind {
        OpKind::MatMul => suggestions.push("Enable column-major weights if the backend prefers them".to_string()),
        OpKind::LayerNorm | OpKind::RmsNorm => suggestions.push("Fuse with the following attention block".to_string()),
        OpKind::Constant => suggestions.push("Constant producers should disappear at level 1".to_string()),
        _ => {}
    }

    suggestions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_dominant_kind() {
        let mut detector = HotspotDetector::new(20.0);
        detector.record_timing(OpKind::MatMul, Duration::from_millis(70));
        detector.record_timing(OpKind::Relu, Duration::from_millis(10));
        detector.record_timing(OpKind::MatMul, Duration::from_millis(10));
        detector.record_timing(OpKind::LayerNorm, Duration::from_millis(10));

        let hotspots = detector.detect_hotspots();
        assert_eq!(hotspots.len(), 1);
        assert_eq!(hotspots[0].op_kind, OpKind::MatMul);
        assert_eq!(hotspots[0].hotspot_type, HotspotType::ComputeBound);
        assert!((hotspots[0].percentage - 80.0).abs() < 0.01);
        assert!(!hotspots[0].suggestions.is_empty());
    }

    #[test]
    fn test_classification() {
        assert_eq!(classify_hotspot(OpKind::FusedMatMulRelu), HotspotType::FusedKernel);
        assert_eq!(classify_hotspot(OpKind::Softmax), HotspotType::MemoryBound);
        assert_eq!(classify_hotspot(OpKind::Add), HotspotType::Elementwise);
    }

    #[test]
    fn test_no_timing_no_hotspots() {
        let mut detector = HotspotDetector::new(0.0);
        detector.record_timing(OpKind::Relu, Duration::ZERO);
        assert!(detector.detect_hotspots().is_empty());
        assert_eq!(detector.get_statistics().total_kinds, 1);
    }
}
