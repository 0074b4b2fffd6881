//! Engine metrics recorded from domain events.

use async_trait::async_trait;
use conflux_core::{
    CoreError, DomainEvent, DomainEventHandler, FlowNodeState, FlowNodeStateChanged, GatewayFired,
    ProcessInstanceState, ProcessInstanceStateChanged,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

/// Point-in-time copy of the engine counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineMetricsSnapshot {
    /// Instances that reached STARTED
    pub instances_started: u64,
    /// Instances that reached COMPLETED
    pub instances_completed: u64,
    /// Instances that reached CANCELLED
    pub instances_cancelled: u64,
    /// Instances that reached ABORTED
    pub instances_aborted: u64,
    /// Flow nodes that reached COMPLETED
    pub flow_nodes_completed: u64,
    /// Flow nodes that reached ABORTED
    pub flow_nodes_aborted: u64,
    /// Flow nodes that reached SKIPPED
    pub flow_nodes_skipped: u64,
    /// Flow nodes that reached FAILED
    pub flow_nodes_failed: u64,
    /// Join gateways fired
    pub gateways_fired: u64,
}

/// Engine counters
#[derive(Debug, Default)]
pub struct EngineMetrics {
    instances_started: AtomicU64,
    instances_completed: AtomicU64,
    instances_cancelled: AtomicU64,
    instances_aborted: AtomicU64,
    flow_nodes_completed: AtomicU64,
    flow_nodes_aborted: AtomicU64,
    flow_nodes_skipped: AtomicU64,
    flow_nodes_failed: AtomicU64,
    gateways_fired: AtomicU64,
}

impl EngineMetrics {
    /// Record a process instance state change
    pub fn record_instance_state(&self, process_instance_id: &str, state: ProcessInstanceState) {
        let counter = match state {
            ProcessInstanceState::Started => &self.instances_started,
            ProcessInstanceState::Completed => &self.instances_completed,
            ProcessInstanceState::Cancelled => &self.instances_cancelled,
            ProcessInstanceState::Aborted => &self.instances_aborted,
            _ => return,
        };
        let total = counter.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            metric = "process_instances",
            state = %state,
            total,
            process_instance_id,
            "Process instance metric"
        );
    }

    /// Record a flow node state change
    pub fn record_flow_node_state(&self, node_id: &str, state: FlowNodeState) {
        let counter = match state {
            FlowNodeState::Completed => &self.flow_nodes_completed,
            FlowNodeState::Aborted => &self.flow_nodes_aborted,
            FlowNodeState::Skipped => &self.flow_nodes_skipped,
            FlowNodeState::Failed => &self.flow_nodes_failed,
            _ => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        if state == FlowNodeState::Failed {
            info!(metric = "flow_nodes_failed", node_id, "Flow node metric");
        }
    }

    /// Record a gateway firing
    pub fn record_gateway_fired(&self, node_id: &str, arrivals: usize) {
        let total = self.gateways_fired.fetch_add(1, Ordering::Relaxed) + 1;
        info!(metric = "gateways_fired", total, node_id, arrivals, "Gateway metric");
    }

    /// Current counter values
    pub fn snapshot(&self) -> EngineMetricsSnapshot {
        EngineMetricsSnapshot {
            instances_started: self.instances_started.load(Ordering::Relaxed),
            instances_completed: self.instances_completed.load(Ordering::Relaxed),
            instances_cancelled: self.instances_cancelled.load(Ordering::Relaxed),
            instances_aborted: self.instances_aborted.load(Ordering::Relaxed),
            flow_nodes_completed: self.flow_nodes_completed.load(Ordering::Relaxed),
            flow_nodes_aborted: self.flow_nodes_aborted.load(Ordering::Relaxed),
            flow_nodes_skipped: self.flow_nodes_skipped.load(Ordering::Relaxed),
            flow_nodes_failed: self.flow_nodes_failed.load(Ordering::Relaxed),
            gateways_fired: self.gateways_fired.load(Ordering::Relaxed),
        }
    }
}

/// Domain event handler feeding [`EngineMetrics`]
#[derive(Debug, Clone, Default)]
pub struct MetricsEventHandler {
    metrics: Arc<EngineMetrics>,
}

impl MetricsEventHandler {
    /// Create a handler with fresh counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared counters
    pub fn metrics(&self) -> Arc<EngineMetrics> {
        Arc::clone(&self.metrics)
    }
}

#[async_trait]
impl DomainEventHandler for MetricsEventHandler {
    async fn handle_event(&self, event: Arc<dyn DomainEvent>) -> Result<(), CoreError> {
        let any = event.as_any();
        if let Some(changed) = any.downcast_ref::<ProcessInstanceStateChanged>() {
            self.metrics
                .record_instance_state(&changed.process_instance_id.0, changed.new_state);
        } else if let Some(changed) = any.downcast_ref::<FlowNodeStateChanged>() {
            self.metrics
                .record_flow_node_state(&changed.node_id.0, changed.new_state);
        } else if let Some(fired) = any.downcast_ref::<GatewayFired>() {
            self.metrics
                .record_gateway_fired(&fired.node_id.0, fired.arrived.len());
        }
        Ok(())
    }
}
