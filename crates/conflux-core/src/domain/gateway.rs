//! Gateway arena: arrival bookkeeping for join gateways.
//!
//! Each activation of a join gateway is a record keyed by container, node
//! and epoch. A record tracks which incoming transitions delivered a token
//! and which ones are still required. Firing is a one-way flag.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use super::flow_node::{Activation, FlowNodeInstanceId};
use super::process_definition::{NodeId, TransitionId};
use super::process_instance::ProcessInstanceId;
use crate::CoreError;

/// Identifies one activation of a join gateway
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GatewayKey {
    /// Container the gateway belongs to
    pub container_id: String,
    /// Gateway definition node
    pub node_id: NodeId,
    /// Activation epoch; a loop back creates a new epoch
    pub epoch: u32,
}

impl fmt::Display for GatewayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.container_id, self.node_id, self.epoch)
    }
}

/// Arrival state of one gateway activation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayRecord {
    /// Key
    pub key: GatewayKey,
    /// Owning process instance
    pub process_instance_id: ProcessInstanceId,
    /// The gateway's flow node instance, WAITING until fired
    pub flow_node_id: FlowNodeInstanceId,
    /// Incoming transitions that must deliver a token
    pub required: BTreeSet<TransitionId>,
    /// Incoming transitions that delivered a token
    pub arrived: BTreeSet<TransitionId>,
    /// Activations handed to the gateway's outgoing tokens
    pub activations: Vec<Activation>,
    /// One-way fired flag
    pub fired: bool,
    /// Set when the gateway was abandoned without firing
    pub discarded: bool,
}

impl GatewayRecord {
    /// Still accepting arrivals
    pub fn is_open(&self) -> bool {
        !self.fired && !self.discarded
    }

    /// Every required transition has arrived
    pub fn is_satisfied(&self) -> bool {
        self.required.is_subset(&self.arrived)
    }

    /// Required transitions that have not arrived yet
    pub fn pending(&self) -> impl Iterator<Item = &TransitionId> {
        self.required.difference(&self.arrived)
    }
}

/// All gateway activations of one process instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayArena {
    records: BTreeMap<GatewayKey, GatewayRecord>,
}

impl GatewayArena {
    /// Empty arena
    pub fn new() -> Self {
        Self::default()
    }

    /// Earliest open activation that has not yet received `transition`
    pub fn find_open(
        &self,
        container_id: &str,
        node_id: &NodeId,
        transition: &TransitionId,
    ) -> Option<GatewayKey> {
        self.records
            .values()
            .filter(|r| r.key.container_id == container_id && &r.key.node_id == node_id)
            .find(|r| r.is_open() && !r.arrived.contains(transition))
            .map(|r| r.key.clone())
    }

    /// Start a new activation in the next epoch
    pub fn open(
        &mut self,
        process_instance_id: ProcessInstanceId,
        container_id: &str,
        node_id: &NodeId,
        flow_node_id: FlowNodeInstanceId,
        required: BTreeSet<TransitionId>,
        activations: Vec<Activation>,
    ) -> GatewayKey {
        let epoch = self
            .records
            .keys()
            .filter(|k| k.container_id == container_id && &k.node_id == node_id)
            .map(|k| k.epoch + 1)
            .max()
            .unwrap_or(0);

        let key = GatewayKey {
            container_id: container_id.to_string(),
            node_id: node_id.clone(),
            epoch,
        };
        self.records.insert(
            key.clone(),
            GatewayRecord {
                key: key.clone(),
                process_instance_id,
                flow_node_id,
                required,
                arrived: BTreeSet::new(),
                activations,
                fired: false,
                discarded: false,
            },
        );
        key
    }

    /// Record a token arriving; returns whether the activation is satisfied
    pub fn arrive(&mut self, key: &GatewayKey, transition: TransitionId) -> Result<bool, CoreError> {
        let record = self.record_mut(key)?;
        if !record.is_open() {
            return Err(CoreError::GatewayAlreadyFired(key.to_string()));
        }
        // a transition outside the computed set still counts toward the join
        record.required.insert(transition.clone());
        record.arrived.insert(transition);
        Ok(record.is_satisfied())
    }

    /// Drop pending requirements that can no longer be met; returns whether
    /// the activation is now satisfied
    pub fn prune(
        &mut self,
        key: &GatewayKey,
        can_arrive: impl Fn(&TransitionId) -> bool,
    ) -> Result<bool, CoreError> {
        let record = self.record_mut(key)?;
        let unreachable: Vec<TransitionId> =
            record.pending().filter(|t| !can_arrive(t)).cloned().collect();
        for transition in unreachable {
            record.required.remove(&transition);
        }
        Ok(record.is_open() && record.is_satisfied())
    }

    /// Atomically set the fired flag
    pub fn mark_fired(&mut self, key: &GatewayKey) -> Result<&GatewayRecord, CoreError> {
        let record = self.record_mut(key)?;
        if record.fired {
            return Err(CoreError::GatewayAlreadyFired(key.to_string()));
        }
        if record.discarded {
            return Err(CoreError::GatewayAlreadyFired(format!("{} (discarded)", key)));
        }
        record.fired = true;
        Ok(record)
    }

    /// Abandon every open activation of a container; returns their gateway
    /// flow node ids
    pub fn discard_container(&mut self, container_id: &str) -> Vec<FlowNodeInstanceId> {
        self.records
            .values_mut()
            .filter(|r| r.key.container_id == container_id && r.is_open())
            .map(|r| {
                r.discarded = true;
                r.flow_node_id.clone()
            })
            .collect()
    }

    /// Abandon the open activation owned by one gateway flow node
    pub fn discard_flow_node(&mut self, flow_node_id: &FlowNodeInstanceId) -> bool {
        match self
            .records
            .values_mut()
            .find(|r| &r.flow_node_id == flow_node_id && r.is_open())
        {
            Some(record) => {
                record.discarded = true;
                true
            }
            None => false,
        }
    }

    /// Keys of every open activation
    pub fn open_keys(&self) -> Vec<GatewayKey> {
        self.records
            .values()
            .filter(|r| r.is_open())
            .map(|r| r.key.clone())
            .collect()
    }

    /// Look up an activation
    pub fn get(&self, key: &GatewayKey) -> Option<&GatewayRecord> {
        self.records.get(key)
    }

    /// All activations, in key order
    pub fn records(&self) -> impl Iterator<Item = &GatewayRecord> {
        self.records.values()
    }

    fn record_mut(&mut self, key: &GatewayKey) -> Result<&mut GatewayRecord, CoreError> {
        self.records
            .get_mut(key)
            .ok_or_else(|| CoreError::FlowNodeNotFound(format!("gateway {}", key)))
    }
}
