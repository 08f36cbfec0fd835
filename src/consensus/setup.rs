//! Cluster bootstrap

use std::collections::HashMap;
use std::sync::Arc;

use super::store::RaftStore;
use crate::common::{node_id_for, normalize_raft_node, Error, MetricsSink, RaftSettings, Result};
use crate::throttle::Throttler;

/// The static voter set of a consensus domain, from this node's view
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    pub self_id: u64,
    /// Normalized address of this node
    pub bind: String,
    /// Raft id to normalized address, this node included
    pub members: HashMap<u64, String>,
}

impl Membership {
    /// Normalize the bind and peer addresses and assign raft ids.
    ///
    /// The bind address is always a member, listed or not. Repeated
    /// addresses collapse into one member.
    pub fn resolve(settings: &RaftSettings) -> Result<Self> {
        if settings.bind.trim().is_empty() {
            return Err(Error::InvalidConfig("raft bind address is empty".into()));
        }
        let bind = normalize_raft_node(&settings.bind, settings.default_port);

        let mut members: HashMap<u64, String> = HashMap::new();
        let peers = settings
            .nodes
            .iter()
            .filter(|node| !node.trim().is_empty())
            .map(|node| normalize_raft_node(node, settings.default_port));
        for addr in std::iter::once(bind.clone()).chain(peers) {
            let id = node_id_for(&addr);
            match members.get(&id) {
                Some(existing) if *existing == addr => {}
                Some(existing) => {
                    return Err(Error::Membership(format!(
                        "raft node id collision between {} and {}",
                        existing, addr
                    )));
                }
                None => {
                    members.insert(id, addr);
                }
            }
        }

        Ok(Self {
            self_id: node_id_for(&bind),
            bind,
            members,
        })
    }

    /// Member addresses in a stable order
    pub fn addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.members.values().cloned().collect();
        addresses.sort();
        addresses
    }
}

/// Build the raft-backed consensus service for this node.
///
/// Any failure leaves nothing running; callers should treat it as fatal.
pub async fn setup_raft(
    settings: &RaftSettings,
    throttler: Arc<Throttler>,
    metrics: Arc<dyn MetricsSink>,
) -> Result<Arc<RaftStore>> {
    settings.validate()?;
    let membership = Membership::resolve(settings)?;
    tracing::info!(
        "Setting up raft on {} with peers {:?}",
        membership.bind,
        membership.addresses()
    );
    RaftStore::open(settings, membership, throttler, metrics).await
}
