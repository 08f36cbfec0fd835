//! Replicated commands and the state machine they drive

use crate::common::Result;
use crate::throttle::{AppThrottle, Throttler};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A mutation carried by the raft log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    ThrottleApp {
        app_name: String,
        /// `None` keeps the current ratio of an existing throttle
        ratio: Option<f64>,
        expire_at: DateTime<Utc>,
        ttl_minutes: i64,
    },
    UnthrottleApp {
        app_name: String,
    },
}

impl Command {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// The deterministic state machine behind the replicated throttle map.
///
/// Applying a command touches nothing but the throttler's directive map, so
/// replaying the same log on any node converges to the same map.
#[derive(Debug, Clone)]
pub struct ThrottleFsm {
    throttler: Arc<Throttler>,
}

impl ThrottleFsm {
    pub fn new(throttler: Arc<Throttler>) -> Self {
        Self { throttler }
    }

    pub fn throttler(&self) -> &Arc<Throttler> {
        &self.throttler
    }

    pub fn apply(&self, command: &Command) {
        match command {
            Command::ThrottleApp {
                app_name,
                ratio,
                expire_at,
                ttl_minutes,
            } => self
                .throttler
                .throttle_app(app_name, *expire_at, *ratio, *ttl_minutes),
            Command::UnthrottleApp { app_name } => self.throttler.unthrottle_app(app_name),
        }
    }

    /// Serialize the whole map for a raft snapshot
    pub fn snapshot(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(&self.throttler.snapshot())?)
    }

    /// Replace the map with the contents of a raft snapshot
    pub fn restore(&self, data: &[u8]) -> Result<()> {
        let apps: BTreeMap<String, AppThrottle> = if data.is_empty() {
            BTreeMap::new()
        } else {
            bincode::deserialize(data)?
        };
        tracing::info!("Restoring throttle map from snapshot ({} apps)", apps.len());
        self.throttler.restore(apps);
        Ok(())
    }
}
