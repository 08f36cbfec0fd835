//! Utility functions for quorate

use chrono::{DateTime, Utc};

/// Make sure there's a port on the given node address.
///
/// Addresses that already carry a port pass through; otherwise `default_port`
/// is appended, unless it is 0, in which case the address is returned as is
/// and the caller is expected to have supplied a port.
pub fn normalize_raft_node(node: &str, default_port: u16) -> String {
    let node = node.trim();
    if node.contains(':') || default_port == 0 {
        return node.to_string();
    }
    format!("{}:{}", node, default_port)
}

/// Stable raft node id for an address.
///
/// raft-rs reserves id 0 for "no node", so a zero hash is remapped to 1.
pub fn node_id_for(addr: &str) -> u64 {
    let hash = blake3::hash(addr.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash.as_bytes()[..8]);
    match u64::from_be_bytes(bytes) {
        0 => 1,
        id => id,
    }
}

/// Current wall-clock time
pub fn timestamp_now() -> DateTime<Utc> {
    Utc::now()
}
