//! Group membership.
//!
//! Groups are named (case-sensitive) sets of connections. A group exists
//! while it has at least one member. Members are held weakly: a connection
//! that went away without being removed is skipped on lookup and never kept
//! alive by its memberships.
//!
//! A reverse index of connection → group names makes removing a
//! disconnecting connection from every group proportional to the number of
//! groups it joined rather than the number of groups in existence.

use crate::connection::{Connection, ConnectionId, WeakConnection};
use dashmap::DashMap;
use std::collections::HashSet;
use tracing::debug;

/// Thread-safe multi-map of group name to member connections.
#[derive(Default)]
pub struct GroupList {
    groups: DashMap<String, DashMap<ConnectionId, WeakConnection>>,
    memberships: DashMap<ConnectionId, HashSet<String>>,
}

impl GroupList {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `connection` to `group`, creating the group if needed.
    ///
    /// Adding an existing member is a no-op.
    pub fn add(&self, connection: &Connection, group: &str) {
        let id = connection.id().clone();
        self.groups
            .entry(group.to_string())
            .or_default()
            .insert(id.clone(), connection.downgrade());
        self.memberships
            .entry(id.clone())
            .or_default()
            .insert(group.to_string());
        debug!("{} joined group '{}'", id, group);
    }

    /// Removes `id` from `group`. Unknown ids and groups are ignored.
    pub fn remove(&self, id: &str, group: &str) {
        let removed = self
            .groups
            .get(group)
            .and_then(|members| members.remove(id))
            .is_some();
        self.groups.remove_if(group, |_, members| members.is_empty());

        if let Some(mut joined) = self.memberships.get_mut(id) {
            joined.remove(group);
        }
        self.memberships.remove_if(id, |_, joined| joined.is_empty());

        if removed {
            debug!("{} left group '{}'", id, group);
        }
    }

    /// Removes `id` from every group it belongs to. Idempotent.
    pub fn remove_connection_from_all(&self, id: &str) {
        let Some((_, joined)) = self.memberships.remove(id) else {
            return;
        };
        for group in &joined {
            if let Some(members) = self.groups.get(group) {
                members.remove(id);
            }
            self.groups.remove_if(group, |_, members| members.is_empty());
        }
        debug!("{} removed from {} group(s)", id, joined.len());
    }

    /// Live members of `group`. Unknown groups yield an empty list.
    pub fn get(&self, group: &str) -> Vec<Connection> {
        self.groups
            .get(group)
            .map(|members| members.iter().filter_map(|m| m.value().upgrade()).collect())
            .unwrap_or_default()
    }

    /// Names of the groups `id` belongs to.
    pub fn groups_of(&self, id: &str) -> Vec<String> {
        self.memberships
            .get(id)
            .map(|joined| joined.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of non-empty groups.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}
