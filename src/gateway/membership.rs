//! Channel membership table: which connections receive a channel's events.
//!
//! An explicit many-to-many relation rather than a transport library's room
//! primitive, so fan-out, authorization, and cleanup stay testable on their
//! own. Operations on the same channel are linearized by the map's entry
//! locks; different channels proceed independently.

use std::collections::HashSet;

use dashmap::DashMap;

/// `channel_id → set<connection_id>`.
pub struct ChannelMembership {
    rooms: DashMap<String, HashSet<String>>,
}

impl ChannelMembership {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
        }
    }

    /// Add a connection to a channel. Idempotent; returns `true` if the
    /// connection was newly added. Callers must have authorized the join.
    pub fn join(&self, channel_id: &str, connection_id: &str) -> bool {
        self.rooms
            .entry(channel_id.to_string())
            .or_default()
            .insert(connection_id.to_string())
    }

    /// Remove a connection from a channel. Idempotent; safe for pairs that
    /// were never joined. Channels with no members left are pruned.
    pub fn leave(&self, channel_id: &str, connection_id: &str) {
        if let Some(mut members) = self.rooms.get_mut(channel_id) {
            members.remove(connection_id);
            let empty = members.is_empty();
            drop(members);
            if empty {
                self.rooms
                    .remove_if(channel_id, |_, members| members.is_empty());
            }
        }
    }

    /// Snapshot of a channel's members at call time. A channel with zero
    /// members is valid; events addressed to it are simply dropped.
    pub fn members_of(&self, channel_id: &str) -> Vec<String> {
        match self.rooms.get(channel_id) {
            Some(members) => members.iter().cloned().collect(),
            None => Vec::new(),
        }
    }

    pub fn member_count(&self, channel_id: &str) -> usize {
        self.rooms.get(channel_id).map_or(0, |m| m.len())
    }

    /// Remove a disconnected connection from each of the given channels.
    pub fn remove_connection(&self, connection_id: &str, channels: &HashSet<String>) {
        for channel_id in channels {
            self.leave(channel_id, connection_id);
        }
    }
}

impl Default for ChannelMembership {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_is_idempotent() {
        let table = ChannelMembership::new();

        assert!(table.join("ch_1", "cn_a"));
        assert!(!table.join("ch_1", "cn_a"));
        assert_eq!(table.member_count("ch_1"), 1);
    }

    #[test]
    fn leave_is_idempotent_and_safe_for_unknown_pairs() {
        let table = ChannelMembership::new();

        // Never joined — no-op.
        table.leave("ch_1", "cn_a");
        assert_eq!(table.member_count("ch_1"), 0);

        table.join("ch_1", "cn_a");
        table.leave("ch_1", "cn_a");
        table.leave("ch_1", "cn_a");
        assert_eq!(table.member_count("ch_1"), 0);
    }

    #[test]
    fn join_then_leave_restores_prior_state() {
        let table = ChannelMembership::new();
        table.join("ch_1", "cn_a");

        let before = {
            let mut m = table.members_of("ch_1");
            m.sort();
            m
        };

        table.join("ch_1", "cn_b");
        table.leave("ch_1", "cn_b");

        let mut after = table.members_of("ch_1");
        after.sort();
        assert_eq!(before, after);
    }

    #[test]
    fn members_of_unknown_channel_is_empty() {
        let table = ChannelMembership::new();
        assert!(table.members_of("ch_nope").is_empty());
    }

    #[test]
    fn remove_connection_clears_every_channel() {
        let table = ChannelMembership::new();
        table.join("ch_1", "cn_a");
        table.join("ch_2", "cn_a");
        table.join("ch_2", "cn_b");

        let held = HashSet::from(["ch_1".to_string(), "ch_2".to_string()]);
        table.remove_connection("cn_a", &held);

        assert_eq!(table.member_count("ch_1"), 0);
        assert_eq!(table.members_of("ch_2"), vec!["cn_b".to_string()]);
    }

    #[test]
    fn same_connection_in_multiple_channels() {
        let table = ChannelMembership::new();
        table.join("ch_1", "cn_a");
        table.join("ch_2", "cn_a");

        assert_eq!(table.member_count("ch_1"), 1);
        assert_eq!(table.member_count("ch_2"), 1);

        table.leave("ch_1", "cn_a");
        assert_eq!(table.member_count("ch_1"), 0);
        assert_eq!(table.member_count("ch_2"), 1);
    }
}
