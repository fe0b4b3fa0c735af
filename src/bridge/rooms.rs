//! Static room mapping.
//!
//! Rooms are configured as groups of UIDs; every room in a group is linked
//! to every other room of the same group.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use super::uid::{ClientResolver, Uid};

/// Resolves destinations for a message from its origin room.
#[derive(Debug, Default)]
pub struct RoomRouter {
    /// Configured groups, in declaration order.
    groups: Vec<Vec<Uid>>,
    /// Index: room key -> groups containing that room.
    index: HashMap<String, Vec<usize>>,
}

impl RoomRouter {
    /// Build the router from configured UID groups.
    ///
    /// Malformed entries (no `/`) are logged and skipped.
    pub fn from_config(rooms: &[Vec<String>], resolver: &ClientResolver) -> Self {
        let mut groups = Vec::with_capacity(rooms.len());
        let mut index: HashMap<String, Vec<usize>> = HashMap::new();

        for (i, group) in rooms.iter().enumerate() {
            let mut uids = Vec::with_capacity(group.len());
            for entry in group {
                match Uid::parse(entry, resolver) {
                    Some(uid) => {
                        if !resolver.is_known(uid.client()) {
                            warn!(group = i, room = %uid, "Room refers to an unknown client");
                        }
                        uids.push(uid);
                    }
                    None => warn!(group = i, entry = %entry, "Skipping malformed room UID"),
                }
            }

            let idx = groups.len();
            for uid in &uids {
                let groups_for_room = index.entry(uid.key()).or_default();
                if !groups_for_room.contains(&idx) {
                    groups_for_room.push(idx);
                }
            }
            debug!(group = i, rooms = uids.len(), "Loaded room group");
            groups.push(uids);
        }

        Self { groups, index }
    }

    /// Destinations for a message originating in `origin`.
    ///
    /// Rooms are returned in declaration order, each at most once, and the
    /// origin itself is never included.
    pub fn destinations(&self, origin: &Uid) -> Vec<Uid> {
        let origin_key = origin.key();
        let Some(group_indices) = self.index.get(&origin_key) else {
            return Vec::new();
        };

        let mut seen = HashSet::new();
        let mut destinations = Vec::new();
        for &idx in group_indices {
            for uid in &self.groups[idx] {
                let key = uid.key();
                if key != origin_key && seen.insert(key) {
                    destinations.push(uid.clone());
                }
            }
        }
        destinations
    }

    /// Returns true if the room belongs to any group.
    pub fn is_bridged(&self, uid: &Uid) -> bool {
        self.index.contains_key(&uid.key())
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}
