//! Per-user access scope over (site, room) targets.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Restriction of a user to a set of sites and, optionally, to specific
/// rooms within a site. A user without a scope (`None` at the `User` level)
/// has unrestricted access.
///
/// Matching rules:
/// - if `sites` is non-empty and the target site is absent, access is denied
///   regardless of `rooms`;
/// - if `rooms` lists the target site, the room must be a member;
/// - if the site is allowed and `rooms` has no entry for it, every room under
///   that site is allowed.
///
/// All comparisons are case-insensitive.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Scope {
    #[serde(default)]
    pub sites: Vec<String>,
    #[serde(default)]
    pub rooms: HashMap<String, Vec<String>>,
}

impl Scope {
    pub fn allows(&self, site: &str, room: &str) -> bool {
        let site_key = site.to_lowercase();
        let room_key = room.to_lowercase();

        if !self.sites.is_empty() && !self.sites.iter().any(|s| s.to_lowercase() == site_key) {
            return false;
        }

        if let Some(allowed_rooms) = self
            .rooms
            .iter()
            .find(|(s, _)| s.to_lowercase() == site_key)
            .map(|(_, rooms)| rooms)
        {
            return allowed_rooms.iter().any(|r| r.to_lowercase() == room_key);
        }

        if self.sites.iter().any(|s| s.to_lowercase() == site_key) {
            return true;
        }

        // A scope exists but matches nothing for this target.
        false
    }
}

/// Scope check with the unrestricted `None` case folded in.
pub fn scope_allows(scope: Option<&Scope>, site: &str, room: &str) -> bool {
    match scope {
        None => true,
        Some(scope) => scope.allows(site, room),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope(sites: &[&str], rooms: &[(&str, &[&str])]) -> Scope {
        Scope {
            sites: sites.iter().map(|s| s.to_string()).collect(),
            rooms: rooms
                .iter()
                .map(|(site, rs)| {
                    (
                        site.to_string(),
                        rs.iter().map(|r| r.to_string()).collect(),
                    )
                })
                .collect(),
        }
    }

    #[test]
    fn test_null_scope_allows_everything() {
        assert!(scope_allows(None, "central", "room1"));
        assert!(scope_allows(None, "anything", "at-all"));
    }

    #[test]
    fn test_site_list_gates_access() {
        let s = scope(&["a"], &[]);
        assert!(s.allows("a", "x"));
        assert!(!s.allows("b", "x"));
    }

    #[test]
    fn test_room_list_restricts_within_site() {
        let s = scope(&["a"], &[("a", &["room1", "room2"])]);
        assert!(s.allows("a", "room1"));
        assert!(s.allows("a", "ROOM2"));
        assert!(!s.allows("a", "room3"));
    }

    #[test]
    fn test_site_without_room_list_allows_all_rooms() {
        let s = scope(&["a", "b"], &[("a", &["room1"])]);
        assert!(s.allows("b", "whatever"));
        assert!(!s.allows("a", "room9"));
    }

    #[test]
    fn test_case_insensitive_site_match() {
        let s = scope(&["Central"], &[]);
        assert!(s.allows("central", "r1"));
        assert!(s.allows("CENTRAL", "r1"));
    }

    #[test]
    fn test_room_list_for_unlisted_site_still_denied() {
        // `rooms` names a site that is not in `sites`; the site gate wins.
        let s = scope(&["a"], &[("b", &["room1"])]);
        assert!(!s.allows("b", "room1"));
    }

    #[test]
    fn test_empty_scope_with_room_entries_only() {
        let s = scope(&[], &[("a", &["room1"])]);
        assert!(s.allows("a", "room1"));
        assert!(!s.allows("a", "room2"));
        // No site list and no room entry for this site: deny.
        assert!(!s.allows("b", "room1"));
    }
}
