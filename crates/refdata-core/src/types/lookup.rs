use serde::{Deserialize, Serialize};
use std::fmt;

/// Delimiter between chained map names, e.g. `CARD_TO_USER/USER_TO_LOCATION`
pub const NESTED_MAP_DELIMITER: char = '/';

/// A single lookup: `(map, key, time)`.
///
/// `map_name` may be a chain of maps. Each map's value becomes the key for
/// the next map, see [`LookupIdentifier::next`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LookupIdentifier {
    map_name: String,
    key: String,
    event_time_ms: i64,
}

impl LookupIdentifier {
    pub fn new(map_name: impl Into<String>, key: impl Into<String>, event_time_ms: i64) -> Self {
        Self {
            map_name: map_name.into(),
            key: key.into(),
            event_time_ms,
        }
    }

    /// Full, possibly chained, map name
    pub fn map_name(&self) -> &str {
        &self.map_name
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn event_time_ms(&self) -> i64 {
        self.event_time_ms
    }

    pub fn is_map_nested(&self) -> bool {
        self.map_name.contains(NESTED_MAP_DELIMITER)
    }

    /// First map in the chain
    pub fn primary_map_name(&self) -> &str {
        match self.map_name.split_once(NESTED_MAP_DELIMITER) {
            Some((primary, _)) => primary,
            None => &self.map_name,
        }
    }

    /// Remainder of the chain after the primary map, if nested
    pub fn secondary_map_name(&self) -> Option<&str> {
        self.map_name
            .split_once(NESTED_MAP_DELIMITER)
            .map(|(_, rest)| rest)
    }

    /// Identifier for the tail of the chain, keyed by the value resolved
    /// from the primary map. `None` if this identifier is not nested.
    pub fn next(&self, next_key: impl Into<String>) -> Option<LookupIdentifier> {
        self.secondary_map_name()
            .map(|rest| LookupIdentifier::new(rest, next_key, self.event_time_ms))
    }
}

impl fmt::Display for LookupIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "map: '{}', key: '{}', time: {}",
            self.map_name, self.key, self.event_time_ms
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_map() {
        let id = LookupIdentifier::new("USER_TO_LOCATION", "user1", 10);
        assert!(!id.is_map_nested());
        assert_eq!(id.primary_map_name(), "USER_TO_LOCATION");
        assert!(id.secondary_map_name().is_none());
        assert!(id.next("x").is_none());
    }

    #[test]
    fn test_nested_chain_walks_one_map_at_a_time() {
        let id = LookupIdentifier::new("A/B/C", "k1", 42);
        assert!(id.is_map_nested());
        assert_eq!(id.primary_map_name(), "A");
        assert_eq!(id.secondary_map_name(), Some("B/C"));

        let second = id.next("k2").unwrap();
        assert_eq!(second.map_name(), "B/C");
        assert_eq!(second.key(), "k2");
        assert_eq!(second.event_time_ms(), 42);

        let third = second.next("k3").unwrap();
        assert_eq!(third.map_name(), "C");
        assert!(!third.is_map_nested());
    }
}
