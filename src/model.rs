use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Kind of tracked media, matching the provider's URL path segment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MediaKind {
    Movie,
    Tv,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Movie => "movie",
            MediaKind::Tv => "tv",
        }
    }

    pub fn parse_kind(s: &str) -> Option<Self> {
        match s {
            "movie" => Some(MediaKind::Movie),
            "tv" => Some(MediaKind::Tv),
            _ => None,
        }
    }
}

/// Provider ids currently offering a title, split by access mode.
///
/// Absence of data is three empty sets, never a missing snapshot. Sets keep
/// membership tests cheap and make duplicate ids from the provider harmless.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Availability {
    #[serde(default)]
    pub streaming: BTreeSet<i64>,
    #[serde(default)]
    pub rent: BTreeSet<i64>,
    #[serde(default)]
    pub buy: BTreeSet<i64>,
}

impl Availability {
    /// Providers that are in the new streaming set and in the user's selected
    /// services, but were not in the previously stored streaming set.
    ///
    /// Strictly additive: a provider dropping a title never shows up here.
    pub fn newly_streaming(&self, old: &Availability, services: &BTreeSet<i64>) -> BTreeSet<i64> {
        self.streaming
            .iter()
            .filter(|id| services.contains(*id) && !old.streaming.contains(*id))
            .copied()
            .collect()
    }
}

/// Outcome of one run, reported to the caller and the logs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunSummary {
    pub success: bool,
    pub notifications_sent: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ids: &[i64]) -> BTreeSet<i64> {
        ids.iter().copied().collect()
    }

    fn streaming(ids: &[i64]) -> Availability {
        Availability {
            streaming: set(ids),
            ..Default::default()
        }
    }

    #[test]
    fn newly_streaming_requires_membership_in_services() {
        let new = streaming(&[8, 15]);
        let old = streaming(&[]);
        assert_eq!(new.newly_streaming(&old, &set(&[8])), set(&[8]));
        assert_eq!(new.newly_streaming(&old, &set(&[337])), set(&[]));
    }

    #[test]
    fn newly_streaming_excludes_already_stored_providers() {
        let new = streaming(&[8, 9]);
        let old = streaming(&[8]);
        assert_eq!(new.newly_streaming(&old, &set(&[8, 9])), set(&[9]));
    }

    #[test]
    fn provider_removal_is_never_newly_available() {
        let new = streaming(&[]);
        let old = streaming(&[8]);
        assert!(new.newly_streaming(&old, &set(&[8])).is_empty());
    }

    #[test]
    fn rent_and_buy_never_contribute() {
        let new = Availability {
            rent: set(&[8]),
            buy: set(&[8]),
            ..Default::default()
        };
        let old = Availability::default();
        assert!(new.newly_streaming(&old, &set(&[8])).is_empty());
    }

    #[test]
    fn snapshot_json_round_trip_preserves_sets() {
        let snapshot = Availability {
            streaming: set(&[8, 337]),
            rent: set(&[2]),
            buy: set(&[2, 3]),
        };
        let encoded = serde_json::to_string(&snapshot).unwrap();
        let decoded: Availability = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, snapshot);
    }

    #[test]
    fn missing_fields_decode_as_empty_sets() {
        let decoded: Availability = serde_json::from_str("{}").unwrap();
        assert_eq!(decoded, Availability::default());
    }

    #[test]
    fn media_kind_round_trips_through_str() {
        assert_eq!(MediaKind::parse_kind("movie"), Some(MediaKind::Movie));
        assert_eq!(MediaKind::parse_kind("tv"), Some(MediaKind::Tv));
        assert_eq!(MediaKind::parse_kind("book"), None);
        assert_eq!(MediaKind::Movie.as_str(), "movie");
    }
}
