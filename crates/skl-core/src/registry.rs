//! Ephemeral view of tokens observable over the radio.
//!
//! Observations are keyed by identifier; a later observation within the
//! same interval replaces the earlier snapshot. Entries outlive the
//! interval for `last_seen` metadata but stop being "discoverable now"
//! the moment the interval ends.

use std::collections::{HashMap, HashSet};

use chrono::Utc;

use crate::types::{Advertisement, KeyId, SmartKey};

/// What a completed search interval produced.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    /// Deduplicated unlinked tokens, strongest signal first.
    pub keys: Vec<SmartKey>,
    /// The linked token's refreshed record, when it was observed.
    pub linked: Option<SmartKey>,
}

#[derive(Default)]
pub(crate) struct Registry {
    known: HashMap<KeyId, SmartKey>,
    observed: Option<HashSet<KeyId>>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn begin_interval(&mut self) {
        self.observed = Some(HashSet::new());
    }

    /// Record one advertisement. Returns the snapshot that replaced the
    /// previous entry.
    pub(crate) fn observe(&mut self, id: KeyId, adv: &Advertisement) -> SmartKey {
        let snapshot = SmartKey::from_advertisement(id.clone(), adv, Utc::now());
        if let Some(observed) = self.observed.as_mut() {
            observed.insert(id.clone());
        }
        self.known.insert(id, snapshot.clone());
        snapshot
    }

    /// Close the interval and collect its results, with the linked token
    /// split out.
    pub(crate) fn finish_interval(&mut self, linked: Option<&KeyId>) -> SearchOutcome {
        let observed = self.observed.take().unwrap_or_default();

        let mut keys: Vec<SmartKey> = observed
            .iter()
            .filter(|id| Some(*id) != linked.as_ref().map(|l| *l))
            .filter_map(|id| self.known.get(id).cloned())
            .collect();
        keys.sort_by(|a, b| b.rssi.cmp(&a.rssi).then_with(|| a.id.cmp(&b.id)));

        let linked = linked
            .filter(|id| observed.contains(*id))
            .and_then(|id| self.known.get(id).cloned());

        SearchOutcome { keys, linked }
    }

    /// Abandon the interval without producing results.
    pub(crate) fn cancel_interval(&mut self) {
        self.observed = None;
    }

    /// Whether the token has been observed in this process lifetime.
    pub(crate) fn located(&self, id: &KeyId) -> bool {
        self.known
            .get(id)
            .map(|k| k.last_seen.is_some())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CaseType, ConfigState, FirmwareVersion, HardwareRevision};

    fn adv(rssi: i16) -> Advertisement {
        Advertisement {
            firmware: FirmwareVersion(6100),
            rssi,
            battery: 90,
            case: CaseType::Pen,
            hardware: HardwareRevision::Hw1010_005,
            service: false,
            config: ConfigState::Unconfigured,
        }
    }

    #[test]
    fn empty_interval_yields_empty_list() {
        let mut reg = Registry::new();
        reg.begin_interval();
        let outcome = reg.finish_interval(None);
        assert!(outcome.keys.is_empty());
        assert!(outcome.linked.is_none());
    }

    #[test]
    fn repeated_observation_keeps_the_latest_attributes() {
        let mut reg = Registry::new();
        reg.begin_interval();
        reg.observe(KeyId::new("t1"), &adv(-80));
        reg.observe(KeyId::new("t1"), &adv(-55));
        let outcome = reg.finish_interval(None);
        assert_eq!(outcome.keys.len(), 1);
        assert_eq!(outcome.keys[0].rssi, -55);
    }

    #[test]
    fn linked_token_is_split_out_of_the_list() {
        let mut reg = Registry::new();
        let linked = KeyId::new("mine");
        reg.begin_interval();
        reg.observe(linked.clone(), &adv(-40));
        reg.observe(KeyId::new("other"), &adv(-70));
        let outcome = reg.finish_interval(Some(&linked));
        assert_eq!(outcome.keys.len(), 1);
        assert_eq!(outcome.keys[0].id, KeyId::new("other"));
        assert_eq!(outcome.linked.as_ref().map(|k| k.id.clone()), Some(linked));
    }

    #[test]
    fn unobserved_linked_token_is_not_reported() {
        let mut reg = Registry::new();
        let linked = KeyId::new("mine");
        reg.begin_interval();
        reg.observe(linked.clone(), &adv(-40));
        reg.finish_interval(Some(&linked));

        // Second interval without the linked token in range.
        reg.begin_interval();
        let outcome = reg.finish_interval(Some(&linked));
        assert!(outcome.linked.is_none());
    }

    #[test]
    fn entries_stop_being_discoverable_after_the_interval() {
        let mut reg = Registry::new();
        reg.begin_interval();
        reg.observe(KeyId::new("t1"), &adv(-60));
        reg.finish_interval(None);

        reg.begin_interval();
        let outcome = reg.finish_interval(None);
        assert!(outcome.keys.is_empty());
        // Metadata survives for located().
        assert!(reg.located(&KeyId::new("t1")));
    }

    #[test]
    fn results_are_ordered_strongest_first() {
        let mut reg = Registry::new();
        reg.begin_interval();
        reg.observe(KeyId::new("far"), &adv(-90));
        reg.observe(KeyId::new("near"), &adv(-45));
        let outcome = reg.finish_interval(None);
        assert_eq!(outcome.keys[0].id, KeyId::new("near"));
        assert_eq!(outcome.keys[1].id, KeyId::new("far"));
    }
}
