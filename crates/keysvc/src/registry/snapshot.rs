//! Immutable, versioned view of the master key registry.

use std::collections::HashMap;

use common::MasterKeyReference;

/// Lifecycle state of a master key record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    /// Usable for new wraps.
    Active,
    /// Retained for decryption of legacy content only.
    Disabled,
}

/// A master key record as held by the registry.
#[derive(Debug, Clone)]
pub struct MasterKeyRecord {
    reference: MasterKeyReference,
    state: KeyState,
    /// Unix epoch millis at which the key last became active.
    enabled_since: u64,
    /// Unix epoch millis at which the key was disabled, when disabled.
    disabled_since: Option<u64>,
}

impl MasterKeyRecord {
    pub(super) fn new(reference: MasterKeyReference, state: KeyState, now: u64) -> Self {
        Self {
            reference,
            state,
            enabled_since: now,
            disabled_since: match state {
                KeyState::Active => None,
                KeyState::Disabled => Some(now),
            },
        }
    }

    pub(super) fn enabled(&self, now: u64) -> Self {
        Self {
            reference: self.reference.clone(),
            state: KeyState::Active,
            enabled_since: now,
            disabled_since: None,
        }
    }

    pub(super) fn disabled(&self, now: u64) -> Self {
        Self {
            reference: self.reference.clone(),
            state: KeyState::Disabled,
            enabled_since: self.enabled_since,
            disabled_since: Some(now),
        }
    }

    pub fn reference(&self) -> &MasterKeyReference {
        &self.reference
    }

    pub fn state(&self) -> KeyState {
        self.state
    }

    pub fn enabled_since(&self) -> u64 {
        self.enabled_since
    }

    pub fn disabled_since(&self) -> Option<u64> {
        self.disabled_since
    }
}

/// Point-in-time view of all master key records.
///
/// Snapshots are immutable; every registry mutation publishes a new snapshot
/// with a bumped version. Readers therefore observe either the old or the new
/// registry state in full, never a partial mix.
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    version: u64,
    records: HashMap<MasterKeyReference, MasterKeyRecord>,
}

impl RegistrySnapshot {
    pub(super) fn new(
        version: u64,
        records: HashMap<MasterKeyReference, MasterKeyRecord>,
    ) -> Self {
        Self { version, records }
    }

    /// Monotonically increasing snapshot version.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Look up a record by reference.
    pub fn get(&self, reference: &MasterKeyReference) -> Option<&MasterKeyRecord> {
        self.records.get(reference)
    }

    /// State of a key, if registered.
    pub fn state_of(&self, reference: &MasterKeyReference) -> Option<KeyState> {
        self.records.get(reference).map(MasterKeyRecord::state)
    }

    pub(super) fn records(&self) -> &HashMap<MasterKeyReference, MasterKeyRecord> {
        &self.records
    }

    /// All records in a given state.
    pub fn in_state(&self, state: KeyState) -> impl Iterator<Item = &MasterKeyRecord> {
        self.records.values().filter(move |r| r.state() == state)
    }

    /// Active key references, ordered by activation time then lexicographically.
    pub fn active(&self) -> Vec<MasterKeyReference> {
        self.sorted_refs(KeyState::Active)
    }

    /// Disabled key references, ordered by activation time then lexicographically.
    pub fn disabled(&self) -> Vec<MasterKeyReference> {
        self.sorted_refs(KeyState::Disabled)
    }

    /// The key new wraps should target: the most recently enabled active key.
    ///
    /// `None` only for an empty snapshot, which the registry never publishes.
    pub fn current_wrap_target(&self) -> Option<MasterKeyReference> {
        self.in_state(KeyState::Active)
            .max_by(|a, b| {
                a.enabled_since()
                    .cmp(&b.enabled_since())
                    .then_with(|| a.reference().cmp(b.reference()))
            })
            .map(|r| r.reference().clone())
    }

    fn sorted_refs(&self, state: KeyState) -> Vec<MasterKeyReference> {
        let mut records: Vec<&MasterKeyRecord> = self.in_state(state).collect();
        records.sort_by(|a, b| {
            a.enabled_since()
                .cmp(&b.enabled_since())
                .then_with(|| a.reference().cmp(b.reference()))
        });
        records.iter().map(|r| r.reference().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(alias: &str) -> MasterKeyReference {
        MasterKeyReference::new("main", alias).unwrap()
    }

    fn snapshot(records: Vec<MasterKeyRecord>) -> RegistrySnapshot {
        let map = records
            .into_iter()
            .map(|r| (r.reference().clone(), r))
            .collect();
        RegistrySnapshot::new(1, map)
    }

    #[test]
    fn active_ordering_by_activation_then_alias() {
        let snap = snapshot(vec![
            MasterKeyRecord::new(key("late"), KeyState::Active, 200),
            MasterKeyRecord::new(key("zeta"), KeyState::Active, 100),
            MasterKeyRecord::new(key("alpha"), KeyState::Active, 100),
        ]);
        assert_eq!(snap.active(), vec![key("alpha"), key("zeta"), key("late")]);
    }

    #[test]
    fn wrap_target_is_most_recently_enabled() {
        let snap = snapshot(vec![
            MasterKeyRecord::new(key("old"), KeyState::Active, 100),
            MasterKeyRecord::new(key("new"), KeyState::Active, 200),
            MasterKeyRecord::new(key("retired"), KeyState::Disabled, 300),
        ]);
        assert_eq!(snap.current_wrap_target(), Some(key("new")));
    }

    #[test]
    fn wrap_target_tie_breaks_lexicographically() {
        let snap = snapshot(vec![
            MasterKeyRecord::new(key("aaa"), KeyState::Active, 100),
            MasterKeyRecord::new(key("bbb"), KeyState::Active, 100),
        ]);
        assert_eq!(snap.current_wrap_target(), Some(key("bbb")));
    }

    #[test]
    fn disabled_record_keeps_activation_time() {
        let record = MasterKeyRecord::new(key("k"), KeyState::Active, 100);
        let disabled = record.disabled(250);
        assert_eq!(disabled.state(), KeyState::Disabled);
        assert_eq!(disabled.enabled_since(), 100);
        assert_eq!(disabled.disabled_since(), Some(250));
    }

    #[test]
    fn re_enabled_record_clears_disablement() {
        let record = MasterKeyRecord::new(key("k"), KeyState::Active, 100);
        let cycled = record.disabled(200).enabled(300);
        assert_eq!(cycled.state(), KeyState::Active);
        assert_eq!(cycled.enabled_since(), 300);
        assert_eq!(cycled.disabled_since(), None);
    }
}
