//! Panic chord definition and press-state tracking.

use crate::key::{KeyCode, UnknownKey};
use anyhow::{anyhow, Result};

/// One group of a panic chord.
///
/// A group lists interchangeable keys (`KEY_LEFTCTRL|KEY_RIGHTCTRL`). It counts
/// as held when the most recent event among its keys was a press.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyGroup {
    keys: Vec<KeyCode>,
}

impl KeyGroup {
    /// Create a group from key codes. Duplicates are dropped, order is kept.
    pub fn new(keys: impl IntoIterator<Item = KeyCode>) -> Self {
        let mut group = Vec::new();
        for key in keys {
            if !group.contains(&key) {
                group.push(key);
            }
        }
        Self { keys: group }
    }

    pub fn keys(&self) -> &[KeyCode] {
        &self.keys
    }

    pub fn contains(&self, key: KeyCode) -> bool {
        self.keys.contains(&key)
    }

    /// Parse a group string like `KEY_POWER` or `KEY_LEFTCTRL|KEY_RIGHTCTRL`.
    pub fn parse(s: &str) -> Result<Self> {
        let keys = s
            .split('|')
            .filter(|part| !part.is_empty())
            .map(KeyCode::parse)
            .collect::<Result<Vec<_>, UnknownKey>>()?;

        if keys.is_empty() {
            return Err(anyhow!("Empty key group in '{}'", s));
        }

        Ok(Self::new(keys))
    }
}

impl std::fmt::Display for KeyGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.keys.iter().map(|k| k.to_string()).collect();
        write!(f, "{}", parts.join("|"))
    }
}

/// A panic chord: every group must be held at the same time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Chord {
    groups: Vec<KeyGroup>,
}

impl Chord {
    pub fn new(groups: Vec<KeyGroup>) -> Self {
        Self { groups }
    }

    pub fn groups(&self) -> &[KeyGroup] {
        &self.groups
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Every key referenced by any group, in first-seen order.
    pub fn all_keys(&self) -> Vec<KeyCode> {
        let mut keys = Vec::new();
        for key in self.groups.iter().flat_map(|g| g.keys()) {
            if !keys.contains(key) {
                keys.push(*key);
            }
        }
        keys
    }
}

impl std::fmt::Display for Chord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.groups.iter().map(|g| g.to_string()).collect();
        write!(f, "{}", parts.join(","))
    }
}

/// Parse a chord string like `KEY_LEFTCTRL,KEY_LEFTALT|KEY_RIGHTALT,KEY_DELETE`.
///
/// Commas separate groups, `|` separates alternatives within a group.
pub fn parse_chord(s: &str) -> Result<Chord> {
    let groups = s
        .split(',')
        .filter(|part| !part.is_empty())
        .map(KeyGroup::parse)
        .collect::<Result<Vec<_>>>()?;

    if groups.is_empty() {
        return Err(anyhow!("Empty key list"));
    }

    Ok(Chord::new(groups))
}

/// Tracks which groups of a [`Chord`] are currently held.
#[derive(Debug, Clone)]
pub struct ChordTracker {
    chord: Chord,
    active: Vec<bool>,
}

impl ChordTracker {
    pub fn new(chord: Chord) -> Self {
        let active = vec![false; chord.groups.len()];
        Self { chord, active }
    }

    /// Record a press or release of `key`.
    ///
    /// Every group containing the key takes the key's state, so a release
    /// clears the group even if another of its keys is still down.
    pub fn apply_key_event(&mut self, key: KeyCode, pressed: bool) {
        for (group, active) in self.chord.groups.iter().zip(self.active.iter_mut()) {
            if group.contains(key) {
                *active = pressed;
            }
        }
    }

    /// True iff every group is held. An empty chord is never active.
    pub fn all_groups_active(&self) -> bool {
        !self.active.is_empty() && self.active.iter().all(|a| *a)
    }

    pub fn is_group_active(&self, idx: usize) -> bool {
        self.active.get(idx).copied().unwrap_or(false)
    }
}
