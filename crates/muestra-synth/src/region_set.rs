//! Region sets: the master/group hierarchy above regions.
//!
//! Sets form a tree rooted at the global set. Each set keeps the list of
//! voices playing any region below it, in start order, so its length is the
//! live voice count used for the set's polyphony limit.

use serde::{Deserialize, Serialize};

/// Index of a region set in its engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SetId(pub usize);

impl SetId {
    /// The root set every engine has.
    pub const GLOBAL: SetId = SetId(0);
}

impl Default for SetId {
    fn default() -> Self {
        Self::GLOBAL
    }
}

/// Level of a set in the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetKind {
    /// The root.
    Global,
    /// A master header.
    Master,
    /// A group header.
    Group,
}

/// One node of the region hierarchy.
#[derive(Debug, Clone)]
pub struct RegionSet {
    kind: SetKind,
    parent: Option<SetId>,
    polyphony: Option<u32>,
    regions: Vec<usize>,
    subsets: Vec<SetId>,
    voices: Vec<usize>,
}

impl RegionSet {
    pub(crate) fn new(kind: SetKind, parent: Option<SetId>, polyphony: Option<u32>) -> Self {
        Self {
            kind,
            parent,
            polyphony,
            regions: Vec::new(),
            subsets: Vec::new(),
            voices: Vec::new(),
        }
    }

    /// Level of the set.
    pub fn kind(&self) -> SetKind {
        self.kind
    }

    /// Parent set; `None` for the global set.
    pub fn parent(&self) -> Option<SetId> {
        self.parent
    }

    /// Voice limit of the set.
    pub fn polyphony(&self) -> Option<u32> {
        self.polyphony
    }

    /// Regions attached directly to the set.
    pub fn regions(&self) -> &[usize] {
        &self.regions
    }

    /// Child sets.
    pub fn subsets(&self) -> &[SetId] {
        &self.subsets
    }

    /// Voices currently playing a region below the set.
    pub fn voices(&self) -> &[usize] {
        &self.voices
    }

    pub(crate) fn set_polyphony(&mut self, polyphony: Option<u32>) {
        self.polyphony = polyphony;
    }

    pub(crate) fn add_region(&mut self, region: usize) {
        self.regions.push(region);
    }

    pub(crate) fn add_subset(&mut self, set: SetId) {
        self.subsets.push(set);
    }

    pub(crate) fn reserve_voices(&mut self, capacity: usize) {
        self.voices.clear();
        self.voices.reserve(capacity);
    }

    pub(crate) fn register_voice(&mut self, voice: usize) {
        if !self.voices.contains(&voice) {
            self.voices.push(voice);
        }
    }

    pub(crate) fn remove_voice(&mut self, voice: usize) {
        if let Some(position) = self.voices.iter().position(|&v| v == voice) {
            self.voices.remove(position);
        }
    }

    pub(crate) fn clear_voices(&mut self) {
        self.voices.clear();
    }
}

/// Polyphony group declared with `group=`: a limit and its voices.
#[derive(Debug, Clone, Default)]
pub struct PolyphonyGroup {
    id: u32,
    limit: Option<u32>,
    voices: Vec<usize>,
}

impl PolyphonyGroup {
    pub(crate) fn new(id: u32) -> Self {
        Self {
            id,
            limit: None,
            voices: Vec::new(),
        }
    }

    /// Group id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Voice limit of the group.
    pub fn limit(&self) -> Option<u32> {
        self.limit
    }

    /// Voices currently playing a region of the group.
    pub fn voices(&self) -> &[usize] {
        &self.voices
    }

    pub(crate) fn set_limit(&mut self, limit: Option<u32>) {
        self.limit = limit;
    }

    pub(crate) fn reserve_voices(&mut self, capacity: usize) {
        self.voices.clear();
        self.voices.reserve(capacity);
    }

    pub(crate) fn register_voice(&mut self, voice: usize) {
        if !self.voices.contains(&voice) {
            self.voices.push(voice);
        }
    }

    pub(crate) fn remove_voice(&mut self, voice: usize) {
        if let Some(position) = self.voices.iter().position(|&v| v == voice) {
            self.voices.remove(position);
        }
    }

    pub(crate) fn clear_voices(&mut self) {
        self.voices.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voice_registration() {
        let mut set = RegionSet::new(SetKind::Master, Some(SetId::GLOBAL), Some(2));
        set.reserve_voices(4);
        set.register_voice(3);
        set.register_voice(1);
        set.register_voice(3);
        assert_eq!(set.voices(), &[3, 1]);
        set.remove_voice(3);
        assert_eq!(set.voices(), &[1]);
        set.remove_voice(7);
        assert_eq!(set.voices(), &[1]);
        assert_eq!(set.polyphony(), Some(2));
        assert_eq!(set.kind(), SetKind::Master);
    }

    #[test]
    fn test_group_limit() {
        let mut group = PolyphonyGroup::new(5);
        assert_eq!(group.id(), 5);
        assert_eq!(group.limit(), None);
        group.set_limit(Some(1));
        group.register_voice(0);
        assert_eq!(group.voices(), &[0]);
        group.clear_voices();
        assert!(group.voices().is_empty());
        assert_eq!(group.limit(), Some(1));
    }
}
