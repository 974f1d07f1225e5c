//! Voice pool and polyphony arbitration.
//!
//! The manager owns the fixed voice pool, the sister rings, and one voice
//! list per polyphony scope (engine, region, group, set). Lists are kept in
//! start order and their capacity is reserved when the pool is built, so
//! arbitration never allocates.
//!
//! For each region an event triggers, the limits are checked in order:
//!
//! ```text
//! note polyphony -> region -> group -> set -> parent sets -> engine
//! ```
//!
//! Each full scope releases one voice, chosen by the configured
//! [`StealingAlgorithm`], together with its sisters.

use std::collections::HashMap;
use std::sync::Arc;

use muestra_core::block;
use muestra_io::FilePool;

use crate::midi_state::MidiState;
use crate::region::{Region, SelfMask};
use crate::region_set::{PolyphonyGroup, RegionSet, SetId, SetKind};
use crate::sister::SisterRings;
use crate::stealing::{self, StealingAlgorithm};
use crate::voice::{TriggerEvent, Voice};

#[derive(Debug, Clone, Copy)]
struct Assignment {
    region: usize,
    group: usize,
    set: SetId,
}

/// Owner of the voice pool.
#[derive(Debug)]
pub struct VoiceManager {
    voices: Vec<Voice>,
    rings: SisterRings,
    assignments: Vec<Option<Assignment>>,
    active: Vec<usize>,
    region_voices: Vec<Vec<usize>>,
    groups: Vec<PolyphonyGroup>,
    group_lookup: HashMap<u32, usize>,
    sets: Vec<RegionSet>,
    stealing: StealingAlgorithm,
    polyphony: usize,
    sequence: u64,
    scratch: Vec<usize>,
    render_left: Vec<f32>,
    render_right: Vec<f32>,
}

impl VoiceManager {
    /// Empty manager with the global set and the default group. Call
    /// [`resize`](Self::resize) to build the pool.
    pub fn new(stealing: StealingAlgorithm) -> Self {
        let mut manager = Self {
            voices: Vec::new(),
            rings: SisterRings::default(),
            assignments: Vec::new(),
            active: Vec::new(),
            region_voices: Vec::new(),
            groups: Vec::new(),
            group_lookup: HashMap::new(),
            sets: Vec::new(),
            stealing,
            polyphony: 0,
            sequence: 0,
            scratch: Vec::new(),
            render_left: Vec::new(),
            render_right: Vec::new(),
        };
        manager.clear_regions();
        manager
    }

    /// Rebuild the pool with `pool_size` voices, `polyphony` of which may
    /// play unreleased at once. Not real-time safe; all voices stop.
    pub fn resize(
        &mut self,
        polyphony: usize,
        pool_size: usize,
        pool: &FilePool,
        sample_rate: f32,
        samples_per_block: usize,
    ) {
        let pool_size = pool_size.max(polyphony);
        self.voices = (0..pool_size)
            .map(|index| Voice::new(index, pool.new_slot(), sample_rate, samples_per_block))
            .collect();
        self.rings = SisterRings::new(pool_size);
        self.assignments = vec![None; pool_size];
        self.polyphony = polyphony;

        self.active = Vec::with_capacity(pool_size);
        self.scratch = Vec::with_capacity(pool_size);
        for list in &mut self.region_voices {
            *list = Vec::with_capacity(pool_size);
        }
        for group in &mut self.groups {
            group.reserve_voices(pool_size);
        }
        for set in &mut self.sets {
            set.reserve_voices(pool_size);
        }
        self.render_left = vec![0.0; samples_per_block];
        self.render_right = vec![0.0; samples_per_block];

        tracing::debug!(polyphony, pool_size, "voice pool rebuilt");
    }

    /// Change the output sample rate of every voice. Not real-time safe.
    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        for voice in &mut self.voices {
            voice.set_sample_rate(sample_rate);
        }
    }

    /// Change the block size of every voice. Not real-time safe.
    pub fn set_samples_per_block(&mut self, samples_per_block: usize) {
        for voice in &mut self.voices {
            voice.set_samples_per_block(samples_per_block);
        }
        self.render_left.resize(samples_per_block, 0.0);
        self.render_right.resize(samples_per_block, 0.0);
    }

    /// Change the stealing algorithm.
    pub fn set_stealing(&mut self, stealing: StealingAlgorithm) {
        self.stealing = stealing;
    }

    /// Current stealing algorithm.
    pub fn stealing(&self) -> StealingAlgorithm {
        self.stealing
    }

    /// Voices that may play unreleased at once.
    pub fn polyphony(&self) -> usize {
        self.polyphony
    }

    /// Drop every region, set and group, stopping all voices.
    pub fn clear_regions(&mut self) {
        self.reset_all();
        let capacity = self.voices.len();
        self.region_voices.clear();
        self.groups.clear();
        self.group_lookup.clear();
        self.sets.clear();

        let mut global = RegionSet::new(SetKind::Global, None, None);
        global.reserve_voices(capacity);
        self.sets.push(global);
        self.group_index(0);
    }

    /// Register a region's scopes. Its id must be the next region index and
    /// its parent set must exist.
    pub(crate) fn add_region(&mut self, region: &mut Region) {
        let group_index = self.group_index(region.group);
        region.set_group_index(group_index);
        self.sets[region.parent.0].add_region(region.id());
        self.region_voices.push(Vec::with_capacity(self.voices.len()));
    }

    /// Add a region set below `parent`.
    pub(crate) fn add_set(&mut self, kind: SetKind, parent: SetId, polyphony: Option<u32>) -> SetId {
        let id = SetId(self.sets.len());
        let mut set = RegionSet::new(kind, Some(parent), polyphony);
        set.reserve_voices(self.voices.len());
        self.sets.push(set);
        self.sets[parent.0].add_subset(id);
        id
    }

    /// Whether `id` names an existing set.
    pub fn has_set(&self, id: SetId) -> bool {
        id.0 < self.sets.len()
    }

    /// Change the voice limit of a set.
    pub(crate) fn set_set_polyphony(&mut self, id: SetId, polyphony: Option<u32>) {
        if let Some(set) = self.sets.get_mut(id.0) {
            set.set_polyphony(polyphony);
        }
    }

    /// Set the voice limit of a `group=` id, creating the group if needed.
    pub fn set_group_polyphony(&mut self, group: u32, limit: Option<u32>) {
        let index = self.group_index(group);
        self.groups[index].set_limit(limit);
    }

    fn group_index(&mut self, group: u32) -> usize {
        if let Some(&index) = self.group_lookup.get(&group) {
            return index;
        }
        let index = self.groups.len();
        let mut entry = PolyphonyGroup::new(group);
        entry.reserve_voices(self.voices.len());
        self.groups.push(entry);
        self.group_lookup.insert(group, index);
        index
    }

    /// All voices of the pool.
    pub fn voices(&self) -> &[Voice] {
        &self.voices
    }

    pub(crate) fn voices_mut(&mut self) -> &mut [Voice] {
        &mut self.voices
    }

    /// Sister ring links.
    pub fn rings(&self) -> &SisterRings {
        &self.rings
    }

    /// Region sets, indexed by [`SetId`].
    pub fn sets(&self) -> &[RegionSet] {
        &self.sets
    }

    /// Polyphony group by `group=` id.
    pub fn group(&self, group: u32) -> Option<&PolyphonyGroup> {
        self.group_lookup.get(&group).map(|&index| &self.groups[index])
    }

    /// Voices playing `region`, in start order.
    pub fn region_voices(&self, region: usize) -> &[usize] {
        self.region_voices
            .get(region)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Voices that are not idle, in start order.
    pub fn active_voices(&self) -> &[usize] {
        &self.active
    }

    /// Number of voices that are not idle.
    pub fn num_active_voices(&self) -> usize {
        self.active.len()
    }

    /// Number of voices that are playing and not released.
    pub fn num_playing_voices(&self) -> usize {
        self.active
            .iter()
            .filter(|&&v| !self.voices[v].released_or_free())
            .count()
    }

    /// Index of an idle voice, if any.
    pub fn find_free_voice(&mut self) -> Option<usize> {
        self.sync();
        self.voices.iter().position(Voice::is_free)
    }

    /// Start `region` on the idle voice `voice` and register it in its
    /// scopes. Voices started with the same `ring` become sisters.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn start_voice(
        &mut self,
        voice: usize,
        region: Arc<Region>,
        delay: i32,
        trigger: TriggerEvent,
        midi: &MidiState,
        pool: &FilePool,
        ring: &mut Option<usize>,
    ) -> bool {
        let assignment = Assignment {
            region: region.id(),
            group: region.group_index(),
            set: region.parent,
        };

        self.sequence += 1;
        if !self.voices[voice].start(region, delay, trigger, self.sequence, midi, pool) {
            return false;
        }

        self.active.push(voice);
        self.region_voices[assignment.region].push(voice);
        self.groups[assignment.group].register_voice(voice);
        let mut set = Some(assignment.set);
        while let Some(id) = set {
            self.sets[id.0].register_voice(voice);
            set = self.sets[id.0].parent();
        }
        self.assignments[voice] = Some(assignment);

        self.rings.detach(voice);
        match *ring {
            Some(head) => self.rings.join(head, voice),
            None => *ring = Some(voice),
        }
        true
    }

    /// Enforce every limit that applies before `region` starts for `trigger`.
    pub(crate) fn check_polyphony(&mut self, region: &Region, delay: i32, trigger: TriggerEvent) {
        self.check_note_polyphony(region, delay, trigger);

        if let Some(limit) = region.polyphony {
            let scope = &self.region_voices[region.id()];
            if let Some(victim) = stealing::check_polyphony(
                self.stealing,
                scope,
                limit as usize,
                &self.voices,
                &self.rings,
                &mut self.scratch,
            ) {
                self.off_all_sisters(victim, delay);
            }
        }

        let group = &self.groups[region.group_index()];
        if let Some(limit) = group.limit() {
            if let Some(victim) = stealing::check_polyphony(
                self.stealing,
                group.voices(),
                limit as usize,
                &self.voices,
                &self.rings,
                &mut self.scratch,
            ) {
                self.off_all_sisters(victim, delay);
            }
        }

        let mut set = Some(region.parent);
        while let Some(id) = set {
            let entry = &self.sets[id.0];
            set = entry.parent();
            let Some(limit) = entry.polyphony() else {
                continue;
            };
            if let Some(victim) = stealing::check_polyphony(
                self.stealing,
                entry.voices(),
                limit as usize,
                &self.voices,
                &self.rings,
                &mut self.scratch,
            ) {
                self.off_all_sisters(victim, delay);
            }
        }

        if let Some(victim) = stealing::check_polyphony(
            self.stealing,
            &self.active,
            self.polyphony,
            &self.voices,
            &self.rings,
            &mut self.scratch,
        ) {
            self.off_all_sisters(victim, delay);
        }
    }

    fn check_note_polyphony(&mut self, region: &Region, delay: i32, trigger: TriggerEvent) {
        let Some(limit) = region.note_polyphony else {
            return;
        };

        let mut count = 0usize;
        let mut candidate: Option<usize> = None;
        for &v in &self.active {
            let voice = &self.voices[v];
            if voice.released_or_free() {
                continue;
            }
            let Some(playing) = voice.region() else {
                continue;
            };
            let other = voice.trigger();
            if playing.group != region.group
                || other.kind != trigger.kind
                || other.number != trigger.number
            {
                continue;
            }

            count += 1;
            candidate = match region.self_mask {
                // Earliest started wins ties: `active` is in start order
                SelfMask::Mask if other.value <= trigger.value => match candidate {
                    Some(c) if self.voices[c].trigger().value <= other.value => Some(c),
                    _ => Some(v),
                },
                SelfMask::Mask => candidate,
                SelfMask::DontMask => match candidate {
                    Some(c) if self.voices[c].sequence() <= voice.sequence() => Some(c),
                    _ => Some(v),
                },
            };
        }

        if let Some(victim) = candidate {
            if count >= limit as usize {
                self.off_all_sisters(victim, delay);
            }
        }
    }

    /// Turn off `voice` and every sister, using each region's off mode.
    pub fn off_all_sisters(&mut self, voice: usize, delay: i32) {
        for v in self.rings.members(voice) {
            self.voices[v].off(delay);
        }
    }

    /// Release `voice` and every sister.
    pub fn release_all_sisters(&mut self, voice: usize, delay: i32) {
        for v in self.rings.members(voice) {
            self.voices[v].release(delay);
        }
    }

    /// Release the voices turned off by `group`, reporting the events that
    /// started them into `killed`.
    pub(crate) fn check_off_groups(&mut self, delay: i32, group: u32, killed: &mut Vec<TriggerEvent>) {
        for &v in &self.active {
            let voice = &mut self.voices[v];
            if voice.check_off_group(delay, group) && killed.len() < killed.capacity() {
                killed.push(voice.trigger());
            }
        }
    }

    /// Mix every active voice into `left` and `right`.
    ///
    /// The slices are overwritten and must not be longer than the block size.
    pub fn render_block(&mut self, left: &mut [f32], right: &mut [f32]) {
        let n = left.len().min(right.len()).min(self.render_left.len());
        left[..n].fill(0.0);
        right[..n].fill(0.0);

        for &v in &self.active {
            let scratch_left = &mut self.render_left[..n];
            let scratch_right = &mut self.render_right[..n];
            self.voices[v].render_block(scratch_left, scratch_right);
            block::add(&mut left[..n], scratch_left);
            block::add(&mut right[..n], scratch_right);
        }

        self.sync();
    }

    /// Stop every voice immediately.
    pub fn reset_all(&mut self) {
        for voice in &mut self.voices {
            voice.reset();
        }
        self.sync();
    }

    /// Drop voices that went idle from every scope list and ring.
    pub fn sync(&mut self) {
        let mut i = 0;
        while i < self.active.len() {
            let v = self.active[i];
            if self.voices[v].is_free() {
                self.active.remove(i);
                self.unassign(v);
            } else {
                i += 1;
            }
        }
    }

    fn unassign(&mut self, voice: usize) {
        let Some(assignment) = self.assignments[voice].take() else {
            return;
        };
        if let Some(list) = self.region_voices.get_mut(assignment.region) {
            if let Some(position) = list.iter().position(|&v| v == voice) {
                list.remove(position);
            }
        }
        if let Some(group) = self.groups.get_mut(assignment.group) {
            group.remove_voice(voice);
        }
        let mut set = Some(assignment.set);
        while let Some(id) = set {
            let Some(entry) = self.sets.get_mut(id.0) else {
                break;
            };
            entry.remove_voice(voice);
            set = entry.parent();
        }
        self.rings.detach(voice);
    }

    /// Check that every scope list only holds active voices and that every
    /// active voice sits in the engine list once.
    pub fn is_consistent(&self) -> bool {
        let active_ok = self
            .active
            .iter()
            .all(|&v| !self.voices[v].is_free() && self.active.iter().filter(|&&w| w == v).count() == 1);
        let lists_ok = self
            .region_voices
            .iter()
            .flatten()
            .chain(self.groups.iter().flat_map(|g| g.voices()))
            .chain(self.sets.iter().flat_map(|s| s.voices()))
            .all(|v| self.active.contains(v));
        active_ok && lists_ok && self.rings.is_consistent()
    }
}
