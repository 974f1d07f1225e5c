//! Per-channel MIDI state seen by the engine.

/// Number of MIDI channels.
pub const NUM_CHANNELS: usize = 16;
/// Number of controllers per channel.
pub const NUM_CCS: usize = 128;
/// Number of note numbers.
pub const NUM_NOTES: usize = 128;

#[derive(Debug, Clone)]
struct ChannelState {
    cc: [u8; NUM_CCS],
    note_velocity: [u8; NUM_NOTES],
    note_active: [bool; NUM_NOTES],
    deferred_release: [bool; NUM_NOTES],
    pitch_bend: i32,
    aftertouch: u8,
}

impl Default for ChannelState {
    fn default() -> Self {
        Self {
            cc: [0; NUM_CCS],
            note_velocity: [0; NUM_NOTES],
            note_active: [false; NUM_NOTES],
            deferred_release: [false; NUM_NOTES],
            pitch_bend: 0,
            aftertouch: 0,
        }
    }
}

/// Controller values, note velocities, pitch bend and aftertouch for all
/// channels, plus release triggers held back by the sustain pedal.
///
/// Channels are numbered 1 to 16; other channel numbers read as channel 1
/// and are ignored on write by the engine.
#[derive(Debug, Clone)]
pub struct MidiState {
    channels: Box<[ChannelState; NUM_CHANNELS]>,
}

impl Default for MidiState {
    fn default() -> Self {
        Self::new()
    }
}

impl MidiState {
    /// All controllers at 0, no notes held, wheel centred.
    pub fn new() -> Self {
        Self {
            channels: Box::new(core::array::from_fn(|_| ChannelState::default())),
        }
    }

    /// Whether `channel` is a valid 1-based channel number.
    pub fn is_valid_channel(channel: u8) -> bool {
        (1..=NUM_CHANNELS as u8).contains(&channel)
    }

    fn channel(&self, channel: u8) -> &ChannelState {
        let index = usize::from(channel.saturating_sub(1)).min(NUM_CHANNELS - 1);
        &self.channels[index]
    }

    fn channel_mut(&mut self, channel: u8) -> &mut ChannelState {
        let index = usize::from(channel.saturating_sub(1)).min(NUM_CHANNELS - 1);
        &mut self.channels[index]
    }

    /// Record a note-on.
    pub fn note_on_event(&mut self, channel: u8, note: u8, velocity: u8) {
        let state = self.channel_mut(channel);
        let note = usize::from(note.min(127));
        state.note_velocity[note] = velocity;
        state.note_active[note] = true;
    }

    /// Record a note-off.
    pub fn note_off_event(&mut self, channel: u8, note: u8) {
        self.channel_mut(channel).note_active[usize::from(note.min(127))] = false;
    }

    /// Velocity of the last note-on for `note`.
    pub fn note_velocity(&self, channel: u8, note: u8) -> u8 {
        self.channel(channel).note_velocity[usize::from(note.min(127))]
    }

    /// Whether `note` is held.
    pub fn is_note_active(&self, channel: u8, note: u8) -> bool {
        self.channel(channel).note_active[usize::from(note.min(127))]
    }

    /// Number of held notes on `channel`.
    pub fn active_notes(&self, channel: u8) -> usize {
        self.channel(channel).note_active.iter().filter(|&&on| on).count()
    }

    /// Record a controller change.
    pub fn cc_event(&mut self, channel: u8, cc: u8, value: u8) {
        self.channel_mut(channel).cc[usize::from(cc.min(127))] = value.min(127);
    }

    /// Current value of a controller.
    pub fn cc(&self, channel: u8, cc: u8) -> u8 {
        self.channel(channel).cc[usize::from(cc.min(127))]
    }

    /// Record a pitch wheel move (`-8192..=8191`).
    pub fn pitch_bend_event(&mut self, channel: u8, value: i32) {
        self.channel_mut(channel).pitch_bend = value.clamp(-8192, 8191);
    }

    /// Current pitch wheel value.
    pub fn pitch_bend(&self, channel: u8) -> i32 {
        self.channel(channel).pitch_bend
    }

    /// Record channel aftertouch.
    pub fn aftertouch_event(&mut self, channel: u8, value: u8) {
        self.channel_mut(channel).aftertouch = value.min(127);
    }

    /// Current channel aftertouch.
    pub fn aftertouch(&self, channel: u8) -> u8 {
        self.channel(channel).aftertouch
    }

    /// Hold back the release trigger of `note` until the pedal lifts.
    pub fn defer_release(&mut self, channel: u8, note: u8) {
        self.channel_mut(channel).deferred_release[usize::from(note.min(127))] = true;
    }

    /// Cancel a held-back release trigger (the note was played again).
    pub fn cancel_deferred_release(&mut self, channel: u8, note: u8) {
        self.channel_mut(channel).deferred_release[usize::from(note.min(127))] = false;
    }

    /// Take the next held-back release trigger of `channel`, if any.
    pub fn pop_deferred_release(&mut self, channel: u8) -> Option<u8> {
        let state = self.channel_mut(channel);
        let note = state.deferred_release.iter().position(|&deferred| deferred)?;
        state.deferred_release[note] = false;
        Some(note as u8)
    }

    /// Back to the power-on state.
    pub fn reset(&mut self) {
        for state in self.channels.iter_mut() {
            *state = ChannelState::default();
        }
    }

    /// Reset controllers, wheel and aftertouch of one channel, keeping notes.
    pub fn reset_controllers(&mut self, channel: u8) {
        let state = self.channel_mut(channel);
        state.cc = [0; NUM_CCS];
        state.pitch_bend = 0;
        state.aftertouch = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let midi = MidiState::new();
        assert_eq!(midi.cc(1, 64), 0);
        assert_eq!(midi.pitch_bend(1), 0);
        assert_eq!(midi.active_notes(1), 0);
    }

    #[test]
    fn test_note_tracking() {
        let mut midi = MidiState::new();
        midi.note_on_event(1, 60, 90);
        midi.note_on_event(1, 64, 30);
        assert_eq!(midi.note_velocity(1, 60), 90);
        assert_eq!(midi.active_notes(1), 2);
        midi.note_off_event(1, 60);
        assert!(!midi.is_note_active(1, 60));
        // The velocity stays available for release triggers
        assert_eq!(midi.note_velocity(1, 60), 90);
        assert_eq!(midi.active_notes(2), 0);
    }

    #[test]
    fn test_channels_are_independent() {
        let mut midi = MidiState::new();
        midi.cc_event(2, 7, 100);
        assert_eq!(midi.cc(2, 7), 100);
        assert_eq!(midi.cc(1, 7), 0);
        midi.pitch_bend_event(3, 20000);
        assert_eq!(midi.pitch_bend(3), 8191);
    }

    #[test]
    fn test_deferred_releases() {
        let mut midi = MidiState::new();
        midi.defer_release(1, 62);
        midi.defer_release(1, 60);
        midi.defer_release(1, 64);
        midi.cancel_deferred_release(1, 64);
        assert_eq!(midi.pop_deferred_release(1), Some(60));
        assert_eq!(midi.pop_deferred_release(1), Some(62));
        assert_eq!(midi.pop_deferred_release(1), None);
    }

    #[test]
    fn test_reset_controllers_keeps_notes() {
        let mut midi = MidiState::new();
        midi.note_on_event(1, 60, 100);
        midi.cc_event(1, 64, 127);
        midi.aftertouch_event(1, 40);
        midi.reset_controllers(1);
        assert_eq!(midi.cc(1, 64), 0);
        assert_eq!(midi.aftertouch(1), 0);
        assert!(midi.is_note_active(1, 60));
        assert!(MidiState::is_valid_channel(16));
        assert!(!MidiState::is_valid_channel(0));
    }
}
