//! Sister voice rings.
//!
//! Voices started by the same event are linked in a circular doubly-linked
//! ring so they can be counted and released together. Links are voice
//! indices; a voice alone is a ring of one.
//!
//! ```rust
//! use muestra_synth::SisterRings;
//!
//! let mut rings = SisterRings::new(4);
//! rings.join(0, 2);
//! rings.join(0, 3);
//! assert_eq!(rings.count(2), 3);
//! assert_eq!(rings.members(0).collect::<Vec<_>>(), [0, 2, 3]);
//!
//! rings.detach(2);
//! assert_eq!(rings.count(0), 2);
//! assert_eq!(rings.count(2), 1);
//! ```

/// Ring links for a pool of voices.
#[derive(Debug, Clone, Default)]
pub struct SisterRings {
    next: Vec<usize>,
    previous: Vec<usize>,
}

impl SisterRings {
    /// Links for `num_voices` voices, each alone in its ring.
    pub fn new(num_voices: usize) -> Self {
        Self {
            next: (0..num_voices).collect(),
            previous: (0..num_voices).collect(),
        }
    }

    /// Number of voices covered.
    pub fn len(&self) -> usize {
        self.next.len()
    }

    /// Whether no voice is covered.
    pub fn is_empty(&self) -> bool {
        self.next.is_empty()
    }

    /// Next voice in `voice`'s ring.
    pub fn next(&self, voice: usize) -> usize {
        self.next[voice]
    }

    /// Previous voice in `voice`'s ring.
    pub fn previous(&self, voice: usize) -> usize {
        self.previous[voice]
    }

    /// Insert `voice` into the ring of `member`, just before `member`.
    ///
    /// Starting from the first voice of an event and joining the others in
    /// order keeps the ring in start order.
    pub fn join(&mut self, member: usize, voice: usize) {
        if member == voice {
            return;
        }
        self.detach(voice);
        let last = self.previous[member];
        self.next[last] = voice;
        self.previous[voice] = last;
        self.next[voice] = member;
        self.previous[member] = voice;
    }

    /// Remove `voice` from its ring, leaving it alone.
    pub fn detach(&mut self, voice: usize) {
        let next = self.next[voice];
        let previous = self.previous[voice];
        self.next[previous] = next;
        self.previous[next] = previous;
        self.next[voice] = voice;
        self.previous[voice] = voice;
    }

    /// Number of voices in `voice`'s ring.
    pub fn count(&self, voice: usize) -> usize {
        self.members(voice).count()
    }

    /// Whether `a` and `b` share a ring.
    pub fn are_sisters(&self, a: usize, b: usize) -> bool {
        self.members(a).any(|v| v == b)
    }

    /// Voices of `voice`'s ring, starting at `voice`.
    pub fn members(&self, voice: usize) -> Members<'_> {
        Members {
            rings: self,
            start: voice,
            current: Some(voice),
            remaining: self.next.len(),
        }
    }

    /// Check that every link is mirrored by its back link.
    pub fn is_consistent(&self) -> bool {
        (0..self.next.len()).all(|v| self.previous[self.next[v]] == v)
    }
}

/// Iterator over one ring.
#[derive(Debug, Clone)]
pub struct Members<'a> {
    rings: &'a SisterRings,
    start: usize,
    current: Option<usize>,
    remaining: usize,
}

impl Iterator for Members<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let voice = self.current?;
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let next = self.rings.next(voice);
        self.current = (next != self.start).then_some(next);
        Some(voice)
    }
}
