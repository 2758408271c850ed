const WINDOW: u8 = 128;

/// Remembers which of the 256 one-byte sequence numbers have already been
/// seen in the current session.
///
/// The server retransmits console messages and command responses when it
/// misses our acknowledgment; a tracker lets the receive loop recognise the
/// repeat so it is acknowledged again but not processed twice.
///
/// Sequence numbers wrap, so the tracker only remembers the most recent half
/// of the sequence space: tracking `n` forgets `n + 128`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SequenceTracker {
    seen: [u64; 4],
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, sequence: u8) -> bool {
        let (word, bit) = Self::slot(sequence);
        self.seen[word] & bit != 0
    }

    pub fn start_tracking(&mut self, sequence: u8) {
        let (word, bit) = Self::slot(sequence.wrapping_add(WINDOW));
        self.seen[word] &= !bit;

        let (word, bit) = Self::slot(sequence);
        self.seen[word] |= bit;
    }

    /// Marks `sequence` as unseen again, for when it is about to be reused.
    pub fn forget(&mut self, sequence: u8) {
        let (word, bit) = Self::slot(sequence);
        self.seen[word] &= !bit;
    }

    /// Records `sequence` and reports whether it had been seen before.
    pub fn check_and_track(&mut self, sequence: u8) -> bool {
        let repeated = self.contains(sequence);
        self.start_tracking(sequence);
        repeated
    }

    pub fn len(&self) -> usize {
        self.seen.iter().map(|word| word.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.iter().all(|word| *word == 0)
    }

    pub fn clear(&mut self) {
        self.seen = [0; 4];
    }

    fn slot(sequence: u8) -> (usize, u64) {
        ((sequence / 64) as usize, 1u64 << (sequence % 64))
    }
}
