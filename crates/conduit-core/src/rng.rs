//! Seeded SplitMix64 stream spreading cluster tick offsets.

/// Draws tick offsets for freshly built clusters. The same seed and build
/// order always produce the same offsets.
#[derive(Debug, Clone)]
pub struct OffsetRng {
    state: u64,
}

impl OffsetRng {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    /// An offset in `[0, max_delay)`. Delays of 0 or 1 need no offset and do
    /// not advance the stream.
    pub fn offset(&mut self, max_delay: u64) -> u64 {
        if max_delay <= 1 {
            return 0;
        }
        self.next_u64() % max_delay
    }
}
