//! Seeded xorshift64* stream.
//!
//! Every worker owns one of these; the layout derives worker seeds from a single top-level
//! stream so a `(graph, workers, seed)` triple always replays the same run.

#[derive(Debug, Clone)]
pub struct XorShift64Star {
    state: u64,
}

impl XorShift64Star {
    pub fn new(seed: u64) -> Self {
        // Zero is a fixed point of the xorshift step.
        let mut rng = Self { state: 1 };
        rng.mix_u64(seed);
        rng
    }

    fn mix_u64(&mut self, v: u64) {
        self.state ^= v.wrapping_mul(0x9E3779B97F4A7C15_u64);
        if self.state == 0 {
            self.state = 1;
        }
        let _ = self.next_u64();
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545F4914F6CDD1D_u64)
    }

    /// Uniform sample in `[0, 1)` with 53 bits of precision.
    pub fn next_f64_unit(&mut self) -> f64 {
        let u = self.next_u64() >> 11;
        (u as f64) / ((1u64 << 53) as f64)
    }

    /// Seed for a child stream. Consumes exactly one draw.
    pub fn fork_seed(&mut self) -> u64 {
        self.next_u64()
    }
}
