//! Per-opcode execution counters.

use crate::bytecode::Opcode;

/// Counts how many times each opcode retired. Enabled with the `profile-ops`
/// feature; the dispatch loop records into it before executing each op.
pub struct OpProfiler {
    counts: [u64; 256],
}

impl OpProfiler {
    pub fn new() -> Self {
        Self { counts: [0; 256] }
    }

    #[inline]
    pub(crate) fn record(&mut self, op: Opcode) {
        self.counts[op as u8 as usize] += 1;
    }

    pub fn count(&self, op: Opcode) -> u64 {
        self.counts[op as u8 as usize]
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    pub fn reset(&mut self) {
        self.counts = [0; 256];
    }
}

impl Default for OpProfiler {
    fn default() -> Self {
        Self::new()
    }
}
