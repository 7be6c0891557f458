//! Bloom filter over page index keys.
//!
//! Lets a reader skip a flushed page by looking only at its metadata: a
//! negative answer is exact, a positive one may be a false positive at
//! roughly the configured rate. Bit positions come from double hashing of an
//! MD5 digest, which is stable across builds and platforms so persisted
//! filters stay valid.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BloomFilter {
    num_bits: u64,
    num_hashes: u32,
    words: Vec<u64>,
    inserted: u64,
}

impl BloomFilter {
    /// Sizes the filter for `expected_insertions` keys at false positive rate `fpp`.
    pub fn with_rate(expected_insertions: usize, fpp: f64) -> Self {
        let n = expected_insertions.max(1) as f64;
        let p = fpp.clamp(1e-9, 0.5);
        let ln2 = std::f64::consts::LN_2;

        let num_bits = ((-n * p.ln()) / (ln2 * ln2)).ceil().max(64.0) as u64;
        let num_hashes = ((num_bits as f64 / n) * ln2).round().clamp(1.0, 16.0) as u32;
        let words = vec![0u64; num_bits.div_ceil(64) as usize];

        Self {
            num_bits,
            num_hashes,
            words,
            inserted: 0,
        }
    }

    fn positions(&self, key: &[u8]) -> impl Iterator<Item = u64> + '_ {
        let digest = md5::compute(key).0;
        let mut lo = [0u8; 8];
        let mut hi = [0u8; 8];
        lo.copy_from_slice(&digest[..8]);
        hi.copy_from_slice(&digest[8..]);
        let h1 = u64::from_le_bytes(lo);
        let h2 = u64::from_le_bytes(hi) | 1;

        (0..self.num_hashes as u64).map(move |i| h1.wrapping_add(i.wrapping_mul(h2)) % self.num_bits)
    }

    pub fn insert(&mut self, key: &[u8]) {
        let positions: Vec<u64> = self.positions(key).collect();
        for bit in positions {
            self.words[(bit / 64) as usize] |= 1 << (bit % 64);
        }
        self.inserted += 1;
    }

    pub fn might_contain(&self, key: &[u8]) -> bool {
        self.positions(key)
            .all(|bit| self.words[(bit / 64) as usize] & (1 << (bit % 64)) != 0)
    }

    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    /// Number of `insert` calls, duplicates included.
    pub fn inserted(&self) -> u64 {
        self.inserted
    }

    /// Whether the persisted shape is internally consistent.
    pub fn is_well_formed(&self) -> bool {
        self.num_bits > 0
            && self.num_hashes > 0
            && self.words.len() as u64 == self.num_bits.div_ceil(64)
    }
}
