//! Deterministic byte stream derived from a session seed.
//!
//! `key = HKDF-SHA256(seed, info = "chameleon/<domain>")`, then block `n` is
//! `SHA-256(key || n)`. Separate domains give independent streams from the
//! same seed, and the construction does not depend on any RNG crate's
//! internal algorithm, so outputs stay stable across releases.

use hkdf::Hkdf;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::seed::Seed;

pub struct SeedStream {
    key: [u8; 32],
    counter: u64,
    block: [u8; 32],
    pos: usize,
}

impl SeedStream {
    pub fn new(seed: &Seed, domain: &str) -> Self {
        Self {
            key: derive_key(seed, domain),
            counter: 0,
            block: [0u8; 32],
            pos: 32,
        }
    }

    fn refill(&mut self) {
        let mut hasher = Sha256::new();
        hasher.update(self.key);
        hasher.update(self.counter.to_le_bytes());
        self.block.copy_from_slice(&hasher.finalize());
        self.counter = self.counter.wrapping_add(1);
        self.pos = 0;
    }
}

/// 32-byte subkey of `seed` for `domain`.
pub fn derive_key(seed: &Seed, domain: &str) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(None, seed.as_bytes());
    let mut okm = [0u8; 32];
    let info = format!("chameleon/{}", domain);
    // 32 bytes is far below the HKDF-SHA256 output limit of 255 * 32.
    if hk.expand(info.as_bytes(), &mut okm).is_err() {
        unreachable!("HKDF output length is fixed at 32 bytes");
    }
    okm
}

/// First four bytes of a domain subkey, as a little-endian word.
pub fn derive_word(seed: &Seed, domain: &str) -> u32 {
    let mut key = derive_key(seed, domain);
    let word = u32::from_le_bytes([key[0], key[1], key[2], key[3]]);
    key.zeroize();
    word
}

impl RngCore for SeedStream {
    fn next_u32(&mut self) -> u32 {
        let mut buf = [0u8; 4];
        self.fill_bytes(&mut buf);
        u32::from_le_bytes(buf)
    }

    fn next_u64(&mut self) -> u64 {
        let mut buf = [0u8; 8];
        self.fill_bytes(&mut buf);
        u64::from_le_bytes(buf)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for byte in dest.iter_mut() {
            if self.pos == self.block.len() {
                self.refill();
            }
            *byte = self.block[self.pos];
            self.pos += 1;
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

impl Drop for SeedStream {
    fn drop(&mut self) {
        self.key.zeroize();
        self.block.zeroize();
    }
}
