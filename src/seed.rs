//! Session seed generation.
//!
//! A [`Seed`] is 256 bits from a CSPRNG, hex-encoded on the wire. It is the
//! only input to profile synthesis and jitter, so two contexts holding the
//! same seed present the same device.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{ChameleonError, Result};

pub const SEED_LEN: usize = 32;

/// Root entropy of one session.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Seed([u8; SEED_LEN]);

impl Seed {
    pub fn from_bytes(bytes: [u8; SEED_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let bytes = hex::decode(hex_str.trim())
            .map_err(|e| ChameleonError::InvalidSeed(format!("not hex: {}", e)))?;
        let bytes: [u8; SEED_LEN] = bytes.try_into().map_err(|v: Vec<u8>| {
            ChameleonError::InvalidSeed(format!("expected {} bytes, got {}", SEED_LEN, v.len()))
        })?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; SEED_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 8 hex chars, the only form that goes to logs.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl PartialEq for Seed {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for Seed {}

impl fmt::Debug for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seed({}...)", self.short())
    }
}

impl Serialize for Seed {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Seed {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Seed::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// A source of cryptographically secure random bytes.
pub trait EntropySource {
    fn name(&self) -> &'static str;
    fn fill(&self, dest: &mut [u8]) -> Result<()>;
}

/// Primary source: `getrandom` (backed by `crypto.getRandomValues` in WASM).
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemEntropy;

impl EntropySource for SystemEntropy {
    fn name(&self) -> &'static str {
        "getrandom"
    }

    fn fill(&self, dest: &mut [u8]) -> Result<()> {
        getrandom::getrandom(dest).map_err(|e| ChameleonError::EntropyUnavailable(e.to_string()))
    }
}

/// Secondary source: WebCrypto reached through the JS global directly, so it
/// still works when the `getrandom` shim cannot locate `crypto`
/// (e.g. a service worker scope it does not recognise).
#[derive(Debug, Default, Clone, Copy)]
pub struct WebCryptoEntropy;

impl EntropySource for WebCryptoEntropy {
    fn name(&self) -> &'static str {
        "webcrypto"
    }

    #[cfg(target_arch = "wasm32")]
    fn fill(&self, dest: &mut [u8]) -> Result<()> {
        use js_sys::{Array, Function, Reflect, Uint8Array};
        use wasm_bindgen::{JsCast, JsValue};

        let unavailable = |what: &str| ChameleonError::EntropyUnavailable(what.to_string());

        let crypto = Reflect::get(&js_sys::global(), &JsValue::from_str("crypto"))
            .map_err(|_| unavailable("crypto not reachable"))?;
        if crypto.is_undefined() {
            return Err(unavailable("crypto is undefined"));
        }
        let get_random_values: Function = Reflect::get(&crypto, &JsValue::from_str("getRandomValues"))
            .map_err(|_| unavailable("getRandomValues not reachable"))?
            .dyn_into()
            .map_err(|_| unavailable("getRandomValues is not a function"))?;

        let buffer = Uint8Array::new_with_length(dest.len() as u32);
        Reflect::apply(&get_random_values, &crypto, &Array::of1(&buffer))
            .map_err(|_| unavailable("getRandomValues threw"))?;
        buffer.copy_to(dest);
        Ok(())
    }

    #[cfg(not(target_arch = "wasm32"))]
    fn fill(&self, dest: &mut [u8]) -> Result<()> {
        use rand::RngCore;
        rand::rngs::OsRng
            .try_fill_bytes(dest)
            .map_err(|e| ChameleonError::EntropyUnavailable(e.to_string()))
    }
}

/// Which entropy path produced a seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntropyPath {
    Primary,
    Fallback,
}

/// Owns the entropy sources and draws session seeds.
pub struct SeedManager {
    primary: Box<dyn EntropySource>,
    fallback: Box<dyn EntropySource>,
}

impl SeedManager {
    pub fn new() -> Self {
        Self::with_sources(Box::new(SystemEntropy), Box::new(WebCryptoEntropy))
    }

    pub fn with_sources(primary: Box<dyn EntropySource>, fallback: Box<dyn EntropySource>) -> Self {
        Self { primary, fallback }
    }

    /// Draw a fresh seed from the primary source.
    pub fn generate(&self) -> Result<Seed> {
        draw(self.primary.as_ref())
    }

    /// Draw a fresh seed, switching to the secondary source when the primary
    /// reports [`ChameleonError::EntropyUnavailable`].
    pub fn generate_with_fallback(&self) -> Result<(Seed, EntropyPath)> {
        match self.generate() {
            Ok(seed) => Ok((seed, EntropyPath::Primary)),
            Err(e) => {
                log::warn!(
                    "⚠️ Primary entropy ({}) failed: {}, trying {}",
                    self.primary.name(),
                    e,
                    self.fallback.name()
                );
                let seed = draw(self.fallback.as_ref())?;
                Ok((seed, EntropyPath::Fallback))
            }
        }
    }
}

impl Default for SeedManager {
    fn default() -> Self {
        Self::new()
    }
}

fn draw(source: &dyn EntropySource) -> Result<Seed> {
    let mut bytes = [0u8; SEED_LEN];
    source.fill(&mut bytes)?;
    // An all-zero draw means the source silently did nothing.
    if bytes.iter().all(|b| *b == 0) {
        return Err(ChameleonError::EntropyUnavailable(format!(
            "{} returned an all-zero buffer",
            source.name()
        )));
    }
    let seed = Seed::from_bytes(bytes);
    bytes.zeroize();
    Ok(seed)
}
