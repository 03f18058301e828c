//! Structural fingerprints.
//!
//! A fingerprint is a sha256 digest over a tagged, length-prefixed encoding
//! of an operation, its parameters and its input fingerprints. Encoding every
//! field with a type tag and a length keeps distinct parameter lists from
//! colliding by concatenation.

use sha2::{Digest, Sha256};
use std::fmt;

/// Deterministic identity of a computation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Number of hex characters shown by [`Fingerprint::short`].
    pub const SHORT_LEN: usize = 12;

    /// Start hashing a new fingerprint for the given operation tag.
    #[must_use]
    pub fn builder(tag: &str) -> FingerprintBuilder {
        FingerprintBuilder::new(tag)
    }

    /// Wrap raw digest bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw digest bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Full lowercase hex encoding.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Abbreviated hex form for log lines.
    #[must_use]
    pub fn short(&self) -> String {
        let mut hex = self.to_hex();
        hex.truncate(Self::SHORT_LEN);
        hex
    }

    /// Fingerprint of one part of this computation, e.g. chunk `index`
    /// playing `role`.
    #[must_use]
    pub fn derive(&self, role: &str, index: usize) -> Self {
        FingerprintBuilder::new("part")
            .fingerprint(self)
            .str(role)
            .usize(index)
            .finish()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short())
    }
}

/// Incremental hasher producing a [`Fingerprint`].
#[derive(Clone)]
pub struct FingerprintBuilder {
    hasher: Sha256,
}

impl FingerprintBuilder {
    /// Start a fingerprint for the given operation tag.
    #[must_use]
    pub fn new(tag: &str) -> Self {
        let builder = Self {
            hasher: Sha256::new(),
        };
        builder.str(tag)
    }

    fn field(mut self, kind: u8, bytes: &[u8]) -> Self {
        self.hasher.update([kind]);
        self.hasher.update((bytes.len() as u64).to_le_bytes());
        self.hasher.update(bytes);
        self
    }

    /// Append a string.
    #[must_use]
    pub fn str(self, value: &str) -> Self {
        self.field(b's', value.as_bytes())
    }

    /// Append raw bytes.
    #[must_use]
    pub fn bytes(self, value: &[u8]) -> Self {
        self.field(b'b', value)
    }

    /// Append an unsigned integer.
    #[must_use]
    pub fn u64(self, value: u64) -> Self {
        self.field(b'u', &value.to_le_bytes())
    }

    /// Append a `usize` (hashed as `u64` so results are platform independent).
    #[must_use]
    pub fn usize(self, value: usize) -> Self {
        self.u64(value as u64)
    }

    /// Append a signed integer.
    #[must_use]
    pub fn i64(self, value: i64) -> Self {
        self.field(b'i', &value.to_le_bytes())
    }

    /// Append a float by its exact bit pattern.
    #[must_use]
    pub fn f64(self, value: f64) -> Self {
        self.field(b'f', &value.to_bits().to_le_bytes())
    }

    /// Append a boolean.
    #[must_use]
    pub fn bool(self, value: bool) -> Self {
        self.field(b'?', &[u8::from(value)])
    }

    /// Append a list of sizes, e.g. a shape.
    #[must_use]
    pub fn usizes(self, values: &[usize]) -> Self {
        let encoded: Vec<u8> = values
            .iter()
            .flat_map(|v| (*v as u64).to_le_bytes())
            .collect();
        self.field(b'[', &encoded)
    }

    /// Append the fingerprint of an input.
    #[must_use]
    pub fn fingerprint(self, input: &Fingerprint) -> Self {
        self.field(b'#', input.as_bytes())
    }

    /// Finish hashing.
    #[must_use]
    pub fn finish(self) -> Fingerprint {
        let digest = self.hasher.finalize();
        let mut bytes = [0_u8; 32];
        bytes.copy_from_slice(&digest);
        Fingerprint(bytes)
    }
}

impl fmt::Debug for FingerprintBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FingerprintBuilder").finish_non_exhaustive()
    }
}
