//! Job identifiers and the capability addressing types they are derived from.
//!
//! A [`JobId`] is content-addressed: BLAKE3 (derive-key mode) over a pinned,
//! fixed-order encoding of the job terms plus the creation time.
//!
//! | # | Field | Encoding |
//! |---|---|---|
//! | 1 | target | u64 BE byte length, then UTF-8 bytes |
//! | 2 | selector | 4 raw bytes |
//! | 3 | payload | u64 BE byte length, then bytes |
//! | 4 | delay | u64 BE |
//! | 5 | created at | u64 BE |
//! | 6 | max reward | u64 BE base units |
//! | 7 | timeout | u64 BE |
//!
//! Changing any of this changes every id; bump [`JOB_ID_CONTEXT`] if you do.

use std::fmt;
use std::str::FromStr;

use keeper_core::{CoreError, Timestamp};
use serde::{Deserialize, Serialize};

use crate::job::JobTerms;

/// BLAKE3 key-derivation context for job ids.
pub const JOB_ID_CONTEXT: &str = "keeper 2024 job identifier v1";

/// Reference to an external capability.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Target(String);

impl Target {
    /// Create a target reference.
    #[must_use]
    pub fn new(target: impl Into<String>) -> Self {
        Self(target.into())
    }

    /// The reference as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Four-byte method selector passed to a capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Selector([u8; 4]);

impl Selector {
    /// Create a selector from raw bytes.
    #[must_use]
    pub const fn new(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// Derive a selector from a method signature such as `"rebalance(uint256)"`.
    #[must_use]
    pub fn from_signature(signature: &str) -> Self {
        let digest = blake3::hash(signature.as_bytes());
        let bytes = digest.as_bytes();
        Self([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    /// The raw selector bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x")?;
        for b in self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// Deterministic 32-byte job identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobId([u8; 32]);

impl JobId {
    /// Derive the id of a job created at `created_at` with the given terms.
    #[must_use]
    pub fn derive(terms: &JobTerms, created_at: Timestamp) -> Self {
        let mut hasher = blake3::Hasher::new_derive_key(JOB_ID_CONTEXT);
        write_bytes(&mut hasher, terms.target.as_str().as_bytes());
        hasher.update(terms.selector.as_bytes());
        write_bytes(&mut hasher, &terms.payload);
        hasher.update(&terms.delay.to_be_bytes());
        hasher.update(&created_at.to_be_bytes());
        hasher.update(&terms.max_reward.units().to_be_bytes());
        hasher.update(&terms.timeout.to_be_bytes());
        Self(*hasher.finalize().as_bytes())
    }

    /// Wrap raw digest bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// The raw digest bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex encoding.
    #[must_use]
    pub fn to_hex(&self) -> String {
        blake3::Hash::from_bytes(self.0).to_hex().to_string()
    }

    /// Short prefix for log lines.
    #[must_use]
    pub fn short(&self) -> String {
        let mut hex = self.to_hex();
        hex.truncate(12);
        hex
    }
}

fn write_bytes(hasher: &mut blake3::Hasher, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JobId({})", self.short())
    }
}

impl FromStr for JobId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        blake3::Hash::from_hex(s)
            .map(|h| Self(*h.as_bytes()))
            .map_err(|e| CoreError::invalid_identifier(format!("invalid job id {s}: {e}")))
    }
}

impl TryFrom<String> for JobId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<JobId> for String {
    fn from(value: JobId) -> Self {
        value.to_hex()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keeper_core::Amount;

    fn terms() -> JobTerms {
        JobTerms::new(
            Target::new("vault:rebalance"),
            Selector::new([0xde, 0xad, 0xbe, 0xef]),
            b"payload".to_vec(),
            86_400,
            Amount::new(100),
            3_600,
        )
    }

    #[test]
    fn derive_is_deterministic() {
        assert_eq!(JobId::derive(&terms(), 1_000), JobId::derive(&terms(), 1_000));
    }

    #[test]
    fn creation_time_changes_id() {
        assert_ne!(JobId::derive(&terms(), 1_000), JobId::derive(&terms(), 1_001));
    }

    #[test]
    fn every_field_changes_id() {
        let base = JobId::derive(&terms(), 1_000);

        let mut t = terms();
        t.target = Target::new("vault:other");
        assert_ne!(JobId::derive(&t, 1_000), base);

        let mut t = terms();
        t.selector = Selector::new([0, 0, 0, 1]);
        assert_ne!(JobId::derive(&t, 1_000), base);

        let mut t = terms();
        t.payload.push(0);
        assert_ne!(JobId::derive(&t, 1_000), base);

        let mut t = terms();
        t.delay += 1;
        assert_ne!(JobId::derive(&t, 1_000), base);

        let mut t = terms();
        t.max_reward = Amount::new(101);
        assert_ne!(JobId::derive(&t, 1_000), base);

        let mut t = terms();
        t.timeout += 1;
        assert_ne!(JobId::derive(&t, 1_000), base);
    }

    #[test]
    fn length_prefix_separates_target_and_payload() {
        let mut a = terms();
        a.target = Target::new("ab");
        a.payload = b"c".to_vec();
        let mut b = terms();
        b.target = Target::new("a");
        b.payload = b"bc".to_vec();
        assert_ne!(JobId::derive(&a, 0), JobId::derive(&b, 0));
    }

    #[test]
    fn encoding_is_pinned() {
        let mut expected = blake3::Hasher::new_derive_key(JOB_ID_CONTEXT);
        expected.update(&15u64.to_be_bytes());
        expected.update(b"vault:rebalance");
        expected.update(&[0xde, 0xad, 0xbe, 0xef]);
        expected.update(&7u64.to_be_bytes());
        expected.update(b"payload");
        expected.update(&86_400u64.to_be_bytes());
        expected.update(&1_000u64.to_be_bytes());
        expected.update(&100u64.to_be_bytes());
        expected.update(&3_600u64.to_be_bytes());
        assert_eq!(JobId::derive(&terms(), 1_000).as_bytes(), expected.finalize().as_bytes());
    }

    #[test]
    fn hex_roundtrip() {
        let id = JobId::derive(&terms(), 42);
        let hex = id.to_string();
        assert_eq!(hex.len(), 64);
        assert_eq!(hex.parse::<JobId>().unwrap(), id);
        assert!("zz".parse::<JobId>().is_err());
    }

    #[test]
    fn job_id_serializes_as_hex() {
        let id = JobId::from_bytes([1; 32]);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", "01".repeat(32)));
        let restored: JobId = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, id);
    }

    #[test]
    fn selector_display_and_signature() {
        assert_eq!(Selector::new([0xde, 0xad, 0xbe, 0xef]).to_string(), "0xdeadbeef");
        assert_eq!(Selector::from_signature("run()"), Selector::from_signature("run()"));
        assert_ne!(Selector::from_signature("run()"), Selector::from_signature("stop()"));
    }

    #[test]
    fn short_id_is_prefix() {
        let id = JobId::derive(&terms(), 7);
        assert!(id.to_string().starts_with(&id.short()));
        assert_eq!(id.short().len(), 12);
    }
}
