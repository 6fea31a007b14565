//! Account identities.
//!
//! A [`Principal`] is the base58 encoding of an ed25519 public key. Owners and
//! bidders are identified by principals; a [`Wallet`] holds the keypair that a
//! principal is derived from.
//!
//! The market trusts the caller principal it is handed. Authenticating that
//! caller is the embedding layer's job: it checks a request signed with
//! [`Wallet::sign`] using [`Principal::verify`] before acting on it.

use std::fmt;
use std::str::FromStr;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// An account identity (base58-encoded 32-byte public key).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Principal(String);

impl Principal {
    /// Create a principal from a base58-encoded string.
    ///
    /// # Errors
    ///
    /// Returns error if the string is not valid base58 or not 32 bytes.
    pub fn from_base58(s: &str) -> Result<Self> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|e| CoreError::invalid_principal(format!("invalid base58: {e}")))?;
        Self::from_bytes(&bytes)
    }

    /// Create a principal from raw public key bytes.
    ///
    /// # Errors
    ///
    /// Returns error if bytes are not 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 32 {
            return Err(CoreError::invalid_principal(format!(
                "principal must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self(bs58::encode(bytes).into_string()))
    }

    /// Get the base58-encoded string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Verify a signature made by the wallet behind this principal.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidSignature` if the key or signature is invalid.
    pub fn verify(&self, message: &[u8], signature: &[u8; 64]) -> Result<()> {
        let bytes = bs58::decode(&self.0)
            .into_vec()
            .map_err(|_| CoreError::InvalidSignature)?;
        let key_bytes: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| CoreError::InvalidSignature)?;
        let key = VerifyingKey::from_bytes(&key_bytes).map_err(|_| CoreError::InvalidSignature)?;
        key.verify(message, &Signature::from_bytes(signature))
            .map_err(|_| CoreError::InvalidSignature)
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Principal {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_base58(s)
    }
}

impl TryFrom<String> for Principal {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self> {
        Self::from_base58(&value)
    }
}

impl From<Principal> for String {
    fn from(value: Principal) -> Self {
        value.0
    }
}

impl AsRef<str> for Principal {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// An ed25519 keypair that owns a [`Principal`].
pub struct Wallet {
    signing_key: SigningKey,
    principal: Principal,
}

impl Wallet {
    /// Generate a new random wallet from the operating system's CSPRNG.
    #[must_use]
    pub fn generate() -> Self {
        let mut secret = [0u8; 32];
        OsRng.fill_bytes(&mut secret);
        Self::from_secret(&secret)
    }

    /// Create a wallet from a 32-byte secret key.
    #[must_use]
    pub fn from_secret(secret: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(secret);
        let principal = Principal(bs58::encode(signing_key.verifying_key().as_bytes()).into_string());
        Self {
            signing_key,
            principal,
        }
    }

    /// The principal derived from this wallet's public key.
    #[must_use]
    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    /// Sign a message.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }
}

impl fmt::Debug for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wallet")
            .field("principal", &self.principal)
            .finish_non_exhaustive()
    }
}
