//! # keeper-core
//!
//! Primitives shared by the Keeper delayed-execution marketplace.
//!
//! This crate provides:
//!
//! - [`Amount`]: Value in integer base units with checked arithmetic
//! - [`Principal`]: Account identity (base58 ed25519 public key)
//! - [`Wallet`]: Keypair that derives a [`Principal`] and signs messages
//! - [`Clock`]: Domain time source ([`SystemClock`], [`ManualClock`])

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod amount;
pub mod clock;
pub mod error;
pub mod principal;

pub use amount::Amount;
pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use error::{CoreError, Result};
pub use principal::{Principal, Wallet};
