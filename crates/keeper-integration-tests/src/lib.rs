//! Integration test crate for the Keeper marketplace.
//!
//! This crate exists solely to run tests that span keeper-core and
//! keeper-market. It has no public API - all functionality is in the test modules.

#![forbid(unsafe_code)]
