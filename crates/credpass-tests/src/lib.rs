//! End-to-end test suite for credpass.
//!
//! The tests drive the full scoring service against in-memory history,
//! price and staking sources and an in-process passport ledger, so every
//! path from feature extraction to a confirmed attestation runs without a
//! network.

pub mod helpers;
