//! Shared utilities for the batch normalization layer
//!
//! Currently only the seeded random number generator used by the fillers.

pub mod rng;

pub use rng::SimpleRng;
