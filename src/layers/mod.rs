//! Layer abstractions
//!
//! This module provides the Layer trait, the batch normalization layer and the
//! per-channel statistics it is built on.

mod r#trait;
pub mod batchnorm;
pub mod statistics;

// Re-export the Layer trait for convenience
pub use r#trait::Layer;
pub use batchnorm::{BatchNormCache, BatchNormLayer};
pub use statistics::{channel_statistics, ChannelStats};
