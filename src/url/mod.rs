//! URL handling module for Sumi-Harvest
//!
//! Submitted URLs are normalized before deduplication so that trivially
//! different spellings of one resource map to a single tracker entry.

mod normalize;

pub use normalize::normalize_url;
