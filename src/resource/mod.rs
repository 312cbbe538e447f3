//! Resource Registry: the configured egress paths
//!
//! Each resource is an independent network path with its own pool of
//! reusable HTTP clients. The capacity class sizes the resource's queue,
//! its initial worker allocation, its share of scale-up increments, and the
//! connection pool settings of its clients.

mod capacity;
mod registry;

pub use capacity::{distribute, PoolProfile};
pub use registry::{Resource, ResourceRegistry};
