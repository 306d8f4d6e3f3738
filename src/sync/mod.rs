//! Resource synchronization / 资源同步
//!
//! Generic coordinator for the network-bound-resource protocol: serve the
//! cached value first, decide whether to fetch, reconcile, persist, and
//! emit at most one further value.

pub mod resource;

pub use resource::{run, ResourceAdapter, ResourceUpdate};
