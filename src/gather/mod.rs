//! Dependency gathering across package sources.
//!
//! - `context` - inputs: targets, installed packages, sources and policy
//! - `cache` - source results shared between gathers
//! - `engine` - the multi-source breadth-first gather

pub mod cache;
pub mod context;
pub mod engine;

pub use cache::{GatherCache, GatherCacheResult};
pub use context::{
    DependencyBehavior, GatherContext, ResolutionContext, ResolutionPolicy, VersionConstraints,
};
pub use engine::{GatherError, GatherOutcome, GatherStats, ResolverGather};
