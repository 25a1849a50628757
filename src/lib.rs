pub mod audit;
pub mod executor;
pub mod gather;
pub mod logging;
pub mod mapping;
pub mod model;
pub mod source;
pub mod traits;
pub mod version;

// Re-export common types for convenience
pub use executor::*;
pub use mapping::*;
pub use model::*;
pub use source::*;
pub use traits::*;
pub use version::*;

pub use audit::{AuditCheckResult, AuditChecker, AuditError};
pub use gather::{GatherContext, GatherError, GatherOutcome, ResolutionContext, ResolverGather};
