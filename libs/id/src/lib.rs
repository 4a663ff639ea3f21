//! # pollmesh-id
//!
//! Typed identifiers shared by the pollmesh control plane.
//!
//! ## ID Format
//!
//! Scheduler-owned identifiers are a fixed prefix followed by a decimal
//! number with no leading zeros:
//!
//! - `system-worker-2` ([`WorkerId`], 1-based, bounded by the pool size)
//! - `job17` ([`JobName`], issued from a monotonic counter and never reused)
//!
//! Identifiers owned by the external subscription store ([`SubscriptionId`],
//! [`ApiId`]) are plain integers and serialize as JSON numbers.

mod error;
#[doc(hidden)]
pub mod macros;
mod types;

pub use error::IdError;
pub use types::*;
