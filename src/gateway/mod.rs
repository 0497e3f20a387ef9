//! # Gateway
//!
//! Orchestrates one request through the pipeline:
//!
//! ```text
//! Preprocessing -> CacheCheck -> BudgetCheck -> ProviderAttempt(i, n)
//!     -> [Success | Retry | NextProvider] -> Recorded -> Returned
//!                                         \-> Failed
//! ```
//!
//! Cache hits short-circuit after `CacheCheck`. Transient provider errors are
//! retried per the provider's policy; everything else moves down the chain.

pub mod batch;
pub mod orchestrator;
pub mod state;

pub use orchestrator::{Gateway, GatewayBuilder, ProviderSlot};
pub use state::{GatewayState, Step, next_step};
