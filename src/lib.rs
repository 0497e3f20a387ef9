//! # Vision Gateway
//!
//! A cost-governed, cache-accelerated gateway to AI vision providers, built
//! for visual regression testing: hand it a baseline and a current
//! screenshot, get back a structured judgment of how bad the change is.
//!
//! ## Architecture
//!
//! The library is organized into several key modules:
//! - `preprocess`: Normalizes screenshots (bounded size, fixed encoding, SHA-256)
//! - `cache`: Two-tier result cache, in-memory LRU over a durable store
//! - `ledger`: Append-only cost ledger with daily/monthly circuit breaker
//! - `provider`: Adapters for Ollama, OpenAI-compatible and Anthropic APIs
//! - `gateway`: Orchestration, retry/fallback state machine and batching
//! - `store`: SQLite and in-memory persistence behind async traits
//! - `config`: Configuration management and validation
//! - `core`: Clock and integer money primitives
//!
//! ## Features
//!
//! - **Cache first**: identical inputs are answered without touching a provider
//! - **Budget enforcement**: paid providers are skipped once a window is spent
//! - **Fallback chain**: free local inference first, paid APIs after
//! - **Async/await**: Built on Tokio; blocking work runs on the blocking pool
//!
//! ## Example
//!
//! ```rust,no_run
//! use vision_gateway::{AnalysisRequest, Gateway, GatewayConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let gateway = Gateway::from_config(GatewayConfig::default())?;
//!
//! let request = AnalysisRequest::new(
//!     std::fs::read("baseline.png")?,
//!     std::fs::read("current.png")?,
//! );
//! let outcome = gateway.analyze(&request).await?;
//! println!("{} ({:.0}%)", outcome.result.severity, outcome.result.confidence * 100.0);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod core;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod model;
pub mod preprocess;
pub mod provider;
pub mod store;

/// Re-export error types for convenience
pub use error::{
    BudgetWindow, FailureReason, GatewayError, GatewayResult, HasRecoverySuggestion, HasSeverity,
    ProviderError, ProviderFailure, Retryable,
};

pub use cache::{CacheStats, TieredCache};
pub use config::GatewayConfig;
pub use gateway::{Gateway, GatewayBuilder};
pub use ledger::{Admission, BudgetStatus, CostLedger, CostStats, Reservation};
pub use model::{
    AnalysisContext, AnalysisOutcome, AnalysisRequest, AnalysisResult, ImageFormat, ImageSet,
    NormalizedImage, ResultSource, Severity,
};
pub use preprocess::Preprocessor;
pub use provider::ProviderAdapter;
