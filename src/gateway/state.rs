//! Request states and the retry-versus-escalate decision.

use std::fmt;

use crate::error::ProviderErrorKind;

/// Where a request is in its lifecycle. Logged at every transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayState {
    Preprocessing,
    CacheCheck,
    BudgetCheck,
    /// Calling provider `index` of `total` (1-based), attempt `attempt`
    ProviderAttempt {
        provider: String,
        index: usize,
        total: usize,
        attempt: u32,
    },
    Recorded,
    Returned,
    Failed,
}

impl fmt::Display for GatewayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayState::Preprocessing => write!(f, "preprocessing"),
            GatewayState::CacheCheck => write!(f, "cache-check"),
            GatewayState::BudgetCheck => write!(f, "budget-check"),
            GatewayState::ProviderAttempt {
                provider,
                index,
                total,
                attempt,
            } => write!(f, "provider {} ({}/{}) attempt {}", provider, index, total, attempt),
            GatewayState::Recorded => write!(f, "recorded"),
            GatewayState::Returned => write!(f, "returned"),
            GatewayState::Failed => write!(f, "failed"),
        }
    }
}

/// What to do after a failed provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Call the same provider again
    Retry,
    /// Give up on this provider and move down the chain
    NextProvider,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transience {
    Transient,
    Permanent,
}

const RETRY_TABLE: [(ProviderErrorKind, Transience); 3] = [
    (ProviderErrorKind::Timeout, Transience::Transient),
    (ProviderErrorKind::Unavailable, Transience::Transient),
    (ProviderErrorKind::InvalidResponse, Transience::Permanent),
];

fn transience(kind: ProviderErrorKind) -> Transience {
    RETRY_TABLE
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, t)| *t)
        .unwrap_or(Transience::Permanent)
}

/// Decide the next step after `attempts` calls (counting the one that just
/// failed) to a provider allowing `max_retries` retries.
pub fn next_step(kind: ProviderErrorKind, attempts: u32, max_retries: u32) -> Step {
    match transience(kind) {
        Transience::Transient if attempts <= max_retries => Step::Retry,
        _ => Step::NextProvider,
    }
}
