//! # Cost Ledger
//!
//! Append-only record of billable provider calls with daily and monthly
//! budget windows. Window totals are always recomputed from ledger rows
//! recorded since the window start, so rollover at UTC midnight (or the
//! first of the month) needs no reset step.
//!
//! Thresholds are advisory up to 100%: at 80% a warning is raised, at 95% it
//! becomes critical, and at 100% of either window the circuit breaker trips.
//!
//! Paid calls reserve their cost before they start and admission counts
//! live reservations on top of recorded spend, so racing calls are held to
//! the same limit as calls made one at a time.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::Mutex;

use crate::config::BudgetConfig;
use crate::core::clock::{start_of_day, start_of_month};
use crate::core::{Clock, Micros};
use crate::error::{BudgetWindow, GatewayError};
use crate::store::{LedgerEntry, LedgerStore};

const WARNING_PERCENT: u128 = 80;
const CRITICAL_PERCENT: u128 = 95;
const BREAKER_PERCENT: u128 = 100;

/// Spend inside one budget window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WindowUsage {
    pub window: BudgetWindow,
    pub used: f64,
    /// 0.0 when the window is disabled
    pub limit: f64,
    pub remaining: f64,
    pub percent: f64,
    #[serde(skip)]
    used_micros: Micros,
    #[serde(skip)]
    limit_micros: Micros,
}

impl WindowUsage {
    fn new(window: BudgetWindow, used: Micros, limit: Micros) -> Self {
        let percent = if limit.is_zero() {
            0.0
        } else {
            used.0 as f64 * 100.0 / limit.0 as f64
        };
        Self {
            window,
            used: used.as_usd(),
            limit: limit.as_usd(),
            remaining: limit.saturating_sub(used).as_usd(),
            percent,
            used_micros: used,
            limit_micros: limit,
        }
    }

    /// Exact integer comparison: `used >= limit * percent / 100`.
    fn reached(&self, percent: u128) -> bool {
        !self.limit_micros.is_zero()
            && self.used_micros.0 as u128 * 100 >= self.limit_micros.0 as u128 * percent
    }

    pub fn is_enabled(&self) -> bool {
        !self.limit_micros.is_zero()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BudgetStatus {
    pub daily: WindowUsage,
    pub monthly: WindowUsage,
    pub warning_triggered: bool,
    pub critical_triggered: bool,
    pub circuit_breaker_triggered: bool,
}

impl BudgetStatus {
    fn from_usage(daily: WindowUsage, monthly: WindowUsage) -> Self {
        let any = |p| daily.reached(p) || monthly.reached(p);
        Self {
            daily,
            monthly,
            warning_triggered: any(WARNING_PERCENT),
            critical_triggered: any(CRITICAL_PERCENT),
            circuit_breaker_triggered: any(BREAKER_PERCENT),
        }
    }

    /// The window that tripped the breaker; daily wins when both have.
    pub fn tripped_window(&self) -> Option<&WindowUsage> {
        [&self.daily, &self.monthly]
            .into_iter()
            .find(|w| w.reached(BREAKER_PERCENT))
    }

    /// `BudgetExceeded` for the tripped window, if any.
    pub fn exceeded_error(&self) -> Option<GatewayError> {
        self.tripped_window()
            .map(|w| GatewayError::budget_exceeded(w.window, w.used, w.limit))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderSpend {
    pub provider: String,
    pub cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostStats {
    /// All-time spend in USD
    pub total_cost: f64,
    /// Successful provider calls, free ones included
    pub operation_count: u64,
    pub cache_hits: u64,
    pub by_provider: Vec<ProviderSpend>,
}

/// Outcome of [`CostLedger::reserve`].
#[derive(Debug)]
pub enum Admission {
    Granted(Reservation),
    /// Usage, reservations included, of the window that refused
    Refused(WindowUsage),
}

/// Cost held against the budget by one in-flight paid call.
///
/// Dropping it releases the hold, so a failed call gives its share back.
/// On success, record the spend before the reservation is dropped.
#[derive(Debug)]
pub struct Reservation {
    pending: Arc<AtomicU64>,
    amount: Micros,
}

impl Reservation {
    pub fn amount(&self) -> Micros {
        self.amount
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.amount.is_zero() {
            self.pending.fetch_sub(self.amount.0, Ordering::SeqCst);
        }
    }
}

pub struct CostLedger {
    store: Arc<dyn LedgerStore>,
    daily_limit: Micros,
    monthly_limit: Micros,
    clock: Arc<dyn Clock>,
    operation_count: AtomicU64,
    cache_hits: AtomicU64,
    /// Sum of live reservations
    pending: Arc<AtomicU64>,
    /// Serializes check-and-reserve
    admission: Mutex<()>,
}

impl CostLedger {
    pub fn new(store: Arc<dyn LedgerStore>, budget: &BudgetConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            daily_limit: Micros::from_usd(budget.daily_limit),
            monthly_limit: Micros::from_usd(budget.monthly_limit),
            clock,
            operation_count: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            pending: Arc::new(AtomicU64::new(0)),
            admission: Mutex::new(()),
        }
    }

    /// Recorded spend in both windows.
    pub async fn check_budget(&self) -> Result<BudgetStatus, GatewayError> {
        let status = self.status(Micros::ZERO).await?;
        log_thresholds(&status);
        Ok(status)
    }

    /// Recorded spend plus the cost held by in-flight paid calls.
    pub async fn admission_status(&self) -> Result<BudgetStatus, GatewayError> {
        let status = self.status(self.pending()).await?;
        log_thresholds(&status);
        Ok(status)
    }

    /// Cost currently held by live reservations.
    pub fn pending(&self) -> Micros {
        Micros(self.pending.load(Ordering::SeqCst))
    }

    /// Hold `cost` against both windows for one paid call.
    ///
    /// Refused once recorded spend plus existing reservations has reached
    /// the limit of either window, which is the same rule a lone caller
    /// sees. Zero-cost calls are always granted and hold nothing.
    pub async fn reserve(&self, cost: f64) -> Result<Admission, GatewayError> {
        let amount = Micros::from_usd(cost);
        if amount.is_zero() {
            return Ok(Admission::Granted(self.hold(amount)));
        }

        let _gate = self.admission.lock().await;
        let status = self.status(self.pending()).await?;
        if let Some(window) = status.tripped_window() {
            log::debug!(
                "refused to reserve {}: {} window at {:.1}%",
                amount,
                window.window,
                window.percent
            );
            return Ok(Admission::Refused(*window));
        }
        self.pending.fetch_add(amount.0, Ordering::SeqCst);
        Ok(Admission::Granted(self.hold(amount)))
    }

    fn hold(&self, amount: Micros) -> Reservation {
        Reservation {
            pending: self.pending.clone(),
            amount,
        }
    }

    async fn status(&self, pending: Micros) -> Result<BudgetStatus, GatewayError> {
        let now = self.clock.now();
        let daily_used = self.store.total_since(Some(start_of_day(now))).await?;
        let monthly_used = self.store.total_since(Some(start_of_month(now))).await?;

        Ok(BudgetStatus::from_usage(
            WindowUsage::new(BudgetWindow::Daily, daily_used + pending, self.daily_limit),
            WindowUsage::new(BudgetWindow::Monthly, monthly_used + pending, self.monthly_limit),
        ))
    }

    /// Record one successful provider call. Free calls are counted but leave
    /// no ledger row.
    pub async fn record(&self, provider: &str, cost: f64) -> Result<(), GatewayError> {
        self.operation_count.fetch_add(1, Ordering::Relaxed);
        let cost = Micros::from_usd(cost);
        if cost.is_zero() {
            return Ok(());
        }
        self.store
            .append(&LedgerEntry {
                provider: provider.to_string(),
                cost,
                recorded_at: self.clock.now(),
            })
            .await?;
        log::debug!("recorded {} for {}", cost, provider);
        Ok(())
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn cost_stats(&self) -> Result<CostStats, GatewayError> {
        let total = self.store.total_since(None).await?;
        let by_provider = self
            .store
            .totals_by_provider()
            .await?
            .into_iter()
            .map(|(provider, cost)| ProviderSpend {
                provider,
                cost: cost.as_usd(),
            })
            .collect();
        Ok(CostStats {
            total_cost: total.as_usd(),
            operation_count: self.operation_count.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            by_provider,
        })
    }
}

fn log_thresholds(status: &BudgetStatus) {
    if status.circuit_breaker_triggered {
        log::warn!(
            "budget circuit breaker tripped: daily {:.1}%, monthly {:.1}%",
            status.daily.percent,
            status.monthly.percent
        );
    } else if status.critical_triggered {
        log::warn!(
            "budget critical: daily {:.1}%, monthly {:.1}%",
            status.daily.percent,
            status.monthly.percent
        );
    } else if status.warning_triggered {
        log::warn!(
            "budget warning: daily {:.1}%, monthly {:.1}%",
            status.daily.percent,
            status.monthly.percent
        );
    }
}
