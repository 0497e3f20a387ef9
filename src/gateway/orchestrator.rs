//! Request orchestration: normalize, look up, gate on budget, walk the
//! fallback chain, record, return.

use std::sync::Arc;

use crate::cache::{CacheStats, TieredCache, chain_identity, fingerprint};
use crate::config::{GatewayConfig, RetryPolicy};
use crate::core::{Clock, SystemClock};
use crate::error::{FailureReason, GatewayError, ProviderError, ProviderFailure};
use crate::ledger::{Admission, BudgetStatus, CostLedger, CostStats};
use crate::model::{
    AnalysisContext, AnalysisOutcome, AnalysisRequest, AnalysisResult, ImageSet, ResultSource,
};
use crate::preprocess::Preprocessor;
use crate::provider::{ProviderAdapter, build_provider};
use crate::store::{DurableStore, LedgerStore, MemoryStore, SqliteStore};

use super::state::{GatewayState, Step, next_step};

const BUDGET_RECOVERY: &str =
    "Wait for the budget window to roll over or configure a free provider";

/// One position in the fallback chain.
#[derive(Clone)]
pub struct ProviderSlot {
    pub adapter: Arc<dyn ProviderAdapter>,
    pub policy: RetryPolicy,
}

/// Cost-governed, cached front door to the configured vision providers.
///
/// Cheap to share: wrap in an `Arc` and call [`Gateway::analyze`] from as
/// many tasks as needed. All of them share one cache and one ledger.
pub struct Gateway {
    preprocessor: Preprocessor,
    providers: Vec<ProviderSlot>,
    /// Ordered `id:model` list; part of every fingerprint
    chain: String,
    cache: Arc<TieredCache>,
    ledger: Arc<CostLedger>,
    pub(super) batch_concurrency: usize,
}

/// Assembles a [`Gateway`] from explicit parts.
///
/// Providers are tried in the order they are added. Anything not supplied
/// falls back to an in-memory store and the system clock.
pub struct GatewayBuilder {
    config: GatewayConfig,
    providers: Vec<ProviderSlot>,
    clock: Option<Arc<dyn Clock>>,
    durable: Option<Arc<dyn DurableStore>>,
    ledger: Option<Arc<dyn LedgerStore>>,
}

impl GatewayBuilder {
    fn new() -> Self {
        Self {
            config: GatewayConfig {
                providers: Vec::new(),
                ..GatewayConfig::default()
            },
            providers: Vec::new(),
            clock: None,
            durable: None,
            ledger: None,
        }
    }

    /// Budget, cache, preprocessing and retry settings. The config's own
    /// provider list is ignored; add adapters with [`GatewayBuilder::provider`].
    pub fn config(mut self, config: GatewayConfig) -> Self {
        self.config = config;
        self
    }

    /// Append a provider using the configured retry defaults.
    pub fn provider(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        let policy = self.config.retry.default_policy();
        self.providers.push(ProviderSlot { adapter, policy });
        self
    }

    pub fn provider_with_policy(
        mut self,
        adapter: Arc<dyn ProviderAdapter>,
        policy: RetryPolicy,
    ) -> Self {
        self.providers.push(ProviderSlot { adapter, policy });
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn durable_store(mut self, store: Arc<dyn DurableStore>) -> Self {
        self.durable = Some(store);
        self
    }

    pub fn ledger_store(mut self, store: Arc<dyn LedgerStore>) -> Self {
        self.ledger = Some(store);
        self
    }

    /// Use one store for both the durable cache tier and the ledger.
    pub fn store<S>(self, store: Arc<S>) -> Self
    where
        S: DurableStore + LedgerStore + 'static,
    {
        self.durable_store(store.clone()).ledger_store(store)
    }

    pub fn build(self) -> Result<Gateway, GatewayError> {
        self.config
            .validate()
            .map_err(|reason| GatewayError::config("config", "", reason))?;
        if self.providers.is_empty() {
            return Err(GatewayError::config(
                "providers",
                "[]",
                "at least one provider is required",
            )
            .with_recovery_suggestion("Enable a provider in the configuration"));
        }
        let mut seen = std::collections::HashSet::new();
        for slot in &self.providers {
            if !seen.insert(slot.adapter.id().to_string()) {
                return Err(GatewayError::config(
                    "providers",
                    slot.adapter.id(),
                    "duplicate provider id",
                ));
            }
        }

        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };
        let fallback = Arc::new(MemoryStore::new());
        let durable: Arc<dyn DurableStore> = match self.durable {
            Some(store) => store,
            None => fallback.clone(),
        };
        let ledger_store: Arc<dyn LedgerStore> = match self.ledger {
            Some(store) => store,
            None => fallback,
        };

        let cache = TieredCache::new(
            self.config.cache.memory_capacity,
            durable,
            self.config.cache.ttl(),
            clock.clone(),
        );
        let ledger = CostLedger::new(ledger_store, &self.config.budget, clock);
        let chain = chain_identity(
            self.providers
                .iter()
                .map(|slot| (slot.adapter.id(), slot.adapter.model())),
        );

        log::info!("gateway ready, provider chain: {}", chain);
        Ok(Gateway {
            preprocessor: Preprocessor::new(self.config.preprocess),
            providers: self.providers,
            chain,
            cache: Arc::new(cache),
            ledger: Arc::new(ledger),
            batch_concurrency: self.config.batch_concurrency,
        })
    }
}

impl Gateway {
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::new()
    }

    /// Build a gateway from configuration alone: adapters from the provider
    /// list (enabled only, in fallback order) and the SQLite store at
    /// `cache.database_path`, or an in-memory store when unset.
    pub fn from_config(config: GatewayConfig) -> Result<Self, GatewayError> {
        config
            .validate()
            .map_err(|reason| GatewayError::config("config", "", reason))?;

        let mut builder = Gateway::builder().config(config.clone());
        for provider in config.ordered_providers() {
            let adapter = build_provider(provider, &config.retry)?;
            builder = builder.provider_with_policy(adapter, config.retry.policy_for(provider));
        }

        match &config.cache.database_path {
            Some(path) => builder.store(Arc::new(SqliteStore::open(path)?)).build(),
            None => builder.build(),
        }
    }

    pub fn provider_ids(&self) -> impl Iterator<Item = &str> {
        self.providers.iter().map(|slot| slot.adapter.id())
    }

    pub fn cache(&self) -> &Arc<TieredCache> {
        &self.cache
    }

    pub fn ledger(&self) -> &Arc<CostLedger> {
        &self.ledger
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub async fn cost_stats(&self) -> Result<CostStats, GatewayError> {
        self.ledger.cost_stats().await
    }

    pub async fn budget_status(&self) -> Result<BudgetStatus, GatewayError> {
        self.ledger.check_budget().await
    }

    pub async fn purge_expired(&self) -> Result<usize, GatewayError> {
        self.cache.purge_expired().await
    }

    pub async fn clear_cache(&self) -> Result<(), GatewayError> {
        self.cache.clear().await
    }

    fn enter(&self, state: GatewayState) {
        log::debug!("gateway state -> {}", state);
    }

    fn has_free_provider(&self) -> bool {
        self.providers.iter().any(|slot| slot.adapter.is_free())
    }

    /// Analyze one request.
    ///
    /// Cache hits return without touching the budget or any provider. On a
    /// miss, providers are tried in order until one succeeds; only then are
    /// the ledger and cache written.
    pub async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisOutcome, GatewayError> {
        self.enter(GatewayState::Preprocessing);
        let images = match self.normalize(request).await {
            Ok(images) => images,
            Err(e) => {
                self.enter(GatewayState::Failed);
                return Err(e.with_operation("preprocess"));
            }
        };

        let fingerprint = fingerprint(&images, request.context(), &self.chain);

        self.enter(GatewayState::CacheCheck);
        if let Some(entry) = self.cache.get(&fingerprint).await {
            self.ledger.record_cache_hit();
            log::info!("cache hit (result from '{}')", entry.provider);
            self.enter(GatewayState::Returned);
            return Ok(AnalysisOutcome {
                result: entry.result,
                source: ResultSource::Cache {
                    provider: entry.provider,
                },
                fingerprint,
                cost: 0.0,
                fallbacks: Vec::new(),
            });
        }

        self.enter(GatewayState::BudgetCheck);
        let budget = self.ledger.admission_status().await?;
        if !self.has_free_provider() {
            if let Some(error) = budget.exceeded_error() {
                self.enter(GatewayState::Failed);
                return Err(error.with_recovery_suggestion(BUDGET_RECOVERY));
            }
        }

        let total = self.providers.len();
        let mut failures = Vec::new();
        let mut refusal = None;
        for (index, slot) in self.providers.iter().enumerate() {
            let id = slot.adapter.id();
            if !slot.adapter.is_available() {
                log::debug!("skipping '{}': not available", id);
                failures.push(ProviderFailure {
                    provider: id.to_string(),
                    attempts: 0,
                    reason: FailureReason::NotAvailable,
                });
                continue;
            }
            // held until the call settles; dropping it on failure releases it
            let _reservation = match self.ledger.reserve(slot.adapter.cost_per_call()).await? {
                Admission::Granted(reservation) => reservation,
                Admission::Refused(usage) => {
                    log::debug!("skipping '{}': {} budget exceeded", id, usage.window);
                    failures.push(ProviderFailure {
                        provider: id.to_string(),
                        attempts: 0,
                        reason: FailureReason::BudgetExceeded {
                            window: usage.window,
                        },
                    });
                    refusal.get_or_insert(usage);
                    continue;
                }
            };

            match self
                .call_with_retries(slot, index + 1, total, &images, request.context())
                .await
            {
                Ok(result) => return Ok(self.complete(fingerprint, slot, result, failures).await),
                Err((error, attempts)) => failures.push(ProviderFailure {
                    provider: id.to_string(),
                    attempts,
                    reason: FailureReason::Failed { error },
                }),
            }
        }

        self.enter(GatewayState::Failed);
        // concurrent calls took the remaining budget between the admission
        // check and the reservation, and nothing was actually called
        let nothing_called = failures
            .iter()
            .all(|f| !matches!(f.reason, FailureReason::Failed { .. }));
        if let Some(usage) = refusal.filter(|_| nothing_called) {
            return Err(
                GatewayError::budget_exceeded(usage.window, usage.used, usage.limit)
                    .with_recovery_suggestion(BUDGET_RECOVERY),
            );
        }
        log::warn!(
            "all {} providers exhausted: {}",
            total,
            failures
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ")
        );
        Err(GatewayError::all_providers_exhausted(failures))
    }

    async fn normalize(&self, request: &AnalysisRequest) -> Result<ImageSet, GatewayError> {
        let preprocessor = self.preprocessor;
        let baseline = request.baseline().to_vec();
        let current = request.current().to_vec();
        let diff = request.diff().map(<[u8]>::to_vec);

        tokio::task::spawn_blocking(move || -> Result<ImageSet, GatewayError> {
            Ok(ImageSet {
                baseline: preprocessor.normalize_labeled("baseline", &baseline)?,
                current: preprocessor.normalize_labeled("current", &current)?,
                diff: diff
                    .map(|d| preprocessor.normalize_labeled("diff", &d))
                    .transpose()?,
            })
        })
        .await
        .map_err(|e| {
            GatewayError::preprocessing("request", format!("preprocessing task failed: {}", e))
        })?
    }

    /// Call one provider, retrying transient failures per its policy.
    /// On failure returns the last error and the number of calls made.
    async fn call_with_retries(
        &self,
        slot: &ProviderSlot,
        index: usize,
        total: usize,
        images: &ImageSet,
        context: &AnalysisContext,
    ) -> Result<AnalysisResult, (ProviderError, u32)> {
        let id = slot.adapter.id();
        let mut attempts = 0;
        loop {
            attempts += 1;
            self.enter(GatewayState::ProviderAttempt {
                provider: id.to_string(),
                index,
                total,
                attempt: attempts,
            });

            let call = slot.adapter.analyze(images, context);
            let error = match tokio::time::timeout(slot.policy.timeout, call).await {
                Ok(Ok(result)) => return Ok(result),
                Ok(Err(error)) => error,
                Err(_) => ProviderError::timeout(id, slot.policy.timeout.as_millis() as u64),
            };

            match next_step(error.kind(), attempts, slot.policy.max_retries) {
                Step::Retry => {
                    log::warn!("{}; retrying", error);
                    if !slot.policy.retry_delay.is_zero() {
                        tokio::time::sleep(slot.policy.retry_delay).await;
                    }
                }
                Step::NextProvider => {
                    log::warn!("{}; moving to next provider", error);
                    return Err((error, attempts));
                }
            }
        }
    }

    async fn complete(
        &self,
        fingerprint: String,
        slot: &ProviderSlot,
        result: AnalysisResult,
        fallbacks: Vec<ProviderFailure>,
    ) -> AnalysisOutcome {
        let id = slot.adapter.id();
        let cost = slot.adapter.cost_per_call().max(0.0);

        if let Err(e) = self.ledger.record(id, cost).await {
            log::error!("failed to record ${:.4} for '{}': {}", cost, id, e);
        }
        self.enter(GatewayState::Recorded);

        if let Err(e) = self.cache.put(&fingerprint, result.clone(), id).await {
            log::warn!("durable cache write failed: {}", e);
        }

        log::info!(
            "'{}' judged {} (confidence {:.2}, cost ${:.4})",
            id,
            result.severity,
            result.confidence,
            cost
        );
        self.enter(GatewayState::Returned);
        AnalysisOutcome {
            result,
            source: ResultSource::Provider {
                provider: id.to_string(),
            },
            fingerprint,
            cost,
            fallbacks,
        }
    }
}
