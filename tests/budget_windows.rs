//! Integration tests for budget enforcement and window rollover
//!
//! Time is driven by the harness's manual clock, which starts at
//! 2024-06-10 12:00 UTC.

mod common;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, TimeZone, Utc};
use common::harness;
use common::mock_provider::MockProvider;
use vision_gateway::error::{ProviderErrorKind, classify};
use vision_gateway::store::LedgerStore;
use vision_gateway::{BudgetWindow, FailureReason, GatewayError, ResultSource, Severity};

#[tokio::test]
async fn third_sixty_cent_call_is_refused_under_a_one_dollar_limit() {
    let paid = Arc::new(MockProvider::judging("paid", 0.60, Severity::Minor));
    let h = harness::build(harness::config(1.0, 100.0), &[paid.clone()]);

    h.gateway.analyze(&harness::request(1)).await.unwrap();
    // 60% used: below every threshold
    h.gateway.analyze(&harness::request(2)).await.unwrap();

    let err = h.gateway.analyze(&harness::request(3)).await.unwrap_err();
    match &err {
        GatewayError::BudgetExceeded {
            window,
            used,
            limit,
            ..
        } => {
            assert_eq!(*window, BudgetWindow::Daily);
            assert!((used - 1.2).abs() < 1e-9);
            assert_eq!(*limit, 1.0);
        }
        other => panic!("expected BudgetExceeded, got {}", other),
    }
    assert!(classify::is_budget_exhaustion(&err));
    assert_eq!(paid.calls(), 2);
    assert_eq!(h.store.entry_count().await.unwrap(), 2);
}

#[tokio::test]
async fn concurrent_paid_calls_cannot_overspend() {
    let paid = Arc::new(
        MockProvider::judging("paid", 0.60, Severity::Minor)
            .with_latency(StdDuration::from_millis(30)),
    );
    let h = harness::build(harness::config(1.0, 100.0), &[paid.clone()]);
    let requests: Vec<_> = (1..=6).map(harness::request).collect();

    let results = h.gateway.analyze_batch_with_concurrency(&requests, 6).await;

    let ok = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(ok, 2);
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(
            matches!(
                err,
                GatewayError::BudgetExceeded {
                    window: BudgetWindow::Daily,
                    ..
                }
            ),
            "expected BudgetExceeded, got {}",
            err
        );
    }
    assert_eq!(paid.calls(), 2);
    assert_eq!(h.store.entry_count().await.unwrap(), 2);
    let status = h.gateway.budget_status().await.unwrap();
    assert!((status.daily.used - 1.2).abs() < 1e-9);
}

#[tokio::test]
async fn failed_paid_calls_release_their_reservation() {
    let flaky = Arc::new(MockProvider::failing("flaky", 0.60, ProviderErrorKind::InvalidResponse));
    let steady = Arc::new(MockProvider::judging("steady", 0.60, Severity::Minor));
    let h = harness::build(harness::config(1.0, 100.0), &[flaky.clone(), steady.clone()]);

    // flaky's hold is returned before steady reserves, so both calls fit
    for seed in 1..=2 {
        let outcome = h.gateway.analyze(&harness::request(seed)).await.unwrap();
        assert_eq!(outcome.source.provider(), "steady");
    }
    assert_eq!(steady.calls(), 2);
    assert_eq!(h.store.entry_count().await.unwrap(), 2);
}

#[tokio::test]
async fn cache_hits_are_served_even_when_the_breaker_is_tripped() {
    let paid = Arc::new(MockProvider::judging("paid", 1.0, Severity::Minor));
    let h = harness::build(harness::config(1.0, 100.0), &[paid.clone()]);

    h.gateway.analyze(&harness::request(1)).await.unwrap();
    assert!(h.gateway.budget_status().await.unwrap().circuit_breaker_triggered);

    let again = h.gateway.analyze(&harness::request(1)).await.unwrap();
    assert!(again.source.is_cache());
    assert_eq!(paid.calls(), 1);
}

#[tokio::test]
async fn tripped_breaker_skips_paid_providers_but_uses_free_ones() {
    let paid = Arc::new(MockProvider::judging("paid", 0.60, Severity::Moderate));
    let local = Arc::new(MockProvider::judging("local", 0.0, Severity::Minor));
    let h = harness::build(harness::config(1.0, 100.0), &[paid.clone(), local.clone()]);

    for seed in 1..=2 {
        let outcome = h.gateway.analyze(&harness::request(seed)).await.unwrap();
        assert_eq!(outcome.source.provider(), "paid");
    }

    let outcome = h.gateway.analyze(&harness::request(3)).await.unwrap();
    assert_eq!(outcome.source, ResultSource::Provider { provider: "local".into() });
    assert_eq!(outcome.fallbacks.len(), 1);
    assert_eq!(outcome.fallbacks[0].attempts, 0);
    assert_eq!(
        outcome.fallbacks[0].reason,
        FailureReason::BudgetExceeded {
            window: BudgetWindow::Daily
        }
    );
    assert_eq!(paid.calls(), 2);
    assert_eq!(local.calls(), 1);
}

#[tokio::test]
async fn daily_breaker_resets_at_utc_midnight() {
    let paid = Arc::new(MockProvider::judging("paid", 0.60, Severity::Minor));
    let h = harness::build(harness::config(1.0, 100.0), &[paid.clone()]);

    h.gateway.analyze(&harness::request(1)).await.unwrap();
    h.gateway.analyze(&harness::request(2)).await.unwrap();
    assert!(h.gateway.analyze(&harness::request(3)).await.is_err());

    h.clock.advance(Duration::hours(11) + Duration::minutes(59));
    assert!(h.gateway.analyze(&harness::request(3)).await.is_err());

    h.clock.advance(Duration::minutes(1));
    let status = h.gateway.budget_status().await.unwrap();
    assert!(!status.circuit_breaker_triggered);
    assert_eq!(status.daily.used, 0.0);
    assert!((status.monthly.used - 1.2).abs() < 1e-9);

    h.gateway.analyze(&harness::request(3)).await.unwrap();
    assert_eq!(paid.calls(), 3);
}

#[tokio::test]
async fn monthly_window_outlives_the_day() {
    let paid = Arc::new(MockProvider::judging("paid", 0.60, Severity::Minor));
    // daily disabled
    let h = harness::build(harness::config(0.0, 1.0), &[paid.clone()]);

    h.gateway.analyze(&harness::request(1)).await.unwrap();
    h.gateway.analyze(&harness::request(2)).await.unwrap();

    h.clock.advance(Duration::days(3));
    let err = h.gateway.analyze(&harness::request(3)).await.unwrap_err();
    assert!(matches!(
        err,
        GatewayError::BudgetExceeded {
            window: BudgetWindow::Monthly,
            ..
        }
    ));

    h.clock.set(Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap());
    h.gateway.analyze(&harness::request(3)).await.unwrap();
    assert_eq!(paid.calls(), 3);
}

#[tokio::test]
async fn warning_and_critical_thresholds_do_not_block() {
    let paid = Arc::new(MockProvider::judging("paid", 0.80, Severity::Minor));
    let h = harness::build(harness::config(1.0, 100.0), &[paid.clone()]);

    h.gateway.analyze(&harness::request(1)).await.unwrap();
    let status = h.gateway.budget_status().await.unwrap();
    assert!(status.warning_triggered);
    assert!(!status.critical_triggered);
    assert!(!status.circuit_breaker_triggered);
    assert!((status.daily.percent - 80.0).abs() < 1e-9);
    assert!((status.daily.remaining - 0.2).abs() < 1e-9);

    let outcome = h.gateway.analyze(&harness::request(2)).await.unwrap();
    assert_eq!(outcome.source.provider(), "paid");
    let status = h.gateway.budget_status().await.unwrap();
    assert!(status.critical_triggered);
    assert!(status.circuit_breaker_triggered);
    assert_eq!(status.daily.remaining, 0.0);
}

#[tokio::test]
async fn spend_is_broken_down_by_provider() {
    let cheap = Arc::new(MockProvider::judging("cheap", 0.01, Severity::Minor).unavailable());
    let pricey = Arc::new(MockProvider::judging("pricey", 0.05, Severity::Minor));
    let h = harness::build(harness::config(5.0, 100.0), &[cheap, pricey]);

    for seed in 0..4 {
        h.gateway.analyze(&harness::request(seed)).await.unwrap();
    }

    let stats = h.gateway.cost_stats().await.unwrap();
    assert_eq!(stats.operation_count, 4);
    assert_eq!(stats.by_provider.len(), 1);
    assert_eq!(stats.by_provider[0].provider, "pricey");
    assert!((stats.total_cost - 0.20).abs() < 1e-9);
}
