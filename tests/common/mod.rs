//! Common test utilities and helpers for the vision gateway tests
//!
//! This module provides scripted providers, generated screenshots and a
//! gateway factory wired to in-memory stores and a manual clock.

#![allow(dead_code)]

/// Scripted provider for testing without network access
pub mod mock_provider {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use vision_gateway::error::ProviderErrorKind;
    use vision_gateway::{
        AnalysisContext, AnalysisResult, ImageSet, ProviderAdapter, ProviderError, Severity,
    };

    /// What one call does
    #[derive(Debug, Clone)]
    pub enum Reply {
        Judge(Severity),
        Fail(ProviderErrorKind),
        /// Never answers; only a timeout ends the call
        Hang,
    }

    pub struct MockProvider {
        id: String,
        model: String,
        cost: f64,
        available: bool,
        latency: Duration,
        /// Consumed front to back; the last reply repeats forever
        script: Mutex<VecDeque<Reply>>,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl MockProvider {
        pub fn new(id: &str, cost: f64, script: Vec<Reply>) -> Self {
            Self {
                id: id.to_string(),
                model: format!("{}-model", id),
                cost,
                available: true,
                latency: Duration::ZERO,
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }

        /// Always answers with `severity`
        pub fn judging(id: &str, cost: f64, severity: Severity) -> Self {
            Self::new(id, cost, vec![Reply::Judge(severity)])
        }

        /// Always fails with `kind`
        pub fn failing(id: &str, cost: f64, kind: ProviderErrorKind) -> Self {
            Self::new(id, cost, vec![Reply::Fail(kind)])
        }

        pub fn unavailable(mut self) -> Self {
            self.available = false;
            self
        }

        pub fn with_latency(mut self, latency: Duration) -> Self {
            self.latency = latency;
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn max_in_flight(&self) -> usize {
            self.max_in_flight.load(Ordering::SeqCst)
        }

        fn next_reply(&self) -> Reply {
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                script.front().cloned().unwrap_or(Reply::Hang)
            }
        }
    }

    pub fn result_for(provider: &str, severity: Severity) -> AnalysisResult {
        AnalysisResult {
            severity,
            confidence: 0.9,
            reasoning: format!("judged by {}", provider),
            categories: vec!["layout".to_string()],
            suggestions: vec![],
        }
    }

    #[async_trait]
    impl ProviderAdapter for MockProvider {
        fn id(&self) -> &str {
            &self.id
        }

        fn model(&self) -> &str {
            &self.model
        }

        fn cost_per_call(&self) -> f64 {
            self.cost
        }

        fn is_available(&self) -> bool {
            self.available
        }

        async fn analyze(
            &self,
            _images: &ImageSet,
            _context: &AnalysisContext,
        ) -> Result<AnalysisResult, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            let reply = self.next_reply();
            if matches!(reply, Reply::Hang) {
                std::future::pending::<()>().await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            match reply {
                Reply::Judge(severity) => Ok(result_for(&self.id, severity)),
                Reply::Fail(ProviderErrorKind::Timeout) => Err(ProviderError::timeout(&self.id, 1)),
                Reply::Fail(ProviderErrorKind::Unavailable) => {
                    Err(ProviderError::unavailable(&self.id, "503 from mock"))
                }
                Reply::Fail(ProviderErrorKind::InvalidResponse) => {
                    Err(ProviderError::invalid_response(&self.id, "garbled"))
                }
                Reply::Hang => unreachable!(),
            }
        }
    }
}

/// Generated screenshots
pub mod test_images {
    use std::io::Cursor;

    use image::{ImageFormat, Rgb, RgbImage};

    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb(rgb))
    }

    /// Horizontal/vertical gradient; `seed` shifts the blue channel
    pub fn gradient(width: u32, height: u32, seed: u8) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            Rgb([
                (x * 255 / width.max(1)) as u8,
                (y * 255 / height.max(1)) as u8,
                seed,
            ])
        })
    }

    pub fn encode(img: &RgbImage, format: ImageFormat) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, format).unwrap();
        out.into_inner()
    }

    pub fn png(img: &RgbImage) -> Vec<u8> {
        encode(img, ImageFormat::Png)
    }

    /// A distinct, small baseline/current pair per `seed`
    pub fn pair(seed: u8) -> (Vec<u8>, Vec<u8>) {
        (
            png(&gradient(64, 48, seed)),
            png(&gradient(64, 48, seed.wrapping_add(128))),
        )
    }
}

/// Gateway wiring for tests
pub mod harness {
    use std::sync::Arc;

    use vision_gateway::config::{BudgetConfig, CacheConfig, RetryConfig};
    use vision_gateway::core::ManualClock;
    use vision_gateway::store::MemoryStore;
    use vision_gateway::{AnalysisRequest, Gateway, GatewayConfig};

    use super::mock_provider::MockProvider;
    use super::test_images;

    pub struct Harness {
        pub gateway: Gateway,
        pub store: Arc<MemoryStore>,
        pub clock: Arc<ManualClock>,
    }

    /// No retry delay, short timeouts, in-memory database
    pub fn config(daily_limit: f64, monthly_limit: f64) -> GatewayConfig {
        GatewayConfig {
            providers: Vec::new(),
            budget: BudgetConfig {
                daily_limit,
                monthly_limit,
            },
            cache: CacheConfig {
                database_path: None,
                ..CacheConfig::default()
            },
            retry: RetryConfig {
                max_retries: 1,
                retry_delay_ms: 0,
                timeout_secs: 5,
            },
            ..GatewayConfig::default()
        }
    }

    pub fn build(config: GatewayConfig, providers: &[Arc<MockProvider>]) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::at(2024, 6, 10, 12));
        let mut builder = Gateway::builder()
            .config(config)
            .store(store.clone())
            .clock(clock.clone());
        for provider in providers {
            builder = builder.provider(provider.clone());
        }
        Harness {
            gateway: builder.build().unwrap(),
            store,
            clock,
        }
    }

    pub fn request(seed: u8) -> AnalysisRequest {
        let (baseline, current) = test_images::pair(seed);
        AnalysisRequest::new(baseline, current)
    }
}
