//! Bounded-concurrency batch analysis.

use futures_util::stream::{self, StreamExt};

use super::Gateway;
use crate::error::GatewayError;
use crate::model::{AnalysisOutcome, AnalysisRequest};

impl Gateway {
    /// Analyze `requests` with at most `batch_concurrency` in flight.
    /// Results come back in input order; one failure does not stop the rest.
    pub async fn analyze_batch(
        &self,
        requests: &[AnalysisRequest],
    ) -> Vec<Result<AnalysisOutcome, GatewayError>> {
        self.analyze_batch_with_concurrency(requests, self.batch_concurrency)
            .await
    }

    pub async fn analyze_batch_with_concurrency(
        &self,
        requests: &[AnalysisRequest],
        concurrency: usize,
    ) -> Vec<Result<AnalysisOutcome, GatewayError>> {
        log::debug!(
            "analyzing batch of {} with concurrency {}",
            requests.len(),
            concurrency
        );
        stream::iter(requests)
            .map(|request| self.analyze(request))
            .buffered(concurrency.max(1))
            .collect()
            .await
    }
}
