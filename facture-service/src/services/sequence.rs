//! Year-scoped invoice numbering.

use crate::error::FactureError;
use crate::models::Invoice;
use crate::services::store::{CounterStore, IssueFn};
use std::sync::Arc;
use tracing::instrument;

#[derive(Clone)]
pub struct SequenceAllocator {
    counters: Arc<dyn CounterStore>,
}

impl SequenceAllocator {
    pub fn new(counters: Arc<dyn CounterStore>) -> Self {
        Self { counters }
    }

    /// Next seq for `year`, issued by one atomic upsert-and-increment.
    /// Errors are retriable; callers must not persist anything on failure.
    #[instrument(skip(self))]
    pub async fn next_seq(&self, year: i32) -> Result<i64, FactureError> {
        let counter = self.counters.find_and_increment(year).await?;
        tracing::debug!(year = year, seq = counter.seq, "Allocated invoice sequence");
        Ok(counter.seq)
    }

    /// Allocate the next seq for `year` and store the invoice `issue` builds
    /// from it. A rejected insert hands the seq back, so the year stays
    /// numbered without gaps.
    #[instrument(skip(self, issue))]
    pub async fn issue(&self, year: i32, issue: IssueFn<'_>) -> Result<Invoice, FactureError> {
        let invoice = self.counters.issue_numbered(year, issue).await?;
        tracing::debug!(year = year, seq = invoice.seq, "Allocated invoice sequence");
        Ok(invoice)
    }
}
