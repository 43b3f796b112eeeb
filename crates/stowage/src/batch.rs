//! Runs many titles with a bounded number in flight.

use std::sync::Arc;

use futures::StreamExt;
use futures::stream;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::assembler::TitleAssembler;
use crate::report::{FailureKind, TitleFailure, TitleReport, TitleStatus};

pub struct BatchRunner {
    assembler: Arc<TitleAssembler>,
    concurrency: usize,
}

impl BatchRunner {
    pub fn new(assembler: Arc<TitleAssembler>) -> Self {
        let concurrency = assembler.config().concurrency.max(1);
        Self {
            assembler,
            concurrency,
        }
    }

    /// Processes `ids` in order, at most `concurrency` at a time, calling
    /// `on_report` as each title finishes. Reports come back in input order.
    ///
    /// Once the disk floor has been breached or `token` is cancelled, titles
    /// that have not started yet are reported failed without being touched.
    pub async fn run<F>(
        &self,
        ids: Vec<String>,
        token: &CancellationToken,
        mut on_report: F,
    ) -> Vec<TitleReport>
    where
        F: FnMut(&TitleReport),
    {
        info!(titles = ids.len(), concurrency = self.concurrency, "Starting batch");

        let mut reports = Vec::with_capacity(ids.len());
        let mut results = stream::iter(ids)
            .map(|id| self.run_one(id, token))
            .buffered(self.concurrency);
        while let Some(report) = results.next().await {
            on_report(&report);
            reports.push(report);
        }
        reports
    }

    async fn run_one(&self, id: String, token: &CancellationToken) -> TitleReport {
        if token.is_cancelled() {
            return TitleReport::failed(
                id,
                TitleFailure::new(FailureKind::Cancelled, "run cancelled before the title started"),
            );
        }
        if self.assembler.disk().is_breached() {
            return TitleReport::failed(
                id,
                TitleFailure::new(
                    FailureKind::DiskSpaceExhausted,
                    "free disk space fell below the floor before the title started",
                ),
            );
        }
        self.assembler.assemble(&id, token).await
    }
}

/// Counts of final statuses over a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub done: usize,
    pub partially_done: usize,
    pub failed: usize,
}

impl BatchSummary {
    pub fn from_reports(reports: &[TitleReport]) -> Self {
        reports
            .iter()
            .fold(Self::default(), |mut summary, report| {
                match report.status {
                    TitleStatus::Done => summary.done += 1,
                    TitleStatus::PartiallyDone { .. } => summary.partially_done += 1,
                    TitleStatus::Failed(_) => summary.failed += 1,
                }
                summary
            })
    }

    pub fn total(&self) -> usize {
        self.done + self.partially_done + self.failed
    }

    pub fn all_done(&self) -> bool {
        self.partially_done == 0 && self.failed == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts() {
        let reports = vec![
            TitleReport::new("1", TitleStatus::Done, Vec::new()),
            TitleReport::new(
                "2",
                TitleStatus::PartiallyDone {
                    incomplete: Vec::new(),
                },
                Vec::new(),
            ),
            TitleReport::failed("3", TitleFailure::new(FailureKind::Cancelled, "stop")),
            TitleReport::new("4", TitleStatus::Done, Vec::new()),
        ];
        let summary = BatchSummary::from_reports(&reports);
        assert_eq!(
            summary,
            BatchSummary {
                done: 2,
                partially_done: 1,
                failed: 1
            }
        );
        assert_eq!(summary.total(), 4);
        assert!(!summary.all_done());
        assert!(BatchSummary::from_reports(&reports[..1]).all_done());
    }
}
