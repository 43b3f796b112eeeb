use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use stowage_engine::{BatchSummary, TitleReport};

use crate::error::Result;

pub fn progress_bar(titles: usize, hidden: bool) -> ProgressBar {
    if hidden {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(titles as u64);
    let style = ProgressStyle::with_template(
        "{spinner:.blue} [{elapsed_precise}] [{bar:30.cyan/blue}] {pos}/{len} titles {msg}",
    )
    .map(|style| style.progress_chars("=> "))
    .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

pub fn summary_line(summary: &BatchSummary) -> String {
    format!(
        "{} title(s): {} done, {} partially done, {} failed",
        summary.total(),
        summary.done,
        summary.partially_done,
        summary.failed
    )
}

#[derive(Serialize)]
struct JsonOutput<'a> {
    summary: &'a BatchSummary,
    titles: &'a [TitleReport],
}

pub fn render_json(reports: &[TitleReport], summary: &BatchSummary) -> Result<String> {
    Ok(serde_json::to_string_pretty(&JsonOutput {
        summary,
        titles: reports,
    })?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stowage_engine::{FailureKind, TitleFailure, TitleStatus};

    fn reports() -> Vec<TitleReport> {
        vec![
            TitleReport::new("101", TitleStatus::Done, Vec::new()),
            TitleReport::failed(
                "102",
                TitleFailure::new(FailureKind::MalformedManifest, "bad playlist"),
            ),
        ]
    }

    #[test]
    fn test_summary_line() {
        let summary = BatchSummary::from_reports(&reports());
        assert_eq!(
            summary_line(&summary),
            "2 title(s): 1 done, 0 partially done, 1 failed"
        );
    }

    #[test]
    fn test_render_json() {
        let reports = reports();
        let summary = BatchSummary::from_reports(&reports);
        let value: serde_json::Value =
            serde_json::from_str(&render_json(&reports, &summary).unwrap()).unwrap();
        assert_eq!(value["summary"]["done"], 1);
        assert_eq!(value["titles"][0]["status"], "done");
        assert_eq!(value["titles"][1]["kind"], "malformed_manifest");
        assert_eq!(value["titles"][1]["message"], "bad playlist");
    }
}
