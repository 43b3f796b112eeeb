//! Per-title pipeline owner.
//!
//! `data.json` is written before anything else is fetched and `status.json`
//! after everything else, so every title directory says what it is and how
//! far it got.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::config::{StowageConfig, TransferConfig};
use crate::disk::DiskGuard;
use crate::error::{Result, StowageError};
use crate::model::{Title, validate_title_id};
use crate::orchestrator::DownloadOrchestrator;
use crate::report::{
    FailureKind, IncompleteVariant, TitleFailure, TitleReport, TitleStatus, VariantRecord,
};
use crate::source::{HttpTitleSource, TitleSource, build_client};
use crate::transfer::{CommandTransfer, HttpTransfer, Transfer};
use crate::verify::verify_variant;

pub struct TitleAssembler {
    config: Arc<StowageConfig>,
    orchestrator: DownloadOrchestrator,
    disk: Arc<DiskGuard>,
}

impl TitleAssembler {
    pub fn new(
        config: Arc<StowageConfig>,
        orchestrator: DownloadOrchestrator,
        disk: Arc<DiskGuard>,
    ) -> Self {
        Self {
            config,
            orchestrator,
            disk,
        }
    }

    /// Wires the HTTP title source, the configured transfer and the OS disk probe.
    pub fn from_config(config: StowageConfig) -> Result<Self> {
        config.validate()?;

        let client = build_client(&config.api)?;
        let source: Arc<dyn TitleSource> =
            Arc::new(HttpTitleSource::new(client.clone(), config.api.clone())?);
        let transfer: Arc<dyn Transfer> = match &config.transfer {
            TransferConfig::Http => {
                Arc::new(HttpTransfer::new(client, config.api.transfer_timeout))
            }
            TransferConfig::Command { program, args } => Arc::new(CommandTransfer::new(
                program,
                args.clone(),
                config.api.transfer_timeout,
            )),
        };

        let orchestrator = DownloadOrchestrator::new(&config, source, transfer);
        let disk = Arc::new(DiskGuard::with_sysinfo(config.disk_space_floor));
        Ok(Self::new(Arc::new(config), orchestrator, disk))
    }

    pub fn config(&self) -> &StowageConfig {
        &self.config
    }

    pub fn disk(&self) -> &DiskGuard {
        &self.disk
    }

    pub fn title_root(&self, title_id: &str) -> PathBuf {
        self.config.output_dir.join(title_id)
    }

    /// Runs the whole pipeline for one title and records the outcome in its
    /// `status.json`. Never fails: every error ends up in the report.
    #[instrument(skip(self, token))]
    pub async fn assemble(&self, title_id: &str, token: &CancellationToken) -> TitleReport {
        if let Err(reason) = validate_title_id(title_id) {
            warn!(%reason, "Rejecting title");
            return TitleReport::failed(
                title_id,
                TitleFailure::new(FailureKind::InvalidTitle, reason),
            );
        }

        let root = self.title_root(title_id);
        let previous = TitleReport::read(&root).await;
        if self.config.skip_completed
            && let Some(previous) = &previous
            && previous.status.is_done()
        {
            info!("Title already complete, skipping");
            return previous.clone();
        }

        let report = match self.run(title_id, &root, previous.as_ref(), token).await {
            Ok(report) => report,
            Err(err) => {
                warn!(error = %err, "Title failed");
                TitleReport::failed(title_id, TitleFailure::from(&err))
            }
        };

        if let Err(e) = report.write(&root).await {
            error!(error = %e, "Failed to write title status");
        }

        match &report.status {
            TitleStatus::Done => info!("Title done"),
            TitleStatus::PartiallyDone { incomplete } => {
                warn!(incomplete = incomplete.len(), "Title partially done")
            }
            TitleStatus::Failed(_) => {}
        }
        report
    }

    async fn run(
        &self,
        title_id: &str,
        root: &Path,
        previous: Option<&TitleReport>,
        token: &CancellationToken,
    ) -> Result<TitleReport> {
        if token.is_cancelled() {
            return Err(StowageError::Cancelled);
        }

        let metadata = self.orchestrator.fetch_metadata(title_id, token).await?;
        metadata.write(root).await?;

        let top = self
            .orchestrator
            .fetch_top_manifest(title_id, &metadata, token)
            .await?;
        let mut plan = self.orchestrator.plan(&top, token).await?;

        if plan.retained() == 0 {
            let records = plan.variants.iter().map(VariantRecord::from).collect();
            return Ok(TitleReport::new(
                title_id,
                TitleStatus::Failed(TitleFailure::new(
                    FailureKind::NoRetainedVariants,
                    format!(
                        "all {} variants were excluded by the codec filter",
                        plan.main_variants()
                    ),
                )),
                records,
            ));
        }

        if let Some(previous) = previous {
            self.orchestrator.resume(root, &mut plan, previous).await;
        }
        self.orchestrator.write_manifests(root, &plan).await?;

        self.disk.check(root)?;
        if token.is_cancelled() {
            return Err(StowageError::Cancelled);
        }

        let mut title = Title {
            id: title_id.to_string(),
            metadata,
            variants: plan.variants,
        };
        self.orchestrator
            .fetch_fragments(root, &mut title.variants, token)
            .await;

        // Verification only starts once every fetch of the title has settled.
        let mut incomplete = Vec::new();
        for variant in title.included_mut() {
            if let Some(problem) = &variant.problem {
                incomplete.push(IncompleteVariant {
                    label: variant.label.clone(),
                    problem: Some(problem.clone()),
                    fragments: Vec::new(),
                });
                continue;
            }

            let problems = verify_variant(self.orchestrator.rewriter(), root, variant).await;
            if !problems.is_empty() {
                incomplete.push(IncompleteVariant {
                    label: variant.label.clone(),
                    problem: None,
                    fragments: problems,
                });
            }
        }

        let status = if incomplete.is_empty() {
            TitleStatus::Done
        } else {
            TitleStatus::PartiallyDone { incomplete }
        };
        let records = title.variants.iter().map(VariantRecord::from).collect();
        Ok(TitleReport::new(title.id, status, records))
    }
}
