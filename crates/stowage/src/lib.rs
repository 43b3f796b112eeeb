pub mod assembler;
pub mod batch;
pub mod config;
pub mod disk;
pub mod error;
pub mod fs;
pub mod metadata;
pub mod model;
pub mod orchestrator;
pub mod report;
pub mod retry;
pub mod source;
pub mod transfer;
pub mod verify;

pub use assembler::TitleAssembler;
pub use batch::{BatchRunner, BatchSummary};
pub use config::{ApiConfig, StowageConfig, TransferConfig};
pub use disk::{DiskGuard, FixedProbe, SpaceProbe, SysinfoProbe};
pub use error::{Result, StowageError};
pub use metadata::Metadata;
pub use model::{FetchState, Fragment, Title, Variant};
pub use orchestrator::{DownloadOrchestrator, TitlePlan};
pub use report::{FailureKind, TitleFailure, TitleReport, TitleStatus};
pub use retry::RetryPolicy;
pub use source::{HttpTitleSource, RemotePlaylist, TitleSource};
pub use transfer::{CommandTransfer, HttpTransfer, Transfer, TransferReceipt};
pub use verify::{Verification, VerifyFailure};
pub use tokio_util::sync::CancellationToken;
