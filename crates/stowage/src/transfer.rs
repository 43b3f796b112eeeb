//! Transfer collaborator: moves the bytes of one remote fragment into a local file.
//!
//! Implementations must either produce the complete file at `dest` or fail;
//! a partially written file never appears under the final name.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, trace};
use url::Url;

use crate::error::{Result, StowageError};
use crate::fs;

/// What a successful transfer reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferReceipt {
    pub bytes_written: u64,
    /// Length announced by the remote side, if any.
    pub declared_len: Option<u64>,
}

#[async_trait]
pub trait Transfer: Send + Sync {
    async fn fetch(&self, url: &Url, dest: &Path) -> Result<TransferReceipt>;
}

/// Streams the response body into `<dest>.part` and renames it on success.
pub struct HttpTransfer {
    client: Client,
    timeout: Duration,
}

impl HttpTransfer {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    async fn stream_to(
        &self,
        response: reqwest::Response,
        url: &Url,
        part: &Path,
    ) -> Result<u64> {
        let mut file = tokio::fs::File::create(part)
            .await
            .map_err(|e| StowageError::io("creating fragment", part, e))?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                StowageError::fetch_failed(url.as_str(), format!("body read: {e}"), true)
            })?;
            file.write_all(&chunk)
                .await
                .map_err(|e| StowageError::io("writing fragment", part, e))?;
            written += chunk.len() as u64;
        }

        file.flush()
            .await
            .map_err(|e| StowageError::io("flushing fragment", part, e))?;
        Ok(written)
    }
}

#[async_trait]
impl Transfer for HttpTransfer {
    async fn fetch(&self, url: &Url, dest: &Path) -> Result<TransferReceipt> {
        fs::ensure_parent_dir(dest).await?;
        let part = fs::partial_path(dest);

        let response = self
            .client
            .get(url.clone())
            .timeout(self.timeout)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(StowageError::http_status(
                status,
                url.as_str(),
                "fetching fragment",
            ));
        }
        let declared_len = response.content_length();

        let written = match self.stream_to(response, url, &part).await {
            Ok(written) => written,
            Err(err) => {
                fs::remove_if_exists(&part).await?;
                return Err(err);
            }
        };

        if let Some(declared) = declared_len
            && declared != written
        {
            fs::remove_if_exists(&part).await?;
            return Err(StowageError::fetch_failed(
                url.as_str(),
                format!("received {written} of {declared} declared bytes"),
                true,
            ));
        }

        tokio::fs::rename(&part, dest)
            .await
            .map_err(|e| StowageError::io("renaming fragment", dest, e))?;
        trace!(url = %url, bytes = written, "Fragment transferred");

        Ok(TransferReceipt {
            bytes_written: written,
            declared_len,
        })
    }
}

/// Hands each fragment to an external download manager.
///
/// `{url}` and `{output}` in the argument templates are substituted per call;
/// `{output}` points at a `.part` file that is renamed once the program exits
/// successfully.
pub struct CommandTransfer {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandTransfer {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    fn expand_args(&self, url: &Url, output: &Path) -> Vec<String> {
        let output = output.to_string_lossy();
        self.args
            .iter()
            .map(|arg| arg.replace("{url}", url.as_str()).replace("{output}", &output))
            .collect()
    }
}

#[async_trait]
impl Transfer for CommandTransfer {
    async fn fetch(&self, url: &Url, dest: &Path) -> Result<TransferReceipt> {
        fs::ensure_parent_dir(dest).await?;
        let part = fs::partial_path(dest);
        let args = self.expand_args(url, &part);
        debug!(program = %self.program.display(), ?args, "Running transfer command");

        let child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(StowageError::fetch_failed(
                    url.as_str(),
                    format!("failed to spawn {}: {e}", self.program.display()),
                    false,
                ));
            }
            Err(_) => {
                fs::remove_if_exists(&part).await?;
                return Err(StowageError::fetch_failed(
                    url.as_str(),
                    format!("transfer command timed out after {:?}", self.timeout),
                    true,
                ));
            }
        };

        if !output.status.success() {
            fs::remove_if_exists(&part).await?;
            let stderr = String::from_utf8_lossy(&output.stderr);
            let last_line = stderr.lines().rev().find(|l| !l.trim().is_empty());
            return Err(StowageError::fetch_failed(
                url.as_str(),
                format!(
                    "transfer command exited with {}: {}",
                    output.status,
                    last_line.unwrap_or("no output")
                ),
                true,
            ));
        }

        let written = tokio::fs::metadata(&part)
            .await
            .map_err(|e| StowageError::io("reading transferred fragment", &part, e))?
            .len();
        tokio::fs::rename(&part, dest)
            .await
            .map_err(|e| StowageError::io("renaming fragment", dest, e))?;

        Ok(TransferReceipt {
            bytes_written: written,
            declared_len: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_args() {
        let transfer = CommandTransfer::new(
            "aria2c",
            vec!["--out={output}".into(), "{url}".into(), "-q".into()],
            Duration::from_secs(5),
        );
        let url = Url::parse("https://cdn.example.com/a/video1.m4s").unwrap();
        let args = transfer.expand_args(&url, Path::new("/t/m3u8/a/video1.m4s.part"));
        assert_eq!(
            args,
            vec![
                "--out=/t/m3u8/a/video1.m4s.part",
                "https://cdn.example.com/a/video1.m4s",
                "-q"
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_transfer_writes_final_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("m3u8/720p/video1.m4s");
        let transfer = CommandTransfer::new(
            "sh",
            vec!["-c".into(), "printf abcdef > \"$0\"".into(), "{output}".into()],
            Duration::from_secs(10),
        );
        let url = Url::parse("https://cdn.example.com/video1.m4s").unwrap();

        let receipt = transfer.fetch(&url, &dest).await.unwrap();
        assert_eq!(receipt.bytes_written, 6);
        assert_eq!(receipt.declared_len, None);
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"abcdef");
        assert!(!fs::partial_path(&dest).exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_failure_is_retryable_and_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("video2.m4s");
        let transfer = CommandTransfer::new(
            "sh",
            vec![
                "-c".into(),
                "printf partial > \"$0\"; echo 'connection reset' >&2; exit 3".into(),
                "{output}".into(),
            ],
            Duration::from_secs(10),
        );
        let url = Url::parse("https://cdn.example.com/video2.m4s").unwrap();

        let err = transfer.fetch(&url, &dest).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("connection reset"));
        assert!(!dest.exists());
        assert!(!fs::partial_path(&dest).exists());
    }
}
