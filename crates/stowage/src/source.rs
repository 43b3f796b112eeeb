//! Title API collaborator: metadata documents, top manifests and child playlists.

use std::sync::OnceLock;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, instrument};
use url::Url;

use crate::config::ApiConfig;
use crate::error::{Result, StowageError};
use crate::metadata::Metadata;

/// A playlist body together with the URL it was served from, which is the
/// base for resolving its relative references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePlaylist {
    pub url: Url,
    pub body: String,
}

#[async_trait]
pub trait TitleSource: Send + Sync {
    async fn fetch_metadata(&self, title_id: &str) -> Result<Metadata>;

    /// Fetches the top manifest of a title. `metadata` is the document
    /// returned by [`TitleSource::fetch_metadata`] for the same title.
    async fn fetch_manifest(&self, title_id: &str, metadata: &Metadata) -> Result<RemotePlaylist>;

    /// Fetches a child playlist referenced from a top manifest.
    async fn fetch_playlist(&self, url: &Url) -> Result<RemotePlaylist>;
}

/// Installs the process-wide rustls crypto provider once.
pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Can happen if another crate installed it first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Builds the HTTP client shared by the API source and the HTTP transfer.
pub fn build_client(config: &ApiConfig) -> Result<Client> {
    install_rustls_provider();

    let mut headers = HeaderMap::new();
    for (name, value) in &config.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| StowageError::configuration(format!("header name `{name}`: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| StowageError::configuration(format!("header `{name}`: {e}")))?;
        headers.insert(name, value);
    }
    if let Some(referer) = &config.referer {
        let value = HeaderValue::from_str(referer)
            .map_err(|e| StowageError::configuration(format!("referer: {e}")))?;
        headers.insert(reqwest::header::REFERER, value);
    }

    Client::builder()
        .user_agent(config.user_agent.clone())
        .default_headers(headers)
        .connect_timeout(config.timeout)
        .build()
        .map_err(StowageError::from)
}

/// [`TitleSource`] backed by a JSON API over HTTP.
pub struct HttpTitleSource {
    client: Client,
    base_url: Url,
    config: ApiConfig,
}

impl HttpTitleSource {
    pub fn new(client: Client, config: ApiConfig) -> Result<Self> {
        let raw = config
            .base_url
            .as_deref()
            .ok_or_else(|| StowageError::configuration("api.base_url is not set"))?;
        let mut base_url =
            Url::parse(raw).map_err(|e| StowageError::invalid_url(raw, e.to_string()))?;
        // `join` replaces the last path segment unless the base ends with '/'.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            client,
            base_url,
            config,
        })
    }

    fn metadata_url(&self, title_id: &str) -> Result<Url> {
        let path = self.config.metadata_path.replace("{id}", title_id);
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| StowageError::invalid_url(path, e.to_string()))
    }

    async fn get(&self, url: &Url, operation: &'static str) -> Result<reqwest::Response> {
        let response = self
            .client
            .get(url.clone())
            .timeout(self.config.timeout)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(StowageError::http_status(status, url.as_str(), operation));
        }
        Ok(response)
    }

    async fn get_playlist(&self, url: &Url, operation: &'static str) -> Result<RemotePlaylist> {
        let response = self.get(url, operation).await?;
        // Redirects change the base for relative references.
        let final_url = response.url().clone();
        let body = response.text().await?;
        Ok(RemotePlaylist {
            url: final_url,
            body,
        })
    }
}

#[async_trait]
impl TitleSource for HttpTitleSource {
    #[instrument(skip(self))]
    async fn fetch_metadata(&self, title_id: &str) -> Result<Metadata> {
        let url = self.metadata_url(title_id)?;
        debug!(url = %url, "Fetching title metadata");
        let bytes = self.get(&url, "fetching metadata").await?.bytes().await?;
        Metadata::from_slice(&bytes)
    }

    #[instrument(skip(self, metadata))]
    async fn fetch_manifest(&self, title_id: &str, metadata: &Metadata) -> Result<RemotePlaylist> {
        let field = &self.config.manifest_url_field;
        let raw = metadata.require_string(field)?;
        let url = self
            .base_url
            .join(raw)
            .map_err(|e| StowageError::invalid_url(raw, e.to_string()))?;
        debug!(url = %url, "Fetching top manifest");
        self.get_playlist(&url, "fetching top manifest").await
    }

    async fn fetch_playlist(&self, url: &Url) -> Result<RemotePlaylist> {
        debug!(url = %url, "Fetching child playlist");
        self.get_playlist(url, "fetching child playlist").await
    }
}

/// Resolves a playlist reference against the URL of the playlist containing it.
pub fn resolve_reference(base: &Url, reference: &str) -> Result<Url> {
    base.join(reference.trim())
        .map_err(|e| StowageError::invalid_url(reference, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(base: &str, path: &str) -> HttpTitleSource {
        let config = ApiConfig {
            base_url: Some(base.to_string()),
            metadata_path: path.to_string(),
            ..Default::default()
        };
        let client = build_client(&config).unwrap();
        HttpTitleSource::new(client, config).unwrap()
    }

    #[test]
    fn test_metadata_url_template() {
        let src = source("https://api.example.com/v2", "/titles/{id}/info");
        assert_eq!(
            src.metadata_url("1234").unwrap().as_str(),
            "https://api.example.com/v2/titles/1234/info"
        );
    }

    #[test]
    fn test_missing_base_url() {
        let config = ApiConfig::default();
        let client = build_client(&config).unwrap();
        let result = HttpTitleSource::new(client, config);
        assert!(matches!(result, Err(StowageError::Configuration { .. })));
    }

    #[test]
    fn test_resolve_reference() {
        let base = Url::parse("https://cdn.example.com/t/1/playlist.m3u8?sig=a").unwrap();
        assert_eq!(
            resolve_reference(&base, "vp9_720p/video.m3u8").unwrap().as_str(),
            "https://cdn.example.com/t/1/vp9_720p/video.m3u8"
        );
        assert_eq!(
            resolve_reference(&base, "https://other.example.com/x.m3u8")
                .unwrap()
                .as_str(),
            "https://other.example.com/x.m3u8"
        );
    }
}
