//! # GitHub Releases
//!
//! Each release of a repository that carries an asset with a given file name
//! is one version. The version identifier is the release name, falling back to
//! the tag when the release is unnamed.
//!
//! Downloading needs the asset id, which only the release listing provides.
//! Each listing replaces the remembered ids. Fetching an unknown version, or
//! one whose remembered asset has since disappeared, re-lists once before
//! giving up.

use dashmap::DashMap;
use serde::Deserialize;
use url::Url;

use crate::source::BytecodeSource;
use crate::source::Error;
use crate::source::Result;

pub const DEFAULT_API_BASE: &str = "https://api.github.com";

#[derive(Debug, Deserialize)]
struct Release {
    name: Option<String>,
    tag_name: String,
    #[serde(default)]
    assets: Vec<Asset>,
}

#[derive(Debug, Deserialize)]
struct Asset {
    id: u64,
    name: String,
}

pub struct GithubReleaseSource {
    owner: String,
    repo: String,
    asset: String,
    api_base: Url,
    token: Option<String>,
    client: reqwest::Client,
    asset_ids: DashMap<String, u64>,
}

impl GithubReleaseSource {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, asset: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!("poolrun/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        let api_base = Url::parse(DEFAULT_API_BASE).map_err(|e| Error::InvalidUrl(e.to_string()))?;

        Ok(Self {
            owner: owner.into(),
            repo: repo.into(),
            asset: asset.into(),
            api_base,
            token: None,
            client,
            asset_ids: DashMap::new(),
        })
    }

    /// Points the source at a different API host, e.g. GitHub Enterprise.
    pub fn with_api_base(mut self, api_base: &str) -> Result<Self> {
        // Url::join replaces the last segment unless the base ends in a slash.
        let base = format!("{}/", api_base.trim_end_matches('/'));
        self.api_base = Url::parse(&base).map_err(|e| Error::InvalidUrl(format!("{}: {}", api_base, e)))?;
        Ok(self)
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Replaces the HTTP client. GitHub rejects requests without a user agent.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        let path = format!("repos/{}/{}/{}", self.owner, self.repo, path);
        self.api_base
            .join(&path)
            .map_err(|e| Error::InvalidUrl(format!("{}: {}", path, e)))
    }

    fn request(&self, url: Url) -> reqwest::RequestBuilder {
        let request = self.client.get(url);
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn refresh(&self) -> Result<Vec<String>> {
        let url = self.endpoint("releases")?;
        let response = self
            .request(url.clone())
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Error::Status {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        let releases: Vec<Release> = response.json().await?;
        let found = versions_with_asset(&releases, &self.asset);
        self.asset_ids
            .retain(|version, _| found.iter().any(|(v, _)| v == version));
        for (version, id) in &found {
            self.asset_ids.insert(version.clone(), *id);
        }
        Ok(found.into_iter().map(|(version, _)| version).collect())
    }

    fn cached_id(&self, version: &str) -> Option<u64> {
        self.asset_ids.get(version).map(|id| *id)
    }

    async fn download(&self, id: u64) -> Result<Vec<u8>> {
        let url = self.endpoint(&format!("releases/assets/{}", id))?;
        let response = self
            .request(url.clone())
            .header(reqwest::header::ACCEPT, "application/octet-stream")
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Error::Status {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}

/// Versions, in listing order, of the releases carrying `asset`, with the
/// matching asset id.
fn versions_with_asset(releases: &[Release], asset: &str) -> Vec<(String, u64)> {
    releases
        .iter()
        .filter_map(|release| {
            let found = release.assets.iter().find(|a| a.name == asset)?;
            let version = release
                .name
                .clone()
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| release.tag_name.clone());
            Some((version, found.id))
        })
        .collect()
}

#[async_trait::async_trait]
impl BytecodeSource for GithubReleaseSource {
    async fn list_versions(&self) -> Result<Vec<String>> {
        self.refresh().await
    }

    async fn fetch_bytecode(&self, version: &str) -> Result<Vec<u8>> {
        if let Some(id) = self.cached_id(version) {
            match self.download(id).await {
                // Asset replaced or release deleted since the last listing.
                Err(Error::Status { status: 404, .. }) => {}
                other => return other,
            }
        }

        self.refresh().await?;
        let id = self
            .cached_id(version)
            .ok_or_else(|| Error::NotFound(version.to_string()))?;
        self.download(id).await
    }
}
