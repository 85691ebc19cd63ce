//! A single version served from one HTTP(S) URL.

use url::Url;

use crate::source::BytecodeSource;
use crate::source::Error;
use crate::source::Result;

/// Exposes exactly one version, named after the last path segment of the URL.
#[derive(Clone, Debug)]
pub struct UrlSource {
    url: Url,
    version: String,
    client: reqwest::Client,
}

impl UrlSource {
    pub fn new(url: &str) -> Result<Self> {
        let url = Url::parse(url).map_err(|e| Error::InvalidUrl(format!("{}: {}", url, e)))?;
        let version = version_of(&url)
            .ok_or_else(|| Error::InvalidUrl(format!("{}: no file name in path", url)))?;
        Ok(Self {
            url,
            version,
            client: reqwest::Client::new(),
        })
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

fn version_of(url: &Url) -> Option<String> {
    url.path_segments()?
        .next_back()
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
}

#[async_trait::async_trait]
impl BytecodeSource for UrlSource {
    async fn list_versions(&self) -> Result<Vec<String>> {
        Ok(vec![self.version.clone()])
    }

    async fn fetch_bytecode(&self, version: &str) -> Result<Vec<u8>> {
        if version != self.version {
            return Err(Error::NotFound(version.to_string()));
        }

        let response = self.client.get(self.url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(Error::Status {
                status: response.status().as_u16(),
                url: self.url.to_string(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}
