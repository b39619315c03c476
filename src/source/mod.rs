//! Source text acquisition for ingestion.
//!
//! A locator is an `s3://bucket/key` object, an `http(s)://` URL or a local path (optionally
//! `file://`). Whatever goes wrong, callers see a single [`QaError::SourceUnavailable`].


use anyhow::Context;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error, info};
use url::Url;

use crate::config::Config;
use crate::http::{RetryPolicy, build_agent, call_with_retry};
use crate::{QaError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocator {
    /// Object in an S3 bucket, fetched from its virtual-hosted HTTPS endpoint
    S3 { bucket: String, key: String },
    Url(Url),
    File(PathBuf),
}

impl SourceLocator {
    #[inline]
    pub fn parse(locator: &str) -> Result<Self> {
        let locator = locator.trim();
        if locator.is_empty() {
            return Err(QaError::InvalidConfiguration(
                "source locator is not set".to_string(),
            ));
        }

        if let Some(rest) = locator.strip_prefix("s3://") {
            return match rest.split_once('/') {
                Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => Ok(Self::S3 {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                }),
                _ => Err(unavailable(locator, "expected s3://<bucket>/<key>")),
            };
        }

        if locator.starts_with("http://") || locator.starts_with("https://") {
            let url = Url::parse(locator).map_err(|e| unavailable(locator, e))?;
            return Ok(Self::Url(url));
        }

        if locator.starts_with("file://") {
            let path = Url::parse(locator)
                .ok()
                .and_then(|url| url.to_file_path().ok())
                .ok_or_else(|| unavailable(locator, "invalid file URL"))?;
            return Ok(Self::File(path));
        }

        Ok(Self::File(PathBuf::from(locator)))
    }
}

impl fmt::Display for SourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::S3 { bucket, key } => write!(f, "s3://{}/{}", bucket, key),
            Self::Url(url) => write!(f, "{}", url),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

fn s3_object_url(
    bucket: &str,
    key: &str,
    region: &str,
) -> std::result::Result<Url, url::ParseError> {
    let mut url = Url::parse(&format!("https://{}.s3.{}.amazonaws.com/", bucket, region))?;
    url.set_path(key);
    Ok(url)
}

fn unavailable(locator: impl fmt::Display, message: impl fmt::Display) -> QaError {
    QaError::SourceUnavailable {
        locator: locator.to_string(),
        message: message.to_string(),
    }
}

/// Downloads or reads source documents
#[derive(Clone)]
pub struct SourceFetcher {
    agent: ureq::Agent,
    retry: RetryPolicy,
    s3_region: String,
}

impl fmt::Debug for SourceFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceFetcher")
            .field("retry", &self.retry)
            .field("s3_region", &self.s3_region)
            .finish_non_exhaustive()
    }
}

impl SourceFetcher {
    #[inline]
    pub fn new(config: &Config) -> Self {
        Self {
            agent: build_agent(Duration::from_secs(config.openai.timeout_secs)),
            retry: RetryPolicy::new(config.openai.retry_attempts),
            s3_region: config.source.s3_region.clone(),
        }
    }

    #[inline]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Fetch the full text behind `locator`
    #[inline]
    pub async fn fetch(&self, locator: &str) -> Result<String> {
        let parsed = SourceLocator::parse(locator)?;
        info!("Fetching source text from {}", parsed);

        let result = match &parsed {
            SourceLocator::File(path) => tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display())),
            SourceLocator::S3 { bucket, key } => {
                let url = s3_object_url(bucket, key, &self.s3_region)
                    .map_err(|e| unavailable(&parsed, e))?;
                self.download(url).await
            }
            SourceLocator::Url(url) => self.download(url.clone()).await,
        };

        match result {
            Ok(text) => {
                debug!("Fetched {} bytes from {}", text.len(), parsed);
                Ok(text)
            }
            Err(e) => {
                error!("Source {} unavailable: {:#}", parsed, e);
                Err(unavailable(&parsed, format!("{:#}", e)))
            }
        }
    }

    async fn download(&self, url: Url) -> anyhow::Result<String> {
        let agent = self.agent.clone();
        let retry = self.retry;

        tokio::task::spawn_blocking(move || {
            call_with_retry(&retry, url.as_str(), || {
                agent
                    .get(url.as_str())
                    .call()
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .with_context(|| format!("Failed to download {}", url))
        })
        .await
        .context("Download task failed")?
    }
}
