//! Remote node client
//!
//! Lets the mining pool work against another node's HTTP API: fetch mining
//! tasks, poll the head and submit solved blocks. Transport failures are
//! retried with exponential backoff; rejections are returned as
//! [`Error::Rejected`] carrying the node's failure code.

use crate::chain::{Block, MiningTask};
use crate::ledger::ChainStats;
use crate::node::{SubmitBlockRequest, SubmitOutcome};
use crate::utils::ExponentialBackoff;
use crate::worker::WorkSource;
use crate::{Address, Error, Hash256, Result};
use async_trait::async_trait;
use reqwest::{Client, ClientBuilder, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Exponential backoff configuration
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub max_retries: usize,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            max_retries: 10,
        }
    }
}

impl BackoffConfig {
    /// Delay calculator starting from this configuration
    pub fn to_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(
            self.initial_delay.as_millis() as u64,
            self.max_delay.as_millis() as u64,
            self.multiplier,
        )
    }
}

/// HTTP client for a remote node
pub struct RemoteNode {
    client: Client,
    base_url: Url,
    backoff_config: BackoffConfig,
}

impl RemoteNode {
    /// Create a new remote node client
    pub fn new(base_url: impl AsRef<str>, timeout: Duration) -> Result<Self> {
        let mut base_url = Url::parse(base_url.as_ref())
            .map_err(|e| Error::config(format!("Invalid node URL: {}", e)))?;
        // Url::join drops the last path segment unless it ends with a slash
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = ClientBuilder::new()
            .timeout(timeout)
            .build()
            .map_err(Error::from)?;

        Ok(Self {
            client,
            base_url,
            backoff_config: BackoffConfig::default(),
        })
    }

    /// Set custom backoff configuration
    pub fn with_backoff_config(mut self, config: BackoffConfig) -> Self {
        self.backoff_config = config;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::network(format!("Failed to build URL for {}: {}", path, e)))
    }

    /// Fetch a mining task for `miner`
    #[instrument(skip(self))]
    pub async fn get_mining_task(&self, miner: &Address) -> Result<MiningTask> {
        let mut url = self.url("mining-task")?;
        url.query_pairs_mut().append_pair("minerAddress", miner.as_str());
        debug!("Requesting mining task from: {}", url);

        let response = self.send_with_retry(|| self.client.get(url.clone())).await?;
        Self::json(response).await
    }

    /// Submit a solved block
    #[instrument(skip(self, block), fields(index = block.index, hash = %block.hash))]
    pub async fn submit_block(&self, block: Block, miner: &Address) -> Result<SubmitOutcome> {
        let url = self.url("submit-block")?;
        let request = SubmitBlockRequest::from_block(block, Some(miner.clone()));

        let response = self
            .send_with_retry(|| self.client.post(url.clone()).json(&request))
            .await?;
        let outcome: SubmitOutcome = response.json().await?;
        if outcome.is_accepted() {
            info!(height = ?outcome.height, "Remote node accepted block");
        } else {
            warn!(code = ?outcome.code, reason = ?outcome.reason, "Remote node rejected block");
        }
        Ok(outcome)
    }

    /// Chain summary, used for head polling
    #[instrument(skip(self))]
    pub async fn chain_stats(&self) -> Result<ChainStats> {
        let url = self.url("chain-stats")?;
        let response = self.send_with_retry(|| self.client.get(url.clone())).await?;
        Self::json(response).await
    }

    async fn json<T: DeserializeOwned>(response: Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::network(format!("HTTP {}: {}", status, body)));
        }
        Ok(response.json().await?)
    }

    /// Send a request, retrying timeouts, connection errors and 5xx
    /// responses with exponential backoff
    async fn send_with_retry<F>(&self, build: F) -> Result<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut backoff = self.backoff_config.to_backoff();

        loop {
            let failure = match build().send().await {
                Ok(response) if !response.status().is_server_error() => return Ok(response),
                Ok(response) => Error::network(format!("HTTP {}", response.status())),
                Err(e) if e.is_timeout() || e.is_connect() => Error::from(e),
                Err(e) => return Err(Error::from(e)),
            };

            if backoff.attempt() as usize >= self.backoff_config.max_retries {
                return Err(failure);
            }
            let delay = Duration::from_millis(backoff.next_delay());
            warn!(
                "Request failed ({}), retrying in {:?} (attempt {}/{})",
                failure,
                delay,
                backoff.attempt(),
                self.backoff_config.max_retries
            );
            sleep(delay).await;
        }
    }
}

#[async_trait]
impl WorkSource for RemoteNode {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn mining_task(&self, miner: &Address) -> Result<MiningTask> {
        self.get_mining_task(miner).await
    }

    async fn submit(&self, block: Block, miner: &Address) -> Result<u64> {
        self.submit_block(block, miner).await?.into_result()
    }

    async fn head(&self) -> Result<Hash256> {
        Ok(self.chain_stats().await?.head_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_client_creation() {
        let client = RemoteNode::new("http://localhost:3000", Duration::from_secs(30));
        assert!(client.is_ok());
        assert!(RemoteNode::new("not a url", Duration::from_secs(30)).is_err());
    }

    #[test]
    fn test_url_joining_keeps_base_path() {
        let client = RemoteNode::new("http://localhost:3000/api", Duration::from_secs(5)).unwrap();
        assert_eq!(
            client.url("mining-task").unwrap().as_str(),
            "http://localhost:3000/api/mining-task"
        );
    }

    #[test]
    fn test_backoff_config() {
        let config = BackoffConfig {
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(10),
            multiplier: 1.5,
            max_retries: 5,
        };

        let client = RemoteNode::new("http://localhost:3000", Duration::from_secs(30))
            .unwrap()
            .with_backoff_config(config);

        assert_eq!(client.backoff_config.max_retries, 5);
        assert_eq!(client.backoff_config.multiplier, 1.5);

        let mut backoff = client.backoff_config.to_backoff();
        assert_eq!(backoff.next_delay(), 50);
        assert_eq!(backoff.next_delay(), 75);
    }

    #[tokio::test]
    async fn test_unreachable_node_fails_after_retries() {
        let client = RemoteNode::new("http://127.0.0.1:1", Duration::from_millis(200))
            .unwrap()
            .with_backoff_config(BackoffConfig {
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                multiplier: 2.0,
                max_retries: 1,
            });
        let miner = Address::new("c".repeat(64)).unwrap();
        let err = client.get_mining_task(&miner).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
