//! HTTP client for the cAdvisor v2 REST API.

use crate::error::NodeApiError;
use crate::types::{ContainerSpecs, ContainerStatsResponse};
use crate::ResourceApi;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;
use testbed_core::ContainerId;

/// Number of stats requested per container. Two are enough to derive rates.
pub const STATS_COUNT: u32 = 2;

#[derive(Debug, Clone)]
pub struct CadvisorClient {
    http: Client,
}

impl CadvisorClient {
    pub fn new(timeout: Duration) -> Result<Self, NodeApiError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NodeApiError::unreachable("http client", e))?;
        Ok(Self { http })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, NodeApiError> {
        tracing::trace!("GET {url}");
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| NodeApiError::from_reqwest(url, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(NodeApiError::Status {
                endpoint: url.to_string(),
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        response
            .json()
            .await
            .map_err(|e| NodeApiError::from_reqwest(url, e))
    }
}

/// Stats URL of a container. Identifiers are absolute cgroup-style names
/// (`/docker/<id>`) and are appended to the path as-is.
pub fn stats_url(endpoint: &str, container: &ContainerId) -> String {
    format!(
        "{}/api/v2.0/stats/{}?count={STATS_COUNT}",
        endpoint.trim_end_matches('/'),
        container.as_str().trim_start_matches('/')
    )
}

pub fn spec_url(endpoint: &str) -> String {
    format!(
        "{}/api/v2.0/spec?type=docker&recursive=true",
        endpoint.trim_end_matches('/')
    )
}

#[async_trait]
impl ResourceApi for CadvisorClient {
    async fn container_specs(&self, endpoint: &str) -> Result<ContainerSpecs, NodeApiError> {
        self.get_json(&spec_url(endpoint)).await
    }

    async fn container_stats(
        &self,
        endpoint: &str,
        container: &ContainerId,
    ) -> Result<ContainerStatsResponse, NodeApiError> {
        self.get_json(&stats_url(endpoint, container)).await
    }
}
