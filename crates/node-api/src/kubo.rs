//! HTTP client for the Kubo RPC API (`/api/v0/...`).
//!
//! Every Kubo RPC endpoint is a `POST`. Errors come back as HTTP 500 with a
//! JSON body `{"Message": ..., "Code": ..., "Type": "error"}`.

use crate::error::NodeApiError;
use crate::types::{NodeIdentity, NodeStatus};
use crate::{ContentApi, ControlApi, StatusApi};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::time::Duration;
use testbed_core::{NodeHandle, PeerId};

/// Kubo RPC client shared by every node of the run.
#[derive(Debug, Clone)]
pub struct KuboClient {
    http: Client,
    control_timeout: Duration,
    content_timeout: Duration,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct IdResponse {
    #[serde(rename = "ID")]
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SwarmPeersResponse {
    #[serde(default)]
    peers: Option<Vec<SwarmPeer>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SwarmPeer {
    peer: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AddResponse {
    hash: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RepoStatResponse {
    repo_size: u64,
    num_objects: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BandwidthResponse {
    rate_in: f64,
    rate_out: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ErrorResponse {
    message: String,
}

impl KuboClient {
    pub fn new(control_timeout: Duration, content_timeout: Duration) -> Result<Self, NodeApiError> {
        let http = Client::builder()
            .connect_timeout(control_timeout)
            .build()
            .map_err(|e| NodeApiError::unreachable("http client", e))?;
        Ok(Self {
            http,
            control_timeout,
            content_timeout,
        })
    }

    fn url(node: &NodeHandle, path: &str) -> String {
        format!(
            "{}/api/v0/{}",
            node.control_endpoint.trim_end_matches('/'),
            path
        )
    }

    async fn post(
        &self,
        node: &NodeHandle,
        path: &str,
        query: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<Response, NodeApiError> {
        let url = Self::url(node, path);
        tracing::trace!("POST {url} {query:?}");
        let response = self
            .http
            .post(&url)
            .query(query)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| NodeApiError::from_reqwest(&url, e))?;
        check_status(&url, response).await
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        node: &NodeHandle,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, NodeApiError> {
        let url = Self::url(node, path);
        let response = self.post(node, path, query, self.control_timeout).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| NodeApiError::from_reqwest(&url, e))
    }
}

/// Turn a non-success response into [`NodeApiError::Status`], keeping the
/// Kubo error message when the body carries one.
async fn check_status(url: &str, response: Response) -> Result<Response, NodeApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let body = serde_json::from_str::<ErrorResponse>(&text)
        .map(|e| e.message)
        .unwrap_or(text);
    Err(NodeApiError::Status {
        endpoint: url.to_string(),
        status: status.as_u16(),
        body,
    })
}

/// Resolve the host of a control endpoint to the IPv4 address peers dial.
async fn resolve_host(endpoint: &str) -> Result<IpAddr, NodeApiError> {
    let url = Url::parse(endpoint).map_err(|e| NodeApiError::payload(endpoint, e))?;
    let host = url
        .host_str()
        .ok_or_else(|| NodeApiError::payload(endpoint, "endpoint has no host"))?;
    let port = url.port_or_known_default().unwrap_or(80);
    let mut addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| NodeApiError::unreachable(endpoint, e))?;
    addrs
        .find(|a| a.is_ipv4())
        .map(|a| a.ip())
        .ok_or_else(|| NodeApiError::unreachable(endpoint, format!("no IPv4 address for {host}")))
}

/// Dialable address of a node given its peer id.
pub fn swarm_address(ip: IpAddr, swarm_port: u16, peer_id: &PeerId) -> String {
    format!("/ip4/{ip}/tcp/{swarm_port}/p2p/{peer_id}")
}

#[async_trait]
impl ControlApi for KuboClient {
    async fn identity(&self, node: &NodeHandle) -> Result<NodeIdentity, NodeApiError> {
        let id: IdResponse = self.post_json(node, "id", &[]).await?;
        let peer_id = PeerId::new(id.id);
        let ip = resolve_host(&node.control_endpoint).await?;
        Ok(NodeIdentity {
            address: swarm_address(ip, node.swarm_port, &peer_id),
            peer_id,
        })
    }

    async fn list_peers(&self, node: &NodeHandle) -> Result<Vec<PeerId>, NodeApiError> {
        let peers: SwarmPeersResponse = self.post_json(node, "swarm/peers", &[]).await?;
        // A peer can show up once per open connection.
        let unique: BTreeSet<String> = peers
            .peers
            .unwrap_or_default()
            .into_iter()
            .map(|p| p.peer)
            .collect();
        Ok(unique.into_iter().map(PeerId::new).collect())
    }

    async fn connect(&self, node: &NodeHandle, address: &str) -> Result<(), NodeApiError> {
        self.post(node, "swarm/connect", &[("arg", address)], self.control_timeout)
            .await?;
        Ok(())
    }

    async fn disconnect(&self, node: &NodeHandle, peer: &PeerId) -> Result<(), NodeApiError> {
        let arg = format!("/p2p/{peer}");
        self.post(node, "swarm/disconnect", &[("arg", arg.as_str())], self.control_timeout)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ContentApi for KuboClient {
    async fn add(&self, node: &NodeHandle, data: Vec<u8>) -> Result<String, NodeApiError> {
        let url = Self::url(node, "add");
        let form = Form::new().part("file", Part::bytes(data).file_name("payload"));
        let response = self
            .http
            .post(&url)
            .multipart(form)
            .timeout(self.content_timeout)
            .send()
            .await
            .map_err(|e| NodeApiError::from_reqwest(&url, e))?;
        let added: AddResponse = check_status(&url, response)
            .await?
            .json()
            .await
            .map_err(|e| NodeApiError::from_reqwest(&url, e))?;
        Ok(added.hash)
    }

    async fn cat(&self, node: &NodeHandle, cid: &str) -> Result<u64, NodeApiError> {
        let url = Self::url(node, "cat");
        let mut response = self
            .post(node, "cat", &[("arg", cid)], self.content_timeout)
            .await?;
        let mut received = 0u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| NodeApiError::from_reqwest(&url, e))?
        {
            received += chunk.len() as u64;
        }
        Ok(received)
    }
}

#[async_trait]
impl StatusApi for KuboClient {
    async fn status(&self, node: &NodeHandle) -> Result<NodeStatus, NodeApiError> {
        let (repo, bw, peers) = tokio::try_join!(
            self.post_json::<RepoStatResponse>(node, "stats/repo", &[]),
            self.post_json::<BandwidthResponse>(node, "stats/bw", &[]),
            self.list_peers(node),
        )?;
        Ok(NodeStatus {
            peer_count: peers.len() as u64,
            repo_size_bytes: repo.repo_size,
            repo_num_objects: repo.num_objects,
            bandwidth_in_bytes_per_sec: bw.rate_in,
            bandwidth_out_bytes_per_sec: bw.rate_out,
        })
    }
}
