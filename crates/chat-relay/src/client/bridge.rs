use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{ChatClient, ChatConnector, ClientError, RawSnapshot};
use crate::config::ChatConfig;

#[derive(Debug, Deserialize)]
struct SessionsResponse {
    #[serde(default)]
    sessions: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ListenRequest<'a> {
    who: &'a str,
}

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    who: &'a str,
    text: &'a str,
}

fn map_reqwest_error(e: reqwest::Error) -> ClientError {
    if e.is_connect() {
        ClientError::Disconnected(e.to_string())
    } else if e.is_decode() {
        ClientError::Malformed(e.to_string())
    } else {
        ClientError::Transport(e.to_string())
    }
}

async fn ensure_success(response: Response) -> Result<Response, ClientError> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(ClientError::Rejected(format!("{} - {}", status, body)))
}

/// HTTP client for the local chat bridge sidecar
#[derive(Clone)]
pub struct BridgeClient {
    http: Client,
    base_url: String,
}

impl BridgeClient {
    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl ChatClient for BridgeClient {
    async fn list_sessions(&self) -> Result<bool, ClientError> {
        let response = self
            .http
            .get(self.url("sessions"))
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let sessions: SessionsResponse = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(map_reqwest_error)?;

        debug!("Bridge reports {} sessions", sessions.sessions.len());
        Ok(!sessions.sessions.is_empty())
    }

    async fn add_listener(&self, conversation_id: &str) -> Result<(), ClientError> {
        let response = self
            .http
            .post(self.url("listeners"))
            .json(&ListenRequest { who: conversation_id })
            .send()
            .await
            .map_err(map_reqwest_error)?;

        ensure_success(response).await?;
        Ok(())
    }

    async fn poll_new_messages(&self) -> Result<RawSnapshot, ClientError> {
        let response = self
            .http
            .get(self.url("messages"))
            .send()
            .await
            .map_err(map_reqwest_error)?;

        ensure_success(response)
            .await?
            .json()
            .await
            .map_err(map_reqwest_error)
    }

    async fn send_message(&self, text: &str, conversation_id: &str) -> Result<(), ClientError> {
        let response = self
            .http
            .post(self.url("send"))
            .json(&SendRequest {
                who: conversation_id,
                text,
            })
            .send()
            .await
            .map_err(map_reqwest_error)?;

        ensure_success(response).await?;
        Ok(())
    }
}

/// Opens a [`BridgeClient`]; every connect builds a fresh HTTP client.
pub struct BridgeConnector {
    config: ChatConfig,
}

impl BridgeConnector {
    pub fn new(config: ChatConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ChatConnector for BridgeConnector {
    async fn connect(&self) -> Result<Arc<dyn ChatClient>, ClientError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(self.config.request_timeout_seconds))
            .build()
            .map_err(|e| ClientError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Arc::new(BridgeClient {
            http,
            base_url: self.config.bridge_url.clone(),
        }))
    }
}
