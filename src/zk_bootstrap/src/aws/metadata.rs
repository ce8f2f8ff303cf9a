//! Instance metadata service (IMDSv2)

use crate::ensemble::{ExternalError, InstanceRef};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_METADATA_ENDPOINT: &str = "http://169.254.169.254";

const TOKEN_TTL_SECONDS: &str = "60";

/// Reads facts about the instance this process runs on
#[derive(Debug, Clone)]
pub struct InstanceMetadata {
    endpoint: String,
    client: Client,
}

impl InstanceMetadata {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, ExternalError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ExternalError::api("build metadata client", err))?;
        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn token(&self) -> Result<String, ExternalError> {
        let url = format!("{}/latest/api/token", self.endpoint);
        let resp = self
            .client
            .put(&url)
            .header("X-aws-ec2-metadata-token-ttl-seconds", TOKEN_TTL_SECONDS)
            .send()
            .await
            .map_err(|err| ExternalError::api("metadata token", err))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ExternalError::api(
                "metadata token",
                format!("{url} returned {status}"),
            ));
        }
        resp.text()
            .await
            .map_err(|err| ExternalError::api("metadata token", err))
    }

    /// GET a metadata path such as `instance-id`
    pub async fn get(&self, path: &str) -> Result<String, ExternalError> {
        let token = self.token().await?;
        let url = format!("{}/latest/meta-data/{}", self.endpoint, path);
        debug!("GET {}", url);

        let resp = self
            .client
            .get(&url)
            .header("X-aws-ec2-metadata-token", token)
            .send()
            .await
            .map_err(|err| ExternalError::api(format!("metadata {path}"), err))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|err| ExternalError::api(format!("metadata {path}"), err))?;
        if !status.is_success() {
            return Err(ExternalError::api(
                format!("metadata {path}"),
                format!("{url} returned {status}: {body}"),
            ));
        }
        Ok(body.trim().to_string())
    }

    pub async fn instance_id(&self) -> Result<InstanceRef, ExternalError> {
        let id = self.get("instance-id").await?;
        if id.is_empty() {
            return Err(ExternalError::malformed("metadata instance-id", "empty response"));
        }
        Ok(InstanceRef::new(id))
    }
}
