//! Upload session negotiation and container management.

use crate::auth::{TokenProvider, authorize};
use crate::error::{UploadError, UploadResult};
use piecestash_core::UploadSession;
use piecestash_core::config::UploadConfig;
use reqwest::header::{CONTENT_TYPE, LOCATION};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Content type of a remote container.
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// Metadata sent when opening a session.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub mime_type: String,
    pub name: String,
    pub parents: Vec<String>,
}

#[derive(Deserialize)]
struct GeneratedIds {
    ids: Vec<String>,
}

#[derive(Deserialize)]
struct CreatedFile {
    id: String,
}

/// Opens resumable upload sessions against the remote endpoint.
#[derive(Clone)]
pub struct SessionNegotiator {
    http: reqwest::Client,
    endpoint: String,
    token: Arc<dyn TokenProvider>,
    timeout: Duration,
    generate_ids: bool,
}

impl SessionNegotiator {
    pub fn new(http: reqwest::Client, config: &UploadConfig, token: Arc<dyn TokenProvider>) -> Self {
        Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            token,
            timeout: config.request_timeout(),
            generate_ids: config.generate_ids,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.endpoint)
    }

    /// Send `builder` with auth attached, bounded by the request timeout.
    async fn send(&self, builder: reqwest::RequestBuilder) -> UploadResult<reqwest::Response> {
        let builder = authorize(builder, self.token.as_ref()).await?;
        tokio::time::timeout(self.timeout, builder.send())
            .await
            .map_err(|_| UploadError::Timeout(self.timeout))?
            .map_err(UploadError::from)
    }

    /// Open a session for `object_name` inside `parent_container`.
    ///
    /// Fails with [`UploadError::Negotiation`] if the remote rejects the
    /// request or does not return a session locator.
    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    pub async fn open(
        &self,
        object_name: &str,
        mime_type: &str,
        parent_container: &str,
    ) -> UploadResult<UploadSession> {
        let id = if self.generate_ids {
            Some(self.generate_id().await?)
        } else {
            None
        };
        let metadata = ObjectMetadata {
            id,
            mime_type: mime_type.to_string(),
            name: object_name.to_string(),
            parents: vec![parent_container.to_string()],
        };

        let builder = self
            .http
            .post(self.url("/upload/drive/v3/files"))
            .query(&[("uploadType", "resumable"), ("supportsAllDrives", "true")])
            .header(CONTENT_TYPE, "application/json; charset=UTF-8")
            .header("X-Upload-Content-Type", mime_type)
            .body(serde_json::to_vec(&metadata)?);

        let response = self.send(builder).await.map_err(|e| match e {
            UploadError::Http(e) => UploadError::Negotiation(format!("request failed: {e}")),
            other => other,
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UploadError::Negotiation(format!(
                "remote returned {status}: {body}"
            )));
        }

        let locator = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                UploadError::Negotiation("missing Location header in session response".to_string())
            })?
            .to_string();

        tracing::info!(object = %object_name, mime = %mime_type, "Upload session opened");
        Ok(UploadSession::open(locator, object_name, mime_type, None))
    }

    /// Ask the remote for a fresh object id.
    #[instrument(skip(self))]
    pub async fn generate_id(&self) -> UploadResult<String> {
        let builder = self
            .http
            .get(self.url("/drive/v3/files/generateIds"))
            .query(&[("count", "1")]);
        let response = self.send(builder).await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UploadError::Negotiation(format!(
                "id generation returned {status}: {body}"
            )));
        }

        let generated: GeneratedIds = response.json().await?;
        let id = generated
            .ids
            .into_iter()
            .next()
            .ok_or_else(|| UploadError::Negotiation("remote generated no ids".to_string()))?;
        tracing::debug!(id = %id, "Generated object id");
        Ok(id)
    }

    /// Create a container named `name` under `parent` and return its id.
    #[instrument(skip(self))]
    pub async fn create_folder(&self, name: &str, parent: &str) -> UploadResult<String> {
        let metadata = ObjectMetadata {
            id: None,
            mime_type: FOLDER_MIME_TYPE.to_string(),
            name: name.to_string(),
            parents: vec![parent.to_string()],
        };
        let builder = self
            .http
            .post(self.url("/drive/v3/files"))
            .query(&[("supportsAllDrives", "true")])
            .json(&metadata);
        let response = self.send(builder).await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UploadError::UnexpectedStatus {
                status: status.as_u16(),
                range: "folder creation".to_string(),
                body,
            });
        }

        let created: CreatedFile = response.json().await?;
        tracing::info!(folder = %created.id, parent = %parent, "Folder created");
        Ok(created.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_serializes_camel_case_without_empty_id() {
        let metadata = ObjectMetadata {
            id: None,
            mime_type: "text/plain".into(),
            name: "a.txt".into(),
            parents: vec!["root".into()],
        };
        let value = serde_json::to_value(&metadata).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"mimeType": "text/plain", "name": "a.txt", "parents": ["root"]})
        );
    }

    #[test]
    fn test_endpoint_trailing_slash_trimmed() {
        let config = UploadConfig {
            endpoint: "http://127.0.0.1:9/".into(),
            ..UploadConfig::default()
        };
        let negotiator = SessionNegotiator::new(
            reqwest::Client::new(),
            &config,
            Arc::new(crate::auth::StaticToken::default()),
        );
        assert_eq!(
            negotiator.url("/drive/v3/files"),
            "http://127.0.0.1:9/drive/v3/files"
        );
    }
}
