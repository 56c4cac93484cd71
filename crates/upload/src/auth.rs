//! Access token seam.
//!
//! Credential acquisition happens outside this crate; requests only need a
//! bearer token to attach.

use crate::error::UploadResult;
use async_trait::async_trait;

/// Supplies the bearer token attached to every remote request.
#[async_trait]
pub trait TokenProvider: Send + Sync + 'static {
    /// The current token, or `None` to send requests unauthenticated.
    async fn access_token(&self) -> UploadResult<Option<String>>;
}

/// A fixed token, typically from configuration.
#[derive(Clone, Default)]
pub struct StaticToken {
    token: Option<String>,
}

impl StaticToken {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: token.filter(|t| !t.is_empty()),
        }
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticToken")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn access_token(&self) -> UploadResult<Option<String>> {
        Ok(self.token.clone())
    }
}

/// Attach the provider's token to `builder`, if it has one.
pub(crate) async fn authorize(
    builder: reqwest::RequestBuilder,
    provider: &dyn TokenProvider,
) -> UploadResult<reqwest::RequestBuilder> {
    Ok(match provider.access_token().await? {
        Some(token) => builder.bearer_auth(token),
        None => builder,
    })
}
