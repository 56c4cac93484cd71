use bytes::Bytes;
use httpmock::MockServer;
use piecestash_core::WINDOW_ALIGNMENT;
use piecestash_core::config::UploadConfig;
use piecestash_upload::{StaticToken, UploadPipeline};
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

pub const TOKEN: &str = "test-token";
pub const SESSION_PATH: &str = "/upload/session/abc";

pub fn can_bind_localhost() -> bool {
    TcpListener::bind("127.0.0.1:0").is_ok()
}

/// Config pointed at `server` with the smallest legal window.
pub fn config(server: &MockServer) -> UploadConfig {
    UploadConfig {
        endpoint: server.base_url(),
        window_size: WINDOW_ALIGNMENT,
        generate_ids: false,
        access_token: Some(TOKEN.to_string()),
        request_timeout_secs: 10,
        max_retries: 2,
        ..UploadConfig::default()
    }
}

pub fn pipeline(config: UploadConfig) -> UploadPipeline {
    let token = Arc::new(StaticToken::new(config.access_token.clone()));
    UploadPipeline::new(config, token)
        .expect("valid config")
        .with_retry_backoff(Duration::from_millis(1))
}

/// Answer session requests with a locator on `server`.
pub async fn mock_session(server: &MockServer) -> httpmock::Mock<'_> {
    let locator = server.url(SESSION_PATH);
    server
        .mock_async(|when, then| {
            when.method(httpmock::Method::POST)
                .path("/upload/drive/v3/files")
                .query_param("uploadType", "resumable")
                .header("authorization", format!("Bearer {TOKEN}"));
            then.status(200).header("Location", locator);
        })
        .await
}

/// Generate deterministic test data using a seeded pseudo-random generator
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;

    for chunk in data.chunks_mut(8) {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    Bytes::from(data)
}
