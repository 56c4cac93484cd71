//! Registry of in-flight uploads.

use crate::error::{UploadError, UploadResult};
use crate::pipeline::{UploadOutcome, UploadPipeline};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct InFlight {
    cancel: CancellationToken,
    handle: JoinHandle<UploadResult<UploadOutcome>>,
}

/// Tracks running uploads by object name.
///
/// Owned by the caller and shared by reference; at most one upload per
/// object name runs at a time.
#[derive(Clone, Default)]
pub struct UploadRegistry {
    uploads: Arc<Mutex<HashMap<String, InFlight>>>,
}

impl UploadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `task` as the upload for `object_name`.
    ///
    /// The task receives a token that [`cancel`](Self::cancel) trips. Refused
    /// while another upload of the same name is still running.
    pub async fn start<F, Fut>(&self, object_name: &str, task: F) -> UploadResult<()>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = UploadResult<UploadOutcome>> + Send + 'static,
    {
        let mut uploads = self.uploads.lock().await;
        if let Some(existing) = uploads.get(object_name) {
            if !existing.handle.is_finished() {
                return Err(UploadError::AlreadyInProgress(object_name.to_string()));
            }
            tracing::debug!(object = %object_name, "Replacing finished upload entry");
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(task(cancel.clone()));
        uploads.insert(object_name.to_string(), InFlight { cancel, handle });
        tracing::info!(object = %object_name, "Upload started");
        Ok(())
    }

    /// Spawn a pipeline upload of `reader` as `object_name`.
    pub async fn spawn_upload<R>(
        &self,
        pipeline: Arc<UploadPipeline>,
        object_name: &str,
        reader: R,
    ) -> UploadResult<()>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let name = object_name.to_string();
        self.start(object_name, move |cancel| async move {
            pipeline.upload(&name, reader, cancel).await
        })
        .await
    }

    /// Request cancellation of the upload for `object_name`.
    ///
    /// Returns false if no such upload is tracked.
    pub async fn cancel(&self, object_name: &str) -> bool {
        match self.uploads.lock().await.get(object_name) {
            Some(entry) => {
                entry.cancel.cancel();
                tracing::info!(object = %object_name, "Upload cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Whether an upload for `object_name` is still running.
    pub async fn is_active(&self, object_name: &str) -> bool {
        self.uploads
            .lock()
            .await
            .get(object_name)
            .is_some_and(|entry| !entry.handle.is_finished())
    }

    /// Names of uploads that are still running.
    pub async fn active(&self) -> Vec<String> {
        let uploads = self.uploads.lock().await;
        let mut names: Vec<String> = uploads
            .iter()
            .filter(|(_, entry)| !entry.handle.is_finished())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Stop tracking `object_name` and wait for its result.
    pub async fn wait(&self, object_name: &str) -> Option<UploadResult<UploadOutcome>> {
        let entry = self.uploads.lock().await.remove(object_name)?;
        Some(join(object_name, entry.handle).await)
    }

    /// Remove every finished upload and return its result.
    pub async fn reap_finished(&self) -> Vec<(String, UploadResult<UploadOutcome>)> {
        let finished: Vec<(String, InFlight)> = {
            let mut uploads = self.uploads.lock().await;
            let names: Vec<String> = uploads
                .iter()
                .filter(|(_, entry)| entry.handle.is_finished())
                .map(|(name, _)| name.clone())
                .collect();
            names
                .into_iter()
                .filter_map(|name| uploads.remove(&name).map(|entry| (name, entry)))
                .collect()
        };

        let mut results = Vec::with_capacity(finished.len());
        for (name, entry) in finished {
            let result = join(&name, entry.handle).await;
            results.push((name, result));
        }
        results
    }

    /// Cancel every tracked upload.
    pub async fn cancel_all(&self) {
        for entry in self.uploads.lock().await.values() {
            entry.cancel.cancel();
        }
    }
}

async fn join(
    object_name: &str,
    handle: JoinHandle<UploadResult<UploadOutcome>>,
) -> UploadResult<UploadOutcome> {
    match handle.await {
        Ok(result) => result,
        Err(join_err) if join_err.is_panic() => {
            tracing::error!(object = %object_name, panic = ?join_err, "Upload task panicked");
            Err(UploadError::Task(format!("upload task panicked: {join_err}")))
        }
        Err(join_err) => Err(UploadError::Task(join_err.to_string())),
    }
}
