pub mod importer;
pub mod influx;
pub mod mapping;

pub use importer::Importer;
pub use influx::ImportSourceConfig;

use crate::storage::{Store, StorageError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Error, Debug)]
pub enum ImportError {
    /// A conflicting import is already active.
    #[error("an import is already in progress")]
    Busy,

    #[error("import cancelled")]
    Cancelled,

    /// Source-side transport or decode problem.
    #[error("import source error: {0}")]
    Source(#[from] anyhow::Error),

    /// Storage errors abort the import.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// User-visible state of the background import job.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportStatus {
    pub active: bool,
    pub current_chunk: u32,
    pub total_chunks: u32,
    pub percentage: f64,
    pub message: String,
    pub error: String,
}

/// Owns the single-import-at-a-time guarantee and the status object the
/// HTTP layer polls. The supervisor is the sole consumer of the
/// importer's progress channel.
pub struct ImportSupervisor {
    store: Arc<Store>,
    active: Arc<AtomicBool>,
    status: Arc<tokio::sync::RwLock<ImportStatus>>,
}

impl ImportSupervisor {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            active: Arc::new(AtomicBool::new(false)),
            status: Arc::new(tokio::sync::RwLock::new(ImportStatus::default())),
        }
    }

    pub async fn status(&self) -> ImportStatus {
        self.status.read().await.clone()
    }

    /// Launch a background import. Fails with [`ImportError::Busy`] when
    /// one is already running. The returned token cancels the job at the
    /// next chunk boundary.
    pub async fn start(
        &self,
        config: ImportSourceConfig,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<CancellationToken, ImportError> {
        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ImportError::Busy);
        }

        let total_chunks = ((end - start).num_hours() / 24) as u32 + 1;
        {
            let mut status = self.status.write().await;
            *status = ImportStatus {
                active: true,
                current_chunk: 0,
                total_chunks,
                percentage: 0.0,
                message: "Starting import...".to_string(),
                error: String::new(),
            };
        }

        let cancel = CancellationToken::new();
        let importer = Importer::new(config, Arc::clone(&self.store));
        let (progress_tx, mut progress_rx) = mpsc::channel::<String>(1);

        let drain_status = Arc::clone(&self.status);
        let drain = tokio::spawn(async move {
            while let Some(message) = progress_rx.recv().await {
                let mut status = drain_status.write().await;
                status.current_chunk += 1;
                status.message = message;
                status.percentage =
                    (status.current_chunk as f64 / status.total_chunks.max(1) as f64) * 100.0;
            }
        });

        let active = Arc::clone(&self.active);
        let status = Arc::clone(&self.status);
        let token = cancel.clone();
        tokio::spawn(async move {
            let outcome = importer.run_import(&token, start, end, progress_tx).await;
            // The sender is dropped by run_import's return; wait for the
            // drain task so the last message lands before the final state.
            let _ = drain.await;

            let mut status = status.write().await;
            status.active = false;
            match outcome {
                Ok(()) => {
                    status.message = "Import completed successfully".to_string();
                    status.percentage = 100.0;
                    info!("background import completed");
                }
                Err(err) => {
                    status.error = err.to_string();
                    error!(%err, "background import failed");
                }
            }
            active.store(false, Ordering::SeqCst);
        });

        Ok(cancel)
    }
}
