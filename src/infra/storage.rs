//! Filesystem storage for uploaded payment receipts.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::domain::{AppError, ExternalServiceError, ReceiptStore};

/// Stores receipts under a root directory, one file per payment.
/// The stored path is relative to the root so the root can move.
pub struct FileReceiptStore {
    root: PathBuf,
}

impl FileReceiptStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn storage_error(e: std::io::Error) -> AppError {
        AppError::ExternalService(ExternalServiceError::Storage(e.to_string()))
    }
}

#[async_trait]
impl ReceiptStore for FileReceiptStore {
    #[instrument(skip(self, data), fields(size = data.len()))]
    async fn save(
        &self,
        payment_id: Uuid,
        filename: &str,
        data: &[u8],
    ) -> Result<String, AppError> {
        // Only the extension is kept; the name on disk is the payment id,
        // so a hostile filename cannot traverse out of the root.
        let extension = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("bin")
            .to_lowercase();
        let relative = format!("{payment_id}.{extension}");

        fs::create_dir_all(&self.root)
            .await
            .map_err(Self::storage_error)?;
        fs::write(self.root.join(&relative), data)
            .await
            .map_err(Self::storage_error)?;

        info!(path = %relative, "Receipt stored");
        Ok(relative)
    }

    #[instrument(skip(self))]
    async fn load(&self, path: &str) -> Result<Vec<u8>, AppError> {
        // Stored paths are single file names; reject anything else.
        if path.contains('/') || path.contains("..") {
            return Err(AppError::ExternalService(ExternalServiceError::Storage(
                format!("invalid receipt path: {path}"),
            )));
        }
        fs::read(self.root.join(path))
            .await
            .map_err(Self::storage_error)
    }
}
