//! Ignored files: identities excluded from future indexing attempts.

use super::Store;
use crate::error::Result;
use chrono::Utc;

/// Why a file was excluded from indexing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Mandatory metadata could not be extracted (undecodable media).
    InvalidFile,
    /// The media decoder's size limit tripped.
    DecompressionBomb,
}

impl IgnoreReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            IgnoreReason::InvalidFile => "invalid-file",
            IgnoreReason::DecompressionBomb => "decompression-bomb",
        }
    }
}

impl Store {
    /// Record a file identity as ignored. Idempotent: re-recording an
    /// already-ignored identity is a no-op.
    pub async fn insert_ignored(&self, file_id: &str, reason: IgnoreReason) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO ignored_files (file_id, reason, created_at) VALUES (?1, ?2, ?3)",
        )
        .bind(file_id)
        .bind(reason.as_str())
        .bind(Utc::now().to_rfc3339())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn ignored_exists(&self, file_id: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ignored_files WHERE file_id = ?1")
            .bind(file_id)
            .fetch_one(self.pool())
            .await?;
        Ok(count > 0)
    }

    pub async fn count_ignored(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ignored_files")
            .fetch_one(self.pool())
            .await?;
        Ok(count)
    }
}
