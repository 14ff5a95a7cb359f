//! Structured diagnostic records: the error log and time metrics.
//!
//! Both tables are append-only and tagged with a closed event set, so
//! dashboards and tests can query by event without string drift.

use super::Store;
use crate::error::Result;
use chrono::Utc;
use uuid::Uuid;

/// Events recorded in the error log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorEvent {
    ProcessingObjectFailed,
    ResolutionNotFound,
    DecompressionBombError,
    ObjectNotFoundWhileQuerying,
    ProcessorLoadFailed,
    ScanPassFailed,
}

impl ErrorEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorEvent::ProcessingObjectFailed => "processing-object-failed",
            ErrorEvent::ResolutionNotFound => "resolution-not-found",
            ErrorEvent::DecompressionBombError => "decompression-bomb-error",
            ErrorEvent::ObjectNotFoundWhileQuerying => "object-not-found-while-querying",
            ErrorEvent::ProcessorLoadFailed => "processor-load-failed",
            ErrorEvent::ScanPassFailed => "scan-pass-failed",
        }
    }
}

/// Events recorded as time metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricEvent {
    GenerateImageCaption,
    GenerateEmbeddings,
    Query,
}

impl MetricEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricEvent::GenerateImageCaption => "generate-image-caption",
            MetricEvent::GenerateEmbeddings => "generate-embeddings",
            MetricEvent::Query => "query",
        }
    }
}

impl Store {
    /// Append a structured error record.
    pub async fn record_error(
        &self,
        event: ErrorEvent,
        title: &str,
        message: Option<&str>,
        detail: Option<&str>,
        metadata: Option<serde_json::Value>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO error_log (id, created_at, event, title, message, detail, metadata) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(Utc::now().to_rfc3339())
        .bind(event.as_str())
        .bind(title)
        .bind(message)
        .bind(detail)
        .bind(metadata.map(|m| m.to_string()))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Append a time metric.
    pub async fn record_time_metric(
        &self,
        event: MetricEvent,
        secs: f64,
        title: Option<&str>,
        message: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO time_metrics (id, created_at, event, secs, title, message) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(Utc::now().to_rfc3339())
        .bind(event.as_str())
        .bind(secs)
        .bind(title)
        .bind(message)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// How many error records carry the given event tag. Used by tests and
    /// the health surface.
    pub async fn count_errors(&self, event: ErrorEvent) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM error_log WHERE event = ?1")
            .bind(event.as_str())
            .fetch_one(self.pool())
            .await?;
        Ok(count)
    }

    pub async fn count_time_metrics(&self, event: MetricEvent) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM time_metrics WHERE event = ?1")
            .bind(event.as_str())
            .fetch_one(self.pool())
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn error_records_count_by_event() {
        let store = Store::open_in_memory().await.expect("open store");

        store
            .record_error(
                ErrorEvent::ScanPassFailed,
                "Scan pass failed",
                Some("root unreadable"),
                None,
                Some(serde_json::json!({ "root": "/mnt/gone" })),
            )
            .await
            .expect("record");

        assert_eq!(
            store
                .count_errors(ErrorEvent::ScanPassFailed)
                .await
                .expect("count"),
            1
        );
        assert_eq!(
            store
                .count_errors(ErrorEvent::ProcessorLoadFailed)
                .await
                .expect("count"),
            0
        );
    }

    #[tokio::test]
    async fn metrics_count_by_event() {
        let store = Store::open_in_memory().await.expect("open store");

        store
            .record_time_metric(MetricEvent::Query, 0.25, Some("Query objects"), None)
            .await
            .expect("record");

        assert_eq!(
            store
                .count_time_metrics(MetricEvent::Query)
                .await
                .expect("count"),
            1
        );
    }
}
