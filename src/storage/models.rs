use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JobRecord {
    pub id: String,
    pub pdf_path: String,
    /// scan / scan-ocr / scan-layout / toc
    pub mode: String,
    pub status: String,
    pub bookmark_count: i64,
    pub message: Option<String>,
    pub created_at: String,
    pub finished_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BookmarkRecord {
    pub job_id: String,
    pub position: i64,
    pub level: i64,
    pub title: String,
    pub page: i64,
}
