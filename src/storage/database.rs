use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use anyhow::Result;
use tracing::info;

use crate::storage::models::{BookmarkRecord, JobRecord};
use crate::toc::Bookmark;

fn now_string() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(
                database_url.parse::<sqlx::sqlite::SqliteConnectOptions>()?
                    .create_if_missing(true)
            )
            .await?;

        info!("数据库连接成功: {}", database_url);
        Ok(Self { pool })
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                pdf_path TEXT NOT NULL,
                mode TEXT NOT NULL,
                status TEXT NOT NULL,
                bookmark_count INTEGER NOT NULL DEFAULT 0,
                message TEXT,
                created_at TEXT NOT NULL,
                finished_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bookmarks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                level INTEGER NOT NULL,
                title TEXT NOT NULL,
                page INTEGER NOT NULL,
                FOREIGN KEY (job_id) REFERENCES jobs(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("数据库表结构初始化完成");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// 登记一个刚开始的任务
    pub async fn insert_job(&self, id: &str, pdf_path: &str, mode: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO jobs (id, pdf_path, mode, status, created_at) VALUES (?, ?, ?, 'running', ?)"
        )
        .bind(id)
        .bind(pdf_path)
        .bind(mode)
        .bind(now_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// 任务结束：写入状态，成功时连同书签一起保存
    pub async fn finish_job(&self, id: &str, status: &str, message: Option<&str>, bookmarks: &[Bookmark]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE jobs SET status = ?, message = ?, bookmark_count = ?, finished_at = ? WHERE id = ?"
        )
        .bind(status)
        .bind(message)
        .bind(bookmarks.len() as i64)
        .bind(now_string())
        .bind(id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM bookmarks WHERE job_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        for (position, bookmark) in bookmarks.iter().enumerate() {
            sqlx::query(
                "INSERT INTO bookmarks (job_id, position, level, title, page) VALUES (?, ?, ?, ?, ?)"
            )
            .bind(id)
            .bind(position as i64)
            .bind(bookmark.level as i64)
            .bind(&bookmark.title)
            .bind(bookmark.physical_page as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn recent_jobs(&self, limit: i64) -> Result<Vec<JobRecord>> {
        let jobs = sqlx::query_as::<_, JobRecord>(
            "SELECT id, pdf_path, mode, status, bookmark_count, message, created_at, finished_at \
             FROM jobs ORDER BY created_at DESC, rowid DESC LIMIT ?"
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(jobs)
    }

    pub async fn job_bookmarks(&self, job_id: &str) -> Result<Vec<BookmarkRecord>> {
        let bookmarks = sqlx::query_as::<_, BookmarkRecord>(
            "SELECT job_id, position, level, title, page FROM bookmarks WHERE job_id = ? ORDER BY position"
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(bookmarks)
    }

    pub async fn job_count(&self) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM jobs")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    /// 清空历史，返回删除的任务数
    pub async fn clear_history(&self) -> Result<u64> {
        sqlx::query("DELETE FROM bookmarks").execute(&self.pool).await?;
        let result = sqlx::query("DELETE FROM jobs").execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
