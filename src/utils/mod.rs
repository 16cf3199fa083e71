pub mod logger;
pub mod scheduler;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TocError {
    #[error("配置错误: {0}")]
    ConfigError(String),

    #[error("数据库错误: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("网络请求错误: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("IO错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("PDF处理错误: {0}")]
    PdfError(#[from] lopdf::Error),

    #[error("OCR错误: {0}")]
    OcrError(String),

    #[error("外部服务错误: {0}")]
    ServiceError(String),

    #[error("外部服务超时: {0}")]
    Timeout(String),

    /// 过滤后没有任何标题候选
    #[error("未识别到任何书签（正文字号 {body_font_size}pt，标题阈值 {threshold}pt）")]
    NoHeadings { body_font_size: f32, threshold: f32 },

    /// 扫描件模式下没有通过校验的标题
    #[error("未识别到任何章节标题（自第 {first_page} 页起扫描 {pages} 页）")]
    NoHeadingsInScan { first_page: usize, pages: usize },

    /// 目录页解析出 0 条
    #[error("解析到 0 条目录: {0}")]
    EmptyContents(String),

    #[error("解析错误: {0}")]
    ParseError(String),

    /// 任务不存在或状态不允许该操作
    #[error("任务错误: {0}")]
    JobError(String),
}

pub type TocResult<T> = Result<T, TocError>;

/// 按字符（而非字节）截断，供去重键和日志预览使用
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
