//! 为缺少目录的 PDF 识别章节结构并写回原生书签。
//!
//! 核心是 [`toc`] 中的标题/目录识别与校正引擎；[`source`]、[`service`] 和
//! [`writer`] 是围绕它的 PDF、OCR、云服务与书签写入适配层，[`jobs`] 负责
//! 多任务并发时的注册表、事件流与人工确认。

pub mod config;
pub mod events;
pub mod jobs;
pub mod service;
pub mod source;
pub mod storage;
pub mod toc;
pub mod utils;
pub mod writer;

pub use events::{EventKind, EventSink, ProgressEvent};
pub use toc::{Bookmark, HeadingCandidate, TocEntry, TocPipeline};
pub use utils::{TocError, TocResult};
