//! 多任务并发：注册表、进度事件流与人工确认
pub mod handoff;
pub mod runner;
pub mod stream;

pub use handoff::{decision_channel, ClauseDecision, DecisionReceiver, DecisionSender};
pub use runner::{spawn_job, ContentsReader, JobRunner, PdfOpener, RunOutcome, RunRequest, SourceOpener};
pub use stream::{EventStream, StreamItem};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{info, warn};
use uuid::Uuid;

use crate::events::ProgressEvent;
use crate::toc::{detect_contents_pages, select_contents_pages};
use crate::utils::{TocError, TocResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Uploaded,
    Detecting,
    Selecting,
    Running,
    Done,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Uploaded => "uploaded",
            JobStatus::Detecting => "detecting",
            JobStatus::Selecting => "selecting",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Error => "error",
        }
    }
}

struct Job {
    pdf_path: PathBuf,
    work_dir: PathBuf,
    page_count: usize,
    status: JobStatus,
    detected_pages: Vec<usize>,
    created_at: DateTime<Utc>,
    events: Option<UnboundedReceiver<ProgressEvent>>,
    decision: Option<DecisionSender>,
}

/// 对外可见的任务快照
#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    pub pdf_path: PathBuf,
    pub work_dir: PathBuf,
    pub page_count: usize,
    pub status: JobStatus,
    pub detected_pages: Vec<usize>,
}

/// `start` 交给执行方的句柄
pub struct JobStart {
    pub request: RunRequest,
    pub events: UnboundedSender<ProgressEvent>,
    pub decision: DecisionReceiver,
}

/// 进程内任务表，超过 TTL 的任务连同工作目录一起清理
pub struct JobRegistry {
    jobs: Mutex<HashMap<String, Job>>,
    work_root: PathBuf,
    ttl: Duration,
}

impl JobRegistry {
    pub fn new(work_root: impl Into<PathBuf>, ttl_secs: i64) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            work_root: work_root.into(),
            ttl: Duration::seconds(ttl_secs),
        }
    }

    fn lock(&self) -> TocResult<std::sync::MutexGuard<'_, HashMap<String, Job>>> {
        self.jobs
            .lock()
            .map_err(|_| TocError::JobError("任务表锁已损坏".to_string()))
    }

    fn not_found(id: &str) -> TocError {
        TocError::JobError(format!("job 不存在: {}", id))
    }

    /// 复制输入 PDF 到独立工作目录并登记
    pub fn create(&self, pdf: &Path, page_count: usize) -> TocResult<String> {
        let id = Uuid::new_v4().to_string();
        let work_dir = self.work_root.join(&id);
        std::fs::create_dir_all(&work_dir)?;
        let pdf_path = work_dir.join("input.pdf");
        std::fs::copy(pdf, &pdf_path)?;

        self.lock()?.insert(
            id.clone(),
            Job {
                pdf_path,
                work_dir,
                page_count,
                status: JobStatus::Uploaded,
                detected_pages: Vec::new(),
                created_at: Utc::now(),
                events: None,
                decision: None,
            },
        );
        info!("新任务 {}（{} 页）", id, page_count);
        Ok(id)
    }

    pub fn get(&self, id: &str) -> Option<JobInfo> {
        let jobs = self.lock().ok()?;
        jobs.get(id).map(|job| JobInfo {
            id: id.to_string(),
            pdf_path: job.pdf_path.clone(),
            work_dir: job.work_dir.clone(),
            page_count: job.page_count,
            status: job.status,
            detected_pages: job.detected_pages.clone(),
        })
    }

    pub fn len(&self) -> usize {
        self.lock().map_or(0, |jobs| jobs.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 目录页检测：只有 uploaded 状态会真正开始，其余状态直接返回已有结果
    ///
    /// `detect` 出错时回退到默认页范围。
    pub fn detect<F>(&self, id: &str, detect: F) -> TocResult<Vec<usize>>
    where
        F: FnOnce(&Path) -> TocResult<Vec<usize>>,
    {
        let (pdf_path, page_count) = {
            let mut jobs = self.lock()?;
            let job = jobs.get_mut(id).ok_or_else(|| Self::not_found(id))?;
            if job.status != JobStatus::Uploaded {
                return Ok(job.detected_pages.clone());
            }
            job.status = JobStatus::Detecting;
            (job.pdf_path.clone(), job.page_count)
        };

        let pages = detect(&pdf_path).unwrap_or_else(|e| {
            warn!("目录页检测失败（{}），使用默认范围", e);
            select_contents_pages(&[], page_count)
        });

        let mut jobs = self.lock()?;
        if let Some(job) = jobs.get_mut(id) {
            job.detected_pages = pages.clone();
            job.status = JobStatus::Selecting;
        }
        Ok(pages)
    }

    /// 登记开始运行；同一任务不能重复启动，至少要选一页目录
    pub fn start(&self, id: &str, toc_pages: Vec<usize>, use_ai: bool) -> TocResult<JobStart> {
        if toc_pages.is_empty() {
            return Err(TocError::JobError("请至少选择一个目录页".to_string()));
        }

        let mut jobs = self.lock()?;
        let job = jobs.get_mut(id).ok_or_else(|| Self::not_found(id))?;
        if job.status == JobStatus::Running {
            return Err(TocError::JobError("已在运行中".to_string()));
        }

        let (events_tx, events_rx) = unbounded_channel();
        let (decision_tx, decision_rx) = decision_channel();
        job.status = JobStatus::Running;
        job.events = Some(events_rx);
        job.decision = Some(decision_tx);

        Ok(JobStart {
            request: RunRequest {
                pdf_path: job.pdf_path.clone(),
                work_dir: job.work_dir.clone(),
                toc_pages,
                use_ai,
            },
            events: events_tx,
            decision: decision_rx,
        })
    }

    /// 取走进度事件流；每次运行只能订阅一次
    pub fn subscribe(&self, id: &str) -> TocResult<EventStream> {
        let mut jobs = self.lock()?;
        let job = jobs.get_mut(id).ok_or_else(|| Self::not_found(id))?;
        job.events
            .take()
            .map(EventStream::new)
            .ok_or_else(|| TocError::JobError("进度流已被订阅或任务未启动".to_string()))
    }

    /// 把用户的条文说明选择交给等待中的流水线
    pub fn decide(&self, id: &str, decision: ClauseDecision) -> TocResult<()> {
        let sender = {
            let mut jobs = self.lock()?;
            let job = jobs.get_mut(id).ok_or_else(|| Self::not_found(id))?;
            job.decision
                .take()
                .ok_or_else(|| TocError::JobError("pipeline 尚未就绪".to_string()))?
        };
        if !sender.send(decision) {
            warn!("任务 {} 已不再等待条文说明选择", id);
        }
        Ok(())
    }

    pub fn finish(&self, id: &str, status: JobStatus) {
        if let Ok(mut jobs) = self.lock() {
            if let Some(job) = jobs.get_mut(id) {
                job.status = status;
                job.decision = None;
            }
        }
    }

    /// 清理超过 TTL 的任务，返回被清理的 id
    pub fn purge_expired(&self) -> Vec<String> {
        self.purge_expired_at(Utc::now())
    }

    pub fn purge_expired_at(&self, now: DateTime<Utc>) -> Vec<String> {
        let expired: Vec<(String, PathBuf)> = match self.lock() {
            Ok(mut jobs) => {
                let ids: Vec<String> = jobs
                    .iter()
                    .filter(|(_, job)| now - job.created_at > self.ttl)
                    .map(|(id, _)| id.clone())
                    .collect();
                ids.into_iter()
                    .filter_map(|id| jobs.remove(&id).map(|job| (id, job.work_dir)))
                    .collect()
            }
            Err(_) => return Vec::new(),
        };

        for (id, work_dir) in &expired {
            if let Err(e) = std::fs::remove_dir_all(work_dir) {
                warn!("删除任务目录失败 {}: {}", id, e);
            }
        }
        expired.into_iter().map(|(id, _)| id).collect()
    }
}

/// 给注册表用的默认检测：打分后取第一个检出簇
pub fn detect_with_source(
    source: &dyn crate::source::DocumentSource,
    scan_limit: usize,
) -> TocResult<Vec<usize>> {
    let scores = detect_contents_pages(source, scan_limit)?;
    Ok(select_contents_pages(&scores, source.page_count()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemoryDocument;
    use tempfile::tempdir;

    fn registry_with_job(root: &Path) -> (JobRegistry, String) {
        let input = root.join("upload.pdf");
        std::fs::write(&input, b"%PDF-1.5").unwrap();
        let registry = JobRegistry::new(root.join("jobs"), 3600);
        let id = registry.create(&input, 40).unwrap();
        (registry, id)
    }

    #[test]
    fn create_copies_input_into_job_dir() {
        let dir = tempdir().unwrap();
        let (registry, id) = registry_with_job(dir.path());
        let job = registry.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Uploaded);
        assert!(job.pdf_path.ends_with("input.pdf"));
        assert!(job.pdf_path.exists());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn detection_runs_once_and_moves_to_selecting() {
        let dir = tempdir().unwrap();
        let (registry, id) = registry_with_job(dir.path());
        let doc = MemoryDocument::from_texts(&["封面", "前言", "目录\n1 总则 1\n2 术语 3", "正文"]);

        let pages = registry.detect(&id, |_| detect_with_source(&doc, 25)).unwrap();
        assert_eq!(pages, vec![2]);
        assert_eq!(registry.get(&id).unwrap().status, JobStatus::Selecting);

        let again = registry
            .detect(&id, |_| panic!("detection must not run twice"))
            .unwrap();
        assert_eq!(again, vec![2]);
    }

    #[test]
    fn failed_detection_falls_back_to_default_pages() {
        let dir = tempdir().unwrap();
        let (registry, id) = registry_with_job(dir.path());
        let pages = registry
            .detect(&id, |_| Err(TocError::OcrError("tesseract 不可用".to_string())))
            .unwrap();
        assert_eq!(pages, vec![3, 4, 5, 6, 7]);
    }

    #[test]
    fn start_guards_and_single_subscription() {
        let dir = tempdir().unwrap();
        let (registry, id) = registry_with_job(dir.path());

        assert!(matches!(registry.start(&id, vec![], false), Err(TocError::JobError(_))));
        assert!(matches!(registry.start("missing", vec![1], false), Err(TocError::JobError(_))));

        let started = registry.start(&id, vec![3, 4], false).unwrap();
        assert_eq!(started.request.toc_pages, vec![3, 4]);
        assert!(matches!(registry.start(&id, vec![3], false), Err(TocError::JobError(_))));

        assert!(registry.subscribe(&id).is_ok());
        assert!(registry.subscribe(&id).is_err());
    }

    #[tokio::test]
    async fn decision_reaches_the_runner_side() {
        let dir = tempdir().unwrap();
        let (registry, id) = registry_with_job(dir.path());
        assert!(registry.decide(&id, None).is_err());

        let started = registry.start(&id, vec![3], false).unwrap();
        registry.decide(&id, Some(vec![90, 91])).unwrap();
        assert_eq!(
            started.decision.wait(std::time::Duration::from_secs(1)).await,
            Some(vec![90, 91])
        );
        assert!(registry.decide(&id, None).is_err());
    }

    #[test]
    fn expired_jobs_are_purged_with_their_directory() {
        let dir = tempdir().unwrap();
        let (registry, id) = registry_with_job(dir.path());
        let work_dir = registry.get(&id).unwrap().work_dir;

        assert!(registry.purge_expired().is_empty());
        let later = Utc::now() + Duration::seconds(3601);
        assert_eq!(registry.purge_expired_at(later), vec![id.clone()]);
        assert!(registry.get(&id).is_none());
        assert!(!work_dir.exists());
    }
}
