use serde_json::json;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

use super::{DecisionReceiver, JobRegistry, JobStart, JobStatus};
use crate::config::{LabelConfig, OcrConfig, PipelineConfig};
use crate::events::{EventKind, EventSink, ProgressEvent};
use crate::service::{load_output_lines, MineruClient, SemanticParser};
use crate::source::{export_pages, DocumentSource, OcrFallbackSource, PdfDocument, PdftoppmRenderer, TesseractOcr};
use crate::toc::{detect_clause_pages, Bookmark, ContentsOutcome, OffsetOutcome, TocEntry, TocPipeline};
use crate::utils::{TocError, TocResult};
use crate::writer::write_outline;

/// 没有选目录页时正文扫描的默认起点
const DEFAULT_SCAN_START: usize = 7;

/// 把若干页 PDF 变成目录文本行（通常经由云端版面分析）
pub trait ContentsReader: Send + Sync {
    fn read_lines(
        &self,
        pdf: &Path,
        out_dir: &Path,
        sink: &dyn EventSink,
    ) -> impl Future<Output = TocResult<Vec<String>>> + Send;
}

impl ContentsReader for MineruClient {
    fn read_lines(
        &self,
        pdf: &Path,
        out_dir: &Path,
        sink: &dyn EventSink,
    ) -> impl Future<Output = TocResult<Vec<String>>> + Send {
        async move {
            let dir = self.parse_pdf(pdf, out_dir, sink).await?;
            load_output_lines(&dir)
        }
    }
}

/// 打开原始 PDF 供正文扫描
pub trait SourceOpener: Send + Sync {
    fn open(&self, pdf: &Path) -> TocResult<Box<dyn DocumentSource>>;
}

impl<F> SourceOpener for F
where
    F: Fn(&Path) -> TocResult<Box<dyn DocumentSource>> + Send + Sync,
{
    fn open(&self, pdf: &Path) -> TocResult<Box<dyn DocumentSource>> {
        self(pdf)
    }
}

/// 内嵌文本优先，tesseract 可用时对文字过少的页补 OCR
pub struct PdfOpener {
    ocr: OcrConfig,
    min_chars: usize,
}

impl PdfOpener {
    pub fn new(ocr: OcrConfig) -> Self {
        Self { ocr, min_chars: 50 }
    }

    pub fn with_min_chars(mut self, min_chars: usize) -> Self {
        self.min_chars = min_chars;
        self
    }
}

impl SourceOpener for PdfOpener {
    fn open(&self, pdf: &Path) -> TocResult<Box<dyn DocumentSource>> {
        let document = PdfDocument::open(pdf)?;
        let tesseract = TesseractOcr::new(&self.ocr);
        if !tesseract.available() {
            info!("未找到 {}，只使用内嵌文本", self.ocr.engine_path);
            return Ok(Box::new(document));
        }
        let renderer = PdftoppmRenderer::new(self.ocr.renderer_path.as_str(), pdf);
        Ok(Box::new(
            OcrFallbackSource::new(document, renderer, tesseract, self.ocr.scan_resolution)
                .with_min_chars(self.min_chars),
        ))
    }
}

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub pdf_path: PathBuf,
    pub work_dir: PathBuf,
    /// 用户选定的主目录页（0 起始）
    pub toc_pages: Vec<usize>,
    pub use_ai: bool,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub final_pdf: PathBuf,
    pub bookmarks: Vec<Bookmark>,
    pub offset: OffsetOutcome,
}

struct MainPass {
    outcome: ContentsOutcome,
    page_count: usize,
    clause_suggestion: Vec<usize>,
}

/// 目录页模式的完整流程：导出目录页、版面分析、解析注入、条文说明确认与拼接
pub struct JobRunner<R, O> {
    reader: R,
    opener: Arc<O>,
    semantic: Option<SemanticParser>,
    config: PipelineConfig,
    labels: LabelConfig,
}

impl<R: ContentsReader, O: SourceOpener + 'static> JobRunner<R, O> {
    pub fn new(reader: R, opener: O, config: PipelineConfig, labels: LabelConfig) -> Self {
        Self {
            reader,
            opener: Arc::new(opener),
            semantic: None,
            config,
            labels,
        }
    }

    pub fn with_semantic_parser(mut self, parser: SemanticParser) -> Self {
        self.semantic = Some(parser);
        self
    }

    pub async fn run(
        &self,
        request: RunRequest,
        sink: Arc<dyn EventSink>,
        decision: DecisionReceiver,
    ) -> TocResult<RunOutcome> {
        let pipeline = Arc::new(TocPipeline::new(self.config.clone(), self.labels.clone()).with_sink(Arc::clone(&sink)));
        let work = &request.work_dir;
        std::fs::create_dir_all(work)?;

        // 1. 导出目录页
        sink.emit(ProgressEvent::step(1, 5, "提取目录页..."));
        let toc_pdf = {
            let (pdf, pages, dest) = (request.pdf_path.clone(), request.toc_pages.clone(), work.join("toc_only.pdf"));
            run_blocking(move || export_pages(&pdf, &pages, &dest)).await?
        };
        let scan_start = request
            .toc_pages
            .iter()
            .max()
            .map_or(DEFAULT_SCAN_START, |&last| last + 1);
        sink.log(format!(
            "目录页（0-indexed）: {:?}，正文扫描从第 {} 页开始",
            request.toc_pages,
            scan_start + 1
        ));

        // 2. 版面分析
        sink.emit(ProgressEvent::step(2, 15, "MinerU Cloud API 处理中..."));
        let lines = self
            .reader
            .read_lines(&toc_pdf, &work.join("toc_mineru_out"), sink.as_ref())
            .await?;

        // 3. 解析目录并注入
        sink.emit(ProgressEvent::step(3, 45, "解析目录并注入书签..."));
        let entries = self.parse_entries(&pipeline, &lines, request.use_ai, sink.as_ref()).await?;
        let bookmarked = work.join("toc_bm.pdf");
        let main = {
            let pipeline = Arc::clone(&pipeline);
            let opener = Arc::clone(&self.opener);
            let request = request.clone();
            let clause_scan_pages = self.config.clause_scan_pages;
            run_blocking(move || {
                main_pass(&pipeline, opener.as_ref(), &request, entries, scan_start, &bookmarked, clause_scan_pages)
            })
            .await?
        };
        let offset = main.outcome.offset.offset();
        let bookmarks = main.outcome.bookmarks;

        // 4. 是否添加条文说明子目录
        let clause_pages = match main.outcome.clause_page {
            Some(clause_page) => {
                let event = ProgressEvent {
                    step: Some(4),
                    progress: Some(60),
                    ..ProgressEvent::new(
                        EventKind::SelectClause,
                        format!(
                            "主目录书签已注入（共 {} 个）。{}在第 {} 页，是否添加子目录书签？",
                            bookmarks.len(),
                            self.labels.clause_marker,
                            clause_page
                        ),
                    )
                }
                .with_payload(json!({
                    "clause_page": clause_page - 1,
                    "suggested_pages": main.clause_suggestion,
                }));
                sink.emit(event);
                decision
                    .wait(Duration::from_secs(self.config.decision_timeout_secs))
                    .await
            }
            None => {
                sink.log(format!("未找到{}书签，跳过子目录注入", self.labels.clause_marker));
                sink.emit(ProgressEvent::step(4, 60, "准备完成..."));
                None
            }
        };

        // 5/6. 条文说明目录：失败时以主目录书签完成
        let final_bookmarks = match clause_pages {
            Some(pages) => {
                sink.log(format!("{}目录页（0-indexed）: {:?}", self.labels.clause_marker, pages));
                match self.clause_lines(&request, &pages, sink.as_ref()).await {
                    Ok(clause_lines) => {
                        sink.emit(ProgressEvent::step(6, 90, "注入条文说明子书签..."));
                        pipeline.with_clause_section(bookmarks, &clause_lines, offset, main.page_count)
                    }
                    Err(e) => {
                        sink.warn(format!("条文说明子书签注入失败（{}），以主目录书签完成", e));
                        sink.emit(ProgressEvent::step(6, 90, "完成最后处理..."));
                        bookmarks
                    }
                }
            }
            None => {
                sink.log("跳过条文说明子目录，直接完成".to_string());
                sink.emit(ProgressEvent::step(6, 90, "完成最后处理..."));
                bookmarks
            }
        };

        let final_pdf = work.join("final.pdf");
        let final_bookmarks = {
            let (pdf, dest) = (request.pdf_path.clone(), final_pdf.clone());
            run_blocking(move || write_outline(&pdf, &final_bookmarks, &dest).map(|_| final_bookmarks)).await?
        };
        sink.emit(
            ProgressEvent::new(
                EventKind::Done,
                format!("完成！共注入 {} 个书签", final_bookmarks.len()),
            )
            .with_progress(100),
        );

        Ok(RunOutcome {
            final_pdf,
            bookmarks: final_bookmarks,
            offset: main.outcome.offset,
        })
    }

    async fn parse_entries(
        &self,
        pipeline: &TocPipeline,
        lines: &[String],
        use_ai: bool,
        sink: &dyn EventSink,
    ) -> TocResult<Vec<TocEntry>> {
        if !use_ai {
            return pipeline.parse_contents(lines);
        }
        let parser = self
            .semantic
            .as_ref()
            .ok_or_else(|| TocError::ConfigError("未配置 AI 目录解析".to_string()))?;
        let entries = parser.parse(lines, sink).await?;
        if entries.is_empty() {
            return Err(TocError::EmptyContents(format!("AI 解析 {} 行输入", lines.len())));
        }
        Ok(entries)
    }

    async fn clause_lines(&self, request: &RunRequest, pages: &[usize], sink: &dyn EventSink) -> TocResult<Vec<String>> {
        let clause_pdf = {
            let (pdf, pages, dest) = (request.pdf_path.clone(), pages.to_vec(), request.work_dir.join("clause_toc.pdf"));
            run_blocking(move || export_pages(&pdf, &pages, &dest)).await?
        };
        sink.emit(ProgressEvent::step(5, 65, "MinerU Cloud API 处理条文说明目录..."));
        self.reader
            .read_lines(&clause_pdf, &request.work_dir.join("clause_mineru_out"), sink)
            .await
    }
}

/// 同步的 PDF/OCR 工作放到阻塞线程池
async fn run_blocking<T, F>(work: F) -> TocResult<T>
where
    F: FnOnce() -> TocResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| TocError::JobError(format!("后台线程异常退出: {}", e)))?
}

/// 偏移推断、主目录书签写入，顺带给出条文说明目录页建议
fn main_pass<O: SourceOpener>(
    pipeline: &TocPipeline,
    opener: &O,
    request: &RunRequest,
    entries: Vec<TocEntry>,
    scan_start: usize,
    bookmarked: &Path,
    clause_scan_pages: usize,
) -> TocResult<MainPass> {
    let source = opener.open(&request.pdf_path)?;
    let outcome = pipeline.assemble_contents(entries, source.as_ref(), scan_start, &request.toc_pages)?;
    write_outline(&request.pdf_path, &outcome.bookmarks, bookmarked)?;

    let clause_suggestion = match outcome.clause_page {
        Some(page) => detect_clause_pages(source.as_ref(), page as usize - 1, clause_scan_pages)
            .map(|(_, pages)| pages)
            .unwrap_or_default(),
        None => Vec::new(),
    };

    Ok(MainPass {
        page_count: source.page_count(),
        outcome,
        clause_suggestion,
    })
}

/// 在独立的 tokio 任务里运行；失败时补发 error 事件，结束后更新注册表
pub fn spawn_job<R, O>(
    registry: Arc<JobRegistry>,
    runner: Arc<JobRunner<R, O>>,
    id: String,
    start: JobStart,
) -> JoinHandle<TocResult<RunOutcome>>
where
    R: ContentsReader + 'static,
    O: SourceOpener + 'static,
{
    tokio::spawn(async move {
        let JobStart {
            request,
            events,
            decision,
        } = start;
        let sink: Arc<dyn EventSink> = Arc::new(events);

        let result = runner.run(request, Arc::clone(&sink), decision).await;
        match &result {
            Ok(_) => registry.finish(&id, JobStatus::Done),
            Err(e) => {
                sink.emit(ProgressEvent::new(EventKind::Error, format!("处理失败: {}", e)));
                registry.finish(&id, JobStatus::Error);
            }
        }
        result
    })
}
