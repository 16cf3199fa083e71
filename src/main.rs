use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use tocmark::config::{AppConfig, LabelConfig, SETTINGS_PATH};
use tocmark::events::{EventKind, LogSink, ProgressEvent};
use tocmark::jobs::{
    detect_with_source, spawn_job, ClauseDecision, EventStream, JobRegistry, JobRunner, PdfOpener, RunOutcome,
    SourceOpener, StreamItem,
};
use tocmark::service::{MineruClient, SemanticParser};
use tocmark::source::{write_thumbnails, DocumentSource, OcrFallbackSource, PdfDocument, PdftoppmRenderer, TesseractOcr};
use tocmark::storage::Database;
use tocmark::toc::{detect_clause_pages, detect_contents_pages, select_contents_pages, TocPipeline};
use tocmark::utils::logger;
use tocmark::utils::scheduler::TaskScheduler;
use tocmark::writer::{read_outline, write_outline};

type ContentsRunner = JobRunner<MineruClient, PdfOpener>;

/// 检测目录页时内嵌文本少于该字数即 OCR
const DETECT_MIN_CHARS: usize = 30;
const REGISTRY_CLEANUP_CRON: &str = "0 */10 * * * *";

#[derive(Parser)]
#[command(name = "tocmark")]
#[command(about = "为没有目录的 PDF 识别章节结构并写入书签", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 初始化配置和数据库
    Init,
    /// 扫描正文标题生成书签
    Scan {
        pdf: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// 扫描件：逐页 OCR，按编号顺序校验
        #[arg(long)]
        ocr: bool,
        /// OCR 模式下关闭顺序校验
        #[arg(long)]
        no_validate: bool,
        /// 使用 MinerU 版面分析的标题块
        #[arg(long, conflicts_with = "ocr")]
        layout: bool,
    },
    /// 给前若干页打分，找出目录页
    Detect {
        pdf: PathBuf,
        #[arg(long)]
        limit: Option<usize>,
        /// 条文说明起始页（从 1 计），给出时同时检测条文说明目录
        #[arg(long)]
        clause_start: Option<usize>,
    },
    /// 根据目录页生成书签
    Toc {
        pdf: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// 主目录页（从 1 计，逗号分隔）；不给则自动检测
        #[arg(long, value_delimiter = ',')]
        toc_pages: Vec<usize>,
        /// 条文说明目录页（从 1 计，逗号分隔）；不给则使用自动检测的建议
        #[arg(long, value_delimiter = ',', conflicts_with = "no_clause")]
        clause_pages: Vec<usize>,
        /// 不添加条文说明子目录
        #[arg(long)]
        no_clause: bool,
        /// 用大模型解析目录
        #[arg(long)]
        ai: bool,
        /// 在终端确认条文说明目录页
        #[arg(long)]
        interactive: bool,
    },
    /// 并发处理多个 PDF（目录页模式，全部自动）
    Batch {
        pdfs: Vec<PathBuf>,
        #[arg(long)]
        ai: bool,
    },
    /// 渲染页面缩略图
    Thumbnail {
        pdf: PathBuf,
        /// 从 1 计，逗号分隔；默认前 8 页
        #[arg(long, value_delimiter = ',')]
        pages: Vec<usize>,
        #[arg(long, default_value_t = 130)]
        width: u32,
        #[arg(long, default_value = "data/thumbnails")]
        out_dir: PathBuf,
    },
    /// 打印 PDF 现有书签
    Outline { pdf: PathBuf },
    /// 查看处理历史
    History {
        #[arg(short, long, default_value_t = 20)]
        limit: i64,
        /// 显示某个任务的书签
        #[arg(long)]
        job: Option<String>,
    },
    /// 清理任务目录和历史记录
    Clean,
}

/// 条文说明子目录的处理方式
#[derive(Clone)]
enum ClausePolicy {
    Pages(Vec<usize>),
    Skip,
    Interactive,
    Suggested,
}

#[tokio::main]
async fn main() -> Result<()> {
    logger::init_logger();
    info!("tocmark 启动");

    let cli = Cli::parse();

    match cli.command {
        Commands::Init => {
            init_command().await?;
        }
        Commands::Scan {
            pdf,
            output,
            ocr,
            no_validate,
            layout,
        } => {
            scan_command(&pdf, output, ocr, !no_validate, layout).await?;
        }
        Commands::Detect { pdf, limit, clause_start } => {
            detect_command(&pdf, limit, clause_start)?;
        }
        Commands::Toc {
            pdf,
            output,
            toc_pages,
            clause_pages,
            no_clause,
            ai,
            interactive,
        } => {
            let policy = if no_clause {
                ClausePolicy::Skip
            } else if !clause_pages.is_empty() {
                ClausePolicy::Pages(to_zero_based(&clause_pages)?)
            } else if interactive {
                ClausePolicy::Interactive
            } else {
                ClausePolicy::Suggested
            };
            toc_command(&pdf, output, to_zero_based(&toc_pages)?, policy, ai).await?;
        }
        Commands::Batch { pdfs, ai } => {
            batch_command(pdfs, ai).await?;
        }
        Commands::Thumbnail {
            pdf,
            pages,
            width,
            out_dir,
        } => {
            thumbnail_command(&pdf, &pages, width, &out_dir)?;
        }
        Commands::Outline { pdf } => {
            outline_command(&pdf)?;
        }
        Commands::History { limit, job } => {
            history_command(limit, job).await?;
        }
        Commands::Clean => {
            clean_command().await?;
        }
    }

    Ok(())
}

fn to_zero_based(pages: &[usize]) -> Result<Vec<usize>> {
    pages
        .iter()
        .map(|&p| p.checked_sub(1).context("页码从 1 开始"))
        .collect()
}

fn default_output(pdf: &Path) -> PathBuf {
    let stem = pdf.file_stem().and_then(|s| s.to_str()).unwrap_or("output");
    pdf.with_file_name(format!("{}_bookmarked.pdf", stem))
}

async fn open_database(config: &AppConfig) -> Result<Arc<Database>> {
    if let Some(parent) = Path::new(&config.storage.database_path).parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let db = Database::new(&format!("sqlite:{}", config.storage.database_path)).await?;
    db.init_schema().await?;
    Ok(Arc::new(db))
}

async fn init_command() -> Result<()> {
    info!("初始化...");

    tokio::fs::create_dir_all("config").await?;
    let app_config = AppConfig::default();
    tokio::fs::create_dir_all(&app_config.storage.work_dir).await?;

    app_config.save(SETTINGS_PATH)?;
    info!("已生成配置文件: {}", SETTINGS_PATH);

    let labels_toml = toml::to_string_pretty(&LabelConfig::default())?;
    tokio::fs::write("config/labels.toml", labels_toml).await?;
    info!("已生成目录标签配置: config/labels.toml");

    open_database(&app_config).await?;
    info!("数据库初始化完成: {}", app_config.storage.database_path);

    info!("✅ 初始化完成！");
    info!("下一步:");
    info!("  1. 编辑 config/settings.toml 填写 layout_service.credential");
    info!("  2. 需要 AI 解析时填写 semantic_parser.api_key");
    info!("  3. 运行 'tocmark toc <pdf>' 或 'tocmark scan <pdf>'");

    Ok(())
}

async fn scan_command(pdf: &Path, output: Option<PathBuf>, ocr: bool, validate: bool, layout: bool) -> Result<()> {
    let app_config = AppConfig::load()?;
    let labels = LabelConfig::load()?;
    let db = open_database(&app_config).await?;
    let pipeline = TocPipeline::new(app_config.pipeline.clone(), labels);
    let output = output.unwrap_or_else(|| default_output(pdf));

    let id = uuid::Uuid::new_v4().to_string();
    let mode = if layout {
        "scan-layout"
    } else if ocr {
        "scan-ocr"
    } else {
        "scan"
    };
    db.insert_job(&id, &pdf.display().to_string(), mode).await?;
    info!("扫描 {}（{}）", pdf.display(), mode);

    let result = if layout {
        let client = MineruClient::new(app_config.layout_service.clone())?;
        let out_dir = Path::new(&app_config.storage.work_dir).join(&id).join("layout_out");
        match client.layout_items(pdf, &out_dir, &LogSink).await {
            Ok(items) => pipeline.bookmarks_from_layout(&items),
            Err(e) => Err(e),
        }
    } else if ocr {
        let tesseract = TesseractOcr::new(&app_config.ocr);
        if !tesseract.available() {
            anyhow::bail!("未找到 OCR 引擎: {}", app_config.ocr.engine_path);
        }
        let renderer = PdftoppmRenderer::new(app_config.ocr.renderer_path.as_str(), pdf);
        let source = OcrFallbackSource::new(PdfDocument::open(pdf)?, renderer, tesseract, app_config.ocr.scan_resolution);
        pipeline.extract_headings_ocr(&source, validate)
    } else {
        let document = PdfDocument::open(pdf)?;
        pipeline.extract_headings(&document, None)
    };

    match result {
        Ok(bookmarks) => {
            write_outline(pdf, &bookmarks, &output)?;
            db.finish_job(&id, "done", None, &bookmarks).await?;
            info!("✅ 共写入 {} 个书签: {}", bookmarks.len(), output.display());
            Ok(())
        }
        Err(e) => {
            db.finish_job(&id, "error", Some(&e.to_string()), &[]).await?;
            Err(e.into())
        }
    }
}

fn detect_command(pdf: &Path, limit: Option<usize>, clause_start: Option<usize>) -> Result<()> {
    let app_config = AppConfig::load()?;
    let source = PdfOpener::new(app_config.ocr.clone())
        .with_min_chars(DETECT_MIN_CHARS)
        .open(pdf)?;
    let limit = limit.unwrap_or(app_config.pipeline.detect_scan_pages);

    let scores = detect_contents_pages(source.as_ref(), limit)?;
    for score in &scores {
        info!(
            "第 {:3} 页  得分 {:2}  {}",
            score.page_index + 1,
            score.score,
            if score.detected { "✅ 目录" } else { "" }
        );
    }
    let selected = select_contents_pages(&scores, source.page_count());
    info!("建议目录页: {:?}", selected.iter().map(|p| p + 1).collect::<Vec<_>>());

    if let Some(start) = clause_start {
        let start = start.checked_sub(1).context("页码从 1 开始")?;
        let (clause_scores, pages) = detect_clause_pages(source.as_ref(), start, app_config.pipeline.clause_scan_pages)?;
        for score in &clause_scores {
            debug!("条文说明候选 第 {} 页 得分 {}", score.page_index + 1, score.score);
        }
        info!("建议条文说明目录页: {:?}", pages.iter().map(|p| p + 1).collect::<Vec<_>>());
    }
    Ok(())
}

fn build_runner(app_config: &AppConfig, use_ai: bool) -> Result<ContentsRunner> {
    let labels = LabelConfig::load()?;
    let reader = MineruClient::new(app_config.layout_service.clone())?;
    let mut runner = JobRunner::new(
        reader,
        PdfOpener::new(app_config.ocr.clone()),
        app_config.pipeline.clone(),
        labels,
    );
    if use_ai {
        runner = runner.with_semantic_parser(SemanticParser::new(app_config.semantic_parser.clone())?);
    }
    Ok(runner)
}

/// 登记、检测、启动并观察一个目录页任务，结果写入历史
#[allow(clippy::too_many_arguments)]
async fn run_contents_job(
    app_config: &AppConfig,
    registry: Arc<JobRegistry>,
    runner: Arc<ContentsRunner>,
    db: Arc<Database>,
    pdf: PathBuf,
    toc_pages: Vec<usize>,
    policy: ClausePolicy,
    use_ai: bool,
) -> Result<RunOutcome> {
    // 阻塞：打开 PDF、目录页打分（可能 OCR）
    let (id, toc_pages) = {
        let registry = Arc::clone(&registry);
        let opener = PdfOpener::new(app_config.ocr.clone()).with_min_chars(DETECT_MIN_CHARS);
        let limit = app_config.pipeline.detect_scan_pages;
        let pdf = pdf.clone();
        tokio::task::spawn_blocking(move || -> Result<(String, Vec<usize>)> {
            let page_count = PdfDocument::open(&pdf)?.page_count();
            let id = registry.create(&pdf, page_count)?;
            if !toc_pages.is_empty() {
                return Ok((id, toc_pages));
            }
            let detected = registry.detect(&id, |path| {
                let source = opener.open(path)?;
                detect_with_source(source.as_ref(), limit)
            })?;
            Ok((id, detected))
        })
        .await??
    };
    info!("[{}] 目录页: {:?}", short_id(&id), toc_pages.iter().map(|p| p + 1).collect::<Vec<_>>());

    db.insert_job(&id, &pdf.display().to_string(), "toc").await?;
    let start = registry.start(&id, toc_pages, use_ai)?;
    let stream = registry.subscribe(&id)?;
    let handle = spawn_job(Arc::clone(&registry), runner, id.clone(), start);

    observe(&registry, &id, stream, &policy).await;

    match handle.await? {
        Ok(outcome) => {
            db.finish_job(&id, "done", None, &outcome.bookmarks).await?;
            Ok(outcome)
        }
        Err(e) => {
            db.finish_job(&id, "error", Some(&e.to_string()), &[]).await?;
            Err(e.into())
        }
    }
}

async fn toc_command(
    pdf: &Path,
    output: Option<PathBuf>,
    toc_pages: Vec<usize>,
    policy: ClausePolicy,
    use_ai: bool,
) -> Result<()> {
    let app_config = AppConfig::load()?;
    let db = open_database(&app_config).await?;
    let registry = Arc::new(JobRegistry::new(&app_config.storage.work_dir, app_config.pipeline.job_ttl_secs));
    let runner = Arc::new(build_runner(&app_config, use_ai)?);

    let outcome = run_contents_job(
        &app_config,
        registry,
        runner,
        db,
        pdf.to_path_buf(),
        toc_pages,
        policy,
        use_ai,
    )
    .await?;

    let output = output.unwrap_or_else(|| default_output(pdf));
    tokio::fs::copy(&outcome.final_pdf, &output).await?;
    info!("✅ 已输出: {}", output.display());
    Ok(())
}

async fn batch_command(pdfs: Vec<PathBuf>, use_ai: bool) -> Result<()> {
    if pdfs.is_empty() {
        info!("没有输入文件");
        return Ok(());
    }

    let app_config = Arc::new(AppConfig::load()?);
    let db = open_database(&app_config).await?;
    let registry = Arc::new(JobRegistry::new(&app_config.storage.work_dir, app_config.pipeline.job_ttl_secs));
    let runner = Arc::new(build_runner(&app_config, use_ai)?);

    let scheduler = TaskScheduler::new().await?;
    scheduler
        .add_registry_cleanup(REGISTRY_CLEANUP_CRON, Arc::clone(&registry))
        .await?;
    scheduler.start().await?;

    let mut tasks = JoinSet::new();
    for pdf in pdfs {
        let app_config = Arc::clone(&app_config);
        let registry = Arc::clone(&registry);
        let runner = Arc::clone(&runner);
        let db = Arc::clone(&db);
        tasks.spawn(async move {
            let result = run_contents_job(
                &app_config,
                registry,
                runner,
                db,
                pdf.clone(),
                Vec::new(),
                ClausePolicy::Suggested,
                use_ai,
            )
            .await;
            (pdf, result)
        });
    }

    let mut success_count = 0;
    let mut fail_count = 0;
    while let Some(joined) = tasks.join_next().await {
        let (pdf, result) = joined?;
        match result {
            Ok(outcome) => {
                let output = default_output(&pdf);
                tokio::fs::copy(&outcome.final_pdf, &output).await?;
                info!("  ✅ {} → {}（{} 个书签）", pdf.display(), output.display(), outcome.bookmarks.len());
                success_count += 1;
            }
            Err(e) => {
                info!("  ❌ {}: {}", pdf.display(), e);
                fail_count += 1;
            }
        }
    }

    scheduler.shutdown().await?;
    info!("✅ 批处理完成: {} 成功, {} 失败", success_count, fail_count);
    Ok(())
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

fn log_event(id: &str, event: &ProgressEvent) {
    let id = short_id(id);
    match event.kind {
        EventKind::StepStart => info!("[{}] [{}/6] {}", id, event.step.unwrap_or(0), event.message),
        EventKind::Warning => warn!("[{}] ⚠ {}", id, event.message),
        EventKind::Error => error!("[{}] {}", id, event.message),
        _ => info!("[{}] {}", id, event.message),
    }
}

/// 转发进度到日志；遇到条文说明确认时按策略作答
async fn observe(registry: &JobRegistry, id: &str, mut stream: EventStream, policy: &ClausePolicy) {
    while let Some(item) = stream.next().await {
        match item {
            StreamItem::Event(event) => {
                log_event(id, &event);
                if event.kind == EventKind::SelectClause {
                    let decision = decide_clause(&event, policy).await;
                    if let Err(e) = registry.decide(id, decision) {
                        warn!("提交条文说明选择失败: {}", e);
                    }
                }
            }
            StreamItem::Heartbeat => debug!("[{}] 仍在处理...", short_id(id)),
            StreamItem::End => break,
        }
    }
}

async fn decide_clause(event: &ProgressEvent, policy: &ClausePolicy) -> ClauseDecision {
    let suggested: Vec<usize> = event
        .payload
        .as_ref()
        .and_then(|p| p.get("suggested_pages"))
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();

    match policy {
        ClausePolicy::Pages(pages) => Some(pages.clone()),
        ClausePolicy::Skip => None,
        ClausePolicy::Suggested => {
            if suggested.is_empty() {
                info!("未检测到条文说明目录页，跳过");
                None
            } else {
                Some(suggested)
            }
        }
        ClausePolicy::Interactive => {
            let prompt = format!(
                "{}\n建议页: {:?}\n回车使用建议，输入 n 跳过，或输入页码（从 1 计，逗号分隔）: ",
                event.message,
                suggested.iter().map(|p| p + 1).collect::<Vec<_>>()
            );
            let answer = tokio::task::spawn_blocking(move || {
                use std::io::Write;
                print!("{}", prompt);
                let _ = std::io::stdout().flush();
                let mut line = String::new();
                std::io::stdin().read_line(&mut line).map(|_| line)
            })
            .await;

            let line = match answer {
                Ok(Ok(line)) => line,
                _ => return None,
            };
            let line = line.trim();
            if line.is_empty() {
                return (!suggested.is_empty()).then_some(suggested);
            }
            if line.eq_ignore_ascii_case("n") {
                return None;
            }
            let pages: Vec<usize> = line
                .split(|c: char| c == ',' || c == '，' || c.is_whitespace())
                .filter_map(|p| p.trim().parse::<usize>().ok())
                .filter_map(|p| p.checked_sub(1))
                .collect();
            (!pages.is_empty()).then_some(pages)
        }
    }
}

fn thumbnail_command(pdf: &Path, pages: &[usize], width: u32, out_dir: &Path) -> Result<()> {
    let app_config = AppConfig::load()?;
    let page_count = PdfDocument::open(pdf)?.page_count();
    let pages = if pages.is_empty() {
        (0..page_count.min(8)).collect()
    } else {
        to_zero_based(pages)?
    };

    let renderer = PdftoppmRenderer::new(app_config.ocr.renderer_path.as_str(), pdf);
    let written = write_thumbnails(&renderer, &pages, width, out_dir)?;
    info!("✅ 已生成 {} 张缩略图: {}", written.len(), out_dir.display());
    Ok(())
}

fn outline_command(pdf: &Path) -> Result<()> {
    let document = lopdf::Document::load(pdf).with_context(|| format!("无法打开 {}", pdf.display()))?;
    let bookmarks = read_outline(&document)?;
    if bookmarks.is_empty() {
        info!("{} 没有书签", pdf.display());
        return Ok(());
    }
    for bookmark in &bookmarks {
        let indent = "  ".repeat(bookmark.level.saturating_sub(1) as usize);
        println!("{}{}  ……  {}", indent, bookmark.title, bookmark.physical_page);
    }
    info!("共 {} 个书签", bookmarks.len());
    Ok(())
}

async fn history_command(limit: i64, job: Option<String>) -> Result<()> {
    let app_config = AppConfig::load()?;
    let db = open_database(&app_config).await?;

    if let Some(job_id) = job {
        let bookmarks = db.job_bookmarks(&job_id).await?;
        if bookmarks.is_empty() {
            info!("任务 {} 没有书签记录", job_id);
        }
        for bookmark in &bookmarks {
            let indent = "  ".repeat((bookmark.level.max(1) - 1) as usize);
            println!("{}{}  ……  {}", indent, bookmark.title, bookmark.page);
        }
        return Ok(());
    }

    let jobs = db.recent_jobs(limit).await?;
    if jobs.is_empty() {
        info!("没有历史记录");
        return Ok(());
    }
    for job in &jobs {
        println!(
            "{}  {}  {:11}  {:6}  {:3} 个书签  {}{}",
            job.created_at,
            short_id(&job.id),
            job.mode,
            job.status,
            job.bookmark_count,
            job.pdf_path,
            job.message
                .as_deref()
                .map(|m| format!("  ({})", m))
                .unwrap_or_default()
        );
    }
    Ok(())
}

async fn clean_command() -> Result<()> {
    info!("开始清理...");

    let app_config = AppConfig::load()?;
    let work_dir = Path::new(&app_config.storage.work_dir);
    let mut removed = 0u64;
    match tokio::fs::read_dir(work_dir).await {
        Ok(mut entries) => {
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let result = if path.is_dir() {
                    tokio::fs::remove_dir_all(&path).await
                } else {
                    tokio::fs::remove_file(&path).await
                };
                match result {
                    Ok(()) => removed += 1,
                    Err(e) => info!("删除失败 {}: {}", path.display(), e),
                }
            }
            info!("已清理任务目录 {}: {} 项", work_dir.display(), removed);
        }
        Err(_) => {
            info!("目录不存在，跳过: {}", work_dir.display());
        }
    }

    match open_database(&app_config).await {
        Ok(db) => {
            let jobs = db.clear_history().await?;
            info!("已清空 {} 条历史记录", jobs);
        }
        Err(e) => {
            info!("数据库连接失败，跳过清空: {}", e);
        }
    }

    info!("✅ 清理完成");
    Ok(())
}
