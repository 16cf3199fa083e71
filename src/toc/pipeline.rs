use std::collections::HashSet;
use std::sync::Arc;

use super::classifier::PatternClassifier;
use super::contents_parser::ContentsParser;
use super::filter::HeadingFilter;
use super::font_stats::estimate_body_font_size;
use super::normalize::{normalize_levels, TitleDedup};
use super::offset::{collect_scan_pages, physical_page, resolve_offset, OffsetOutcome};
use super::validator::SequentialValidator;
use super::{Bookmark, HeadingCandidate, TocEntry};
use crate::config::{LabelConfig, PipelineConfig};
use crate::events::{EventSink, LogSink};
use crate::service::LayoutItem;
use crate::source::DocumentSource;
use crate::utils::{truncate_chars, TocError, TocResult};

/// 正文起始页自动探测范围（0 起始，左闭右开）
const BODY_START_SEARCH: (usize, usize) = (3, 20);
/// 探测不到第 1 章时默认跳过的页数
const DEFAULT_BODY_START: usize = 7;
/// 探测时每页只看前几行
const BODY_START_HEAD_LINES: usize = 8;
/// 解析失败时日志中展示的原始行数
const RAW_PREVIEW_LINES: usize = 25;

/// 目录页模式的产出
#[derive(Debug, Clone)]
pub struct ContentsOutcome {
    pub entries: Vec<TocEntry>,
    pub bookmarks: Vec<Bookmark>,
    pub offset: OffsetOutcome,
    /// 条文说明书签的物理页码（1 起始）
    pub clause_page: Option<u32>,
}

/// 把目录条目映射成书签
///
/// 只保留一、二级；同一编号只取第一次出现；越界条目丢弃并记录。
pub fn build_bookmarks(entries: &[TocEntry], offset: i32, page_count: usize) -> Vec<Bookmark> {
    build_bookmarks_with(entries, offset, page_count, &LogSink)
}

fn build_bookmarks_with(entries: &[TocEntry], offset: i32, page_count: usize, sink: &dyn EventSink) -> Vec<Bookmark> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut bookmarks = Vec::new();

    for entry in entries {
        if entry.level > 2 || !seen.insert(entry.section_label.as_str()) {
            continue;
        }
        let page = physical_page(entry.book_page, offset);
        if page < 1 || page > page_count as i64 {
            sink.log(format!(
                "跳过越界: {} 书页码={} → 物理页={}",
                entry.section_label, entry.book_page, page
            ));
            continue;
        }
        bookmarks.push(Bookmark::new(entry.level, entry.display_title(), page as u32));
    }

    normalize_levels(&mut bookmarks);
    bookmarks
}

/// 标题识别与目录重建流水线
pub struct TocPipeline {
    config: PipelineConfig,
    labels: LabelConfig,
    filter: HeadingFilter,
    font_classifier: PatternClassifier,
    text_classifier: PatternClassifier,
    parser: ContentsParser,
    sink: Arc<dyn EventSink>,
}

impl TocPipeline {
    pub fn new(config: PipelineConfig, labels: LabelConfig) -> Self {
        Self {
            filter: HeadingFilter::new(config.max_line_chars, config.heading_margin),
            font_classifier: PatternClassifier::font_mode(),
            text_classifier: PatternClassifier::text_mode(config.level1_max_chars),
            parser: ContentsParser::new(labels.clone(), config.max_book_page),
            config,
            labels,
            sink: Arc::new(LogSink),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn labels(&self) -> &LabelConfig {
        &self.labels
    }

    /// 全文 run 的众数字号
    pub fn body_font_size(&self, source: &dyn DocumentSource) -> TocResult<f32> {
        let mut runs = Vec::new();
        for page_index in 0..source.page_count() {
            runs.extend(source.page_runs(page_index)?);
        }
        Ok(estimate_body_font_size(&runs))
    }

    /// 正文扫描模式：按字号阈值 + 编号格式识别标题
    ///
    /// `body_font_size` 为 None 时先统计全文。
    pub fn extract_headings(&self, source: &dyn DocumentSource, body_font_size: Option<f32>) -> TocResult<Vec<Bookmark>> {
        let body = match body_font_size {
            Some(size) => size,
            None => self.body_font_size(source)?,
        };
        let threshold = self.filter.threshold(body);
        self.sink.log(format!("正文字号 {:.1}pt，标题阈值 {:.1}pt", body, threshold));

        let mut dedup = TitleDedup::new(self.config.dedup_key_chars);
        let mut candidates = Vec::new();

        for page_index in 0..source.page_count() {
            for line in source.page_lines(page_index)? {
                let text = line.text.trim();
                if text.is_empty() {
                    continue;
                }
                let Some(heading) = self.font_classifier.classify(text) else {
                    continue;
                };
                // 没有字号的行按 0pt 处理，过不了阈值
                let font_size = Some(line.font_size().unwrap_or(0.0));
                if self.filter.check(text, font_size, body).is_err() || !dedup.insert(text) {
                    continue;
                }
                candidates.push(HeadingCandidate {
                    text: text.to_string(),
                    level: heading.level,
                    page_index,
                    font_size,
                });
            }
        }

        if candidates.is_empty() {
            return Err(TocError::NoHeadings {
                body_font_size: body,
                threshold,
            });
        }

        let mut bookmarks: Vec<Bookmark> = candidates.into_iter().map(Bookmark::from).collect();
        normalize_levels(&mut bookmarks);
        self.sink.log(format!("识别到 {} 个书签", bookmarks.len()));
        Ok(bookmarks)
    }

    /// 第 1 章所在页：在第 4～20 页中找前几行出现一级标题 "1 ..." 的页
    pub fn detect_body_start(&self, source: &dyn DocumentSource) -> TocResult<usize> {
        let (start, end) = BODY_START_SEARCH;
        for page_index in start..end.min(source.page_count()) {
            let lines = source.page_line_texts(page_index)?;
            let found = lines.iter().take(BODY_START_HEAD_LINES).any(|line| {
                self.text_classifier
                    .classify(line)
                    .map_or(false, |m| m.level == 1 && m.chapter == Some(1))
            });
            if found {
                self.sink.log(format!("检测到第1章起始于第 {} 页", page_index + 1));
                return Ok(page_index);
            }
        }
        self.sink.log(format!("未检测到第1章，默认跳过前 {} 页", DEFAULT_BODY_START));
        Ok(DEFAULT_BODY_START)
    }

    /// 扫描件模式：没有字号，靠编号格式 + 顺序校验过滤误识别
    ///
    /// 关闭校验时改为跳过标题命中过多的页（多半是目录页）。
    pub fn extract_headings_ocr(&self, source: &dyn DocumentSource, validate: bool) -> TocResult<Vec<Bookmark>> {
        let total = source.page_count();
        let first_page = self.detect_body_start(source)?;

        let mut validator = SequentialValidator::new();
        let mut dedup = TitleDedup::new(self.config.ocr_dedup_key_chars);
        let mut bookmarks = Vec::new();

        for page_index in first_page..total {
            let lines = source.page_line_texts(page_index)?;
            let hits: Vec<_> = lines
                .iter()
                .filter_map(|line| self.text_classifier.classify(line).map(|m| (line, m)))
                .collect();

            if !validate && hits.len() > self.config.toc_page_hit_limit {
                self.sink.log(format!(
                    "第 {} 页命中 {} 个标题，视为目录页跳过",
                    page_index + 1,
                    hits.len()
                ));
                continue;
            }

            for (line, heading) in hits {
                if !self.filter.accepts(line, None, 0.0) {
                    continue;
                }
                if validate && !validator.accept(&heading) {
                    continue;
                }
                if !dedup.insert(line) {
                    continue;
                }
                bookmarks.push(Bookmark::new(heading.level, line.as_str(), page_index as u32 + 1));
            }
        }

        if bookmarks.is_empty() {
            return Err(TocError::NoHeadingsInScan {
                first_page: first_page + 1,
                pages: total.saturating_sub(first_page),
            });
        }

        normalize_levels(&mut bookmarks);
        let level1 = bookmarks.iter().filter(|b| b.level == 1).count();
        self.sink.log(format!(
            "识别到 {} 个书签（章 {}，节 {}）",
            bookmarks.len(),
            level1,
            bookmarks.len() - level1
        ));
        Ok(bookmarks)
    }

    /// 版面分析服务标记为标题的条目直接成为书签；编号格式不符的按二级处理
    pub fn bookmarks_from_layout(&self, items: &[LayoutItem]) -> TocResult<Vec<Bookmark>> {
        let mut dedup = TitleDedup::new(self.config.dedup_key_chars);
        let mut bookmarks = Vec::new();

        for item in items.iter().filter(|i| i.is_title()) {
            let text = item.text.trim();
            if text.is_empty() || !dedup.insert(text) {
                continue;
            }
            let level = self.text_classifier.level_of(text).unwrap_or(2);
            bookmarks.push(Bookmark::new(level, text, item.page_index as u32 + 1));
        }

        if bookmarks.is_empty() {
            return Err(TocError::EmptyContents("版面分析结果中没有标题".to_string()));
        }
        normalize_levels(&mut bookmarks);
        Ok(bookmarks)
    }

    /// 解析目录行；0 条时报错并记录原始行
    pub fn parse_contents(&self, lines: &[String]) -> TocResult<Vec<TocEntry>> {
        let parsed = self.parser.parse(lines);

        for entry in &parsed.entries {
            self.sink.log(format!(
                "  L{}  {:10}  p={:3}  '{}'",
                entry.level,
                entry.section_label,
                entry.book_page,
                truncate_chars(&entry.title, 40)
            ));
        }
        self.sink.log(format!("共解析 {} 条目录条目", parsed.entries.len()));

        if parsed.entries.is_empty() {
            self.sink.warn("无法解析任何目录条目，原始输出（前25行）：".to_string());
            for raw in lines.iter().take(RAW_PREVIEW_LINES) {
                self.sink.log(format!("  >> {:?}", raw));
            }
            return Err(TocError::EmptyContents(format!("{} 行输入", lines.len())));
        }

        if !parsed.unparsed.is_empty() {
            self.sink.warn(format!(
                "{} 行未能解析，例如: {:?}",
                parsed.unparsed.len(),
                parsed.unparsed.iter().take(5).collect::<Vec<_>>()
            ));
        }

        Ok(parsed.entries)
    }

    /// 目录页模式：推断偏移、生成书签、插入"目录"书签、定位条文说明
    ///
    /// `scan_start` 为正文扫描起点（一般是最后一个目录页之后）。
    pub fn assemble_contents(
        &self,
        entries: Vec<TocEntry>,
        source: &dyn DocumentSource,
        scan_start: usize,
        contents_pages: &[usize],
    ) -> TocResult<ContentsOutcome> {
        let total = source.page_count();

        if let Some(first) = entries.iter().find(|e| e.section_label == "1").or_else(|| entries.first()) {
            self.sink.log(format!("目录显示：{} 章 → 书页码 {}", first.section_label, first.book_page));
        }
        self.sink.log(format!("扫描正文页定位章节起始（第 {} 页起）...", scan_start + 1));

        let pages = collect_scan_pages(source, scan_start, self.config.offset_scan_pages)?;
        let offset = resolve_offset(&entries, &pages, scan_start);
        match &offset {
            OffsetOutcome::Voted { offset, votes } => {
                self.sink.log(format!("投票结果: {:?} → offset={}", votes, offset));
            }
            OffsetOutcome::Estimated { offset } => {
                self.sink.warn(format!("未找到章节起始页，估算 offset={}", offset));
            }
        }

        let mut bookmarks = build_bookmarks_with(&entries, offset.offset(), total, self.sink.as_ref());

        if let Some(&first_contents) = contents_pages.iter().min() {
            let contents_page = first_contents as u32 + 1;
            if (1..=total as u32).contains(&contents_page) {
                bookmarks.insert(0, Bookmark::new(1, self.labels.contents_title.as_str(), contents_page));
            }
        }

        if bookmarks.is_empty() {
            self.sink.warn("书签数为 0！所有条目可能均超出页码范围，请检查 offset".to_string());
        }

        let clause_page = self.clause_bookmark(&bookmarks).map(|(_, b)| b.physical_page);
        self.sink.log(format!("生成 {} 个书签", bookmarks.len()));

        Ok(ContentsOutcome {
            entries,
            bookmarks,
            offset,
            clause_page,
        })
    }

    fn clause_bookmark<'a>(&self, bookmarks: &'a [Bookmark]) -> Option<(usize, &'a Bookmark)> {
        bookmarks
            .iter()
            .enumerate()
            .find(|(_, b)| b.title.contains(self.labels.clause_marker.as_str()))
    }

    /// 条文说明子目录：层级加一，插到条文说明书签之后
    pub fn splice_clause(
        &self,
        bookmarks: &[Bookmark],
        clause_entries: &[TocEntry],
        offset: i32,
        page_count: usize,
    ) -> TocResult<Vec<Bookmark>> {
        let (clause_index, clause) = self
            .clause_bookmark(bookmarks)
            .ok_or_else(|| TocError::ParseError(format!("书签中未找到{}", self.labels.clause_marker)))?;
        let clause_page = clause.physical_page as i64;
        self.sink.log(format!(
            "{}: 第 {} 页，书签下标 {}，offset={}",
            self.labels.clause_marker, clause_page, clause_index, offset
        ));

        let mut seen: HashSet<&str> = HashSet::new();
        let mut sub = Vec::new();
        for entry in clause_entries {
            if entry.level > 2 || !seen.insert(entry.section_label.as_str()) {
                continue;
            }
            let page = physical_page(entry.book_page, offset);
            if page < clause_page || page > page_count as i64 {
                self.sink.log(format!(
                    "跳过越界: {} 书页码={} → 物理页={}",
                    entry.section_label, entry.book_page, page
                ));
                continue;
            }
            sub.push(Bookmark::new(entry.level + 1, entry.display_title(), page as u32));
        }
        self.sink.log(format!("子书签数: {}", sub.len()));

        let mut result = Vec::with_capacity(bookmarks.len() + sub.len());
        result.extend_from_slice(&bookmarks[..=clause_index]);
        result.extend(sub);
        result.extend_from_slice(&bookmarks[clause_index + 1..]);
        normalize_levels(&mut result);
        Ok(result)
    }

    /// 解析条文说明目录行并拼接；任何一步失败都退回主书签列表
    pub fn with_clause_section(
        &self,
        bookmarks: Vec<Bookmark>,
        clause_lines: &[String],
        offset: i32,
        page_count: usize,
    ) -> Vec<Bookmark> {
        let spliced = self
            .parse_contents(clause_lines)
            .and_then(|entries| self.splice_clause(&bookmarks, &entries, offset, page_count));
        match spliced {
            Ok(result) => result,
            Err(e) => {
                self.sink.warn(format!("条文说明子书签注入失败（{}），以主目录书签完成", e));
                bookmarks
            }
        }
    }
}

impl Default for TocPipeline {
    fn default() -> Self {
        Self::new(PipelineConfig::default(), LabelConfig::default())
    }
}
