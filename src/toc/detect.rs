use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::source::DocumentSource;
use crate::utils::TocResult;

/// 主目录页判定分数线
pub const CONTENTS_THRESHOLD: u32 = 4;
/// 条文说明目录页判定分数线
pub const CLAUSE_THRESHOLD: u32 = 5;
/// 相邻检出页的最大间隔（中间允许夹一页空白或插图）
const CLUSTER_GAP: usize = 2;
/// 没有检出时默认的目录页范围（0 起始，左闭右开）
const DEFAULT_CONTENTS_RANGE: (usize, usize) = (3, 8);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageScore {
    pub page_index: usize,
    pub score: u32,
    pub detected: bool,
}

/// 目录页打分规则
pub struct ContentsScorer {
    dotted_re: Regex,
    trailing_number_re: Regex,
    numbered_start_re: Regex,
    section_re: Regex,
    clause_entry_re: Regex,
    clause_numbered_re: Regex,
}

impl ContentsScorer {
    pub fn new() -> Self {
        Self {
            dotted_re: Regex::new(r"[.\s]{3,}\d+\s*$").expect("内置正则"),
            trailing_number_re: Regex::new(r"\s+\d+\s*$").expect("内置正则"),
            numbered_start_re: Regex::new(r"^[1-9]").expect("内置正则"),
            section_re: Regex::new(r"^[1-9]\d*(\.\d+)?\s+\S").expect("内置正则"),
            clause_entry_re: Regex::new(r"[\x{4e00}-\x{9fff}\w]\s*\d+\s*$").expect("内置正则"),
            clause_numbered_re: Regex::new(r"^[1-9]\d*(?:\.\d+)*[\s\x{3000}]").expect("内置正则"),
        }
    }

    /// 主目录：标题词 +3，引导点/行尾页码行最多 +5，编号行最多 +5
    pub fn score_contents(&self, lines: &[String]) -> u32 {
        let has_marker = lines.iter().any(|l| l.contains("目录") || l.contains("目 录"));
        let page_lines = lines
            .iter()
            .filter(|l| {
                self.dotted_re.is_match(l)
                    || (self.trailing_number_re.is_match(l) && self.numbered_start_re.is_match(l))
            })
            .count();
        let section_lines = lines.iter().filter(|l| self.section_re.is_match(l)).count();

        (if has_marker { 3 } else { 0 }) + page_lines.min(5) as u32 + section_lines.min(5) as u32
    }

    /// 条文说明目录：标题词 +3，以页码结尾的条目行最多 +6，编号行最多 +5
    pub fn score_clause_contents(&self, lines: &[String]) -> u32 {
        let has_marker = lines.iter().any(|l| l.contains("目次") || l.contains("目录"));
        let entry_lines = lines.iter().filter(|l| self.clause_entry_re.is_match(l)).count();
        let numbered_lines = lines.iter().filter(|l| self.clause_numbered_re.is_match(l)).count();

        (if has_marker { 3 } else { 0 }) + entry_lines.min(6) as u32 + numbered_lines.min(5) as u32
    }
}

impl Default for ContentsScorer {
    fn default() -> Self {
        Self::new()
    }
}

/// 给前 `scan_limit` 页打分
pub fn detect_contents_pages(source: &dyn DocumentSource, scan_limit: usize) -> TocResult<Vec<PageScore>> {
    let scorer = ContentsScorer::new();
    let end = scan_limit.min(source.page_count());
    let mut scores = Vec::with_capacity(end);
    for page_index in 0..end {
        let lines = source.page_line_texts(page_index)?;
        let score = scorer.score_contents(&lines);
        debug!("第 {} 页目录得分 {}", page_index + 1, score);
        scores.push(PageScore {
            page_index,
            score,
            detected: score >= CONTENTS_THRESHOLD,
        });
    }
    Ok(scores)
}

/// 首个检出簇（间隔不超过 2 页）所覆盖的连续页；没有检出时回退到默认范围
pub fn select_contents_pages(scores: &[PageScore], page_count: usize) -> Vec<usize> {
    let mut detected: Vec<usize> = scores.iter().filter(|s| s.detected).map(|s| s.page_index).collect();
    detected.sort_unstable();

    let Some(&first) = detected.first() else {
        let (start, end) = DEFAULT_CONTENTS_RANGE;
        return (start..end.min(page_count)).collect();
    };

    let mut last = first;
    for &page in &detected[1..] {
        if page > last + CLUSTER_GAP {
            break;
        }
        last = page;
    }
    (first..=last).collect()
}

/// 从条文说明起始页向后扫描，返回 (各页得分, 选中的目录页)
///
/// 选中首个连续检出簇，再多带一页（目录末页常因条目少而得分不足）。
pub fn detect_clause_pages(
    source: &dyn DocumentSource,
    clause_start: usize,
    scan_pages: usize,
) -> TocResult<(Vec<PageScore>, Vec<usize>)> {
    let scorer = ContentsScorer::new();
    let total = source.page_count();
    let end = (clause_start + scan_pages).min(total);

    let mut scores = Vec::new();
    for page_index in clause_start..end {
        let lines = source.page_line_texts(page_index)?;
        let score = scorer.score_clause_contents(&lines);
        debug!("第 {} 页条文说明目录得分 {}", page_index + 1, score);
        scores.push(PageScore {
            page_index,
            score,
            detected: score >= CLAUSE_THRESHOLD,
        });
    }

    let detected: Vec<usize> = scores.iter().filter(|s| s.detected).map(|s| s.page_index).collect();
    let Some(&first) = detected.first() else {
        return Ok((scores, Vec::new()));
    };

    let mut last = first;
    for &page in &detected[1..] {
        if page != last + 1 {
            break;
        }
        last = page;
    }
    let mut pages: Vec<usize> = (first..=last).collect();
    if last + 1 < total {
        pages.push(last + 1);
    }
    Ok((scores, pages))
}
