use regex::Regex;
use tracing::debug;

use super::TocEntry;
use crate::source::DocumentSource;
use crate::utils::TocResult;

/// 每页只看前若干个非空行
const HEAD_LINES: usize = 15;
/// 在页内靠后位置命中时，要求随后这么多行内出现子节编号
const FOLLOWING_LINES: usize = 5;
const DEEP_MATCH_LINE: usize = 5;

/// 书内页码到物理页的偏移量推断结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OffsetOutcome {
    /// 多个参考章节投票得出；votes 按候选首次出现的顺序排列
    Voted { offset: i32, votes: Vec<(i32, usize)> },
    /// 没有任何参考章节命中正文，按扫描起点估算
    Estimated { offset: i32 },
}

impl OffsetOutcome {
    pub fn offset(&self) -> i32 {
        match self {
            OffsetOutcome::Voted { offset, .. } | OffsetOutcome::Estimated { offset } => *offset,
        }
    }

    pub fn is_estimated(&self) -> bool {
        matches!(self, OffsetOutcome::Estimated { .. })
    }
}

/// 1 起始物理页码：`book_page - 1 + offset + 1`
pub fn physical_page(book_page: u32, offset: i32) -> i64 {
    book_page as i64 - 1 + offset as i64 + 1
}

/// 投票参考：前 5 个纯数字编号的一级条目，没有则取前 3 条
pub fn select_references(entries: &[TocEntry]) -> Vec<&TocEntry> {
    let numbered: Vec<&TocEntry> = entries
        .iter()
        .filter(|e| e.level == 1 && !e.section_label.is_empty() && e.section_label.chars().all(|c| c.is_ascii_digit()))
        .take(5)
        .collect();
    if !numbered.is_empty() {
        return numbered;
    }
    entries.iter().take(3).collect()
}

/// 预读扫描窗口内每页的非空行
pub fn collect_scan_pages(
    source: &dyn DocumentSource,
    scan_start: usize,
    window: usize,
) -> TocResult<Vec<(usize, Vec<String>)>> {
    let end = (scan_start + window).min(source.page_count());
    (scan_start..end)
        .map(|i| Ok((i, source.page_line_texts(i)?)))
        .collect()
}

/// 多参考投票确定偏移量
///
/// `pages` 为 (0 起始物理页序号, 非空行) 列表，按物理顺序排列。
pub fn resolve_offset(entries: &[TocEntry], pages: &[(usize, Vec<String>)], scan_start: usize) -> OffsetOutcome {
    let mut votes: Vec<(i32, usize)> = Vec::new();

    for reference in select_references(entries) {
        let escaped = regex::escape(&reference.section_label);
        let (Ok(start_re), Ok(sub_re)) = (
            Regex::new(&format!(r"^{}\s+\S", escaped)),
            Regex::new(&format!(r"^{}\.", escaped)),
        ) else {
            continue;
        };

        let Some(page_index) = find_section_start(&start_re, &sub_re, pages) else {
            continue;
        };

        let candidate = page_index as i32 - (reference.book_page as i32 - 1);
        debug!(
            "'{}' 在第 {} 页，书页码 {}，候选偏移 {}",
            reference.section_label,
            page_index + 1,
            reference.book_page,
            candidate
        );
        match votes.iter_mut().find(|(offset, _)| *offset == candidate) {
            Some((_, count)) => *count += 1,
            None => votes.push((candidate, 1)),
        }
    }

    let mut best: Option<(i32, usize)> = None;
    for &(offset, count) in &votes {
        if best.map_or(true, |(_, c)| count > c) {
            best = Some((offset, count));
        }
    }

    match best {
        Some((offset, _)) => OffsetOutcome::Voted { offset, votes },
        None => OffsetOutcome::Estimated {
            offset: estimate_offset(entries, scan_start),
        },
    }
}

/// 没有投票时：假设编号为 "1" 的条目（没有则第一条）就在扫描起点
fn estimate_offset(entries: &[TocEntry], scan_start: usize) -> i32 {
    let first_book_page = entries
        .iter()
        .find(|e| e.section_label == "1")
        .or_else(|| entries.first())
        .map_or(1, |e| e.book_page);
    scan_start as i32 - (first_book_page as i32 - 1)
}

fn find_section_start(start_re: &Regex, sub_re: &Regex, pages: &[(usize, Vec<String>)]) -> Option<usize> {
    for (page_index, lines) in pages {
        let lines: Vec<&str> = lines.iter().map(|l| l.trim()).filter(|l| !l.is_empty()).collect();
        for (j, line) in lines.iter().take(HEAD_LINES).enumerate() {
            if !start_re.is_match(line) {
                continue;
            }
            let following = &lines[(j + 1).min(lines.len())..(j + 1 + FOLLOWING_LINES).min(lines.len())];
            let has_subsection = following.iter().any(|l| sub_re.is_match(l));
            // 页面靠下的命中多半是正文引用，除非紧跟子节
            if !following.is_empty() && !has_subsection && j >= DEEP_MATCH_LINE {
                continue;
            }
            return Some(*page_index);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(index: usize, lines: &[&str]) -> (usize, Vec<String>) {
        (index, lines.iter().map(|l| l.to_string()).collect())
    }

    #[test]
    fn single_reference_round_trip() {
        let entries = vec![TocEntry::new(1, "3", "基本规定", 5)];
        let pages = vec![
            page(10, &["2.1 术语", "正文"]),
            page(11, &["3 基本规定", "3.0.1 一般规定"]),
        ];
        let outcome = resolve_offset(&entries, &pages, 8);
        assert_eq!(outcome.offset(), 7);
        assert!(!outcome.is_estimated());
        assert_eq!(physical_page(5, outcome.offset()), 12);
    }

    #[test]
    fn majority_wins_and_ties_go_to_first_candidate() {
        let entries = vec![
            TocEntry::new(1, "1", "总则", 1),
            TocEntry::new(1, "2", "术语", 3),
            TocEntry::new(1, "3", "基本规定", 5),
        ];
        let pages = vec![
            page(6, &["1 总则"]),
            page(8, &["2 术语"]),
            page(9, &["3 基本规定"]),
        ];
        // 候选：1→6，2→6，3→5
        let outcome = resolve_offset(&entries, &pages, 6);
        assert_eq!(
            outcome,
            OffsetOutcome::Voted {
                offset: 6,
                votes: vec![(6, 2), (5, 1)]
            }
        );

        let tie = resolve_offset(&entries[1..], &pages, 6);
        assert_eq!(tie.offset(), 6);
    }

    #[test]
    fn deep_match_needs_following_subsection() {
        let entries = vec![TocEntry::new(1, "4", "荷载", 20)];
        let filler = ["a", "b", "c", "d", "e"];
        let mut reference_in_body: Vec<&str> = filler.to_vec();
        reference_in_body.extend(["4 荷载的规定见下文", "正文继续"]);
        let mut real_start: Vec<&str> = filler.to_vec();
        real_start.extend(["4 荷载", "4.1 一般规定"]);

        let pages = vec![page(24, &reference_in_body), page(26, &real_start)];
        assert_eq!(resolve_offset(&entries, &pages, 20).offset(), 26 - 19);
    }

    #[test]
    fn deep_match_at_page_end_is_accepted() {
        let entries = vec![TocEntry::new(1, "4", "荷载", 20)];
        let pages = vec![page(30, &["a", "b", "c", "d", "e", "f", "4 荷载"])];
        assert_eq!(resolve_offset(&entries, &pages, 20).offset(), 11);
    }

    #[test]
    fn no_votes_falls_back_to_estimate() {
        let entries = vec![
            TocEntry::new(1, "附录A", "材料", 40),
            TocEntry::new(1, "1", "总则", 3),
        ];
        let outcome = resolve_offset(&entries, &[page(10, &["无关内容"])], 10);
        assert_eq!(outcome, OffsetOutcome::Estimated { offset: 8 });
    }

    #[test]
    fn references_prefer_numeric_chapters() {
        let entries = vec![
            TocEntry::new(1, "条文说明", "", 90),
            TocEntry::new(2, "1.1", "a", 1),
            TocEntry::new(1, "1", "b", 1),
        ];
        let refs = select_references(&entries);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].section_label, "1");

        let no_numeric = vec![TocEntry::new(2, "1.1", "a", 1), TocEntry::new(2, "1.2", "b", 2)];
        assert_eq!(select_references(&no_numeric).len(), 2);
    }
}
