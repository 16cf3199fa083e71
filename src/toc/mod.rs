pub mod classifier;
pub mod contents_parser;
pub mod detect;
pub mod filter;
pub mod font_stats;
pub mod normalize;
pub mod offset;
pub mod pipeline;
pub mod validator;

pub use classifier::{HeadingMatch, PatternClassifier};
pub use contents_parser::{parse_contents_lines, ContentsParser};
pub use detect::{detect_clause_pages, detect_contents_pages, select_contents_pages, ContentsScorer, PageScore};
pub use filter::{HeadingFilter, Rejection};
pub use font_stats::estimate_body_font_size;
pub use normalize::{normalize_levels, TitleDedup};
pub use offset::{resolve_offset, OffsetOutcome};
pub use pipeline::{build_bookmarks, ContentsOutcome, TocPipeline};
pub use validator::SequentialValidator;

use serde::{Deserialize, Serialize};

/// 正文扫描得到的标题候选，只在一次提取内有效
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadingCandidate {
    pub text: String,
    pub level: u8,
    /// 0 起始的物理页序号
    pub page_index: usize,
    pub font_size: Option<f32>,
}

/// 目录页上的一条记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocEntry {
    pub level: u8,
    /// 去重与排序键，如 "3.2"、"附录A"、"条文说明"
    pub section_label: String,
    pub title: String,
    /// 书内印刷页码
    pub book_page: u32,
}

impl TocEntry {
    pub fn new(level: u8, section_label: impl Into<String>, title: impl Into<String>, book_page: u32) -> Self {
        Self {
            level,
            section_label: section_label.into(),
            title: title.into(),
            book_page,
        }
    }

    /// 书签显示标题："编号  标题"，无标题时只用编号
    pub fn display_title(&self) -> String {
        if self.title.is_empty() {
            self.section_label.clone()
        } else {
            format!("{}  {}", self.section_label, self.title)
        }
    }
}

/// 输出单元：写回 PDF 大纲的一条书签
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmark {
    pub level: u8,
    pub title: String,
    /// 1 起始的物理页码
    pub physical_page: u32,
}

impl Bookmark {
    pub fn new(level: u8, title: impl Into<String>, physical_page: u32) -> Self {
        Self {
            level,
            title: title.into(),
            physical_page,
        }
    }
}

impl From<HeadingCandidate> for Bookmark {
    fn from(candidate: HeadingCandidate) -> Self {
        Self {
            level: candidate.level,
            title: candidate.text,
            physical_page: candidate.page_index as u32 + 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_title_falls_back_to_label() {
        assert_eq!(TocEntry::new(1, "条文说明", "", 120).display_title(), "条文说明");
        assert_eq!(
            TocEntry::new(2, "3.2", "材料强度", 18).display_title(),
            "3.2  材料强度"
        );
    }

    #[test]
    fn candidate_page_index_becomes_one_based() {
        let candidate = HeadingCandidate {
            text: "1 总则".to_string(),
            level: 1,
            page_index: 0,
            font_size: Some(14.0),
        };
        assert_eq!(Bookmark::from(candidate).physical_page, 1);
    }
}
