use regex::Regex;
use tracing::debug;

use super::TocEntry;
use crate::config::LabelConfig;

/// 目录页码上限，超过视为年份等误识别
pub const DEFAULT_MAX_BOOK_PAGE: u32 = 600;

/// 一批目录行的解析结果
#[derive(Debug, Clone, Default)]
pub struct ParsedContents {
    pub entries: Vec<TocEntry>,
    /// 预处理后未能解析的行，按原顺序
    pub unparsed: Vec<String>,
}

/// 目录页文本行解析器
///
/// 依次尝试附录、特殊条目、数字编号三种格式；条目必须带页码（"1" 章例外）。
pub struct ContentsParser {
    labels: LabelConfig,
    max_page: u32,
    appendix_re: Regex,
    appendix_head_re: Regex,
    numbered_re: Regex,
    bracket_page_re: Regex,
    bare_page_re: Regex,
    trailing_re: Regex,
    trailing_digits_re: Regex,
    closing_re: Regex,
    entry_start_re: Regex,
}

impl ContentsParser {
    pub fn new(labels: LabelConfig, max_page: u32) -> Self {
        Self {
            labels,
            max_page,
            appendix_re: Regex::new(r"^附录\s*([A-Za-z])\s*(.*)$").expect("内置正则"),
            appendix_head_re: Regex::new(r"^附录\s*[A-Za-z]").expect("内置正则"),
            numbered_re: Regex::new(r"^([1-9]\d*(?:\.\d+)*)\s*(.*)$").expect("内置正则"),
            bracket_page_re: Regex::new(r"[（(\[【\x{ff3b}]\s*[=＝]?\s*(\d{1,4})\s*[）)\]】\x{ff3d}]\s*$")
                .expect("内置正则"),
            bare_page_re: Regex::new(r"(?:^|\D)(\d{1,4})\s*$").expect("内置正则"),
            trailing_re: Regex::new(
                r"[\x{2026}\x{00b7}\x{ff0e}\x{ff0c}.\s\x{ff08}\x{ff3b}【(\x{ff1a}:\x{3001}\x{ff09}】\x{ff3d}]+$",
            )
            .expect("内置正则"),
            trailing_digits_re: Regex::new(r"\d+\s*$").expect("内置正则"),
            closing_re: Regex::new(r"([）)】\]])\s*").expect("内置正则"),
            entry_start_re: Regex::new(
                r"^(?:[1-9]\d*(?:\.\d+)?\s*[\x{4e00}-\x{9fff}]|附录\s*[A-Za-z]|附：|标准用词|本规范用词|引用标准)",
            )
            .expect("内置正则"),
        }
    }

    /// 合并被拆成两行的附录标题，拆开粘在一行里的多个条目，丢弃空行
    pub fn preprocess<S: AsRef<str>>(&self, lines: &[S]) -> Vec<String> {
        let mut merged: Vec<String> = Vec::new();
        let mut i = 0;
        while i < lines.len() {
            let mut line = lines[i].as_ref().trim().to_string();
            i += 1;
            if line.is_empty() {
                continue;
            }

            if self.appendix_head_re.is_match(&line)
                && !self.trailing_digits_re.is_match(&line)
                && !ends_with_closing(&line)
            {
                while i < lines.len() && lines[i].as_ref().trim().is_empty() {
                    i += 1;
                }
                if let Some(next) = lines.get(i) {
                    line.push_str(next.as_ref().trim());
                    i += 1;
                }
            }
            merged.push(line);
        }

        merged.iter().flat_map(|line| self.split_merged(line)).collect()
    }

    fn split_merged(&self, line: &str) -> Vec<String> {
        let mut parts = Vec::new();
        let mut start = 0;
        for caps in self.closing_re.captures_iter(line) {
            let (Some(whole), Some(closing)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if self.entry_start_re.is_match(&line[whole.end()..]) {
                parts.push(line[start..closing.end()].trim().to_string());
                start = whole.end();
            }
        }
        parts.push(line[start..].trim().to_string());
        parts.retain(|p| !p.is_empty());
        parts
    }

    /// 解析一行（已预处理）
    pub fn parse_line(&self, line: &str) -> Option<TocEntry> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        if let Some(caps) = self.appendix_re.captures(line) {
            let label = format!("附录{}", caps[1].to_uppercase());
            let rest = caps.get(2).map_or("", |m| m.as_str());
            if let Some((start, page)) = self.find_page(rest) {
                if self.page_in_range(page) {
                    let title = self.clean_title(&rest[..start]);
                    let title = if title.is_empty() { label.clone() } else { title };
                    return Some(TocEntry::new(1, label, title, page));
                }
            }
        }

        for special in &self.labels.specials {
            let Some(rest) = line.strip_prefix(special.prefix.as_str()) else {
                continue;
            };
            if let Some((_, page)) = self.find_page(rest) {
                if self.page_in_range(page) {
                    return Some(TocEntry::new(1, special.label.clone(), "", page));
                }
            }
        }

        let caps = self.numbered_re.captures(line)?;
        let label = caps[1].to_string();
        let rest = caps.get(2).map_or("", |m| m.as_str()).trim();
        if rest.is_empty() {
            return None;
        }

        let Some((start, page)) = self.find_page(rest) else {
            // 第 1 章常常没有印页码
            if label == "1" {
                let title = self.clean_title(rest);
                if !title.is_empty() {
                    return Some(TocEntry::new(1, label, title, 1));
                }
            }
            return None;
        };
        if !self.page_in_range(page) {
            return None;
        }

        let title = self.clean_title(&rest[..start]);
        if title.is_empty() {
            return None;
        }
        let level = label.split('.').count().min(u8::MAX as usize) as u8;
        Some(TocEntry::new(level, label, title, page))
    }

    /// 预处理后逐行解析
    pub fn parse<S: AsRef<str>>(&self, lines: &[S]) -> ParsedContents {
        let mut parsed = ParsedContents::default();
        for line in self.preprocess(lines) {
            match self.parse_line(&line) {
                Some(entry) => {
                    debug!(
                        "L{} {} p={} '{}'",
                        entry.level, entry.section_label, entry.book_page, entry.title
                    );
                    parsed.entries.push(entry);
                }
                None => parsed.unparsed.push(line),
            }
        }
        parsed
    }

    /// 行尾页码：(页码起始字节位置, 页码)，括号形式优先
    fn find_page(&self, text: &str) -> Option<(usize, u32)> {
        let (start, digits) = match self.bracket_page_re.captures(text) {
            Some(caps) => (caps.get(0)?.start(), caps.get(1)?),
            None => {
                // 超过 4 位的数字串整体不算页码
                let digits = self.bare_page_re.captures(text)?.get(1)?;
                (digits.start(), digits)
            }
        };
        let page = digits.as_str().parse().ok()?;
        Some((start, page))
    }

    fn page_in_range(&self, page: u32) -> bool {
        (1..=self.max_page).contains(&page)
    }

    fn clean_title(&self, text: &str) -> String {
        self.trailing_re.replace(text, "").trim().to_string()
    }
}

impl Default for ContentsParser {
    fn default() -> Self {
        Self::new(LabelConfig::default(), DEFAULT_MAX_BOOK_PAGE)
    }
}

fn ends_with_closing(line: &str) -> bool {
    matches!(line.trim_end().chars().last(), Some('）' | ')' | '】' | ']'))
}

/// 用默认特殊条目表解析目录行
pub fn parse_contents_lines<S: AsRef<str>>(lines: &[S]) -> Vec<TocEntry> {
    ContentsParser::default().parse(lines).entries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Option<TocEntry> {
        ContentsParser::default().parse_line(line)
    }

    #[test]
    fn numbered_section_with_bare_page() {
        assert_eq!(
            parse("3.2 材料强度标准值与设计值规定 18"),
            Some(TocEntry::new(2, "3.2", "材料强度标准值与设计值规定", 18))
        );
    }

    #[test]
    fn appendix_with_fullwidth_bracket_page() {
        assert_eq!(
            parse("附录A 基本符号（49）"),
            Some(TocEntry::new(1, "附录A", "基本符号", 49))
        );
        assert_eq!(parse("附录 b（52）"), Some(TocEntry::new(1, "附录B", "附录B", 52)));
    }

    #[test]
    fn four_digit_page_is_rejected() {
        assert_eq!(parse("1.3 标准修订说明 2024"), None);
        assert_eq!(parse("附录C 修订记录 2024"), None);
    }

    #[test]
    fn five_digit_suffix_is_not_a_page() {
        assert_eq!(parse("1.2 标题 10050"), None);
        assert_eq!(parse("附录D 记录表 12345"), None);
        assert_eq!(parse("1.2 标题 0050").map(|e| e.book_page), Some(50));
    }

    #[test]
    fn bracketed_page_forms() {
        assert_eq!(parse("2.1 术语 (=12)").map(|e| e.book_page), Some(12));
        assert_eq!(parse("2.1 术语 [12]").map(|e| e.book_page), Some(12));
        assert_eq!(parse("2.1 术语【12】").map(|e| e.book_page), Some(12));
        assert_eq!(parse("2.1 术语 ……………… 12").map(|e| e.title), Some("术语".to_string()));
        assert_eq!(parse("2.1 术语·····（＝12）").map(|e| e.title), Some("术语".to_string()));
    }

    #[test]
    fn special_labels_have_empty_title() {
        assert_eq!(
            parse("附：条文说明（120）"),
            Some(TocEntry::new(1, "条文说明", "", 120))
        );
        assert_eq!(
            parse("本规范用词说明 97"),
            Some(TocEntry::new(1, "本规范用词说明", "", 97))
        );
        assert_eq!(parse("条文说明"), None);
    }

    #[test]
    fn chapter_one_without_page_defaults_to_first_page() {
        assert_eq!(parse("1 总则"), Some(TocEntry::new(1, "1", "总则", 1)));
        assert_eq!(parse("2 术语"), None);
    }

    #[test]
    fn empty_title_is_rejected() {
        assert_eq!(parse("3.2 18"), None);
        assert_eq!(parse("3.2 ……（18）"), None);
    }

    #[test]
    fn appendix_split_across_lines_is_merged() {
        let parser = ContentsParser::default();
        let lines = parser.preprocess(&["附录A", "", "基本符号 49", "附录B 材料（52）"]);
        assert_eq!(lines, vec!["附录A基本符号 49", "附录B 材料（52）"]);
    }

    #[test]
    fn merged_entries_are_split_after_closing_bracket() {
        let parser = ContentsParser::default();
        let lines = parser.preprocess(&["1 总则（1）2 术语（3） 附录A 基本符号（49）本规范用词说明（97）"]);
        assert_eq!(
            lines,
            vec!["1 总则（1）", "2 术语（3）", "附录A 基本符号（49）", "本规范用词说明（97）"]
        );
        // 括号后不是新条目时不拆
        assert_eq!(parser.preprocess(&["3.1 一般规定（见注）说明 7"]).len(), 1);
    }

    #[test]
    fn parse_reports_unparsed_lines() {
        let parser = ContentsParser::default();
        let parsed = parser.parse(&["目  录", "1 总则 1", "2 术语 3", "前言 Ⅰ"]);
        assert_eq!(parsed.entries.len(), 2);
        assert_eq!(parsed.unparsed, vec!["目  录", "前言 Ⅰ"]);
        assert_eq!(parse_contents_lines(&["1 总则 1", "2 术语 3"]).len(), 2);
    }
}
