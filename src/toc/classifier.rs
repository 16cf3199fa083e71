use regex::{Captures, Regex};

/// 中文数字字符集（章节编号只允许这些字符或阿拉伯数字）
pub const CJK_NUMERALS: &str = "一二三四五六七八九十百千";

/// 分类结果：层级 + 编号 + 供顺序校验的章/节号
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadingMatch {
    pub level: u8,
    /// 编号部分，如 "3.2"、"第三章"
    pub label: String,
    /// 所属章号；中文数字无法换算时为 None
    pub chapter: Option<u32>,
    pub section: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleKind {
    Numeric,
    CjkChapter,
    CjkSection,
}

struct Rule {
    pattern: Regex,
    level: u8,
    kind: RuleKind,
}

/// 按优先级排列的 (正则, 层级) 规则表，首个命中即返回。
///
/// 高层级编号是低层级编号的严格前缀（`1.1.1` ⊃ `1.1` ⊃ `1`），所以三段式必须
/// 排在最前。
pub struct PatternClassifier {
    rules: Vec<Rule>,
    /// 一级数字标题的总长度上限；Some 时还要求标题部分含汉字
    level1_max_chars: Option<usize>,
    cjk_re: Regex,
}

impl PatternClassifier {
    /// 有字号信号时使用：字号阈值已足够过滤，一级标题不加额外限制
    pub fn font_mode() -> Self {
        Self::build(None)
    }

    /// 纯文本/OCR 模式：一级标题须短且标题部分含汉字，排除游离的数字行
    pub fn text_mode(level1_max_chars: usize) -> Self {
        Self::build(Some(level1_max_chars))
    }

    fn build(level1_max_chars: Option<usize>) -> Self {
        let num = format!("[{}\\d]+", CJK_NUMERALS);
        let rules = vec![
            Rule {
                pattern: Regex::new(r"^(\d+)\.(\d+)\.(\d+)\s+[^\d\s]").expect("内置正则"),
                level: 3,
                kind: RuleKind::Numeric,
            },
            Rule {
                pattern: Regex::new(r"^(\d+)\.(\d+)\s+[^\d\s]").expect("内置正则"),
                level: 2,
                kind: RuleKind::Numeric,
            },
            Rule {
                pattern: Regex::new(r"^([1-9]\d?)\s+[^\d\s]").expect("内置正则"),
                level: 1,
                kind: RuleKind::Numeric,
            },
            Rule {
                pattern: Regex::new(&format!(r"^(第\s*({})\s*[章篇卷部])\s*\S", num)).expect("内置正则"),
                level: 1,
                kind: RuleKind::CjkChapter,
            },
            Rule {
                pattern: Regex::new(&format!(r"^(第\s*({})\s*节)\s*\S", num)).expect("内置正则"),
                level: 2,
                kind: RuleKind::CjkSection,
            },
        ];

        Self {
            rules,
            level1_max_chars,
            cjk_re: Regex::new(r"[\x{4e00}-\x{9fff}]").expect("内置正则"),
        }
    }

    pub fn classify(&self, line: &str) -> Option<HeadingMatch> {
        let text = line.trim();

        for rule in &self.rules {
            let Some(caps) = rule.pattern.captures(text) else {
                continue;
            };

            match rule.kind {
                RuleKind::Numeric => {
                    if rule.level == 1 && !self.level1_allowed(text, &caps) {
                        continue;
                    }
                    return Some(numeric_match(rule.level, &caps));
                }
                RuleKind::CjkChapter => {
                    return Some(HeadingMatch {
                        level: rule.level,
                        label: compact(&caps[1]),
                        chapter: parse_cjk_numeral(&caps[2]),
                        section: None,
                    });
                }
                RuleKind::CjkSection => {
                    return Some(HeadingMatch {
                        level: rule.level,
                        label: compact(&caps[1]),
                        chapter: None,
                        section: parse_cjk_numeral(&caps[2]),
                    });
                }
            }
        }

        None
    }

    pub fn level_of(&self, line: &str) -> Option<u8> {
        self.classify(line).map(|m| m.level)
    }

    fn level1_allowed(&self, text: &str, caps: &Captures) -> bool {
        let Some(max_chars) = self.level1_max_chars else {
            return true;
        };
        if text.chars().count() > max_chars {
            return false;
        }
        let title_part = &text[caps.get(1).map_or(0, |m| m.end())..];
        self.cjk_re.is_match(title_part)
    }
}

fn numeric_match(level: u8, caps: &Captures) -> HeadingMatch {
    let segments: Vec<&str> = (1..=level as usize)
        .filter_map(|i| caps.get(i).map(|m| m.as_str()))
        .collect();
    HeadingMatch {
        level,
        label: segments.join("."),
        chapter: segments.first().and_then(|s| s.parse().ok()),
        section: segments.get(1).and_then(|s| s.parse().ok()),
    }
}

fn compact(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

/// 中文数字或阿拉伯数字转整数："十二" → 12，"二十" → 20，"3" → 3
pub fn parse_cjk_numeral(text: &str) -> Option<u32> {
    if text.chars().all(|c| c.is_ascii_digit()) {
        return text.parse().ok();
    }

    let mut total = 0u32;
    let mut current: Option<u32> = None;
    for c in text.chars() {
        let digit = match c {
            '一' => Some(1),
            '二' => Some(2),
            '三' => Some(3),
            '四' => Some(4),
            '五' => Some(5),
            '六' => Some(6),
            '七' => Some(7),
            '八' => Some(8),
            '九' => Some(9),
            _ => None,
        };
        if let Some(d) = digit {
            if current.is_some() {
                // "一二" 这类连写不是合法数字
                return None;
            }
            current = Some(d);
            continue;
        }
        let unit = match c {
            '十' => 10,
            '百' => 100,
            '千' => 1000,
            _ => return None,
        };
        total += current.take().unwrap_or(1) * unit;
    }

    let value = total + current.unwrap_or(0);
    (value > 0).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_segment_line_is_level_two_not_level_one() {
        let classifier = PatternClassifier::font_mode();
        let m = classifier.classify("1.1 Title").unwrap();
        assert_eq!(m.level, 2);
        assert_eq!(m.label, "1.1");
        assert_eq!((m.chapter, m.section), (Some(1), Some(1)));
    }

    #[test]
    fn three_segment_line_beats_shorter_prefixes() {
        let classifier = PatternClassifier::text_mode(25);
        let m = classifier.classify("3.2.1 混凝土强度").unwrap();
        assert_eq!(m.level, 3);
        assert_eq!(m.label, "3.2.1");
    }

    #[test]
    fn title_must_start_with_non_digit() {
        let classifier = PatternClassifier::font_mode();
        assert!(classifier.classify("3.2 18").is_none());
        assert!(classifier.classify("12 34 56").is_none());
        assert!(classifier.classify("3.2材料").is_none());
    }

    #[test]
    fn level_one_accepts_latin_titles_in_font_mode() {
        let classifier = PatternClassifier::font_mode();
        assert_eq!(classifier.level_of("1 Introduction"), Some(1));
        assert_eq!(classifier.level_of("100 Introduction"), None);
    }

    #[test]
    fn text_mode_level_one_needs_short_cjk_title() {
        let classifier = PatternClassifier::text_mode(20);
        assert_eq!(classifier.level_of("1 总则"), Some(1));
        assert_eq!(classifier.level_of("1 Introduction"), None);
        assert_eq!(
            classifier.level_of("5 本条规定了混凝土结构设计中应当遵守的全部基本要求"),
            None
        );
    }

    #[test]
    fn cjk_chapter_and_section() {
        let classifier = PatternClassifier::font_mode();
        let chapter = classifier.classify("第三章 基本规定").unwrap();
        assert_eq!(chapter.level, 1);
        assert_eq!(chapter.label, "第三章");
        assert_eq!(chapter.chapter, Some(3));

        let part = classifier.classify("第 12 篇 附件").unwrap();
        assert_eq!(part.level, 1);
        assert_eq!(part.chapter, Some(12));

        let section = classifier.classify("第二节 材料").unwrap();
        assert_eq!(section.level, 2);
        assert_eq!(section.section, Some(2));

        assert!(classifier.classify("第三章").is_none());
        assert!(classifier.classify("第X章 其他").is_none());
    }

    #[test]
    fn cjk_numerals() {
        assert_eq!(parse_cjk_numeral("一"), Some(1));
        assert_eq!(parse_cjk_numeral("十"), Some(10));
        assert_eq!(parse_cjk_numeral("十二"), Some(12));
        assert_eq!(parse_cjk_numeral("二十"), Some(20));
        assert_eq!(parse_cjk_numeral("二十三"), Some(23));
        assert_eq!(parse_cjk_numeral("一百"), Some(100));
        assert_eq!(parse_cjk_numeral("42"), Some(42));
        assert_eq!(parse_cjk_numeral("一二"), None);
    }

    #[test]
    fn plain_prose_is_not_a_heading() {
        let classifier = PatternClassifier::font_mode();
        assert!(classifier.classify("本规范适用于房屋建筑").is_none());
        assert!(classifier.classify("").is_none());
    }
}
