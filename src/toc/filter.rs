use regex::Regex;
use std::fmt;

/// 候选行被拒绝的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    TooLong,
    BelowThreshold,
    NoLetters,
    CodeWord,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Rejection::TooLong => "行过长",
            Rejection::BelowThreshold => "字号低于阈值",
            Rejection::NoLetters => "不含字母或汉字",
            Rejection::CodeWord => "含代码关键字",
        };
        f.write_str(reason)
    }
}

/// 单行标题准入检查，不含去重（去重见 [`super::TitleDedup`]）
pub struct HeadingFilter {
    max_chars: usize,
    margin: f32,
    letter_re: Regex,
    code_word_re: Regex,
}

impl HeadingFilter {
    pub fn new(max_chars: usize, margin: f32) -> Self {
        Self {
            max_chars,
            margin,
            letter_re: Regex::new(r"[a-zA-Z\x{4e00}-\x{9fff}]").expect("内置正则"),
            code_word_re: Regex::new(r"(?i)\b(null|true|false|none|undefined|nan)\b").expect("内置正则"),
        }
    }

    /// 标题字号下限
    pub fn threshold(&self, body_font_size: f32) -> f32 {
        body_font_size + self.margin
    }

    /// `font_size` 为行内最大字号；OCR 行没有字号时传 None，跳过阈值检查
    pub fn check(&self, text: &str, font_size: Option<f32>, body_font_size: f32) -> Result<(), Rejection> {
        if text.chars().count() > self.max_chars {
            return Err(Rejection::TooLong);
        }
        if let Some(size) = font_size {
            if size < self.threshold(body_font_size) {
                return Err(Rejection::BelowThreshold);
            }
        }
        if !self.letter_re.is_match(text) {
            return Err(Rejection::NoLetters);
        }
        if self.code_word_re.is_match(text) {
            return Err(Rejection::CodeWord);
        }
        Ok(())
    }

    pub fn accepts(&self, text: &str, font_size: Option<f32>, body_font_size: f32) -> bool {
        self.check(text, font_size, body_font_size).is_ok()
    }
}

impl Default for HeadingFilter {
    fn default() -> Self {
        Self::new(100, 1.5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn font_threshold_boundary() {
        let filter = HeadingFilter::default();
        assert_eq!(
            filter.check("3.2 材料", Some(11.4), 10.0),
            Err(Rejection::BelowThreshold)
        );
        assert!(filter.accepts("3.2 材料", Some(11.6), 10.0));
    }

    #[test]
    fn ocr_lines_skip_font_check() {
        assert!(HeadingFilter::default().accepts("1 总则", None, 10.0));
    }

    #[test]
    fn rejects_long_lines_and_code_words() {
        let filter = HeadingFilter::default();
        let long = format!("1 {}", "长".repeat(120));
        assert_eq!(filter.check(&long, Some(16.0), 10.0), Err(Rejection::TooLong));
        assert_eq!(
            filter.check("2 Return NULL values", Some(16.0), 10.0),
            Err(Rejection::CodeWord)
        );
        assert_eq!(
            filter.check("2 is_nan_check", Some(16.0), 10.0),
            Ok(())
        );
    }

    #[test]
    fn rejects_lines_without_letters() {
        assert_eq!(
            HeadingFilter::default().check("1.2 — 3", Some(16.0), 10.0),
            Err(Rejection::NoLetters)
        );
    }
}
