use std::collections::HashMap;

use crate::source::TextRun;

/// 没有可统计的文字时使用的正文字号
pub const DEFAULT_BODY_FONT_SIZE: f32 = 10.0;

/// 正文字号 = 全文 run 字号的众数（0.1pt 分桶）
///
/// 只统计去空白后多于 3 个字符的 run；并列时取最先出现的字号。
pub fn estimate_body_font_size<'a, I>(runs: I) -> f32
where
    I: IntoIterator<Item = &'a TextRun>,
{
    let mut order: Vec<i32> = Vec::new();
    let mut counts: HashMap<i32, usize> = HashMap::new();

    for run in runs {
        if run.font_size <= 0.0 || run.text.trim().chars().count() <= 3 {
            continue;
        }
        let bucket = (run.font_size * 10.0).round() as i32;
        let count = counts.entry(bucket).or_insert(0);
        if *count == 0 {
            order.push(bucket);
        }
        *count += 1;
    }

    let mut best: Option<(i32, usize)> = None;
    for bucket in order {
        let count = counts[&bucket];
        if best.map_or(true, |(_, c)| count > c) {
            best = Some((bucket, count));
        }
    }

    best.map_or(DEFAULT_BODY_FONT_SIZE, |(bucket, _)| bucket as f32 / 10.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(text: &str, size: f32) -> TextRun {
        TextRun::new(text, size)
    }

    #[test]
    fn mode_of_body_runs() {
        let runs = vec![
            run("1 Introduction", 16.0),
            run("Body paragraph one", 10.02),
            run("Body paragraph two", 9.98),
            run("Body paragraph three", 10.0),
            run("1.1 Scope", 13.0),
        ];
        assert_eq!(estimate_body_font_size(&runs), 10.0);
    }

    #[test]
    fn short_runs_and_zero_sizes_are_ignored() {
        let runs = vec![
            run("12", 8.0),
            run("ab", 8.0),
            run("  xyz  ", 8.0),
            run("Body text", 0.0),
            run("Real body", 11.0),
        ];
        assert_eq!(estimate_body_font_size(&runs), 11.0);
    }

    #[test]
    fn tie_goes_to_first_seen_size() {
        let runs = vec![run("first size", 12.0), run("second size", 9.0)];
        assert_eq!(estimate_body_font_size(&runs), 12.0);
    }

    #[test]
    fn empty_document_uses_default() {
        assert_eq!(estimate_body_font_size(&Vec::<TextRun>::new()), DEFAULT_BODY_FONT_SIZE);
    }
}
