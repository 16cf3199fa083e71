use super::HeadingMatch;

/// 章节号顺序校验（OCR 模式下过滤乱序误识别）
///
/// 章号只能逐一递增；节所属章可以领先当前章一章，此时视为漏识别了章标题，
/// 隐式升章。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SequentialValidator {
    last_level1: u32,
    last_level2_chapter: u32,
    last_level2_section: u32,
}

impl SequentialValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_chapter(&self) -> u32 {
        self.last_level1
    }

    /// 校验并推进状态；返回 false 的候选应丢弃
    pub fn accept(&mut self, heading: &HeadingMatch) -> bool {
        match heading.level {
            1 => self.accept_chapter(heading.chapter),
            // 中文"第X节"不带章号，归入当前章
            2 => self.accept_section(
                heading.chapter.unwrap_or(self.last_level1),
                heading.section.unwrap_or(0),
            ),
            _ => false,
        }
    }

    fn accept_chapter(&mut self, chapter: Option<u32>) -> bool {
        let ch = match chapter {
            Some(ch) => {
                if ch <= self.last_level1 || ch > self.last_level1 + 1 {
                    return false;
                }
                ch
            }
            // 无法换算的中文章号不做校验
            None => self.last_level1 + 1,
        };
        self.last_level1 = ch;
        self.last_level2_chapter = 0;
        self.last_level2_section = 0;
        true
    }

    fn accept_section(&mut self, ch: u32, sec: u32) -> bool {
        if ch < self.last_level1 || ch > self.last_level1 + 1 {
            return false;
        }
        if ch == self.last_level2_chapter && sec <= self.last_level2_section {
            return false;
        }
        if ch > self.last_level1 {
            self.last_level1 = ch;
        }
        self.last_level2_chapter = ch;
        self.last_level2_section = sec;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chapter(ch: u32) -> HeadingMatch {
        HeadingMatch {
            level: 1,
            label: ch.to_string(),
            chapter: Some(ch),
            section: None,
        }
    }

    fn section(ch: u32, sec: u32) -> HeadingMatch {
        HeadingMatch {
            level: 2,
            label: format!("{}.{}", ch, sec),
            chapter: Some(ch),
            section: Some(sec),
        }
    }

    #[test]
    fn consecutive_chapters_are_accepted() {
        let mut v = SequentialValidator::new();
        assert!(v.accept(&chapter(1)));
        assert!(v.accept(&chapter(2)));
        assert!(v.accept(&chapter(3)));
    }

    #[test]
    fn skipped_chapter_is_rejected() {
        let mut v = SequentialValidator::new();
        assert!(v.accept(&chapter(1)));
        assert!(!v.accept(&chapter(3)));
        assert_eq!(v.current_chapter(), 1);
    }

    #[test]
    fn backwards_chapter_is_rejected() {
        let mut v = SequentialValidator::new();
        assert!(!v.accept(&chapter(2)));
        let mut v = SequentialValidator::new();
        assert!(v.accept(&chapter(1)));
        assert!(v.accept(&chapter(2)));
        assert!(!v.accept(&chapter(1)));
    }

    #[test]
    fn sections_must_increase_within_chapter() {
        let mut v = SequentialValidator::new();
        assert!(v.accept(&chapter(1)));
        assert!(v.accept(&section(1, 1)));
        assert!(v.accept(&section(1, 2)));
        assert!(!v.accept(&section(1, 2)));
        assert!(!v.accept(&section(1, 1)));
    }

    #[test]
    fn section_of_next_chapter_advances_implicitly() {
        let mut v = SequentialValidator::new();
        assert!(v.accept(&chapter(1)));
        assert!(v.accept(&section(2, 1)));
        assert_eq!(v.current_chapter(), 2);
        // 第 2 章标题在此之后出现时已不再递增
        assert!(!v.accept(&chapter(2)));
        assert!(v.accept(&chapter(3)));
        assert!(!v.accept(&section(2, 5)));
    }

    #[test]
    fn unknown_cjk_chapter_always_advances() {
        let mut v = SequentialValidator::new();
        let unknown = HeadingMatch {
            level: 1,
            label: "第X章".to_string(),
            chapter: None,
            section: None,
        };
        assert!(v.accept(&unknown));
        assert!(v.accept(&unknown));
        assert_eq!(v.current_chapter(), 2);
        assert!(v.accept(&chapter(3)));
    }

    #[test]
    fn cjk_section_belongs_to_current_chapter() {
        let mut v = SequentialValidator::new();
        assert!(v.accept(&chapter(1)));
        let cjk = HeadingMatch {
            level: 2,
            label: "第一节".to_string(),
            chapter: None,
            section: Some(1),
        };
        assert!(v.accept(&cjk));
        assert!(!v.accept(&cjk));
    }

    #[test]
    fn level_three_is_rejected() {
        let mut v = SequentialValidator::new();
        let clause = HeadingMatch {
            level: 3,
            label: "1.1.1".to_string(),
            chapter: Some(1),
            section: Some(1),
        };
        assert!(!v.accept(&clause));
    }
}
