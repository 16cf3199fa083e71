use std::collections::HashSet;

use super::Bookmark;
use crate::utils::truncate_chars;

/// 修复层级跳跃：每一项最多比前一项深一级（首项视前一项为 1 级）
///
/// 多次调用结果不变。
pub fn normalize_levels(bookmarks: &mut [Bookmark]) {
    let mut prev = 1u8;
    for bookmark in bookmarks.iter_mut() {
        let level = bookmark.level.clamp(1, prev.saturating_add(1));
        bookmark.level = level;
        prev = level;
    }
}

/// 按截断后的标题去重，先出现者保留
#[derive(Debug, Clone)]
pub struct TitleDedup {
    key_chars: usize,
    seen: HashSet<String>,
}

impl TitleDedup {
    pub fn new(key_chars: usize) -> Self {
        Self {
            key_chars,
            seen: HashSet::new(),
        }
    }

    /// 首次出现返回 true 并记录
    pub fn insert(&mut self, title: &str) -> bool {
        let key = truncate_chars(title.trim(), self.key_chars).to_string();
        self.seen.insert(key)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn levels(bookmarks: &[Bookmark]) -> Vec<u8> {
        bookmarks.iter().map(|b| b.level).collect()
    }

    fn from_levels(levels: &[u8]) -> Vec<Bookmark> {
        levels
            .iter()
            .enumerate()
            .map(|(i, &l)| Bookmark::new(l, format!("h{}", i), i as u32 + 1))
            .collect()
    }

    #[test]
    fn level_jumps_are_clamped() {
        let mut bookmarks = from_levels(&[3, 1, 3, 2, 2, 1, 3]);
        normalize_levels(&mut bookmarks);
        assert_eq!(levels(&bookmarks), vec![2, 1, 2, 2, 2, 1, 2]);
    }

    #[test]
    fn normalizing_twice_changes_nothing() {
        let mut bookmarks = from_levels(&[2, 3, 1, 3, 3, 2, 1, 2, 3]);
        normalize_levels(&mut bookmarks);
        let once = bookmarks.clone();
        normalize_levels(&mut bookmarks);
        assert_eq!(bookmarks, once);
        for pair in bookmarks.windows(2) {
            assert!(pair[1].level <= pair[0].level + 1);
        }
    }

    #[test]
    fn dedup_keeps_first_and_compares_prefix() {
        let mut dedup = TitleDedup::new(5);
        assert!(dedup.insert("3.2 材料强度"));
        assert!(!dedup.insert("3.2 材料强度"));
        // 前 5 个字符相同即视为重复
        assert!(!dedup.insert("3.2 材料性能"));
        assert!(dedup.insert("3.3 荷载"));
        assert_eq!(dedup.len(), 2);
    }

    #[test]
    fn dedup_is_stable_across_order() {
        let titles = ["1 总则", "2 术语", "1 总则", "3 基本规定", "2 术语"];
        let mut dedup = TitleDedup::new(80);
        let kept: Vec<&str> = titles.iter().copied().filter(|t| dedup.insert(t)).collect();
        assert_eq!(kept, vec!["1 总则", "2 术语", "3 基本规定"]);
    }
}
