use serde::{Deserialize, Serialize};
use anyhow::Result;
use std::path::PathBuf;

/// 目录中没有数字编号的固定条目，如"条文说明"
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SpecialLabel {
    /// 行首字面前缀
    pub prefix: String,
    /// 规范化后的编号
    pub label: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LabelConfig {
    /// 按顺序匹配，长前缀在前
    pub specials: Vec<SpecialLabel>,
    /// 需要嵌套子目录的尾部专篇
    pub clause_marker: String,
    /// 书签列表最前面的"目录"条目标题
    pub contents_title: String,
}

impl LabelConfig {
    pub fn load() -> Result<Self> {
        let config_path = PathBuf::from("config/labels.toml");

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(config_path)?;
        let config: LabelConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// 行首匹配到的特殊条目：(规范编号, 前缀之后的剩余文本)
    pub fn match_special<'a>(&self, line: &'a str) -> Option<(&str, &'a str)> {
        self.specials
            .iter()
            .find(|s| line.starts_with(s.prefix.as_str()))
            .map(|s| (s.label.as_str(), &line[s.prefix.len()..]))
    }
}

impl Default for LabelConfig {
    fn default() -> Self {
        let specials = [
            ("附：条文说明", "条文说明"),
            ("标准用词说明", "标准用词说明"),
            ("本规范用词说明", "本规范用词说明"),
            ("引用标准名录", "引用标准名录"),
            ("条文说明", "条文说明"),
        ]
        .into_iter()
        .map(|(prefix, label)| SpecialLabel {
            prefix: prefix.to_string(),
            label: label.to_string(),
        })
        .collect();

        Self {
            specials,
            clause_marker: "条文说明".to_string(),
            contents_title: "目录".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longer_prefix_wins_over_bare_label() {
        let labels = LabelConfig::default();
        let (label, rest) = labels.match_special("附：条文说明（120）").unwrap();
        assert_eq!(label, "条文说明");
        assert_eq!(rest, "（120）");
    }

    #[test]
    fn unknown_prefix_is_none() {
        assert!(LabelConfig::default().match_special("3.2 基本规定 18").is_none());
    }
}
