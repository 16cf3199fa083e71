pub mod labels;

use serde::{Deserialize, Serialize};
use anyhow::{Context, Result};

pub use labels::{LabelConfig, SpecialLabel};

pub const SETTINGS_PATH: &str = "config/settings.toml";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub ocr: OcrConfig,
    pub layout_service: LayoutServiceConfig,
    pub semantic_parser: SemanticParserConfig,
    pub pipeline: PipelineConfig,
    pub storage: StorageConfig,
}

/// 本地 OCR 与页面渲染
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OcrConfig {
    pub engine_path: String,
    pub renderer_path: String,
    /// tesseract 语言模型，中英混排
    pub languages: String,
    pub page_segmentation_mode: u32,
    /// 渲染 DPI
    pub scan_resolution: u32,
}

/// MinerU 版面分析云服务
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LayoutServiceConfig {
    pub endpoint: String,
    pub credential: String,
    pub poll_interval_secs: u64,
    pub max_poll_attempts: u32,
    pub request_timeout_secs: u64,
    pub transfer_timeout_secs: u64,
}

/// 大模型目录解析
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SemanticParserConfig {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub max_lines: usize,
    pub proxy: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// 标题字号至少比正文大多少 pt
    pub heading_margin: f32,
    pub max_line_chars: usize,
    pub level1_max_chars: usize,
    pub dedup_key_chars: usize,
    pub ocr_dedup_key_chars: usize,
    pub max_book_page: u32,
    pub offset_scan_pages: usize,
    pub detect_scan_pages: usize,
    pub clause_scan_pages: usize,
    pub toc_page_hit_limit: usize,
    pub decision_timeout_secs: u64,
    pub job_ttl_secs: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    pub database_path: String,
    pub work_dir: String,
}

impl AppConfig {
    /// 默认值 ← config/settings.toml ← TOCMARK__SECTION__KEY 环境变量
    pub fn load() -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::Config::try_from(&Self::default())?)
            .add_source(::config::File::with_name(SETTINGS_PATH).required(false))
            .add_source(
                ::config::Environment::with_prefix("TOCMARK")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("加载配置失败")?;

        let config: AppConfig = settings.try_deserialize().context("配置格式错误")?;
        Ok(config)
    }

    pub fn save(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ocr: OcrConfig {
                engine_path: "tesseract".to_string(),
                renderer_path: "pdftoppm".to_string(),
                languages: "chi_sim+eng".to_string(),
                page_segmentation_mode: 3,
                scan_resolution: 150,
            },
            layout_service: LayoutServiceConfig {
                endpoint: "https://mineru.net/api/v4".to_string(),
                credential: String::new(),
                poll_interval_secs: 5,
                max_poll_attempts: 120,
                request_timeout_secs: 30,
                transfer_timeout_secs: 120,
            },
            semantic_parser: SemanticParserConfig {
                api_url: "https://api.deepseek.com/chat/completions".to_string(),
                api_key: String::new(),
                model: "deepseek-chat".to_string(),
                max_tokens: 4096,
                max_lines: 300,
                proxy: String::new(),
            },
            pipeline: PipelineConfig::default(),
            storage: StorageConfig {
                database_path: "./data/jobs.db".to_string(),
                work_dir: "./data/jobs".to_string(),
            },
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            heading_margin: 1.5,
            max_line_chars: 100,
            level1_max_chars: 25,
            dedup_key_chars: 80,
            ocr_dedup_key_chars: 50,
            max_book_page: 600,
            offset_scan_pages: 80,
            detect_scan_pages: 25,
            clause_scan_pages: 15,
            toc_page_hit_limit: 8,
            decision_timeout_secs: 600,
            job_ttl_secs: 3600,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_survives_toml_round_trip() {
        let config = AppConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.pipeline.max_book_page, 600);
        assert_eq!(parsed.ocr.languages, "chi_sim+eng");
        assert_eq!(parsed.layout_service.max_poll_attempts, 120);
    }

    #[test]
    fn poll_budget_is_ten_minutes() {
        let service = AppConfig::default().layout_service;
        assert_eq!(service.poll_interval_secs * service.max_poll_attempts as u64, 600);
    }
}
