use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::SemanticParserConfig;
use crate::events::EventSink;
use crate::toc::TocEntry;
use crate::utils::{truncate_chars, TocError, TocResult};

const MAX_ATTEMPTS: u32 = 3;

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: String,
}

/// 用大模型把目录页 OCR 文本解析成条目
pub struct SemanticParser {
    client: reqwest::Client,
    config: SemanticParserConfig,
}

impl SemanticParser {
    pub fn new(config: SemanticParserConfig) -> TocResult<Self> {
        let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(120));

        if !config.proxy.is_empty() {
            match reqwest::Proxy::all(&config.proxy) {
                Ok(proxy) => {
                    info!("使用代理: {}", config.proxy);
                    builder = builder.proxy(proxy);
                }
                Err(e) => {
                    warn!("代理配置无效 '{}': {}", config.proxy, e);
                }
            }
        }

        let client = builder.build()?;
        Ok(Self { client, config })
    }

    pub fn is_configured(&self) -> bool {
        !self.config.api_key.is_empty()
    }

    fn build_prompt(&self, lines: &[String]) -> String {
        let toc_text = lines
            .iter()
            .take(self.config.max_lines)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "以下是从中文PDF目录页OCR提取的文本，请解析为书签列表。\n\n\
             OCR文本：\n{toc_text}\n\n\
             返回JSON数组，每项格式：\n\
             {{\"level\": 层级, \"section\": \"章节编号\", \"title\": \"标题\", \"page\": 页码}}\n\n\
             说明：\n\
             - level 1=章级（如\"1\"、\"2\"、\"附录A\"），level 2=节级（如\"1.1\"、\"2.3\"）\n\
             - section 例如 \"1\"、\"2.3\"、\"附录A\"、\"条文说明\"\n\
             - title 只含标题文字，不含编号和页码\n\
             - page 为目录中显示的书内页码（整数）\n\
             - 只提取有明确页码的条目\n\
             只返回JSON数组，不要任何其他文字或代码块标记。"
        )
    }

    /// 解析目录行；单条格式不对的条目直接跳过
    pub async fn parse(&self, lines: &[String], sink: &dyn EventSink) -> TocResult<Vec<TocEntry>> {
        if !self.is_configured() {
            return Err(TocError::ConfigError(
                "请设置 semantic_parser.api_key 后再使用 AI 解析功能".to_string(),
            ));
        }

        let prompt = self.build_prompt(lines);
        sink.log(format!("发送 {} 字符到 {}...", prompt.chars().count(), self.config.model));

        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt,
            }],
            max_tokens: self.config.max_tokens,
        };
        let raw = self.call_api(&request).await?;

        sink.log("模型返回响应，解析 JSON...".to_string());
        let value: Value = serde_json::from_str(strip_code_fence(&raw))?;
        let entries = coerce_entries(&value)?;

        for entry in &entries {
            sink.log(format!(
                "  L{}  {:10}  p={:3}  '{}'",
                entry.level,
                entry.section_label,
                entry.book_page,
                truncate_chars(&entry.title, 40)
            ));
        }
        sink.log(format!("AI 共解析 {} 条目录条目", entries.len()));
        Ok(entries)
    }

    /// 带重试，间隔指数增长
    async fn call_api(&self, request: &ChatRequest) -> TocResult<String> {
        let mut last_error = None;

        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                let delay = Duration::from_millis(500 * 2u64.pow(attempt));
                info!("API 重试 ({}/{})，等待 {}ms...", attempt + 1, MAX_ATTEMPTS, delay.as_millis());
                tokio::time::sleep(delay).await;
            }

            match self.do_request(request).await {
                Ok(content) => return Ok(content),
                Err(e) => {
                    warn!("API 调用失败 (尝试 {}/{}): {}", attempt + 1, MAX_ATTEMPTS, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| TocError::ServiceError("API 调用失败".to_string())))
    }

    async fn do_request(&self, request: &ChatRequest) -> TocResult<String> {
        let response = self
            .client
            .post(&self.config.api_url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TocError::ServiceError(format!("API 返回错误 {}: {}", status, body)));
        }

        let chat_response: ChatResponse = response.json().await?;
        chat_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .ok_or_else(|| TocError::ServiceError("API 响应中没有 choices".to_string()))
    }
}

/// 去掉模型偶尔包上的 ```json ... ``` 围栏
pub fn strip_code_fence(raw: &str) -> &str {
    let raw = raw.trim();
    if !raw.starts_with("```") {
        return raw;
    }
    let open = Regex::new(r"^```[a-z]*\n?").expect("内置正则");
    let close = Regex::new(r"\n?```$").expect("内置正则");
    let start = open.find(raw).map_or(0, |m| m.end());
    let body = &raw[start..];
    let end = close.find(body).map_or(body.len(), |m| m.start());
    &body[..end]
}

fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(*b as i64),
        _ => None,
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn coerce_entry(item: &Value) -> Option<TocEntry> {
    let level = u8::try_from(as_integer(item.get("level")?)?).ok()?;
    let section = as_text(item.get("section")?)?;
    let title = as_text(item.get("title")?)?;
    let page = u32::try_from(as_integer(item.get("page")?)?).ok()?;
    Some(TocEntry::new(level, section, title, page))
}

/// 顶层必须是数组；缺字段或类型不对的条目逐条丢弃
pub fn coerce_entries(value: &Value) -> TocResult<Vec<TocEntry>> {
    let items = value
        .as_array()
        .ok_or_else(|| TocError::ParseError("模型返回的不是 JSON 数组".to_string()))?;
    Ok(items.iter().filter_map(coerce_entry).collect())
}
