use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::poll::{PollState, Poller};
use crate::config::LayoutServiceConfig;
use crate::events::EventSink;
use crate::utils::{TocError, TocResult};

/// 版面分析输出中的一个块
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutItem {
    /// 块类型，如 "title"、"text"、"table"
    pub kind: String,
    pub text: String,
    /// 0 起始，相对上传的那份 PDF
    pub page_index: usize,
}

impl LayoutItem {
    pub fn new(kind: &str, text: &str, page_index: usize) -> Self {
        Self {
            kind: kind.to_string(),
            text: text.to_string(),
            page_index,
        }
    }

    pub fn is_title(&self) -> bool {
        self.kind == "title"
    }
}

#[derive(Serialize)]
struct UploadRequest {
    files: Vec<UploadFile>,
}

#[derive(Serialize)]
struct UploadFile {
    name: String,
    is_ocr: bool,
    data_id: String,
}

/// 所有接口共用的外层：code 为 0 表示成功
#[derive(Deserialize)]
struct ApiEnvelope<T> {
    code: i64,
    #[serde(default)]
    msg: String,
    data: Option<T>,
}

#[derive(Deserialize)]
struct UploadUrls {
    batch_id: String,
    #[serde(default)]
    file_urls: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct BatchResult {
    #[serde(default)]
    extract_result: Vec<ExtractResult>,
}

#[derive(Debug, Default, Deserialize)]
struct ExtractResult {
    #[serde(default)]
    state: String,
    full_zip_url: Option<String>,
    err_msg: Option<String>,
}

/// content_list.json 中的条目；标题有时以 text_level 标记
#[derive(Deserialize)]
struct ContentItem {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: String,
    text_level: Option<u32>,
    page_idx: Option<usize>,
    page_no: Option<usize>,
}

/// MinerU 云端版面分析客户端
pub struct MineruClient {
    client: reqwest::Client,
    config: LayoutServiceConfig,
}

impl MineruClient {
    pub fn new(config: LayoutServiceConfig) -> TocResult<Self> {
        if config.credential.is_empty() {
            return Err(TocError::ConfigError(
                "未设置 MinerU 凭证（layout_service.credential）".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.config.credential)
    }

    /// 申请上传地址，返回 (batch_id, 预签名上传 URL)
    pub async fn request_upload_url(&self, file_name: &str) -> TocResult<(String, String)> {
        let request = UploadRequest {
            files: vec![UploadFile {
                name: file_name.to_string(),
                is_ocr: true,
                data_id: file_name.to_string(),
            }],
        };

        let envelope: ApiEnvelope<UploadUrls> = self
            .client
            .post(format!("{}/file-urls/batch", self.config.endpoint))
            .header("Authorization", self.bearer())
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if envelope.code != 0 {
            return Err(TocError::ServiceError(format!(
                "获取上传地址失败: code={} {}",
                envelope.code, envelope.msg
            )));
        }
        let data = envelope
            .data
            .ok_or_else(|| TocError::ServiceError("获取上传地址失败: 响应缺少 data".to_string()))?;
        let upload_url = data
            .file_urls
            .into_iter()
            .next()
            .ok_or_else(|| TocError::ServiceError("获取上传地址失败: 没有返回上传 URL".to_string()))?;
        Ok((data.batch_id, upload_url))
    }

    pub async fn upload(&self, upload_url: &str, pdf: &Path) -> TocResult<()> {
        let body = tokio::fs::read(pdf).await?;
        self.client
            .put(upload_url)
            .timeout(Duration::from_secs(self.config.transfer_timeout_secs))
            .body(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// 查询一次批次状态
    async fn check_batch(&self, batch_id: &str, attempt: u32, sink: &dyn EventSink) -> TocResult<PollState<String>> {
        let envelope: ApiEnvelope<BatchResult> = self
            .client
            .get(format!("{}/extract-results/batch/{}", self.config.endpoint, batch_id))
            .header("Authorization", self.bearer())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if envelope.code != 0 {
            return Err(TocError::ServiceError(format!(
                "查询失败: code={} {}",
                envelope.code, envelope.msg
            )));
        }
        let result = envelope.data.unwrap_or_default();
        if let Some(first) = result.extract_result.first() {
            sink.log(format!(
                "[MinerU] 状态: {}（已等待 {}s）",
                first.state,
                attempt as u64 * self.config.poll_interval_secs
            ));
        }
        Ok(batch_state(&result))
    }

    /// 轮询直到解析完成，返回结果压缩包地址
    pub async fn wait_for_result(&self, batch_id: &str, sink: &dyn EventSink) -> TocResult<String> {
        let poller = Poller::new(
            Duration::from_secs(self.config.poll_interval_secs),
            self.config.max_poll_attempts,
        );
        poller
            .run(move |attempt| self.check_batch(batch_id, attempt, sink))
            .await
            .map_err(|e| match e {
                TocError::ServiceError(reason) => TocError::ServiceError(format!("MinerU 解析失败: {}", reason)),
                TocError::Timeout(detail) => TocError::Timeout(format!("MinerU API {}", detail)),
                other => other,
            })
    }

    pub async fn download_and_extract(&self, zip_url: &str, out_dir: &Path) -> TocResult<usize> {
        let bytes = self
            .client
            .get(zip_url)
            .timeout(Duration::from_secs(self.config.transfer_timeout_secs))
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        extract_zip(&bytes, out_dir)
    }

    /// 上传、等待、下载解压，结果落在 `out_dir`
    pub async fn parse_pdf(&self, pdf: &Path, out_dir: &Path, sink: &dyn EventSink) -> TocResult<PathBuf> {
        let file_name = pdf
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("document.pdf")
            .to_string();

        sink.log("正在获取上传地址...".to_string());
        let (batch_id, upload_url) = self.request_upload_url(&file_name).await?;
        debug!("MinerU batch_id={}", batch_id);

        let size_kb = tokio::fs::metadata(pdf).await?.len() / 1024;
        sink.log(format!("上传 PDF（{} KB）...", size_kb));
        self.upload(&upload_url, pdf).await?;
        sink.log("上传完成，等待云端解析...".to_string());

        let zip_url = self.wait_for_result(&batch_id, sink).await?;

        sink.log("下载解析结果...".to_string());
        let files = self.download_and_extract(&zip_url, out_dir).await?;
        info!("MinerU 结果已解压 {} 个文件到 {}", files, out_dir.display());
        sink.log("MinerU Cloud API 处理完成".to_string());
        Ok(out_dir.to_path_buf())
    }

    /// 解析整份 PDF 并读取版面块
    pub async fn layout_items(&self, pdf: &Path, out_dir: &Path, sink: &dyn EventSink) -> TocResult<Vec<LayoutItem>> {
        let dir = self.parse_pdf(pdf, out_dir, sink).await?;
        load_layout_items(&dir)
    }
}

fn batch_state(result: &BatchResult) -> PollState<String> {
    let Some(first) = result.extract_result.first() else {
        return PollState::Pending;
    };
    match first.state.as_str() {
        "done" => match &first.full_zip_url {
            Some(url) => PollState::Done(url.clone()),
            None => PollState::Failed("状态为 done 但缺少 full_zip_url".to_string()),
        },
        "failed" => PollState::Failed(first.err_msg.clone().unwrap_or_default()),
        _ => PollState::Pending,
    }
}

/// 解压到目录，返回文件数
pub fn extract_zip(bytes: &[u8], out_dir: &Path) -> TocResult<usize> {
    std::fs::create_dir_all(out_dir)?;
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| TocError::ServiceError(format!("结果压缩包无效: {}", e)))?;
    let count = archive.len();
    archive
        .extract(out_dir)
        .map_err(|e| TocError::ServiceError(format!("解压失败: {}", e)))?;
    Ok(count)
}

fn collect_files_recursive(path: &Path, suffix: &str, files: &mut Vec<PathBuf>) -> TocResult<()> {
    if !path.is_dir() {
        return Ok(());
    }
    for entry in std::fs::read_dir(path)? {
        let entry_path = entry?.path();
        if entry_path.is_dir() {
            collect_files_recursive(&entry_path, suffix, files)?;
        } else if entry_path
            .file_name()
            .and_then(|n| n.to_str())
            .map_or(false, |n| n.ends_with(suffix))
        {
            files.push(entry_path);
        }
    }
    Ok(())
}

fn find_outputs(dir: &Path, suffix: &str) -> TocResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    collect_files_recursive(dir, suffix, &mut files)?;
    files.sort();
    Ok(files)
}

fn read_content_items(path: &Path) -> TocResult<Vec<ContentItem>> {
    let raw: Vec<serde_json::Value> = serde_json::from_str(&std::fs::read_to_string(path)?)?;
    let mut items = Vec::with_capacity(raw.len());
    for value in raw {
        match serde_json::from_value::<ContentItem>(value) {
            Ok(item) => items.push(item),
            Err(e) => warn!("跳过无法识别的版面块 ({}): {}", path.display(), e),
        }
    }
    Ok(items)
}

/// 目录文本行：优先 `*content_list.json`，没有则读 `*.md`
pub fn load_output_lines(dir: &Path) -> TocResult<Vec<String>> {
    let content_lists = find_outputs(dir, "content_list.json")?;
    let mut lines = Vec::new();

    if !content_lists.is_empty() {
        for path in &content_lists {
            for item in read_content_items(path)? {
                let text = item.text.trim();
                if !text.is_empty() {
                    lines.extend(text.lines().map(str::to_string));
                }
            }
        }
        return Ok(lines);
    }

    let markdown = find_outputs(dir, ".md")?;
    if markdown.is_empty() {
        return Err(TocError::ServiceError(format!(
            "未找到 MinerU 输出文件！目录: {}",
            dir.display()
        )));
    }
    for path in &markdown {
        lines.extend(std::fs::read_to_string(path)?.lines().map(str::to_string));
    }
    Ok(lines)
}

/// 读取全部版面块；带 text_level 的文本块视为标题
pub fn load_layout_items(dir: &Path) -> TocResult<Vec<LayoutItem>> {
    let content_lists = find_outputs(dir, "content_list.json")?;
    if content_lists.is_empty() {
        return Err(TocError::ServiceError(format!(
            "未找到 content_list.json！目录: {}",
            dir.display()
        )));
    }

    let mut items = Vec::new();
    for path in &content_lists {
        for item in read_content_items(path)? {
            let text = item.text.trim();
            if text.is_empty() {
                continue;
            }
            let kind = if item.text_level.map_or(false, |l| l > 0) {
                "title"
            } else {
                item.kind.as_str()
            };
            let page_index = item.page_idx.or(item.page_no).unwrap_or(0);
            items.push(LayoutItem::new(kind, text, page_index));
        }
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    const CONTENT_LIST: &str = r#"[
        {"type": "text", "text": "目  录", "page_idx": 0},
        {"type": "text", "text": "1 总则 1\n2 术语 3", "page_idx": 0},
        {"type": "text", "text": "3 基本规定", "text_level": 1, "page_idx": 1},
        {"type": "title", "text": "附录A 材料", "page_no": 2},
        {"type": "image", "img_path": "images/a.jpg", "page_idx": 1},
        {"type": "text", "text": 42}
    ]"#;

    #[test]
    fn content_list_lines_are_split_and_found_recursively() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("batch").join("auto");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("toc_content_list.json"), CONTENT_LIST).unwrap();
        std::fs::write(nested.join("toc.md"), "应被忽略").unwrap();

        let lines = load_output_lines(dir.path()).unwrap();
        assert_eq!(lines, vec!["目  录", "1 总则 1", "2 术语 3", "3 基本规定", "附录A 材料"]);
    }

    #[test]
    fn markdown_is_used_without_content_list() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("full.md"), "# 目录\n1 总则 1\n").unwrap();
        let lines = load_output_lines(dir.path()).unwrap();
        assert_eq!(lines, vec!["# 目录", "1 总则 1"]);
    }

    #[test]
    fn missing_outputs_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(matches!(load_output_lines(dir.path()), Err(TocError::ServiceError(_))));
    }

    #[test]
    fn layout_items_mark_titles() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a_content_list.json"), CONTENT_LIST).unwrap();
        let items = load_layout_items(dir.path()).unwrap();
        let titles: Vec<&LayoutItem> = items.iter().filter(|i| i.is_title()).collect();
        assert_eq!(
            titles,
            vec![&LayoutItem::new("title", "3 基本规定", 1), &LayoutItem::new("title", "附录A 材料", 2)]
        );
        assert_eq!(items.len(), 4);
    }

    #[test]
    fn batch_states_map_to_poll_states() {
        let pending = BatchResult::default();
        assert_eq!(batch_state(&pending), PollState::Pending);

        let running: BatchResult =
            serde_json::from_str(r#"{"extract_result": [{"state": "running"}]}"#).unwrap();
        assert_eq!(batch_state(&running), PollState::Pending);

        let done: BatchResult =
            serde_json::from_str(r#"{"extract_result": [{"state": "done", "full_zip_url": "https://x/r.zip"}]}"#)
                .unwrap();
        assert_eq!(batch_state(&done), PollState::Done("https://x/r.zip".to_string()));

        let failed: BatchResult =
            serde_json::from_str(r#"{"extract_result": [{"state": "failed", "err_msg": "页数超限"}]}"#).unwrap();
        assert_eq!(batch_state(&failed), PollState::Failed("页数超限".to_string()));
    }

    #[test]
    fn zip_is_extracted_into_out_dir() {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        writer.start_file("sub/x_content_list.json", options).unwrap();
        writer.write_all(CONTENT_LIST.as_bytes()).unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        let dir = tempdir().unwrap();
        let out = dir.path().join("out");
        assert_eq!(extract_zip(&bytes, &out).unwrap(), 1);
        assert_eq!(load_output_lines(&out).unwrap().len(), 5);
    }

    #[test]
    fn client_requires_credential() {
        let config = crate::config::AppConfig::default().layout_service;
        assert!(matches!(MineruClient::new(config), Err(TocError::ConfigError(_))));
    }
}
