use std::collections::HashMap;
use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::Mutex;
use tracing::{debug, info};

use super::{DocumentSource, PageRenderer, RenderScale, TextLine};
use crate::config::OcrConfig;
use crate::utils::{TocError, TocResult};

/// 图像转文字
pub trait Ocr {
    fn recognize(&self, png: &[u8]) -> TocResult<String>;
}

/// 调用本地 tesseract，图片经 stdin 传入，结果从 stdout 读出
pub struct TesseractOcr {
    engine_path: String,
    languages: String,
    page_segmentation_mode: u32,
}

impl TesseractOcr {
    pub fn new(config: &OcrConfig) -> Self {
        Self {
            engine_path: config.engine_path.clone(),
            languages: config.languages.clone(),
            page_segmentation_mode: config.page_segmentation_mode,
        }
    }

    pub fn available(&self) -> bool {
        Command::new(&self.engine_path).arg("--version").output().is_ok()
    }
}

impl Ocr for TesseractOcr {
    fn recognize(&self, png: &[u8]) -> TocResult<String> {
        let mut child = Command::new(&self.engine_path)
            .arg("stdin")
            .arg("stdout")
            .arg("-l")
            .arg(&self.languages)
            .arg("--psm")
            .arg(self.page_segmentation_mode.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| TocError::OcrError(format!("无法启动 {}: {}", self.engine_path, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(png)?;
        }

        let output = child.wait_with_output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TocError::OcrError(format!(
                "{} 返回非零状态: {}",
                self.engine_path,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).replace('\u{0000}', ""))
    }
}

/// 内嵌文本过少（扫描页）时改用 OCR；OCR 结果按页缓存
pub struct OcrFallbackSource<S, R, O> {
    inner: S,
    renderer: R,
    ocr: O,
    /// 内嵌文本不足该字符数即触发 OCR
    min_chars: usize,
    resolution: u32,
    cache: Mutex<HashMap<usize, Vec<TextLine>>>,
}

impl<S, R, O> OcrFallbackSource<S, R, O>
where
    S: DocumentSource,
    R: PageRenderer,
    O: Ocr,
{
    pub fn new(inner: S, renderer: R, ocr: O, resolution: u32) -> Self {
        Self {
            inner,
            renderer,
            ocr,
            min_chars: 50,
            resolution,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_min_chars(mut self, min_chars: usize) -> Self {
        self.min_chars = min_chars;
        self
    }

    /// 跳过内嵌文本，直接 OCR
    pub fn ocr_lines(&self, page_index: usize) -> TocResult<Vec<TextLine>> {
        if let Ok(cache) = self.cache.lock() {
            if let Some(lines) = cache.get(&page_index) {
                return Ok(lines.clone());
            }
        }

        debug!("OCR 第 {} 页", page_index + 1);
        let png = self.renderer.render(page_index, RenderScale::Dpi(self.resolution))?;
        let text = self.ocr.recognize(&png)?;
        let lines: Vec<TextLine> = text
            .lines()
            .map(TextLine::plain)
            .filter(|l| !l.text.is_empty())
            .collect();

        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(page_index, lines.clone());
        }
        Ok(lines)
    }
}

impl<S, R, O> DocumentSource for OcrFallbackSource<S, R, O>
where
    S: DocumentSource,
    R: PageRenderer,
    O: Ocr,
{
    fn page_count(&self) -> usize {
        self.inner.page_count()
    }

    fn page_lines(&self, page_index: usize) -> TocResult<Vec<TextLine>> {
        let lines = self.inner.page_lines(page_index)?;
        let embedded_chars: usize = lines.iter().map(|l| l.text.trim().chars().count()).sum();
        if embedded_chars >= self.min_chars {
            return Ok(lines);
        }

        info!(
            "第 {} 页内嵌文本仅 {} 字，改用 OCR",
            page_index + 1,
            embedded_chars
        );
        self.ocr_lines(page_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemoryDocument;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct BlankRenderer;

    impl PageRenderer for BlankRenderer {
        fn render(&self, page_index: usize, _scale: RenderScale) -> TocResult<Vec<u8>> {
            Ok(vec![page_index as u8])
        }
    }

    #[derive(Default)]
    struct FakeOcr {
        calls: AtomicUsize,
    }

    impl Ocr for &FakeOcr {
        fn recognize(&self, png: &[u8]) -> TocResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("第{}页\n\n1 总则\n", png[0] + 1))
        }
    }

    #[test]
    fn short_embedded_text_falls_back_to_ocr_once() {
        let doc = MemoryDocument::from_texts(&[
            "页眉",
            "本页有足够的内嵌文字，不需要识别。本规范适用于新建、扩建和改建的民用建筑结构设计，也适用于既有建筑的加固与改造设计。",
        ]);
        let ocr = FakeOcr::default();
        let source = OcrFallbackSource::new(doc, BlankRenderer, &ocr, 150);

        assert_eq!(source.page_line_texts(0).unwrap(), vec!["第1页", "1 总则"]);
        assert_eq!(source.page_line_texts(0).unwrap(), vec!["第1页", "1 总则"]);
        assert_eq!(ocr.calls.load(Ordering::SeqCst), 1);

        assert_eq!(source.page_lines(1).unwrap().len(), 1);
        assert_eq!(ocr.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn lower_threshold_keeps_short_pages() {
        let doc = MemoryDocument::from_texts(&["目录 1 总则 1 2 术语 3 3 基本规定 5"]);
        let ocr = FakeOcr::default();
        let source = OcrFallbackSource::new(doc, BlankRenderer, &ocr, 150).with_min_chars(10);
        source.page_lines(0).unwrap();
        assert_eq!(ocr.calls.load(Ordering::SeqCst), 0);
    }
}
