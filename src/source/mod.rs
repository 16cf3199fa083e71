pub mod ocr;
pub mod pdf;
pub mod thumbnail;

pub use ocr::{Ocr, OcrFallbackSource, TesseractOcr};
pub use pdf::{export_pages, PdfDocument};
pub use thumbnail::{render_thumbnail, write_thumbnails, PdftoppmRenderer};

use crate::utils::TocResult;
use serde::{Deserialize, Serialize};

/// 同一字体、同一字号的一段文字
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextRun {
    pub text: String,
    pub font_size: f32,
}

impl TextRun {
    pub fn new(text: impl Into<String>, font_size: f32) -> Self {
        Self {
            text: text.into(),
            font_size,
        }
    }
}

/// 一行文字；OCR 得到的行没有 runs，也就没有字号
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextLine {
    pub text: String,
    pub runs: Vec<TextRun>,
}

impl TextLine {
    pub fn from_runs(runs: Vec<TextRun>) -> Self {
        let text = runs.iter().map(|r| r.text.as_str()).collect::<String>().trim().to_string();
        Self { text, runs }
    }

    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into().trim().to_string(),
            runs: Vec::new(),
        }
    }

    /// 行内最大字号
    pub fn font_size(&self) -> Option<f32> {
        self.runs
            .iter()
            .map(|r| r.font_size)
            .filter(|s| *s > 0.0)
            .fold(None, |acc, s| Some(acc.map_or(s, |m: f32| m.max(s))))
    }
}

/// 渲染尺寸：按分辨率（OCR）或按目标宽度（缩略图）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderScale {
    Dpi(u32),
    Width(u32),
}

/// 把一页渲染成 PNG
pub trait PageRenderer {
    fn render(&self, page_index: usize, scale: RenderScale) -> TocResult<Vec<u8>>;
}

/// 核心只通过这个接口读取文档内容，页序号均从 0 开始
pub trait DocumentSource {
    fn page_count(&self) -> usize;

    fn page_lines(&self, page_index: usize) -> TocResult<Vec<TextLine>>;

    fn page_runs(&self, page_index: usize) -> TocResult<Vec<TextRun>> {
        Ok(self
            .page_lines(page_index)?
            .into_iter()
            .flat_map(|line| line.runs)
            .collect())
    }

    fn page_text(&self, page_index: usize) -> TocResult<String> {
        let lines = self.page_lines(page_index)?;
        Ok(lines
            .iter()
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join("\n"))
    }

    /// 非空行文本
    fn page_line_texts(&self, page_index: usize) -> TocResult<Vec<String>> {
        Ok(self
            .page_lines(page_index)?
            .into_iter()
            .map(|l| l.text)
            .filter(|t| !t.is_empty())
            .collect())
    }
}

impl<T: DocumentSource + ?Sized> DocumentSource for &T {
    fn page_count(&self) -> usize {
        (**self).page_count()
    }

    fn page_lines(&self, page_index: usize) -> TocResult<Vec<TextLine>> {
        (**self).page_lines(page_index)
    }
}

/// 内存中的文档，页内容预先给定
#[derive(Debug, Clone, Default)]
pub struct MemoryDocument {
    pages: Vec<Vec<TextLine>>,
}

impl MemoryDocument {
    pub fn new(pages: Vec<Vec<TextLine>>) -> Self {
        Self { pages }
    }

    /// 每页一段文本，按换行切分，没有字号信息
    pub fn from_texts<S: AsRef<str>>(pages: &[S]) -> Self {
        let pages = pages
            .iter()
            .map(|page| page.as_ref().lines().map(TextLine::plain).collect())
            .collect();
        Self { pages }
    }

    pub fn push_page(&mut self, lines: Vec<TextLine>) {
        self.pages.push(lines);
    }
}

impl DocumentSource for MemoryDocument {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn page_lines(&self, page_index: usize) -> TocResult<Vec<TextLine>> {
        Ok(self.pages.get(page_index).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_takes_largest_run_size() {
        let line = TextLine::from_runs(vec![TextRun::new("3.2 ", 14.0), TextRun::new("材料", 16.0)]);
        assert_eq!(line.text, "3.2 材料");
        assert_eq!(line.font_size(), Some(16.0));
        assert_eq!(TextLine::plain("3.2 材料").font_size(), None);
    }

    #[test]
    fn memory_document_out_of_range_page_is_empty() {
        let doc = MemoryDocument::from_texts(&["1 总则\n\n本规范适用于..."]);
        assert_eq!(doc.page_count(), 1);
        assert_eq!(doc.page_line_texts(0).unwrap(), vec!["1 总则", "本规范适用于..."]);
        assert!(doc.page_lines(5).unwrap().is_empty());
    }
}
