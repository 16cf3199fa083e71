use lopdf::content::Content;
use lopdf::{Document, Object, ObjectId};
use std::collections::BTreeMap;
use std::io::Read as IoRead;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::{DocumentSource, TextLine, TextRun};
use crate::utils::{TocError, TocResult};

/// 纵坐标相差超过该值即视为换行
const LINE_Y_TOLERANCE: f32 = 1.0;

/// 基于 lopdf 的内嵌文本读取，按内容流还原行与字号
pub struct PdfDocument {
    path: PathBuf,
    doc: Document,
    page_ids: Vec<ObjectId>,
}

impl PdfDocument {
    pub fn open(path: impl AsRef<Path>) -> TocResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(TocError::IoError(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("PDF文件不存在: {}", path.display()),
            )));
        }

        let doc = Document::load(path)?;
        let page_ids: Vec<ObjectId> = doc.get_pages().into_values().collect();
        info!("打开PDF: {} ({} 页)", path.display(), page_ids.len());

        Ok(Self {
            path: path.to_path_buf(),
            doc,
            page_ids,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    /// 页面内容流：优先用 lopdf 解压，失败时手动 inflate
    fn page_content(&self, page_id: ObjectId) -> TocResult<Vec<u8>> {
        if let Ok(content) = self.doc.get_page_content(page_id) {
            return Ok(content);
        }

        let mut content = Vec::new();
        for stream_id in self.doc.get_page_contents(page_id) {
            let stream = match self.doc.get_object(stream_id).and_then(|o| o.as_stream()) {
                Ok(s) => s,
                Err(_) => continue,
            };
            match stream.decompressed_content() {
                Ok(data) => content.extend(data),
                Err(_) => match manual_inflate(&stream.content) {
                    Ok(data) => content.extend(data),
                    Err(e) => warn!("内容流解压失败 (obj {:?}): {}", stream_id, e),
                },
            }
            content.push(b'\n');
        }
        Ok(content)
    }

    fn extract_lines(&self, page_id: ObjectId) -> TocResult<Vec<TextLine>> {
        let encodings: BTreeMap<Vec<u8>, &str> = self
            .doc
            .get_page_fonts(page_id)
            .into_iter()
            .map(|(name, font)| (name, font.get_font_encoding()))
            .collect();

        let data = self.page_content(page_id)?;
        let content = Content::decode(&data)?;

        let mut state = TextState::default();
        let mut builder = LineBuilder::default();

        for operation in &content.operations {
            let operands = &operation.operands;
            match operation.operator.as_str() {
                "BT" => state.begin_text(),
                "Tf" => {
                    state.encoding = operands
                        .first()
                        .and_then(|o| o.as_name().ok())
                        .and_then(|name| encodings.get(name).copied());
                    if let Some(size) = operands.get(1).and_then(number) {
                        state.font_size = size;
                    }
                }
                "TL" => {
                    if let Some(leading) = operands.first().and_then(number) {
                        state.leading = leading;
                    }
                }
                "Td" | "TD" => {
                    let ty = operands.get(1).and_then(number).unwrap_or(0.0);
                    if operation.operator == "TD" {
                        state.leading = -ty;
                    }
                    state.move_line(ty);
                }
                "Tm" => {
                    let values: Vec<f32> = operands.iter().filter_map(number).collect();
                    if values.len() == 6 {
                        state.scale = values[3].abs().max(values[0].abs());
                        state.y = values[5];
                    }
                }
                "T*" => state.next_line(),
                "Tj" | "TJ" => {
                    let text = decode_operands(state.encoding, operands);
                    builder.push(&text, state.effective_size(), state.y);
                }
                "'" | "\"" => {
                    state.next_line();
                    let text = decode_operands(state.encoding, operands);
                    builder.push(&text, state.effective_size(), state.y);
                }
                _ => {}
            }
        }

        Ok(builder.finish())
    }
}

impl DocumentSource for PdfDocument {
    fn page_count(&self) -> usize {
        self.page_ids.len()
    }

    fn page_lines(&self, page_index: usize) -> TocResult<Vec<TextLine>> {
        let Some(&page_id) = self.page_ids.get(page_index) else {
            return Ok(Vec::new());
        };
        match self.extract_lines(page_id) {
            Ok(lines) => Ok(lines),
            Err(e) => {
                // 单页内容流损坏不影响其他页
                warn!("第 {} 页文本提取失败: {}", page_index + 1, e);
                Ok(Vec::new())
            }
        }
    }
}

#[derive(Debug)]
struct TextState<'a> {
    encoding: Option<&'a str>,
    font_size: f32,
    scale: f32,
    leading: f32,
    y: f32,
}

impl Default for TextState<'_> {
    fn default() -> Self {
        Self {
            encoding: None,
            font_size: 0.0,
            scale: 1.0,
            leading: 0.0,
            y: 0.0,
        }
    }
}

impl TextState<'_> {
    fn begin_text(&mut self) {
        self.scale = 1.0;
        self.y = 0.0;
    }

    fn move_line(&mut self, ty: f32) {
        self.y += ty * self.scale;
    }

    fn next_line(&mut self) {
        self.move_line(-self.leading);
    }

    fn effective_size(&self) -> f32 {
        (self.font_size * self.scale).abs()
    }
}

#[derive(Default)]
struct LineBuilder {
    lines: Vec<TextLine>,
    current: Vec<TextRun>,
    current_y: Option<f32>,
}

impl LineBuilder {
    fn push(&mut self, text: &str, size: f32, y: f32) {
        if text.is_empty() {
            return;
        }
        if let Some(cy) = self.current_y {
            if (cy - y).abs() > LINE_Y_TOLERANCE {
                self.flush();
            }
        }
        self.current.push(TextRun::new(text, size));
        self.current_y = Some(y);
    }

    fn flush(&mut self) {
        if self.current.is_empty() {
            return;
        }
        let line = TextLine::from_runs(std::mem::take(&mut self.current));
        if !line.text.is_empty() {
            self.lines.push(line);
        }
    }

    fn finish(mut self) -> Vec<TextLine> {
        self.flush();
        self.lines
    }
}

fn number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r as f32),
        _ => None,
    }
}

/// 只认简单编码；不读 /ToUnicode，Identity-H 等 CID 字体会得到乱码
fn decode_operands(encoding: Option<&str>, operands: &[Object]) -> String {
    let mut text = String::new();
    for operand in operands {
        match operand {
            Object::String(bytes, _) => text.push_str(&Document::decode_text(encoding, bytes)),
            Object::Array(items) => text.push_str(&decode_operands(encoding, items)),
            _ => {}
        }
    }
    text
}

/// zlib 头失败时退回裸 deflate
fn manual_inflate(compressed: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = flate2::read::ZlibDecoder::new(compressed);
    let mut result = Vec::new();
    if decoder.read_to_end(&mut result).is_ok() {
        return Ok(result);
    }

    let mut decoder = flate2::read::DeflateDecoder::new(compressed);
    result.clear();
    decoder.read_to_end(&mut result)?;
    Ok(result)
}

/// 只保留指定页（0 起始）另存为新 PDF，供上传云端解析
pub fn export_pages(src: &Path, keep: &[usize], dest: &Path) -> TocResult<PathBuf> {
    let mut doc = Document::load(src)?;
    let total = doc.get_pages().len();

    let to_delete: Vec<u32> = (0..total)
        .filter(|i| !keep.contains(i))
        .map(|i| i as u32 + 1)
        .collect();
    if to_delete.len() == total {
        return Err(TocError::ParseError("没有可导出的页面".to_string()));
    }

    doc.delete_pages(&to_delete);
    doc.prune_objects();
    doc.save(dest)?;
    debug!("导出 {} 页到 {}", total - to_delete.len(), dest.display());
    Ok(dest.to_path_buf())
}

#[cfg(test)]
pub(crate) mod testing {
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream};

    /// 生成一份每页若干行文字的最小 PDF；每行 (文本, 字号)
    pub fn build_pdf(pages: &[Vec<(&str, i64)>]) -> Document {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! {
                "F1" => font_id,
            },
        });

        let mut kids = Vec::new();
        for lines in pages {
            let mut operations = Vec::new();
            let mut y: i64 = 780;
            for (text, size) in lines {
                operations.push(Operation::new("BT", vec![]));
                operations.push(Operation::new("Tf", vec!["F1".into(), (*size).into()]));
                operations.push(Operation::new("Td", vec![72i64.into(), y.into()]));
                operations.push(Operation::new("Tj", vec![Object::string_literal(*text)]));
                operations.push(Operation::new("ET", vec![]));
                y -= 30;
            }
            let content = Content { operations };
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
                "Resources" => resources_id,
            });
            kids.push(Object::from(page_id));
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "MediaBox" => vec![0i64.into(), 0i64.into(), 595i64.into(), 842i64.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc
    }
}

#[cfg(test)]
mod tests {
    use super::testing::build_pdf;
    use super::*;

    #[test]
    fn reads_lines_and_font_sizes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.pdf");
        let mut doc = build_pdf(&[vec![("1 Introduction", 16), ("Body text line", 10)]]);
        doc.save(&path).unwrap();

        let pdf = PdfDocument::open(&path).unwrap();
        assert_eq!(pdf.page_count(), 1);
        let lines = pdf.page_lines(0).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text, "1 Introduction");
        assert_eq!(lines[0].font_size(), Some(16.0));
        assert_eq!(lines[1].font_size(), Some(10.0));
    }

    #[test]
    fn export_keeps_selected_pages_only() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.pdf");
        let dest = dir.path().join("toc.pdf");
        let mut doc = build_pdf(&[
            vec![("Cover", 12)],
            vec![("Contents", 12)],
            vec![("1 Scope", 12)],
        ]);
        doc.save(&src).unwrap();

        export_pages(&src, &[1], &dest).unwrap();
        let exported = PdfDocument::open(&dest).unwrap();
        assert_eq!(exported.page_count(), 1);
        assert_eq!(exported.page_line_texts(0).unwrap(), vec!["Contents"]);
    }

    #[test]
    fn missing_file_is_io_error() {
        assert!(matches!(
            PdfDocument::open("/nonexistent/file.pdf"),
            Err(TocError::IoError(_))
        ));
    }
}
