use image::imageops::FilterType;
use image::ImageFormat;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{info, warn};

use super::{PageRenderer, RenderScale};
use crate::utils::{TocError, TocResult};

/// 通过 pdftoppm 渲染单页，PNG 直接从 stdout 读取
pub struct PdftoppmRenderer {
    renderer_path: String,
    pdf_path: PathBuf,
}

impl PdftoppmRenderer {
    pub fn new(renderer_path: impl Into<String>, pdf_path: impl AsRef<Path>) -> Self {
        Self {
            renderer_path: renderer_path.into(),
            pdf_path: pdf_path.as_ref().to_path_buf(),
        }
    }
}

impl PageRenderer for PdftoppmRenderer {
    fn render(&self, page_index: usize, scale: RenderScale) -> TocResult<Vec<u8>> {
        let page_number = (page_index + 1).to_string();
        let mut command = Command::new(&self.renderer_path);
        command
            .arg("-f")
            .arg(&page_number)
            .arg("-l")
            .arg(&page_number)
            .arg("-singlefile")
            .arg("-png");

        match scale {
            RenderScale::Dpi(dpi) => {
                command.arg("-r").arg(dpi.to_string()).arg("-gray");
            }
            RenderScale::Width(width) => {
                command
                    .arg("-scale-to-x")
                    .arg(width.to_string())
                    .arg("-scale-to-y")
                    .arg("-1");
            }
        }

        let output = command
            .arg(&self.pdf_path)
            .output()
            .map_err(|e| TocError::OcrError(format!("无法执行 {}: {}", self.renderer_path, e)))?;

        if !output.status.success() || output.stdout.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TocError::OcrError(format!(
                "{} 渲染第 {} 页失败: {}",
                self.renderer_path,
                page_number,
                stderr.trim()
            )));
        }

        Ok(output.stdout)
    }
}

/// 缩略图：渲染后统一缩放到给定宽度，重新编码为 PNG
pub fn render_thumbnail(renderer: &dyn PageRenderer, page_index: usize, width: u32) -> TocResult<Vec<u8>> {
    let png = renderer.render(page_index, RenderScale::Width(width))?;
    resize_png(&png, width)
}

fn resize_png(png: &[u8], width: u32) -> TocResult<Vec<u8>> {
    let img = image::load_from_memory(png)
        .map_err(|e| TocError::ParseError(format!("无法解码页面图像: {}", e)))?;

    let img = if img.width() == width || img.width() == 0 {
        img
    } else {
        let height = ((img.height() as u64 * width as u64) / img.width() as u64).max(1) as u32;
        img.resize_exact(width, height, FilterType::Triangle)
    };

    let mut buffer = Cursor::new(Vec::new());
    img.write_to(&mut buffer, ImageFormat::Png)
        .map_err(|e| TocError::ParseError(format!("PNG 编码失败: {}", e)))?;
    Ok(buffer.into_inner())
}

/// 批量生成缩略图文件 `page_<n>.png`（n 为 1 起始页码），单页失败只记日志
pub fn write_thumbnails(
    renderer: &dyn PageRenderer,
    pages: &[usize],
    width: u32,
    out_dir: &Path,
) -> TocResult<Vec<PathBuf>> {
    std::fs::create_dir_all(out_dir)?;

    let mut written = Vec::new();
    for &page_index in pages {
        match render_thumbnail(renderer, page_index, width) {
            Ok(png) => {
                let path = out_dir.join(format!("page_{}.png", page_index + 1));
                std::fs::write(&path, png)?;
                written.push(path);
            }
            Err(e) => warn!("第 {} 页缩略图失败: {}", page_index + 1, e),
        }
    }

    info!("生成缩略图 {} 张 → {}", written.len(), out_dir.display());
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage};

    struct SolidRenderer;

    impl PageRenderer for SolidRenderer {
        fn render(&self, _page_index: usize, _scale: RenderScale) -> TocResult<Vec<u8>> {
            let img = DynamicImage::ImageRgb8(RgbImage::new(400, 600));
            let mut buffer = Cursor::new(Vec::new());
            img.write_to(&mut buffer, ImageFormat::Png).unwrap();
            Ok(buffer.into_inner())
        }
    }

    #[test]
    fn thumbnail_keeps_aspect_ratio() {
        let png = render_thumbnail(&SolidRenderer, 0, 200).unwrap();
        let img = image::load_from_memory(&png).unwrap();
        assert_eq!((img.width(), img.height()), (200, 300));
    }

    #[test]
    fn thumbnails_are_named_by_page_number() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_thumbnails(&SolidRenderer, &[2, 3], 100, dir.path()).unwrap();
        assert_eq!(paths.len(), 2);
        assert!(paths[0].ends_with("page_3.png"));
        assert!(paths[1].exists());
    }
}
