use lopdf::{dictionary, Document, Object, ObjectId, StringFormat};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::toc::Bookmark;
use crate::utils::{TocError, TocResult};

struct FlatItem {
    id: ObjectId,
    parent: Option<usize>,
    title: String,
    page_id: ObjectId,
}

struct NodeItem {
    id: ObjectId,
    title: String,
    page_id: ObjectId,
    children: Vec<NodeItem>,
}

/// UTF-16BE 加 BOM，中文标题在各阅读器里都能正确显示
fn encode_title(title: &str) -> Object {
    let mut bytes = vec![0xFE, 0xFF];
    for unit in title.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, StringFormat::Hexadecimal)
}

fn decode_title(bytes: &[u8]) -> String {
    match bytes {
        [0xFE, 0xFF, rest @ ..] => {
            let units: Vec<u16> = rest
                .chunks_exact(2)
                .map(|c| u16::from_be_bytes([c[0], c[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        }
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}

fn catalog_id(doc: &Document) -> TocResult<ObjectId> {
    Ok(doc.trailer.get(b"Root")?.as_reference()?)
}

/// 用书签列表替换文档大纲，返回写入的条数
///
/// 页码越界的书签跳过；层级按栈归属父节点，调用方应先做层级归一。
pub fn apply_outline(doc: &mut Document, bookmarks: &[Bookmark]) -> TocResult<usize> {
    let pages = doc.get_pages();
    let root_id = catalog_id(doc)?;

    let mut flat: Vec<FlatItem> = Vec::new();
    let mut level_stack: Vec<(u8, usize)> = Vec::new();

    for bookmark in bookmarks {
        let Some(&page_id) = pages.get(&bookmark.physical_page) else {
            warn!("书签 '{}' 指向不存在的第 {} 页，跳过", bookmark.title, bookmark.physical_page);
            continue;
        };
        while level_stack.last().map_or(false, |&(level, _)| level >= bookmark.level) {
            level_stack.pop();
        }
        let parent = level_stack.last().map(|&(_, idx)| idx);
        level_stack.push((bookmark.level, flat.len()));
        flat.push(FlatItem {
            id: doc.new_object_id(),
            parent,
            title: bookmark.title.clone(),
            page_id,
        });
    }

    let written = flat.len();
    let mut children_map: HashMap<usize, Vec<NodeItem>> = HashMap::new();
    let mut roots = Vec::new();
    for (i, item) in flat.into_iter().enumerate().rev() {
        let mut children = children_map.remove(&i).unwrap_or_default();
        children.reverse();
        let node = NodeItem {
            id: item.id,
            title: item.title,
            page_id: item.page_id,
            children,
        };
        match item.parent {
            Some(parent) => children_map.entry(parent).or_default().push(node),
            None => roots.push(node),
        }
    }
    roots.reverse();

    let catalog = doc.get_object_mut(root_id)?.as_dict_mut()?;
    catalog.remove(b"Outlines");
    let (Some(first), Some(last)) = (roots.first(), roots.last()) else {
        return Ok(0);
    };

    let outline_root_id = doc.add_object(dictionary! {
        "Type" => "Outlines",
        "First" => Object::Reference(first.id),
        "Last" => Object::Reference(last.id),
        "Count" => roots.len() as i64,
    });
    add_outline_level(doc, &roots, outline_root_id);

    let catalog = doc.get_object_mut(root_id)?.as_dict_mut()?;
    catalog.set("Outlines", Object::Reference(outline_root_id));
    catalog.set("PageMode", "UseOutlines");
    debug!("写入大纲 {} 条（顶层 {} 条）", written, roots.len());
    Ok(written)
}

fn add_outline_level(doc: &mut Document, items: &[NodeItem], parent_id: ObjectId) {
    for (i, item) in items.iter().enumerate() {
        let mut dict = dictionary! {
            "Title" => encode_title(&item.title),
            "Parent" => Object::Reference(parent_id),
            "Dest" => vec![Object::Reference(item.page_id), "Fit".into()],
        };
        if i > 0 {
            dict.set("Prev", Object::Reference(items[i - 1].id));
        }
        if let Some(next) = items.get(i + 1) {
            dict.set("Next", Object::Reference(next.id));
        }
        if let (Some(first), Some(last)) = (item.children.first(), item.children.last()) {
            dict.set("First", Object::Reference(first.id));
            dict.set("Last", Object::Reference(last.id));
            // 负数表示默认折叠
            dict.set("Count", -(item.children.len() as i64));
            add_outline_level(doc, &item.children, item.id);
        }
        doc.objects.insert(item.id, Object::Dictionary(dict));
    }
}

/// 读 `src`，写入书签后另存为 `dest`
pub fn write_outline(src: &Path, bookmarks: &[Bookmark], dest: &Path) -> TocResult<usize> {
    let mut doc = Document::load(src)?;
    let written = apply_outline(&mut doc, bookmarks)?;
    doc.prune_objects();
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    doc.save(dest)?;
    info!("已写入 {} 个书签: {}", written, dest.display());
    Ok(written)
}

/// 书签目标页：直接的 Dest 数组或 GoTo 动作里的 D
fn outline_target(doc: &Document, item: &lopdf::Dictionary) -> Option<ObjectId> {
    let dest = item
        .get(b"Dest")
        .ok()
        .or_else(|| {
            let action = item.get(b"A").ok()?;
            let action = match action {
                Object::Reference(id) => doc.get_object(*id).ok()?,
                other => other,
            };
            action.as_dict().ok()?.get(b"D").ok()
        })?;
    let dest = match dest {
        Object::Reference(id) => doc.get_object(*id).ok()?,
        other => other,
    };
    dest.as_array().ok()?.first()?.as_reference().ok()
}

/// 按前序遍历读出现有大纲；命名目标等无法解析到页的条目跳过
pub fn read_outline(doc: &Document) -> TocResult<Vec<Bookmark>> {
    let page_numbers: HashMap<ObjectId, u32> = doc.get_pages().into_iter().map(|(n, id)| (id, n)).collect();
    let catalog = doc.get_object(catalog_id(doc)?)?.as_dict()?;
    let Ok(outlines) = catalog.get(b"Outlines").and_then(Object::as_reference) else {
        return Ok(Vec::new());
    };
    let root = doc.get_object(outlines)?.as_dict()?;

    let mut bookmarks = Vec::new();
    let mut visited = HashSet::new();
    let mut stack: Vec<(ObjectId, u8)> = Vec::new();
    if let Ok(first) = root.get(b"First").and_then(Object::as_reference) {
        stack.push((first, 1));
    }

    while let Some((id, level)) = stack.pop() {
        if !visited.insert(id) {
            return Err(TocError::ParseError(format!("大纲存在循环引用: {:?}", id)));
        }
        let item = doc.get_object(id)?.as_dict()?;

        if let Ok(next) = item.get(b"Next").and_then(Object::as_reference) {
            stack.push((next, level));
        }
        if let Ok(child) = item.get(b"First").and_then(Object::as_reference) {
            stack.push((child, level.saturating_add(1)));
        }

        let title = item
            .get(b"Title")
            .and_then(Object::as_str)
            .map(decode_title)
            .unwrap_or_default();
        match outline_target(doc, item).and_then(|page_id| page_numbers.get(&page_id)) {
            Some(&page) => bookmarks.push(Bookmark::new(level, title, page)),
            None => debug!("大纲条目 '{}' 没有可解析的目标页", title),
        }
    }
    Ok(bookmarks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::pdf::testing::build_pdf;
    use tempfile::tempdir;

    fn sample_pdf(pages: usize) -> Document {
        let content: Vec<Vec<(&str, i64)>> = (0..pages).map(|_| vec![("page", 10)]).collect();
        build_pdf(&content)
    }

    #[test]
    fn titles_round_trip_through_utf16() {
        let Object::String(bytes, _) = encode_title("3.2  材料强度") else {
            panic!("expected string");
        };
        assert_eq!(&bytes[..2], &[0xFE, 0xFF]);
        assert_eq!(decode_title(&bytes), "3.2  材料强度");
        assert_eq!(decode_title(b"Chapter 1"), "Chapter 1");
    }

    #[test]
    fn nested_outline_is_written_and_read_back() {
        let bookmarks = vec![
            Bookmark::new(1, "目录", 1),
            Bookmark::new(1, "1  总则", 2),
            Bookmark::new(2, "1.1  适用范围", 2),
            Bookmark::new(2, "1.2  术语", 3),
            Bookmark::new(1, "条文说明", 4),
            Bookmark::new(2, "1  总则", 4),
        ];
        let dir = tempdir().unwrap();
        let src = dir.path().join("in.pdf");
        let dest = dir.path().join("out").join("final.pdf");
        sample_pdf(4).save(&src).unwrap();

        assert_eq!(write_outline(&src, &bookmarks, &dest).unwrap(), 6);

        let doc = Document::load(&dest).unwrap();
        assert_eq!(read_outline(&doc).unwrap(), bookmarks);
        let catalog = doc.get_object(catalog_id(&doc).unwrap()).unwrap().as_dict().unwrap();
        assert_eq!(catalog.get(b"PageMode").unwrap().as_name().unwrap(), b"UseOutlines");
    }

    #[test]
    fn rewriting_replaces_previous_outline() {
        let mut doc = sample_pdf(3);
        apply_outline(&mut doc, &[Bookmark::new(1, "旧书签", 1)]).unwrap();
        apply_outline(&mut doc, &[Bookmark::new(1, "A", 2), Bookmark::new(1, "B", 3)]).unwrap();
        assert_eq!(
            read_outline(&doc).unwrap(),
            vec![Bookmark::new(1, "A", 2), Bookmark::new(1, "B", 3)]
        );
    }

    #[test]
    fn out_of_range_pages_are_skipped() {
        let mut doc = sample_pdf(2);
        let written = apply_outline(&mut doc, &[Bookmark::new(1, "A", 1), Bookmark::new(1, "越界", 9)]).unwrap();
        assert_eq!(written, 1);
        assert_eq!(read_outline(&doc).unwrap().len(), 1);
    }

    #[test]
    fn empty_list_removes_outline() {
        let mut doc = sample_pdf(1);
        apply_outline(&mut doc, &[Bookmark::new(1, "A", 1)]).unwrap();
        assert_eq!(apply_outline(&mut doc, &[]).unwrap(), 0);
        assert!(read_outline(&doc).unwrap().is_empty());
    }
}
