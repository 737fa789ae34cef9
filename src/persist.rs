//! Saving and loading whole documents.
//!
//! A saved document is a directory holding `document.json`, which describes the layer tree, plus
//! one file per pixel buffer and per painted mask.  8- and 16-bit buffers are stored as PNGs of
//! the same depth; float buffers and masks as raw little-endian `f32`s.  Nothing is quantized on
//! the way, so a load gives back exactly the document that was saved, ids included.

use std::{fs, path::Path};

use cgmath::Point2;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{
    blend::BlendMode,
    buffer::{PixelBuffer, PixelFormat},
    document::{Document, Location},
    effects::AdjustmentOp,
    error::{Error, Result},
    io,
    layer::{Layer, LayerContent, LayerId, LayerKind, LayerStack},
    mask::Mask,
    utils::Rect,
};

const DOCUMENT_FILE: &str = "document.json";
const FILE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct DocumentFile {
    version: u32,
    width: u32,
    height: u32,
    format: PixelFormat,
    /// Ids below this have been used, and must not be handed out again
    id_bound: usize,
    layers: Vec<LayerEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LayerEntry {
    id: usize,
    name: String,
    kind: LayerKind,
    blend_mode: BlendMode,
    opacity: f32,
    visible: bool,
    offset: [i32; 2],
    /// `[min_x, min_y, max_x, max_y]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    clip: Option<[i32; 4]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mask: Option<MaskRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    adjustment: Option<AdjustmentOp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pixels: Option<PixelRef>,
    /// Bottom to top, for groups
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    children: Vec<LayerEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PixelRef {
    file: String,
    width: u32,
    height: u32,
    format: PixelFormat,
}

#[derive(Debug, Serialize, Deserialize)]
struct MaskRef {
    /// `None` for a full mask, which has no data to store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    file: Option<String>,
    width: u32,
    height: u32,
}

//////////
// SAVE //
//////////

/// Writes `doc` into the directory `dir`, creating it if needed
pub fn save_document(doc: &Document, dir: impl AsRef<Path>) -> Result<()> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir).map_err(|e| save_error(dir, e))?;
    let file = DocumentFile {
        version: FILE_VERSION,
        width: doc.width(),
        height: doc.height(),
        format: doc.format(),
        id_bound: doc.id_bound(),
        layers: save_stack(doc, doc.root(), dir)?,
    };
    let json = serde_json::to_string_pretty(&file).map_err(|e| save_error(dir, e))?;
    let path = dir.join(DOCUMENT_FILE);
    fs::write(&path, json).map_err(|e| save_error(&path, e))?;
    log::info!("Saved document with {} layers to {:?}", doc.len(), dir);
    Ok(())
}

fn save_stack(doc: &Document, stack: &LayerStack, dir: &Path) -> Result<Vec<LayerEntry>> {
    stack
        .iter()
        .map(|id| save_layer(doc, id, doc.layer(id)?, dir))
        .collect()
}

fn save_layer(doc: &Document, id: LayerId, layer: &Layer, dir: &Path) -> Result<LayerEntry> {
    let mut entry = LayerEntry {
        id: id.index(),
        name: layer.name().to_owned(),
        kind: layer.kind(),
        blend_mode: layer.blend_mode(),
        opacity: layer.opacity(),
        visible: layer.is_visible(),
        offset: [layer.offset().x, layer.offset().y],
        clip: layer
            .clip()
            .map(|r| [r.min().x, r.min().y, r.max().x, r.max().y]),
        mask: layer.mask().map(|m| save_mask(id, m, dir)).transpose()?,
        adjustment: None,
        pixels: None,
        children: Vec::new(),
    };
    match layer.content() {
        LayerContent::Pixel(buf) => entry.pixels = Some(save_pixels(id, buf, dir)?),
        LayerContent::Adjustment(op) => entry.adjustment = Some(op.clone()),
        LayerContent::Group(stack) => entry.children = save_stack(doc, stack, dir)?,
    }
    Ok(entry)
}

fn save_pixels(id: LayerId, buf: &PixelBuffer, dir: &Path) -> Result<PixelRef> {
    let file = match buf.format() {
        PixelFormat::Rgba8 | PixelFormat::Rgba16 => {
            let file = format!("layer-{}.png", id.index());
            let path = dir.join(&file);
            let result = match buf.format() {
                PixelFormat::Rgba8 => io::to_rgba8(buf)?.save(&path),
                _ => io::to_rgba16(buf)?.save(&path),
            };
            result.map_err(|e| save_error(&path, e))?;
            file
        }
        PixelFormat::RgbaF32 => {
            let file = format!("layer-{}.f32", id.index());
            let values = buf.pixels().iter().flatten().copied();
            write_f32s(&dir.join(&file), values)?;
            file
        }
    };
    Ok(PixelRef {
        file,
        width: buf.width(),
        height: buf.height(),
        format: buf.format(),
    })
}

fn save_mask(id: LayerId, mask: &Mask, dir: &Path) -> Result<MaskRef> {
    let file = match mask.values() {
        Some(values) => {
            let file = format!("mask-{}.f32", id.index());
            write_f32s(&dir.join(&file), values.iter().copied())?;
            Some(file)
        }
        None => None,
    };
    Ok(MaskRef {
        file,
        width: mask.width(),
        height: mask.height(),
    })
}

fn write_f32s(path: &Path, values: impl Iterator<Item = f32>) -> Result<()> {
    let bytes = values.flat_map(f32::to_le_bytes).collect_vec();
    fs::write(path, bytes).map_err(|e| save_error(path, e))
}

fn save_error(path: &Path, e: impl std::fmt::Display) -> Error {
    Error::SaveError(format!("{:?}: {}", path, e))
}

//////////
// LOAD //
//////////

/// Reads a document previously written by [`save_document`]
pub fn load_document(dir: impl AsRef<Path>, max_dimension: u32) -> Result<Document> {
    let dir = dir.as_ref();
    let json = fs::read_to_string(dir.join(DOCUMENT_FILE))
        .map_err(|e| load_error(&dir.join(DOCUMENT_FILE), e))?;
    let file: DocumentFile =
        serde_json::from_str(&json).map_err(|e| load_error(&dir.join(DOCUMENT_FILE), e))?;
    if file.version != FILE_VERSION {
        return Err(Error::LoadError(format!(
            "unsupported document version {}",
            file.version
        )));
    }

    let mut doc = Document::new_limited(file.width, file.height, file.format, max_dimension)?;
    doc.reserve_ids(file.id_bound);
    let loader = Loader { dir, max_dimension };
    loader.load_stack(&mut doc, &file.layers, None)?;
    log::info!("Loaded document with {} layers from {:?}", doc.len(), dir);
    Ok(doc)
}

struct Loader<'a> {
    dir: &'a Path,
    max_dimension: u32,
}

impl Loader<'_> {
    fn load_stack(&self, doc: &mut Document, entries: &[LayerEntry], parent: Option<LayerId>) -> Result<()> {
        for (index, entry) in entries.iter().enumerate() {
            let id = LayerId::from_usize(entry.id);
            doc.insert_with_id(id, self.load_layer(entry)?)?;
            doc.attach(id, Location { parent, index })?;
            if entry.kind == LayerKind::Group {
                self.load_stack(doc, &entry.children, Some(id))?;
            }
        }
        Ok(())
    }

    fn load_layer(&self, entry: &LayerEntry) -> Result<Layer> {
        let mut layer = match entry.kind {
            LayerKind::Pixel => {
                let pixels = entry.pixels.as_ref().ok_or_else(|| missing(entry, "pixels"))?;
                Layer::pixel(&entry.name, self.load_pixels(pixels)?)
            }
            LayerKind::Adjustment => {
                let op = entry.adjustment.clone().ok_or_else(|| missing(entry, "adjustment"))?;
                Layer::adjustment(&entry.name, op)
            }
            LayerKind::Group => Layer::group(&entry.name),
        };
        layer = layer
            .with_blend_mode(entry.blend_mode)
            .with_opacity(entry.opacity)
            .with_visible(entry.visible)
            .with_offset(entry.offset[0], entry.offset[1]);
        if let Some([x0, y0, x1, y1]) = entry.clip {
            layer = layer.with_clip(Rect::from_corners(Point2::new(x0, y0), Point2::new(x1, y1)));
        }
        if let Some(mask) = &entry.mask {
            layer = layer.with_mask(self.load_mask(mask)?);
        }
        Ok(layer)
    }

    fn load_pixels(&self, pixels: &PixelRef) -> Result<PixelBuffer> {
        self.check_size(pixels.width, pixels.height)?;
        let path = self.dir.join(&pixels.file);
        let buffer = match pixels.format {
            PixelFormat::Rgba8 => {
                let image = image::open(&path).map_err(|e| load_error(&path, e))?;
                io::from_rgba8(image.to_rgba8())?
            }
            PixelFormat::Rgba16 => {
                let image = image::open(&path).map_err(|e| load_error(&path, e))?;
                io::from_rgba16(image.to_rgba16(), PixelFormat::Rgba16)?
            }
            PixelFormat::RgbaF32 => {
                let values = read_f32s(&path)?;
                let data = values
                    .chunks_exact(4)
                    .map(|c| [c[0], c[1], c[2], c[3]])
                    .collect_vec();
                PixelBuffer::from_raw(pixels.width, pixels.height, PixelFormat::RgbaF32, data)
                    .map_err(|_| load_error(&path, "wrong amount of pixel data"))?
            }
        };
        if buffer.width() != pixels.width || buffer.height() != pixels.height {
            return Err(load_error(&path, "image size doesn't match the document"));
        }
        Ok(buffer)
    }

    fn load_mask(&self, mask: &MaskRef) -> Result<Mask> {
        self.check_size(mask.width, mask.height)?;
        match &mask.file {
            None => Ok(Mask::full(mask.width, mask.height)),
            Some(file) => {
                let path = self.dir.join(file);
                Mask::from_raw(mask.width, mask.height, read_f32s(&path)?)
                    .map_err(|_| load_error(&path, "wrong amount of mask data"))
            }
        }
    }

    fn check_size(&self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 || width > self.max_dimension || height > self.max_dimension {
            return Err(Error::InvalidDimension { width, height });
        }
        Ok(())
    }
}

fn read_f32s(path: &Path) -> Result<Vec<f32>> {
    let bytes = fs::read(path).map_err(|e| load_error(path, e))?;
    if bytes.len() % 4 != 0 {
        return Err(load_error(path, "truncated float data"));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

fn missing(entry: &LayerEntry, field: &str) -> Error {
    Error::LoadError(format!("layer {} has no {}", entry.id, field))
}

fn load_error(path: &Path, e: impl std::fmt::Display) -> Error {
    Error::LoadError(format!("{:?}: {}", path, e))
}
