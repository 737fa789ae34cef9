//! Layers, the addressable units of an image.

use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
};

use cgmath::Vector2;
use serde::{Deserialize, Serialize};

use crate::{
    blend::BlendMode,
    buffer::PixelBuffer,
    effects::AdjustmentOp,
    error::{Error, Result},
    mask::Mask,
    utils::Rect,
};

index_vec::define_index_type! {
    /// Unique identifier for a layer.  Ids are unique across the whole document (including inside
    /// groups) and are never reused, even after the layer is deleted.
    pub struct LayerId = usize;
}

/// What a [`Layer`] holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    Pixel,
    Adjustment,
    Group,
}

/// The content of a [`Layer`].  Exactly one kind of content exists per layer, so the 'exactly one
/// of buffer/adjustment/stack' invariant holds by construction.
#[derive(Debug, Clone, PartialEq)]
pub enum LayerContent {
    Pixel(PixelBuffer),
    Adjustment(AdjustmentOp),
    Group(LayerStack),
}

/// An ordered sequence of layers, from bottom (index 0) to top.  A layer's index is its z-order,
/// so z-orders are always dense and unique within their parent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayerStack {
    layers: Vec<LayerId>,
}

impl LayerStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Layers in compositing order (bottom to top)
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = LayerId> + ExactSizeIterator + '_ {
        self.layers.iter().copied()
    }

    pub fn as_slice(&self) -> &[LayerId] {
        &self.layers
    }

    /// The z-order of `id` within this stack
    pub fn z_order(&self, id: LayerId) -> Option<usize> {
        self.layers.iter().position(|&l| l == id)
    }

    pub(crate) fn insert(&mut self, index: usize, id: LayerId) -> Result<()> {
        if index > self.layers.len() {
            return Err(Error::InvalidStructure(format!(
                "index {} is past the end of a stack of {} layers",
                index,
                self.layers.len()
            )));
        }
        self.layers.insert(index, id);
        Ok(())
    }

    pub(crate) fn remove(&mut self, id: LayerId) -> Option<usize> {
        let index = self.z_order(id)?;
        self.layers.remove(index);
        Some(index)
    }
}

/// One property of a [`Layer`] together with its value.  Every change to a layer goes through one
/// of these, which is what lets edits be recorded and inverted.
#[derive(Debug, Clone, PartialEq)]
pub enum Property {
    Name(String),
    BlendMode(BlendMode),
    Opacity(f32),
    Visible(bool),
    Offset(Vector2<i32>),
    Clip(Option<Rect<i32>>),
    Mask(Option<Mask>),
    Adjustment(AdjustmentOp),
    Pixels(PixelBuffer),
}

/// The name of a [`Property`], without its value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyKind {
    Name,
    BlendMode,
    Opacity,
    Visible,
    Offset,
    Clip,
    Mask,
    Adjustment,
    Pixels,
}

impl Property {
    pub fn kind(&self) -> PropertyKind {
        match self {
            Self::Name(_) => PropertyKind::Name,
            Self::BlendMode(_) => PropertyKind::BlendMode,
            Self::Opacity(_) => PropertyKind::Opacity,
            Self::Visible(_) => PropertyKind::Visible,
            Self::Offset(_) => PropertyKind::Offset,
            Self::Clip(_) => PropertyKind::Clip,
            Self::Mask(_) => PropertyKind::Mask,
            Self::Adjustment(_) => PropertyKind::Adjustment,
            Self::Pixels(_) => PropertyKind::Pixels,
        }
    }
}

/// A single layer: pixels, an adjustment or a group, plus the properties which control how it's
/// composited onto the layers beneath it.
#[derive(Debug, Clone)]
pub struct Layer {
    name: String,
    content: LayerContent,
    blend_mode: BlendMode,
    opacity: f32,
    visible: bool,
    mask: Option<Mask>,
    /// Document-space position of a pixel layer's top-left corner
    offset: Vector2<i32>,
    /// Optional clip rectangle of a group, in document space
    clip: Option<Rect<i32>>,
    /// Bumped (to a document-unique value) whenever anything about this layer changes
    pub(crate) revision: u64,
}

impl Layer {
    fn new(name: impl Into<String>, content: LayerContent) -> Self {
        Self {
            name: name.into(),
            content,
            blend_mode: BlendMode::Normal,
            opacity: 1.0,
            visible: true,
            mask: None,
            offset: Vector2::new(0, 0),
            clip: None,
            revision: 0,
        }
    }

    pub fn pixel(name: impl Into<String>, buffer: PixelBuffer) -> Self {
        Self::new(name, LayerContent::Pixel(buffer))
    }

    pub fn adjustment(name: impl Into<String>, op: AdjustmentOp) -> Self {
        Self::new(name, LayerContent::Adjustment(op))
    }

    pub fn group(name: impl Into<String>) -> Self {
        Self::new(name, LayerContent::Group(LayerStack::new()))
    }

    /* Builder methods, for layers which haven't been added to a document yet */

    pub fn with_blend_mode(mut self, mode: BlendMode) -> Self {
        self.blend_mode = mode;
        self
    }

    pub fn with_opacity(mut self, opacity: f32) -> Self {
        self.opacity = opacity.clamp(0.0, 1.0);
        self
    }

    pub fn with_visible(mut self, visible: bool) -> Self {
        self.visible = visible;
        self
    }

    pub fn with_mask(mut self, mask: Mask) -> Self {
        self.mask = Some(mask);
        self
    }

    pub fn with_offset(mut self, x: i32, y: i32) -> Self {
        self.offset = Vector2::new(x, y);
        self
    }

    pub fn with_clip(mut self, clip: Rect<i32>) -> Self {
        self.clip = Some(clip);
        self
    }

    /* Getters */

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> LayerKind {
        match self.content {
            LayerContent::Pixel(_) => LayerKind::Pixel,
            LayerContent::Adjustment(_) => LayerKind::Adjustment,
            LayerContent::Group(_) => LayerKind::Group,
        }
    }

    pub fn content(&self) -> &LayerContent {
        &self.content
    }

    pub fn blend_mode(&self) -> BlendMode {
        self.blend_mode
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn mask(&self) -> Option<&Mask> {
        self.mask.as_ref()
    }

    pub fn offset(&self) -> Vector2<i32> {
        self.offset
    }

    pub fn clip(&self) -> Option<Rect<i32>> {
        self.clip
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn pixels(&self) -> Option<&PixelBuffer> {
        match &self.content {
            LayerContent::Pixel(buf) => Some(buf),
            _ => None,
        }
    }

    /// The adjustment of an adjustment layer
    pub fn adjustment_op(&self) -> Option<&AdjustmentOp> {
        match &self.content {
            LayerContent::Adjustment(op) => Some(op),
            _ => None,
        }
    }

    pub fn children(&self) -> Option<&LayerStack> {
        match &self.content {
            LayerContent::Group(stack) => Some(stack),
            _ => None,
        }
    }

    pub(crate) fn children_mut(&mut self) -> Option<&mut LayerStack> {
        match &mut self.content {
            LayerContent::Group(stack) => Some(stack),
            _ => None,
        }
    }

    /// The document-space region which this layer's mask covers: a pixel layer's buffer, or the
    /// whole document for adjustments and groups
    pub fn bounds(&self, document: Rect<i32>) -> Rect<i32> {
        match &self.content {
            LayerContent::Pixel(buf) => buf.bounds().translate(self.offset),
            _ => document,
        }
    }

    /// Reads the current value of a property
    pub fn get(&self, kind: PropertyKind) -> Option<Property> {
        Some(match kind {
            PropertyKind::Name => Property::Name(self.name.clone()),
            PropertyKind::BlendMode => Property::BlendMode(self.blend_mode),
            PropertyKind::Opacity => Property::Opacity(self.opacity),
            PropertyKind::Visible => Property::Visible(self.visible),
            PropertyKind::Offset => Property::Offset(self.offset),
            PropertyKind::Clip => Property::Clip(self.clip),
            PropertyKind::Mask => Property::Mask(self.mask.clone()),
            PropertyKind::Adjustment => Property::Adjustment(self.adjustment_op()?.clone()),
            PropertyKind::Pixels => Property::Pixels(self.pixels()?.clone()),
        })
    }

    /// Replaces a property, returning its old value.  Only checks what the layer can check on its
    /// own; bounds which depend on the document are checked by the
    /// [`Document`](crate::document::Document).
    pub(crate) fn set(&mut self, property: Property) -> Result<Property> {
        let old = match property {
            Property::Name(name) => Property::Name(std::mem::replace(&mut self.name, name)),
            Property::BlendMode(mode) => {
                Property::BlendMode(std::mem::replace(&mut self.blend_mode, mode))
            }
            Property::Opacity(opacity) => {
                if !opacity.is_finite() {
                    return Err(Error::param("opacity", "must be a finite number"));
                }
                Property::Opacity(std::mem::replace(&mut self.opacity, opacity.clamp(0.0, 1.0)))
            }
            Property::Visible(visible) => {
                Property::Visible(std::mem::replace(&mut self.visible, visible))
            }
            Property::Offset(offset) => Property::Offset(std::mem::replace(&mut self.offset, offset)),
            Property::Clip(clip) => {
                if self.kind() != LayerKind::Group {
                    return Err(Error::InvalidStructure("only groups can be clipped".to_owned()));
                }
                Property::Clip(std::mem::replace(&mut self.clip, clip))
            }
            Property::Mask(mask) => Property::Mask(std::mem::replace(&mut self.mask, mask)),
            Property::Adjustment(op) => match &mut self.content {
                LayerContent::Adjustment(existing) => {
                    op.resolve()?;
                    Property::Adjustment(std::mem::replace(existing, op))
                }
                _ => {
                    return Err(Error::InvalidStructure(
                        "only adjustment layers have adjustments".to_owned(),
                    ))
                }
            },
            Property::Pixels(buf) => match &mut self.content {
                LayerContent::Pixel(existing) => Property::Pixels(std::mem::replace(existing, buf)),
                _ => {
                    return Err(Error::InvalidStructure(
                        "only pixel layers have pixels".to_owned(),
                    ))
                }
            },
        };
        Ok(old)
    }

    /// Mutable access to the mask, for in-place painting during an uncommitted stroke.  Creates a
    /// full mask if there isn't one.
    pub(crate) fn mask_for_painting(&mut self, document: Rect<i32>) -> &mut Mask {
        let bounds = self.bounds(document);
        self.mask
            .get_or_insert_with(|| Mask::full(bounds.width() as u32, bounds.height() as u32))
    }

    /// Hash of everything that affects how this layer composites, apart from the contents of its
    /// pixels, mask and children (which are tracked by `revision`)
    pub fn params_hash(&self) -> u64 {
        let mut h = DefaultHasher::new();
        self.kind().hash(&mut h);
        self.blend_mode.hash(&mut h);
        self.opacity.to_bits().hash(&mut h);
        self.visible.hash(&mut h);
        self.offset.x.hash(&mut h);
        self.offset.y.hash(&mut h);
        self.clip.hash(&mut h);
        self.mask.is_some().hash(&mut h);
        if let Some(op) = self.adjustment_op() {
            op.hash_into(&mut h);
        }
        h.finish()
    }
}

impl PartialEq for Layer {
    /// Layers are equal if they'd composite identically; `revision` is bookkeeping and is ignored
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.content == other.content
            && self.blend_mode == other.blend_mode
            && self.opacity == other.opacity
            && self.visible == other.visible
            && self.mask == other.mask
            && self.offset == other.offset
            && self.clip == other.clip
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{buffer::PixelFormat, effects::AdjustmentKind};

    fn pixel_layer() -> Layer {
        Layer::pixel("bg", PixelBuffer::new(4, 4, PixelFormat::Rgba8).unwrap())
    }

    #[test]
    fn set_returns_the_old_value() {
        let mut layer = pixel_layer();
        let old = layer.set(Property::Opacity(0.25)).unwrap();
        assert_eq!(old, Property::Opacity(1.0));
        assert_eq!(layer.opacity(), 0.25);
        // Out-of-range opacities are clamped
        layer.set(Property::Opacity(3.0)).unwrap();
        assert_eq!(layer.opacity(), 1.0);
        assert!(layer.set(Property::Opacity(f32::NAN)).is_err());
    }

    #[test]
    fn content_accessors_follow_kind() {
        let op = AdjustmentOp::with(AdjustmentKind::Exposure, "amount", 5.0).unwrap();
        let adj = Layer::adjustment("exp", op.clone());
        assert_eq!(adj.kind(), LayerKind::Adjustment);
        assert_eq!(adj.adjustment_op(), Some(&op));
        assert!(adj.pixels().is_none());
        assert_eq!(adj.get(PropertyKind::Adjustment), Some(Property::Adjustment(op)));

        let px = pixel_layer();
        assert!(px.adjustment_op().is_none());
        assert!(Layer::group("g").children().is_some());
    }

    #[test]
    fn content_properties_must_match_kind() {
        let mut layer = pixel_layer();
        let op = AdjustmentOp::with(AdjustmentKind::Exposure, "amount", 1.0).unwrap();
        assert!(layer.set(Property::Adjustment(op)).is_err());
        assert!(layer.set(Property::Clip(None)).is_err());
        assert!(layer.get(PropertyKind::Adjustment).is_none());
        assert!(layer.get(PropertyKind::Pixels).is_some());

        let mut group = Layer::group("g");
        assert!(group.set(Property::Clip(Some(Rect::from_origin(2, 2)))).is_ok());
        assert_eq!(group.kind(), LayerKind::Group);
    }

    #[test]
    fn params_hash_ignores_name_but_not_blending() {
        let a = pixel_layer();
        let mut b = a.clone();
        b.set(Property::Name("renamed".to_owned())).unwrap();
        assert_eq!(a.params_hash(), b.params_hash());
        b.set(Property::BlendMode(BlendMode::Screen)).unwrap();
        assert_ne!(a.params_hash(), b.params_hash());
    }

    #[test]
    fn stack_keeps_z_order_dense() {
        let mut stack = LayerStack::new();
        let ids = (0..4).map(LayerId::from_usize).collect::<Vec<_>>();
        for (i, id) in ids.iter().enumerate() {
            stack.insert(i, *id).unwrap();
        }
        assert_eq!(stack.remove(ids[1]), Some(1));
        assert_eq!(stack.z_order(ids[2]), Some(1));
        assert_eq!(stack.z_order(ids[3]), Some(2));
        assert!(stack.insert(5, ids[1]).is_err());
    }
}
