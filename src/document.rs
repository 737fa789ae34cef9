//! The layer tree of one image, stored as an arena indexed by [`LayerId`].

use index_vec::IndexVec;

use crate::{
    buffer::{PixelFormat, DEFAULT_MAX_DIMENSION},
    error::{Error, Result},
    layer::{Layer, LayerId, LayerStack, Property},
    utils::Rect,
};

/// Where a layer sits in the tree: the group which contains it (`None` for the top-level stack)
/// and its z-order within that group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Location {
    pub parent: Option<LayerId>,
    pub index: usize,
}

impl Location {
    pub fn root(index: usize) -> Self {
        Self {
            parent: None,
            index,
        }
    }

    pub fn in_group(group: LayerId, index: usize) -> Self {
        Self {
            parent: Some(group),
            index,
        }
    }
}

#[derive(Debug, Clone)]
struct Node {
    layer: Layer,
    parent: Option<LayerId>,
    /// `false` if this layer has been taken out of its parent's stack (e.g. by deletion).  Detached
    /// layers are kept so that they can be restored by undo.
    attached: bool,
}

/// A document: its canvas size, output format and tree of layers.
///
/// Cloning a `Document` is cheap (pixel and mask data is shared copy-on-write), so a clone makes a
/// consistent snapshot which a render can read while editing carries on.
#[derive(Debug, Clone)]
pub struct Document {
    width: u32,
    height: u32,
    format: PixelFormat,
    nodes: IndexVec<LayerId, Option<Node>>,
    root: LayerStack,
    last_revision: u64,
}

impl Document {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Result<Self> {
        Self::new_limited(width, height, format, DEFAULT_MAX_DIMENSION)
    }

    pub fn new_limited(width: u32, height: u32, format: PixelFormat, max: u32) -> Result<Self> {
        if width == 0 || height == 0 || width > max || height > max {
            return Err(Error::InvalidDimension { width, height });
        }
        Ok(Self {
            width,
            height,
            format,
            nodes: IndexVec::new(),
            root: LayerStack::new(),
            last_revision: 0,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn bounds(&self) -> Rect<i32> {
        Rect::from_origin(self.width as i32, self.height as i32)
    }

    /// The top-level stack of layers
    pub fn root(&self) -> &LayerStack {
        &self.root
    }

    /// The stack of layers directly inside `parent` (or the top-level stack)
    pub fn stack(&self, parent: Option<LayerId>) -> Result<&LayerStack> {
        match parent {
            None => Ok(&self.root),
            Some(id) => self.node(id)?.layer.children().ok_or_else(|| not_a_group(id)),
        }
    }

    /// Returns `true` if `id` is part of the current tree (i.e. it and all its ancestors are
    /// attached)
    pub fn contains(&self, id: LayerId) -> bool {
        let mut current = id;
        loop {
            match self.nodes.get(current).and_then(Option::as_ref) {
                Some(node) if node.attached => match node.parent {
                    Some(p) => current = p,
                    None => return true,
                },
                _ => return false,
            }
        }
    }

    /// Gets a layer which is part of the current tree
    pub fn layer(&self, id: LayerId) -> Result<&Layer> {
        if !self.contains(id) {
            return Err(Error::UnknownLayer(id));
        }
        Ok(&self.node(id)?.layer)
    }

    pub fn location(&self, id: LayerId) -> Result<Location> {
        let node = self.node(id)?;
        if !node.attached {
            return Err(Error::UnknownLayer(id));
        }
        let index = self
            .stack(node.parent)?
            .z_order(id)
            .ok_or(Error::UnknownLayer(id))?;
        Ok(Location {
            parent: node.parent,
            index,
        })
    }

    /// The groups containing `id`, innermost first
    pub fn ancestors(&self, id: LayerId) -> Vec<LayerId> {
        let mut ancestors = Vec::new();
        let mut current = self.parent_of(id);
        while let Some(p) = current {
            ancestors.push(p);
            current = self.parent_of(p);
        }
        ancestors
    }

    /// Every layer in the tree, depth-first in compositing order (a group's children come before
    /// the group itself)
    pub fn layer_ids(&self) -> Vec<LayerId> {
        let mut ids = Vec::new();
        self.collect_ids(&self.root, &mut ids);
        ids
    }

    fn collect_ids(&self, stack: &LayerStack, ids: &mut Vec<LayerId>) {
        for id in stack.iter() {
            if let Some(children) = self.node(id).ok().and_then(|n| n.layer.children()) {
                self.collect_ids(children, ids);
            }
            ids.push(id);
        }
    }

    pub fn len(&self) -> usize {
        self.layer_ids().len()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// The region of the document which `id`'s mask has to cover
    pub fn mask_bounds(&self, id: LayerId) -> Result<Rect<i32>> {
        Ok(self.node(id)?.layer.bounds(self.bounds()))
    }

    //////////////////////
    // STRUCTURAL EDITS //
    //////////////////////

    // These are the primitive operations that `EditCommand`s are built from.  All of them either
    // succeed completely or leave the document untouched.

    /// Gives `layer` an id, without putting it into the tree
    pub(crate) fn insert_detached(&mut self, mut layer: Layer) -> Result<LayerId> {
        self.check_mask(&layer)?;
        layer.revision = self.bump_revision();
        Ok(self.nodes.push(Some(Node {
            layer,
            parent: None,
            attached: false,
        })))
    }

    /// Puts a detached layer into the tree at `loc`
    pub(crate) fn attach(&mut self, id: LayerId, loc: Location) -> Result<()> {
        let node = self.node(id)?;
        if node.attached {
            return Err(Error::InvalidStructure(format!("{:?} is already in the tree", id)));
        }
        self.check_mask(&node.layer)?;
        if let Some(parent) = loc.parent {
            if parent == id || self.ancestors(parent).contains(&id) {
                return Err(Error::InvalidStructure(format!(
                    "{:?} can't be moved inside itself",
                    id
                )));
            }
        }
        self.stack_mut(loc.parent)?.insert(loc.index, id)?;
        let node = self.node_mut(id)?;
        node.parent = loc.parent;
        node.attached = true;
        if let Some(parent) = loc.parent {
            self.touch(parent);
        }
        Ok(())
    }

    /// Takes a layer out of the tree, returning where it was
    pub(crate) fn detach(&mut self, id: LayerId) -> Result<Location> {
        let node = self.node(id)?;
        if !node.attached {
            return Err(Error::UnknownLayer(id));
        }
        let parent = node.parent;
        let index = self
            .stack_mut(parent)?
            .remove(id)
            .ok_or(Error::UnknownLayer(id))?;
        self.node_mut(id)?.attached = false;
        if let Some(parent) = parent {
            self.touch(parent);
        }
        Ok(Location { parent, index })
    }

    /// Replaces one property of a layer, returning the old value
    pub(crate) fn set_property(&mut self, id: LayerId, property: Property) -> Result<Property> {
        let doc_bounds = self.bounds();
        let revision = self.bump_revision();
        let layer = &mut self.node_mut(id)?.layer;

        // Check the property against the rest of the layer before changing anything
        let expected = match &property {
            Property::Mask(Some(mask)) => Some((mask.bounds().size(), layer.bounds(doc_bounds).size())),
            Property::Pixels(buf) => layer
                .mask()
                .map(|mask| (mask.bounds().size(), buf.bounds().size())),
            _ => None,
        };
        if let Some((actual, expected)) = expected {
            if actual != expected {
                return Err(Error::InvalidDimension {
                    width: actual.x as u32,
                    height: actual.y as u32,
                });
            }
        }

        let old = layer.set(property)?;
        layer.revision = revision;
        Ok(old)
    }

    /// Mutable access for in-place edits which are recorded some other way (e.g. painting a mask
    /// during a stroke).  Marks the layer as changed.
    pub(crate) fn layer_mut(&mut self, id: LayerId) -> Result<&mut Layer> {
        let revision = self.bump_revision();
        let layer = &mut self.node_mut(id)?.layer;
        layer.revision = revision;
        Ok(layer)
    }

    /// Frees a detached layer (and everything inside it, if it's a group) for good
    pub(crate) fn purge(&mut self, id: LayerId) {
        if matches!(self.nodes.get(id), Some(Some(node)) if !node.attached) {
            self.purge_subtree(id);
        }
    }

    fn purge_subtree(&mut self, id: LayerId) {
        if let Some(node) = self.nodes.get_mut(id).and_then(Option::take) {
            if let Some(children) = node.layer.children() {
                for child in children.iter() {
                    self.purge_subtree(child);
                }
            }
        }
    }

    /// Returns `true` if `id` still has an arena slot (attached or not)
    pub(crate) fn exists(&self, id: LayerId) -> bool {
        self.nodes.get(id).map_or(false, Option::is_some)
    }

    /// Number of arena slots, including purged ones.  New layers get ids past all of these.
    pub(crate) fn id_bound(&self) -> usize {
        self.nodes.len()
    }

    /// Makes sure that new layers get ids of at least `bound`
    pub(crate) fn reserve_ids(&mut self, bound: usize) {
        while self.nodes.len() < bound {
            self.nodes.push(None);
        }
    }

    /// Restores a layer under a specific id, for loading saved documents
    pub(crate) fn insert_with_id(&mut self, id: LayerId, mut layer: Layer) -> Result<()> {
        self.check_mask(&layer)?;
        self.reserve_ids(id.index() + 1);
        if self.nodes[id].is_some() {
            return Err(Error::InvalidStructure(format!("{:?} is used twice", id)));
        }
        layer.revision = self.bump_revision();
        self.nodes[id] = Some(Node {
            layer,
            parent: None,
            attached: false,
        });
        Ok(())
    }

    /////////////
    // HELPERS //
    /////////////

    fn node(&self, id: LayerId) -> Result<&Node> {
        self.nodes
            .get(id)
            .and_then(Option::as_ref)
            .ok_or(Error::UnknownLayer(id))
    }

    fn node_mut(&mut self, id: LayerId) -> Result<&mut Node> {
        self.nodes
            .get_mut(id)
            .and_then(Option::as_mut)
            .ok_or(Error::UnknownLayer(id))
    }

    fn parent_of(&self, id: LayerId) -> Option<LayerId> {
        self.nodes.get(id)?.as_ref()?.parent
    }

    fn stack_mut(&mut self, parent: Option<LayerId>) -> Result<&mut LayerStack> {
        match parent {
            None => Ok(&mut self.root),
            Some(id) => self
                .node_mut(id)?
                .layer
                .children_mut()
                .ok_or_else(|| not_a_group(id)),
        }
    }

    fn check_mask(&self, layer: &Layer) -> Result<()> {
        if let Some(mask) = layer.mask() {
            if mask.bounds().size() != layer.bounds(self.bounds()).size() {
                return Err(Error::InvalidDimension {
                    width: mask.width(),
                    height: mask.height(),
                });
            }
        }
        Ok(())
    }

    fn bump_revision(&mut self) -> u64 {
        self.last_revision += 1;
        self.last_revision
    }

    fn touch(&mut self, id: LayerId) {
        let revision = self.bump_revision();
        if let Ok(node) = self.node_mut(id) {
            node.layer.revision = revision;
        }
    }

    fn stacks_equal(&self, a: &LayerStack, other: &Self, b: &LayerStack) -> bool {
        a.len() == b.len()
            && a.iter().zip(b.iter()).all(|(ia, ib)| {
                match (self.node(ia), other.node(ib)) {
                    (Ok(na), Ok(nb)) => {
                        ia == ib
                            && na.layer == nb.layer
                            && match (na.layer.children(), nb.layer.children()) {
                                (Some(ca), Some(cb)) => self.stacks_equal(ca, other, cb),
                                _ => true,
                            }
                    }
                    _ => false,
                }
            })
    }
}

impl PartialEq for Document {
    /// Documents are equal if their trees are structurally equal: same ids in the same places with
    /// equal properties and contents.  Detached layers and revision counters are ignored.
    fn eq(&self, other: &Self) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.format == other.format
            && self.stacks_equal(&self.root, other, &other.root)
    }
}

fn not_a_group(id: LayerId) -> Error {
    Error::InvalidStructure(format!("{:?} is not a group", id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{buffer::PixelBuffer, mask::Mask};

    fn doc() -> Document {
        Document::new(8, 8, PixelFormat::Rgba8).unwrap()
    }

    fn pixel(name: &str) -> Layer {
        Layer::pixel(name, PixelBuffer::new(8, 8, PixelFormat::Rgba8).unwrap())
    }

    fn add(doc: &mut Document, layer: Layer, loc: Location) -> LayerId {
        let id = doc.insert_detached(layer).unwrap();
        doc.attach(id, loc).unwrap();
        id
    }

    #[test]
    fn ids_are_never_reused() {
        let mut d = doc();
        let a = add(&mut d, pixel("a"), Location::root(0));
        d.detach(a).unwrap();
        d.purge(a);
        let b = add(&mut d, pixel("b"), Location::root(0));
        assert_ne!(a, b);
        assert!(d.layer(a).is_err());
    }

    #[test]
    fn detach_and_attach_restore_the_tree() {
        let mut d = doc();
        let a = add(&mut d, pixel("a"), Location::root(0));
        let b = add(&mut d, pixel("b"), Location::root(1));
        let c = add(&mut d, pixel("c"), Location::root(2));
        let before = d.clone();

        let loc = d.detach(b).unwrap();
        assert_eq!(loc, Location::root(1));
        assert_eq!(d.root().as_slice(), &[a, c]);
        assert!(!d.contains(b));
        assert_ne!(d, before);

        d.attach(b, loc).unwrap();
        assert_eq!(d, before);
    }

    #[test]
    fn groups_cannot_contain_themselves() {
        let mut d = doc();
        let outer = add(&mut d, Layer::group("outer"), Location::root(0));
        let inner = add(&mut d, Layer::group("inner"), Location::in_group(outer, 0));
        assert_eq!(d.ancestors(inner), vec![outer]);

        let loc = d.detach(outer).unwrap();
        assert!(matches!(
            d.attach(outer, Location::in_group(inner, 0)),
            Err(Error::InvalidStructure(_))
        ));
        // The failed attach changed nothing
        d.attach(outer, loc).unwrap();
        assert!(d.contains(inner));
    }

    #[test]
    fn children_of_detached_groups_are_not_in_the_tree() {
        let mut d = doc();
        let g = add(&mut d, Layer::group("g"), Location::root(0));
        let child = add(&mut d, pixel("child"), Location::in_group(g, 0));
        assert_eq!(d.layer_ids(), vec![child, g]);
        d.detach(g).unwrap();
        assert!(!d.contains(child));
        assert!(d.layer_ids().is_empty());
        d.purge(g);
        assert!(!d.exists(child));
    }

    #[test]
    fn masks_must_match_layer_bounds() {
        let mut d = doc();
        let a = add(&mut d, pixel("a"), Location::root(0));
        let bad = Property::Mask(Some(Mask::full(4, 4)));
        assert!(matches!(d.set_property(a, bad), Err(Error::InvalidDimension { .. })));
        assert!(d.set_property(a, Property::Mask(Some(Mask::full(8, 8)))).is_ok());
        // Resizing the pixels must keep the mask valid
        let small = PixelBuffer::new(4, 4, PixelFormat::Rgba8).unwrap();
        assert!(d.set_property(a, Property::Pixels(small)).is_err());
    }

    #[test]
    fn edits_bump_revisions() {
        let mut d = doc();
        let g = add(&mut d, Layer::group("g"), Location::root(0));
        let r0 = d.layer(g).unwrap().revision();
        add(&mut d, pixel("child"), Location::in_group(g, 0));
        let r1 = d.layer(g).unwrap().revision();
        assert!(r1 > r0);
        d.set_property(g, Property::Opacity(0.5)).unwrap();
        assert!(d.layer(g).unwrap().revision() > r1);
    }
}
