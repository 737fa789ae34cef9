use std::path::Path;

use cgmath::{Point2, Vector2};
use itertools::Itertools;

use crate::{
    blend::BlendMode,
    buffer::PixelFormat,
    config::EngineConfig,
    document::{Document, Location},
    effects::AdjustmentOp,
    error::{Error, Result},
    events::{LayerEvent, LayerListener},
    history::{EditCommand, EditKind, HistoryManager, HistoryState},
    io::{self, ExportFormat},
    layer::{Layer, LayerId, Property},
    mask::Mask,
    persist,
    render::{Compositor, RenderHandle, RenderOutput, RenderWarning},
    stroke::{Brush, Stroke},
    utils::Rect,
};

/// Persistent state for editing one document.  All mutations of the layer tree and the history go
/// through a `Context` (and therefore happen one at a time), while rendering runs on the
/// [`Compositor`]'s worker pool.
pub struct Context {
    config: EngineConfig,
    document: Document,
    history: HistoryManager,
    compositor: Compositor,
    listeners: Vec<Box<dyn LayerListener>>,
    /// The mask stroke in progress, if any
    stroke: Option<Stroke>,
}

impl Context {
    /// Creates a `Context` editing a new, empty document
    pub fn new(config: EngineConfig, width: u32, height: u32, format: PixelFormat) -> Result<Self> {
        config.validate()?;
        let document = Document::new_limited(width, height, format, config.max_dimension)?;
        Self::with_document(config, document)
    }

    /// Creates a `Context` whose document is the size of the image at `path`, with that image as
    /// its only layer
    pub fn from_image(config: EngineConfig, path: impl AsRef<Path>) -> Result<Self> {
        let buffer = io::open_image_file(&path)?;
        let mut ctx = Self::new(config, buffer.width(), buffer.height(), buffer.format())?;
        ctx.add_layer(Layer::pixel("Background", buffer), Location::root(0))?;
        Ok(ctx)
    }

    /// Loads a document saved with [`Self::save_document`].  The history starts out empty.
    pub fn load_document(dir: impl AsRef<Path>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let document = persist::load_document(dir, config.max_dimension)?;
        Self::with_document(config, document)
    }

    fn with_document(config: EngineConfig, document: Document) -> Result<Self> {
        Ok(Self {
            compositor: Compositor::new(&config)?,
            history: HistoryManager::new(config.history_limit),
            config,
            document,
            listeners: Vec::new(),
            stroke: None,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    pub fn compositor(&self) -> &Compositor {
        &self.compositor
    }

    pub fn layer(&self, id: LayerId) -> Result<&Layer> {
        self.document.layer(id)
    }

    /// Registers a listener to be told about every change to the layer tree
    pub fn add_listener(&mut self, listener: impl LayerListener + 'static) {
        self.listeners.push(Box::new(listener));
    }

    //////////////////////
    // STRUCTURAL EDITS //
    //////////////////////

    /// Adds `layer` to the document at `at`, returning its new id
    pub fn add_layer(&mut self, layer: Layer, at: Location) -> Result<LayerId> {
        self.check_clean()?;
        if let Some(buffer) = layer.pixels() {
            let max = self.config.max_dimension;
            if buffer.width() > max || buffer.height() > max {
                return Err(Error::InvalidDimension {
                    width: buffer.width(),
                    height: buffer.height(),
                });
            }
        }
        let id = self.document.insert_detached(layer)?;
        if let Err(e) = self.execute(EditCommand::AddLayer { id, at }) {
            self.document.purge(id);
            return Err(e);
        }
        Ok(id)
    }

    /// Adds `layer` above everything else in the top-level stack
    pub fn add_layer_on_top(&mut self, layer: Layer) -> Result<LayerId> {
        let at = Location::root(self.document.root().len());
        self.add_layer(layer, at)
    }

    /// Takes a layer (and, for groups, everything inside it) out of the document
    pub fn remove_layer(&mut self, id: LayerId) -> Result<()> {
        self.check_clean()?;
        let at = self.document.location(id)?;
        self.execute(EditCommand::RemoveLayer { id, at })
    }

    /// Moves a layer so that it ends up at `to`, which may be in a different group
    pub fn move_layer(&mut self, id: LayerId, to: Location) -> Result<()> {
        self.check_clean()?;
        let from = self.document.location(id)?;
        if from == to {
            return Ok(());
        }
        self.execute(EditCommand::MoveLayer { id, from, to })
    }

    /// Changes the z-order of a layer within its current stack
    pub fn reorder(&mut self, id: LayerId, index: usize) -> Result<()> {
        let parent = self.document.location(id)?.parent;
        self.move_layer(id, Location { parent, index })
    }

    ////////////////
    // PROPERTIES //
    ////////////////

    /// Sets one property of a layer.  If an edit session is open on this property of this layer,
    /// the change is applied live and becomes part of the session's command; otherwise it is
    /// recorded as a command of its own.
    pub fn set_property(&mut self, id: LayerId, property: Property) -> Result<()> {
        if let Some(pending) = self.history.pending() {
            if pending.layer != id || pending.kind != EditKind::Property(property.kind()) {
                return Err(Error::EditInProgress);
            }
            let kind = property.kind();
            self.document.set_property(id, property)?;
            self.invalidate(&[id]);
            self.notify(&LayerEvent::PropertyChanged { id, property: kind });
            return Ok(());
        }

        let old = self
            .document
            .layer(id)?
            .get(property.kind())
            .ok_or_else(|| Error::InvalidStructure(format!("{:?} has no {:?}", id, property.kind())))?;
        if old == property {
            return Ok(());
        }
        self.execute(EditCommand::SetProperty {
            id,
            old,
            new: property,
        })
    }

    pub fn set_name(&mut self, id: LayerId, name: impl Into<String>) -> Result<()> {
        self.set_property(id, Property::Name(name.into()))
    }

    pub fn set_opacity(&mut self, id: LayerId, opacity: f32) -> Result<()> {
        self.set_property(id, Property::Opacity(opacity))
    }

    pub fn set_blend_mode(&mut self, id: LayerId, mode: BlendMode) -> Result<()> {
        self.set_property(id, Property::BlendMode(mode))
    }

    pub fn set_visible(&mut self, id: LayerId, visible: bool) -> Result<()> {
        self.set_property(id, Property::Visible(visible))
    }

    pub fn set_offset(&mut self, id: LayerId, x: i32, y: i32) -> Result<()> {
        self.set_property(id, Property::Offset(Vector2::new(x, y)))
    }

    pub fn set_clip(&mut self, id: LayerId, clip: Option<Rect<i32>>) -> Result<()> {
        self.set_property(id, Property::Clip(clip))
    }

    pub fn set_mask(&mut self, id: LayerId, mask: Option<Mask>) -> Result<()> {
        self.set_property(id, Property::Mask(mask))
    }

    pub fn set_adjustment(&mut self, id: LayerId, op: AdjustmentOp) -> Result<()> {
        self.set_property(id, Property::Adjustment(op))
    }

    /////////////
    // HISTORY //
    /////////////

    /// Opens an edit session (e.g. when the user starts dragging a slider)
    pub fn begin_edit(&mut self, id: LayerId, kind: EditKind) -> Result<()> {
        self.history.begin(kind, id, &self.document)
    }

    /// Closes the open edit session, recording everything it changed as one command.  Returns
    /// `false` if the session changed nothing (or there was no session).
    pub fn commit_edit(&mut self) -> Result<bool> {
        self.stroke = None;
        let (command, dropped) = self.history.commit(&self.document);
        self.purge_unreachable(&dropped);
        Ok(match command {
            Some(command) => {
                log::debug!("Committed edit session on {:?}", command.layer());
                self.notify(&LayerEvent::from_command(&command));
                true
            }
            None => false,
        })
    }

    /// Closes the open edit session, undoing everything it changed
    pub fn cancel_edit(&mut self) -> Result<()> {
        self.stroke = None;
        if let Some(id) = self.history.cancel(&mut self.document)? {
            log::debug!("Cancelled edit session on {:?}", id);
            self.invalidate(&[id]);
        }
        Ok(())
    }

    /// Undoes the most recent command, returning `true` if anything changed.  If an edit session
    /// is open, it is cancelled instead.
    ///
    /// Returns [`Error::HistoryTruncated`] if the command to undo has been dropped to keep the
    /// history within its limit.
    pub fn undo(&mut self) -> Result<bool> {
        if self.history.state() == HistoryState::Editing {
            self.cancel_edit()?;
            return Ok(true);
        }
        let applied = self.history.undo(&mut self.document)?;
        Ok(self.after_history_step(applied))
    }

    /// Re-applies the most recently undone command, returning `true` if anything changed
    pub fn redo(&mut self) -> Result<bool> {
        let applied = self.history.redo(&mut self.document)?;
        Ok(self.after_history_step(applied))
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo() || self.history.state() == HistoryState::Editing
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    fn after_history_step(&mut self, applied: Option<EditCommand>) -> bool {
        match applied {
            Some(command) => {
                self.invalidate(&command.referenced_layers());
                self.notify(&LayerEvent::from_command(&command));
                true
            }
            None => false,
        }
    }

    /////////////
    // STROKES //
    /////////////

    /// Starts painting on the mask of `id` at `pos` (in document coordinates).  A layer without a
    /// mask gets a fully-revealing one to paint on.
    pub fn stroke_begin(&mut self, id: LayerId, pos: Point2<f32>, brush: Brush) -> Result<()> {
        brush.validate()?;
        let pos = self.mask_position(id, pos)?;
        self.history.begin(EditKind::PaintMask, id, &self.document)?;
        let bounds = self.document.bounds();
        let mask = self.document.layer_mut(id)?.mask_for_painting(bounds);
        self.stroke = Some(Stroke::begin(id, brush, pos, mask));
        self.invalidate(&[id]);
        Ok(())
    }

    /// Continues the current stroke to `pos`
    pub fn stroke_move(&mut self, pos: Point2<f32>) -> Result<()> {
        let id = match &self.stroke {
            Some(stroke) => stroke.layer,
            None => return Err(Error::InvalidStructure("no stroke in progress".to_owned())),
        };
        let pos = self.mask_position(id, pos)?;
        let bounds = self.document.bounds();
        let mask = self.document.layer_mut(id)?.mask_for_painting(bounds);
        if let Some(stroke) = &mut self.stroke {
            stroke.move_to(pos, mask);
        }
        self.invalidate(&[id]);
        Ok(())
    }

    /// Finishes the current stroke, feathering the mask if the brush asks for it, and records the
    /// whole stroke as one command
    pub fn stroke_end(&mut self) -> Result<bool> {
        let stroke = match self.stroke.take() {
            Some(stroke) => stroke,
            None => return Ok(false),
        };
        if stroke.brush.feather > 0.0 {
            let painted = self.document.layer(stroke.layer)?.mask().cloned();
            if let Some(painted) = painted {
                let radius = stroke.brush.feather;
                let feathered = self.compositor.install(|| painted.feather(radius));
                self.document
                    .set_property(stroke.layer, Property::Mask(Some(feathered)))?;
                self.invalidate(&[stroke.layer]);
            }
        }
        self.commit_edit()
    }

    fn mask_position(&self, id: LayerId, pos: Point2<f32>) -> Result<Point2<f32>> {
        let min = self.document.mask_bounds(id)?.min();
        Ok(Point2::new(pos.x - min.x as f32, pos.y - min.y as f32))
    }

    ///////////////
    // RENDERING //
    ///////////////

    /// Renders `viewport` (in document pixels) at `zoom`, blocking until it's done
    pub fn render(&self, viewport: Rect<i32>, zoom: f32) -> Result<RenderOutput> {
        self.compositor.render(&self.document, viewport, zoom)
    }

    /// Renders the whole document at full resolution
    pub fn render_full(&self) -> Result<RenderOutput> {
        self.render(self.document.bounds(), 1.0)
    }

    /// Starts rendering a snapshot of the document on the worker pool.  Any render requested
    /// before this one is cancelled.
    pub fn request_render(&self, viewport: Rect<i32>, zoom: f32) -> RenderHandle {
        self.compositor
            .request_render(self.document.clone(), viewport, zoom)
    }

    /////////
    // I/O //
    /////////

    pub fn save_document(&self, dir: impl AsRef<Path>) -> Result<()> {
        persist::save_document(&self.document, dir)
    }

    /// Renders the document and writes it to `path`.  The format is guessed from the extension,
    /// falling back on the configured export format.
    pub fn export(&self, path: impl AsRef<Path>) -> Result<Vec<RenderWarning>> {
        let path = path.as_ref();
        let format = ExportFormat::from_path(path).unwrap_or(self.config.export_format);
        let output = self.render_full()?;
        io::save_composite(&output.buffer, path, format, self.config.export_quality)?;
        Ok(output.warnings)
    }

    /////////////
    // HELPERS //
    /////////////

    fn check_clean(&self) -> Result<()> {
        match self.history.state() {
            HistoryState::Clean => Ok(()),
            HistoryState::Editing => Err(Error::EditInProgress),
        }
    }

    fn execute(&mut self, command: EditCommand) -> Result<()> {
        let dropped = self.history.execute(command.clone(), &mut self.document)?;
        self.invalidate(&command.referenced_layers());
        self.purge_unreachable(&dropped);
        self.notify(&LayerEvent::from_command(&command));
        Ok(())
    }

    /// Drops cached composites of `layers` and of every group containing them
    fn invalidate(&self, layers: &[LayerId]) {
        let ids = layers
            .iter()
            .flat_map(|&id| std::iter::once(id).chain(self.document.ancestors(id)))
            .unique()
            .collect_vec();
        self.compositor.cache().invalidate_layers(&ids);
    }

    /// Frees detached layers which only `dropped` commands could have brought back
    fn purge_unreachable(&mut self, dropped: &[EditCommand]) {
        let candidates = dropped
            .iter()
            .flat_map(EditCommand::referenced_layers)
            .unique()
            .filter(|&id| {
                self.document.exists(id)
                    && !self.document.contains(id)
                    && !self.history.references(id)
            })
            .collect_vec();
        for id in candidates {
            log::debug!("Purging {:?}", id);
            self.document.purge(id);
        }
    }

    fn notify(&mut self, event: &LayerEvent) {
        for listener in &mut self.listeners {
            listener.notify(event);
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("document", &self.document)
            .field("history", &self.history)
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}
