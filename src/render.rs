//! Code for rendering documents
//!
//! A render first annotates the layer tree (working out which layers can be composited and the
//! cache version of every partial composite), then composites the viewport one tile at a time on
//! the worker pool.  Each tile walks down the stack to find the highest partial composite which is
//! already cached, and composites upwards from there.

use std::{
    collections::hash_map::DefaultHasher,
    fmt::{Display, Formatter},
    hash::{Hash, Hasher},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Condvar, Mutex, PoisonError,
    },
    time::Instant,
};

use cgmath::{EuclideanSpace, Point2, Vector2};
use rayon::prelude::*;

use crate::{
    blend::{self, BlendMode},
    buffer::{Pixel, PixelBuffer, PixelFormat, ResampleFilter, TRANSPARENT},
    cache::{Cache, CacheKey},
    color::WorkingSpace,
    config::EngineConfig,
    document::Document,
    error::{Error, Result},
    layer::{Layer, LayerContent, LayerId, LayerStack},
    mask::Mask,
    utils::Rect,
};

/// Intermediate results are kept in float so nothing is clipped before the end of the render
const WORKING_FORMAT: PixelFormat = PixelFormat::RgbaF32;

/// A layer which couldn't be composited, and so was left out of a render
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderWarning {
    pub layer: LayerId,
    pub message: String,
}

impl Display for RenderWarning {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "skipped layer {:?}: {}", self.layer, self.message)
    }
}

/// The result of a render
#[derive(Debug, Clone)]
pub struct RenderOutput {
    pub buffer: PixelBuffer,
    pub warnings: Vec<RenderWarning>,
}

/// Flattens [`Document`]s into [`PixelBuffer`]s.  Cheap to clone; clones share the cache, the
/// worker pool and the render generation counter.
#[derive(Debug, Clone)]
pub struct Compositor {
    cache: Arc<Cache>,
    pool: Arc<rayon::ThreadPool>,
    tile_size: u32,
    working_space: WorkingSpace,
    upscale_filter: ResampleFilter,
    /// Generation of the most recently requested async render
    latest: Arc<AtomicU64>,
}

impl Compositor {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.thread_count)
            .thread_name(|i| format!("layered-worker-{}", i))
            .build()
            .map_err(|e| Error::param("thread_count", e.to_string()))?;
        Ok(Self {
            cache: Arc::new(Cache::new(config.cache_budget_bytes())),
            pool: Arc::new(pool),
            tile_size: config.tile_size.max(1),
            working_space: config.working_space,
            upscale_filter: config.upscale_filter,
            latest: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn working_space(&self) -> WorkingSpace {
        self.working_space
    }

    /// Run `f` on the worker pool, waiting for it to finish
    pub(crate) fn install<R: Send>(&self, f: impl FnOnce() -> R + Send) -> R {
        self.pool.install(f)
    }

    /// Renders `viewport` (in document pixels) at `zoom`, blocking until it's done
    pub fn render(&self, doc: &Document, viewport: Rect<i32>, zoom: f32) -> Result<RenderOutput> {
        self.render_cancellable(doc, viewport, zoom, &|| false)?
            .ok_or_else(|| Error::InvalidStructure("render was cancelled".to_owned()))
    }

    /// Like [`Self::render`], but gives up (returning `Ok(None)`) if `is_cancelled` returns `true`
    /// between tiles
    pub fn render_cancellable(
        &self,
        doc: &Document,
        viewport: Rect<i32>,
        zoom: f32,
        is_cancelled: &(dyn Fn() -> bool + Sync),
    ) -> Result<Option<RenderOutput>> {
        if viewport.is_empty() {
            return Err(Error::InvalidDimension {
                width: viewport.width().max(0) as u32,
                height: viewport.height().max(0) as u32,
            });
        }
        if !zoom.is_finite() || zoom <= 0.0 {
            return Err(Error::param("zoom", "must be a positive number"));
        }
        let start = Instant::now();
        let stats_before = self.cache.stats();

        let mut warnings = Vec::new();
        let seed = settings_seed(doc, self.working_space);
        let annotated = AnnotatedStack::new(doc, doc.root(), seed, &mut warnings);
        for w in &warnings {
            log::warn!("{}", w);
        }

        // Composite every tile of the visible part of the document
        let pass = Pass {
            cache: &self.cache,
            space: self.working_space,
            doc_bounds: doc.bounds(),
        };
        let tiles = viewport.intersection(doc.bounds()).tiles(self.tile_size);
        let composited = self.pool.install(|| {
            tiles
                .par_iter()
                .map(|&tile| {
                    if is_cancelled() {
                        return None;
                    }
                    Some((tile, pass.composite(&annotated, annotated.layers.len(), tile)))
                })
                .collect::<Option<Vec<_>>>()
        });
        let composited = match composited {
            Some(c) => c,
            None => {
                log::debug!("Render of {:?} cancelled", viewport);
                return Ok(None);
            }
        };

        // Assemble the tiles into the output
        let mut buffer = PixelBuffer::transparent(
            viewport.width() as u32,
            viewport.height() as u32,
            WORKING_FORMAT,
        );
        for (tile, pixels) in &composited {
            let dst = Point2::from_vec(tile.min() - viewport.min());
            PixelBuffer::copy_region(pixels, pixels.bounds(), &mut buffer, dst);
        }
        let mut buffer = buffer.convert(doc.format());
        if zoom != 1.0 {
            let width = ((buffer.width() as f32 * zoom).round() as u32).max(1);
            let height = ((buffer.height() as f32 * zoom).round() as u32).max(1);
            buffer = buffer.resample(width, height, self.upscale_filter)?;
        }

        let stats = self.cache.stats();
        log::debug!(
            "Rendered {:?} at {}x: {} tiles, {} cache hits, {} misses, in {:?}",
            viewport,
            zoom,
            tiles.len(),
            stats.hits - stats_before.hits,
            stats.misses - stats_before.misses,
            start.elapsed()
        );
        Ok(Some(RenderOutput { buffer, warnings }))
    }

    /// Starts rendering a snapshot of a document on the worker pool.  Any render which was
    /// requested before this one is cancelled.
    pub fn request_render(&self, snapshot: Document, viewport: Rect<i32>, zoom: f32) -> RenderHandle {
        let generation = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = RenderHandle {
            generation,
            latest: self.latest.clone(),
            shared: Arc::new((Mutex::new(Slot::Pending), Condvar::new())),
        };

        let compositor = self.clone();
        let latest = self.latest.clone();
        let shared = handle.shared.clone();
        self.pool.spawn(move || {
            let is_cancelled = move || latest.load(Ordering::SeqCst) != generation;
            let result = compositor.render_cancellable(&snapshot, viewport, zoom, &is_cancelled);
            // Check again, so that a render which finished after being superseded is never shown
            let slot = match result {
                _ if is_cancelled() => Slot::Cancelled,
                Ok(None) => Slot::Cancelled,
                Ok(Some(out)) => Slot::Finished(Ok(out)),
                Err(e) => Slot::Finished(Err(e)),
            };
            let (lock, cvar) = &*shared;
            *lock.lock().unwrap_or_else(PoisonError::into_inner) = slot;
            cvar.notify_all();
        });
        handle
    }

    /// Cancels any async render which is in progress
    pub fn cancel_renders(&self) {
        self.latest.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hash of the render settings, which seeds every cache version
fn settings_seed(doc: &Document, space: WorkingSpace) -> u64 {
    let mut h = DefaultHasher::new();
    space.hash(&mut h);
    doc.format().hash(&mut h);
    doc.bounds().hash(&mut h);
    h.finish()
}

///////////////////
// RENDER HANDLE //
///////////////////

#[derive(Debug)]
enum Slot {
    Pending,
    Finished(Result<RenderOutput>),
    Cancelled,
    Taken,
}

/// A render running in the background.  Only the handle from the most recent request can yield a
/// result; older ones count as cancelled.
#[derive(Debug)]
pub struct RenderHandle {
    generation: u64,
    latest: Arc<AtomicU64>,
    shared: Arc<(Mutex<Slot>, Condvar)>,
}

impl RenderHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_cancelled(&self) -> bool {
        self.latest.load(Ordering::SeqCst) != self.generation
    }

    /// `true` once the worker has stopped (whether it finished or was cancelled)
    pub fn is_finished(&self) -> bool {
        let slot = self.shared.0.lock().unwrap_or_else(PoisonError::into_inner);
        !matches!(*slot, Slot::Pending)
    }

    /// Takes the result if the render has finished.  Returns `None` if it's still running, has
    /// been cancelled or the result has already been taken.
    pub fn try_result(&self) -> Option<Result<RenderOutput>> {
        if self.is_cancelled() {
            return None;
        }
        let mut slot = self.shared.0.lock().unwrap_or_else(PoisonError::into_inner);
        take_finished(&mut slot)
    }

    /// Blocks until the render stops, returning its result (or `None` if it was cancelled)
    pub fn wait(self) -> Option<Result<RenderOutput>> {
        let (lock, cvar) = &*self.shared;
        let mut slot = lock.lock().unwrap_or_else(PoisonError::into_inner);
        while matches!(*slot, Slot::Pending) {
            slot = cvar.wait(slot).unwrap_or_else(PoisonError::into_inner);
        }
        if self.is_cancelled() {
            return None;
        }
        take_finished(&mut slot)
    }
}

fn take_finished(slot: &mut Slot) -> Option<Result<RenderOutput>> {
    match std::mem::replace(slot, Slot::Taken) {
        Slot::Finished(result) => Some(result),
        other => {
            *slot = other;
            None
        }
    }
}

/////////////////////
// ANNOTATED STACK //
/////////////////////

/// A [`LayerStack`], annotated with everything the compositor needs to know up-front
#[derive(Debug)]
struct AnnotatedStack<'doc> {
    layers: Vec<AnnotatedLayer<'doc>>,
}

#[derive(Debug)]
struct AnnotatedLayer<'doc> {
    id: LayerId,
    source: &'doc Layer,
    /// Cache version of the composite of this stack up to and including this layer
    version: u64,
    /// `false` if the layer is hidden or can't be composited
    enabled: bool,
    children: Option<AnnotatedStack<'doc>>,
}

impl<'doc> AnnotatedStack<'doc> {
    fn new(
        doc: &'doc Document,
        stack: &LayerStack,
        seed: u64,
        warnings: &mut Vec<RenderWarning>,
    ) -> Self {
        let mut version = seed;
        let mut layers = Vec::with_capacity(stack.len());
        for id in stack.iter() {
            let source = match doc.layer(id) {
                Ok(l) => l,
                Err(_) => continue,
            };
            // Groups composite in isolation, so their children get a fresh chain of versions
            let children = source.children().map(|c| {
                let mut h = DefaultHasher::new();
                (seed, id).hash(&mut h);
                AnnotatedStack::new(doc, c, h.finish(), warnings)
            });
            let problem = source.is_visible().then(|| find_problem(doc, source)).flatten();
            if let Some(message) = &problem {
                warnings.push(RenderWarning {
                    layer: id,
                    message: message.clone(),
                });
            }

            let mut h = DefaultHasher::new();
            version.hash(&mut h);
            id.hash(&mut h);
            source.params_hash().hash(&mut h);
            source.revision().hash(&mut h);
            children.as_ref().map(AnnotatedStack::top_version).hash(&mut h);
            problem.is_some().hash(&mut h);
            version = h.finish();

            layers.push(AnnotatedLayer {
                id,
                source,
                version,
                enabled: source.is_visible() && problem.is_none(),
                children,
            });
        }
        Self { layers }
    }

    fn top_version(&self) -> Option<u64> {
        self.layers.last().map(|l| l.version)
    }
}

/// Returns a description of why `layer` can't be composited, if it can't
fn find_problem(doc: &Document, layer: &Layer) -> Option<String> {
    if let Some(mask) = layer.mask() {
        if mask.bounds().size() != layer.bounds(doc.bounds()).size() {
            return Some(format!(
                "mask is {}x{} but the layer is {:?}",
                mask.width(),
                mask.height(),
                layer.bounds(doc.bounds())
            ));
        }
    }
    match layer.content() {
        LayerContent::Pixel(buf) => {
            let corrupt = buf
                .pixels()
                .par_iter()
                .any(|px| px.iter().any(|c| !c.is_finite()));
            corrupt.then(|| "pixel data contains non-finite values".to_owned())
        }
        LayerContent::Adjustment(op) => op.resolve().err().map(|e| e.to_string()),
        LayerContent::Group(_) => None,
    }
}

/////////////////
// COMPOSITING //
/////////////////

/// State shared by every tile of one render
#[derive(Clone, Copy)]
struct Pass<'a> {
    cache: &'a Cache,
    space: WorkingSpace,
    doc_bounds: Rect<i32>,
}

impl Pass<'_> {
    /// Composites `stack.layers[..end]` over `region`, reusing the highest cached partial
    /// composite
    fn composite(&self, stack: &AnnotatedStack, end: usize, region: Rect<i32>) -> PixelBuffer {
        let key = |index: usize| CacheKey {
            layer: stack.layers[index].id,
            version: stack.layers[index].version,
            region,
        };

        let mut start = 0;
        let mut acc = None;
        for index in (0..end).rev() {
            if let Some(cached) = self.cache.get(&key(index)) {
                acc = Some(cached);
                start = index + 1;
                break;
            }
        }
        let mut acc = acc.unwrap_or_else(|| {
            PixelBuffer::transparent(region.width() as u32, region.height() as u32, WORKING_FORMAT)
        });

        for index in start..end {
            self.apply_layer(stack, index, &mut acc, region);
            self.cache.insert(key(index), acc.clone());
        }
        acc
    }

    fn apply_layer(&self, stack: &AnnotatedStack, index: usize, acc: &mut PixelBuffer, region: Rect<i32>) {
        let layer = &stack.layers[index];
        if !layer.enabled {
            return;
        }
        let source = layer.source;
        let params = BlendParams {
            mode: source.blend_mode(),
            opacity: source.opacity(),
            mask: source.mask(),
            space: self.space,
        };
        match source.content() {
            LayerContent::Pixel(buf) => {
                let offset = source.offset();
                self.blend_source(acc, region, buf, offset, &params, offset, None);
            }
            LayerContent::Group(_) => {
                let children = match &layer.children {
                    Some(c) => c,
                    None => return,
                };
                let isolated = self.composite(children, children.layers.len(), region);
                let origin = region.min().to_vec();
                self.blend_source(acc, region, &isolated, origin, &params, Vector2::new(0, 0), source.clip());
            }
            LayerContent::Adjustment(op) => {
                let adjusted = if op.is_per_pixel() {
                    op.apply(acc, self.space)
                } else {
                    // Spatial ops read around each pixel, so composite a larger region beneath them
                    op.inv_transform_bbox(region).and_then(|needed| {
                        let needed = needed.intersection(self.doc_bounds).union(region);
                        let below = self.composite(stack, index, needed);
                        let out = op.apply(&below, self.space)?;
                        Ok(out.crop(region, needed.min().to_vec()))
                    })
                };
                match adjusted {
                    Ok(adjusted) => mix_adjusted(acc, region, &adjusted, &params),
                    Err(e) => log::warn!("Adjustment {:?} failed: {}", layer.id, e),
                }
            }
        }
    }

    /// Blends `source` (whose top-left is at `origin` in document space) onto `acc`
    #[allow(clippy::too_many_arguments)]
    fn blend_source(
        &self,
        acc: &mut PixelBuffer,
        region: Rect<i32>,
        source: &PixelBuffer,
        origin: Vector2<i32>,
        params: &BlendParams,
        mask_origin: Vector2<i32>,
        clip: Option<Rect<i32>>,
    ) {
        let mut area = region.intersection(source.bounds().translate(origin));
        if let Some(clip) = clip {
            area = area.intersection(clip);
        }
        if area.is_empty() || params.opacity <= 0.0 {
            return;
        }
        let acc_width = acc.width() as usize;
        let src_width = source.width() as usize;
        let src_pixels = source.pixels();
        let acc_pixels = acc.pixels_mut();
        for y in area.min().y..area.max().y {
            for x in area.min().x..area.max().x {
                let src_idx = (y - origin.y) as usize * src_width + (x - origin.x) as usize;
                let acc_idx = (y - region.min().y) as usize * acc_width + (x - region.min().x) as usize;
                let coverage = params.coverage(x - mask_origin.x, y - mask_origin.y);
                acc_pixels[acc_idx] =
                    params.composite(acc_pixels[acc_idx], src_pixels[src_idx], coverage, (x, y));
            }
        }
    }
}

/// Mixes an adjusted copy of `acc` (covering the same `region`) back into `acc`
fn mix_adjusted(acc: &mut PixelBuffer, region: Rect<i32>, adjusted: &PixelBuffer, params: &BlendParams) {
    if params.opacity <= 0.0 {
        return;
    }
    let width = region.width() as usize;
    let adjusted = adjusted.pixels();
    acc.pixels_mut()
        .par_chunks_mut(width)
        .zip(adjusted.par_chunks(width))
        .enumerate()
        .for_each(|(row, (acc_row, adj_row))| {
            let y = region.min().y + row as i32;
            for (col, (dst, adj)) in acc_row.iter_mut().zip(adj_row).enumerate() {
                let coverage = params.coverage(region.min().x + col as i32, y);
                *dst = params.mix(*dst, *adj, coverage);
            }
        });
}

/// How one layer is blended onto the layers beneath it
struct BlendParams<'a> {
    mode: BlendMode,
    opacity: f32,
    mask: Option<&'a Mask>,
    space: WorkingSpace,
}

impl BlendParams<'_> {
    /// Opacity times mask coverage at a point in the mask's coordinates
    #[inline]
    fn coverage(&self, x: i32, y: i32) -> f32 {
        match self.mask {
            Some(mask) => self.opacity * mask.coverage_at(x, y),
            None => self.opacity,
        }
    }

    #[inline]
    fn composite(&self, dst: Pixel, src: Pixel, coverage: f32, pos: (i32, i32)) -> Pixel {
        if self.mode != BlendMode::Dissolve {
            let alpha = (src[3] * coverage).clamp(0.0, 1.0);
            if alpha <= 0.0 {
                return dst;
            }
            // Nothing beneath, or nothing of the backdrop shows through: no blending needed
            if dst[3] <= 0.0 {
                return [src[0], src[1], src[2], alpha];
            }
            if self.mode == BlendMode::Normal && alpha >= 1.0 {
                return src;
            }
        }
        let out = blend::composite(
            self.mode,
            decode(self.space, dst),
            decode(self.space, src),
            coverage,
            pos,
        );
        encode(self.space, out)
    }

    #[inline]
    fn mix(&self, dst: Pixel, adjusted: Pixel, coverage: f32) -> Pixel {
        if coverage <= 0.0 {
            return dst;
        }
        if self.mode == BlendMode::Normal && coverage >= 1.0 {
            return adjusted;
        }
        let out = blend::mix_adjusted(
            self.mode,
            decode(self.space, dst),
            decode(self.space, adjusted),
            coverage,
        );
        encode(self.space, out)
    }
}

#[inline]
fn decode(space: WorkingSpace, [r, g, b, a]: Pixel) -> Pixel {
    let [r, g, b] = space.decode_rgb([r, g, b]);
    [r, g, b, a]
}

#[inline]
fn encode(space: WorkingSpace, [r, g, b, a]: Pixel) -> Pixel {
    if a <= 0.0 {
        return TRANSPARENT;
    }
    let [r, g, b] = space.encode_rgb([r, g, b]);
    [r, g, b, a]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        document::Location,
        effects::{AdjustmentKind, AdjustmentOp},
        layer::Property,
    };

    fn config() -> EngineConfig {
        EngineConfig {
            thread_count: 2,
            tile_size: 16,
            ..Default::default()
        }
    }

    fn add(doc: &mut Document, layer: Layer, loc: Location) -> LayerId {
        let id = doc.insert_detached(layer).unwrap();
        doc.attach(id, loc).unwrap();
        id
    }

    fn solid(w: u32, h: u32, px: Pixel) -> Layer {
        Layer::pixel("solid", PixelBuffer::filled(w, h, PixelFormat::Rgba8, px).unwrap())
    }

    fn gradient_doc() -> Document {
        let mut doc = Document::new(40, 30, PixelFormat::Rgba8).unwrap();
        let mut buf = PixelBuffer::new(40, 30, PixelFormat::Rgba8).unwrap();
        for y in 0..30 {
            for x in 0..40 {
                buf.set_pixel(x, y, [x as f32 / 40.0, y as f32 / 30.0, 0.5, 1.0]).unwrap();
            }
        }
        add(&mut doc, Layer::pixel("bg", buf), Location::root(0));
        doc
    }

    fn full(doc: &Document) -> Rect<i32> {
        doc.bounds()
    }

    #[test]
    fn empty_document_renders_transparent() {
        let compositor = Compositor::new(&config()).unwrap();
        let doc = Document::new(10, 10, PixelFormat::Rgba8).unwrap();
        let out = compositor.render(&doc, full(&doc), 1.0).unwrap();
        assert!(out.buffer.pixels().iter().all(|&p| p == TRANSPARENT));
    }

    #[test]
    fn offset_layers_land_in_the_right_place() {
        let compositor = Compositor::new(&config()).unwrap();
        let mut doc = Document::new(20, 20, PixelFormat::Rgba8).unwrap();
        let red = [1.0, 0.0, 0.0, 1.0];
        add(&mut doc, solid(5, 5, red).with_offset(10, 12), Location::root(0));
        let out = compositor.render(&doc, full(&doc), 1.0).unwrap().buffer;
        assert_eq!(out.get_pixel(10, 12).unwrap(), red);
        assert_eq!(out.get_pixel(14, 16).unwrap(), red);
        assert_eq!(out.get_pixel(9, 12).unwrap(), TRANSPARENT);
        assert_eq!(out.get_pixel(15, 16).unwrap(), TRANSPARENT);
    }

    #[test]
    fn viewports_are_windows_onto_the_full_render() {
        let compositor = Compositor::new(&config()).unwrap();
        let doc = gradient_doc();
        let whole = compositor.render(&doc, full(&doc), 1.0).unwrap().buffer;
        let window = Rect::from_min_size(Point2::new(7, 5), Vector2::new(20, 11));
        let part = compositor.render(&doc, window, 1.0).unwrap().buffer;
        assert_eq!(part, whole.crop(window, Vector2::new(0, 0)));
    }

    #[test]
    fn spatial_adjustments_do_not_show_tile_seams() {
        let doc = {
            let mut doc = gradient_doc();
            let blur = AdjustmentOp::with(AdjustmentKind::Blur, "radius", 3.0).unwrap();
            add(&mut doc, Layer::adjustment("blur", blur), Location::root(1));
            doc
        };
        let tiled = Compositor::new(&config()).unwrap();
        let single = Compositor::new(&EngineConfig {
            tile_size: 1024,
            ..config()
        })
        .unwrap();
        let a = tiled.render(&doc, full(&doc), 1.0).unwrap().buffer;
        let b = single.render(&doc, full(&doc), 1.0).unwrap().buffer;
        assert_eq!(a, b);
    }

    #[test]
    fn cached_renders_match_fresh_ones() {
        let compositor = Compositor::new(&config()).unwrap();
        let mut doc = gradient_doc();
        let op = AdjustmentOp::with(AdjustmentKind::Contrast, "amount", 30.0).unwrap();
        let adj = add(&mut doc, Layer::adjustment("contrast", op), Location::root(1));
        compositor.render(&doc, full(&doc), 1.0).unwrap();

        doc.set_property(adj, Property::Opacity(0.4)).unwrap();
        let cached = compositor.render(&doc, full(&doc), 1.0).unwrap().buffer;
        assert!(compositor.cache().stats().hits > 0);

        let fresh = Compositor::new(&config()).unwrap();
        assert_eq!(cached, fresh.render(&doc, full(&doc), 1.0).unwrap().buffer);
    }

    #[test]
    fn corrupt_layers_are_skipped_with_a_warning() {
        let compositor = Compositor::new(&config()).unwrap();
        let mut doc = Document::new(4, 4, PixelFormat::RgbaF32).unwrap();
        let good = [0.2, 0.4, 0.6, 1.0];
        add(&mut doc, solid(4, 4, good), Location::root(0));
        let mut bad = PixelBuffer::filled(4, 4, PixelFormat::RgbaF32, [1.0; 4]).unwrap();
        bad.set_pixel(1, 1, [f32::NAN, 0.0, 0.0, 1.0]).unwrap();
        let bad_id = add(&mut doc, Layer::pixel("bad", bad), Location::root(1));

        let out = compositor.render(&doc, full(&doc), 1.0).unwrap();
        assert_eq!(out.warnings.len(), 1);
        assert_eq!(out.warnings[0].layer, bad_id);
        assert!(out.buffer.pixels().iter().all(|&p| p == good));
    }

    #[test]
    fn groups_clip_their_contents() {
        let compositor = Compositor::new(&config()).unwrap();
        let mut doc = Document::new(10, 10, PixelFormat::Rgba8).unwrap();
        let clip = Rect::from_min_size(Point2::new(2, 2), Vector2::new(3, 3));
        let group = add(&mut doc, Layer::group("g").with_clip(clip), Location::root(0));
        let white = [1.0; 4];
        add(&mut doc, solid(10, 10, white), Location::in_group(group, 0));
        let out = compositor.render(&doc, full(&doc), 1.0).unwrap().buffer;
        assert_eq!(out.get_pixel(2, 2).unwrap(), white);
        assert_eq!(out.get_pixel(4, 4).unwrap(), white);
        assert_eq!(out.get_pixel(5, 5).unwrap(), TRANSPARENT);
        assert_eq!(out.get_pixel(1, 3).unwrap(), TRANSPARENT);
    }

    #[test]
    fn zoom_resamples_the_output() {
        let compositor = Compositor::new(&config()).unwrap();
        let doc = gradient_doc();
        let out = compositor.render(&doc, full(&doc), 0.5).unwrap().buffer;
        assert_eq!((out.width(), out.height()), (20, 15));
        let out = compositor.render(&doc, full(&doc), 2.0).unwrap().buffer;
        assert_eq!((out.width(), out.height()), (80, 60));
        assert!(compositor.render(&doc, full(&doc), 0.0).is_err());
    }

    #[test]
    fn newer_requests_cancel_older_ones() {
        let compositor = Compositor::new(&config()).unwrap();
        let doc = gradient_doc();
        let first = compositor.request_render(doc.clone(), full(&doc), 1.0);
        let second = compositor.request_render(doc.clone(), full(&doc), 1.0);
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert!(first.wait().is_none());
        let out = second.wait().unwrap().unwrap();
        assert_eq!(out.buffer, compositor.render(&doc, full(&doc), 1.0).unwrap().buffer);
    }
}
