//! End-to-end behaviour of the engine, driven through the public `Context` API.

use std::sync::{Arc, Mutex};

use cgmath::Point2;
use layered::{
    color::{linear_to_srgb, srgb_to_linear},
    render::Compositor,
    AdjustmentKind, AdjustmentOp, BlendMode, Brush, BrushMode, Context, EditKind, EngineConfig,
    Error, Layer, LayerEvent, Location, Mask, Pixel, PixelBuffer, PixelFormat, PropertyKind, Rect,
    WorkingSpace,
};

const RED: Pixel = [180.0 / 255.0, 20.0 / 255.0, 20.0 / 255.0, 1.0];
const WHITE: Pixel = [1.0; 4];

fn config() -> EngineConfig {
    EngineConfig {
        thread_count: 2,
        tile_size: 32,
        ..EngineConfig::default()
    }
}

fn solid(width: u32, height: u32, colour: Pixel) -> PixelBuffer {
    PixelBuffer::filled(width, height, PixelFormat::Rgba8, colour).unwrap()
}

fn exposure(amount: f32) -> AdjustmentOp {
    AdjustmentOp::with(AdjustmentKind::Exposure, "amount", amount).unwrap()
}

fn assert_uniform(buffer: &PixelBuffer) -> Pixel {
    let first = buffer.pixels()[0];
    assert!(buffer.pixels().iter().all(|&px| px == first), "buffer isn't uniform");
    first
}

fn close(a: f32, b: f32) -> bool {
    (a - b).abs() <= 1.0 / 255.0 + 1e-6
}

#[test]
fn red_background_scenario() {
    let mut ctx = Context::new(config(), 100, 100, PixelFormat::Rgba8).unwrap();
    let bg = ctx
        .add_layer_on_top(Layer::pixel("Background", solid(100, 100, RED)))
        .unwrap();

    // A single opaque layer renders as exactly itself
    let plain = ctx.render_full().unwrap();
    assert!(plain.warnings.is_empty());
    assert_eq!(plain.buffer.dimensions(), cgmath::Vector2::new(100, 100));
    assert_eq!(assert_uniform(&plain.buffer), RED);

    // Exposure +50 brightens every channel
    ctx.add_layer_on_top(Layer::adjustment("Exposure", exposure(50.0)))
        .unwrap();
    let bright = assert_uniform(&ctx.render_full().unwrap().buffer);
    assert!(bright[0] > RED[0]);
    assert!(bright[1] > RED[1] && bright[2] > RED[2]);
    assert_eq!(bright[3], 1.0);

    // Undoing the adjustment gives back the original render
    assert!(ctx.undo().unwrap());
    assert_eq!(ctx.render_full().unwrap().buffer, plain.buffer);

    // Half-transparent red over white is pink
    ctx.add_layer(Layer::pixel("White", solid(100, 100, WHITE)), Location::root(0))
        .unwrap();
    ctx.set_opacity(bg, 0.5).unwrap();
    let pink = assert_uniform(&ctx.render_full().unwrap().buffer);
    for c in 0..3 {
        let expected = linear_to_srgb(0.5 * srgb_to_linear(RED[c]) + 0.5);
        assert!(close(pink[c], expected), "channel {}: {} vs {}", c, pink[c], expected);
    }
    assert_eq!(pink[3], 1.0);
    assert!(pink[0] > pink[1] && pink[1] > RED[1]);
}

#[test]
fn normal_blend_in_srgb_follows_the_textbook_formula() {
    let config = EngineConfig {
        working_space: WorkingSpace::Srgb,
        ..config()
    };
    let mut ctx = Context::new(config, 8, 8, PixelFormat::RgbaF32).unwrap();
    ctx.add_layer_on_top(Layer::pixel("White", PixelBuffer::filled(8, 8, PixelFormat::RgbaF32, WHITE).unwrap()))
        .unwrap();
    let red = PixelBuffer::filled(8, 8, PixelFormat::RgbaF32, RED).unwrap();
    ctx.add_layer_on_top(Layer::pixel("Red", red).with_opacity(0.5))
        .unwrap();
    let px = assert_uniform(&ctx.render_full().unwrap().buffer);
    for c in 0..3 {
        assert!((px[c] - (0.5 * RED[c] + 0.5)).abs() < 1e-5);
    }
}

#[test]
fn compositing_depends_on_order() {
    let mut ctx = Context::new(config(), 16, 16, PixelFormat::Rgba8).unwrap();
    let a = ctx
        .add_layer_on_top(Layer::pixel("A", solid(16, 16, [0.8, 0.2, 0.2, 1.0])))
        .unwrap();
    ctx.add_layer_on_top(
        Layer::pixel("B", solid(16, 16, [0.5, 0.5, 0.9, 1.0])).with_blend_mode(BlendMode::Multiply),
    )
    .unwrap();
    let before = ctx.render_full().unwrap().buffer;

    ctx.reorder(a, 1).unwrap();
    let after = ctx.render_full().unwrap().buffer;
    assert_ne!(before, after);

    // Putting them back gives the original result
    ctx.reorder(a, 0).unwrap();
    assert_eq!(ctx.render_full().unwrap().buffer, before);
}

#[test]
fn undo_and_redo_round_trip() {
    let mut ctx = Context::new(config(), 20, 20, PixelFormat::Rgba8).unwrap();
    let bg = ctx
        .add_layer_on_top(Layer::pixel("bg", solid(20, 20, RED)))
        .unwrap();
    let group = ctx.add_layer_on_top(Layer::group("group")).unwrap();
    let adj = ctx
        .add_layer_on_top(Layer::adjustment("exp", exposure(10.0)))
        .unwrap();

    let edits: Vec<Box<dyn Fn(&mut Context)>> = vec![
        Box::new(move |ctx| ctx.move_layer(adj, Location::in_group(group, 0)).unwrap()),
        Box::new(move |ctx| ctx.set_opacity(bg, 0.25).unwrap()),
        Box::new(move |ctx| ctx.set_blend_mode(group, BlendMode::Screen).unwrap()),
        Box::new(move |ctx| ctx.set_adjustment(adj, exposure(-30.0)).unwrap()),
        Box::new(move |ctx| ctx.remove_layer(group).unwrap()),
    ];
    for edit in edits {
        let before = ctx.document().clone();
        edit(&mut ctx);
        let after = ctx.document().clone();
        assert_ne!(before, after);

        assert!(ctx.undo().unwrap());
        assert_eq!(*ctx.document(), before);
        assert!(ctx.redo().unwrap());
        assert_eq!(*ctx.document(), after);
    }

    // Undoing everything leaves an empty document, and further undos do nothing
    while ctx.can_undo() {
        ctx.undo().unwrap();
    }
    assert!(ctx.document().is_empty());
    assert!(!ctx.undo().unwrap());
}

#[test]
fn undo_past_the_history_limit_is_reported() {
    let config = EngineConfig {
        history_limit: 2,
        ..config()
    };
    let mut ctx = Context::new(config, 4, 4, PixelFormat::Rgba8).unwrap();
    let id = ctx
        .add_layer_on_top(Layer::pixel("bg", solid(4, 4, RED)))
        .unwrap();
    ctx.set_opacity(id, 0.5).unwrap();
    ctx.set_opacity(id, 0.2).unwrap();

    assert!(ctx.undo().unwrap());
    assert!(ctx.undo().unwrap());
    assert!(matches!(ctx.undo(), Err(Error::HistoryTruncated)));
    assert_eq!(ctx.layer(id).unwrap().opacity(), 1.0);
}

#[test]
fn cached_renders_match_fresh_renders() {
    let mut ctx = Context::new(config(), 70, 50, PixelFormat::Rgba8).unwrap();
    let mut gradient = PixelBuffer::new(70, 50, PixelFormat::Rgba8).unwrap();
    for y in 0..50 {
        for x in 0..70 {
            let px = [x as f32 / 70.0, y as f32 / 50.0, 0.5, 1.0];
            gradient.set_pixel(x, y, px).unwrap();
        }
    }
    let bg = ctx.add_layer_on_top(Layer::pixel("bg", gradient)).unwrap();
    let blur = AdjustmentOp::with(AdjustmentKind::Blur, "radius", 3.0).unwrap();
    let blur = ctx.add_layer_on_top(Layer::adjustment("blur", blur)).unwrap();
    let group = ctx.add_layer_on_top(Layer::group("group")).unwrap();
    let top = ctx
        .add_layer(
            Layer::pixel("top", solid(20, 20, [0.1, 0.9, 0.3, 0.7])).with_offset(30, 10),
            Location::in_group(group, 0),
        )
        .unwrap();

    let check = |ctx: &Context| {
        let cached = ctx.render_full().unwrap().buffer;
        let fresh = Compositor::new(ctx.config())
            .unwrap()
            .render(ctx.document(), ctx.document().bounds(), 1.0)
            .unwrap()
            .buffer;
        assert_eq!(cached, fresh);
    };

    check(&ctx);
    ctx.set_opacity(bg, 0.6).unwrap();
    check(&ctx);
    ctx.set_offset(top, 5, 25).unwrap();
    check(&ctx);
    ctx.reorder(blur, 2).unwrap();
    check(&ctx);
    ctx.set_blend_mode(group, BlendMode::Overlay).unwrap();
    check(&ctx);
    ctx.undo().unwrap();
    ctx.undo().unwrap();
    check(&ctx);
    assert!(ctx.compositor().cache().stats().hits > 0);
}

#[test]
fn mask_coverage_is_monotonic_in_strength() {
    let centre = Point2::new(12.0, 9.0);
    for hardness in [0.0, 50.0, 100.0] {
        let mut weak = Mask::empty(25, 20);
        let mut strong = Mask::empty(25, 20);
        weak.paint_stroke(centre, 6.0, hardness, 0.3);
        strong.paint_stroke(centre, 6.0, hardness, 0.8);
        for y in 0..20 {
            for x in 0..25 {
                assert!(strong.get(x, y).unwrap() >= weak.get(x, y).unwrap());
            }
        }
    }
}

#[test]
fn renders_are_deterministic() {
    let build = || {
        let mut ctx = Context::new(config(), 40, 30, PixelFormat::Rgba16).unwrap();
        let mut buffer = PixelBuffer::new(40, 30, PixelFormat::Rgba16).unwrap();
        for y in 0..30 {
            for x in 0..40 {
                let px = [(x * y) as f32 / 1200.0, x as f32 / 40.0, y as f32 / 30.0, 0.8];
                buffer.set_pixel(x, y, px).unwrap();
            }
        }
        ctx.add_layer_on_top(Layer::pixel("bg", buffer)).unwrap();
        let sharpen = AdjustmentOp::with(AdjustmentKind::Sharpen, "radius", 1.5).unwrap();
        ctx.add_layer_on_top(Layer::adjustment("sharpen", sharpen)).unwrap();
        ctx.add_layer_on_top(
            Layer::pixel("speckle", solid(40, 30, [0.2, 0.3, 0.9, 1.0]))
                .with_blend_mode(BlendMode::Dissolve)
                .with_opacity(0.4),
        )
        .unwrap();
        ctx
    };
    let first = build().render_full().unwrap().buffer;
    let second = build().render_full().unwrap().buffer;
    assert_eq!(first.as_bytes(), second.as_bytes());
}

#[test]
fn strokes_are_one_undoable_command() {
    let mut ctx = Context::new(config(), 30, 30, PixelFormat::Rgba8).unwrap();
    let id = ctx
        .add_layer(Layer::pixel("bg", solid(20, 20, RED)).with_offset(10, 10), Location::root(0))
        .unwrap();
    let brush = Brush {
        radius: 3.0,
        hardness: 100.0,
        mode: BrushMode::Conceal,
        ..Brush::default()
    };

    // Positions are in document space; the mask is in layer space
    ctx.stroke_begin(id, Point2::new(15.0, 15.0), brush).unwrap();
    ctx.stroke_move(Point2::new(20.0, 15.0)).unwrap();
    ctx.stroke_move(Point2::new(25.0, 15.0)).unwrap();
    assert!(matches!(
        ctx.add_layer_on_top(Layer::group("g")),
        Err(Error::EditInProgress)
    ));
    assert!(ctx.stroke_end().unwrap());

    let mask = ctx.layer(id).unwrap().mask().unwrap();
    assert_eq!(mask.get(5, 5).unwrap(), 0.0);
    assert_eq!(mask.get(15, 5).unwrap(), 0.0);
    assert_eq!(mask.get(0, 19).unwrap(), 1.0);
    let render = ctx.render_full().unwrap().buffer;
    assert_eq!(render.get_pixel(20, 15).unwrap()[3], 0.0);
    assert_eq!(render.get_pixel(11, 28).unwrap(), RED);

    // One undo takes away the whole stroke
    assert!(ctx.undo().unwrap());
    assert!(ctx.layer(id).unwrap().mask().is_none());
    assert_eq!(ctx.render_full().unwrap().buffer.get_pixel(20, 15).unwrap(), RED);
}

#[test]
fn slider_drags_commit_as_one_command() {
    let mut ctx = Context::new(config(), 4, 4, PixelFormat::Rgba8).unwrap();
    let id = ctx
        .add_layer_on_top(Layer::pixel("bg", solid(4, 4, RED)))
        .unwrap();
    let len = ctx.history().len();

    ctx.begin_edit(id, EditKind::Property(PropertyKind::Opacity)).unwrap();
    for i in 1..10 {
        ctx.set_opacity(id, 1.0 - i as f32 * 0.05).unwrap();
    }
    assert!(matches!(ctx.set_visible(id, false), Err(Error::EditInProgress)));
    assert!(ctx.commit_edit().unwrap());
    assert_eq!(ctx.history().len(), len + 1);
    assert!((ctx.layer(id).unwrap().opacity() - 0.55).abs() < 1e-6);

    ctx.undo().unwrap();
    assert_eq!(ctx.layer(id).unwrap().opacity(), 1.0);

    // Undo while dragging only cancels the drag
    ctx.begin_edit(id, EditKind::Property(PropertyKind::Opacity)).unwrap();
    ctx.set_opacity(id, 0.1).unwrap();
    assert!(ctx.undo().unwrap());
    assert_eq!(ctx.layer(id).unwrap().opacity(), 1.0);
    assert_eq!(ctx.history().len(), len + 1);
}

#[test]
fn listeners_follow_every_change() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let mut ctx = Context::new(config(), 4, 4, PixelFormat::Rgba8).unwrap();
    let sink = events.clone();
    ctx.add_listener(move |event: &LayerEvent| sink.lock().unwrap().push(*event));

    let a = ctx.add_layer_on_top(Layer::group("a")).unwrap();
    let b = ctx.add_layer_on_top(Layer::group("b")).unwrap();
    ctx.reorder(b, 0).unwrap();
    ctx.set_visible(a, false).unwrap();
    ctx.remove_layer(a).unwrap();
    ctx.undo().unwrap();

    let events = events.lock().unwrap();
    assert_eq!(
        *events,
        vec![
            LayerEvent::Added { id: a, at: Location::root(0) },
            LayerEvent::Added { id: b, at: Location::root(1) },
            LayerEvent::Reordered { id: b, from: Location::root(1), to: Location::root(0) },
            LayerEvent::PropertyChanged { id: a, property: PropertyKind::Visible },
            LayerEvent::Removed { id: a, at: Location::root(1) },
            LayerEvent::Added { id: a, at: Location::root(1) },
        ]
    );
}

#[test]
fn async_renders_deliver_the_latest_request() {
    let mut ctx = Context::new(config(), 64, 64, PixelFormat::Rgba8).unwrap();
    ctx.add_layer_on_top(Layer::pixel("bg", solid(64, 64, RED)))
        .unwrap();
    let viewport = Rect::from_origin(48, 48);

    let old = ctx.request_render(viewport, 1.0);
    let new = ctx.request_render(viewport, 0.5);
    assert!(old.is_cancelled());
    assert!(old.wait().is_none());

    let output = new.wait().unwrap().unwrap();
    assert_eq!(output.buffer, ctx.render(viewport, 0.5).unwrap().buffer);
    assert_eq!(output.buffer.width(), 24);
}

#[test]
fn documents_survive_save_and_load() {
    let dir = std::env::temp_dir().join(format!("layered-scenario-{}", std::process::id()));
    let mut ctx = Context::new(config(), 32, 24, PixelFormat::Rgba8).unwrap();
    let bg = ctx
        .add_layer_on_top(Layer::pixel("bg", solid(32, 24, RED)))
        .unwrap();
    ctx.add_layer_on_top(Layer::adjustment("exp", exposure(20.0)).with_opacity(0.4))
        .unwrap();
    let brush = Brush {
        mode: BrushMode::Conceal,
        radius: 5.0,
        feather: 2.0,
        ..Brush::default()
    };
    ctx.stroke_begin(bg, Point2::new(10.0, 10.0), brush).unwrap();
    ctx.stroke_end().unwrap();
    ctx.save_document(&dir).unwrap();

    let loaded = Context::load_document(&dir, config()).unwrap();
    assert_eq!(loaded.document(), ctx.document());
    assert_eq!(loaded.render_full().unwrap().buffer, ctx.render_full().unwrap().buffer);
    assert!(!loaded.can_undo());
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn editing_a_grouped_layer_only_drops_its_own_branch_from_the_cache() {
    let mut ctx = Context::new(config(), 64, 64, PixelFormat::Rgba8).unwrap();
    let sibling = ctx
        .add_layer_on_top(Layer::pixel("sibling", solid(64, 64, WHITE)))
        .unwrap();
    let group = ctx.add_layer_on_top(Layer::group("group")).unwrap();
    let child = ctx
        .add_layer(Layer::pixel("child", solid(32, 32, RED)), Location::in_group(group, 0))
        .unwrap();

    ctx.render_full().unwrap();
    let cache = ctx.compositor().cache();
    for id in [sibling, group, child] {
        assert!(cache.contains_layer(id), "{:?} wasn't cached", id);
    }

    ctx.set_opacity(child, 0.5).unwrap();
    let cache = ctx.compositor().cache();
    assert!(!cache.contains_layer(child));
    assert!(!cache.contains_layer(group));
    assert!(cache.contains_layer(sibling));

    // The next render reuses the sibling's partial composite
    let hits = cache.stats().hits;
    ctx.render_full().unwrap();
    assert!(ctx.compositor().cache().stats().hits > hits);
}
