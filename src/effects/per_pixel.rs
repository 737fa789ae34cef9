use rayon::prelude::*;

use crate::{
    buffer::PixelBuffer,
    color::{self, Rgb, WorkingSpace},
    utils::Rect,
};

use super::{EffectType, ParamSpec, ResolvedParams};

/// The colour space in which a [`PerPixel`] effect does its arithmetic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpSpace {
    /// Always linear light, for physically-based operations like exposure
    Linear,
    /// Whatever [`WorkingSpace`] the engine is configured with
    Working,
    /// The stored (display-encoded) values, for operations which are defined on what the user
    /// sees (curves, levels, inversion)
    Display,
}

impl OpSpace {
    fn resolve(self, working: WorkingSpace) -> WorkingSpace {
        match self {
            Self::Linear => WorkingSpace::Linear,
            Self::Working => working,
            Self::Display => WorkingSpace::Srgb,
        }
    }
}

/// An effect who's effect can be computed independently for each pixel.  Alpha is never touched.
#[derive(Debug)]
pub struct PerPixel {
    pub(super) name: &'static str,
    pub(super) params: &'static [ParamSpec],
    pub(super) space: OpSpace,
    pub(super) map: fn(Rgb, &ResolvedParams) -> Rgb,
}

impl EffectType for PerPixel {
    fn name(&self) -> &'static str {
        self.name
    }

    fn params(&self) -> &'static [ParamSpec] {
        self.params
    }

    fn apply(
        &self,
        source: &PixelBuffer,
        params: &ResolvedParams,
        working: WorkingSpace,
    ) -> PixelBuffer {
        let space = self.space.resolve(working);
        let map = self.map;
        let mut out = source.clone();
        out.pixels_mut().par_iter_mut().for_each(|px| {
            let [r, g, b, a] = *px;
            let mapped = map(space.decode_rgb([r, g, b]), params);
            let [r, g, b] = space.encode_rgb(mapped);
            *px = [r, g, b, a];
        });
        out
    }

    fn transform_bbox(&self, _params: &ResolvedParams, r: Rect<i32>) -> Rect<i32> {
        r // Per-pixel effects don't change the bbox; they transform the pixels individually
    }

    fn inv_transform_bbox(&self, _params: &ResolvedParams, r: Rect<i32>) -> Rect<i32> {
        r // Per-pixel effects don't change the bbox; they transform the pixels individually
    }
}

///////////////////
// PIXEL MAPPERS //
///////////////////

// Slider parameters are on a -100..100 scale
fn unit(params: &ResolvedParams, name: &str) -> f32 {
    params.get(name) / 100.0
}

fn map3(c: Rgb, f: impl Fn(f32) -> f32) -> Rgb {
    [f(c[0]), f(c[1]), f(c[2])]
}

fn smoothstep(lo: f32, hi: f32, x: f32) -> f32 {
    let t = ((x - lo) / (hi - lo)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Scales linear light by up to ±2 stops
pub(super) fn exposure(c: Rgb, p: &ResolvedParams) -> Rgb {
    let gain = 2f32.powf(p.get("amount") / 50.0);
    map3(c, |v| v * gain)
}

pub(super) fn contrast(c: Rgb, p: &ResolvedParams) -> Rgb {
    let slant = 1.0 + unit(p, "amount");
    map3(c, |v| (v - 0.5) * slant + 0.5)
}

pub(super) fn highlights(c: Rgb, p: &ResolvedParams) -> Rgb {
    let weight = smoothstep(0.25, 1.0, color::luminance(c));
    let lift = 0.5 * unit(p, "amount") * weight;
    map3(c, |v| v + lift)
}

pub(super) fn shadows(c: Rgb, p: &ResolvedParams) -> Rgb {
    let weight = 1.0 - smoothstep(0.0, 0.75, color::luminance(c));
    let lift = 0.5 * unit(p, "amount") * weight;
    map3(c, |v| v + lift)
}

/// White balance: positive amounts warm the image, positive tint pushes towards magenta
pub(super) fn temperature(c: Rgb, p: &ResolvedParams) -> Rgb {
    let t = unit(p, "amount");
    let tint = unit(p, "tint");
    [c[0] * (1.0 + 0.2 * t), c[1] * (1.0 - 0.2 * tint), c[2] * (1.0 - 0.2 * t)]
}

pub(super) fn saturation(c: Rgb, p: &ResolvedParams) -> Rgb {
    let l = color::luminance(c);
    let factor = 1.0 + unit(p, "amount");
    map3(c, |v| l + (v - l) * factor)
}

/// Like saturation, but boosts muted colours more than already-saturated ones
pub(super) fn vibrance(c: Rgb, p: &ResolvedParams) -> Rgb {
    let l = color::luminance(c);
    let chroma = (c[0].max(c[1]).max(c[2]) - c[0].min(c[1]).min(c[2])).clamp(0.0, 1.0);
    let factor = 1.0 + unit(p, "amount") * (1.0 - chroma);
    map3(c, |v| l + (v - l) * factor)
}

pub(super) fn hsl(c: Rgb, p: &ResolvedParams) -> Rgb {
    let (h, s, l) = color::rgb_to_hsl(c);
    let h = h + p.get("hue") / 360.0;
    let s = (s * (1.0 + unit(p, "saturation"))).max(0.0);
    let k = unit(p, "lightness");
    let l = if k >= 0.0 { l + (1.0 - l) * k } else { l * (1.0 + k) };
    color::hsl_to_rgb(h, s, l)
}

/// Piecewise-linear tone curve through five control points at fixed inputs, extrapolated with the
/// end slopes so that out-of-range values aren't clipped here
pub(super) fn curves(c: Rgb, p: &ResolvedParams) -> Rgb {
    let outs = [
        unit(p, "black"),
        unit(p, "shadows"),
        unit(p, "midtones"),
        unit(p, "highlights"),
        unit(p, "white"),
    ];
    map3(c, |v| {
        let seg = ((v * 4.0).floor() as i32).clamp(0, 3) as usize;
        let t = v * 4.0 - seg as f32;
        outs[seg] + (outs[seg + 1] - outs[seg]) * t
    })
}

pub(super) fn levels(c: Rgb, p: &ResolvedParams) -> Rgb {
    let in_black = p.get("in_black");
    // A degenerate input range would divide by zero; treat it as a hard threshold
    let in_range = (p.get("in_white") - in_black).max(1e-4);
    let gamma = p.get("gamma");
    let out_black = p.get("out_black");
    let out_range = p.get("out_white") - out_black;
    map3(c, |v| {
        let n = (v - in_black) / in_range;
        let g = n.abs().powf(1.0 / gamma).copysign(n);
        out_black + g * out_range
    })
}

pub(super) fn invert(c: Rgb, _p: &ResolvedParams) -> Rgb {
    map3(c, |v| 1.0 - v)
}

#[cfg(test)]
mod tests {
    use crate::{
        buffer::{PixelBuffer, PixelFormat},
        color::WorkingSpace,
        effects::{AdjustmentKind, AdjustmentOp},
        types::params,
    };

    fn single(px: [f32; 4], format: PixelFormat) -> PixelBuffer {
        PixelBuffer::filled(1, 1, format, px).unwrap()
    }

    fn apply(kind: AdjustmentKind, p: &[(&'static str, f32)], px: [f32; 4]) -> [f32; 4] {
        let op = AdjustmentOp::new(kind, params(p.iter().copied())).unwrap();
        op.apply(&single(px, PixelFormat::RgbaF32), WorkingSpace::Linear)
            .unwrap()
            .get_pixel(0, 0)
            .unwrap()
    }

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn exposure_doubles_linear_light_per_50() {
        let mid = crate::color::linear_to_srgb(0.2);
        let [r, _, _, a] = apply(AdjustmentKind::Exposure, &[("amount", 50.0)], [mid, 0.0, 0.0, 0.5]);
        assert!(close(crate::color::srgb_to_linear(r), 0.4));
        assert_eq!(a, 0.5); // alpha untouched
    }

    #[test]
    fn zero_amounts_are_identity() {
        let px = [0.3, 0.6, 0.9, 1.0];
        for kind in [
            AdjustmentKind::Exposure,
            AdjustmentKind::Contrast,
            AdjustmentKind::Saturation,
            AdjustmentKind::Vibrance,
            AdjustmentKind::Temperature,
        ] {
            let out = apply(kind, &[("amount", 0.0)], px);
            for i in 0..3 {
                assert!(close(out[i], px[i]), "{:?}", kind);
            }
        }
        let out = apply(AdjustmentKind::Curves, &[], px);
        for i in 0..3 {
            assert!(close(out[i], px[i]));
        }
    }

    #[test]
    fn float_buffers_are_not_clipped_but_integer_ones_are() {
        let op = AdjustmentOp::with(AdjustmentKind::Exposure, "amount", 100.0).unwrap();
        let bright = [0.9, 0.9, 0.9, 1.0];
        let f = op.apply(&single(bright, PixelFormat::RgbaF32), WorkingSpace::Linear).unwrap();
        assert!(f.get_pixel(0, 0).unwrap()[0] > 1.0);
        let i = op.apply(&single(bright, PixelFormat::Rgba8), WorkingSpace::Linear).unwrap();
        assert_eq!(i.get_pixel(0, 0).unwrap()[0], 1.0);
    }

    #[test]
    fn desaturation_gives_grey() {
        let [r, g, b, _] = apply(AdjustmentKind::Saturation, &[("amount", -100.0)], [0.8, 0.2, 0.1, 1.0]);
        assert!(close(r, g) && close(g, b));
    }

    #[test]
    fn invert_works_on_displayed_values() {
        let [r, g, b, _] = apply(AdjustmentKind::Invert, &[], [0.25, 0.5, 1.0, 1.0]);
        assert!(close(r, 0.75) && close(g, 0.5) && close(b, 0.0));
    }

    #[test]
    fn levels_stretch_input_range() {
        let p = [("in_black", 0.2), ("in_white", 0.6)];
        let [r, g, b, _] = apply(AdjustmentKind::Levels, &p, [0.2, 0.4, 0.6, 1.0]);
        assert!(close(r, 0.0) && close(g, 0.5) && close(b, 1.0));
    }

    #[test]
    fn hue_rotation_moves_red_towards_green() {
        let [r, g, _, _] = apply(AdjustmentKind::Hsl, &[("hue", 120.0)], [1.0, 0.0, 0.0, 1.0]);
        assert!(g > r);
    }
}
