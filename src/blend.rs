//! Blend modes and the per-pixel compositing formula.
//!
//! All colour values here are straight-alpha and already converted into the working space; the
//! compositor takes care of the conversions.

use serde::{Deserialize, Serialize};

use crate::{buffer::Pixel, color::Rgb};

/// Blend mode for compositing layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendMode {
    // Normal modes
    #[default]
    Normal,
    Dissolve,

    // Darken group
    Darken,
    Multiply,
    ColorBurn,
    LinearBurn,

    // Lighten group
    Lighten,
    Screen,
    ColorDodge,
    LinearDodge,

    // Contrast group
    Overlay,
    SoftLight,
    HardLight,

    // Inversion group
    Difference,
    Exclusion,

    // Component group
    Hue,
    Saturation,
    Color,
    Luminosity,
}

impl BlendMode {
    /// All blend modes in display order.
    pub const ALL: [BlendMode; 19] = [
        Self::Normal,
        Self::Dissolve,
        Self::Darken,
        Self::Multiply,
        Self::ColorBurn,
        Self::LinearBurn,
        Self::Lighten,
        Self::Screen,
        Self::ColorDodge,
        Self::LinearDodge,
        Self::Overlay,
        Self::SoftLight,
        Self::HardLight,
        Self::Difference,
        Self::Exclusion,
        Self::Hue,
        Self::Saturation,
        Self::Color,
        Self::Luminosity,
    ];

    /// Human-readable name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Normal => "Normal",
            Self::Dissolve => "Dissolve",
            Self::Darken => "Darken",
            Self::Multiply => "Multiply",
            Self::ColorBurn => "Color Burn",
            Self::LinearBurn => "Linear Burn",
            Self::Lighten => "Lighten",
            Self::Screen => "Screen",
            Self::ColorDodge => "Color Dodge",
            Self::LinearDodge => "Linear Dodge (Add)",
            Self::Overlay => "Overlay",
            Self::SoftLight => "Soft Light",
            Self::HardLight => "Hard Light",
            Self::Difference => "Difference",
            Self::Exclusion => "Exclusion",
            Self::Hue => "Hue",
            Self::Saturation => "Saturation",
            Self::Color => "Color",
            Self::Luminosity => "Luminosity",
        }
    }

    /// Computes `B(Cb, Cs)`: the colour which results from blending `src` over `dst` where both
    /// are fully opaque.
    pub fn blend(self, dst: Rgb, src: Rgb) -> Rgb {
        match self {
            Self::Normal | Self::Dissolve => src,
            Self::Darken => separable(dst, src, f32::min),
            Self::Multiply => separable(dst, src, multiply),
            Self::ColorBurn => separable(dst, src, color_burn),
            Self::LinearBurn => separable(dst, src, |b, s| b + s - 1.0),
            Self::Lighten => separable(dst, src, f32::max),
            Self::Screen => separable(dst, src, screen),
            Self::ColorDodge => separable(dst, src, color_dodge),
            Self::LinearDodge => separable(dst, src, |b, s| b + s),
            Self::Overlay => separable(dst, src, |b, s| hard_light(s, b)),
            Self::SoftLight => separable(dst, src, soft_light),
            Self::HardLight => separable(dst, src, hard_light),
            Self::Difference => separable(dst, src, |b, s| (b - s).abs()),
            Self::Exclusion => separable(dst, src, |b, s| b + s - 2.0 * b * s),
            Self::Hue => set_lum(set_sat(src, sat(dst)), lum(dst)),
            Self::Saturation => set_lum(set_sat(dst, sat(src)), lum(dst)),
            Self::Color => set_lum(src, lum(dst)),
            Self::Luminosity => set_lum(dst, lum(src)),
        }
    }
}

/// Composites `src` onto `dst` with the general source-over formula.  `coverage` (opacity times
/// mask) scales the source alpha; `pos` seeds the dissolve pattern.
///
/// For an opaque destination this reduces to `dst * (1 - α) + B(dst, src) * α` with
/// `α = coverage * src_alpha`.
pub fn composite(mode: BlendMode, dst: Pixel, src: Pixel, coverage: f32, pos: (i32, i32)) -> Pixel {
    let mut a_s = (src[3] * coverage).clamp(0.0, 1.0);
    if mode == BlendMode::Dissolve {
        a_s = if dissolve_threshold(pos) < a_s { 1.0 } else { 0.0 };
    }
    if a_s <= 0.0 {
        return dst;
    }
    let a_b = dst[3];
    let cb = [dst[0], dst[1], dst[2]];
    let cs = [src[0], src[1], src[2]];
    let b = mode.blend(cb, cs);

    let a_o = a_s + a_b * (1.0 - a_s);
    let mut out = [0.0, 0.0, 0.0, a_o];
    for c in 0..3 {
        // Where the backdrop is transparent the source shows through un-blended
        let cs_mixed = (1.0 - a_b) * cs[c] + a_b * b[c];
        out[c] = (a_s * cs_mixed + a_b * (1.0 - a_s) * cb[c]) / a_o;
    }
    out
}

/// Mixes the result of an adjustment back into the backdrop it was computed from.  The adjustment
/// replaces the backdrop (through the blend mode) in proportion to `coverage`.
pub fn mix_adjusted(mode: BlendMode, dst: Pixel, adjusted: Pixel, coverage: f32) -> Pixel {
    let alpha = coverage.clamp(0.0, 1.0);
    if alpha <= 0.0 {
        return dst;
    }
    let b = mode.blend([dst[0], dst[1], dst[2]], [adjusted[0], adjusted[1], adjusted[2]]);
    [
        dst[0] + (b[0] - dst[0]) * alpha,
        dst[1] + (b[1] - dst[1]) * alpha,
        dst[2] + (b[2] - dst[2]) * alpha,
        dst[3] + (adjusted[3] - dst[3]) * alpha,
    ]
}

/// A stable pseudo-random value in `[0, 1)` for each pixel position
fn dissolve_threshold((x, y): (i32, i32)) -> f32 {
    let mut h = (x as u32).wrapping_mul(0x9E37_79B9) ^ (y as u32).wrapping_mul(0x85EB_CA6B);
    h ^= h >> 16;
    h = h.wrapping_mul(0x7FEB_352D);
    h ^= h >> 15;
    h = h.wrapping_mul(0x846C_A68B);
    h ^= h >> 16;
    (h >> 8) as f32 / (1u32 << 24) as f32
}

/////////////////////
// SEPARABLE MODES //
/////////////////////

#[inline]
fn separable(dst: Rgb, src: Rgb, f: impl Fn(f32, f32) -> f32) -> Rgb {
    [f(dst[0], src[0]), f(dst[1], src[1]), f(dst[2], src[2])]
}

fn multiply(b: f32, s: f32) -> f32 {
    b * s
}

fn screen(b: f32, s: f32) -> f32 {
    b + s - b * s
}

fn hard_light(b: f32, s: f32) -> f32 {
    if s <= 0.5 {
        multiply(b, 2.0 * s)
    } else {
        screen(b, 2.0 * s - 1.0)
    }
}

fn soft_light(b: f32, s: f32) -> f32 {
    if s <= 0.5 {
        b - (1.0 - 2.0 * s) * b * (1.0 - b)
    } else {
        let d = if b <= 0.25 {
            ((16.0 * b - 12.0) * b + 4.0) * b
        } else {
            b.max(0.0).sqrt()
        };
        b + (2.0 * s - 1.0) * (d - b)
    }
}

fn color_dodge(b: f32, s: f32) -> f32 {
    if b <= 0.0 {
        0.0
    } else if s >= 1.0 {
        1.0
    } else {
        (b / (1.0 - s)).min(1.0)
    }
}

fn color_burn(b: f32, s: f32) -> f32 {
    if b >= 1.0 {
        1.0
    } else if s <= 0.0 {
        0.0
    } else {
        1.0 - ((1.0 - b) / s).min(1.0)
    }
}

/////////////////////////
// NON-SEPARABLE MODES //
/////////////////////////

fn lum(c: Rgb) -> f32 {
    0.3 * c[0] + 0.59 * c[1] + 0.11 * c[2]
}

fn clip_color(c: Rgb) -> Rgb {
    let l = lum(c);
    let n = c[0].min(c[1]).min(c[2]);
    let x = c[0].max(c[1]).max(c[2]);
    let mut out = c;
    if n < 0.0 && l - n > f32::EPSILON {
        out = out.map(|v| l + (v - l) * l / (l - n));
    }
    if x > 1.0 && x - l > f32::EPSILON {
        out = out.map(|v| l + (v - l) * (1.0 - l) / (x - l));
    }
    out
}

fn set_lum(c: Rgb, l: f32) -> Rgb {
    let d = l - lum(c);
    clip_color(c.map(|v| v + d))
}

fn sat(c: Rgb) -> f32 {
    c[0].max(c[1]).max(c[2]) - c[0].min(c[1]).min(c[2])
}

fn set_sat(c: Rgb, s: f32) -> Rgb {
    let max = c[0].max(c[1]).max(c[2]);
    let min = c[0].min(c[1]).min(c[2]);
    let range = max - min;
    if range <= f32::EPSILON {
        return [0.0; 3];
    }
    c.map(|v| (v - min) * s / range)
}
