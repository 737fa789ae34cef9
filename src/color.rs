//! Colour-space conversions.
//!
//! Every [`PixelBuffer`](crate::buffer::PixelBuffer) stores display-encoded (sRGB) values with
//! straight alpha.  Arithmetic which should happen in some other space decodes into that space,
//! does its work, and encodes back again.  The transfer functions are extended past `[0, 1]` (by
//! mirroring through the origin and continuing the curve) so that out-of-range intermediates
//! survive a round trip and only get clamped when a buffer is finalised.

use serde::{Deserialize, Serialize};

/// An RGB triple (no alpha)
pub type Rgb = [f32; 3];

/// The colour space in which blending and most adjustments do their arithmetic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkingSpace {
    /// Linear-light sRGB primaries.  Physically meaningful blending.
    #[default]
    Linear,
    /// Gamma-encoded sRGB, i.e. blending the stored values directly (how most legacy editors
    /// behave).
    Srgb,
}

impl WorkingSpace {
    /// Convert a stored (sRGB-encoded) value into this working space
    #[inline]
    pub fn decode(self, v: f32) -> f32 {
        match self {
            Self::Linear => srgb_to_linear(v),
            Self::Srgb => v,
        }
    }

    /// Convert a value in this working space back to the stored (sRGB-encoded) representation
    #[inline]
    pub fn encode(self, v: f32) -> f32 {
        match self {
            Self::Linear => linear_to_srgb(v),
            Self::Srgb => v,
        }
    }

    #[inline]
    pub fn decode_rgb(self, [r, g, b]: Rgb) -> Rgb {
        [self.decode(r), self.decode(g), self.decode(b)]
    }

    #[inline]
    pub fn encode_rgb(self, [r, g, b]: Rgb) -> Rgb {
        [self.encode(r), self.encode(g), self.encode(b)]
    }
}

#[inline]
pub fn srgb_to_linear(v: f32) -> f32 {
    let a = v.abs();
    let l = if a <= 0.04045 {
        a / 12.92
    } else {
        ((a + 0.055) / 1.055).powf(2.4)
    };
    l.copysign(v)
}

#[inline]
pub fn linear_to_srgb(v: f32) -> f32 {
    let a = v.abs();
    let s = if a <= 0.003_130_8 {
        a * 12.92
    } else {
        1.055 * a.powf(1.0 / 2.4) - 0.055
    };
    s.copysign(v)
}

/// Rec. 709 relative luminance of an RGB triple (in whatever space it's expressed in)
#[inline]
pub fn luminance([r, g, b]: Rgb) -> f32 {
    0.2126 * r + 0.7152 * g + 0.0722 * b
}

/// Converts RGB to `(hue in [0, 1), saturation, lightness)`
pub fn rgb_to_hsl([r, g, b]: Rgb) -> (f32, f32, f32) {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let l = (max + min) / 2.0;
    let d = max - min;
    if d.abs() < f32::EPSILON {
        return (0.0, 0.0, l);
    }
    let s = if l > 0.5 {
        d / (2.0 - max - min)
    } else {
        d / (max + min)
    };
    let h = if max == r {
        (g - b) / d + if g < b { 6.0 } else { 0.0 }
    } else if max == g {
        (b - r) / d + 2.0
    } else {
        (r - g) / d + 4.0
    };
    (h / 6.0, s, l)
}

pub fn hsl_to_rgb(h: f32, s: f32, l: f32) -> Rgb {
    if s <= 0.0 {
        return [l, l, l];
    }
    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;
    [
        hue_to_rgb(p, q, h + 1.0 / 3.0),
        hue_to_rgb(p, q, h),
        hue_to_rgb(p, q, h - 1.0 / 3.0),
    ]
}

fn hue_to_rgb(p: f32, q: f32, t: f32) -> f32 {
    let t = t.rem_euclid(1.0);
    if t < 1.0 / 6.0 {
        p + (q - p) * 6.0 * t
    } else if t < 0.5 {
        q
    } else if t < 2.0 / 3.0 {
        p + (q - p) * (2.0 / 3.0 - t) * 6.0
    } else {
        p
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_functions_round_trip() {
        for i in 0..=20 {
            let v = i as f32 / 10.0 - 0.5; // includes negative and >1 values
            let back = linear_to_srgb(srgb_to_linear(v));
            assert!((back - v).abs() < 1e-5, "{} -> {}", v, back);
        }
    }

    #[test]
    fn hsl_round_trip() {
        let c = [0.8, 0.3, 0.1];
        let (h, s, l) = rgb_to_hsl(c);
        let back = hsl_to_rgb(h, s, l);
        for i in 0..3 {
            assert!((back[i] - c[i]).abs() < 1e-5);
        }
    }

    #[test]
    fn greys_have_no_saturation() {
        let (_, s, l) = rgb_to_hsl([0.4, 0.4, 0.4]);
        assert_eq!(s, 0.0);
        assert!((l - 0.4).abs() < 1e-6);
    }
}
