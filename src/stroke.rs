//! Brush strokes on layer masks.

use cgmath::{InnerSpace, Point2};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    layer::LayerId,
    mask::Mask,
};

/// Whether a brush adds or removes coverage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrushMode {
    /// Paint coverage in, revealing more of the layer
    #[default]
    Reveal,
    /// Paint coverage out, hiding the layer
    Conceal,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Brush {
    /// Radius of one dab, in pixels
    pub radius: f32,
    /// 0-100; 100 is a hard edge
    pub hardness: f32,
    /// 0-1; how much coverage each dab adds or removes
    pub strength: f32,
    /// Gap between dabs, as a fraction of the radius
    pub spacing: f32,
    pub mode: BrushMode,
    /// If non-zero, the mask is feathered by this radius once the stroke ends
    pub feather: f32,
}

impl Default for Brush {
    fn default() -> Self {
        Self {
            radius: 20.0,
            hardness: 50.0,
            strength: 1.0,
            spacing: 0.25,
            mode: BrushMode::Reveal,
            feather: 0.0,
        }
    }
}

impl Brush {
    pub fn validate(&self) -> Result<()> {
        let check = |name: &str, v: f32, min: f32, max: f32| {
            if v.is_finite() && (min..=max).contains(&v) {
                Ok(())
            } else {
                Err(Error::param(name, format!("{} is outside {}..={}", v, min, max)))
            }
        };
        check("radius", self.radius, 0.0, 5000.0)?;
        check("hardness", self.hardness, 0.0, 100.0)?;
        check("strength", self.strength, 0.0, 1.0)?;
        check("spacing", self.spacing, 0.01, 10.0)?;
        check("feather", self.feather, 0.0, 1000.0)
    }

    fn step(&self) -> f32 {
        (self.radius * self.spacing).max(0.5)
    }

    fn dab(&self, mask: &mut Mask, center: Point2<f32>) {
        match self.mode {
            BrushMode::Reveal => mask.paint_stroke(center, self.radius, self.hardness, self.strength),
            BrushMode::Conceal => mask.erase_stroke(center, self.radius, self.hardness, self.strength),
        }
    }
}

/// A stroke in progress.  Positions are in the mask's own coordinates.
#[derive(Debug, Clone)]
pub(crate) struct Stroke {
    pub layer: LayerId,
    pub brush: Brush,
    last: Point2<f32>,
    /// Distance travelled since the last dab
    since_dab: f32,
}

impl Stroke {
    /// Starts a stroke with a single dab at `pos`
    pub fn begin(layer: LayerId, brush: Brush, pos: Point2<f32>, mask: &mut Mask) -> Self {
        brush.dab(mask, pos);
        Self {
            layer,
            brush,
            last: pos,
            since_dab: 0.0,
        }
    }

    /// Continues the stroke to `pos`, laying dabs evenly along the way
    pub fn move_to(&mut self, pos: Point2<f32>, mask: &mut Mask) {
        let delta = pos - self.last;
        let dist = delta.magnitude();
        let step = self.brush.step();
        let mut next = step - self.since_dab;
        while next <= dist {
            self.brush.dab(mask, self.last + delta * (next / dist));
            next += step;
        }
        self.since_dab = dist - (next - step);
        self.last = pos;
    }
}
