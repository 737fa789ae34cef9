//! Adjustments (i.e. pure transformations of pixel data)
//!
//! Every [`AdjustmentKind`] is backed by a static [`EffectType`], which declares the parameters it
//! accepts and how it transforms a buffer.  An [`AdjustmentOp`] is an instance of one of these:
//! a kind plus the parameter values that the user chose.

mod per_pixel;
mod spatial;

use std::{
    collections::hash_map::DefaultHasher,
    fmt::Debug,
    hash::{Hash, Hasher},
};

use serde::{Deserialize, Serialize};

pub use per_pixel::{OpSpace, PerPixel};
pub use spatial::{GaussianBlur, Sharpen};

use crate::{
    buffer::PixelBuffer,
    color::WorkingSpace,
    error::{Error, Result},
    types::{hash_params, Params, Value},
    utils::Rect,
};

/// Trait implemented by all effect types
pub trait EffectType: Debug + Send + Sync {
    fn name(&self) -> &'static str;

    /// The parameters which this effect reads
    fn params(&self) -> &'static [ParamSpec];

    /// Transforms `source` into a new buffer of the same size and format.  Must be deterministic
    /// and must not clamp anything: the caller finalizes the output.
    fn apply(&self, source: &PixelBuffer, params: &ResolvedParams, space: WorkingSpace)
        -> PixelBuffer;

    /// Given a [`Rect`] `r` in _input space_, return the smallest [`Rect`] in _output space_ which
    /// is affected by the pixels in `r`.
    fn transform_bbox(&self, params: &ResolvedParams, rect: Rect<i32>) -> Rect<i32>;

    /// Given a [`Rect`] `r` in _output space_, return the smallest [`Rect`] in _input space_ which
    /// covers the pre-image of every point within `r`.
    fn inv_transform_bbox(&self, params: &ResolvedParams, rect: Rect<i32>) -> Rect<i32>;
}

/// Declaration of one parameter of an [`EffectType`]
#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub name: &'static str,
    /// `None` if the parameter is required
    pub default: Option<f32>,
    pub min: f32,
    pub max: f32,
}

impl ParamSpec {
    pub const fn required(name: &'static str, min: f32, max: f32) -> Self {
        Self {
            name,
            default: None,
            min,
            max,
        }
    }

    pub const fn optional(name: &'static str, default: f32, min: f32, max: f32) -> Self {
        Self {
            name,
            default: Some(default),
            min,
            max,
        }
    }
}

/// Parameter values after validation against an effect's [`ParamSpec`]s.  Every declared parameter
/// has a value.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedParams {
    values: Vec<(&'static str, f32)>,
}

impl ResolvedParams {
    /// Gets a declared parameter.  Asking for an undeclared parameter is a bug in the effect.
    pub fn get(&self, name: &str) -> f32 {
        self.values
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| *v)
            .unwrap_or_else(|| panic!("effect read undeclared parameter {:?}", name))
    }

    fn resolve(specs: &[ParamSpec], params: &Params) -> Result<Self> {
        let mut values = Vec::with_capacity(specs.len());
        for spec in specs {
            let value = match (params.get(spec.name), spec.default) {
                (Some(v), _) => v.as_f32(),
                (None, Some(default)) => default,
                (None, None) => return Err(Error::param(spec.name, "required parameter is missing")),
            };
            if !value.is_finite() || value < spec.min || value > spec.max {
                return Err(Error::param(
                    spec.name,
                    format!("{} is outside [{}, {}]", value, spec.min, spec.max),
                ));
            }
            values.push((spec.name, value));
        }
        // Unknown keys in `params` are deliberately ignored
        Ok(Self { values })
    }
}

/// The kinds of adjustment which can be put on an adjustment layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentKind {
    Exposure,
    Contrast,
    Highlights,
    Shadows,
    Temperature,
    Saturation,
    Vibrance,
    Hsl,
    Curves,
    Levels,
    Invert,
    Blur,
    Sharpen,
}

impl AdjustmentKind {
    pub const ALL: [AdjustmentKind; 13] = [
        Self::Exposure,
        Self::Contrast,
        Self::Highlights,
        Self::Shadows,
        Self::Temperature,
        Self::Saturation,
        Self::Vibrance,
        Self::Hsl,
        Self::Curves,
        Self::Levels,
        Self::Invert,
        Self::Blur,
        Self::Sharpen,
    ];

    /// The [`EffectType`] which implements this kind
    pub fn effect_type(self) -> &'static dyn EffectType {
        match self {
            Self::Exposure => &built_ins::EXPOSURE,
            Self::Contrast => &built_ins::CONTRAST,
            Self::Highlights => &built_ins::HIGHLIGHTS,
            Self::Shadows => &built_ins::SHADOWS,
            Self::Temperature => &built_ins::TEMPERATURE,
            Self::Saturation => &built_ins::SATURATION,
            Self::Vibrance => &built_ins::VIBRANCE,
            Self::Hsl => &built_ins::HSL,
            Self::Curves => &built_ins::CURVES,
            Self::Levels => &built_ins::LEVELS,
            Self::Invert => &built_ins::INVERT,
            Self::Blur => &built_ins::BLUR,
            Self::Sharpen => &built_ins::SHARPEN,
        }
    }
}

/// An instance of an adjustment: a kind and the parameters it was given
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentOp {
    pub kind: AdjustmentKind,
    pub params: Params,
}

impl AdjustmentOp {
    /// Creates an `AdjustmentOp`, checking that `params` satisfy the kind's requirements
    pub fn new(kind: AdjustmentKind, params: Params) -> Result<Self> {
        let op = Self { kind, params };
        op.resolve()?;
        Ok(op)
    }

    /// Shorthand for a single-parameter adjustment
    pub fn with(kind: AdjustmentKind, name: &str, value: f32) -> Result<Self> {
        let mut params = Params::new();
        params.insert(name.to_owned(), Value::F32(value));
        Self::new(kind, params)
    }

    pub fn effect_type(&self) -> &'static dyn EffectType {
        self.kind.effect_type()
    }

    pub fn resolve(&self) -> Result<ResolvedParams> {
        ResolvedParams::resolve(self.effect_type().params(), &self.params)
    }

    /// Applies this adjustment to `input`, returning a new buffer clamped to `input`'s format.
    /// Identical inputs always give byte-identical outputs.
    pub fn apply(&self, input: &PixelBuffer, space: WorkingSpace) -> Result<PixelBuffer> {
        let params = self.resolve()?;
        let mut out = self.effect_type().apply(input, &params, space);
        out.finalize();
        Ok(out)
    }

    /// The region of input needed to produce `rect` of output
    pub fn inv_transform_bbox(&self, rect: Rect<i32>) -> Result<Rect<i32>> {
        Ok(self.effect_type().inv_transform_bbox(&self.resolve()?, rect))
    }

    /// The region of output affected by `rect` of input
    pub fn transform_bbox(&self, rect: Rect<i32>) -> Result<Rect<i32>> {
        Ok(self.effect_type().transform_bbox(&self.resolve()?, rect))
    }

    /// Returns `true` if the output at a pixel only depends on the input at that pixel
    pub fn is_per_pixel(&self) -> bool {
        !matches!(self.kind, AdjustmentKind::Blur | AdjustmentKind::Sharpen)
    }

    pub fn params_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash_into(&mut hasher);
        hasher.finish()
    }

    pub(crate) fn hash_into(&self, state: &mut impl Hasher) {
        self.kind.hash(state);
        hash_params(&self.params, state);
    }
}

/// Built-in effects
pub mod built_ins {
    use super::{
        per_pixel::{self as pp, OpSpace},
        GaussianBlur, ParamSpec, PerPixel, Sharpen,
    };

    const AMOUNT: ParamSpec = ParamSpec::required("amount", -100.0, 100.0);

    pub static EXPOSURE: PerPixel = PerPixel {
        name: "Exposure",
        params: &[AMOUNT],
        space: OpSpace::Linear,
        map: pp::exposure,
    };
    pub static CONTRAST: PerPixel = PerPixel {
        name: "Contrast",
        params: &[AMOUNT],
        space: OpSpace::Working,
        map: pp::contrast,
    };
    pub static HIGHLIGHTS: PerPixel = PerPixel {
        name: "Highlights",
        params: &[AMOUNT],
        space: OpSpace::Working,
        map: pp::highlights,
    };
    pub static SHADOWS: PerPixel = PerPixel {
        name: "Shadows",
        params: &[AMOUNT],
        space: OpSpace::Working,
        map: pp::shadows,
    };
    pub static TEMPERATURE: PerPixel = PerPixel {
        name: "Temperature",
        params: &[AMOUNT, ParamSpec::optional("tint", 0.0, -100.0, 100.0)],
        space: OpSpace::Linear,
        map: pp::temperature,
    };
    pub static SATURATION: PerPixel = PerPixel {
        name: "Saturation",
        params: &[AMOUNT],
        space: OpSpace::Working,
        map: pp::saturation,
    };
    pub static VIBRANCE: PerPixel = PerPixel {
        name: "Vibrance",
        params: &[AMOUNT],
        space: OpSpace::Working,
        map: pp::vibrance,
    };
    pub static HSL: PerPixel = PerPixel {
        name: "Hue/Saturation/Lightness",
        params: &[
            ParamSpec::required("hue", -180.0, 180.0),
            ParamSpec::optional("saturation", 0.0, -100.0, 100.0),
            ParamSpec::optional("lightness", 0.0, -100.0, 100.0),
        ],
        space: OpSpace::Working,
        map: pp::hsl,
    };
    pub static CURVES: PerPixel = PerPixel {
        name: "Curves",
        params: &[
            ParamSpec::optional("black", 0.0, 0.0, 100.0),
            ParamSpec::optional("shadows", 25.0, 0.0, 100.0),
            ParamSpec::optional("midtones", 50.0, 0.0, 100.0),
            ParamSpec::optional("highlights", 75.0, 0.0, 100.0),
            ParamSpec::optional("white", 100.0, 0.0, 100.0),
        ],
        space: OpSpace::Display,
        map: pp::curves,
    };
    pub static LEVELS: PerPixel = PerPixel {
        name: "Levels",
        params: &[
            ParamSpec::required("in_black", 0.0, 1.0),
            ParamSpec::required("in_white", 0.0, 1.0),
            ParamSpec::optional("gamma", 1.0, 0.01, 10.0),
            ParamSpec::optional("out_black", 0.0, 0.0, 1.0),
            ParamSpec::optional("out_white", 1.0, 0.0, 1.0),
        ],
        space: OpSpace::Display,
        map: pp::levels,
    };
    pub static INVERT: PerPixel = PerPixel {
        name: "Invert",
        params: &[],
        space: OpSpace::Display,
        map: pp::invert,
    };
    pub static BLUR: GaussianBlur = GaussianBlur;
    pub static SHARPEN: Sharpen = Sharpen;
}
