//! Dynamically typed values used for storing adjustment parameters.

use std::{
    collections::BTreeMap,
    hash::{Hash, Hasher},
};

use serde::{Deserialize, Serialize};

/// Enum of the different types an adjustment parameter can have
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    /// 32-bit floating point number
    F32,
    I32,
}

/// Possible values of a dynamic [`Type`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    I32(i32),
    F32(f32),
}

impl Value {
    pub fn type_(self) -> Type {
        match self {
            Self::F32(_) => Type::F32,
            Self::I32(_) => Type::I32,
        }
    }

    /// Gets this value as an `f32`, converting integers
    pub fn as_f32(self) -> f32 {
        match self {
            Self::F32(v) => v,
            Self::I32(v) => v as f32,
        }
    }

    pub fn get_i32(self) -> Option<i32> {
        match self {
            Self::I32(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the raw bytes covering the value in `self`
    fn bytes(&self) -> &[u8] {
        match self {
            Self::F32(v) => bytemuck::bytes_of(v),
            Self::I32(v) => bytemuck::bytes_of(v),
        }
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::F32(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::I32(v)
    }
}

/// Named parameters of an adjustment.  Ordered so that hashing and serialization are
/// deterministic.
pub type Params = BTreeMap<String, Value>;

/// Builds a [`Params`] map from `(name, value)` pairs
pub fn params(pairs: impl IntoIterator<Item = (&'static str, f32)>) -> Params {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_owned(), Value::F32(v)))
        .collect()
}

/// Feeds a [`Params`] map into a [`Hasher`], bit-exactly (so `0.0` and `-0.0` hash differently)
pub fn hash_params(params: &Params, state: &mut impl Hasher) {
    for (name, value) in params {
        name.hash(state);
        value.type_().hash(state);
        value.bytes().hash(state);
    }
}
