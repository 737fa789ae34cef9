use std::fmt::{Debug, Formatter};

use cgmath::{BaseNum, Point2, Vector2};
use itertools::Itertools;

//////////
// RECT //
//////////

/// An axis-aligned rectangular region in 2D space.  `min` is inclusive and `max` is exclusive.
// Invariant: max.x >= min.x && max.y >= min.y
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rect<S> {
    min: Point2<S>,
    max: Point2<S>,
}

impl<S: BaseNum> Rect<S> {
    /// Creates a [`Rect`] with a given size and where the minimum corner is the origin (i.e.
    /// `(0, 0)`)
    pub fn from_origin(width: S, height: S) -> Self {
        Self {
            min: Point2::new(S::zero(), S::zero()),
            max: Point2::new(width, height),
        }
    }

    pub fn from_min_size(min: Point2<S>, size: Vector2<S>) -> Self {
        Self {
            min,
            max: min + size,
        }
    }

    /// Creates a [`Rect`] from two corners, normalising them so that the invariant holds
    pub fn from_corners(a: Point2<S>, b: Point2<S>) -> Self {
        Self {
            min: Point2::new(partial_min(a.x, b.x), partial_min(a.y, b.y)),
            max: Point2::new(partial_max(a.x, b.x), partial_max(a.y, b.y)),
        }
    }

    /// Translates a [`Rect`] by some amount, preserving the size
    pub fn translate(self, by: Vector2<S>) -> Self {
        Self {
            min: self.min + by,
            max: self.max + by,
        }
    }

    pub fn min(&self) -> Point2<S> {
        self.min
    }

    pub fn max(&self) -> Point2<S> {
        self.max
    }

    pub fn width(&self) -> S {
        self.max.x - self.min.x
    }

    pub fn height(&self) -> S {
        self.max.y - self.min.y
    }

    pub fn size(&self) -> Vector2<S> {
        self.max - self.min
    }

    pub fn is_empty(&self) -> bool {
        self.max.x <= self.min.x || self.max.y <= self.min.y
    }

    pub fn contains(&self, p: Point2<S>) -> bool {
        p.x >= self.min.x && p.x < self.max.x && p.y >= self.min.y && p.y < self.max.y
    }

    /// Computes the overlap of two `Rect`s.  Disjoint `Rect`s produce an empty `Rect` rather than
    /// breaking the `min <= max` invariant.
    pub fn intersection(self, other: Self) -> Self {
        let min_x = partial_max(self.min.x, other.min.x);
        let min_y = partial_max(self.min.y, other.min.y);
        let max_x = partial_min(self.max.x, other.max.x);
        let max_y = partial_min(self.max.y, other.max.y);
        Self {
            min: Point2::new(min_x, min_y),
            max: Point2::new(partial_max(min_x, max_x), partial_max(min_y, max_y)),
        }
    }

    /// Computes the smallest `Rect` to contain both `self` and `other`
    pub fn union(self, other: Self) -> Self {
        let min_x = partial_min(self.min.x, other.min.x);
        let min_y = partial_min(self.min.y, other.min.y);
        let max_x = partial_max(self.max.x, other.max.x);
        let max_y = partial_max(self.max.y, other.max.y);
        Self {
            min: Point2::new(min_x, min_y),
            max: Point2::new(max_x, max_y),
        }
    }
}

impl Rect<i32> {
    /// Grows the `Rect` by `by` pixels on every side
    pub fn expand(self, by: i32) -> Self {
        Self {
            min: self.min - Vector2::new(by, by),
            max: self.max + Vector2::new(by, by),
        }
    }

    pub fn area(&self) -> u64 {
        self.width().max(0) as u64 * self.height().max(0) as u64
    }

    /// Splits this `Rect` into row-major tiles of at most `tile_size` pixels square.  The tiles are
    /// aligned to a global grid (rather than to `self.min`) so that the same document region always
    /// produces the same tiles, regardless of the viewport it was requested through.
    pub fn tiles(self, tile_size: u32) -> Vec<Rect<i32>> {
        let tile = tile_size.max(1) as i32;
        if self.is_empty() {
            return Vec::new();
        }
        let first_col = self.min.x.div_euclid(tile);
        let last_col = (self.max.x - 1).div_euclid(tile);
        let first_row = self.min.y.div_euclid(tile);
        let last_row = (self.max.y - 1).div_euclid(tile);
        (first_row..=last_row)
            .cartesian_product(first_col..=last_col)
            .map(|(row, col)| {
                let grid_cell =
                    Rect::from_min_size(Point2::new(col * tile, row * tile), Vector2::new(tile, tile));
                grid_cell.intersection(self)
            })
            .collect_vec()
    }
}

impl<S: Debug> Debug for Rect<S> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Rect(({:?}, {:?}) - ({:?}, {:?}))",
            self.min.x, self.min.y, self.max.x, self.max.y
        )
    }
}

fn partial_max<S: PartialOrd>(x: S, y: S) -> S {
    if x < y {
        y
    } else {
        x
    }
}

fn partial_min<S: PartialOrd>(x: S, y: S) -> S {
    if x < y {
        x
    } else {
        y
    }
}
