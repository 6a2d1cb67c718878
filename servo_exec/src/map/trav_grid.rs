//! # Traversability grid
//!
//! A [`TravGrid`] stores a drive probability in the range `[0, 1]` for each cell of a regular,
//! axis-aligned grid over the XY plane of the map frame. Cell `[x, y]` spans the square whose
//! lower corner lies at `origin_m + cell_size_m * (x, y)`.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use nalgebra::Vector2;
use ndarray::Array2;
use noise::{NoiseFn, Perlin};
use serde::Serialize;
use std::ops::RangeInclusive;

use super::MapError;
use util::maths::{clamp, lin_map};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Slack applied to the rectangle edges so cell centres lying exactly on an edge are included
const EDGE_EPSILON_M: f64 = 1e-9;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TravGrid {
    /// Side length of each (square) cell
    cell_size_m: f64,

    /// Position of the lower corner of cell `[0, 0]` in the map frame
    origin_m: Vector2<f64>,

    /// Drive probabilities, indexed `[x, y]`
    data: Array2<f64>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TravGrid {
    /// Create a new grid, validating the cell size and every probability.
    pub fn new(
        cell_size_m: f64,
        origin_m: Vector2<f64>,
        data: Array2<f64>,
    ) -> Result<Self, MapError> {
        if !cell_size_m.is_finite() || cell_size_m <= 0.0 {
            return Err(MapError::InvalidCellSize(cell_size_m));
        }

        if data.is_empty() {
            return Err(MapError::EmptyGrid);
        }

        for ((x, y), &p) in data.indexed_iter() {
            if !(0.0..=1.0).contains(&p) {
                return Err(MapError::InvalidProbability(x, y, p));
            }
        }

        Ok(Self {
            cell_size_m,
            origin_m,
            data,
        })
    }

    /// Create a grid filled with a single probability.
    pub fn from_elem(
        cell_size_m: f64,
        num_cells: (usize, usize),
        origin_m: Vector2<f64>,
        probability: f64,
    ) -> Result<Self, MapError> {
        Self::new(cell_size_m, origin_m, Array2::from_elem(num_cells, probability))
    }

    /// Create a grid by evaluating `f` at the centre of every cell.
    pub fn from_fn<F>(
        cell_size_m: f64,
        num_cells: (usize, usize),
        origin_m: Vector2<f64>,
        f: F,
    ) -> Result<Self, MapError>
    where
        F: Fn(Vector2<f64>) -> f64,
    {
        let data = Array2::from_shape_fn(num_cells, |(x, y)| {
            f(origin_m + Vector2::new(x as f64 + 0.5, y as f64 + 0.5) * cell_size_m)
        });

        Self::new(cell_size_m, origin_m, data)
    }

    /// Generate a random grid using Perlin noise mapped into `[0, 1]`.
    pub fn generate_random(
        cell_size_m: f64,
        num_cells: (usize, usize),
        origin_m: Vector2<f64>,
        perlin_scale: Vector2<f64>,
        perlin_offset: Vector2<f64>,
    ) -> Result<Self, MapError> {
        let perlin = Perlin::new();

        Self::from_fn(cell_size_m, num_cells, origin_m, |pos| {
            let n = perlin.get([
                pos.x * perlin_scale.x + perlin_offset.x,
                pos.y * perlin_scale.y + perlin_offset.y,
            ]);
            clamp(&lin_map((-1.0, 1.0), (0.0, 1.0), n), &0.0, &1.0)
        })
    }

    pub fn cell_size_m(&self) -> f64 {
        self.cell_size_m
    }

    pub fn origin_m(&self) -> Vector2<f64> {
        self.origin_m
    }

    /// Number of cells along the (x, y) axes.
    pub fn num_cells(&self) -> (usize, usize) {
        self.data.dim()
    }

    pub fn data(&self) -> &Array2<f64> {
        &self.data
    }

    pub fn cell_in_map(&self, cell: (usize, usize)) -> bool {
        let (nx, ny) = self.num_cells();
        cell.0 < nx && cell.1 < ny
    }

    /// Position of the centre of the given cell, or `None` if the cell is outside the grid.
    pub fn cell_position(&self, cell: (usize, usize)) -> Option<Vector2<f64>> {
        if !self.cell_in_map(cell) {
            return None;
        }

        Some(
            self.origin_m
                + Vector2::new(cell.0 as f64 + 0.5, cell.1 as f64 + 0.5) * self.cell_size_m,
        )
    }

    /// The cell containing the given position, or `None` if it lies outside the grid.
    pub fn position_to_cell(&self, position_m: &Vector2<f64>) -> Option<(usize, usize)> {
        let rel = (position_m - self.origin_m) / self.cell_size_m;

        if !rel.x.is_finite() || !rel.y.is_finite() || rel.x < 0.0 || rel.y < 0.0 {
            return None;
        }

        let cell = (rel.x.floor() as usize, rel.y.floor() as usize);

        match self.cell_in_map(cell) {
            true => Some(cell),
            false => None,
        }
    }

    pub fn get(&self, cell: (usize, usize)) -> Option<f64> {
        self.data.get(cell).copied()
    }

    /// Drive probability at the given map position, or `None` outside the grid.
    pub fn get_position(&self, position_m: &Vector2<f64>) -> Option<f64> {
        self.position_to_cell(position_m).and_then(|c| self.get(c))
    }

    /// Call `f` for every cell whose centre lies inside the given rectangle.
    ///
    /// The rectangle is centred on `centre_m`, has its length along `heading_rad` and its width
    /// perpendicular to it. Cells are visited in row-major order.
    pub fn for_each_in_rect<F>(
        &self,
        centre_m: &Vector2<f64>,
        heading_rad: f64,
        length_m: f64,
        width_m: f64,
        mut f: F,
    ) where
        F: FnMut((usize, usize), f64),
    {
        let (sin, cos) = heading_rad.sin_cos();
        let fwd = Vector2::new(cos, sin);
        let left = Vector2::new(-sin, cos);
        let half_length = 0.5 * length_m;
        let half_width = 0.5 * width_m;

        // Axis aligned bounds of the rotated rectangle
        let extent = Vector2::new(
            half_length * cos.abs() + half_width * sin.abs(),
            half_length * sin.abs() + half_width * cos.abs(),
        );
        let min = centre_m - extent;
        let max = centre_m + extent;

        let (x_range, y_range) = match (
            self.index_range(min.x, max.x, 0),
            self.index_range(min.y, max.y, 1),
        ) {
            (Some(x), Some(y)) => (x, y),
            _ => return,
        };

        for x in x_range {
            for y in y_range.clone() {
                let centre = self.origin_m
                    + Vector2::new(x as f64 + 0.5, y as f64 + 0.5) * self.cell_size_m;
                let diff = centre - centre_m;

                if diff.dot(&fwd).abs() <= half_length + EDGE_EPSILON_M
                    && diff.dot(&left).abs() <= half_width + EDGE_EPSILON_M
                {
                    f((x, y), self.data[[x, y]]);
                }
            }
        }
    }

    /// Range of cell indexes along `axis` overlapping the interval `[min, max]`, clipped to the grid.
    fn index_range(&self, min: f64, max: f64, axis: usize) -> Option<RangeInclusive<usize>> {
        if !min.is_finite() || !max.is_finite() {
            return None;
        }

        let num = self.data.shape()[axis] as i64;
        let origin = self.origin_m[axis];

        let lo = (((min - origin) / self.cell_size_m).floor() as i64).max(0);
        let hi = (((max - origin) / self.cell_size_m).floor() as i64).min(num - 1);

        match lo <= hi {
            true => Some(lo as usize..=hi as usize),
            false => None,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
