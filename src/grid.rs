//! Uniform spatial grid: points are bucketed into cubic cells by hashing the
//! integer cell coordinate into a [`Hashmap`] key, one insert per point, from
//! every pool worker at once.

use std::hash::{BuildHasher, BuildHasherDefault};

use ahash::AHasher;
use tracing::debug;

use crate::error::GridError;
use crate::parallel::parallel_for;
use crate::pool::ThreadPool;
use crate::{Hashmap, Values, EMPTY};

// Keeps hashed keys clear of the EMPTY sentinel.
const KEY_MASK: u32 = 0x7fff_ffff;

/// Integer coordinate of the cell containing `position`.
#[inline]
pub fn cell_coord(position: [f32; 3], cell_size: f32) -> [i32; 3] {
    position.map(|c| (c / cell_size).floor() as i32)
}

/// Hash map key for a cell coordinate. Distinct cells may share a key.
#[inline]
pub fn cell_key(coord: [i32; 3]) -> u32 {
    let hash = BuildHasherDefault::<AHasher>::default().hash_one(coord);
    (hash as u32) & KEY_MASK
}

pub struct SpatialGrid {
    map: Hashmap,
    cell_size: f32,
    sized_for: usize,
    point_count: usize,
}

impl SpatialGrid {
    /// Creates an empty grid sized for `expected_points` points.
    ///
    /// # Arguments
    ///
    /// * `cell_size` - Edge length of a cell, positive and finite.
    /// * `expected_points` - Number of points the first build will see; later
    ///   builds with more points reallocate the table.
    pub fn new(cell_size: f32, expected_points: usize) -> Result<Self, GridError> {
        if !(cell_size.is_finite() && cell_size > 0.0) {
            return Err(GridError::InvalidCellSize(cell_size));
        }
        Ok(Self {
            map: Hashmap::with_expected_items(expected_points)?,
            cell_size,
            sized_for: expected_points,
            point_count: 0,
        })
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// Number of points bucketed by the last [`build`](Self::build).
    pub fn point_count(&self) -> usize {
        self.point_count
    }

    pub fn map(&self) -> &Hashmap {
        &self.map
    }

    /// Clears the grid and buckets `points` in parallel on `pool`.
    ///
    /// Point `i` is stored under its cell's key with value `i`.
    pub fn build(&mut self, pool: &ThreadPool, points: &[[f32; 3]]) -> Result<(), GridError> {
        if points.len() >= EMPTY as usize {
            return Err(GridError::TooManyPoints(points.len()));
        }
        if points.len() > self.sized_for {
            self.map = Hashmap::with_expected_items(points.len())?;
            self.sized_for = points.len();
        } else {
            self.map.clear();
        }
        self.point_count = 0;

        let map = &self.map;
        let cell_size = self.cell_size;
        parallel_for(pool, points.len(), |i| {
            let key = cell_key(cell_coord(points[i], cell_size));
            map.insert(key, i as u32);
        })?;
        self.point_count = points.len();

        debug!(
            points = points.len(),
            capacity = self.map.capacity(),
            "spatial grid rebuilt"
        );
        Ok(())
    }

    /// Indices stored under the key of `coord`, which includes points of any
    /// other cell hashing to the same key.
    pub fn cell_members(&self, coord: [i32; 3]) -> Values<'_> {
        self.map.values(cell_key(coord))
    }

    /// Indices of all points within `radius` of `position`.
    ///
    /// # Arguments
    ///
    /// * `points` - The slice the grid was last built from.
    /// * `position` - Query centre.
    /// * `radius` - Inclusive search radius. When the cells it covers outnumber
    ///   the points, the points are scanned directly instead.
    pub fn neighbors(&self, points: &[[f32; 3]], position: [f32; 3], radius: f32) -> Vec<u32> {
        let mut found = Vec::new();
        if radius.is_nan() || radius < 0.0 {
            return found;
        }
        let lo = cell_coord(position.map(|c| c - radius), self.cell_size);
        let hi = cell_coord(position.map(|c| c + radius), self.cell_size);
        let r2 = radius * radius;

        let cells: u128 = (0..3)
            .map(|axis| (i64::from(hi[axis]) - i64::from(lo[axis]) + 1) as u128)
            .product();
        if cells > points.len() as u128 {
            for (index, p) in points.iter().enumerate() {
                if distance2(*p, position) <= r2 {
                    found.push(index as u32);
                }
            }
            return found;
        }

        for x in lo[0]..=hi[0] {
            for y in lo[1]..=hi[1] {
                for z in lo[2]..=hi[2] {
                    let coord = [x, y, z];
                    for index in self.cell_members(coord) {
                        let Some(&p) = points.get(index as usize) else {
                            continue;
                        };
                        // Skip points of colliding cells, they are visited with their own cell.
                        if cell_coord(p, self.cell_size) != coord {
                            continue;
                        }
                        if distance2(p, position) <= r2 {
                            found.push(index);
                        }
                    }
                }
            }
        }
        found
    }
}

#[inline]
fn distance2(a: [f32; 3], b: [f32; 3]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

impl std::fmt::Debug for SpatialGrid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpatialGrid")
            .field("cell_size", &self.cell_size)
            .field("point_count", &self.point_count)
            .field("map", &self.map)
            .finish()
    }
}
