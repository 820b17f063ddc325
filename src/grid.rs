//! Lexicographic index arithmetic for structured grids.
use serde::{Deserialize, Serialize};

/// A structured grid of points (or cells) with the first axis varying fastest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Grid {
    sizes: Vec<usize>,
}

impl Grid {
    pub fn new(sizes: &[usize]) -> Self {
        assert!(
            (1..=3).contains(&sizes.len()),
            "Grid dimension must be 1, 2 or 3"
        );
        Self { sizes: sizes.to_vec() }
    }

    pub fn dim(&self) -> usize {
        self.sizes.len()
    }

    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    pub fn size(&self, axis: usize) -> usize {
        self.sizes[axis]
    }

    pub fn num_points(&self) -> usize {
        self.sizes.iter().product()
    }

    /// Converts a linear index into per-axis indices. Unused trailing axes are zero.
    pub fn lift(&self, index: usize) -> [usize; 3] {
        debug_assert!(index < self.num_points());
        let mut ijk = [0; 3];
        let mut remainder = index;
        for (axis, &size) in self.sizes.iter().enumerate() {
            ijk[axis] = remainder % size;
            remainder /= size;
        }
        ijk
    }

    /// Converts per-axis indices into a linear index.
    pub fn project(&self, ijk: &[usize; 3]) -> usize {
        let mut index = 0;
        for axis in (0..self.dim()).rev() {
            debug_assert!(ijk[axis] < self.sizes[axis]);
            index = index * self.sizes[axis] + ijk[axis];
        }
        index
    }
}
