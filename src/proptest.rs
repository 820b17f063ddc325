//! Strategies for property-based tests of meshes and communication patterns.
use crate::mesh::procedural::CartesianMeshConfig;
use ::proptest::collection::vec;
use ::proptest::prelude::*;
use nalgebra::Point3;

pub fn point3() -> impl Strategy<Value = Point3<f64>> {
    let range = -10.0..10.0;
    [range.clone(), range.clone(), range].prop_map(|[x, y, z]| Point3::new(x, y, z))
}

/// A reference coordinate in $[-1, 1]^{\text{dim}}$, padded with zeros.
pub fn reference_point(dim: usize) -> impl Strategy<Value = Point3<f64>> {
    vec(-1.0..=1.0, dim).prop_map(|coords| {
        let mut xi = Point3::origin();
        for (axis, x) in coords.into_iter().enumerate() {
            xi[axis] = x;
        }
        xi
    })
}

/// Cartesian meshes of degree 1 or 2 in 1 to 3 dimensions with an even number of elements along
/// every axis, i.e. meshes that can be coarsened at least once.
pub fn coarsenable_mesh_config() -> impl Strategy<Value = CartesianMeshConfig> {
    (1..=3usize, 1..=2usize)
        .prop_flat_map(|(dim, degree)| {
            let max_half: usize = if dim == 3 { 2 } else { 3 };
            (Just(degree), vec(1..=max_half, dim))
        })
        .prop_map(|(degree, halves)| {
            let counts: Vec<usize> = halves.into_iter().map(|n| 2 * n).collect();
            CartesianMeshConfig::default()
                .with_element_counts(&counts)
                .with_degree(degree)
        })
}

/// Per-rank equation counts for worlds of 1, 2 or 4 ranks.
pub fn rank_counts() -> impl Strategy<Value = Vec<usize>> {
    prop_oneof![Just(1usize), Just(2), Just(4)].prop_flat_map(|size| vec(0..50usize, size))
}
