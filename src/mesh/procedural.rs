//! Procedural generation of partitioned Cartesian meshes.
use crate::comm::Communicator;
use crate::element::ElementType;
use crate::error::{Error, Result};
use crate::mesh::StructuredMesh;
use nalgebra::Point3;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Description of an axis-aligned box meshed with uniform Lagrange elements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartesianMeshConfig {
    pub min: [f64; 3],
    pub max: [f64; 3],
    /// Number of elements along each axis; its length is the spatial dimension.
    pub element_counts: Vec<usize>,
    pub degree: usize,
    /// Element layers along the slab axis are handed out to ranks in multiples of this value.
    ///
    /// Multigrid hierarchies with `n` levels need a granularity divisible by $2^{n-1}$ so that
    /// every rank's slab can be bisected on each level.
    pub layer_granularity: usize,
}

impl Default for CartesianMeshConfig {
    fn default() -> Self {
        Self {
            min: [0.0; 3],
            max: [1.0; 3],
            element_counts: vec![4, 4],
            degree: 1,
            layer_granularity: 1,
        }
    }
}

impl CartesianMeshConfig {
    pub fn with_element_counts(mut self, element_counts: &[usize]) -> Self {
        self.element_counts = element_counts.to_vec();
        self
    }

    pub fn with_bounds(mut self, min: [f64; 3], max: [f64; 3]) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn with_degree(mut self, degree: usize) -> Self {
        self.degree = degree;
        self
    }

    pub fn with_layer_granularity(mut self, granularity: usize) -> Self {
        self.layer_granularity = granularity;
        self
    }

    pub fn element_type(&self) -> Result<ElementType> {
        ElementType::from_dim_and_degree(self.element_counts.len(), self.degree).ok_or_else(|| {
            Error::configuration(format!(
                "no Lagrange element of degree {} in {} dimension(s)",
                self.degree,
                self.element_counts.len()
            ))
        })
    }
}

/// Splits `layer_count` element layers into `size` contiguous ranges.
///
/// Layers are distributed in blocks of `granularity`; leftover blocks go to the lowest ranks.
/// Fails if some rank would receive no layers or the layer count is not a multiple of
/// the granularity.
pub fn partition_layers(layer_count: usize, size: usize, granularity: usize) -> Result<Vec<Range<usize>>> {
    if granularity == 0 || layer_count % granularity != 0 {
        return Err(Error::configuration(format!(
            "{layer_count} element layers cannot be split into blocks of {granularity}"
        )));
    }
    let blocks = layer_count / granularity;
    if blocks < size {
        return Err(Error::configuration(format!(
            "{layer_count} element layers (blocks of {granularity}) cannot be distributed over {size} ranks"
        )));
    }
    let per_rank = blocks / size;
    let remainder = blocks % size;
    let mut start = 0;
    Ok((0..size)
        .map(|rank| {
            let count = per_rank + usize::from(rank < remainder);
            let range = start..start + count * granularity;
            start = range.end;
            range
        })
        .collect())
}

/// Creates this rank's part of the Cartesian mesh described by `config`.
pub fn create_cartesian_mesh(config: &CartesianMeshConfig, comm: &dyn Communicator) -> Result<StructuredMesh> {
    let element_type = config.element_type()?;
    let dim = element_type.dim();
    let layers = partition_layers(config.element_counts[dim - 1], comm.size(), config.layer_granularity)?;
    let mesh = StructuredMesh::from_slab(
        element_type,
        Point3::from(config.min),
        Point3::from(config.max),
        &config.element_counts,
        layers[comm.rank()].clone(),
        comm.rank(),
        comm.size(),
    )?;
    log::debug!(
        "Created Cartesian mesh with element counts {:?} (degree {}), rank {} owns element layers {:?}",
        config.element_counts,
        config.degree,
        comm.rank(),
        mesh.element_layers()
    );
    Ok(mesh)
}
