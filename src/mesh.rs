//! Mesh topology and the structured Cartesian mesh provider.
use crate::element::ElementType;
use crate::error::{Error, Result};
use crate::grid::Grid;
use itertools::iproduct;
use nalgebra::{Point3, Vector3};
use std::ops::Range;

pub mod procedural;

/// Element-to-node incidence, node coordinates and ownership of a rank-local mesh.
///
/// Nodes are indexed locally: the first [`local_node_count`](Self::local_node_count) nodes are
/// owned by the calling rank, the remaining nodes up to
/// [`domain_node_count`](Self::domain_node_count) are ghosts owned by other ranks.
pub trait MeshTopology {
    fn dim(&self) -> usize;

    fn element_count(&self) -> usize;

    fn element_type(&self, element_index: usize) -> ElementType;

    fn element_node_count(&self, element_index: usize) -> usize {
        self.element_type(element_index).node_count()
    }

    fn populate_element_nodes(&self, output: &mut [usize], element_index: usize);

    fn node_coordinate(&self, node_index: usize) -> Point3<f64>;

    /// Returns the domain node closest to `point`.
    fn nearest_node(&self, point: &Point3<f64>) -> usize;

    fn local_node_count(&self) -> usize;

    fn domain_node_count(&self) -> usize;

    /// Integers identifying the connectivity and partitioning of the mesh.
    ///
    /// Meshes with equal keys have the same element-to-node incidence and node ownership.
    fn topology_key(&self) -> Vec<usize> {
        vec![
            self.dim(),
            self.element_count(),
            self.local_node_count(),
            self.domain_node_count(),
        ]
    }
}

/// A Cartesian box of Q1 or Q2 elements, decomposed into slabs along its last axis.
///
/// Each rank owns a contiguous range of element layers along the last axis. It owns the vertex
/// layers of its elements except the topmost one, which belongs to the next rank and is held as
/// a ghost layer (the last rank owns its topmost layer). Domain nodes are ordered
/// lexicographically with the last axis slowest, so owned nodes precede ghosts, and the ghost
/// nodes of rank `r` are, in order, the first owned nodes of rank `r + 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredMesh {
    element_type: ElementType,
    min: Point3<f64>,
    max: Point3<f64>,
    element_grid: Grid,
    vertex_grid: Grid,
    rank: usize,
    size: usize,
    element_layers: Range<usize>,
    local_element_grid: Grid,
    domain_vertex_grid: Grid,
    owned_node_count: usize,
    coordinates: Vec<Point3<f64>>,
}

impl StructuredMesh {
    /// Constructs the part of the box owned by `rank`, given its range of element layers along
    /// the last axis.
    pub fn from_slab(
        element_type: ElementType,
        min: Point3<f64>,
        max: Point3<f64>,
        element_counts: &[usize],
        element_layers: Range<usize>,
        rank: usize,
        size: usize,
    ) -> Result<Self> {
        let dim = element_type.dim();
        if element_counts.len() != dim {
            return Err(Error::configuration(format!(
                "expected {dim} element counts for element type {element_type:?}, got {}",
                element_counts.len()
            )));
        }
        if element_counts.iter().any(|&n| n == 0) {
            return Err(Error::configuration("every axis needs at least one element"));
        }
        if (0..dim).any(|axis| max[axis] <= min[axis]) {
            return Err(Error::configuration("mesh bounds must have positive extent"));
        }
        let slab_axis = dim - 1;
        if element_layers.is_empty() || element_layers.end > element_counts[slab_axis] {
            return Err(Error::configuration(format!(
                "rank {rank} was assigned element layers {element_layers:?} out of {}",
                element_counts[slab_axis]
            )));
        }

        let degree = element_type.degree();
        let vertex_counts: Vec<usize> = element_counts.iter().map(|n| degree * n + 1).collect();
        let mut local_element_counts = element_counts.to_vec();
        local_element_counts[slab_axis] = element_layers.len();
        let mut domain_vertex_counts = vertex_counts.clone();
        domain_vertex_counts[slab_axis] = degree * element_layers.len() + 1;

        let is_last = element_layers.end == element_counts[slab_axis];
        let layer_size: usize = domain_vertex_counts[..slab_axis].iter().product();
        let owned_layers = if is_last {
            domain_vertex_counts[slab_axis]
        } else {
            domain_vertex_counts[slab_axis] - 1
        };

        let mut mesh = Self {
            element_type,
            min,
            max,
            element_grid: Grid::new(element_counts),
            vertex_grid: Grid::new(&vertex_counts),
            rank,
            size,
            element_layers,
            local_element_grid: Grid::new(&local_element_counts),
            domain_vertex_grid: Grid::new(&domain_vertex_counts),
            owned_node_count: layer_size * owned_layers,
            coordinates: Vec::new(),
        };
        mesh.coordinates = (0..mesh.domain_vertex_grid.num_points())
            .map(|node| mesh.regular_vertex_coordinate(&mesh.global_vertex_ijk(node)))
            .collect();
        Ok(mesh)
    }

    /// Applies `f` to every node coordinate, e.g. to perturb an otherwise regular mesh.
    pub fn map_coordinates(mut self, f: impl Fn(&Point3<f64>) -> Point3<f64>) -> Self {
        for x in &mut self.coordinates {
            *x = f(x);
        }
        self
    }

    pub fn element_grid(&self) -> &Grid {
        &self.element_grid
    }

    pub fn vertex_grid(&self) -> &Grid {
        &self.vertex_grid
    }

    pub fn bounds(&self) -> (Point3<f64>, Point3<f64>) {
        (self.min, self.max)
    }

    pub fn degree(&self) -> usize {
        self.element_type.degree()
    }

    /// Whether the vertex grid has one more vertex than elements along the first axis.
    pub fn is_q1(&self) -> bool {
        self.element_grid.size(0) + 1 == self.vertex_grid.size(0)
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Range of element layers along the last axis owned by this rank.
    pub fn element_layers(&self) -> Range<usize> {
        self.element_layers.clone()
    }

    fn slab_axis(&self) -> usize {
        self.dim() - 1
    }

    fn first_vertex_layer(&self) -> usize {
        self.degree() * self.element_layers.start
    }

    /// Global vertex indices (per axis) of a domain node.
    pub fn global_vertex_ijk(&self, node_index: usize) -> [usize; 3] {
        let mut ijk = self.domain_vertex_grid.lift(node_index);
        ijk[self.slab_axis()] += self.first_vertex_layer();
        ijk
    }

    /// Global lexicographic vertex index of a domain node.
    pub fn node_global_index(&self, node_index: usize) -> usize {
        self.vertex_grid.project(&self.global_vertex_ijk(node_index))
    }

    /// Domain node holding the given global vertex, if it is present on this rank.
    pub fn domain_node_of_global_ijk(&self, ijk: &[usize; 3]) -> Option<usize> {
        let axis = self.slab_axis();
        let first = self.first_vertex_layer();
        let mut local = *ijk;
        if ijk[axis] < first || ijk[axis] >= first + self.domain_vertex_grid.size(axis) {
            return None;
        }
        if (0..self.dim()).any(|k| ijk[k] >= self.vertex_grid.size(k)) {
            return None;
        }
        local[axis] -= first;
        Some(self.domain_vertex_grid.project(&local))
    }

    pub fn domain_node_of_global(&self, global_index: usize) -> Option<usize> {
        self.domain_node_of_global_ijk(&self.vertex_grid.lift(global_index))
    }

    /// Node spacing of the regular vertex lattice along each axis.
    pub fn vertex_spacing(&self) -> Vector3<f64> {
        let mut h = Vector3::zeros();
        for axis in 0..self.dim() {
            h[axis] = (self.max[axis] - self.min[axis]) / (self.vertex_grid.size(axis) - 1) as f64;
        }
        h
    }

    /// Coordinate of a global vertex on the undeformed lattice.
    pub fn regular_vertex_coordinate(&self, ijk: &[usize; 3]) -> Point3<f64> {
        let h = self.vertex_spacing();
        let mut x = Point3::origin();
        for axis in 0..self.dim() {
            x[axis] = self.min[axis] + h[axis] * ijk[axis] as f64;
        }
        x
    }

    /// Global element indices (per axis) of a local element.
    pub fn global_element_ijk(&self, element_index: usize) -> [usize; 3] {
        let mut ijk = self.local_element_grid.lift(element_index);
        ijk[self.slab_axis()] += self.element_layers.start;
        ijk
    }

    /// Local element containing the global point, if the point lies in this rank's slab.
    pub fn element_containing(&self, point: &Point3<f64>) -> Option<usize> {
        let mut ijk = [0; 3];
        let mut t = [0.0; 3];
        for axis in 0..self.dim() {
            let extent = self.max[axis] - self.min[axis];
            let n = self.element_grid.size(axis);
            t[axis] = (point[axis] - self.min[axis]) / extent * n as f64;
            if t[axis] < -1e-10 || t[axis] > n as f64 + 1e-10 {
                return None;
            }
            ijk[axis] = (t[axis].max(0.0).floor() as usize).min(n - 1);
        }
        let axis = self.slab_axis();
        if !self.element_layers.contains(&ijk[axis]) {
            // A point on the upper slab boundary still belongs to our top element layer.
            let end = self.element_layers.end;
            if ijk[axis] == end && (t[axis] - end as f64).abs() < 1e-10 {
                ijk[axis] -= 1;
            } else {
                return None;
            }
        }
        ijk[axis] -= self.element_layers.start;
        Some(self.local_element_grid.project(&ijk))
    }

    pub fn populate_element_coordinates(&self, output: &mut [Point3<f64>], element_index: usize) {
        let n = self.element_type.nodes_per_axis();
        let base = self.local_element_grid.lift(element_index);
        let degree = self.degree();
        for (a, x) in output.iter_mut().enumerate() {
            let node = self.domain_vertex_grid.project(&element_vertex_ijk(&base, a, n, degree, self.dim()));
            *x = self.coordinates[node];
        }
    }
}

fn element_vertex_ijk(element_ijk: &[usize; 3], a: usize, nodes_per_axis: usize, degree: usize, dim: usize) -> [usize; 3] {
    let mut ijk = [0; 3];
    let mut remainder = a;
    for axis in 0..dim {
        ijk[axis] = degree * element_ijk[axis] + remainder % nodes_per_axis;
        remainder /= nodes_per_axis;
    }
    ijk
}

impl MeshTopology for StructuredMesh {
    fn dim(&self) -> usize {
        self.element_type.dim()
    }

    fn element_count(&self) -> usize {
        self.local_element_grid.num_points()
    }

    fn element_type(&self, _element_index: usize) -> ElementType {
        self.element_type
    }

    fn topology_key(&self) -> Vec<usize> {
        let mut key = vec![self.dim(), self.element_type.node_count(), self.rank, self.size];
        key.extend_from_slice(self.element_grid.sizes());
        key.extend_from_slice(self.vertex_grid.sizes());
        key.extend([self.element_layers.start, self.element_layers.end]);
        key
    }

    fn populate_element_nodes(&self, output: &mut [usize], element_index: usize) {
        assert_eq!(output.len(), self.element_type.node_count());
        let n = self.element_type.nodes_per_axis();
        let base = self.local_element_grid.lift(element_index);
        for (a, node) in output.iter_mut().enumerate() {
            let ijk = element_vertex_ijk(&base, a, n, self.degree(), self.dim());
            *node = self.domain_vertex_grid.project(&ijk);
        }
    }

    fn node_coordinate(&self, node_index: usize) -> Point3<f64> {
        self.coordinates[node_index]
    }

    fn nearest_node(&self, point: &Point3<f64>) -> usize {
        let h = self.vertex_spacing();
        let first = self.first_vertex_layer();
        let mut guess = [0; 3];
        for axis in 0..self.dim() {
            let offset = if axis == self.slab_axis() { first } else { 0 };
            let t = ((point[axis] - self.min[axis]) / h[axis]).round() - offset as f64;
            let upper = self.domain_vertex_grid.size(axis) - 1;
            guess[axis] = (t.max(0.0) as usize).min(upper);
        }

        // The lattice guess is exact for regular meshes; search its neighbourhood for perturbed ones.
        let mut best = self.domain_vertex_grid.project(&guess);
        let mut best_distance = (self.coordinates[best] - point).norm_squared();
        let ranges: Vec<Range<usize>> = (0..3)
            .map(|axis| {
                if axis < self.dim() {
                    let upper = self.domain_vertex_grid.size(axis) - 1;
                    guess[axis].saturating_sub(1)..(guess[axis] + 1).min(upper) + 1
                } else {
                    0..1
                }
            })
            .collect();
        for (k, j, i) in iproduct!(ranges[2].clone(), ranges[1].clone(), ranges[0].clone()) {
            let candidate = self.domain_vertex_grid.project(&[i, j, k]);
            let distance = (self.coordinates[candidate] - point).norm_squared();
            if distance < best_distance {
                best = candidate;
                best_distance = distance;
            }
        }
        best
    }

    fn local_node_count(&self) -> usize {
        self.owned_node_count
    }

    fn domain_node_count(&self) -> usize {
        self.domain_vertex_grid.num_points()
    }
}
