use crate::element::ElementType;
use crate::mesh::MeshTopology;
use nalgebra::{DMatrix, DMatrixSlice, DMatrixSliceMut, Point3};

/// Per-element scratch data: incidence, node coordinates, shape values and derivatives.
///
/// Storage only grows. It is reallocated when an element with more nodes than any previous one
/// (or a different spatial dimension) is encountered, so steady-state assembly does not allocate.
#[derive(Debug)]
pub struct ElementBuffer {
    element_nodes: Vec<usize>,
    element_coords: Vec<Point3<f64>>,
    basis_values: Vec<f64>,
    local_derivatives: DMatrix<f64>,
    global_derivatives: DMatrix<f64>,
    function_values: Vec<f64>,
    node_count: usize,
    dim: usize,
    max_node_count: usize,
    reallocations: usize,
}

impl Default for ElementBuffer {
    fn default() -> Self {
        Self {
            element_nodes: Vec::new(),
            element_coords: Vec::new(),
            basis_values: Vec::new(),
            local_derivatives: DMatrix::zeros(0, 0),
            global_derivatives: DMatrix::zeros(0, 0),
            function_values: Vec::new(),
            node_count: 0,
            dim: 0,
            max_node_count: 0,
            reallocations: 0,
        }
    }
}

impl ElementBuffer {
    /// Makes room for an element with `node_count` nodes in `dim` dimensions.
    pub fn prepare(&mut self, node_count: usize, dim: usize) {
        if node_count > self.max_node_count || dim != self.dim {
            let capacity = node_count.max(self.max_node_count);
            self.element_nodes.resize(capacity, usize::MAX);
            self.element_coords.resize(capacity, Point3::origin());
            self.basis_values.resize(capacity, 0.0);
            self.local_derivatives = DMatrix::zeros(dim, capacity);
            self.global_derivatives = DMatrix::zeros(dim, capacity);
            self.max_node_count = capacity;
            self.reallocations += 1;
        }
        self.node_count = node_count;
        self.dim = dim;
    }

    /// Prepares the buffer for the given element and gathers its nodes and coordinates.
    pub fn populate_element<M: MeshTopology + ?Sized>(&mut self, mesh: &M, element_index: usize) {
        self.prepare(mesh.element_node_count(element_index), mesh.dim());
        let n = self.node_count;
        mesh.populate_element_nodes(&mut self.element_nodes[..n], element_index);
        for (x, node) in self.element_coords[..n].iter_mut().zip(&self.element_nodes[..n]) {
            *x = mesh.node_coordinate(*node);
        }
    }

    /// Number of times storage had to grow.
    pub fn reallocations(&self) -> usize {
        self.reallocations
    }

    pub fn node_count(&self) -> usize {
        self.node_count
    }

    pub fn element_nodes(&self) -> &[usize] {
        &self.element_nodes[..self.node_count]
    }

    pub fn element_coords(&self) -> &[Point3<f64>] {
        &self.element_coords[..self.node_count]
    }

    pub fn basis_values(&self) -> &[f64] {
        &self.basis_values[..self.node_count]
    }

    /// Global derivatives $\partial N_A / \partial x_k$ as a `dim x n` matrix.
    pub fn global_derivatives(&self) -> DMatrixSlice<f64> {
        self.global_derivatives.columns(0, self.node_count)
    }

    pub fn function_values(&self) -> &[f64] {
        &self.function_values
    }

    pub fn function_values_mut(&mut self) -> &mut Vec<f64> {
        &mut self.function_values
    }

    pub fn evaluate_basis(&mut self, element_type: ElementType, xi: &Point3<f64>) {
        let n = self.node_count;
        element_type.evaluate_basis(xi, &mut self.basis_values[..n]);
    }

    /// Evaluates global derivatives at `xi` for the buffered element and returns the Jacobian
    /// determinant.
    pub fn evaluate_global_derivatives(&mut self, element_type: ElementType, xi: &Point3<f64>) -> eyre::Result<f64> {
        let n = self.node_count;
        element_type.evaluate_global_derivatives(
            &self.element_coords[..n],
            xi,
            self.local_derivatives.columns_mut(0, n),
            self.global_derivatives.columns_mut(0, n),
        )
    }

    pub fn jacobian_determinant(&mut self, element_type: ElementType, xi: &Point3<f64>) -> f64 {
        let n = self.node_count;
        element_type.jacobian_determinant(&self.element_coords[..n], xi, self.local_derivatives.columns_mut(0, n))
    }

    pub fn map_reference_coords(&mut self, element_type: ElementType, xi: &Point3<f64>) -> Point3<f64> {
        let n = self.node_count;
        element_type.map_reference_coords(&self.element_coords[..n], xi, &mut self.basis_values[..n])
    }

    pub fn local_derivatives_mut(&mut self) -> DMatrixSliceMut<f64> {
        self.local_derivatives.columns_mut(0, self.node_count)
    }

    /// Splits the buffer into element coordinates and the local derivative workspace.
    pub fn coords_and_local_derivatives_mut(&mut self) -> (&[Point3<f64>], DMatrixSliceMut<f64>) {
        let n = self.node_count;
        (&self.element_coords[..n], self.local_derivatives.columns_mut(0, n))
    }
}

