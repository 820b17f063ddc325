//! Tensor-product Lagrange elements on the reference cube $[-1, 1]^d$.
//!
//! Nodes are ordered lexicographically with the first reference axis varying fastest, which
//! coincides with the vertex ordering of [`StructuredMesh`](crate::mesh::StructuredMesh).
use eyre::eyre;
use nalgebra::{DMatrix, DMatrixSlice, DMatrixSliceMut, Matrix3, Point3, RealField, Vector3};
use numeric_literals::replace_float_literals;
use serde::{Deserialize, Serialize};

/// Tolerance used to decide whether a reference coordinate lies on a face.
pub const FACE_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementType {
    Segment2,
    Segment3,
    Quad4,
    Quad9,
    Hex8,
    Hex27,
}

/// A face of the reference cube, i.e. the set where reference coordinate `axis` equals -1 or +1.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Face {
    pub axis: usize,
    pub positive: bool,
}

impl Face {
    pub fn reference_coordinate(&self) -> f64 {
        if self.positive {
            1.0
        } else {
            -1.0
        }
    }
}

/// Face axes in face-index order: faces 0/1 keep J fixed, 2/3 keep I fixed, 4/5 keep K fixed.
fn face_axes(dim: usize) -> &'static [usize] {
    match dim {
        1 => &[0],
        2 => &[1, 0],
        _ => &[1, 0, 2],
    }
}

/// Values and derivatives of the 1D Lagrange polynomials of the given degree at `x`.
#[replace_float_literals(T::from_f64(literal).expect("Literal must fit in T"))]
fn lagrange_1d<T: RealField + Copy>(degree: usize, x: T) -> ([T; 3], [T; 3]) {
    match degree {
        1 => (
            [(1.0 - x) / 2.0, (1.0 + x) / 2.0, 0.0],
            [-0.5, 0.5, 0.0],
        ),
        2 => (
            [x * (x - 1.0) / 2.0, 1.0 - x * x, x * (x + 1.0) / 2.0],
            [x - 0.5, -2.0 * x, x + 0.5],
        ),
        _ => unreachable!("Only linear and quadratic Lagrange elements are supported"),
    }
}

impl ElementType {
    pub fn from_dim_and_degree(dim: usize, degree: usize) -> Option<Self> {
        use ElementType::*;
        match (dim, degree) {
            (1, 1) => Some(Segment2),
            (1, 2) => Some(Segment3),
            (2, 1) => Some(Quad4),
            (2, 2) => Some(Quad9),
            (3, 1) => Some(Hex8),
            (3, 2) => Some(Hex27),
            _ => None,
        }
    }

    pub fn dim(&self) -> usize {
        use ElementType::*;
        match self {
            Segment2 | Segment3 => 1,
            Quad4 | Quad9 => 2,
            Hex8 | Hex27 => 3,
        }
    }

    pub fn degree(&self) -> usize {
        use ElementType::*;
        match self {
            Segment2 | Quad4 | Hex8 => 1,
            Segment3 | Quad9 | Hex27 => 2,
        }
    }

    pub fn nodes_per_axis(&self) -> usize {
        self.degree() + 1
    }

    pub fn node_count(&self) -> usize {
        self.nodes_per_axis().pow(self.dim() as u32)
    }

    /// Per-axis node indices of local node `a`.
    fn node_multi_index(&self, a: usize) -> [usize; 3] {
        let n = self.nodes_per_axis();
        let mut ijk = [0; 3];
        let mut remainder = a;
        for axis in 0..self.dim() {
            ijk[axis] = remainder % n;
            remainder /= n;
        }
        ijk
    }

    pub fn node_reference_coords(&self, a: usize) -> Point3<f64> {
        let ijk = self.node_multi_index(a);
        let spacing = 2.0 / self.degree() as f64;
        let mut xi = Point3::origin();
        for axis in 0..self.dim() {
            xi[axis] = -1.0 + spacing * ijk[axis] as f64;
        }
        xi
    }

    /// Evaluates every basis function at `xi`.
    ///
    /// # Panics
    ///
    /// Panics if `basis` does not have exactly one entry per node.
    pub fn evaluate_basis(&self, xi: &Point3<f64>, basis: &mut [f64]) {
        assert_eq!(basis.len(), self.node_count(), "Basis buffer must have one entry per node");
        let dim = self.dim();
        let mut values = [[0.0; 3]; 3];
        for axis in 0..dim {
            values[axis] = lagrange_1d(self.degree(), xi[axis]).0;
        }
        for (a, phi) in basis.iter_mut().enumerate() {
            let ijk = self.node_multi_index(a);
            *phi = (0..dim).map(|axis| values[axis][ijk[axis]]).product();
        }
    }

    /// Evaluates reference derivatives $\partial N_A / \partial \xi_k$ into the `dim x n` matrix.
    pub fn evaluate_local_derivatives(&self, xi: &Point3<f64>, mut derivatives: DMatrixSliceMut<f64>) {
        let dim = self.dim();
        assert_eq!(derivatives.nrows(), dim);
        assert_eq!(derivatives.ncols(), self.node_count());
        let mut values = [[0.0; 3]; 3];
        let mut slopes = [[0.0; 3]; 3];
        for axis in 0..dim {
            let (v, d) = lagrange_1d(self.degree(), xi[axis]);
            values[axis] = v;
            slopes[axis] = d;
        }
        for a in 0..self.node_count() {
            let ijk = self.node_multi_index(a);
            for k in 0..dim {
                derivatives[(k, a)] = (0..dim)
                    .map(|axis| {
                        if axis == k {
                            slopes[axis][ijk[axis]]
                        } else {
                            values[axis][ijk[axis]]
                        }
                    })
                    .product();
            }
        }
    }

    /// Computes $J_{ab} = \partial x_a / \partial \xi_b$, padded with the identity for unused axes.
    pub fn jacobian(&self, coords: &[Point3<f64>], local_derivatives: DMatrixSlice<f64>) -> Matrix3<f64> {
        let dim = self.dim();
        assert_eq!(coords.len(), self.node_count());
        let mut j = Matrix3::identity();
        for a in 0..dim {
            for b in 0..dim {
                j[(a, b)] = coords
                    .iter()
                    .enumerate()
                    .map(|(node, x)| local_derivatives[(b, node)] * x[a])
                    .sum();
            }
        }
        j
    }

    pub fn jacobian_determinant(
        &self,
        coords: &[Point3<f64>],
        xi: &Point3<f64>,
        mut local_derivatives: DMatrixSliceMut<f64>,
    ) -> f64 {
        self.evaluate_local_derivatives(xi, local_derivatives.columns_mut(0, self.node_count()));
        self.jacobian(coords, local_derivatives.columns(0, self.node_count())).determinant()
    }

    /// Evaluates global derivatives $\partial N_A / \partial x_k$ into `global_derivatives`
    /// (`dim x n`) and returns the Jacobian determinant.
    pub fn evaluate_global_derivatives(
        &self,
        coords: &[Point3<f64>],
        xi: &Point3<f64>,
        mut local_derivatives: DMatrixSliceMut<f64>,
        mut global_derivatives: DMatrixSliceMut<f64>,
    ) -> eyre::Result<f64> {
        self.evaluate_local_derivatives(xi, local_derivatives.columns_mut(0, self.node_count()));
        let j = self.jacobian(coords, local_derivatives.columns(0, self.node_count()));
        let det = j.determinant();
        let j_inv = j
            .try_inverse()
            .ok_or_else(|| eyre!("Singular element Jacobian encountered"))?;
        let dim = self.dim();
        assert_eq!(global_derivatives.nrows(), dim);
        assert_eq!(global_derivatives.ncols(), self.node_count());
        for node in 0..self.node_count() {
            for k in 0..dim {
                global_derivatives[(k, node)] = (0..dim)
                    .map(|b| j_inv[(b, k)] * local_derivatives[(b, node)])
                    .sum();
            }
        }
        Ok(det)
    }

    pub fn map_reference_coords(&self, coords: &[Point3<f64>], xi: &Point3<f64>, basis: &mut [f64]) -> Point3<f64> {
        self.evaluate_basis(xi, basis);
        let mut x = Point3::origin();
        for (phi, x_node) in basis.iter().zip(coords) {
            x.coords += x_node.coords * *phi;
        }
        x
    }

    /// Finds the reference coordinates of the physical point `x` by Newton iteration.
    pub fn global_to_local(&self, coords: &[Point3<f64>], x: &Point3<f64>) -> eyre::Result<Point3<f64>> {
        const MAX_ITERATIONS: usize = 50;
        let n = self.node_count();
        let mut basis = vec![0.0; n];
        let mut derivatives = DMatrix::zeros(self.dim(), n);
        let scale = coords
            .iter()
            .map(|p| (p - coords[0]).norm())
            .fold(0.0, f64::max)
            .max(1.0);

        let mut xi = Point3::origin();
        for _ in 0..MAX_ITERATIONS {
            let residual = self.map_reference_coords(coords, &xi, &mut basis) - x;
            if residual.norm() <= 1e-12 * scale {
                return Ok(xi);
            }
            self.evaluate_local_derivatives(&xi, DMatrixSliceMut::from(&mut derivatives));
            let j = self.jacobian(coords, DMatrixSlice::from(&derivatives));
            let step = j
                .lu()
                .solve(&residual)
                .ok_or_else(|| eyre!("Singular element Jacobian encountered"))?;
            xi -= step;
        }
        Err(eyre!(
            "Failed to find reference coordinates of point {:?} within {} iterations",
            x,
            MAX_ITERATIONS
        ))
    }

    pub fn face_count(&self) -> usize {
        2 * self.dim()
    }

    pub fn face(&self, index: usize) -> Face {
        assert!(index < self.face_count(), "Face index out of bounds");
        Face {
            axis: face_axes(self.dim())[index / 2],
            positive: index % 2 == 1,
        }
    }

    /// Determines which reference face `xi` lies on, testing the J, I and K axes in turn.
    pub fn face_of(&self, xi: &Point3<f64>) -> Option<Face> {
        face_axes(self.dim()).iter().find_map(|&axis| {
            if (xi[axis] + 1.0).abs() < FACE_TOLERANCE {
                Some(Face { axis, positive: false })
            } else if (xi[axis] - 1.0).abs() < FACE_TOLERANCE {
                Some(Face { axis, positive: true })
            } else {
                None
            }
        })
    }

    /// Local indices of the nodes lying on the given face.
    pub fn face_nodes(&self, face: &Face) -> impl Iterator<Item = usize> + '_ {
        let on_face = if face.positive { self.degree() } else { 0 };
        let axis = face.axis;
        (0..self.node_count()).filter(move |&a| self.node_multi_index(a)[axis] == on_face)
    }

    /// Outward unit normal at a point on the boundary of the element, if `xi` lies on a face.
    pub fn surface_normal(
        &self,
        coords: &[Point3<f64>],
        xi: &Point3<f64>,
        mut local_derivatives: DMatrixSliceMut<f64>,
    ) -> Option<Vector3<f64>> {
        let face = self.face_of(xi)?;
        self.evaluate_local_derivatives(xi, local_derivatives.columns_mut(0, self.node_count()));
        let j = self.jacobian(coords, local_derivatives.columns(0, self.node_count()));
        let mut reference_normal = Vector3::zeros();
        reference_normal[face.axis] = face.reference_coordinate();
        let normal = j.try_inverse()?.transpose() * reference_normal;
        normal.try_normalize(f64::EPSILON)
    }

    /// Ratio between physical and reference surface measure on the given face.
    pub fn surface_jacobian_determinant(
        &self,
        coords: &[Point3<f64>],
        xi: &Point3<f64>,
        face: &Face,
        mut local_derivatives: DMatrixSliceMut<f64>,
    ) -> f64 {
        self.evaluate_local_derivatives(xi, local_derivatives.columns_mut(0, self.node_count()));
        let j = self.jacobian(coords, local_derivatives.columns(0, self.node_count()));
        let mut tangents = (0..self.dim())
            .filter(|&axis| axis != face.axis)
            .map(|axis| j.column(axis).into_owned());
        match self.dim() {
            1 => 1.0,
            2 => tangents.next().map_or(0.0, |t| t.norm()),
            _ => match (tangents.next(), tangents.next()) {
                (Some(t1), Some(t2)) => t1.cross(&t2).norm(),
                _ => 0.0,
            },
        }
    }
}
