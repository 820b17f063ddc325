//! Integration point layouts for volume and surface integrals.
//!
//! Rules on the reference cube are built from the Gauss rules in `fenris_quadrature`.
use fenris_quadrature::{tensor, univariate};
use nalgebra::Point3;

/// A quadrature point in reference coordinates together with its weight.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct IntegrationPoint {
    pub xi: Point3<f64>,
    pub weight: f64,
}

impl IntegrationPoint {
    pub fn new(xi: Point3<f64>, weight: f64) -> Self {
        Self { xi, weight }
    }
}

/// Provides the integration points owned by each element's cell.
pub trait IntegrationPoints {
    fn element_points(&self, element_index: usize) -> &[IntegrationPoint];
}

/// The same set of integration points in every element.
#[derive(Debug, Clone, PartialEq)]
pub struct UniformIntegrationPoints {
    points: Vec<IntegrationPoint>,
}

impl UniformIntegrationPoints {
    pub fn from_points(points: Vec<IntegrationPoint>) -> Self {
        Self { points }
    }

    /// Tensor-product Gauss rule with `points_per_dim` points along each reference axis.
    pub fn gauss(dim: usize, points_per_dim: usize) -> Self {
        let points = match dim {
            1 => {
                let (weights, points) = univariate::gauss(points_per_dim);
                weights
                    .into_iter()
                    .zip(points)
                    .map(|(w, [x])| IntegrationPoint::new(Point3::new(x, 0.0, 0.0), w))
                    .collect()
            }
            2 => {
                let (weights, points) = tensor::quadrilateral_gauss(points_per_dim);
                weights
                    .into_iter()
                    .zip(points)
                    .map(|(w, [x, y])| IntegrationPoint::new(Point3::new(x, y, 0.0), w))
                    .collect()
            }
            3 => {
                let (weights, points) = tensor::hexahedron_gauss(points_per_dim);
                weights
                    .into_iter()
                    .zip(points)
                    .map(|(w, [x, y, z])| IntegrationPoint::new(Point3::new(x, y, z), w))
                    .collect()
            }
            _ => panic!("Unsupported dimension {dim}"),
        };
        Self { points }
    }

    /// Gauss points placed on every face of the reference cube.
    ///
    /// Each face carries a $(d-1)$-dimensional tensor Gauss rule over its tangential axes. The
    /// face-normal coordinate is $-1$ on even faces and $+1$ on odd faces, with faces ordered as
    /// in [`ElementType::face`](crate::element::ElementType::face).
    pub fn gauss_border(dim: usize, points_per_dim: usize) -> Self {
        let face_axes: &[usize] = match dim {
            1 => &[0],
            2 => &[1, 0],
            3 => &[1, 0, 2],
            _ => panic!("Unsupported dimension {dim}"),
        };
        let surface_rule = match dim {
            1 => Self::from_points(vec![IntegrationPoint::new(Point3::origin(), 1.0)]),
            _ => Self::gauss(dim - 1, points_per_dim),
        };

        let mut points = Vec::with_capacity(2 * dim * surface_rule.points.len());
        for &axis in face_axes {
            for constant in [-1.0, 1.0] {
                for surface_point in &surface_rule.points {
                    let mut xi = Point3::origin();
                    let mut tangential = surface_point.xi.coords.iter();
                    for k in (0..dim).filter(|&k| k != axis) {
                        xi[k] = *tangential.next().unwrap_or(&0.0);
                    }
                    xi[axis] = constant;
                    points.push(IntegrationPoint::new(xi, surface_point.weight));
                }
            }
        }
        Self { points }
    }

    pub fn points(&self) -> &[IntegrationPoint] {
        &self.points
    }
}

impl IntegrationPoints for UniformIntegrationPoints {
    fn element_points(&self, _element_index: usize) -> &[IntegrationPoint] {
        &self.points
    }
}

/// Integration points that differ per element, e.g. material points in a particle-in-cell setting.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ElementwiseIntegrationPoints {
    offsets: Vec<usize>,
    points: Vec<IntegrationPoint>,
}

impl ElementwiseIntegrationPoints {
    pub fn from_element_points<I>(element_points: I) -> Self
    where
        I: IntoIterator<Item = Vec<IntegrationPoint>>,
    {
        let mut offsets = vec![0];
        let mut points = Vec::new();
        for element in element_points {
            points.extend(element);
            offsets.push(points.len());
        }
        Self { offsets, points }
    }

    pub fn num_elements(&self) -> usize {
        self.offsets.len() - 1
    }
}

impl IntegrationPoints for ElementwiseIntegrationPoints {
    fn element_points(&self, element_index: usize) -> &[IntegrationPoint] {
        &self.points[self.offsets[element_index]..self.offsets[element_index + 1]]
    }
}
