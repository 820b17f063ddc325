use crate::{serial_field, serial_mesh};
use geofem::assembly::local::{
    mark_nodes, ElementMatrixTerm, ElementVectorTerm, GradientTerm, LaplacianTerm, MassTerm, SourceTerm, SurfaceFlux,
    SurfaceTerm, TensorDivergenceTerm, TermConfig,
};
use geofem::field::{BoundaryConditions, FeField};
use geofem::function::{scalar_fn, ConstantFunction};
use geofem::element::ElementType;
use geofem::mesh::procedural::CartesianMeshConfig;
use geofem::mesh::StructuredMesh;
use geofem::nalgebra::{DMatrix, DMatrixSliceMut, DVector, DVectorSliceMut, Point3};
use geofem::quadrature::{IntegrationPoint, UniformIntegrationPoints};
use geofem::Error;
use matrixcompare::{assert_matrix_eq, assert_scalar_eq};

fn field_on(counts: &[usize], degree: usize, dofs: usize) -> FeField {
    let config = CartesianMeshConfig::default()
        .with_element_counts(counts)
        .with_degree(degree);
    serial_field("u", serial_mesh(&config), dofs, BoundaryConditions::new())
}

fn element_matrix<T: ElementMatrixTerm + ?Sized>(term: &T, element_index: usize) -> DMatrix<f64> {
    let (rows, cols) = term.element_matrix_shape(element_index);
    let mut output = DMatrix::zeros(rows, cols);
    term.assemble_element_matrix_into(element_index, DMatrixSliceMut::from(&mut output))
        .unwrap();
    output
}

fn element_vector<T: ElementVectorTerm + ?Sized>(term: &T, element_index: usize) -> DVector<f64> {
    let mut output = DVector::zeros(term.element_vector_len(element_index));
    term.assemble_element_vector_into(element_index, DVectorSliceMut::from(&mut output))
        .unwrap();
    output
}

/// Sum of every `dofs`-th entry starting at `component`.
fn component_sum(vector: &DVector<f64>, dofs: usize, component: usize) -> f64 {
    vector.iter().skip(component).step_by(dofs).sum()
}

#[test]
fn mass_matrix_of_reference_quad_is_exact() {
    let config = CartesianMeshConfig::default()
        .with_element_counts(&[1, 1])
        .with_bounds([-1.0; 3], [1.0; 3]);
    let field = serial_field("u", serial_mesh(&config), 1, BoundaryConditions::new());
    let points = UniformIntegrationPoints::gauss(2, 2);
    let term = MassTerm::configure(
        TermConfig::new("mass")
            .with_field(&field)
            .with_integration_points(&points)
            .with_function(ConstantFunction::scalar(1.0)),
    )
    .unwrap();

    let m = element_matrix(&term, 0);
    #[rustfmt::skip]
    let expected = DMatrix::from_row_slice(4, 4, &[
        4.0, 2.0, 2.0, 1.0,
        2.0, 4.0, 1.0, 2.0,
        2.0, 1.0, 4.0, 2.0,
        1.0, 2.0, 2.0, 4.0,
    ]) / 9.0;
    assert_matrix_eq!(m, expected, comp = abs, tol = 1e-14);
}

#[test]
fn quadratic_mass_matrix_is_symmetric_and_integrates_area() {
    let field = field_on(&[2, 2], 2, 2);
    let points = UniformIntegrationPoints::gauss(2, 3);
    let term = MassTerm::configure(
        TermConfig::new("mass")
            .with_field(&field)
            .with_integration_points(&points)
            .with_function(ConstantFunction::scalar(2.0)),
    )
    .unwrap();

    let m = element_matrix(&term, 3);
    assert_eq!(m.shape(), (18, 18));
    assert_matrix_eq!(m, m.transpose(), comp = abs, tol = 1e-14);
    // Each of the two components integrates f over an element of area 1/4
    assert_scalar_eq!(m.sum(), 2.0 * 2.0 * 0.25, comp = abs, tol = 1e-13);
    // Different components never couple
    assert_eq!(m[(0, 1)], 0.0);
}

#[test]
fn element_assembly_is_repeatable() {
    let field = field_on(&[3, 2], 1, 1);
    let points = UniformIntegrationPoints::gauss(2, 2);
    let term = LaplacianTerm::configure(
        TermConfig::new("laplace")
            .with_field(&field)
            .with_integration_points(&points)
            .with_function(scalar_fn(|x| 1.0 + x.x * x.y)),
    )
    .unwrap();
    assert_eq!(element_matrix(&term, 4), element_matrix(&term, 4));
}

#[test]
fn configuration_errors() {
    let field = field_on(&[2, 2], 1, 1);
    let points = UniformIntegrationPoints::gauss(2, 2);

    let mismatch = MassTerm::configure(
        TermConfig::new("mass")
            .with_field(&field)
            .with_integration_points(&points)
            .with_function(ConstantFunction::new(vec![1.0, 2.0])),
    );
    match mismatch {
        Err(Error::TypeMismatch { term, expected, actual }) => {
            assert_eq!(term, "mass");
            assert_eq!((expected, actual), (1, 2));
        }
        other => panic!("Expected a type mismatch, got {other:?}"),
    }

    let missing = SourceTerm::configure(
        TermConfig::<StructuredMesh>::new("load")
            .with_integration_points(&points)
            .with_function(ConstantFunction::scalar(1.0)),
    );
    assert!(matches!(missing, Err(Error::MissingField { .. })));

    let no_points = SourceTerm::configure(
        TermConfig::new("load")
            .with_field(&field)
            .with_function(ConstantFunction::scalar(1.0)),
    );
    assert!(matches!(no_points, Err(Error::Configuration(_))));

    // A packed 2D tensor has the right arity, but the field is scalar
    let scalar_divergence = TensorDivergenceTerm::configure(
        TermConfig::new("divergence")
            .with_field(&field)
            .with_integration_points(&points)
            .with_function(ConstantFunction::new(vec![1.0, 1.0, 0.0])),
    );
    assert!(matches!(scalar_divergence, Err(Error::Configuration(_))));

    let vector_field = field_on(&[2, 2], 1, 2);
    let mixed_dofs = MassTerm::configure(
        TermConfig::new("mass")
            .with_field(&vector_field)
            .with_column_field(&field)
            .with_integration_points(&points)
            .with_function(ConstantFunction::scalar(1.0)),
    );
    assert!(matches!(mixed_dofs, Err(Error::Configuration(_))));
}

#[test]
fn single_point_mass_matrix_on_scaled_element() {
    // The affine map onto [0, 2] x [0, 3] has Jacobian determinant 1.5
    let config = CartesianMeshConfig::default()
        .with_element_counts(&[1, 1])
        .with_bounds([0.0; 3], [2.0, 3.0, 1.0]);
    let field = serial_field("u", serial_mesh(&config), 1, BoundaryConditions::new());
    let xi = Point3::new(0.3, -0.6, 0.0);
    let weight = 0.37;
    let points = UniformIntegrationPoints::from_points(vec![IntegrationPoint::new(xi, weight)]);
    let term = MassTerm::configure(
        TermConfig::new("mass")
            .with_field(&field)
            .with_integration_points(&points)
            .with_function(ConstantFunction::scalar(1.0)),
    )
    .unwrap();

    let mut basis = [0.0; 4];
    ElementType::Quad4.evaluate_basis(&xi, &mut basis);
    let expected = DMatrix::from_fn(4, 4, |a, b| weight * 1.5 * basis[a] * basis[b]);
    assert_matrix_eq!(element_matrix(&term, 0), expected, comp = abs, tol = 1e-15);
}

#[test]
fn laplacian_of_unit_square_element() {
    let field = field_on(&[1, 1], 1, 1);
    let points = UniformIntegrationPoints::gauss(2, 2);
    let term = LaplacianTerm::configure(
        TermConfig::new("laplace")
            .with_field(&field)
            .with_integration_points(&points)
            .with_function(ConstantFunction::scalar(1.0)),
    )
    .unwrap();

    let k = element_matrix(&term, 0);
    #[rustfmt::skip]
    let expected = DMatrix::from_row_slice(4, 4, &[
         4.0, -1.0, -1.0, -2.0,
        -1.0,  4.0, -2.0, -1.0,
        -1.0, -2.0,  4.0, -1.0,
        -2.0, -1.0, -1.0,  4.0,
    ]) / 6.0;
    assert_matrix_eq!(k, expected, comp = abs, tol = 1e-14);
}

#[test]
fn laplacian_rows_sum_to_zero_on_stretched_hex() {
    let config = CartesianMeshConfig::default()
        .with_element_counts(&[2, 1, 1])
        .with_bounds([0.0; 3], [3.0, 0.5, 2.0])
        .with_degree(2);
    let field = serial_field("u", serial_mesh(&config), 1, BoundaryConditions::new());
    let points = UniformIntegrationPoints::gauss(3, 3);
    let term = LaplacianTerm::configure(
        TermConfig::new("laplace")
            .with_field(&field)
            .with_integration_points(&points)
            .with_function(ConstantFunction::scalar(1.0)),
    )
    .unwrap();

    let k = element_matrix(&term, 1);
    for row in k.row_iter() {
        assert_scalar_eq!(row.sum(), 0.0, comp = abs, tol = 1e-12);
    }
}

#[test]
fn source_term_integrates_function() {
    let field = field_on(&[4, 4], 1, 1);
    let points = UniformIntegrationPoints::gauss(2, 2);
    let constant = SourceTerm::configure(
        TermConfig::new("load")
            .with_field(&field)
            .with_integration_points(&points)
            .with_function(ConstantFunction::scalar(1.0)),
    )
    .unwrap();
    let f = element_vector(&constant, 5);
    assert_matrix_eq!(f, DVector::repeat(4, 1.0 / 64.0), comp = abs, tol = 1e-15);

    // x is integrated exactly by the Gauss rule
    let linear = SourceTerm::configure(
        TermConfig::new("load")
            .with_field(&field)
            .with_integration_points(&points)
            .with_function(scalar_fn(|x| x.x)),
    )
    .unwrap();
    let f = element_vector(&linear, 0);
    assert_scalar_eq!(f.sum(), 0.125 * 0.0625, comp = abs, tol = 1e-15);
}

#[test]
fn gradient_and_divergence_loads_of_constant_functions_vanish() {
    let points = UniformIntegrationPoints::gauss(2, 2);
    let scalar = field_on(&[2, 3], 2, 1);
    let gradient = GradientTerm::configure(
        TermConfig::new("gradient")
            .with_field(&scalar)
            .with_integration_points(&points)
            .with_function(ConstantFunction::new(vec![1.0, -2.0])),
    )
    .unwrap();
    assert_scalar_eq!(element_vector(&gradient, 2).sum(), 0.0, comp = abs, tol = 1e-13);

    let vector = field_on(&[2, 3], 1, 2);
    let divergence = TensorDivergenceTerm::configure(
        TermConfig::new("divergence")
            .with_field(&vector)
            .with_integration_points(&points)
            .with_function(ConstantFunction::new(vec![1.0, 2.0, 0.5])),
    )
    .unwrap();
    let f = element_vector(&divergence, 2);
    assert_scalar_eq!(component_sum(&f, 2, 0), 0.0, comp = abs, tol = 1e-13);
    assert_scalar_eq!(component_sum(&f, 2, 1), 0.0, comp = abs, tol = 1e-13);
}

#[test]
fn tensor_divergence_of_uniform_pressure_on_a_single_element() {
    let vector = field_on(&[1, 1], 1, 2);
    let points = UniformIntegrationPoints::gauss(2, 2);
    let divergence = TensorDivergenceTerm::configure(
        TermConfig::new("divergence")
            .with_field(&vector)
            .with_integration_points(&points)
            .with_function(ConstantFunction::new(vec![1.0, 1.0, 0.0])),
    )
    .unwrap();
    let f = element_vector(&divergence, 0);
    // Component i of node A is minus the integral of dN_A/dx_i, i.e. +1/2 on the lower side along x_i
    let expected = DVector::from_column_slice(&[0.5, 0.5, -0.5, 0.5, 0.5, -0.5, -0.5, -0.5]);
    assert_matrix_eq!(f, expected, comp = abs, tol = 1e-14);
}

#[test]
fn surface_term_only_touches_marked_faces() {
    let field = field_on(&[2, 1], 1, 1);
    let points = UniformIntegrationPoints::gauss_border(2, 2);
    let right = mark_nodes(field.mesh(), |x| (x.x - 1.0).abs() < 1e-12);
    assert_eq!(right.iter().copied().collect::<Vec<_>>(), vec![2, 5]);
    let term = SurfaceTerm::configure(
        TermConfig::new("traction")
            .with_field(&field)
            .with_integration_points(&points)
            .with_function(ConstantFunction::scalar(1.0)),
        right,
        SurfaceFlux::Vector,
    )
    .unwrap();

    assert_eq!(element_vector(&term, 0), DVector::zeros(4));
    let f = element_vector(&term, 1);
    assert_matrix_eq!(f, DVector::from_column_slice(&[0.0, 0.5, 0.0, 0.5]), comp = abs, tol = 1e-14);
}

#[test]
fn surface_term_contracts_tensor_with_outward_normal() {
    let field = field_on(&[1, 1], 1, 2);
    let points = UniformIntegrationPoints::gauss_border(2, 2);
    let right = mark_nodes(field.mesh(), |x| (x.x - 1.0).abs() < 1e-12);
    let term = SurfaceTerm::configure(
        TermConfig::new("traction")
            .with_field(&field)
            .with_integration_points(&points)
            .with_function(ConstantFunction::new(vec![1.0, 1.0, 0.0])),
        right,
        SurfaceFlux::SymmetricTensor,
    )
    .unwrap();

    let f = element_vector(&term, 0);
    assert_scalar_eq!(component_sum(&f, 2, 0), 1.0, comp = abs, tol = 1e-14);
    assert_scalar_eq!(component_sum(&f, 2, 1), 0.0, comp = abs, tol = 1e-14);
}
