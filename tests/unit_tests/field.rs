use crate::{run_on_ranks, serial_field, serial_mesh};
use geofem::comm::{OffsetStrategy, SerialCommunicator};
use geofem::field::{BoundaryConditions, EquationNumbering, FeField};
use geofem::mesh::procedural::{create_cartesian_mesh, CartesianMeshConfig};
use geofem::mesh::MeshTopology;
use geofem::Error;
use std::sync::Arc;

fn left_side_x_fixed(mesh: &impl MeshTopology) -> BoundaryConditions {
    BoundaryConditions::from_fn(mesh, 2, |x, dof| (x.x.abs() < 1e-12 && dof == 0).then_some(0.0))
}

#[test]
fn constrained_dofs_have_no_equation() {
    let mesh = serial_mesh(&CartesianMeshConfig::default().with_element_counts(&[4, 4]));
    let bcs = left_side_x_fixed(mesh.as_ref());
    assert_eq!(bcs.len(), 5);
    let field = serial_field("u", mesh, 2, bcs);
    let numbering = field.numbering();

    assert_eq!(numbering.global_equation_count(), 45);
    assert_eq!(numbering.local_owned_equation_count(), 45);
    assert_eq!(numbering.owned_range(), 0..45);
    assert_eq!(numbering.equation_number(0, 0), None);
    assert_eq!(numbering.equation_number(0, 1), Some(0));
    assert_eq!(numbering.equation_number(1, 0), Some(1));
    assert_eq!(numbering.equation_number(1, 1), Some(2));
    assert_eq!(numbering.equation_number(5, 0), None);
    assert_eq!(numbering.equation_number(24, 1), Some(44));
}

#[test]
fn constrained_equations_can_be_kept() {
    let mesh = serial_mesh(&CartesianMeshConfig::default().with_element_counts(&[4, 4]));
    let bcs = left_side_x_fixed(mesh.as_ref());
    let field = FeField::with_constrained_equations("u", mesh, 2, bcs, &SerialCommunicator, OffsetStrategy::RankChain)
        .unwrap();
    assert_eq!(field.numbering().global_equation_count(), 50);
    assert_eq!(field.numbering().equation_number(0, 0), Some(0));
    assert!(field.boundary_conditions().is_constrained(0, 0));
    assert_eq!(field.boundary_conditions().value(5, 0), Some(0.0));
}

#[test]
fn ghost_equations_match_their_owner() {
    let config = CartesianMeshConfig::default().with_element_counts(&[4, 4]);
    let results = run_on_ranks(2, |comm| {
        let mesh = Arc::new(create_cartesian_mesh(&config, comm).unwrap());
        let bcs = left_side_x_fixed(mesh.as_ref());
        let field = FeField::new("u", mesh, 2, bcs, comm, OffsetStrategy::RankChain).unwrap();
        let mesh = field.mesh();
        let numbers: Vec<Option<usize>> = (0..mesh.domain_node_count())
            .flat_map(|node| (0..2).map(move |dof| (node, dof)))
            .map(|(node, dof)| field.numbering().equation_number(node, dof))
            .collect();
        (mesh.local_node_count(), field.numbering().owned_range(), numbers)
    });

    let (lower_owned, lower_range, lower_numbers) = &results[0];
    let (_, upper_range, upper_numbers) = &results[1];
    assert_eq!(lower_range.end, upper_range.start);
    assert_eq!(upper_range.end, 45);

    let ghosts = &lower_numbers[2 * lower_owned..];
    assert_eq!(ghosts, &upper_numbers[..ghosts.len()]);
    assert!(ghosts.iter().flatten().all(|number| upper_range.contains(number)));
}

#[test]
fn offset_strategies_produce_identical_numberings() {
    let config = CartesianMeshConfig::default().with_element_counts(&[3, 6]);
    let numberings = |strategy: OffsetStrategy| {
        run_on_ranks(3, |comm| {
            let mesh = Arc::new(create_cartesian_mesh(&config, comm).unwrap());
            let bcs = left_side_x_fixed(mesh.as_ref());
            EquationNumbering::build(mesh.as_ref(), 2, &bcs, comm, strategy).unwrap()
        })
    };
    assert_eq!(
        numberings(OffsetStrategy::RankChain),
        numberings(OffsetStrategy::ExclusiveScan)
    );
}

#[test]
fn fingerprint_tracks_numbering() {
    let mesh = serial_mesh(&CartesianMeshConfig::default().with_element_counts(&[4, 4]));
    let free = serial_field("u", Arc::clone(&mesh), 2, BoundaryConditions::new());
    let free_again = serial_field("v", Arc::clone(&mesh), 2, BoundaryConditions::new());
    let constrained = serial_field("u", Arc::clone(&mesh), 2, left_side_x_fixed(mesh.as_ref()));
    assert_eq!(free.fingerprint(), free_again.fingerprint());
    assert_ne!(free.fingerprint(), constrained.fingerprint());

    let finer = serial_mesh(&CartesianMeshConfig::default().with_element_counts(&[8, 4]));
    assert_ne!(free.fingerprint(), serial_field("u", finer, 2, BoundaryConditions::new()).fingerprint());
}

#[test]
fn mismatched_numbering_is_rejected() {
    let mesh = serial_mesh(&CartesianMeshConfig::default().with_element_counts(&[2, 2]));
    let numbering = EquationNumbering::from_numbers(1, vec![Some(0), Some(1)], 2, 0, 2);
    let result = FeField::from_parts("u", mesh, BoundaryConditions::new(), numbering);
    assert!(matches!(result, Err(Error::Configuration(_))));
}

#[test]
fn zero_dofs_per_node_is_rejected() {
    let mesh = serial_mesh(&CartesianMeshConfig::default());
    let result = FeField::new("u", mesh, 0, BoundaryConditions::new(), &SerialCommunicator, OffsetStrategy::RankChain);
    assert!(matches!(result, Err(Error::Configuration(_))));
}
