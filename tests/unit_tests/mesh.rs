use crate::{run_on_ranks, serial_mesh};
use geofem::element::ElementType;
use geofem::mesh::procedural::{create_cartesian_mesh, CartesianMeshConfig};
use geofem::mesh::{MeshTopology, StructuredMesh};
use geofem::nalgebra::Point3;
use geofem::Error;

fn slab(element_counts: &[usize], layers: std::ops::Range<usize>, rank: usize, size: usize) -> StructuredMesh {
    let element_type = ElementType::from_dim_and_degree(element_counts.len(), 1).unwrap();
    StructuredMesh::from_slab(
        element_type,
        Point3::origin(),
        Point3::new(1.0, 1.0, 1.0),
        element_counts,
        layers,
        rank,
        size,
    )
    .unwrap()
}

#[test]
fn serial_quad_mesh_counts() {
    let mesh = serial_mesh(&CartesianMeshConfig::default().with_element_counts(&[4, 3]));
    assert_eq!(mesh.dim(), 2);
    assert_eq!(mesh.element_count(), 12);
    assert_eq!(mesh.local_node_count(), 20);
    assert_eq!(mesh.domain_node_count(), 20);
    assert!(mesh.is_q1());

    let mut nodes = vec![0; 4];
    mesh.populate_element_nodes(&mut nodes, 5);
    // Element (1, 1)
    assert_eq!(nodes, vec![6, 7, 11, 12]);
}

#[test]
fn quadratic_elements_share_edge_nodes() {
    let mesh = serial_mesh(
        &CartesianMeshConfig::default()
            .with_element_counts(&[2, 2])
            .with_degree(2),
    );
    assert_eq!(mesh.domain_node_count(), 25);
    assert!(!mesh.is_q1());
    let mut nodes = vec![0; 9];
    mesh.populate_element_nodes(&mut nodes, 3);
    assert_eq!(nodes, vec![12, 13, 14, 17, 18, 19, 22, 23, 24]);
    mesh.populate_element_nodes(&mut nodes, 0);
    assert_eq!(nodes[2], 2);
    assert_eq!(nodes[8], 12);
}

#[test]
fn ghost_layer_matches_first_layer_of_successor() {
    let lower = slab(&[4, 4], 0..2, 0, 2);
    let upper = slab(&[4, 4], 2..4, 1, 2);

    assert_eq!(lower.element_count(), 8);
    assert_eq!(lower.local_node_count(), 10);
    assert_eq!(lower.domain_node_count(), 15);
    assert_eq!(upper.local_node_count(), 15);
    assert_eq!(upper.domain_node_count(), 15);

    for ghost in lower.local_node_count()..lower.domain_node_count() {
        let owned = ghost - lower.local_node_count();
        assert_eq!(lower.node_global_index(ghost), upper.node_global_index(owned));
        assert_eq!(lower.node_coordinate(ghost), upper.node_coordinate(owned));
    }
    let total_owned = lower.local_node_count() + upper.local_node_count();
    assert_eq!(total_owned, lower.vertex_grid().num_points());
}

#[test]
fn hex_slabs_partition_the_box() {
    let lower = slab(&[2, 2, 4], 0..1, 0, 3);
    let middle = slab(&[2, 2, 4], 1..3, 1, 3);
    let upper = slab(&[2, 2, 4], 3..4, 2, 3);
    let owned: usize = [&lower, &middle, &upper].iter().map(|m| m.local_node_count()).sum();
    assert_eq!(owned, 3 * 3 * 5);
    let elements: usize = [&lower, &middle, &upper].iter().map(|m| m.element_count()).sum();
    assert_eq!(elements, 16);
    assert_eq!(middle.global_element_ijk(0), [0, 0, 1]);
}

#[test]
fn nearest_node_on_regular_and_perturbed_meshes() {
    let mesh = serial_mesh(&CartesianMeshConfig::default().with_element_counts(&[4, 4]));
    assert_eq!(mesh.nearest_node(&Point3::new(0.26, 0.49, 0.0)), 11);
    assert_eq!(mesh.nearest_node(&Point3::new(-3.0, 7.0, 0.0)), 20);

    let target = mesh.node_coordinate(12);
    let perturbed = StructuredMesh::clone(&mesh).map_coordinates(|x| {
        if (x - target).norm() < 1e-12 {
            Point3::new(x.x + 0.2, x.y, 0.0)
        } else {
            *x
        }
    });
    // Node 12 moved from (0.5, 0.5) to (0.7, 0.5), closer to the query than node 13
    assert_eq!(perturbed.nearest_node(&Point3::new(0.69, 0.5, 0.0)), 12);
}

#[test]
fn element_containing_respects_slab_ownership() {
    let serial = serial_mesh(&CartesianMeshConfig::default().with_element_counts(&[4, 4]));
    assert_eq!(serial.element_containing(&Point3::new(0.3, 0.6, 0.0)), Some(9));
    assert_eq!(serial.element_containing(&Point3::new(1.0, 1.0, 0.0)), Some(15));
    assert_eq!(serial.element_containing(&Point3::new(1.1, 0.5, 0.0)), None);

    let lower = slab(&[4, 4], 0..2, 0, 2);
    let upper = slab(&[4, 4], 2..4, 1, 2);
    assert_eq!(lower.element_containing(&Point3::new(0.3, 0.6, 0.0)), None);
    assert_eq!(upper.element_containing(&Point3::new(0.3, 0.6, 0.0)), Some(1));
    // The slab interface belongs to both ranks
    assert_eq!(lower.element_containing(&Point3::new(0.3, 0.5, 0.0)), Some(5));
    assert_eq!(upper.element_containing(&Point3::new(0.3, 0.5, 0.0)), Some(1));
}

#[test]
fn too_many_ranks_is_a_configuration_error() {
    let config = CartesianMeshConfig::default().with_element_counts(&[4, 2]);
    let results = run_on_ranks(4, |comm| create_cartesian_mesh(&config, comm));
    assert!(results
        .iter()
        .all(|result| matches!(result, Err(Error::Configuration(_)))));
}

#[test]
fn unsupported_degree_is_a_configuration_error() {
    let config = CartesianMeshConfig::default().with_degree(3);
    let result = create_cartesian_mesh(&config, &geofem::comm::SerialCommunicator);
    assert!(matches!(result, Err(Error::Configuration(_))));
}

#[test]
fn distributed_meshes_cover_all_elements() {
    let config = CartesianMeshConfig::default().with_element_counts(&[3, 6]);
    let counts = run_on_ranks(3, |comm| {
        let mesh = create_cartesian_mesh(&config, comm).unwrap();
        (mesh.element_count(), mesh.local_node_count())
    });
    assert_eq!(counts, vec![(6, 8), (6, 8), (6, 12)]);
}

#[test]
fn cartesian_mesh_config_serde_round_trip() {
    let config = CartesianMeshConfig::default()
        .with_element_counts(&[2, 3, 4])
        .with_degree(2)
        .with_layer_granularity(2);
    let json = serde_json::to_string(&config).unwrap();
    let parsed: CartesianMeshConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, config);
}
