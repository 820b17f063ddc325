use crate::{serial_field, serial_mesh};
use geofem::assembly::assembler::{Assembler, AssemblyCallbacks, AssemblyState};
use geofem::assembly::buffers::ElementBuffer;
use geofem::field::BoundaryConditions;
use geofem::mesh::procedural::CartesianMeshConfig;
use geofem::quadrature::UniformIntegrationPoints;

/// Records every visited `(row node, column node, column restricted)` triple.
#[derive(Debug, Default)]
struct Recorder {
    accept_restricted_rows: bool,
    particle_filter: Option<usize>,
    particles: usize,
    rows: Vec<(usize, usize)>,
    entries: Vec<(usize, usize, bool)>,
}

impl AssemblyCallbacks for Recorder {
    fn on_particle(&mut self, state: &AssemblyState, _buffer: &ElementBuffer) -> bool {
        self.particles += 1;
        self.particle_filter
            .map_or(true, |modulus| state.integration_point % modulus == 0)
    }

    fn on_row_restricted(&mut self, state: &AssemblyState) -> bool {
        if self.accept_restricted_rows {
            self.rows.push((state.row_node, state.row_dof));
        }
        self.accept_restricted_rows
    }

    fn on_row_unrestricted(&mut self, state: &AssemblyState) -> bool {
        self.rows.push((state.row_node, state.row_dof));
        true
    }

    fn on_col_restricted(&mut self, state: &AssemblyState) {
        self.entries.push((state.row_node, state.col_node, true));
    }

    fn on_col_unrestricted(&mut self, state: &AssemblyState) {
        self.entries.push((state.row_node, state.col_node, false));
    }
}

fn line_field_fixed_at_origin() -> geofem::field::FeField {
    let mesh = serial_mesh(&CartesianMeshConfig::default().with_element_counts(&[2]));
    let mut bcs = BoundaryConditions::new();
    bcs.insert(0, 0, 1.0);
    serial_field("u", mesh, 1, bcs)
}

#[test]
fn restricted_rows_are_skipped_by_default() {
    let field = line_field_fixed_at_origin();
    let mut assembler = Assembler::new(&field).with_callbacks(Recorder::default());
    assembler.loop_matrix_element(0);
    let recorder = assembler.into_callbacks();
    assert_eq!(recorder.rows, vec![(1, 0)]);
    assert_eq!(recorder.entries, vec![(1, 0, true), (1, 1, false)]);
}

#[test]
fn restricted_rows_can_opt_in() {
    let field = line_field_fixed_at_origin();
    let recorder = Recorder {
        accept_restricted_rows: true,
        ..Recorder::default()
    };
    let mut assembler = Assembler::new(&field).with_callbacks(recorder);
    assembler.loop_matrix_element(0);
    assembler.loop_matrix_element(1);
    let recorder = assembler.into_callbacks();
    assert_eq!(recorder.rows, vec![(0, 0), (1, 0), (1, 0), (2, 0)]);
    assert_eq!(
        recorder.entries,
        vec![
            (0, 0, true),
            (0, 1, false),
            (1, 0, true),
            (1, 1, false),
            (1, 1, false),
            (1, 2, false),
            (2, 1, false),
            (2, 2, false),
        ]
    );
}

#[test]
fn rejected_particles_skip_the_element_loop() {
    let field = line_field_fixed_at_origin();
    let points = UniformIntegrationPoints::gauss(1, 3);
    let recorder = Recorder {
        particle_filter: Some(2),
        ..Recorder::default()
    };
    let mut assembler = Assembler::new(&field)
        .with_integration_points(&points)
        .with_callbacks(recorder);
    assembler.integrate_matrix_element(1).unwrap();
    assert_eq!(assembler.state().element, 1);
    let recorder = assembler.into_callbacks();
    assert_eq!(recorder.particles, 3);
    // Points 0 and 2 are accepted, each visiting both rows of the element
    assert_eq!(recorder.rows.len(), 4);
    assert_eq!(recorder.entries.len(), 8);
}

#[test]
fn diagonal_loop_visits_each_owned_dof_once() {
    let mesh = serial_mesh(&CartesianMeshConfig::default().with_element_counts(&[2, 2]));
    let bcs = BoundaryConditions::from_fn(mesh.as_ref(), 2, |x, dof| (x.y == 0.0 && dof == 1).then_some(0.0));
    let field = serial_field("u", mesh, 2, bcs);

    let mut assembler = Assembler::new(&field).with_callbacks(Recorder::default());
    assembler.loop_matrix_diagonal();
    let recorder = assembler.into_callbacks();
    // Three nodes on y = 0 have their second component fixed
    assert_eq!(recorder.rows.len(), 18 - 3);
    assert!(recorder.entries.iter().all(|&(row, col, _)| row == col));
    assert_eq!(recorder.entries.iter().filter(|entry| entry.2).count(), 0);

    let recorder = Recorder {
        accept_restricted_rows: true,
        ..Recorder::default()
    };
    let mut assembler = Assembler::new(&field).with_callbacks(recorder);
    assembler.loop_matrix_diagonal();
    let recorder = assembler.into_callbacks();
    assert_eq!(recorder.rows.len(), 18);
    assert_eq!(recorder.entries.iter().filter(|entry| entry.2).count(), 3);
}

#[test]
fn buffers_are_allocated_once_per_mesh() {
    let mesh = serial_mesh(&CartesianMeshConfig::default().with_element_counts(&[3, 3]));
    let field = serial_field("u", mesh, 1, BoundaryConditions::new());
    let points = UniformIntegrationPoints::gauss(2, 2);
    let mut assembler = Assembler::new(&field).with_integration_points(&points);
    for element in 0..9 {
        assembler.integrate_matrix_element(element).unwrap();
    }
    assert_eq!(assembler.row_buffer().reallocations(), 1);
    assert_eq!(assembler.row_buffer().node_count(), 4);
}

#[test]
fn vector_loop_reports_restricted_rows() {
    let field = line_field_fixed_at_origin();
    let mut assembler = Assembler::new(&field).with_callbacks(Recorder::default());
    assembler.loop_vector_element(0);
    let recorder = assembler.into_callbacks();
    assert_eq!(recorder.rows, vec![(1, 0)]);
    assert!(recorder.entries.is_empty());
}
