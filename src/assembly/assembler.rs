//! Term-agnostic traversal of elements, integration points and DOF pairs.
//!
//! The [`Assembler`] visits every `(row dof, column dof)` pair of an element and dispatches to
//! [`AssemblyCallbacks`] depending on whether the DOFs carry a boundary condition. A row DOF
//! under a boundary condition is skipped entirely unless
//! [`on_row_restricted`](AssemblyCallbacks::on_row_restricted) opts in.
use crate::assembly::buffers::ElementBuffer;
use crate::field::FeField;
use crate::mesh::{MeshTopology, StructuredMesh};
use crate::quadrature::IntegrationPoints;
use nalgebra::Point3;

/// Indices describing the current position of an [`Assembler`] traversal.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssemblyState {
    pub element: usize,
    pub integration_point: usize,
    pub xi: Point3<f64>,
    pub weight: f64,
    pub jacobian_determinant: f64,
    /// Row index into the element matrix, `A * dofs + d`.
    pub row_local: usize,
    /// Domain node index of the row.
    pub row_node: usize,
    pub row_dof: usize,
    pub row_equation: Option<usize>,
    pub col_local: usize,
    pub col_node: usize,
    pub col_dof: usize,
    pub col_equation: Option<usize>,
}

/// Hooks invoked by the [`Assembler`]. All methods have defaults, so implementors only override
/// the ones they need.
pub trait AssemblyCallbacks {
    /// Called once per integration point; returning `false` skips the point.
    fn on_particle(&mut self, _state: &AssemblyState, _buffer: &ElementBuffer) -> bool {
        true
    }

    /// Called for a row DOF under a boundary condition; returning `false` skips the whole row.
    fn on_row_restricted(&mut self, _state: &AssemblyState) -> bool {
        false
    }

    /// Called for an unconstrained row DOF; returning `false` skips the whole row.
    fn on_row_unrestricted(&mut self, _state: &AssemblyState) -> bool {
        true
    }

    fn on_col_restricted(&mut self, _state: &AssemblyState) {}

    fn on_col_unrestricted(&mut self, _state: &AssemblyState) {}
}

impl AssemblyCallbacks for () {}

pub struct Assembler<'a, C = (), M = StructuredMesh> {
    row_field: &'a FeField<M>,
    col_field: &'a FeField<M>,
    integration_points: Option<&'a dyn IntegrationPoints>,
    callbacks: C,
    row_buffer: ElementBuffer,
    col_buffer: ElementBuffer,
    populated_element: Option<usize>,
    state: AssemblyState,
}

impl<'a, M: MeshTopology> Assembler<'a, (), M> {
    pub fn new(field: &'a FeField<M>) -> Self {
        Self {
            row_field: field,
            col_field: field,
            integration_points: None,
            callbacks: (),
            row_buffer: ElementBuffer::default(),
            col_buffer: ElementBuffer::default(),
            populated_element: None,
            state: AssemblyState::default(),
        }
    }
}

impl<'a, C, M> Assembler<'a, C, M>
where
    C: AssemblyCallbacks,
    M: MeshTopology,
{
    pub fn with_callbacks<C2: AssemblyCallbacks>(self, callbacks: C2) -> Assembler<'a, C2, M> {
        Assembler {
            row_field: self.row_field,
            col_field: self.col_field,
            integration_points: self.integration_points,
            callbacks,
            row_buffer: self.row_buffer,
            col_buffer: self.col_buffer,
            populated_element: None,
            state: self.state,
        }
    }

    pub fn with_integration_points(mut self, points: &'a dyn IntegrationPoints) -> Self {
        self.integration_points = Some(points);
        self
    }

    /// Sets the row and column fields. Without a column field, rows and columns share `row_field`.
    ///
    /// # Panics
    ///
    /// Panics if the two fields live on meshes with different element counts.
    pub fn set_fields(&mut self, row_field: &'a FeField<M>, col_field: Option<&'a FeField<M>>) {
        let col_field = col_field.unwrap_or(row_field);
        assert_eq!(
            row_field.mesh().element_count(),
            col_field.mesh().element_count(),
            "Row field '{}' and column field '{}' must share the element layout",
            row_field.name(),
            col_field.name()
        );
        self.row_field = row_field;
        self.col_field = col_field;
        self.populated_element = None;
    }

    pub fn set_callbacks(&mut self, callbacks: C) {
        self.callbacks = callbacks;
    }

    pub fn callbacks(&self) -> &C {
        &self.callbacks
    }

    pub fn callbacks_mut(&mut self) -> &mut C {
        &mut self.callbacks
    }

    pub fn into_callbacks(self) -> C {
        self.callbacks
    }

    pub fn state(&self) -> &AssemblyState {
        &self.state
    }

    pub fn row_buffer(&self) -> &ElementBuffer {
        &self.row_buffer
    }

    fn shares_fields(&self) -> bool {
        std::ptr::eq(self.row_field, self.col_field)
    }

    fn populate(&mut self, element_index: usize) {
        if self.populated_element != Some(element_index) {
            self.row_buffer.populate_element(self.row_field.mesh(), element_index);
            if !self.shares_fields() {
                self.col_buffer.populate_element(self.col_field.mesh(), element_index);
            }
            self.populated_element = Some(element_index);
        }
    }

    /// Evaluates shape data at each integration point of the element and runs
    /// [`loop_matrix_element`](Self::loop_matrix_element) for every point accepted by
    /// [`on_particle`](AssemblyCallbacks::on_particle).
    ///
    /// # Panics
    ///
    /// Panics if no integration points were provided.
    pub fn integrate_matrix_element(&mut self, element_index: usize) -> eyre::Result<()> {
        let points = self
            .integration_points
            .expect("Integration points must be set before integrating an element");
        self.populate(element_index);
        let element_type = self.row_field.mesh().element_type(element_index);
        for (point_index, point) in points.element_points(element_index).iter().enumerate() {
            self.row_buffer.evaluate_basis(element_type, &point.xi);
            let det = self
                .row_buffer
                .evaluate_global_derivatives(element_type, &point.xi)?;
            self.state.element = element_index;
            self.state.integration_point = point_index;
            self.state.xi = point.xi;
            self.state.weight = point.weight;
            self.state.jacobian_determinant = det;
            if !self.callbacks.on_particle(&self.state, &self.row_buffer) {
                continue;
            }
            self.loop_matrix_element(element_index);
        }
        Ok(())
    }

    /// Visits every `(row node, row dof)` pair of the element and, for accepted rows, every
    /// `(column node, column dof)` pair.
    pub fn loop_matrix_element(&mut self, element_index: usize) {
        self.populate(element_index);
        self.state.element = element_index;
        let row_dofs = self.row_field.dofs_per_node();
        let col_dofs = self.col_field.dofs_per_node();
        let row_nodes = self.row_buffer.element_nodes();
        let col_nodes = if self.shares_fields() {
            self.row_buffer.element_nodes()
        } else {
            self.col_buffer.element_nodes()
        };
        let row_bcs = self.row_field.boundary_conditions();
        let col_bcs = self.col_field.boundary_conditions();
        let row_numbering = self.row_field.numbering();
        let col_numbering = self.col_field.numbering();
        let state = &mut self.state;
        let callbacks = &mut self.callbacks;

        for (row_a, &row_node) in row_nodes.iter().enumerate() {
            for row_dof in 0..row_dofs {
                state.row_local = row_a * row_dofs + row_dof;
                state.row_node = row_node;
                state.row_dof = row_dof;
                state.row_equation = row_numbering.equation_number(row_node, row_dof);

                let accepted = if row_bcs.is_constrained(row_node, row_dof) {
                    callbacks.on_row_restricted(state)
                } else {
                    callbacks.on_row_unrestricted(state)
                };
                if !accepted {
                    continue;
                }

                for (col_b, &col_node) in col_nodes.iter().enumerate() {
                    for col_dof in 0..col_dofs {
                        state.col_local = col_b * col_dofs + col_dof;
                        state.col_node = col_node;
                        state.col_dof = col_dof;
                        state.col_equation = col_numbering.equation_number(col_node, col_dof);
                        if col_bcs.is_constrained(col_node, col_dof) {
                            callbacks.on_col_restricted(state);
                        } else {
                            callbacks.on_col_unrestricted(state);
                        }
                    }
                }
            }
        }
    }

    /// Visits only the diagonal `(node, dof) x (node, dof)` entries of every owned node.
    ///
    /// # Panics
    ///
    /// Panics unless rows and columns share the same field.
    pub fn loop_matrix_diagonal(&mut self) {
        assert!(
            self.shares_fields(),
            "Diagonal traversal requires identical row and column fields"
        );
        let field = self.row_field;
        let dofs = field.dofs_per_node();
        let bcs = field.boundary_conditions();
        let numbering = field.numbering();
        for node in 0..field.mesh().local_node_count() {
            for dof in 0..dofs {
                let equation = numbering.equation_number(node, dof);
                let state = &mut self.state;
                state.row_local = dof;
                state.row_node = node;
                state.row_dof = dof;
                state.row_equation = equation;
                state.col_local = dof;
                state.col_node = node;
                state.col_dof = dof;
                state.col_equation = equation;

                let constrained = bcs.is_constrained(node, dof);
                let accepted = if constrained {
                    self.callbacks.on_row_restricted(&self.state)
                } else {
                    self.callbacks.on_row_unrestricted(&self.state)
                };
                if !accepted {
                    continue;
                }
                if constrained {
                    self.callbacks.on_col_restricted(&self.state);
                } else {
                    self.callbacks.on_col_unrestricted(&self.state);
                }
            }
        }
    }

    /// Visits every `(node, dof)` row of the element without a column loop, for vector assembly.
    pub fn loop_vector_element(&mut self, element_index: usize) {
        self.populate(element_index);
        self.state.element = element_index;
        let dofs = self.row_field.dofs_per_node();
        let bcs = self.row_field.boundary_conditions();
        let numbering = self.row_field.numbering();
        for (a, &node) in self.row_buffer.element_nodes().iter().enumerate() {
            for dof in 0..dofs {
                let state = &mut self.state;
                state.row_local = a * dofs + dof;
                state.row_node = node;
                state.row_dof = dof;
                state.row_equation = numbering.equation_number(node, dof);
                if bcs.is_constrained(node, dof) {
                    self.callbacks.on_row_restricted(state);
                } else {
                    self.callbacks.on_row_unrestricted(state);
                }
            }
        }
    }
}
