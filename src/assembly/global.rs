//! Scattering element contributions into distributed matrices and vectors.
//!
//! [`SystemAssembler`] drives the [`Assembler`] traversal over all local elements and handles
//! boundary conditions through its callbacks, according to a [`BoundaryConditionMode`].
use crate::assembly::assembler::{Assembler, AssemblyCallbacks, AssemblyState};
use crate::assembly::local::{ElementMatrixTerm, ElementVectorTerm};
use crate::error::{Error, Result};
use crate::field::{BoundaryConditions, FeField};
use crate::linalg::{has_constant_null_space, DistributedSparseMatrix, DistributedVector};
use crate::mesh::MeshTopology;
use eyre::{eyre, WrapErr};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::ops::Range;

/// How DOFs under boundary conditions enter the assembled system.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoundaryConditionMode {
    /// Constrained rows are dropped and constrained columns are moved to the right-hand side.
    #[default]
    Eliminate,
    /// Constrained rows and columns are zeroed and the diagonal of every constrained DOF is set
    /// to one, with the prescribed value as right-hand side. Requires a field created by
    /// [`FeField::with_constrained_equations`].
    KeepWithUnitDiagonal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemAssemblyConfig {
    pub bc_mode: BoundaryConditionMode,
    /// Lift boundary values with the transposed element matrix, for off-diagonal blocks that are
    /// assembled as the transpose of their counterpart.
    pub transpose_lifting: bool,
    /// Run [`has_constant_null_space`] on the locally owned rows after matrix assembly.
    pub check_null_space: bool,
}

impl SystemAssemblyConfig {
    pub fn with_bc_mode(mut self, mode: BoundaryConditionMode) -> Self {
        self.bc_mode = mode;
        self
    }

    pub fn with_transpose_lifting(mut self, transpose: bool) -> Self {
        self.transpose_lifting = transpose;
        self
    }

    pub fn with_null_space_check(mut self, check: bool) -> Self {
        self.check_null_space = check;
        self
    }
}

/// Statistics gathered while assembling a matrix.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatrixAssemblySummary {
    pub elements: usize,
    /// Insertions that exceeded the preallocated storage of the matrix.
    pub additional_allocations: usize,
    /// The result of the null space check, if it was requested.
    pub has_constant_null_space: Option<bool>,
}

/// Assembles terms into distributed matrices and vectors.
#[derive(Debug, Clone, Default)]
pub struct SystemAssembler {
    config: SystemAssemblyConfig,
}

impl SystemAssembler {
    pub fn new(config: SystemAssemblyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SystemAssemblyConfig {
        &self.config
    }

    /// Counts, for every owned row equation of `row_field`, the unique column equations of
    /// `col_field` it couples to, split into the diagonal block (columns owned by this rank) and
    /// the off-diagonal block.
    ///
    /// Only local elements are visited, so couplings contributed solely by elements of other ranks
    /// are not counted.
    pub fn count_nonzeros<M: MeshTopology>(
        &self,
        row_field: &FeField<M>,
        col_field: &FeField<M>,
    ) -> (Vec<usize>, Vec<usize>) {
        let row_range = row_field.numbering().owned_range();
        let counter = NonzeroCounter {
            columns: vec![BTreeSet::new(); row_range.len()],
            row_range: row_range.clone(),
            current_row: None,
        };
        let mut assembler = Assembler::new(row_field).with_callbacks(counter);
        assembler.set_fields(row_field, Some(col_field));
        for element_index in 0..row_field.mesh().element_count() {
            assembler.loop_matrix_element(element_index);
        }
        let mut columns = assembler.into_callbacks().columns;

        if self.config.bc_mode == BoundaryConditionMode::KeepWithUnitDiagonal && std::ptr::eq(row_field, col_field) {
            for ((node, dof), _) in row_field.boundary_conditions().iter() {
                if node >= row_field.mesh().local_node_count() {
                    continue;
                }
                if let Some(equation) = row_field.numbering().equation_number(node, dof) {
                    columns[equation - row_range.start].insert(equation);
                }
            }
        }

        let col_range = col_field.numbering().owned_range();
        columns
            .iter()
            .map(|row| {
                let diagonal = row.iter().filter(|col| col_range.contains(col)).count();
                (diagonal, row.len() - diagonal)
            })
            .unzip()
    }

    /// Creates a matrix sized for `row_field x col_field` and preallocated with
    /// [`count_nonzeros`](Self::count_nonzeros).
    pub fn create_matrix<M: MeshTopology>(
        &self,
        row_field: &FeField<M>,
        col_field: &FeField<M>,
    ) -> Result<DistributedSparseMatrix> {
        let (d_nnz, o_nnz) = self.count_nonzeros(row_field, col_field);
        let mut matrix = DistributedSparseMatrix::new(
            row_field.numbering().global_equation_count(),
            col_field.numbering().global_equation_count(),
            row_field.numbering().owned_range(),
            col_field.numbering().owned_range(),
        );
        matrix.preallocate(&d_nnz, &o_nnz)?;
        Ok(matrix)
    }

    pub fn create_vector<M: MeshTopology>(&self, field: &FeField<M>) -> DistributedVector {
        DistributedVector::new(field.numbering().global_equation_count(), field.numbering().owned_range())
    }

    /// Adds the contributions of `term` over all local elements to `matrix`, lifting prescribed
    /// boundary values into `rhs` if given.
    pub fn assemble_matrix<M, T>(
        &self,
        term: &T,
        matrix: &mut DistributedSparseMatrix,
        rhs: Option<&mut DistributedVector>,
    ) -> eyre::Result<MatrixAssemblySummary>
    where
        M: MeshTopology,
        T: ElementMatrixTerm<M> + ?Sized,
    {
        let row_field = term.row_field();
        let col_field = term.col_field();
        let keep = self.config.bc_mode == BoundaryConditionMode::KeepWithUnitDiagonal;
        if keep {
            check_constrained_equations(row_field)?;
        }
        let element_count = row_field.mesh().element_count();

        let scatter = MatrixScatter {
            element_matrix: DMatrix::zeros(0, 0),
            matrix,
            rhs,
            col_bcs: col_field.boundary_conditions(),
            transpose_lifting: self.config.transpose_lifting,
        };
        let mut assembler = Assembler::new(row_field).with_callbacks(scatter);
        assembler.set_fields(row_field, Some(col_field));

        for element_index in 0..element_count {
            let (rows, cols) = term.element_matrix_shape(element_index);
            if self.config.transpose_lifting && rows != cols {
                return Err(eyre!(
                    "Transposed lifting requires square element matrices, but term '{}' produced {}x{} on element {}",
                    term.name(),
                    rows,
                    cols,
                    element_index
                ));
            }
            let element_matrix = &mut assembler.callbacks_mut().element_matrix;
            if element_matrix.shape() != (rows, cols) {
                *element_matrix = DMatrix::zeros(rows, cols);
            } else {
                element_matrix.fill(0.0);
            }
            term.assemble_element_matrix_into(element_index, element_matrix.columns_mut(0, cols))
                .wrap_err_with(|| format!("Failed to assemble term '{}' on element {element_index}", term.name()))?;
            assembler.loop_matrix_element(element_index);
        }

        let MatrixScatter { matrix, rhs, .. } = assembler.into_callbacks();
        if keep && std::ptr::eq(row_field, col_field) {
            let unit_diagonal = UnitDiagonal {
                matrix: &mut *matrix,
                rhs,
                bcs: row_field.boundary_conditions(),
            };
            let mut diagonal = Assembler::new(row_field).with_callbacks(unit_diagonal);
            diagonal.loop_matrix_diagonal();
        }

        matrix.finalize();
        let mut summary = MatrixAssemblySummary {
            elements: element_count,
            additional_allocations: matrix.additional_allocations(),
            has_constant_null_space: None,
        };
        if self.config.check_null_space {
            summary.has_constant_null_space = Some(has_constant_null_space(&matrix.to_local_csr()));
        }
        log::debug!(
            "Assembled term '{}' over {} elements ({} entries, {} additional allocations)",
            term.name(),
            element_count,
            matrix.nnz(),
            summary.additional_allocations
        );
        Ok(summary)
    }

    /// Adds the contributions of `term` over all local elements to `vector`. Rows under boundary
    /// conditions are skipped.
    pub fn assemble_vector<M, T>(&self, term: &T, vector: &mut DistributedVector) -> eyre::Result<()>
    where
        M: MeshTopology,
        T: ElementVectorTerm<M> + ?Sized,
    {
        let field = term.field();
        let mut assembler = Assembler::new(field).with_callbacks(VectorScatter {
            element_vector: DVector::zeros(0),
            vector,
        });

        for element_index in 0..field.mesh().element_count() {
            let len = term.element_vector_len(element_index);
            let element_vector = &mut assembler.callbacks_mut().element_vector;
            if element_vector.len() != len {
                *element_vector = DVector::zeros(len);
            } else {
                element_vector.fill(0.0);
            }
            term.assemble_element_vector_into(element_index, element_vector.rows_mut(0, len))
                .wrap_err_with(|| format!("Failed to assemble term '{}' on element {element_index}", term.name()))?;
            assembler.loop_vector_element(element_index);
        }
        log::debug!(
            "Assembled vector term '{}' over {} elements",
            term.name(),
            field.mesh().element_count()
        );
        Ok(())
    }
}

fn check_constrained_equations<M: MeshTopology>(field: &FeField<M>) -> Result<()> {
    let missing = field
        .boundary_conditions()
        .iter()
        .find(|((node, dof), _)| field.numbering().equation_number(*node, *dof).is_none());
    match missing {
        Some(((node, dof), _)) => Err(Error::configuration(format!(
            "field '{}' has no equation for constrained DOF {dof} of node {node}, \
             which keeping boundary conditions requires",
            field.name()
        ))),
        None => Ok(()),
    }
}

struct NonzeroCounter {
    columns: Vec<BTreeSet<usize>>,
    row_range: Range<usize>,
    current_row: Option<usize>,
}

impl AssemblyCallbacks for NonzeroCounter {
    fn on_row_unrestricted(&mut self, state: &AssemblyState) -> bool {
        self.current_row = state
            .row_equation
            .filter(|equation| self.row_range.contains(equation))
            .map(|equation| equation - self.row_range.start);
        self.current_row.is_some()
    }

    fn on_col_unrestricted(&mut self, state: &AssemblyState) {
        if let (Some(row), Some(col)) = (self.current_row, state.col_equation) {
            self.columns[row].insert(col);
        }
    }
}

struct MatrixScatter<'m, 'f> {
    element_matrix: DMatrix<f64>,
    matrix: &'m mut DistributedSparseMatrix,
    rhs: Option<&'m mut DistributedVector>,
    col_bcs: &'f BoundaryConditions,
    transpose_lifting: bool,
}

impl<'m, 'f> AssemblyCallbacks for MatrixScatter<'m, 'f> {
    fn on_row_unrestricted(&mut self, state: &AssemblyState) -> bool {
        state.row_equation.is_some()
    }

    fn on_col_unrestricted(&mut self, state: &AssemblyState) {
        if let (Some(row), Some(col)) = (state.row_equation, state.col_equation) {
            let value = self.element_matrix[(state.row_local, state.col_local)];
            if value != 0.0 {
                self.matrix.add_value(row, col, value);
            }
        }
    }

    fn on_col_restricted(&mut self, state: &AssemblyState) {
        let (Some(rhs), Some(row)) = (self.rhs.as_deref_mut(), state.row_equation) else {
            return;
        };
        let value = self
            .col_bcs
            .value(state.col_node, state.col_dof)
            .expect("Restricted columns carry a boundary value");
        let coefficient = if self.transpose_lifting {
            self.element_matrix[(state.col_local, state.row_local)]
        } else {
            self.element_matrix[(state.row_local, state.col_local)]
        };
        if coefficient != 0.0 && value != 0.0 {
            rhs.add_value(row, -value * coefficient);
        }
    }
}

struct UnitDiagonal<'m, 'f> {
    matrix: &'m mut DistributedSparseMatrix,
    rhs: Option<&'m mut DistributedVector>,
    bcs: &'f BoundaryConditions,
}

impl<'m, 'f> AssemblyCallbacks for UnitDiagonal<'m, 'f> {
    fn on_row_restricted(&mut self, _state: &AssemblyState) -> bool {
        true
    }

    fn on_row_unrestricted(&mut self, _state: &AssemblyState) -> bool {
        false
    }

    fn on_col_restricted(&mut self, state: &AssemblyState) {
        let Some(equation) = state.row_equation else {
            return;
        };
        self.matrix.insert_value(equation, equation, 1.0);
        if let Some(rhs) = self.rhs.as_deref_mut() {
            let value = self
                .bcs
                .value(state.row_node, state.row_dof)
                .expect("Restricted rows carry a boundary value");
            rhs.insert_value(equation, value);
        }
    }
}

struct VectorScatter<'v> {
    element_vector: DVector<f64>,
    vector: &'v mut DistributedVector,
}

impl<'v> AssemblyCallbacks for VectorScatter<'v> {
    fn on_row_unrestricted(&mut self, state: &AssemblyState) -> bool {
        if let Some(row) = state.row_equation {
            self.vector.add_value(row, self.element_vector[state.row_local]);
        }
        true
    }
}
