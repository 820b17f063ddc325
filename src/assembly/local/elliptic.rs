use crate::assembly::local::{ElementMatrixTerm, TermBase, TermConfig, TermWorkspace};
use crate::error::Result;
use crate::field::FeField;
use crate::mesh::{MeshTopology, StructuredMesh};
use crate::nalgebra::DMatrixSliceMut;

/// The Laplacian-like term $\int f \, \nabla N_A \cdot \nabla N_B \, \mathrm{d}x$ with a scalar
/// function $f$ (e.g. a diffusivity).
#[derive(Debug)]
pub struct LaplacianTerm<'a, M = StructuredMesh> {
    base: TermBase<'a, M>,
}

impl<'a, M: MeshTopology> LaplacianTerm<'a, M> {
    /// Binds the term. Fails with a type mismatch unless the function is scalar-valued.
    pub fn configure(config: TermConfig<'a, M>) -> Result<Self> {
        let base = TermBase::from_config(config, |_| 1)?;
        Ok(Self { base })
    }
}

impl<'a, M: MeshTopology> ElementMatrixTerm<M> for LaplacianTerm<'a, M> {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn row_field(&self) -> &FeField<M> {
        self.base.row_field()
    }

    fn col_field(&self) -> &FeField<M> {
        self.base.col_field()
    }

    #[allow(non_snake_case)]
    fn assemble_element_matrix_into(&self, element_index: usize, mut output: DMatrixSliceMut<f64>) -> eyre::Result<()> {
        let row_mesh = self.base.row_field().mesh();
        let col_mesh = self.base.col_field().mesh();
        let row_type = row_mesh.element_type(element_index);
        let col_type = col_mesh.element_type(element_index);
        let dofs = self.base.col_field().dofs_per_node();
        let dim = row_mesh.dim();
        let shared_basis = row_type == col_type;

        let mut ws = self.base.workspace();
        let TermWorkspace { row, col } = &mut *ws;
        row.populate_element(row_mesh, element_index);
        if !shared_basis {
            col.populate_element(col_mesh, element_index);
        }
        assert_eq!(output.nrows(), row_type.node_count() * dofs);
        assert_eq!(output.ncols(), col_type.node_count() * dofs);

        for point in self.base.integration_points().element_points(element_index) {
            let x = row.map_reference_coords(row_type, &point.xi);
            let det = row.evaluate_global_derivatives(row_type, &point.xi)?;
            if !shared_basis {
                col.evaluate_global_derivatives(col_type, &point.xi)?;
            }
            self.base.function().evaluate(&x, row.function_values_mut());
            let factor = point.weight * det * row.function_values()[0];

            let G_row = row.global_derivatives();
            let G_col = if shared_basis { row.global_derivatives() } else { col.global_derivatives() };
            for A in 0..G_row.ncols() {
                for B in 0..G_col.ncols() {
                    let contraction: f64 = (0..dim).map(|k| G_row[(k, A)] * G_col[(k, B)]).sum();
                    let value = factor * contraction;
                    for i in 0..dofs {
                        output[(A * dofs + i, B * dofs + i)] += value;
                    }
                }
            }
        }
        Ok(())
    }
}
