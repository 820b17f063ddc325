use crate::assembly::local::{ElementMatrixTerm, TermBase, TermConfig, TermWorkspace};
use crate::error::Result;
use crate::field::FeField;
use crate::mesh::{MeshTopology, StructuredMesh};
use crate::nalgebra::DMatrixSliceMut;

/// The mass-like term $\int f \, N_A N_B \, \mathrm{d}x$ with a scalar function $f$.
///
/// For fields with several DOFs per node, the contribution couples equal components only:
/// entry $(A d + i, B d + i)$ receives $w |J| f N_A N_B$ for every component $i$.
#[derive(Debug)]
pub struct MassTerm<'a, M = StructuredMesh> {
    base: TermBase<'a, M>,
}

impl<'a, M: MeshTopology> MassTerm<'a, M> {
    /// Binds the term. Fails with a type mismatch unless the function is scalar-valued.
    pub fn configure(config: TermConfig<'a, M>) -> Result<Self> {
        let base = TermBase::from_config(config, |_| 1)?;
        Ok(Self { base })
    }

    pub fn base(&self) -> &TermBase<'a, M> {
        &self.base
    }
}

impl<'a, M: MeshTopology> ElementMatrixTerm<M> for MassTerm<'a, M> {
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
        let row_type = row_mesh.element_type(element_index);
        let col_type = self.base.col_field().mesh().element_type(element_index);
        let dofs = self.base.col_field().dofs_per_node();
        let shared_basis = row_type == col_type;

        let mut ws = self.base.workspace();
        let TermWorkspace { row, col } = &mut *ws;
        row.populate_element(row_mesh, element_index);
        if !shared_basis {
            col.prepare(col_type.node_count(), row_mesh.dim());
        }
        let row_count = row_type.node_count();
        let col_count = col_type.node_count();
        assert_eq!(output.nrows(), row_count * dofs, "Element matrix has wrong number of rows");
        assert_eq!(output.ncols(), col_count * dofs, "Element matrix has wrong number of columns");

        for point in self.base.integration_points().element_points(element_index) {
            let x = row.map_reference_coords(row_type, &point.xi);
            let det = row.jacobian_determinant(row_type, &point.xi);
            if !shared_basis {
                col.evaluate_basis(col_type, &point.xi);
            }
            self.base.function().evaluate(&x, row.function_values_mut());
            let factor = point.weight * det * row.function_values()[0];

            let M = row.basis_values();
            let N = if shared_basis { row.basis_values() } else { col.basis_values() };
            for (A, M_A) in M.iter().enumerate() {
                for (B, N_B) in N.iter().enumerate() {
                    let value = factor * M_A * N_B;
                    for i in 0..dofs {
                        output[(A * dofs + i, B * dofs + i)] += value;
                    }
                }
            }
        }
        Ok(())
    }
}
