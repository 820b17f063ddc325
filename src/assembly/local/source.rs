use crate::assembly::local::{ElementVectorTerm, TermBase, TermConfig, TermWorkspace};
use crate::error::{Error, Result};
use crate::field::FeField;
use crate::function::{symmetric_tensor_component_count, symmetric_tensor_index};
use crate::mesh::{MeshTopology, StructuredMesh};
use crate::nalgebra::DVectorSliceMut;

/// The load term $\int f_i N_A \, \mathrm{d}x$, where $f$ has one component per field DOF.
#[derive(Debug)]
pub struct SourceTerm<'a, M = StructuredMesh> {
    base: TermBase<'a, M>,
}

impl<'a, M: MeshTopology> SourceTerm<'a, M> {
    pub fn configure(config: TermConfig<'a, M>) -> Result<Self> {
        let base = TermBase::from_config(config, |field| field.dofs_per_node())?;
        Ok(Self { base })
    }
}

impl<'a, M: MeshTopology> ElementVectorTerm<M> for SourceTerm<'a, M> {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn field(&self) -> &FeField<M> {
        self.base.row_field()
    }

    #[allow(non_snake_case)]
    fn assemble_element_vector_into(&self, element_index: usize, mut output: DVectorSliceMut<f64>) -> eyre::Result<()> {
        let mesh = self.base.row_field().mesh();
        let element_type = mesh.element_type(element_index);
        let dofs = self.base.row_field().dofs_per_node();
        let mut ws = self.base.workspace();
        let TermWorkspace { row: buffer, .. } = &mut *ws;
        buffer.populate_element(mesh, element_index);
        assert_eq!(output.len(), element_type.node_count() * dofs);

        for point in self.base.integration_points().element_points(element_index) {
            let x = buffer.map_reference_coords(element_type, &point.xi);
            let det = buffer.jacobian_determinant(element_type, &point.xi);
            self.base.function().evaluate(&x, buffer.function_values_mut());
            let factor = point.weight * det;
            let f = buffer.function_values();
            for (A, N_A) in buffer.basis_values().iter().enumerate() {
                for i in 0..dofs {
                    output[A * dofs + i] += factor * f[i] * N_A;
                }
            }
        }
        Ok(())
    }
}

/// The gradient load term $\int \nabla N_A \cdot f \, \mathrm{d}x$ with a vector function $f$
/// of spatial dimension. Every component of node $A$ receives the same contribution.
#[derive(Debug)]
pub struct GradientTerm<'a, M = StructuredMesh> {
    base: TermBase<'a, M>,
}

impl<'a, M: MeshTopology> GradientTerm<'a, M> {
    pub fn configure(config: TermConfig<'a, M>) -> Result<Self> {
        let base = TermBase::from_config(config, |field| field.dim())?;
        Ok(Self { base })
    }
}

impl<'a, M: MeshTopology> ElementVectorTerm<M> for GradientTerm<'a, M> {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn field(&self) -> &FeField<M> {
        self.base.row_field()
    }

    #[allow(non_snake_case)]
    fn assemble_element_vector_into(&self, element_index: usize, mut output: DVectorSliceMut<f64>) -> eyre::Result<()> {
        let mesh = self.base.row_field().mesh();
        let element_type = mesh.element_type(element_index);
        let dofs = self.base.row_field().dofs_per_node();
        let dim = mesh.dim();
        let mut ws = self.base.workspace();
        let TermWorkspace { row: buffer, .. } = &mut *ws;
        buffer.populate_element(mesh, element_index);
        assert_eq!(output.len(), element_type.node_count() * dofs);

        for point in self.base.integration_points().element_points(element_index) {
            let x = buffer.map_reference_coords(element_type, &point.xi);
            let det = buffer.evaluate_global_derivatives(element_type, &point.xi)?;
            self.base.function().evaluate(&x, buffer.function_values_mut());
            let factor = point.weight * det;
            let f = buffer.function_values();
            let G = buffer.global_derivatives();
            for A in 0..G.ncols() {
                let divergence: f64 = (0..dim).map(|k| G[(k, A)] * f[k]).sum();
                for i in 0..dofs {
                    output[A * dofs + i] += factor * divergence;
                }
            }
        }
        Ok(())
    }
}

/// The tensor divergence load $-\int \frac{\partial N_A}{\partial x_j} \sigma_{ij} \, \mathrm{d}x$
/// for a symmetric tensor function $\sigma$ (e.g. a deviatoric stress history).
///
/// The function returns the packed symmetric components, diagonal first: $[xx, yy, xy]$ in two
/// dimensions and $[xx, yy, zz, xy, xz, yz]$ in three.
#[derive(Debug)]
pub struct TensorDivergenceTerm<'a, M = StructuredMesh> {
    base: TermBase<'a, M>,
}

impl<'a, M: MeshTopology> TensorDivergenceTerm<'a, M> {
    /// Binds the term. The field must carry one DOF per spatial dimension.
    pub fn configure(config: TermConfig<'a, M>) -> Result<Self> {
        let base = TermBase::from_config(config, |field| symmetric_tensor_component_count(field.dim()))?;
        let field = base.row_field();
        if field.dofs_per_node() != field.dim() {
            return Err(Error::configuration(format!(
                "term '{}' needs a vector field with {} components, but '{}' has {}",
                base.name(),
                field.dim(),
                field.name(),
                field.dofs_per_node()
            )));
        }
        Ok(Self { base })
    }
}

impl<'a, M: MeshTopology> ElementVectorTerm<M> for TensorDivergenceTerm<'a, M> {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn field(&self) -> &FeField<M> {
        self.base.row_field()
    }

    #[allow(non_snake_case)]
    fn assemble_element_vector_into(&self, element_index: usize, mut output: DVectorSliceMut<f64>) -> eyre::Result<()> {
        let mesh = self.base.row_field().mesh();
        let element_type = mesh.element_type(element_index);
        let dim = mesh.dim();
        let mut ws = self.base.workspace();
        let TermWorkspace { row: buffer, .. } = &mut *ws;
        buffer.populate_element(mesh, element_index);
        assert_eq!(output.len(), element_type.node_count() * dim);

        for point in self.base.integration_points().element_points(element_index) {
            let x = buffer.map_reference_coords(element_type, &point.xi);
            let det = buffer.evaluate_global_derivatives(element_type, &point.xi)?;
            self.base.function().evaluate(&x, buffer.function_values_mut());
            let factor = point.weight * det;
            let sigma = buffer.function_values();
            let G = buffer.global_derivatives();
            for A in 0..G.ncols() {
                for i in 0..dim {
                    let traction: f64 = (0..dim)
                        .map(|j| G[(j, A)] * sigma[symmetric_tensor_index(dim, i, j)])
                        .sum();
                    output[A * dim + i] -= factor * traction;
                }
            }
        }
        Ok(())
    }
}
