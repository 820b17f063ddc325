use crate::assembly::local::{ElementVectorTerm, TermBase, TermConfig, TermWorkspace};
use crate::error::{Error, Result};
use crate::field::FeField;
use crate::function::{symmetric_tensor_component_count, symmetric_tensor_index};
use crate::mesh::{MeshTopology, StructuredMesh};
use crate::nalgebra::{DVectorSliceMut, Point3};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// How the function of a [`SurfaceTerm`] describes the boundary flux.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SurfaceFlux {
    /// The function returns the flux directly, one component per field DOF.
    #[default]
    Vector,
    /// The function returns a packed symmetric tensor $\sigma$ and the flux is $\sigma n$.
    SymmetricTensor,
}

/// Collects the domain nodes satisfying `predicate`, e.g. the nodes of one side of a box.
pub fn mark_nodes<M, F>(mesh: &M, predicate: F) -> BTreeSet<usize>
where
    M: MeshTopology + ?Sized,
    F: Fn(&Point3<f64>) -> bool,
{
    (0..mesh.domain_node_count())
        .filter(|&node| predicate(&mesh.node_coordinate(node)))
        .collect()
}

/// The Neumann term $\int_{\Gamma} N_A t_i \, \mathrm{d}s$ on the boundary $\Gamma$ described by a
/// set of marked nodes.
///
/// The integration points are expected to lie on the faces of the reference element (see
/// [`UniformIntegrationPoints::gauss_border`](crate::quadrature::UniformIntegrationPoints::gauss_border)).
/// A point contributes only if every node of its face is marked, and only marked nodes receive
/// contributions. Elements without any marked node are skipped outright.
#[derive(Debug)]
pub struct SurfaceTerm<'a, M = StructuredMesh> {
    base: TermBase<'a, M>,
    marked_nodes: BTreeSet<usize>,
    flux: SurfaceFlux,
}

impl<'a, M: MeshTopology> SurfaceTerm<'a, M> {
    pub fn configure(config: TermConfig<'a, M>, marked_nodes: BTreeSet<usize>, flux: SurfaceFlux) -> Result<Self> {
        let base = TermBase::from_config(config, |field| match flux {
            SurfaceFlux::Vector => field.dofs_per_node(),
            SurfaceFlux::SymmetricTensor => symmetric_tensor_component_count(field.dim()),
        })?;
        let field = base.row_field();
        if flux == SurfaceFlux::SymmetricTensor && field.dofs_per_node() != field.dim() {
            return Err(Error::configuration(format!(
                "term '{}': a tensor flux needs a vector field with {} components, but '{}' has {}",
                base.name(),
                field.dim(),
                field.name(),
                field.dofs_per_node()
            )));
        }
        Ok(Self {
            base,
            marked_nodes,
            flux,
        })
    }

    pub fn marked_nodes(&self) -> &BTreeSet<usize> {
        &self.marked_nodes
    }
}

impl<'a, M: MeshTopology> ElementVectorTerm<M> for SurfaceTerm<'a, M> {
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

        let is_marked = |a: usize, nodes: &[usize]| self.marked_nodes.contains(&nodes[a]);
        if !(0..buffer.node_count()).any(|a| is_marked(a, buffer.element_nodes())) {
            return Ok(());
        }

        for point in self.base.integration_points().element_points(element_index) {
            let Some(face) = element_type.face_of(&point.xi) else {
                continue;
            };
            if !element_type
                .face_nodes(&face)
                .all(|a| is_marked(a, buffer.element_nodes()))
            {
                continue;
            }

            let (coords, local_derivatives) = buffer.coords_and_local_derivatives_mut();
            let surface_det =
                element_type.surface_jacobian_determinant(coords, &point.xi, &face, local_derivatives);
            let normal = match self.flux {
                SurfaceFlux::Vector => None,
                SurfaceFlux::SymmetricTensor => {
                    let (coords, local_derivatives) = buffer.coords_and_local_derivatives_mut();
                    Some(
                        element_type
                            .surface_normal(coords, &point.xi, local_derivatives)
                            .ok_or_else(|| eyre::eyre!("Failed to compute surface normal on element {element_index}"))?,
                    )
                }
            };
            let x = buffer.map_reference_coords(element_type, &point.xi);
            self.base.function().evaluate(&x, buffer.function_values_mut());
            let f = buffer.function_values();
            let factor = point.weight * surface_det;
            let nodes = buffer.element_nodes();
            for (A, N_A) in buffer.basis_values().iter().enumerate() {
                if !is_marked(A, nodes) {
                    continue;
                }
                for i in 0..dofs {
                    let t_i = match &normal {
                        None => f[i],
                        Some(n) => (0..dim)
                            .map(|j| f[symmetric_tensor_index(dim, i, j)] * n[j])
                            .sum(),
                    };
                    output[A * dofs + i] += factor * t_i * N_A;
                }
            }
        }
        Ok(())
    }
}
