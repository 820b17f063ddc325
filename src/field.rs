//! Finite element fields: DOF layout, boundary conditions and equation numbering.
use crate::comm::{exclusive_prefix_sum, global_sum, Communicator, OffsetStrategy};
use crate::error::{Error, Result};
use crate::mesh::{MeshTopology, StructuredMesh};
use nalgebra::Point3;
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::ops::Range;
use std::sync::Arc;

/// Prescribed values for constrained `(node, dof)` pairs, keyed by domain node index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundaryConditions {
    values: BTreeMap<(usize, usize), f64>,
}

impl BoundaryConditions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluates `condition` at every domain node (ghosts included) and every DOF.
    ///
    /// Since the condition only depends on coordinates, all ranks agree on the constraints of
    /// nodes they share.
    pub fn from_fn<M, F>(mesh: &M, dofs_per_node: usize, condition: F) -> Self
    where
        M: MeshTopology + ?Sized,
        F: Fn(&Point3<f64>, usize) -> Option<f64>,
    {
        let mut bcs = Self::new();
        for node in 0..mesh.domain_node_count() {
            let x = mesh.node_coordinate(node);
            for dof in 0..dofs_per_node {
                if let Some(value) = condition(&x, dof) {
                    bcs.insert(node, dof, value);
                }
            }
        }
        bcs
    }

    pub fn insert(&mut self, node: usize, dof: usize, value: f64) {
        self.values.insert((node, dof), value);
    }

    pub fn is_constrained(&self, node: usize, dof: usize) -> bool {
        self.values.contains_key(&(node, dof))
    }

    pub fn value(&self, node: usize, dof: usize) -> Option<f64> {
        self.values.get(&(node, dof)).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = ((usize, usize), f64)> + '_ {
        self.values.iter().map(|(key, value)| (*key, *value))
    }
}

/// Maps `(node, dof)` pairs to global equation numbers.
///
/// Excluded DOFs (usually those under a boundary condition) map to `None`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EquationNumbering {
    dofs_per_node: usize,
    numbers: Vec<Option<usize>>,
    local_count: usize,
    first_owned: usize,
    global_count: usize,
}

impl EquationNumbering {
    /// Numbers the unconstrained DOFs of owned nodes contiguously per rank.
    ///
    /// Owned nodes are visited in index order; the base offset of each rank is the number of
    /// equations on all lower ranks. Ghost nodes must be, in order, the first owned nodes of the
    /// successor rank, as is the case for [`StructuredMesh`].
    pub fn build<M>(
        mesh: &M,
        dofs_per_node: usize,
        bcs: &BoundaryConditions,
        comm: &dyn Communicator,
        strategy: OffsetStrategy,
    ) -> Result<Self>
    where
        M: MeshTopology + ?Sized,
    {
        Self::build_excluding(mesh, dofs_per_node, |node, dof| bcs.is_constrained(node, dof), comm, strategy)
    }

    /// Like [`build`](Self::build), but with an arbitrary rule for excluded DOFs.
    ///
    /// The rule must agree across ranks for shared nodes.
    pub fn build_excluding<M, F>(
        mesh: &M,
        dofs_per_node: usize,
        is_excluded: F,
        comm: &dyn Communicator,
        strategy: OffsetStrategy,
    ) -> Result<Self>
    where
        M: MeshTopology + ?Sized,
        F: Fn(usize, usize) -> bool,
    {
        if dofs_per_node == 0 {
            return Err(Error::configuration("a field needs at least one DOF per node"));
        }
        let mut numbers = vec![None; mesh.domain_node_count() * dofs_per_node];
        let mut local_count = 0;
        for node in 0..mesh.local_node_count() {
            for dof in 0..dofs_per_node {
                if !is_excluded(node, dof) {
                    numbers[node * dofs_per_node + dof] = Some(local_count);
                    local_count += 1;
                }
            }
        }

        let first_owned = exclusive_prefix_sum(comm, local_count, strategy)?;
        for number in numbers.iter_mut().flatten() {
            *number += first_owned;
        }

        let mut next = first_owned + local_count;
        for node in mesh.local_node_count()..mesh.domain_node_count() {
            for dof in 0..dofs_per_node {
                if !is_excluded(node, dof) {
                    numbers[node * dofs_per_node + dof] = Some(next);
                    next += 1;
                }
            }
        }

        let global_count = global_sum(comm, local_count)?;
        Ok(Self {
            dofs_per_node,
            numbers,
            local_count,
            first_owned,
            global_count,
        })
    }

    /// Creates a numbering from explicit per-(node, dof) equation numbers.
    pub fn from_numbers(
        dofs_per_node: usize,
        numbers: Vec<Option<usize>>,
        local_count: usize,
        first_owned: usize,
        global_count: usize,
    ) -> Self {
        assert_eq!(numbers.len() % dofs_per_node, 0);
        Self {
            dofs_per_node,
            numbers,
            local_count,
            first_owned,
            global_count,
        }
    }

    pub fn dof_count(&self, _node: usize) -> usize {
        self.dofs_per_node
    }

    pub fn equation_number(&self, node: usize, dof: usize) -> Option<usize> {
        self.numbers[node * self.dofs_per_node + dof]
    }

    pub fn local_owned_equation_count(&self) -> usize {
        self.local_count
    }

    pub fn first_owned_equation_number(&self) -> usize {
        self.first_owned
    }

    pub fn global_equation_count(&self) -> usize {
        self.global_count
    }

    pub fn owned_range(&self) -> Range<usize> {
        self.first_owned..self.first_owned + self.local_count
    }

    pub fn node_count(&self) -> usize {
        self.numbers.len() / self.dofs_per_node
    }
}

/// A field discretized on a mesh, with one or more DOFs per node.
#[derive(Debug, Clone)]
pub struct FeField<M = StructuredMesh> {
    name: String,
    mesh: Arc<M>,
    dofs_per_node: usize,
    bcs: BoundaryConditions,
    numbering: EquationNumbering,
}

impl<M: MeshTopology> FeField<M> {
    pub fn new(
        name: impl Into<String>,
        mesh: Arc<M>,
        dofs_per_node: usize,
        bcs: BoundaryConditions,
        comm: &dyn Communicator,
        strategy: OffsetStrategy,
    ) -> Result<Self> {
        let numbering = EquationNumbering::build(mesh.as_ref(), dofs_per_node, &bcs, comm, strategy)?;
        Self::from_parts(name, mesh, bcs, numbering)
    }

    /// Creates a field whose constrained DOFs keep their equations, for systems that enforce
    /// boundary conditions through unit diagonal rows instead of eliminating them.
    pub fn with_constrained_equations(
        name: impl Into<String>,
        mesh: Arc<M>,
        dofs_per_node: usize,
        bcs: BoundaryConditions,
        comm: &dyn Communicator,
        strategy: OffsetStrategy,
    ) -> Result<Self> {
        let numbering = EquationNumbering::build_excluding(mesh.as_ref(), dofs_per_node, |_, _| false, comm, strategy)?;
        Self::from_parts(name, mesh, bcs, numbering)
    }

    pub fn from_parts(
        name: impl Into<String>,
        mesh: Arc<M>,
        bcs: BoundaryConditions,
        numbering: EquationNumbering,
    ) -> Result<Self> {
        let name = name.into();
        if numbering.node_count() != mesh.domain_node_count() {
            return Err(Error::configuration(format!(
                "field '{name}': numbering covers {} nodes but the mesh has {}",
                numbering.node_count(),
                mesh.domain_node_count()
            )));
        }
        Ok(Self {
            name,
            dofs_per_node: numbering.dofs_per_node,
            mesh,
            bcs,
            numbering,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mesh(&self) -> &M {
        &self.mesh
    }

    pub fn shared_mesh(&self) -> Arc<M> {
        Arc::clone(&self.mesh)
    }

    pub fn dim(&self) -> usize {
        self.mesh.dim()
    }

    pub fn dofs_per_node(&self) -> usize {
        self.dofs_per_node
    }

    pub fn boundary_conditions(&self) -> &BoundaryConditions {
        &self.bcs
    }

    pub fn numbering(&self) -> &EquationNumbering {
        &self.numbering
    }

    /// A hash of the mesh topology and equation numbering.
    ///
    /// Objects derived from the field compare fingerprints to detect that they are out of date.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.mesh.topology_key().hash(&mut hasher);
        self.numbering.hash(&mut hasher);
        hasher.finish()
    }
}
