//! Geometric multigrid: coarse level construction and inter-level transfer operators.
//!
//! Given a field on a [`StructuredMesh`], [`MgOpGenerator`] derives a tower of coarser meshes by
//! halving the element count along every axis, numbers the equations of every coarse level and
//! assembles the prolongation operator between each pair of adjacent levels. Level `0` is the
//! coarsest; level `num_levels - 1` is the mesh of the fine field.
use crate::comm::{Communicator, OffsetStrategy};
use crate::error::{Error, Result};
use crate::field::{EquationNumbering, FeField};
use crate::grid::Grid;
use crate::linalg::DistributedSparseMatrix;
use crate::mesh::{MeshTopology, StructuredMesh};
use nalgebra::{Point3, Vector3};
use num::Integer;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Weights below this magnitude are dropped by [`GeneratorKind::ShapeFunction`].
pub const WEIGHT_DROP_TOLERANCE: f64 = 1e-12;

/// How prolongation weights are computed.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeneratorKind {
    /// Uniform weights over the coarse vertices surrounding a fine vertex: a fine vertex index
    /// that is odd along an axis interpolates from two coarse neighbours along that axis, an even
    /// one coincides with a single coarse vertex. The weight is one over the number of corners.
    #[default]
    Simple,
    /// The coarse element's basis functions evaluated at each fine vertex.
    ShapeFunction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MgGeneratorConfig {
    pub num_levels: usize,
    pub kind: GeneratorKind,
    pub offset_strategy: OffsetStrategy,
    /// Relative tolerance for matching coarse vertices with fine vertices.
    pub topology_tolerance: f64,
}

impl Default for MgGeneratorConfig {
    fn default() -> Self {
        Self {
            num_levels: 2,
            kind: GeneratorKind::default(),
            offset_strategy: OffsetStrategy::default(),
            topology_tolerance: 1e-8,
        }
    }
}

impl MgGeneratorConfig {
    pub fn with_num_levels(mut self, num_levels: usize) -> Self {
        self.num_levels = num_levels;
        self
    }

    pub fn with_kind(mut self, kind: GeneratorKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_offset_strategy(mut self, strategy: OffsetStrategy) -> Self {
        self.offset_strategy = strategy;
        self
    }

    pub fn with_topology_tolerance(mut self, tolerance: f64) -> Self {
        self.topology_tolerance = tolerance;
        self
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum GeneratorState {
    /// No fine field has been set.
    Uninitialized,
    /// A fine field is set, but no operators have been generated.
    Configured,
    /// The operators match the current fine field.
    Built,
    /// The operators were generated for a fine field with a different topology or numbering.
    Expired,
}

/// One level of the hierarchy.
#[derive(Debug, Clone)]
pub struct MgLevel {
    mesh: Arc<StructuredMesh>,
    numbering: EquationNumbering,
    topology_map: Vec<usize>,
}

impl MgLevel {
    pub fn mesh(&self) -> &StructuredMesh {
        &self.mesh
    }

    /// Number of vertices along each axis of the global level grid.
    pub fn side_lengths(&self) -> &[usize] {
        self.mesh.vertex_grid().sizes()
    }

    pub fn numbering(&self) -> &EquationNumbering {
        &self.numbering
    }

    pub fn local_equation_count(&self) -> usize {
        self.numbering.local_owned_equation_count()
    }

    pub fn first_equation_number(&self) -> usize {
        self.numbering.first_owned_equation_number()
    }

    /// For every domain node of this level, the coinciding domain node of the finest level.
    pub fn topology_map(&self) -> &[usize] {
        &self.topology_map
    }
}

/// Transfer operators between level `fine_level` and level `fine_level - 1`.
///
/// The prolongation has one row per owned equation of the fine level and one column per
/// equation of the coarse level. Restriction shares the prolongation matrix and is applied as
/// its transpose.
#[derive(Debug, Clone)]
pub struct LevelOperators {
    pub fine_level: usize,
    pub prolongation: Arc<DistributedSparseMatrix>,
    pub restriction: Arc<DistributedSparseMatrix>,
}

#[derive(Debug)]
pub struct MgOpGenerator {
    config: MgGeneratorConfig,
    fine_field: Option<Arc<FeField<StructuredMesh>>>,
    levels: Vec<MgLevel>,
    operators: Vec<LevelOperators>,
    fingerprint: Option<u64>,
}

impl MgOpGenerator {
    pub fn new(config: MgGeneratorConfig) -> Result<Self> {
        check_num_levels(config.num_levels)?;
        Ok(Self {
            config,
            fine_field: None,
            levels: Vec::new(),
            operators: Vec::new(),
            fingerprint: None,
        })
    }

    pub fn config(&self) -> &MgGeneratorConfig {
        &self.config
    }

    pub fn num_levels(&self) -> usize {
        self.config.num_levels
    }

    /// Changes the number of levels, discarding any generated hierarchy.
    pub fn set_num_levels(&mut self, num_levels: usize) -> Result<()> {
        check_num_levels(num_levels)?;
        if num_levels != self.config.num_levels {
            self.config.num_levels = num_levels;
            self.clear();
        }
        Ok(())
    }

    /// Sets the field on the finest level.
    ///
    /// Generated operators are kept; they expire if the new field's topology or numbering
    /// differs from the one they were generated for.
    pub fn set_fine_field(&mut self, field: Arc<FeField<StructuredMesh>>) {
        self.fine_field = Some(field);
    }

    pub fn fine_field(&self) -> Option<&FeField<StructuredMesh>> {
        self.fine_field.as_deref()
    }

    pub fn state(&self) -> GeneratorState {
        match (&self.fine_field, self.operators.is_empty()) {
            (None, _) => GeneratorState::Uninitialized,
            (Some(_), true) => GeneratorState::Configured,
            (Some(_), false) if self.has_expired() => GeneratorState::Expired,
            (Some(_), false) => GeneratorState::Built,
        }
    }

    /// Whether operators are missing or were generated for a different fine field.
    pub fn has_expired(&self) -> bool {
        let current = self.fine_field.as_ref().map(|field| field.fingerprint());
        self.operators.len() + 1 != self.config.num_levels || current != self.fingerprint
    }

    /// Levels of the last generated hierarchy, coarsest first.
    pub fn levels(&self) -> &[MgLevel] {
        &self.levels
    }

    /// Operators of the last generated hierarchy, ordered by increasing fine level.
    pub fn operators(&self) -> &[LevelOperators] {
        &self.operators
    }

    fn clear(&mut self) {
        self.levels.clear();
        self.operators.clear();
        self.fingerprint = None;
    }

    /// Builds the coarse levels and transfer operators, unless the current ones are still valid.
    pub fn generate(&mut self, comm: &dyn Communicator) -> Result<&[LevelOperators]> {
        let field = self
            .fine_field
            .clone()
            .ok_or_else(|| Error::configuration("multigrid operators requested before a fine field was set"))?;
        if !self.has_expired() {
            return Ok(&self.operators);
        }
        self.clear();

        let num_levels = self.config.num_levels;
        let finest = MgLevel {
            mesh: field.shared_mesh(),
            numbering: field.numbering().clone(),
            topology_map: (0..field.mesh().domain_node_count()).collect(),
        };
        let mut levels = vec![finest];
        for level in (0..num_levels - 1).rev() {
            let finer = levels.last().expect("The finest level is always present");
            let coarse = self.coarsen_level(level, finer, &field, comm)?;
            log::debug!(
                "Multigrid level {}: side lengths {:?}, {} owned equations starting at {}",
                level,
                coarse.side_lengths(),
                coarse.local_equation_count(),
                coarse.first_equation_number()
            );
            levels.push(coarse);
        }
        levels.reverse();

        let mut operators = Vec::with_capacity(num_levels - 1);
        for fine_level in 1..num_levels {
            let prolongation = Arc::new(build_prolongation(
                self.config.kind,
                fine_level,
                &levels[fine_level],
                &levels[fine_level - 1],
                field.dofs_per_node(),
            )?);
            operators.push(LevelOperators {
                fine_level,
                restriction: Arc::clone(&prolongation),
                prolongation,
            });
        }

        log::info!(
            "Generated {:?} multigrid hierarchy for field '{}' with {} levels (coarsest side lengths {:?})",
            self.config.kind,
            field.name(),
            num_levels,
            levels[0].side_lengths()
        );
        self.levels = levels;
        self.operators = operators;
        self.fingerprint = Some(field.fingerprint());
        Ok(&self.operators)
    }

    fn coarsen_level(
        &self,
        level: usize,
        finer: &MgLevel,
        field: &FeField<StructuredMesh>,
        comm: &dyn Communicator,
    ) -> Result<MgLevel> {
        let fine_mesh = finer.mesh();
        let mesh = coarsen_mesh(level, fine_mesh)?;

        let tolerance = self.config.topology_tolerance;
        let spacing = fine_mesh.vertex_spacing();
        let topology_map = (0..mesh.domain_node_count())
            .map(|node| {
                let x = mesh.node_coordinate(node);
                let nearest = fine_mesh.nearest_node(&x);
                let y = fine_mesh.node_coordinate(nearest);
                if !coincident(&x, &y, mesh.dim(), &spacing, tolerance) {
                    return Err(Error::topology(
                        level,
                        format!(
                            "coarse vertex {node} at {:?} has no coinciding fine vertex (nearest is at {:?}); \
                             the fine mesh is not a regular refinement of this level",
                            &x.coords.as_slice()[..mesh.dim()],
                            &y.coords.as_slice()[..mesh.dim()]
                        ),
                    ));
                }
                Ok(finer.topology_map[nearest])
            })
            .collect::<Result<Vec<_>>>()?;

        let fine_numbering = field.numbering();
        let numbering = EquationNumbering::build_excluding(
            &mesh,
            field.dofs_per_node(),
            |node, dof| fine_numbering.equation_number(topology_map[node], dof).is_none(),
            comm,
            self.config.offset_strategy,
        )?;

        Ok(MgLevel {
            mesh: Arc::new(mesh),
            numbering,
            topology_map,
        })
    }
}

fn check_num_levels(num_levels: usize) -> Result<()> {
    if num_levels < 2 {
        Err(Error::configuration(format!(
            "a multigrid hierarchy needs at least 2 levels, got {num_levels}"
        )))
    } else {
        Ok(())
    }
}

/// Compares coordinates relative to the fine vertex spacing along each axis.
fn coincident(x: &Point3<f64>, y: &Point3<f64>, dim: usize, spacing: &Vector3<f64>, tolerance: f64) -> bool {
    (0..dim).all(|axis| (x[axis] - y[axis]).abs() <= tolerance * spacing[axis])
}

/// Bisects every axis of `fine`, keeping the element degree and halving this rank's slab.
fn coarsen_mesh(level: usize, fine: &StructuredMesh) -> Result<StructuredMesh> {
    let dim = fine.dim();
    let element_counts: Vec<usize> = fine.element_grid().sizes().to_vec();
    if let Some(axis) = (0..dim).find(|&axis| element_counts[axis].is_odd()) {
        return Err(Error::topology(
            level,
            format!(
                "{} elements along axis {axis} cannot be bisected; reduce the number of levels or change the mesh size",
                element_counts[axis]
            ),
        ));
    }
    let layers = fine.element_layers();
    if layers.start.is_odd() || layers.end.is_odd() {
        return Err(Error::topology(
            level,
            format!(
                "rank {} owns element layers {layers:?}, which are not aligned with the coarse slab",
                fine.rank()
            ),
        ));
    }

    let coarse_counts: Vec<usize> = element_counts.iter().map(|n| n / 2).collect();
    let (min, max) = fine.bounds();
    StructuredMesh::from_slab(
        fine.element_type(0),
        min,
        max,
        &coarse_counts,
        layers.start / 2..layers.end / 2,
        fine.rank(),
        fine.size(),
    )
}

fn build_prolongation(
    kind: GeneratorKind,
    fine_level: usize,
    fine: &MgLevel,
    coarse: &MgLevel,
    dofs_per_node: usize,
) -> Result<DistributedSparseMatrix> {
    let rows = fine.numbering.owned_range();
    let cols = coarse.numbering.owned_range();
    let mut stencil = Stencil::default();

    // Counting pass
    let mut d_nnz = vec![0; rows.len()];
    let mut o_nnz = vec![0; rows.len()];
    for node in 0..fine.mesh.local_node_count() {
        stencil.compute(kind, fine_level, fine.mesh(), coarse.mesh(), node)?;
        for dof in 0..dofs_per_node {
            let Some(row) = fine.numbering.equation_number(node, dof) else {
                continue;
            };
            for &(coarse_node, _) in &stencil.entries {
                if let Some(col) = coarse.numbering.equation_number(coarse_node, dof) {
                    if cols.contains(&col) {
                        d_nnz[row - rows.start] += 1;
                    } else {
                        o_nnz[row - rows.start] += 1;
                    }
                }
            }
        }
    }

    let mut matrix = DistributedSparseMatrix::new(
        fine.numbering.global_equation_count(),
        coarse.numbering.global_equation_count(),
        rows,
        cols,
    );
    matrix.preallocate(&d_nnz, &o_nnz)?;

    for node in 0..fine.mesh.local_node_count() {
        stencil.compute(kind, fine_level, fine.mesh(), coarse.mesh(), node)?;
        for dof in 0..dofs_per_node {
            let Some(row) = fine.numbering.equation_number(node, dof) else {
                continue;
            };
            for &(coarse_node, weight) in &stencil.entries {
                if let Some(col) = coarse.numbering.equation_number(coarse_node, dof) {
                    matrix.insert_value(row, col, weight);
                }
            }
        }
    }
    matrix.finalize();

    if matrix.additional_allocations() > 0 {
        log::warn!(
            "Prolongation to level {fine_level} needed {} allocations beyond its preallocation",
            matrix.additional_allocations()
        );
    }
    log::debug!(
        "Prolongation to level {}: {} local rows, {} nonzeros",
        fine_level,
        matrix.local_rows(),
        matrix.nnz()
    );
    Ok(matrix)
}

/// Coarse domain nodes and weights interpolating a single fine node.
#[derive(Debug, Default)]
struct Stencil {
    entries: Vec<(usize, f64)>,
    element_nodes: Vec<usize>,
    element_coords: Vec<Point3<f64>>,
    basis: Vec<f64>,
}

impl Stencil {
    fn compute(
        &mut self,
        kind: GeneratorKind,
        fine_level: usize,
        fine: &StructuredMesh,
        coarse: &StructuredMesh,
        fine_node: usize,
    ) -> Result<()> {
        self.entries.clear();
        match kind {
            GeneratorKind::Simple => self.compute_simple(fine_level, fine, coarse, fine_node),
            GeneratorKind::ShapeFunction => self.compute_shape_function(fine_level, fine, coarse, fine_node),
        }
    }

    fn compute_simple(
        &mut self,
        fine_level: usize,
        fine: &StructuredMesh,
        coarse: &StructuredMesh,
        fine_node: usize,
    ) -> Result<()> {
        let dim = fine.dim();
        let fine_ijk = fine.global_vertex_ijk(fine_node);
        let mut offset_counts = [1; 3];
        for axis in 0..dim {
            if fine_ijk[axis].is_odd() {
                offset_counts[axis] = 2;
            }
        }
        let offsets = Grid::new(&offset_counts[..dim]);
        let weight = 1.0 / offsets.num_points() as f64;
        for corner in 0..offsets.num_points() {
            let offset = offsets.lift(corner);
            let mut coarse_ijk = [0; 3];
            for axis in 0..dim {
                coarse_ijk[axis] = (fine_ijk[axis] >> 1) + offset[axis];
            }
            let coarse_node = coarse.domain_node_of_global_ijk(&coarse_ijk).ok_or_else(|| {
                Error::topology(
                    fine_level - 1,
                    format!("coarse vertex {coarse_ijk:?} interpolating fine node {fine_node} is not present on this rank"),
                )
            })?;
            self.entries.push((coarse_node, weight));
        }
        Ok(())
    }

    fn compute_shape_function(
        &mut self,
        fine_level: usize,
        fine: &StructuredMesh,
        coarse: &StructuredMesh,
        fine_node: usize,
    ) -> Result<()> {
        let x = fine.node_coordinate(fine_node);
        let element = coarse.element_containing(&x).ok_or_else(|| {
            Error::topology(
                fine_level - 1,
                format!("fine node {fine_node} lies outside the coarse elements of this rank"),
            )
        })?;
        let element_type = coarse.element_type(element);
        let n = element_type.node_count();
        self.element_nodes.resize(n, usize::MAX);
        self.element_coords.resize(n, Point3::origin());
        self.basis.resize(n, 0.0);
        coarse.populate_element_nodes(&mut self.element_nodes, element);
        coarse.populate_element_coordinates(&mut self.element_coords, element);

        let xi = element_type
            .global_to_local(&self.element_coords, &x)
            .map_err(|err| Error::topology(fine_level - 1, format!("fine node {fine_node}: {err}")))?;
        element_type.evaluate_basis(&xi, &mut self.basis);
        for (&node, &value) in self.element_nodes.iter().zip(&self.basis) {
            if value.abs() >= WEIGHT_DROP_TOLERANCE {
                self.entries.push((node, value));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CycleType {
    #[default]
    V,
    W,
}

/// Smoother iterations on one level.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelSmoothing {
    pub down: usize,
    pub up: usize,
}

impl Default for LevelSmoothing {
    fn default() -> Self {
        Self { down: 1, up: 1 }
    }
}

/// Settings of the multigrid preconditioner handed to an external solver.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MgSolverConfig {
    /// Smoothing per level, coarsest first. If empty, every level uses the default smoothing.
    pub smoothing: Vec<LevelSmoothing>,
    pub cycle_type: CycleType,
    /// Number of cycles per preconditioner application; zero is treated as one.
    pub cycles: usize,
}

impl MgSolverConfig {
    pub fn with_smoothing(mut self, smoothing: Vec<LevelSmoothing>) -> Self {
        self.smoothing = smoothing;
        self
    }

    pub fn with_uniform_smoothing(mut self, num_levels: usize, down: usize, up: usize) -> Self {
        self.smoothing = vec![LevelSmoothing { down, up }; num_levels];
        self
    }

    pub fn with_cycle_type(mut self, cycle_type: CycleType) -> Self {
        self.cycle_type = cycle_type;
        self
    }

    pub fn with_cycles(mut self, cycles: usize) -> Self {
        self.cycles = cycles;
        self
    }

    /// Combines the settings with generated operators into a hierarchy description.
    pub fn attach(&self, operators: &[LevelOperators]) -> Result<MgHierarchy> {
        let num_levels = operators.len() + 1;
        if operators.is_empty() {
            return Err(Error::configuration("cannot attach an empty set of multigrid operators"));
        }
        if !self.smoothing.is_empty() && self.smoothing.len() != num_levels {
            return Err(Error::configuration(format!(
                "smoothing is configured for {} levels, but the hierarchy has {num_levels}",
                self.smoothing.len()
            )));
        }
        if let Some((index, op)) = operators
            .iter()
            .enumerate()
            .find(|(index, op)| op.fine_level != index + 1)
        {
            return Err(Error::configuration(format!(
                "operator {index} maps to level {} instead of level {}",
                op.fine_level,
                index + 1
            )));
        }

        let levels = (0..num_levels)
            .map(|level| HierarchyLevel {
                smoothing: self.smoothing.get(level).copied().unwrap_or_default(),
                operators: level.checked_sub(1).map(|index| operators[index].clone()),
            })
            .collect();
        Ok(MgHierarchy {
            levels,
            cycle_type: self.cycle_type,
            cycles: self.cycles.max(1),
        })
    }
}

#[derive(Debug, Clone)]
pub struct HierarchyLevel {
    pub smoothing: LevelSmoothing,
    /// Transfer operators from the next coarser level; absent on the coarsest level.
    pub operators: Option<LevelOperators>,
}

/// Operators and per-level settings, coarsest level first.
#[derive(Debug, Clone)]
pub struct MgHierarchy {
    pub levels: Vec<HierarchyLevel>,
    pub cycle_type: CycleType,
    pub cycles: usize,
}

impl MgHierarchy {
    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }
}
