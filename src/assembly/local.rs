//! Assembly terms: element-local contributions of individual weak-form integrands.
use crate::assembly::buffers::ElementBuffer;
use crate::error::{Error, Result};
use crate::field::FeField;
use crate::function::FieldFunction;
use crate::mesh::{MeshTopology, StructuredMesh};
use crate::nalgebra::{DMatrixSliceMut, DVectorSliceMut};
use crate::quadrature::IntegrationPoints;
use std::cell::RefCell;
use std::fmt;

mod elliptic;
mod mass;
mod source;
mod surface;

pub use elliptic::*;
pub use mass::*;
pub use source::*;
pub use surface::*;

/// A term contributing an element matrix.
pub trait ElementMatrixTerm<M: MeshTopology = StructuredMesh> {
    fn name(&self) -> &str;

    fn row_field(&self) -> &FeField<M>;

    fn col_field(&self) -> &FeField<M>;

    /// Shape `(rows, columns)` of the element matrix of the given element.
    fn element_matrix_shape(&self, element_index: usize) -> (usize, usize) {
        let rows = self.row_field().mesh().element_node_count(element_index) * self.row_field().dofs_per_node();
        let cols = self.col_field().mesh().element_node_count(element_index) * self.col_field().dofs_per_node();
        (rows, cols)
    }

    /// Accumulates the contribution of the element into `output`.
    fn assemble_element_matrix_into(&self, element_index: usize, output: DMatrixSliceMut<f64>) -> eyre::Result<()>;
}

/// A term contributing an element vector.
pub trait ElementVectorTerm<M: MeshTopology = StructuredMesh> {
    fn name(&self) -> &str;

    fn field(&self) -> &FeField<M>;

    fn element_vector_len(&self, element_index: usize) -> usize {
        self.field().mesh().element_node_count(element_index) * self.field().dofs_per_node()
    }

    /// Accumulates the contribution of the element into `output`.
    fn assemble_element_vector_into(&self, element_index: usize, output: DVectorSliceMut<f64>) -> eyre::Result<()>;
}

/// Settings shared by all terms, collected before the term is validated and constructed.
pub struct TermConfig<'a, M = StructuredMesh> {
    name: String,
    row_field: Option<&'a FeField<M>>,
    col_field: Option<&'a FeField<M>>,
    integration_points: Option<&'a dyn IntegrationPoints>,
    function: Option<Box<dyn FieldFunction + 'a>>,
}

impl<'a, M> fmt::Debug for TermConfig<'a, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TermConfig")
            .field("name", &self.name)
            .field("has_row_field", &self.row_field.is_some())
            .field("has_col_field", &self.col_field.is_some())
            .field("has_integration_points", &self.integration_points.is_some())
            .field("has_function", &self.function.is_some())
            .finish()
    }
}

impl<'a, M> TermConfig<'a, M> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            row_field: None,
            col_field: None,
            integration_points: None,
            function: None,
        }
    }

    pub fn with_field(mut self, field: &'a FeField<M>) -> Self {
        self.row_field = Some(field);
        self
    }

    /// Uses a separate field for the columns of matrix terms.
    pub fn with_column_field(mut self, field: &'a FeField<M>) -> Self {
        self.col_field = Some(field);
        self
    }

    pub fn with_integration_points(mut self, points: &'a dyn IntegrationPoints) -> Self {
        self.integration_points = Some(points);
        self
    }

    pub fn with_function(mut self, function: impl FieldFunction + 'a) -> Self {
        self.function = Some(Box::new(function));
        self
    }
}

/// Per-call scratch buffers of a term.
#[derive(Debug, Default)]
pub(crate) struct TermWorkspace {
    pub row: ElementBuffer,
    pub col: ElementBuffer,
}

/// State shared by every term variant: the bound fields, integration points and function.
pub struct TermBase<'a, M = StructuredMesh> {
    name: String,
    row_field: &'a FeField<M>,
    col_field: &'a FeField<M>,
    integration_points: &'a dyn IntegrationPoints,
    function: Box<dyn FieldFunction + 'a>,
    workspace: RefCell<TermWorkspace>,
}

impl<'a, M> fmt::Debug for TermBase<'a, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TermBase").field("name", &self.name).finish()
    }
}

impl<'a, M: MeshTopology> TermBase<'a, M> {
    /// Validates the configuration and checks the function's arity against `expected_arity`.
    ///
    /// The arity is determined by evaluating the function once at the origin.
    pub fn from_config(
        config: TermConfig<'a, M>,
        expected_arity: impl FnOnce(&FeField<M>) -> usize,
    ) -> Result<Self> {
        let TermConfig {
            name,
            row_field,
            col_field,
            integration_points,
            function,
        } = config;
        let row_field = row_field.ok_or_else(|| Error::MissingField { term: name.clone() })?;
        let col_field = col_field.unwrap_or(row_field);
        if row_field.mesh().element_count() != col_field.mesh().element_count() {
            return Err(Error::configuration(format!(
                "term '{name}': fields '{}' and '{}' have different element counts",
                row_field.name(),
                col_field.name()
            )));
        }
        // Row and column DOFs pair up component by component
        if row_field.dofs_per_node() != col_field.dofs_per_node() {
            return Err(Error::configuration(format!(
                "term '{name}': field '{}' has {} DOFs per node, but column field '{}' has {}",
                row_field.name(),
                row_field.dofs_per_node(),
                col_field.name(),
                col_field.dofs_per_node()
            )));
        }
        let integration_points = integration_points
            .ok_or_else(|| Error::configuration(format!("term '{name}' has no integration points")))?;
        let function = function.ok_or_else(|| Error::configuration(format!("term '{name}' has no function")))?;

        let expected = expected_arity(row_field);
        let actual = function.arity();
        if actual != expected {
            return Err(Error::TypeMismatch {
                term: name,
                expected,
                actual,
            });
        }
        log::debug!(
            "Configured term '{}' on field '{}' with a {}-component function",
            name,
            row_field.name(),
            actual
        );

        Ok(Self {
            name,
            row_field,
            col_field,
            integration_points,
            function,
            workspace: RefCell::new(TermWorkspace::default()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn row_field(&self) -> &'a FeField<M> {
        self.row_field
    }

    pub fn col_field(&self) -> &'a FeField<M> {
        self.col_field
    }

    pub fn integration_points(&self) -> &'a dyn IntegrationPoints {
        self.integration_points
    }

    pub fn function(&self) -> &dyn FieldFunction {
        self.function.as_ref()
    }

    pub(crate) fn workspace(&self) -> std::cell::RefMut<'_, TermWorkspace> {
        self.workspace.borrow_mut()
    }
}
