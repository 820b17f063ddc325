//! User-supplied functions of position evaluated at integration points.
use nalgebra::Point3;

/// A scalar-, vector- or tensor-valued function of physical position.
pub trait FieldFunction {
    /// Writes the function value at `x` into `output`, replacing its previous contents.
    fn evaluate(&self, x: &Point3<f64>, output: &mut Vec<f64>);

    /// Number of components returned by the function, determined by evaluating it at the origin.
    fn arity(&self) -> usize {
        let mut output = Vec::new();
        self.evaluate(&Point3::origin(), &mut output);
        output.len()
    }
}

impl<F: FieldFunction + ?Sized> FieldFunction for &F {
    fn evaluate(&self, x: &Point3<f64>, output: &mut Vec<f64>) {
        (**self).evaluate(x, output)
    }
}

impl<F: FieldFunction + ?Sized> FieldFunction for Box<F> {
    fn evaluate(&self, x: &Point3<f64>, output: &mut Vec<f64>) {
        (**self).evaluate(x, output)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstantFunction {
    values: Vec<f64>,
}

impl ConstantFunction {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn scalar(value: f64) -> Self {
        Self::new(vec![value])
    }
}

impl FieldFunction for ConstantFunction {
    fn evaluate(&self, _x: &Point3<f64>, output: &mut Vec<f64>) {
        output.clear();
        output.extend_from_slice(&self.values);
    }
}

/// Adapts a closure writing into an output buffer.
#[derive(Debug, Clone)]
pub struct FnFunction<F>(pub F);

impl<F> FieldFunction for FnFunction<F>
where
    F: Fn(&Point3<f64>, &mut Vec<f64>),
{
    fn evaluate(&self, x: &Point3<f64>, output: &mut Vec<f64>) {
        output.clear();
        (self.0)(x, output)
    }
}

/// Wraps a scalar-valued closure.
pub fn scalar_fn<F>(f: F) -> FnFunction<impl Fn(&Point3<f64>, &mut Vec<f64>)>
where
    F: Fn(&Point3<f64>) -> f64,
{
    FnFunction(move |x: &Point3<f64>, output: &mut Vec<f64>| output.push(f(x)))
}

/// Number of independent components of a symmetric `dim x dim` tensor.
pub fn symmetric_tensor_component_count(dim: usize) -> usize {
    dim * (dim + 1) / 2
}

/// Index of entry $(i, j)$ in the packed symmetric tensor layout.
///
/// Diagonal entries come first, followed by $xy$, then $xz$ and $yz$ in three dimensions.
pub fn symmetric_tensor_index(dim: usize, i: usize, j: usize) -> usize {
    let (i, j) = if i <= j { (i, j) } else { (j, i) };
    if i == j {
        return i;
    }
    match (dim, i, j) {
        (2, 0, 1) => 2,
        (3, 0, 1) => 3,
        (3, 0, 2) => 4,
        (3, 1, 2) => 5,
        _ => panic!("Invalid symmetric tensor entry ({i}, {j}) in dimension {dim}"),
    }
}
