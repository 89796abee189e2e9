use crate::core::transexpr::{BinaryOp, Expr, Function, TranspiledExpression, UnaryOp};
use crate::types::{BandArray, GenError, GenResult, MaskArray, Real};
use ndarray::{ArrayD, ArrayViewD, IxDyn, Zip};
use std::collections::HashMap;

/// Intermediate evaluation result
#[derive(Debug, Clone)]
enum Value {
    Scalar(Real),
    Array(ArrayD<Real>),
}

fn truthy(v: Real) -> bool {
    v != 0.0
}

fn from_bool(b: bool) -> Real {
    if b {
        1.0
    } else {
        0.0
    }
}

fn map_value(v: Value, f: impl Fn(Real) -> Real) -> Value {
    match v {
        Value::Scalar(x) => Value::Scalar(f(x)),
        Value::Array(a) => Value::Array(a.mapv(f)),
    }
}

fn zip_values(a: Value, b: Value, f: impl Fn(Real, Real) -> Real) -> Value {
    match (a, b) {
        (Value::Scalar(x), Value::Scalar(y)) => Value::Scalar(f(x, y)),
        (Value::Array(a), Value::Scalar(y)) => Value::Array(a.mapv(|x| f(x, y))),
        (Value::Scalar(x), Value::Array(b)) => Value::Array(b.mapv(|y| f(x, y))),
        (Value::Array(a), Value::Array(b)) => {
            Value::Array(Zip::from(&a).and(&b).map_collect(|&x, &y| f(x, y)))
        }
    }
}

/// NaN-propagating minimum/maximum
fn nan_min(x: Real, y: Real) -> Real {
    if x.is_nan() || y.is_nan() {
        Real::NAN
    } else {
        x.min(y)
    }
}

fn nan_max(x: Real, y: Real) -> Real {
    if x.is_nan() || y.is_nan() {
        Real::NAN
    } else {
        x.max(y)
    }
}

/// Integer bitwise op on integral operands; NaN otherwise
fn bitwise(x: Real, y: Real, op: fn(i64, i64) -> i64) -> Real {
    if x.is_finite() && y.is_finite() && x.fract() == 0.0 && y.fract() == 0.0 {
        op(x as i64, y as i64) as Real
    } else {
        Real::NAN
    }
}

/// Evaluates transpiled valid-pixel expressions against same-shaped band arrays
pub struct ValidPixelMaskEvaluator<'a> {
    bands: HashMap<&'a str, ArrayViewD<'a, Real>>,
    shape: Option<Vec<usize>>,
}

impl<'a> ValidPixelMaskEvaluator<'a> {
    /// Create an evaluator without bands
    pub fn new() -> Self {
        Self {
            bands: HashMap::new(),
            shape: None,
        }
    }

    /// Create an evaluator from `(name, array)` pairs, e.g. iterating a band map
    pub fn from_arrays<I, S>(arrays: I) -> GenResult<Self>
    where
        I: IntoIterator<Item = (&'a S, &'a BandArray)>,
        S: AsRef<str> + ?Sized + 'a,
    {
        let mut evaluator = Self::new();
        for (name, data) in arrays {
            evaluator.add_band(name.as_ref(), data.view())?;
        }
        Ok(evaluator)
    }

    /// Register a band; all bands must share one shape
    pub fn add_band(&mut self, name: &'a str, data: ArrayViewD<'a, Real>) -> GenResult<()> {
        match &self.shape {
            Some(shape) if shape.as_slice() != data.shape() => {
                return Err(GenError::ShapeMismatch {
                    name: name.to_string(),
                    expected: shape.clone(),
                    actual: data.shape().to_vec(),
                });
            }
            Some(_) => {}
            None => self.shape = Some(data.shape().to_vec()),
        }
        self.bands.insert(name, data);
        Ok(())
    }

    /// Evaluate `expr` elementwise into a boolean mask (true = valid)
    pub fn evaluate(&self, expr: &TranspiledExpression) -> GenResult<MaskArray> {
        if let Some(name) = expr
            .ast()
            .identifiers()
            .into_iter()
            .find(|name| !self.bands.contains_key(name))
        {
            return Err(GenError::UnboundIdentifier {
                name: name.to_string(),
            });
        }

        let shape = self.shape.clone().unwrap_or_default();
        let mask = match self.eval(expr.ast())? {
            Value::Scalar(v) => ArrayD::from_elem(IxDyn(&shape), truthy(v)),
            Value::Array(a) => a.mapv(truthy),
        };

        log::debug!(
            "Evaluated '{}': {}/{} valid pixels",
            expr,
            mask.iter().filter(|&&v| v).count(),
            mask.len()
        );
        Ok(mask)
    }

    fn broadcast(&self, v: Value) -> ArrayD<Real> {
        match v {
            Value::Array(a) => a,
            Value::Scalar(x) => {
                ArrayD::from_elem(IxDyn(self.shape.as_deref().unwrap_or(&[])), x)
            }
        }
    }

    fn eval(&self, expr: &Expr) -> GenResult<Value> {
        let value = match expr {
            Expr::Number { value, .. } => Value::Scalar(*value),
            Expr::Bool(b) => Value::Scalar(from_bool(*b)),
            Expr::NaN => Value::Scalar(Real::NAN),
            Expr::Ident(name) => {
                let data = self
                    .bands
                    .get(name.as_str())
                    .ok_or_else(|| GenError::UnboundIdentifier { name: name.clone() })?;
                Value::Array(data.to_owned())
            }
            Expr::Group(inner) => self.eval(inner)?,
            Expr::Unary(op, operand) => {
                let v = self.eval(operand)?;
                match op {
                    UnaryOp::Neg => map_value(v, |x| -x),
                    UnaryOp::Pos => v,
                    UnaryOp::Not => map_value(v, |x| from_bool(!truthy(x))),
                }
            }
            Expr::Binary(op, lhs, rhs) => {
                let a = self.eval(lhs)?;
                let b = self.eval(rhs)?;
                match op {
                    BinaryOp::Add => zip_values(a, b, |x, y| x + y),
                    BinaryOp::Sub => zip_values(a, b, |x, y| x - y),
                    BinaryOp::Mul => zip_values(a, b, |x, y| x * y),
                    BinaryOp::Div => zip_values(a, b, |x, y| x / y),
                    BinaryOp::Pow => zip_values(a, b, Real::powf),
                    BinaryOp::Lt => zip_values(a, b, |x, y| from_bool(x < y)),
                    BinaryOp::Gt => zip_values(a, b, |x, y| from_bool(x > y)),
                    BinaryOp::Le => zip_values(a, b, |x, y| from_bool(x <= y)),
                    BinaryOp::Ge => zip_values(a, b, |x, y| from_bool(x >= y)),
                    BinaryOp::Eq => zip_values(a, b, |x, y| from_bool(x == y)),
                    BinaryOp::Ne => zip_values(a, b, |x, y| from_bool(x != y)),
                    BinaryOp::And => zip_values(a, b, |x, y| from_bool(truthy(x) && truthy(y))),
                    BinaryOp::Or => zip_values(a, b, |x, y| from_bool(truthy(x) || truthy(y))),
                    BinaryOp::BitAnd => zip_values(a, b, |x, y| bitwise(x, y, |i, j| i & j)),
                    BinaryOp::BitOr => zip_values(a, b, |x, y| bitwise(x, y, |i, j| i | j)),
                }
            }
            Expr::Call(function, args) => {
                let mut values = args
                    .iter()
                    .map(|a| self.eval(a))
                    .collect::<GenResult<Vec<_>>>()?;
                let first = values.remove(0);
                match function {
                    Function::Abs => map_value(first, Real::abs),
                    Function::Sqrt => map_value(first, Real::sqrt),
                    Function::Exp => map_value(first, Real::exp),
                    Function::Log => map_value(first, Real::ln),
                    Function::Log10 => map_value(first, Real::log10),
                    Function::Sin => map_value(first, Real::sin),
                    Function::Cos => map_value(first, Real::cos),
                    Function::Tan => map_value(first, Real::tan),
                    Function::Floor => map_value(first, Real::floor),
                    Function::Ceil => map_value(first, Real::ceil),
                    Function::IsNan => map_value(first, |x| from_bool(x.is_nan())),
                    Function::Min => zip_values(first, values.remove(0), nan_min),
                    Function::Max => zip_values(first, values.remove(0), nan_max),
                }
            }
            Expr::Conditional(cond, then, otherwise) => {
                let c = self.eval(cond)?;
                let a = self.eval(then)?;
                let b = self.eval(otherwise)?;
                match (c, a, b) {
                    (Value::Scalar(c), Value::Scalar(a), Value::Scalar(b)) => {
                        Value::Scalar(if truthy(c) { a } else { b })
                    }
                    (c, a, b) => {
                        let (c, a, b) = (self.broadcast(c), self.broadcast(a), self.broadcast(b));
                        Value::Array(
                            Zip::from(&c)
                                .and(&a)
                                .and(&b)
                                .map_collect(|&c, &a, &b| if truthy(c) { a } else { b }),
                        )
                    }
                }
            }
        };
        Ok(value)
    }
}

impl Default for ValidPixelMaskEvaluator<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// Evaluate a transpiled expression against a band map
pub fn evaluate_valid_mask<S: AsRef<str>>(
    expr: &TranspiledExpression,
    bands: &HashMap<S, BandArray>,
) -> GenResult<MaskArray> {
    ValidPixelMaskEvaluator::from_arrays(bands.iter())?.evaluate(expr)
}
