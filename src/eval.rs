use std::{borrow::Borrow, collections::HashMap, fmt::Display, hash::Hash, num::IntErrorKind};

use miette::{Diagnostic, Error, SourceSpan};
use thiserror::Error;

use crate::parse::{Leaf, Node, Op};

// Evaluation errors carry spans but no source text; attach it with
// `Report::with_source_code` to render them.

#[derive(Error, Debug, Diagnostic)]
#[error("undefined variable `{name}`")]
#[diagnostic(help("add `{name}` to the substitution table"))]
pub struct UndefinedVariable {
    pub name: String,

    #[label("referenced here")]
    span: SourceSpan,
}

#[derive(Error, Debug, Diagnostic)]
#[error("Division by zero")]
pub struct DivisionByZero {
    #[label("this divisor is zero")]
    divisor: SourceSpan,
}

impl DivisionByZero {
    pub fn divisor(&self) -> SourceSpan {
        self.divisor
    }
}

#[derive(Error, Debug, Diagnostic)]
#[error("invalid number literal `{literal}`")]
#[diagnostic(help("{reason}"))]
pub struct InvalidNumber {
    pub literal: String,
    reason: String,

    #[label("this numeric literal")]
    span: SourceSpan,
}

#[derive(Error, Debug, Diagnostic)]
#[error("integer overflow in `{lhs} {op} {rhs}`")]
#[diagnostic(help("the result does not fit in a 64-bit integer"))]
pub struct IntegerOverflow {
    pub lhs: i64,
    pub op: Op,
    pub rhs: i64,

    #[label("this operation")]
    span: SourceSpan,
}

#[derive(Error, Debug, Diagnostic)]
#[error("`{base} ^ {exponent}` is not a real number")]
pub struct MathDomain {
    pub base: f64,
    pub exponent: f64,

    #[label("this power")]
    span: SourceSpan,
}

#[derive(Error, Debug, Diagnostic)]
#[error("`{base} ^ {exponent}` is too large to represent")]
#[diagnostic(help("the result overflows a 64-bit float"))]
pub struct PowerOverflow {
    pub base: f64,
    pub exponent: f64,

    #[label("this power")]
    span: SourceSpan,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Integer(i64),
    Real(f64),
}

impl Value {
    pub fn as_f64(self) -> f64 {
        match self {
            Value::Integer(n) => n as f64,
            Value::Real(n) => n,
        }
    }

    pub fn is_zero(self) -> bool {
        match self {
            Value::Integer(n) => n == 0,
            Value::Real(n) => n == 0.0,
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Real(n)
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Integer(n) => write!(f, "{n}"),
            Value::Real(n) if n.is_finite() && *n == n.trunc() => write!(f, "{n}.0"),
            Value::Real(n) => write!(f, "{n}"),
        }
    }
}

/// Reduces `node` to a number, looking variables up in `substitutions`.
///
/// Left operands are evaluated before right ones, so when both sides fail the
/// left side's error is returned.
pub fn evaluate<K>(node: &Node<'_>, substitutions: &HashMap<K, Value>) -> Result<Value, Error>
where
    K: Borrow<str> + Hash + Eq,
{
    match node {
        Node::Leaf(Leaf::Variable { name, .. }) => {
            let Some(value) = substitutions.get(*name) else {
                return Err(UndefinedVariable {
                    name: name.to_string(),
                    span: node.span().into(),
                }
                .into());
            };
            Ok(*value)
        }
        Node::Leaf(Leaf::Number { literal, .. }) => match literal.parse::<i64>() {
            Ok(n) => Ok(Value::Integer(n)),
            Err(e) => {
                let reason = match e.kind() {
                    IntErrorKind::PosOverflow | IntErrorKind::NegOverflow => {
                        "the literal does not fit in a 64-bit integer".to_string()
                    }
                    _ => e.to_string(),
                };
                Err(InvalidNumber {
                    literal: literal.to_string(),
                    reason,
                    span: node.span().into(),
                }
                .into())
            }
        },
        Node::BinaryOp { op, left, right } => {
            let lhs = evaluate(left, substitutions)?;
            let rhs = evaluate(right, substitutions)?;
            let value = apply(*op, lhs, rhs, node, right)?;
            log::debug!("{lhs} {op} {rhs} = {value}");
            Ok(value)
        }
    }
}

fn apply(op: Op, lhs: Value, rhs: Value, node: &Node<'_>, right: &Node<'_>) -> Result<Value, Error> {
    use Value::{Integer, Real};

    let checked = |result: Option<i64>, a: i64, b: i64| -> Result<Value, Error> {
        result.map(Integer).ok_or_else(|| {
            IntegerOverflow {
                lhs: a,
                op,
                rhs: b,
                span: node.span().into(),
            }
            .into()
        })
    };

    match (op, lhs, rhs) {
        (Op::Add, Integer(a), Integer(b)) => checked(a.checked_add(b), a, b),
        (Op::Subtract, Integer(a), Integer(b)) => checked(a.checked_sub(b), a, b),
        (Op::Multiply, Integer(a), Integer(b)) => checked(a.checked_mul(b), a, b),
        (Op::Add, a, b) => Ok(Real(a.as_f64() + b.as_f64())),
        (Op::Subtract, a, b) => Ok(Real(a.as_f64() - b.as_f64())),
        (Op::Multiply, a, b) => Ok(Real(a.as_f64() * b.as_f64())),
        (Op::Divide, _, b) if b.is_zero() => Err(DivisionByZero {
            divisor: right.span().into(),
        }
        .into()),
        (Op::Divide, a, b) => Ok(Real(a.as_f64() / b.as_f64())),
        (Op::Power, a, b) => {
            let (base, exponent) = (a.as_f64(), b.as_f64());
            let result = base.powf(exponent);
            let undefined = (result.is_nan() && !base.is_nan() && !exponent.is_nan())
                || (base == 0.0 && exponent < 0.0);
            if undefined {
                return Err(MathDomain {
                    base,
                    exponent,
                    span: node.span().into(),
                }
                .into());
            }
            if result.is_infinite() && base.is_finite() && exponent.is_finite() {
                return Err(PowerOverflow {
                    base,
                    exponent,
                    span: node.span().into(),
                }
                .into());
            }
            Ok(Real(result))
        }
    }
}
