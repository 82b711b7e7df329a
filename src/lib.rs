//! Arithmetic expressions over integers and named variables.
//!
//! Text is split into [`Token`]s by a [`Tokenizer`], parsed into a [`Node`]
//! tree by a [`Parser`] and reduced to a [`Value`] by [`evaluate`].
//!
//! ```
//! use std::collections::HashMap;
//!
//! let node = exprtree::parse("(x+y)-16/z^2")?;
//! let table = HashMap::from([
//!     ("x", exprtree::Value::Integer(4)),
//!     ("y", exprtree::Value::Integer(5)),
//!     ("z", exprtree::Value::Integer(2)),
//! ]);
//! assert_eq!(exprtree::evaluate(&node, &table)?, exprtree::Value::Real(5.0));
//! # Ok::<(), miette::Error>(())
//! ```

pub mod eval;
pub mod lex;
pub mod parse;

pub use eval::{Value, evaluate};
pub use lex::{Token, TokenKind, Tokenizer};
pub use parse::{Fold, Leaf, Node, Op, Parser};

/// Parses `whole` with the standard token table and [`Fold::Left`].
pub fn parse(whole: &str) -> Result<Node<'_>, miette::Error> {
    Parser::new().parse(whole)
}
