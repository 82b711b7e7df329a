use std::{fmt::Display, ops::Range};

use miette::{Diagnostic, Error, NamedSource, SourceSpan};
use thiserror::Error;

use crate::lex::{Token, TokenKind, Tokenizer};

#[derive(Error, Debug, Diagnostic)]
#[error("Unexpected token '{found}'")]
#[diagnostic(help("expected {expected} here"))]
pub struct UnexpectedToken {
    #[source_code]
    src: NamedSource<String>,

    #[label("here")]
    bad_bit: SourceSpan,

    pub found: String,
    pub expected: &'static str,
}

#[derive(Error, Debug, Diagnostic)]
#[error("Unexpected end of input")]
#[diagnostic(help("the expression ended while {expected} was still expected"))]
pub struct UnexpectedEndOfInput {
    #[source_code]
    src: NamedSource<String>,

    #[label("input ends here")]
    bad_bit: SourceSpan,

    pub expected: &'static str,
}

#[derive(Error, Debug, Diagnostic)]
#[error("Unmatched parenthesis")]
#[diagnostic(help("add a closing `)` to finish the group"))]
pub struct UnmatchedParenthesis {
    #[source_code]
    src: NamedSource<String>,

    #[label("this `(` is never closed")]
    open: SourceSpan,
}

#[derive(Error, Debug, Diagnostic)]
#[error("Expression nested deeper than {limit} levels")]
#[diagnostic(help("split the expression or raise the parser's depth limit"))]
pub struct NestingTooDeep {
    #[source_code]
    src: NamedSource<String>,

    #[label("limit reached here")]
    bad_bit: SourceSpan,

    pub limit: usize,
}

impl UnmatchedParenthesis {
    pub fn offset(&self) -> usize {
        self.open.offset()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Add,
    Subtract,
    Multiply,
    Divide,
    Power,
}

impl Op {
    fn from_kind(kind: TokenKind) -> Option<Self> {
        Some(match kind {
            TokenKind::Add => Op::Add,
            TokenKind::Subtract => Op::Subtract,
            TokenKind::Multiply => Op::Multiply,
            TokenKind::Divide => Op::Divide,
            TokenKind::Power => Op::Power,
            _ => return None,
        })
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Op::Add => "+",
            Op::Subtract => "-",
            Op::Multiply => "*",
            Op::Divide => "/",
            Op::Power => "^",
        }
    }
}

impl Display for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}

/// A childless node. Number literals stay textual until evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Leaf<'de> {
    Number { literal: &'de str, offset: usize },
    Variable { name: &'de str, offset: usize },
}

impl<'de> Leaf<'de> {
    pub fn lexeme(&self) -> &'de str {
        match *self {
            Leaf::Number { literal, .. } => literal,
            Leaf::Variable { name, .. } => name,
        }
    }

    fn offset(&self) -> usize {
        match *self {
            Leaf::Number { offset, .. } | Leaf::Variable { offset, .. } => offset,
        }
    }
}

/// Parsed expression tree. Immutable once built; evaluate it as often as needed.
#[derive(Debug, Clone, PartialEq)]
pub enum Node<'de> {
    Leaf(Leaf<'de>),
    BinaryOp {
        op: Op,
        left: Box<Node<'de>>,
        right: Box<Node<'de>>,
    },
}

impl<'de> Node<'de> {
    pub fn binary(op: Op, left: Node<'de>, right: Node<'de>) -> Self {
        Node::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Byte range of the input this node was parsed from, parentheses excluded.
    pub fn span(&self) -> Range<usize> {
        match self {
            Node::Leaf(leaf) => leaf.offset()..leaf.offset() + leaf.lexeme().len(),
            Node::BinaryOp { left, right, .. } => left.span().start..right.span().end,
        }
    }

    /// Distinct variable names, first occurrence first.
    pub fn variables(&self) -> Vec<&'de str> {
        fn walk<'de>(node: &Node<'de>, names: &mut Vec<&'de str>) {
            match node {
                Node::Leaf(Leaf::Variable { name, .. }) => {
                    if !names.contains(name) {
                        names.push(*name);
                    }
                }
                Node::Leaf(Leaf::Number { .. }) => {}
                Node::BinaryOp { left, right, .. } => {
                    walk(left, names);
                    walk(right, names);
                }
            }
        }

        let mut names = Vec::new();
        walk(self, &mut names);
        names
    }

    /// Indented dump, one node per line.
    pub fn tree(&self) -> TreeDisplay<'_, 'de> {
        TreeDisplay(self)
    }
}

impl Display for Node<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Node::Leaf(leaf) => f.write_str(leaf.lexeme()),
            Node::BinaryOp { op, left, right } => write!(f, "({left} {op} {right})"),
        }
    }
}

pub struct TreeDisplay<'a, 'de>(&'a Node<'de>);

impl Display for TreeDisplay<'_, '_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn write_level(
            f: &mut std::fmt::Formatter<'_>,
            node: &Node<'_>,
            level: usize,
        ) -> std::fmt::Result {
            let indent = 2 * level;
            match node {
                Node::Leaf(leaf) => writeln!(f, "{:indent$}{}", "", leaf.lexeme()),
                Node::BinaryOp { op, left, right } => {
                    writeln!(f, "{:indent$}{op}", "")?;
                    write_level(f, left, level + 1)?;
                    write_level(f, right, level + 1)
                }
            }
        }

        write_level(f, self.0, 0)
    }
}


/// How chains of `+ -` and `* /` are grouped. `^` is right-associative either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fold {
    /// `a - b - c` is `(a - b) - c`.
    #[default]
    Left,
    /// `a - b - c` is `a - (b - c)`.
    Right,
}

/// Default bound on both grammar-rule nesting and tree height.
pub const MAX_DEPTH: usize = 512;

#[derive(Debug, Clone)]
pub struct Parser {
    tokenizer: Tokenizer,
    fold: Fold,
    max_depth: usize,
}

impl Default for Parser {
    fn default() -> Self {
        Parser {
            tokenizer: Tokenizer::default(),
            fold: Fold::default(),
            max_depth: MAX_DEPTH,
        }
    }
}

impl Parser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fold(mut self, fold: Fold) -> Self {
        self.fold = fold;
        self
    }

    pub fn with_tokenizer(mut self, tokenizer: Tokenizer) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    /// Inputs that nest rules, or build trees, deeper than `max_depth` fail
    /// with [`NestingTooDeep`].
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn fold(&self) -> Fold {
        self.fold
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Parses the whole of `whole` as one expression.
    pub fn parse<'de>(&self, whole: &'de str) -> Result<Node<'de>, Error> {
        let tokens = self
            .tokenizer
            .tokenize(whole)
            .collect::<Result<Vec<_>, _>>()?;

        let mut cursor = Cursor::new(whole, tokens, self.fold).with_max_depth(self.max_depth);
        let Subtree { node, .. } = cursor.expression()?;

        if let Some(token) = cursor.peek() {
            return Err(cursor.unexpected(token, "an operator or the end of input"));
        }
        Ok(node)
    }
}

/// A node together with its height; a leaf has height 1.
#[derive(Debug)]
pub(crate) struct Subtree<'de> {
    pub(crate) node: Node<'de>,
    pub(crate) height: usize,
}

impl<'de> Subtree<'de> {
    fn leaf(leaf: Leaf<'de>) -> Self {
        Subtree {
            node: Node::Leaf(leaf),
            height: 1,
        }
    }
}

/// Position in a token sequence plus the grammar rules that advance it.
pub(crate) struct Cursor<'de> {
    whole: &'de str,
    tokens: Vec<Token<'de>>,
    position: usize,
    fold: Fold,
    depth: usize,
    max_depth: usize,
    // offsets of the `(` still waiting for their `)`
    open: Vec<usize>,
}

impl<'de> Cursor<'de> {
    pub(crate) fn new(whole: &'de str, tokens: Vec<Token<'de>>, fold: Fold) -> Self {
        Cursor {
            whole,
            tokens,
            position: 0,
            fold,
            depth: 0,
            max_depth: MAX_DEPTH,
            open: Vec::new(),
        }
    }

    pub(crate) fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub(crate) fn peek(&self) -> Option<&Token<'de>> {
        self.tokens.get(self.position)
    }

    pub(crate) fn advance(&mut self) -> Option<Token<'de>> {
        let token = self.tokens.get(self.position).copied()?;
        self.position += 1;
        Some(token)
    }

    fn next_if_op(&mut self, accepted: &[Op]) -> Option<Op> {
        let op = self
            .peek()
            .and_then(|token| Op::from_kind(token.kind))
            .filter(|op| accepted.contains(op))?;
        self.position += 1;
        Some(op)
    }

    fn enter(&mut self, rule: &str) -> Result<(), Error> {
        if self.depth >= self.max_depth {
            let span = match self.peek() {
                Some(token) => token.span(),
                None => self.end_span(),
            };
            return Err(self.too_deep(span));
        }
        log::trace!("{:indent$}enter {rule}", "", indent = 4 * self.depth);
        self.depth += 1;
        Ok(())
    }

    fn leave(&mut self, rule: &str) {
        self.depth -= 1;
        log::trace!("{:indent$}leave {rule}", "", indent = 4 * self.depth);
    }

    fn src(&self) -> NamedSource<String> {
        NamedSource::new("<input>", self.whole.to_string())
    }

    fn end_span(&self) -> SourceSpan {
        let end = self.whole.len();
        SourceSpan::from(end.saturating_sub(1)..end)
    }

    fn unexpected(&self, token: &Token<'_>, expected: &'static str) -> Error {
        UnexpectedToken {
            src: self.src(),
            bad_bit: token.span(),
            found: token.literal.to_string(),
            expected,
        }
        .into()
    }

    /// Running out of tokens inside a group means its `(` is never closed.
    fn end_of_input(&self, expected: &'static str) -> Error {
        if let Some(&open) = self.open.last() {
            return UnmatchedParenthesis {
                src: self.src(),
                open: SourceSpan::from((open, 1)),
            }
            .into();
        }
        UnexpectedEndOfInput {
            src: self.src(),
            bad_bit: self.end_span(),
            expected,
        }
        .into()
    }

    fn too_deep(&self, span: SourceSpan) -> Error {
        NestingTooDeep {
            src: self.src(),
            bad_bit: span,
            limit: self.max_depth,
        }
        .into()
    }

    fn binary(
        &self,
        op: Op,
        left: Subtree<'de>,
        right: Subtree<'de>,
    ) -> Result<Subtree<'de>, Error> {
        let height = 1 + left.height.max(right.height);
        if height > self.max_depth {
            let span = left.node.span().start..right.node.span().end;
            return Err(self.too_deep(span.into()));
        }
        Ok(Subtree {
            node: Node::binary(op, left.node, right.node),
            height,
        })
    }

    /// Folds `first (op operand)*` into a binary tree.
    fn merge(
        &self,
        first: Subtree<'de>,
        rest: Vec<(Op, Subtree<'de>)>,
    ) -> Result<Subtree<'de>, Error> {
        match self.fold {
            Fold::Left => rest
                .into_iter()
                .try_fold(first, |left, (op, right)| self.binary(op, left, right)),
            Fold::Right => {
                let mut rest = rest.into_iter().rev();
                let Some((mut op, mut right)) = rest.next() else {
                    return Ok(first);
                };
                for (prev_op, operand) in rest {
                    right = self.binary(op, operand, right)?;
                    op = prev_op;
                }
                self.binary(op, first, right)
            }
        }
    }

    /// `Expression := Term (('+' | '-') Term)*`
    pub(crate) fn expression(&mut self) -> Result<Subtree<'de>, Error> {
        self.enter("Expression")?;
        let first = self.term()?;
        let mut rest = Vec::new();
        while let Some(op) = self.next_if_op(&[Op::Add, Op::Subtract]) {
            rest.push((op, self.term()?));
        }
        self.leave("Expression");
        self.merge(first, rest)
    }

    /// `Term := Power (('*' | '/') Power)*`
    pub(crate) fn term(&mut self) -> Result<Subtree<'de>, Error> {
        self.enter("Term")?;
        let first = self.power()?;
        let mut rest = Vec::new();
        while let Some(op) = self.next_if_op(&[Op::Multiply, Op::Divide]) {
            rest.push((op, self.power()?));
        }
        self.leave("Term");
        self.merge(first, rest)
    }

    /// `Power := Factor ('^' Power)?`
    pub(crate) fn power(&mut self) -> Result<Subtree<'de>, Error> {
        self.enter("Power")?;
        let base = self.factor()?;
        let subtree = match self.next_if_op(&[Op::Power]) {
            Some(op) => {
                let exponent = self.power()?;
                self.binary(op, base, exponent)?
            }
            None => base,
        };
        self.leave("Power");
        Ok(subtree)
    }

    /// `Factor := NUMBER | VARIABLE | '(' Expression ')'`
    pub(crate) fn factor(&mut self) -> Result<Subtree<'de>, Error> {
        const EXPECTED: &str = "a number, a variable or `(`";

        self.enter("Factor")?;
        let Some(token) = self.advance() else {
            return Err(self.end_of_input(EXPECTED));
        };

        let subtree = match token.kind {
            TokenKind::Number => Subtree::leaf(Leaf::Number {
                literal: token.literal,
                offset: token.offset,
            }),
            TokenKind::Variable => Subtree::leaf(Leaf::Variable {
                name: token.literal,
                offset: token.offset,
            }),
            TokenKind::LeftParen => {
                self.open.push(token.offset);
                let inner = self.expression()?;
                match self.advance() {
                    Some(Token {
                        kind: TokenKind::RightParen,
                        ..
                    }) => {
                        self.open.pop();
                        inner
                    }
                    Some(other) => return Err(self.unexpected(&other, "`)`")),
                    None => return Err(self.end_of_input("`)`")),
                }
            }
            _ => return Err(self.unexpected(&token, EXPECTED)),
        };
        self.leave("Factor");
        Ok(subtree)
    }
}

#[cfg(test)]
mod test {
    use super::{
        Cursor, Fold, Leaf, MAX_DEPTH, NestingTooDeep, Node, Parser, UnexpectedEndOfInput,
        UnexpectedToken, UnmatchedParenthesis,
    };
    use crate::lex::Tokenizer;

    fn render(src: &str) -> String {
        Parser::new().parse(src).unwrap().to_string()
    }

    fn render_right(src: &str) -> String {
        Parser::new()
            .with_fold(Fold::Right)
            .parse(src)
            .unwrap()
            .to_string()
    }

    #[test]
    fn precedence() {
        assert_eq!(render("(x+y)-16/z^2"), "((x + y) - (16 / (z ^ 2)))");
        assert_eq!(render("1 + 2 * 3"), "(1 + (2 * 3))");
        assert_eq!(render("(1 + 2) * 3"), "((1 + 2) * 3)");
        assert_eq!(render("2 * x ^ 2"), "(2 * (x ^ 2))");
    }

    #[test]
    fn power_is_right_associative() {
        assert_eq!(render("2^3^2"), "(2 ^ (3 ^ 2))");
        assert_eq!(render_right("2^3^2"), "(2 ^ (3 ^ 2))");
    }

    #[test]
    fn left_fold() {
        assert_eq!(render("8-4-2"), "((8 - 4) - 2)");
        assert_eq!(render("a/b*c"), "((a / b) * c)");
        assert_eq!(render("a+b-c+d"), "(((a + b) - c) + d)");
    }

    #[test]
    fn right_fold() {
        assert_eq!(render_right("8-4-2"), "(8 - (4 - 2))");
        assert_eq!(render_right("a/b*c"), "(a / (b * c))");
        assert_eq!(render_right("a+b-c+d"), "(a + (b - (c + d)))");
    }

    #[test]
    fn single_factor() {
        let node = Parser::new().parse("  ((answer)) ").unwrap();
        assert_eq!(
            node,
            Node::Leaf(Leaf::Variable {
                name: "answer",
                offset: 4
            })
        );
        assert_eq!(node.span(), 4..10);
    }

    #[test]
    fn spans_cover_operands() {
        let node = Parser::new().parse("(a + bc) * 7").unwrap();
        assert_eq!(node.span(), 1..12);
    }

    #[test]
    fn variables_in_order() {
        let node = Parser::new().parse("b * a + b ^ c2").unwrap();
        assert_eq!(node.variables(), vec!["b", "a", "c2"]);
    }

    #[test]
    fn tree_dump() {
        let node = Parser::new().parse("1+2*x").unwrap();
        assert_eq!(node.tree().to_string(), "+\n  1\n  *\n    2\n    x\n");
    }

    #[test]
    fn empty_input() {
        let err = Parser::new().parse("   ").unwrap_err();
        assert!(err.downcast_ref::<UnexpectedEndOfInput>().is_some());
    }

    #[test]
    fn dangling_operator() {
        let err = Parser::new().parse("1 +").unwrap_err();
        let err = err.downcast_ref::<UnexpectedEndOfInput>().unwrap();
        assert_eq!(err.expected, "a number, a variable or `(`");
    }

    #[test]
    fn unclosed_group() {
        let err = Parser::new().parse("2 * (1 + 2").unwrap_err();
        let err = err.downcast_ref::<UnmatchedParenthesis>().unwrap();
        assert_eq!(err.offset(), 4);
    }

    #[test]
    fn missing_close_before_operand() {
        let err = Parser::new().parse("(1 2)").unwrap_err();
        let err = err.downcast_ref::<UnexpectedToken>().unwrap();
        assert_eq!(err.found, "2");
        assert_eq!(err.expected, "`)`");
    }

    #[test]
    fn stray_close() {
        let err = Parser::new().parse("1 + 2)").unwrap_err();
        let err = err.downcast_ref::<UnexpectedToken>().unwrap();
        assert_eq!(err.found, ")");
    }

    #[test]
    fn assignment_is_rejected() {
        let err = Parser::new().parse("x = 1").unwrap_err();
        let err = err.downcast_ref::<UnexpectedToken>().unwrap();
        assert_eq!(err.found, "=");

        let err = Parser::new().parse("= 1").unwrap_err();
        assert!(err.downcast_ref::<UnexpectedToken>().is_some());
    }

    #[test]
    fn operator_in_factor_position() {
        let err = Parser::new().parse("2 * / 3").unwrap_err();
        let err = err.downcast_ref::<UnexpectedToken>().unwrap();
        assert_eq!(err.found, "/");
    }

    #[test]
    fn rules_run_on_a_cursor() {
        let tokenizer = Tokenizer::default();
        let tokens = tokenizer
            .tokenize("x ^ 2 + 1")
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        let mut cursor = Cursor::new("x ^ 2 + 1", tokens, Fold::Left);

        let power = cursor.power().unwrap();
        assert_eq!(power.node.to_string(), "(x ^ 2)");
        assert_eq!(power.height, 2);
        assert_eq!(cursor.peek().map(|t| t.literal), Some("+"));

        let mut factor_only = Cursor::new("x ^ 2 + 1", Vec::new(), Fold::Left);
        assert!(factor_only.factor().is_err());
    }

    #[test]
    fn end_inside_group_is_unmatched() {
        let err = Parser::new().parse("(").unwrap_err();
        assert_eq!(err.downcast_ref::<UnmatchedParenthesis>().unwrap().offset(), 0);

        let err = Parser::new().parse("2 * (1 +").unwrap_err();
        assert_eq!(err.downcast_ref::<UnmatchedParenthesis>().unwrap().offset(), 4);

        let err = Parser::new().parse("((1)").unwrap_err();
        assert_eq!(err.downcast_ref::<UnmatchedParenthesis>().unwrap().offset(), 0);

        let err = Parser::new().parse("(1) +").unwrap_err();
        assert!(err.downcast_ref::<UnexpectedEndOfInput>().is_some());
    }

    #[test]
    fn deep_parentheses() {
        let src = format!("{}1{}", "(".repeat(100_000), ")".repeat(100_000));
        let err = Parser::new().parse(&src).unwrap_err();
        let err = err.downcast_ref::<NestingTooDeep>().unwrap();
        assert_eq!(err.limit, MAX_DEPTH);

        let src = format!("{}1{}", "(".repeat(100), ")".repeat(100));
        assert_eq!(Parser::new().parse(&src).unwrap().to_string(), "1");
    }

    #[test]
    fn long_power_chain() {
        let src = vec!["2"; 100_000].join("^");
        let err = Parser::new().parse(&src).unwrap_err();
        assert!(err.downcast_ref::<NestingTooDeep>().is_some());
    }

    #[test]
    fn long_flat_chain() {
        let src = vec!["1"; 100_000].join("+");

        let err = Parser::new().parse(&src).unwrap_err();
        assert!(err.downcast_ref::<NestingTooDeep>().is_some());

        let err = Parser::new().with_fold(Fold::Right).parse(&src).unwrap_err();
        assert!(err.downcast_ref::<NestingTooDeep>().is_some());

        let src = vec!["1"; 300].join("-");
        assert!(Parser::new().parse(&src).is_ok());
    }

    #[test]
    fn custom_depth_limit() {
        // Expression, Term, Power and Factor are the minimum nesting
        let parser = Parser::new().with_max_depth(4);
        assert_eq!(parser.max_depth(), 4);
        assert!(parser.parse("1 + 2 + 3 + 4").is_ok());

        let err = parser.parse("1 + 2 + 3 + 4 + 5").unwrap_err();
        let err = err.downcast_ref::<NestingTooDeep>().unwrap();
        assert_eq!(err.limit, 4);

        assert!(parser.parse("(1)").is_err());
    }
}
