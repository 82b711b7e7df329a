use std::fmt::Display;

use miette::{Diagnostic, Error, NamedSource, SourceSpan};
use regex::Regex;
use thiserror::Error;

#[derive(Error, Debug, Diagnostic)]
#[error("Unrecognized character '{token}'")]
#[diagnostic(help("remove or correct the character: `{token}`"))]
pub struct UnrecognizedCharacter {
    #[source_code]
    src: NamedSource<String>,

    #[label("this character")]
    bad_bit: SourceSpan,

    pub token: char,
}

impl UnrecognizedCharacter {
    pub fn offset(&self) -> usize {
        self.bad_bit.offset()
    }
}

/// A token definition that cannot drive the scanner.
#[derive(Error, Debug, Diagnostic)]
#[error("invalid token definition for {kind}: `{pattern}`")]
#[diagnostic(help("{reason}"))]
pub struct InvalidDefinition {
    pub kind: TokenKind,
    pub pattern: String,
    reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Token<'de> {
    pub kind: TokenKind,
    pub literal: &'de str,
    /// Byte offset of `literal` in the scanned input.
    pub offset: usize,
}

impl Token<'_> {
    pub fn span(&self) -> SourceSpan {
        SourceSpan::from(self.offset..self.offset + self.literal.len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    LeftParen,
    RightParen,
    Multiply,
    Subtract,
    Add,
    Divide,
    Number,
    Assignment,
    Power,
    Variable,
}

impl Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TokenKind::LeftParen => "LEFT_PAREN",
            TokenKind::RightParen => "RIGHT_PAREN",
            TokenKind::Multiply => "MULTIPLY",
            TokenKind::Subtract => "SUBTRACT",
            TokenKind::Add => "ADD",
            TokenKind::Divide => "DIVIDE",
            TokenKind::Number => "NUMBER",
            TokenKind::Assignment => "ASSIGNMENT",
            TokenKind::Power => "POWER",
            TokenKind::Variable => "VARIABLE",
        };
        f.write_str(name)
    }
}

impl Display for Token<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind, self.literal)
    }
}

/// The standard token table. Order matters: when two definitions match at the
/// same position, the earlier one wins.
pub const DEFINITIONS: [(TokenKind, &str); 10] = [
    (TokenKind::LeftParen, r"\("),
    (TokenKind::RightParen, r"\)"),
    (TokenKind::Multiply, r"\*"),
    (TokenKind::Subtract, r"-"),
    (TokenKind::Add, r"\+"),
    (TokenKind::Divide, r"/"),
    (TokenKind::Number, r"[0-9]+"),
    (TokenKind::Assignment, r"="),
    (TokenKind::Power, r"\^"),
    (TokenKind::Variable, r"[A-Za-z][A-Za-z0-9]*"),
];

/// Splits text into [`Token`]s using an ordered list of `(kind, pattern)`
/// definitions, compiled into a single leftmost-first alternation.
#[derive(Debug, Clone)]
pub struct Tokenizer {
    regex: Regex,
    // (kind, capture group of its alternative)
    groups: Vec<(TokenKind, usize)>,
}

impl Tokenizer {
    pub fn new<'p>(
        definitions: impl IntoIterator<Item = (TokenKind, &'p str)>,
    ) -> Result<Self, Error> {
        let mut parts = Vec::new();
        let mut groups = Vec::new();
        let mut next_group = 1;

        for (kind, pattern) in definitions {
            let invalid = |reason: String| InvalidDefinition {
                kind,
                pattern: pattern.to_string(),
                reason,
            };
            let single = Regex::new(pattern).map_err(|e| invalid(e.to_string()))?;
            // zero-width matches such as `\b` would win the alternation and stall the scan
            let hir = regex_syntax::Parser::new()
                .parse(pattern)
                .map_err(|e| invalid(e.to_string()))?;
            if hir.properties().minimum_len() == Some(0) {
                return Err(invalid("the pattern can match the empty string".to_string()).into());
            }

            // the wrapping group comes first, then any groups inside the pattern
            groups.push((kind, next_group));
            next_group += single.captures_len();
            parts.push(format!("({pattern})"));
        }

        let alternation = parts.join("|");
        let regex = Regex::new(&alternation).map_err(|e| InvalidDefinition {
            kind: groups.last().map_or(TokenKind::Variable, |&(kind, _)| kind),
            pattern: alternation.clone(),
            reason: e.to_string(),
        })?;

        Ok(Tokenizer { regex, groups })
    }

    /// Kinds in the order they take precedence.
    pub fn kinds(&self) -> impl Iterator<Item = TokenKind> + '_ {
        self.groups.iter().map(|&(kind, _)| kind)
    }

    pub fn tokenize<'t, 'de>(&'t self, whole: &'de str) -> Tokens<'t, 'de> {
        Tokens {
            tokenizer: self,
            whole,
            byte: 0,
        }
    }
}

impl Default for Tokenizer {
    fn default() -> Self {
        Tokenizer::new(DEFINITIONS).expect("standard token definitions compile")
    }
}

/// Lazy token sequence over one input. Stops for good after the first error.
pub struct Tokens<'t, 'de> {
    tokenizer: &'t Tokenizer,
    whole: &'de str,
    byte: usize,
}

impl<'de> Iterator for Tokens<'_, 'de> {
    type Item = Result<Token<'de>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let c = self.whole[self.byte..].chars().next()?;
            if matches!(c, ' ' | '\r' | '\t' | '\n') {
                self.byte += 1;
                continue; // Skip whitespace
            }

            let start = self.byte;
            let found = self
                .tokenizer
                .regex
                .captures_at(self.whole, start)
                .and_then(|caps| {
                    self.tokenizer
                        .groups
                        .iter()
                        .find_map(|&(kind, group)| caps.get(group).map(|m| (kind, m)))
                })
                .filter(|(_, m)| m.start() == start && m.end() > start);

            let Some((kind, m)) = found else {
                self.byte = self.whole.len();
                return Some(Err(UnrecognizedCharacter {
                    src: NamedSource::new("<input>", self.whole.to_string()),
                    bad_bit: SourceSpan::from(start..start + c.len_utf8()),
                    token: c,
                }
                .into()));
            };

            self.byte = m.end();
            let token = Token {
                kind,
                literal: m.as_str(),
                offset: start,
            };
            log::trace!("token {token} at {start}");
            return Some(Ok(token));
        }
    }
}
