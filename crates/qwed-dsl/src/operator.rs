//! The closed operator vocabulary.
//!
//! [`OperatorKind`] is the only route from parsed text to compiled semantics.
//! The table below drives the parser's operator lookup, the validator's
//! arity rules, and (through exhaustive matches) the compiler.

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperatorKind {
    // Logical
    And,
    Or,
    Not,
    Implies,
    Iff,
    Xor,
    // Comparison
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    // Arithmetic
    Plus,
    Minus,
    Mult,
    Div,
    Mod,
    Pow,
    Abs,
    Neg,
    // Quantifiers
    ForAll,
    Exists,
    // Collections
    Len,
    Get,
    Set,
    Sum,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorClass {
    Logical,
    Comparison,
    Arithmetic,
    Quantifier,
    Collection,
}

/// Number of operands an operator accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Arity {
    Exactly(usize),
    AtLeast(usize),
}

impl Arity {
    pub fn accepts(self, count: usize) -> bool {
        match self {
            Arity::Exactly(n) => count == n,
            Arity::AtLeast(n) => count >= n,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exactly(n) => write!(f, "exactly {n}"),
            Arity::AtLeast(n) => write!(f, "at least {n}"),
        }
    }
}

/// One row of the operator table.
#[derive(Debug, Clone, Copy)]
pub struct OperatorEntry {
    pub kind: OperatorKind,
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub class: OperatorClass,
    pub arity: Arity,
}

use Arity::{AtLeast, Exactly};
use OperatorClass::*;

static TABLE: [OperatorEntry; 26] = [
    row(OperatorKind::And, "AND", &[], Logical, AtLeast(1)),
    row(OperatorKind::Or, "OR", &[], Logical, AtLeast(1)),
    row(OperatorKind::Not, "NOT", &[], Logical, Exactly(1)),
    row(OperatorKind::Implies, "IMPLIES", &["=>"], Logical, Exactly(2)),
    row(OperatorKind::Iff, "IFF", &[], Logical, Exactly(2)),
    row(OperatorKind::Xor, "XOR", &[], Logical, Exactly(2)),
    row(OperatorKind::Eq, "EQ", &["="], Comparison, Exactly(2)),
    row(OperatorKind::Ne, "NE", &["!="], Comparison, Exactly(2)),
    row(OperatorKind::Gt, "GT", &[">"], Comparison, Exactly(2)),
    row(OperatorKind::Ge, "GE", &[">="], Comparison, Exactly(2)),
    row(OperatorKind::Lt, "LT", &["<"], Comparison, Exactly(2)),
    row(OperatorKind::Le, "LE", &["<="], Comparison, Exactly(2)),
    row(OperatorKind::Plus, "PLUS", &["+"], Arithmetic, AtLeast(1)),
    row(OperatorKind::Minus, "MINUS", &["-"], Arithmetic, Exactly(2)),
    row(OperatorKind::Mult, "MULT", &["*"], Arithmetic, AtLeast(1)),
    row(OperatorKind::Div, "DIV", &["/"], Arithmetic, Exactly(2)),
    row(OperatorKind::Mod, "MOD", &["%"], Arithmetic, Exactly(2)),
    row(OperatorKind::Pow, "POW", &["^"], Arithmetic, Exactly(2)),
    row(OperatorKind::Abs, "ABS", &[], Arithmetic, Exactly(1)),
    row(OperatorKind::Neg, "NEG", &[], Arithmetic, Exactly(1)),
    row(OperatorKind::ForAll, "FORALL", &[], Quantifier, AtLeast(2)),
    row(OperatorKind::Exists, "EXISTS", &[], Quantifier, AtLeast(2)),
    row(OperatorKind::Len, "LEN", &[], Collection, Exactly(1)),
    row(OperatorKind::Get, "GET", &[], Collection, Exactly(2)),
    row(OperatorKind::Set, "SET", &[], Collection, Exactly(3)),
    row(OperatorKind::Sum, "SUM", &[], Collection, AtLeast(1)),
];

const fn row(
    kind: OperatorKind,
    name: &'static str,
    aliases: &'static [&'static str],
    class: OperatorClass,
    arity: Arity,
) -> OperatorEntry {
    OperatorEntry {
        kind,
        name,
        aliases,
        class,
        arity,
    }
}

impl OperatorKind {
    pub const ALL: [OperatorKind; 26] = [
        OperatorKind::And,
        OperatorKind::Or,
        OperatorKind::Not,
        OperatorKind::Implies,
        OperatorKind::Iff,
        OperatorKind::Xor,
        OperatorKind::Eq,
        OperatorKind::Ne,
        OperatorKind::Gt,
        OperatorKind::Ge,
        OperatorKind::Lt,
        OperatorKind::Le,
        OperatorKind::Plus,
        OperatorKind::Minus,
        OperatorKind::Mult,
        OperatorKind::Div,
        OperatorKind::Mod,
        OperatorKind::Pow,
        OperatorKind::Abs,
        OperatorKind::Neg,
        OperatorKind::ForAll,
        OperatorKind::Exists,
        OperatorKind::Len,
        OperatorKind::Get,
        OperatorKind::Set,
        OperatorKind::Sum,
    ];

    pub fn entry(self) -> &'static OperatorEntry {
        &TABLE[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.entry().name
    }

    pub fn class(self) -> OperatorClass {
        self.entry().class
    }

    pub fn arity(self) -> Arity {
        self.entry().arity
    }

    /// Resolve an operator token. Names match case-insensitively; symbolic
    /// aliases match exactly.
    pub fn lookup(token: &str) -> Option<Self> {
        TABLE
            .iter()
            .find(|entry| {
                entry.name.eq_ignore_ascii_case(token) || entry.aliases.contains(&token)
            })
            .map(|entry| entry.kind)
    }

    pub fn is_quantifier(self) -> bool {
        self.class() == OperatorClass::Quantifier
    }
}

impl fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_rows_line_up_with_enum_discriminants() {
        for (index, kind) in OperatorKind::ALL.iter().enumerate() {
            assert_eq!(TABLE[index].kind, *kind, "row {index} is out of order");
            assert_eq!(kind.entry().kind, *kind);
        }
    }

    #[test]
    fn lookup_is_case_insensitive_for_names() {
        assert_eq!(OperatorKind::lookup("AND"), Some(OperatorKind::And));
        assert_eq!(OperatorKind::lookup("and"), Some(OperatorKind::And));
        assert_eq!(OperatorKind::lookup("ForAll"), Some(OperatorKind::ForAll));
        assert_eq!(OperatorKind::lookup("implies"), Some(OperatorKind::Implies));
    }

    #[test]
    fn lookup_accepts_symbolic_aliases() {
        assert_eq!(OperatorKind::lookup(">="), Some(OperatorKind::Ge));
        assert_eq!(OperatorKind::lookup("!="), Some(OperatorKind::Ne));
        assert_eq!(OperatorKind::lookup("=>"), Some(OperatorKind::Implies));
        assert_eq!(OperatorKind::lookup("-"), Some(OperatorKind::Minus));
        assert_eq!(OperatorKind::lookup("^"), Some(OperatorKind::Pow));
    }

    #[test]
    fn lookup_rejects_unknown_tokens() {
        assert_eq!(OperatorKind::lookup("EVAL"), None);
        assert_eq!(OperatorKind::lookup("__import__"), None);
        assert_eq!(OperatorKind::lookup(""), None);
    }

    #[test]
    fn arity_rules() {
        assert!(OperatorKind::And.arity().accepts(1));
        assert!(!OperatorKind::And.arity().accepts(0));
        assert!(OperatorKind::Set.arity().accepts(3));
        assert!(!OperatorKind::Set.arity().accepts(2));
        assert!(!OperatorKind::ForAll.arity().accepts(1));
        assert_eq!(OperatorKind::Gt.arity().to_string(), "exactly 2");
        assert_eq!(OperatorKind::Sum.arity().to_string(), "at least 1");
    }
}
