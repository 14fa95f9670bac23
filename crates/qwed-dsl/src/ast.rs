use std::fmt;

use num::bigint::BigInt;
use num::rational::BigRational;
use num::traits::{Signed, Zero};
use serde::Serialize;

use crate::operator::OperatorKind;

/// Source span for error reporting, as a byte range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn point(at: usize) -> Self {
        Self { start: at, end: at }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Span> for miette::SourceSpan {
    fn from(span: Span) -> Self {
        (span.start, span.len()).into()
    }
}

/// Leaf of the expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Atom {
    Variable(String),
    Int(i64),
    /// Exact decimal literal such as `2.75`.
    Real(BigRational),
    Bool(bool),
    Str(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Atom(Atom),
    Compound {
        operator: OperatorKind,
        operands: Vec<Expr>,
    },
}

/// An S-expression node. Built once by the parser and never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    pub fn atom(atom: Atom, span: Span) -> Self {
        Self {
            kind: ExprKind::Atom(atom),
            span,
        }
    }

    pub fn compound(operator: OperatorKind, operands: Vec<Expr>, span: Span) -> Self {
        Self {
            kind: ExprKind::Compound { operator, operands },
            span,
        }
    }

    pub fn variable(name: impl Into<String>, span: Span) -> Self {
        Self::atom(Atom::Variable(name.into()), span)
    }

    pub fn as_variable(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Atom(Atom::Variable(name)) => Some(name),
            _ => None,
        }
    }

    pub fn as_atom(&self) -> Option<&Atom> {
        match &self.kind {
            ExprKind::Atom(atom) => Some(atom),
            ExprKind::Compound { .. } => None,
        }
    }

    pub fn operator(&self) -> Option<OperatorKind> {
        match &self.kind {
            ExprKind::Compound { operator, .. } => Some(*operator),
            ExprKind::Atom(_) => None,
        }
    }

    pub fn operands(&self) -> &[Expr] {
        match &self.kind {
            ExprKind::Compound { operands, .. } => operands,
            ExprKind::Atom(_) => &[],
        }
    }

    /// Tree depth (an atom has depth 1). Iterative, so it is safe on trees
    /// built outside the parser.
    pub fn depth(&self) -> usize {
        let mut max = 0;
        let mut stack = vec![(self, 1usize)];
        while let Some((node, depth)) = stack.pop() {
            max = max.max(depth);
            for child in node.operands() {
                stack.push((child, depth + 1));
            }
        }
        max
    }

    pub fn node_count(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            count += 1;
            stack.extend(node.operands());
        }
        count
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Atom::Variable(name) => write!(f, "{name}"),
            Atom::Int(n) => write!(f, "{n}"),
            Atom::Real(r) => write!(f, "{}", format_rational(r)),
            Atom::Bool(b) => write!(f, "{b}"),
            Atom::Str(s) => {
                write!(f, "\"")?;
                for ch in s.chars() {
                    match ch {
                        '"' => write!(f, "\\\"")?,
                        '\\' => write!(f, "\\\\")?,
                        '\n' => write!(f, "\\n")?,
                        '\t' => write!(f, "\\t")?,
                        other => write!(f, "{other}")?,
                    }
                }
                write!(f, "\"")
            }
        }
    }
}

/// Canonical S-expression rendering; re-parsing it yields an equal tree
/// (modulo spans).
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExprKind::Atom(atom) => write!(f, "{atom}"),
            ExprKind::Compound { operator, operands } => {
                write!(f, "({}", operator.name())?;
                for operand in operands {
                    write!(f, " {operand}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Render a rational as a decimal when its expansion terminates, otherwise
/// as `n/d`.
pub fn format_rational(value: &BigRational) -> String {
    let numer = value.numer();
    let denom = value.denom();
    if !terminates(denom) {
        return format!("{numer}/{denom}");
    }

    let negative = value.is_negative();
    let numer = numer.abs();
    let ten = BigInt::from(10);
    let int_part = &numer / denom;
    let mut rem = &numer % denom;
    let mut digits = String::new();
    while !rem.is_zero() {
        rem *= &ten;
        digits.push_str(&(&rem / denom).to_string());
        rem %= denom;
    }
    if digits.is_empty() {
        digits.push('0');
    }
    let sign = if negative { "-" } else { "" };
    format!("{sign}{int_part}.{digits}")
}

fn terminates(denom: &BigInt) -> bool {
    let two = BigInt::from(2);
    let five = BigInt::from(5);
    let mut d = denom.clone();
    while (&d % &two).is_zero() {
        d /= &two;
    }
    while (&d % &five).is_zero() {
        d /= &five;
    }
    d == BigInt::from(1)
}
