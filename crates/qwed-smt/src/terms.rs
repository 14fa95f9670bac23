use num::rational::BigRational;

use crate::sorts::SmtSort;

/// Abstract SMT term representation, solver-agnostic.
#[derive(Debug, Clone, PartialEq)]
pub enum SmtTerm {
    /// Variable reference by name.
    Var(String),
    IntLit(i64),
    RealLit(BigRational),
    BoolLit(bool),
    StrLit(String),

    // Arithmetic
    Add(Vec<SmtTerm>),
    Sub(Box<SmtTerm>, Box<SmtTerm>),
    Mul(Vec<SmtTerm>),
    /// Integer division (`div`).
    IntDiv(Box<SmtTerm>, Box<SmtTerm>),
    /// Real division (`/`).
    RealDiv(Box<SmtTerm>, Box<SmtTerm>),
    Mod(Box<SmtTerm>, Box<SmtTerm>),
    Neg(Box<SmtTerm>),
    /// Integer absolute value (`abs`).
    Abs(Box<SmtTerm>),

    // Comparison
    Eq(Box<SmtTerm>, Box<SmtTerm>),
    Distinct(Box<SmtTerm>, Box<SmtTerm>),
    Lt(Box<SmtTerm>, Box<SmtTerm>),
    Le(Box<SmtTerm>, Box<SmtTerm>),
    Gt(Box<SmtTerm>, Box<SmtTerm>),
    Ge(Box<SmtTerm>, Box<SmtTerm>),

    // Boolean logic
    And(Vec<SmtTerm>),
    Or(Vec<SmtTerm>),
    Not(Box<SmtTerm>),
    Implies(Box<SmtTerm>, Box<SmtTerm>),
    Xor(Box<SmtTerm>, Box<SmtTerm>),

    // Quantifiers
    ForAll(Vec<(String, SmtSort)>, Box<SmtTerm>),
    Exists(Vec<(String, SmtSort)>, Box<SmtTerm>),

    /// Local binding, used to share a subterm instead of copying it.
    Let(Vec<(String, SmtTerm)>, Box<SmtTerm>),
    Ite(Box<SmtTerm>, Box<SmtTerm>, Box<SmtTerm>),

    // Arrays
    Select(Box<SmtTerm>, Box<SmtTerm>),
    Store(Box<SmtTerm>, Box<SmtTerm>, Box<SmtTerm>),
}

#[allow(clippy::should_implement_trait)]
impl SmtTerm {
    pub fn var(name: impl Into<String>) -> Self {
        SmtTerm::Var(name.into())
    }

    pub fn int(n: i64) -> Self {
        SmtTerm::IntLit(n)
    }

    pub fn real(r: BigRational) -> Self {
        SmtTerm::RealLit(r)
    }

    pub fn bool(b: bool) -> Self {
        SmtTerm::BoolLit(b)
    }

    pub fn add(terms: Vec<SmtTerm>) -> Self {
        SmtTerm::Add(terms)
    }

    pub fn sub(self, other: SmtTerm) -> Self {
        SmtTerm::Sub(Box::new(self), Box::new(other))
    }

    pub fn mul(terms: Vec<SmtTerm>) -> Self {
        SmtTerm::Mul(terms)
    }

    pub fn neg(self) -> Self {
        SmtTerm::Neg(Box::new(self))
    }

    pub fn eq(self, other: SmtTerm) -> Self {
        SmtTerm::Eq(Box::new(self), Box::new(other))
    }

    pub fn distinct(self, other: SmtTerm) -> Self {
        SmtTerm::Distinct(Box::new(self), Box::new(other))
    }

    pub fn lt(self, other: SmtTerm) -> Self {
        SmtTerm::Lt(Box::new(self), Box::new(other))
    }

    pub fn le(self, other: SmtTerm) -> Self {
        SmtTerm::Le(Box::new(self), Box::new(other))
    }

    pub fn gt(self, other: SmtTerm) -> Self {
        SmtTerm::Gt(Box::new(self), Box::new(other))
    }

    pub fn ge(self, other: SmtTerm) -> Self {
        SmtTerm::Ge(Box::new(self), Box::new(other))
    }

    pub fn and(terms: Vec<SmtTerm>) -> Self {
        SmtTerm::And(terms)
    }

    pub fn or(terms: Vec<SmtTerm>) -> Self {
        SmtTerm::Or(terms)
    }

    pub fn not(self) -> Self {
        SmtTerm::Not(Box::new(self))
    }

    pub fn implies(self, other: SmtTerm) -> Self {
        SmtTerm::Implies(Box::new(self), Box::new(other))
    }

    pub fn xor(self, other: SmtTerm) -> Self {
        SmtTerm::Xor(Box::new(self), Box::new(other))
    }

    pub fn ite(cond: SmtTerm, then: SmtTerm, els: SmtTerm) -> Self {
        SmtTerm::Ite(Box::new(cond), Box::new(then), Box::new(els))
    }

    pub fn select(self, index: SmtTerm) -> Self {
        SmtTerm::Select(Box::new(self), Box::new(index))
    }

    pub fn store(self, index: SmtTerm, value: SmtTerm) -> Self {
        SmtTerm::Store(Box::new(self), Box::new(index), Box::new(value))
    }

    pub fn let_in(name: impl Into<String>, value: SmtTerm, body: SmtTerm) -> Self {
        SmtTerm::Let(vec![(name.into(), value)], Box::new(body))
    }
}
