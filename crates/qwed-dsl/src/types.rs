//! Sort inference by unification.
//!
//! Every expression node and every variable gets a type variable. Operators
//! add equality constraints between them, and a union-find structure merges
//! the classes. This is the only place where "one name, one sort" is
//! enforced.

use std::fmt;

use serde::Serialize;

/// A resolved sort.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum ValueSort {
    Bool,
    Int,
    Real,
    Str,
    /// Int-indexed array with the given element sort.
    Array(Box<ValueSort>),
}

impl ValueSort {
    pub fn is_numeric(&self) -> bool {
        matches!(self, ValueSort::Int | ValueSort::Real)
    }
}

impl fmt::Display for ValueSort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueSort::Bool => write!(f, "Bool"),
            ValueSort::Int => write!(f, "Int"),
            ValueSort::Real => write!(f, "Real"),
            ValueSort::Str => write!(f, "String"),
            ValueSort::Array(elem) => write!(f, "(Array Int {elem})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeVar(usize);

/// Partial knowledge about a class of type variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Unknown,
    /// Int or Real, not yet decided.
    Numeric,
    Int,
    Real,
    Bool,
    Str,
    Array(TypeVar),
}

impl Shape {
    fn describe(self) -> &'static str {
        match self {
            Shape::Unknown => "any sort",
            Shape::Numeric => "Int or Real",
            Shape::Int => "Int",
            Shape::Real => "Real",
            Shape::Bool => "Bool",
            Shape::Str => "String",
            Shape::Array(_) => "Array",
        }
    }
}

/// Two shapes that cannot be merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    pub expected: String,
    pub found: String,
}

#[derive(Debug, Default)]
pub struct SortUnifier {
    parent: Vec<usize>,
    shape: Vec<Shape>,
}

impl SortUnifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh(&mut self, shape: Shape) -> TypeVar {
        let id = self.parent.len();
        self.parent.push(id);
        self.shape.push(shape);
        TypeVar(id)
    }

    pub fn fresh_array(&mut self) -> (TypeVar, TypeVar) {
        let elem = self.fresh(Shape::Unknown);
        (self.fresh(Shape::Array(elem)), elem)
    }

    fn find(&mut self, var: TypeVar) -> usize {
        let mut root = var.0;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut cur = var.0;
        while self.parent[cur] != root {
            let next = self.parent[cur];
            self.parent[cur] = root;
            cur = next;
        }
        root
    }

    pub fn shape(&mut self, var: TypeVar) -> Shape {
        let root = self.find(var);
        self.shape[root]
    }

    /// Constrain `var` to have at least the information in `shape`.
    pub fn constrain(&mut self, var: TypeVar, shape: Shape) -> Result<(), Mismatch> {
        let other = self.fresh(shape);
        self.unify(var, other)
    }

    /// Merge two classes; `b` is treated as the expected side when reporting
    /// a mismatch. On error the unifier may be left partially merged;
    /// callers abandon inference at the first mismatch.
    pub fn unify(&mut self, a: TypeVar, b: TypeVar) -> Result<(), Mismatch> {
        let mut pending = vec![(a, b)];
        while let Some((a, b)) = pending.pop() {
            let ra = self.find(a);
            let rb = self.find(b);
            if ra == rb {
                continue;
            }
            let (sa, sb) = (self.shape[ra], self.shape[rb]);
            let merged = match (sa, sb) {
                (Shape::Unknown, s) | (s, Shape::Unknown) => s,
                (Shape::Numeric, Shape::Numeric) => Shape::Numeric,
                (Shape::Numeric, s @ (Shape::Int | Shape::Real))
                | (s @ (Shape::Int | Shape::Real), Shape::Numeric) => s,
                (Shape::Array(ea), Shape::Array(eb)) => {
                    pending.push((ea, eb));
                    Shape::Array(ea)
                }
                (x, y) if x == y => x,
                (x, y) => {
                    return Err(Mismatch {
                        expected: y.describe().to_string(),
                        found: x.describe().to_string(),
                    })
                }
            };
            self.parent[rb] = ra;
            self.shape[ra] = merged;
            if let Shape::Array(elem) = merged {
                if self.occurs(ra, elem) {
                    return Err(Mismatch {
                        expected: "a finite sort".into(),
                        found: "an array containing itself".into(),
                    });
                }
            }
        }
        Ok(())
    }

    fn occurs(&mut self, root: usize, mut elem: TypeVar) -> bool {
        // Array chains are linear; a chain longer than the variable count
        // must already be cyclic.
        for _ in 0..=self.parent.len() {
            let r = self.find(elem);
            if r == root {
                return true;
            }
            match self.shape[r] {
                Shape::Array(next) => elem = next,
                _ => return false,
            }
        }
        true
    }

    /// Final sort of `var`. Undecided classes default to Int.
    pub fn resolve(&mut self, var: TypeVar) -> ValueSort {
        let mut nesting = 0usize;
        let mut cur = var;
        let base = loop {
            match self.shape(cur) {
                Shape::Array(elem) if nesting <= self.parent.len() => {
                    nesting += 1;
                    cur = elem;
                }
                Shape::Array(_) | Shape::Unknown | Shape::Numeric | Shape::Int => {
                    break ValueSort::Int
                }
                Shape::Real => break ValueSort::Real,
                Shape::Bool => break ValueSort::Bool,
                Shape::Str => break ValueSort::Str,
            }
        };
        (0..nesting).fold(base, |inner, _| ValueSort::Array(Box::new(inner)))
    }
}
