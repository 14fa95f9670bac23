//! AST validation: the boundary between parsed text and anything that
//! interprets it.
//!
//! Two passes run over the tree. The first is iterative and purely
//! structural (node count, depth, arity, binder shape), so it is safe on
//! arbitrarily deep trees built outside the parser. Once depth is known to
//! be bounded, a recursive pass checks names and scopes and infers sorts.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::ast::{Atom, Expr, ExprKind, Span};
use crate::errors::ValidationError;
use crate::operator::OperatorKind;
use crate::parser::{Limits, MAX_DEPTH_CEILING};
use crate::types::{Mismatch, Shape, SortUnifier, TypeVar, ValueSort};

/// Names that cannot be declared as solver constants.
const RESERVED_NAMES: &[&str] = &[
    "_", "as", "let", "par", "match", "forall", "exists", "and", "or", "not", "xor", "ite",
    "distinct", "select", "store", "div", "mod", "abs", "to_real", "to_int", "is_int", "Int",
    "Real", "Bool", "Array", "String", "NUMERAL", "DECIMAL", "STRING", "BINARY",
    "HEXADECIMAL", "assert", "true", "false",
];

pub fn is_reserved_name(name: &str) -> bool {
    RESERVED_NAMES.contains(&name)
}

/// A tree that passed validation, together with its inferred sorts.
#[derive(Debug, Clone)]
pub struct ValidatedExpr {
    expr: Expr,
    /// One entry per node, in preorder.
    sorts: Vec<ValueSort>,
    free_variables: BTreeMap<String, ValueSort>,
    depth: usize,
}

impl ValidatedExpr {
    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Sort of the node with the given preorder index (root is 0).
    pub fn sort_at(&self, preorder_index: usize) -> Option<&ValueSort> {
        self.sorts.get(preorder_index)
    }

    pub fn sorts(&self) -> &[ValueSort] {
        &self.sorts
    }

    /// Free (non-bound) variables with their sorts, ordered by name.
    pub fn free_variables(&self) -> &BTreeMap<String, ValueSort> {
        &self.free_variables
    }

    pub fn node_count(&self) -> usize {
        self.sorts.len()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn summary(&self) -> ValidationSummary {
        ValidationSummary {
            node_count: self.node_count(),
            depth: self.depth,
            free_variables: self.free_variables.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationSummary {
    pub node_count: usize,
    pub depth: usize,
    pub free_variables: BTreeMap<String, ValueSort>,
}

/// Validate a parsed expression whose root must be a Bool constraint.
pub fn validate(expr: Expr, limits: &Limits) -> Result<ValidatedExpr, ValidationError> {
    let depth = check_structure(&expr, limits)?;

    let mut inference = Inference::default();
    let root = inference.visit(&expr)?;
    inference.expect(root, Shape::Bool, "top-level constraint", expr.span)?;
    inference.check_binder_sorts()?;
    inference.check_binders_against_free()?;

    let sorts = inference
        .node_vars
        .iter()
        .map(|tv| inference.unifier.resolve(*tv))
        .collect();
    let free_variables = inference
        .free
        .iter()
        .map(|(name, tv)| (name.clone(), inference.unifier.resolve(*tv)))
        .collect();

    Ok(ValidatedExpr {
        expr,
        sorts,
        free_variables,
        depth,
    })
}

/// Iterative structural checks. Returns the tree depth.
fn check_structure(expr: &Expr, limits: &Limits) -> Result<usize, ValidationError> {
    let max_depth = limits.max_depth.min(MAX_DEPTH_CEILING);
    let mut count = 0usize;
    let mut max_seen = 0usize;
    let mut stack = vec![(expr, 1usize)];

    while let Some((node, depth)) = stack.pop() {
        count += 1;
        if count > limits.max_nodes {
            return Err(ValidationError::NodeCountExceeded {
                limit: limits.max_nodes,
                span: node.span.into(),
            });
        }
        if depth > max_depth {
            return Err(ValidationError::DepthExceeded {
                limit: max_depth,
                span: node.span.into(),
            });
        }
        max_seen = max_seen.max(depth);

        if let ExprKind::Compound { operator, operands } = &node.kind {
            let arity = operator.arity();
            if !arity.accepts(operands.len()) {
                return Err(ValidationError::ArityMismatch {
                    operator: operator.name(),
                    expected: arity,
                    found: operands.len(),
                    span: node.span.into(),
                });
            }
            if operator.is_quantifier() {
                let binders = &operands[..operands.len() - 1];
                if let Some(bad) = binders.iter().find(|b| b.as_variable().is_none()) {
                    return Err(ValidationError::InvalidBinder {
                        quantifier: operator.name(),
                        span: bad.span.into(),
                    });
                }
            }
            for child in operands.iter().rev() {
                stack.push((child, depth + 1));
            }
        }
    }
    Ok(max_seen)
}

struct Binding {
    name: String,
    var: TypeVar,
    span: Span,
}

#[derive(Default)]
struct Inference {
    unifier: SortUnifier,
    /// Type variable for each node, in preorder.
    node_vars: Vec<TypeVar>,
    free: BTreeMap<String, TypeVar>,
    /// Innermost binding last.
    scope: Vec<Binding>,
    all_binders: Vec<Binding>,
}

impl Inference {
    fn expect(
        &mut self,
        var: TypeVar,
        shape: Shape,
        context: &str,
        span: Span,
    ) -> Result<(), ValidationError> {
        self.unifier
            .constrain(var, shape)
            .map_err(|m| sort_conflict(context, m, span))
    }

    fn same(
        &mut self,
        actual: TypeVar,
        expected: TypeVar,
        context: &str,
        span: Span,
    ) -> Result<(), ValidationError> {
        self.unifier
            .unify(actual, expected)
            .map_err(|m| sort_conflict(context, m, span))
    }

    fn lookup(&mut self, name: &str, span: Span) -> Result<TypeVar, ValidationError> {
        if is_reserved_name(name) {
            return Err(ValidationError::ReservedName {
                name: name.to_string(),
                span: span.into(),
            });
        }
        if let Some(binding) = self.scope.iter().rev().find(|b| b.name == name) {
            return Ok(binding.var);
        }
        if let Some(var) = self.free.get(name) {
            return Ok(*var);
        }
        let var = self.unifier.fresh(Shape::Unknown);
        self.free.insert(name.to_string(), var);
        Ok(var)
    }

    fn visit(&mut self, expr: &Expr) -> Result<TypeVar, ValidationError> {
        let slot = self.node_vars.len();
        // Placeholder until the node's own variable is known.
        let placeholder = self.unifier.fresh(Shape::Unknown);
        self.node_vars.push(placeholder);

        let var = match &expr.kind {
            ExprKind::Atom(atom) => match atom {
                Atom::Variable(name) => self.lookup(name, expr.span)?,
                Atom::Int(_) => self.unifier.fresh(Shape::Numeric),
                Atom::Real(_) => self.unifier.fresh(Shape::Real),
                Atom::Bool(_) => self.unifier.fresh(Shape::Bool),
                Atom::Str(_) => self.unifier.fresh(Shape::Str),
            },
            ExprKind::Compound { operator, operands } => {
                self.compound(*operator, operands, expr.span)?
            }
        };
        self.node_vars[slot] = var;
        Ok(var)
    }

    fn compound(
        &mut self,
        op: OperatorKind,
        operands: &[Expr],
        span: Span,
    ) -> Result<TypeVar, ValidationError> {
        let ctx = op.name();
        if op.is_quantifier() {
            return self.quantifier(op, operands, span);
        }

        let mut kids = Vec::with_capacity(operands.len());
        for operand in operands {
            kids.push((self.visit(operand)?, operand.span));
        }

        match op {
            OperatorKind::And
            | OperatorKind::Or
            | OperatorKind::Not
            | OperatorKind::Implies
            | OperatorKind::Iff
            | OperatorKind::Xor => {
                for (kid, kspan) in &kids {
                    self.expect(*kid, Shape::Bool, ctx, *kspan)?;
                }
                Ok(self.unifier.fresh(Shape::Bool))
            }
            OperatorKind::Eq | OperatorKind::Ne => {
                let (lhs, _) = kids[0];
                let (rhs, rspan) = kids[1];
                self.same(rhs, lhs, ctx, rspan)?;
                Ok(self.unifier.fresh(Shape::Bool))
            }
            OperatorKind::Gt | OperatorKind::Ge | OperatorKind::Lt | OperatorKind::Le => {
                let num = self.unifier.fresh(Shape::Numeric);
                for (kid, kspan) in &kids {
                    self.same(*kid, num, ctx, *kspan)?;
                }
                Ok(self.unifier.fresh(Shape::Bool))
            }
            OperatorKind::Plus
            | OperatorKind::Minus
            | OperatorKind::Mult
            | OperatorKind::Div
            | OperatorKind::Abs
            | OperatorKind::Neg
            | OperatorKind::Sum => {
                let num = self.unifier.fresh(Shape::Numeric);
                for (kid, kspan) in &kids {
                    self.same(*kid, num, ctx, *kspan)?;
                }
                Ok(num)
            }
            OperatorKind::Mod => {
                for (kid, kspan) in &kids {
                    self.expect(*kid, Shape::Int, ctx, *kspan)?;
                }
                Ok(self.unifier.fresh(Shape::Int))
            }
            OperatorKind::Pow => {
                let (base, bspan) = kids[0];
                let (exponent, espan) = kids[1];
                self.expect(base, Shape::Numeric, ctx, bspan)?;
                self.expect(exponent, Shape::Int, "POW exponent", espan)?;
                Ok(base)
            }
            OperatorKind::Len => {
                let (arr, aspan) = kids[0];
                let (expected, _) = self.unifier.fresh_array();
                self.same(arr, expected, ctx, aspan)?;
                Ok(self.unifier.fresh(Shape::Int))
            }
            OperatorKind::Get => {
                let (arr, aspan) = kids[0];
                let (index, ispan) = kids[1];
                let (expected, elem) = self.unifier.fresh_array();
                self.same(arr, expected, ctx, aspan)?;
                self.expect(index, Shape::Int, "array index", ispan)?;
                Ok(elem)
            }
            OperatorKind::Set => {
                let (arr, aspan) = kids[0];
                let (index, ispan) = kids[1];
                let (value, vspan) = kids[2];
                let (expected, elem) = self.unifier.fresh_array();
                self.same(arr, expected, ctx, aspan)?;
                self.expect(index, Shape::Int, "array index", ispan)?;
                self.same(value, elem, "array element", vspan)?;
                Ok(arr)
            }
            OperatorKind::ForAll | OperatorKind::Exists => unreachable!("handled above"),
        }
    }

    fn quantifier(
        &mut self,
        op: OperatorKind,
        operands: &[Expr],
        span: Span,
    ) -> Result<TypeVar, ValidationError> {
        let (body, binders) = match operands.split_last() {
            Some(split) => split,
            None => {
                return Err(ValidationError::ArityMismatch {
                    operator: op.name(),
                    expected: op.arity(),
                    found: 0,
                    span: span.into(),
                })
            }
        };

        let outer_len = self.scope.len();
        for binder in binders {
            let Some(name) = binder.as_variable() else {
                return Err(ValidationError::InvalidBinder {
                    quantifier: op.name(),
                    span: binder.span.into(),
                });
            };
            if is_reserved_name(name) {
                return Err(ValidationError::ReservedName {
                    name: name.to_string(),
                    span: binder.span.into(),
                });
            }
            if self.scope[outer_len..].iter().any(|b| b.name == name) {
                return Err(ValidationError::DuplicateBinder {
                    name: name.to_string(),
                    span: binder.span.into(),
                });
            }
            if self.scope[..outer_len].iter().any(|b| b.name == name) {
                return Err(ValidationError::ShadowedBinder {
                    name: name.to_string(),
                    span: binder.span.into(),
                });
            }
            let var = self.unifier.fresh(Shape::Unknown);
            self.node_vars.push(var);
            self.scope.push(Binding {
                name: name.to_string(),
                var,
                span: binder.span,
            });
        }

        let result = self.visit(body);
        let introduced: Vec<Binding> = self.scope.drain(outer_len..).collect();
        let body_var = result?;
        self.expect(body_var, Shape::Bool, op.name(), body.span)?;

        self.all_binders.extend(introduced);
        Ok(self.unifier.fresh(Shape::Bool))
    }

    /// Binders range over Int or Real. Only meaningful once every constraint
    /// in the tree has been unified: a later sibling can still pin a binder's
    /// sort through a shared free variable.
    fn check_binder_sorts(&mut self) -> Result<(), ValidationError> {
        for binding in &self.all_binders {
            let shape = self.unifier.shape(binding.var);
            if !matches!(shape, Shape::Unknown | Shape::Numeric | Shape::Int | Shape::Real) {
                return Err(ValidationError::UnsupportedBinderSort {
                    name: binding.name.clone(),
                    sort: self.unifier.resolve(binding.var).to_string(),
                    span: binding.span.into(),
                });
            }
        }
        Ok(())
    }

    /// A bound name that also occurs free must agree with the free sort.
    fn check_binders_against_free(&mut self) -> Result<(), ValidationError> {
        for binding in &self.all_binders {
            let Some(free) = self.free.get(&binding.name).copied() else {
                continue;
            };
            let bound_sort = self.unifier.resolve(binding.var);
            let free_sort = self.unifier.resolve(free);
            if bound_sort != free_sort {
                return Err(ValidationError::BinderSortConflict {
                    name: binding.name.clone(),
                    bound: bound_sort.to_string(),
                    free: free_sort.to_string(),
                    span: binding.span.into(),
                });
            }
        }
        Ok(())
    }
}

fn sort_conflict(context: &str, mismatch: Mismatch, span: Span) -> ValidationError {
    ValidationError::SortConflict {
        context: context.to_string(),
        expected: mismatch.expected,
        found: mismatch.found,
        span: span.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn check(src: &str) -> Result<ValidatedExpr, ValidationError> {
        validate(parse(src).expect("test input should parse"), &Limits::default())
    }

    #[test]
    fn accepts_simple_conjunction() {
        let v = check("(AND (GT x 5) (LT y 10))").unwrap();
        assert_eq!(v.node_count(), 7);
        assert_eq!(v.depth(), 3);
        assert_eq!(v.free_variables().get("x"), Some(&ValueSort::Int));
        assert_eq!(v.free_variables().get("y"), Some(&ValueSort::Int));
        assert_eq!(v.sort_at(0), Some(&ValueSort::Bool));
    }

    #[test]
    fn real_literal_makes_variable_real() {
        let v = check("(AND (GT x 5) (LT x 7.5))").unwrap();
        assert_eq!(v.free_variables().get("x"), Some(&ValueSort::Real));
        // The Int literal 5 adapts to the Real context.
        assert_eq!(v.sort_at(3), Some(&ValueSort::Real));
    }

    #[test]
    fn variable_used_as_bool_and_int_is_rejected() {
        let err = check("(AND x (GT x 1))").unwrap_err();
        assert!(matches!(err, ValidationError::SortConflict { .. }), "{err:?}");
    }

    #[test]
    fn mod_forces_int() {
        let err = check("(EQ (MOD x 2) 1.5)").unwrap_err();
        assert!(matches!(err, ValidationError::SortConflict { .. }));
        let v = check("(EQ (MOD x 2) 1)").unwrap();
        assert_eq!(v.free_variables().get("x"), Some(&ValueSort::Int));
    }

    #[test]
    fn root_must_be_bool() {
        let err = check("(PLUS x 1)").unwrap_err();
        assert!(matches!(
            err,
            ValidationError::SortConflict { ref context, .. } if context == "top-level constraint"
        ));
    }

    #[test]
    fn arity_mismatch_is_reported_at_node() {
        let err = check("(AND (GT x 1 2) y)").unwrap_err();
        match err {
            ValidationError::ArityMismatch {
                operator,
                found,
                span,
                ..
            } => {
                assert_eq!(operator, "GT");
                assert_eq!(found, 3);
                assert_eq!(span.offset(), 5);
            }
            other => panic!("unexpected {other:?}"),
        }
        let err = check("(NOT a b)").unwrap_err();
        assert!(matches!(err, ValidationError::ArityMismatch { .. }));
    }

    #[test]
    fn node_limit() {
        let expr = parse("(AND a b c d e)").unwrap();
        let limits = Limits {
            max_nodes: 4,
            ..Limits::default()
        };
        let err = validate(expr, &limits).unwrap_err();
        assert!(matches!(err, ValidationError::NodeCountExceeded { limit: 4, .. }));
    }

    #[test]
    fn depth_limit_on_constructed_tree() {
        let mut expr = Expr::variable("x", Span::default());
        for _ in 0..1_000 {
            expr = Expr::compound(OperatorKind::Not, vec![expr], Span::default());
        }
        let err = validate(expr, &Limits::default()).unwrap_err();
        assert!(matches!(err, ValidationError::DepthExceeded { limit: 64, .. }));
    }

    #[test]
    fn quantifier_binders_are_scoped() {
        let v = check("(FORALL i (IMPLIES (GT i 0) (GT (PLUS i y) y)))").unwrap();
        assert!(v.free_variables().contains_key("y"));
        assert!(!v.free_variables().contains_key("i"));
        assert_eq!(v.sort_at(1), Some(&ValueSort::Int));
    }

    #[test]
    fn binder_must_be_variable() {
        let err = check("(FORALL 1 (GT x 0))").unwrap_err();
        assert!(matches!(err, ValidationError::InvalidBinder { quantifier: "FORALL", .. }));
    }

    #[test]
    fn duplicate_and_shadowed_binders() {
        let err = check("(EXISTS i i (GT i 0))").unwrap_err();
        assert!(matches!(err, ValidationError::DuplicateBinder { .. }));
        let err = check("(FORALL i (EXISTS i (GT i 0)))").unwrap_err();
        assert!(matches!(err, ValidationError::ShadowedBinder { .. }));
    }

    #[test]
    fn sibling_quantifiers_may_reuse_names() {
        assert!(check("(AND (FORALL i (GE (MULT i i) 0)) (EXISTS i (GT i 3)))").is_ok());
    }

    #[test]
    fn bound_and_free_sorts_must_agree() {
        let err = check("(AND (GT x 0.5) (FORALL x (GT x 1)))").unwrap_err();
        assert!(
            matches!(err, ValidationError::BinderSortConflict { ref name, .. } if name == "x"),
            "{err:?}"
        );
        assert!(check("(AND (GT x 0) (FORALL x (GT x 1)))").is_ok());
    }

    #[test]
    fn binder_sort_must_be_numeric() {
        let err = check("(FORALL b (OR b (NOT b)))").unwrap_err();
        assert!(matches!(err, ValidationError::UnsupportedBinderSort { .. }));
    }

    #[test]
    fn binder_sort_is_checked_after_later_siblings() {
        let err = check("(AND (FORALL i (EQ i j)) j)").unwrap_err();
        assert!(
            matches!(err, ValidationError::UnsupportedBinderSort { ref name, .. } if name == "i"),
            "{err:?}"
        );
        let err = check("(AND (EXISTS k (EQ (GET a 0) k)) (GET a 1))").unwrap_err();
        assert!(matches!(err, ValidationError::UnsupportedBinderSort { .. }), "{err:?}");
        assert!(check("(AND (FORALL i (EQ i j)) (GT j 0))").is_ok());
    }

    #[test]
    fn arrays_infer_element_sort() {
        let v = check("(AND (EQ (GET a 0) 2.5) (GE (LEN a) 1))").unwrap();
        assert_eq!(
            v.free_variables().get("a"),
            Some(&ValueSort::Array(Box::new(ValueSort::Real)))
        );
        let err = check("(EQ (GET a a) 1)").unwrap_err();
        assert!(matches!(err, ValidationError::SortConflict { .. }));
    }

    #[test]
    fn set_preserves_array_sort() {
        let v = check("(EQ (GET (SET a 1 true) 1) b)").unwrap();
        assert_eq!(v.free_variables().get("b"), Some(&ValueSort::Bool));
        assert_eq!(
            v.free_variables().get("a"),
            Some(&ValueSort::Array(Box::new(ValueSort::Bool)))
        );
    }

    #[test]
    fn reserved_names_are_rejected() {
        let expr = Expr::compound(
            OperatorKind::Gt,
            vec![
                Expr::variable("select", Span::new(4, 10)),
                Expr::atom(Atom::Int(1), Span::new(11, 12)),
            ],
            Span::new(0, 13),
        );
        let err = validate(expr, &Limits::default()).unwrap_err();
        assert!(matches!(err, ValidationError::ReservedName { ref name, .. } if name == "select"));
        assert_eq!(err.position(), 4);
        let err = check("(GT Int 1)").unwrap_err();
        assert!(matches!(err, ValidationError::ReservedName { .. }));
    }

    #[test]
    fn strings_compare_by_equality_only() {
        assert!(check("(EQ name \"admin\")").is_ok());
        let err = check("(GT name \"admin\")").unwrap_err();
        assert!(matches!(err, ValidationError::SortConflict { .. }));
    }
}
