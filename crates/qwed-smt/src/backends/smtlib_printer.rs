use std::fmt::Write;

use num::rational::BigRational;
use num::traits::Signed;
use qwed_dsl::ast::format_rational;

use crate::sorts::SmtSort;
use crate::terms::SmtTerm;

/// Print an SmtTerm as SMT-LIB2 format.
pub fn to_smtlib(term: &SmtTerm) -> String {
    let mut out = String::new();
    write_term(&mut out, term);
    out
}

fn write_term(out: &mut String, term: &SmtTerm) {
    match term {
        SmtTerm::Var(name) => out.push_str(name),
        SmtTerm::IntLit(n) => {
            if *n < 0 {
                let _ = write!(out, "(- {})", n.unsigned_abs());
            } else {
                let _ = write!(out, "{n}");
            }
        }
        SmtTerm::RealLit(r) => write_real(out, r),
        SmtTerm::BoolLit(b) => out.push_str(if *b { "true" } else { "false" }),
        SmtTerm::StrLit(s) => write_string(out, s),
        SmtTerm::Add(terms) => write_nary(out, "+", terms, "0"),
        SmtTerm::Sub(lhs, rhs) => write_app(out, "-", &[lhs, rhs]),
        SmtTerm::Mul(terms) => write_nary(out, "*", terms, "1"),
        SmtTerm::IntDiv(lhs, rhs) => write_app(out, "div", &[lhs, rhs]),
        SmtTerm::RealDiv(lhs, rhs) => write_app(out, "/", &[lhs, rhs]),
        SmtTerm::Mod(lhs, rhs) => write_app(out, "mod", &[lhs, rhs]),
        SmtTerm::Neg(inner) => write_app(out, "-", &[inner]),
        SmtTerm::Abs(inner) => write_app(out, "abs", &[inner]),
        SmtTerm::Eq(lhs, rhs) => write_app(out, "=", &[lhs, rhs]),
        SmtTerm::Distinct(lhs, rhs) => write_app(out, "distinct", &[lhs, rhs]),
        SmtTerm::Lt(lhs, rhs) => write_app(out, "<", &[lhs, rhs]),
        SmtTerm::Le(lhs, rhs) => write_app(out, "<=", &[lhs, rhs]),
        SmtTerm::Gt(lhs, rhs) => write_app(out, ">", &[lhs, rhs]),
        SmtTerm::Ge(lhs, rhs) => write_app(out, ">=", &[lhs, rhs]),
        SmtTerm::And(terms) => write_nary(out, "and", terms, "true"),
        SmtTerm::Or(terms) => write_nary(out, "or", terms, "false"),
        SmtTerm::Not(inner) => write_app(out, "not", &[inner]),
        SmtTerm::Implies(lhs, rhs) => write_app(out, "=>", &[lhs, rhs]),
        SmtTerm::Xor(lhs, rhs) => write_app(out, "xor", &[lhs, rhs]),
        SmtTerm::ForAll(bindings, body) => write_quantifier(out, "forall", bindings, body),
        SmtTerm::Exists(bindings, body) => write_quantifier(out, "exists", bindings, body),
        SmtTerm::Let(bindings, body) => {
            out.push_str("(let (");
            for (i, (name, value)) in bindings.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                let _ = write!(out, "({name} ");
                write_term(out, value);
                out.push(')');
            }
            out.push_str(") ");
            write_term(out, body);
            out.push(')');
        }
        SmtTerm::Ite(cond, then, els) => write_app(out, "ite", &[cond, then, els]),
        SmtTerm::Select(array, index) => write_app(out, "select", &[array, index]),
        SmtTerm::Store(array, index, value) => write_app(out, "store", &[array, index, value]),
    }
}

fn write_app(out: &mut String, head: &str, args: &[&Box<SmtTerm>]) {
    let _ = write!(out, "({head}");
    for arg in args {
        out.push(' ');
        write_term(out, arg);
    }
    out.push(')');
}

/// N-ary application; a single operand prints bare and none prints `empty`.
fn write_nary(out: &mut String, head: &str, terms: &[SmtTerm], empty: &str) {
    match terms {
        [] => out.push_str(empty),
        [only] => write_term(out, only),
        _ => {
            let _ = write!(out, "({head}");
            for term in terms {
                out.push(' ');
                write_term(out, term);
            }
            out.push(')');
        }
    }
}

fn write_quantifier(out: &mut String, head: &str, bindings: &[(String, SmtSort)], body: &SmtTerm) {
    let _ = write!(out, "({head} (");
    for (i, (name, sort)) in bindings.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "({name} {sort})");
    }
    out.push_str(") ");
    write_term(out, body);
    out.push(')');
}

/// Real constants are printed as decimals when exact, otherwise as `(/ n d)`.
fn write_real(out: &mut String, value: &BigRational) {
    let magnitude = value.abs();
    let decimal = format_rational(&magnitude);
    let body = if decimal.contains('/') {
        format!("(/ {}.0 {}.0)", magnitude.numer(), magnitude.denom())
    } else {
        decimal
    };
    if value.is_negative() {
        let _ = write!(out, "(- {body})");
    } else {
        out.push_str(&body);
    }
}

/// SMT-LIB 2.6 string literal: `"` doubles, anything outside printable
/// ASCII (and the backslash) becomes a `\u{..}` escape.
fn write_string(out: &mut String, s: &str) {
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\"\""),
            '\\' => out.push_str("\\u{5c}"),
            ' '..='~' => out.push(ch),
            other => {
                let _ = write!(out, "\\u{{{:x}}}", other as u32);
            }
        }
    }
    out.push('"');
}

/// Print a sort as SMT-LIB2 format.
pub fn sort_to_smtlib(sort: &SmtSort) -> String {
    sort.to_string()
}
