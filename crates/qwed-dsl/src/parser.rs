//! Reader for `expr := atom | "(" operator expr* ")"`, driven by the pest
//! grammar in `grammar.pest`.
//!
//! Paren nesting is measured by a flat scan before the grammar runs, so
//! hostile nesting is rejected instead of exhausting the stack. Atoms the
//! grammar accepts are then classified here: operator names are looked up
//! in the closed table, integers must fit `i64`, and decimals are kept as
//! exact rationals.

use num::bigint::BigInt;
use num::rational::BigRational;
use num::traits::Pow;
use pest::error::{ErrorVariant, InputLocation};
use pest::Parser;
use pest_derive::Parser;
use serde::{Deserialize, Serialize};

use crate::ast::{Atom, Expr, Span};
use crate::errors::ParseError;
use crate::operator::OperatorKind;

#[derive(Parser)]
#[grammar = "grammar.pest"]
struct ConstraintParser;

type Pair<'a> = pest::iterators::Pair<'a, Rule>;

/// Hard upper bound on `max_depth`, independent of configuration.
pub const MAX_DEPTH_CEILING: usize = 512;

/// Resource bounds applied while parsing and validating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub max_input_bytes: usize,
    pub max_depth: usize,
    pub max_nodes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_input_bytes: 100 * 1024,
            max_depth: 64,
            max_nodes: 5_000,
        }
    }
}

/// Parse with the default [`Limits`].
pub fn parse(source: &str) -> Result<Expr, ParseError> {
    parse_with_limits(source, &Limits::default())
}

pub fn parse_with_limits(source: &str, limits: &Limits) -> Result<Expr, ParseError> {
    if source.len() > limits.max_input_bytes {
        return Err(ParseError::InputTooLarge {
            size: source.len(),
            limit: limits.max_input_bytes,
        });
    }
    let max_depth = limits.max_depth.min(MAX_DEPTH_CEILING);
    check_nesting(source, max_depth)?;

    let pairs = ConstraintParser::parse(Rule::input, source)
        .map_err(|e| syntax_error(source, &e))?;
    let root = pairs
        .into_iter()
        .next()
        .and_then(|input| input.into_inner().next())
        .filter(|pair| pair.as_rule() != Rule::EOI)
        .ok_or_else(|| ParseError::syntax(Span::point(source.len()), "expression", "end of input"))?;
    build(root, 1, max_depth)
}

fn span_from(pair: &Pair<'_>) -> Span {
    let s = pair.as_span();
    Span::new(s.start(), s.end())
}

/// Flat scan for paren depth, skipping strings and comments. Also reports
/// an unterminated string at end of input.
fn check_nesting(source: &str, max_depth: usize) -> Result<(), ParseError> {
    let mut depth = 0usize;
    let mut chars = source.char_indices();
    while let Some((at, ch)) = chars.next() {
        match ch {
            '(' => {
                depth += 1;
                if depth > max_depth {
                    return Err(ParseError::DepthExceeded {
                        limit: max_depth,
                        position: at,
                        span: Span::new(at, at + 1).into(),
                    });
                }
            }
            ')' => depth = depth.saturating_sub(1),
            ';' => {
                if !chars.any(|(_, c)| c == '\n') {
                    return Ok(());
                }
            }
            '"' => loop {
                match chars.next() {
                    Some((_, '"')) => break,
                    Some((_, '\\')) => {
                        chars.next();
                    }
                    Some(_) => {}
                    None => {
                        return Err(ParseError::syntax(
                            Span::point(source.len()),
                            "closing '\"'",
                            "end of input",
                        ))
                    }
                }
            },
            _ => {}
        }
    }
    Ok(())
}

fn syntax_error(source: &str, error: &pest::error::Error<Rule>) -> ParseError {
    let position = match error.location {
        InputLocation::Pos(p) => p,
        InputLocation::Span((s, _)) => s,
    };
    let expected = match &error.variant {
        ErrorVariant::ParsingError { positives, .. } => expected_from(positives),
        ErrorVariant::CustomError { message } => message.clone(),
    };
    ParseError::syntax(Span::point(position), expected, found_at(source, position))
}

fn expected_from(rules: &[Rule]) -> String {
    let mut labels: Vec<&str> = Vec::new();
    for rule in rules {
        let label = match rule {
            Rule::EOI => "end of input",
            Rule::operator => "operator",
            _ => "expression",
        };
        if !labels.contains(&label) {
            labels.push(label);
        }
    }
    if labels.is_empty() {
        return "expression".into();
    }
    labels.join(" or ")
}

fn found_at(source: &str, position: usize) -> String {
    let rest = source.get(position..).unwrap_or("");
    match rest.chars().next() {
        None => "end of input".into(),
        Some('(') => "'('".into(),
        Some(')') => "')'".into(),
        Some('"') => "string literal".into(),
        Some(_) => {
            let end = rest.find(is_delimiter).unwrap_or(rest.len());
            format!("'{}'", &rest[..end])
        }
    }
}

fn is_delimiter(ch: char) -> bool {
    ch.is_whitespace() || matches!(ch, '(' | ')' | '"' | ';')
}

fn build(pair: Pair<'_>, depth: usize, max_depth: usize) -> Result<Expr, ParseError> {
    let span = span_from(&pair);
    if depth > max_depth {
        return Err(ParseError::DepthExceeded {
            limit: max_depth,
            position: span.start,
            span: span.into(),
        });
    }
    match pair.as_rule() {
        Rule::compound => {
            let mut inner = pair.into_inner();
            let head = inner
                .next()
                .ok_or_else(|| ParseError::syntax(span, "operator", "')'"))?;
            let operator =
                OperatorKind::lookup(head.as_str()).ok_or_else(|| ParseError::UnknownOperator {
                    name: head.as_str().to_string(),
                    position: head.as_span().start(),
                    span: span_from(&head).into(),
                })?;
            let operands = inner
                .map(|operand| build(operand, depth + 1, max_depth))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Expr::compound(operator, operands, span))
        }
        Rule::number => Ok(Expr::atom(number(pair.as_str(), span)?, span)),
        Rule::string => Ok(Expr::atom(Atom::Str(string_value(pair, span)?), span)),
        Rule::identifier => identifier_atom(pair.as_str(), span),
        Rule::symbol => Err(misplaced_operator(pair.as_str(), span)),
        _ => Err(malformed(pair.as_str(), span)),
    }
}

fn identifier_atom(name: &str, span: Span) -> Result<Expr, ParseError> {
    if name.eq_ignore_ascii_case("true") {
        return Ok(Expr::atom(Atom::Bool(true), span));
    }
    if name.eq_ignore_ascii_case("false") {
        return Ok(Expr::atom(Atom::Bool(false), span));
    }
    if OperatorKind::lookup(name).is_some() {
        return Err(misplaced_operator(name, span));
    }
    Ok(Expr::variable(name, span))
}

fn misplaced_operator(name: &str, span: Span) -> ParseError {
    ParseError::syntax(
        span,
        "operand",
        format!("operator '{name}' outside operator position"),
    )
}

fn malformed(text: &str, span: Span) -> ParseError {
    let bytes = text.as_bytes();
    let starts_numeric = bytes.first().is_some_and(u8::is_ascii_digit)
        || (bytes.first() == Some(&b'-') && bytes.get(1).is_some_and(u8::is_ascii_digit));
    let expected = if starts_numeric {
        "numeric literal"
    } else {
        "identifier, number, or operator"
    };
    ParseError::syntax(span, expected, format!("'{text}'"))
}

/// `-?[0-9]+` as `i64`, or `-?[0-9]+\.[0-9]+` as an exact rational.
fn number(text: &str, span: Span) -> Result<Atom, ParseError> {
    let invalid = || ParseError::syntax(span, "numeric literal", format!("'{text}'"));
    let Some((int_part, frac)) = text.split_once('.') else {
        return text
            .parse::<i64>()
            .map(Atom::Int)
            .map_err(|_| ParseError::IntegerOutOfRange {
                literal: text.to_string(),
                position: span.start,
                span: span.into(),
            });
    };
    let numer: BigInt = format!("{int_part}{frac}").parse().map_err(|_| invalid())?;
    let exponent = u32::try_from(frac.len()).map_err(|_| invalid())?;
    let denom = BigInt::from(10u32).pow(exponent);
    Ok(Atom::Real(BigRational::new(numer, denom)))
}

fn string_value(pair: Pair<'_>, span: Span) -> Result<String, ParseError> {
    let Some(content) = pair.into_inner().next() else {
        return Ok(String::new());
    };
    let base = content.as_span().start();
    let body = content.as_str();
    let mut value = String::with_capacity(body.len());
    let mut chars = body.char_indices();
    while let Some((offset, ch)) = chars.next() {
        if ch != '\\' {
            value.push(ch);
            continue;
        }
        let Some((_, escaped)) = chars.next() else {
            return Err(ParseError::syntax(span, "escape character", "end of string"));
        };
        match escaped {
            '"' => value.push('"'),
            '\\' => value.push('\\'),
            'n' => value.push('\n'),
            't' => value.push('\t'),
            other => {
                let at = base + offset;
                return Err(ParseError::syntax(
                    Span::new(at, at + 1 + other.len_utf8()),
                    "one of \\\" \\\\ \\n \\t",
                    format!("'\\{other}'"),
                ));
            }
        }
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(max_depth: usize) -> Limits {
        Limits {
            max_depth,
            ..Limits::default()
        }
    }

    fn atom(src: &str) -> Atom {
        parse(src)
            .expect("should parse")
            .as_atom()
            .cloned()
            .expect("an atom")
    }

    #[test]
    fn parses_nested_compound() {
        let expr = parse("(AND (GT x 5) (LT y 10))").expect("should parse");
        assert_eq!(expr.operator(), Some(OperatorKind::And));
        assert_eq!(expr.operands().len(), 2);
        assert_eq!(expr.to_string(), "(AND (GT x 5) (LT y 10))");
        assert_eq!(expr.span, Span::new(0, 24));
    }

    #[test]
    fn aliases_and_case_normalise_to_canonical_names() {
        let expr = parse("(and (>= x 1) (not flag))").expect("should parse");
        assert_eq!(expr.to_string(), "(AND (GE x 1) (NOT flag))");
    }

    #[test]
    fn bool_literals_any_case() {
        let expr = parse("(OR TRUE false)").expect("should parse");
        assert_eq!(expr.operands()[0].as_atom(), Some(&Atom::Bool(true)));
        assert_eq!(expr.operands()[1].as_atom(), Some(&Atom::Bool(false)));
    }

    #[test]
    fn bare_atom_is_an_expression() {
        let expr = parse("  x ").expect("should parse");
        assert_eq!(expr.as_variable(), Some("x"));
    }

    #[test]
    fn unknown_operator_is_not_a_variable() {
        let err = parse("(EVAL x)").unwrap_err();
        assert!(matches!(
            err,
            ParseError::UnknownOperator { ref name, position: 1, .. } if name == "EVAL"
        ));
        let err = parse("(__import__ \"os\")").unwrap_err();
        assert!(matches!(err, ParseError::UnknownOperator { .. }));
    }

    #[test]
    fn operator_name_in_operand_position_is_rejected() {
        let err = parse("(GT AND 1)").unwrap_err();
        assert!(matches!(err, ParseError::Syntax { position: 4, .. }));
        let err = parse("(GT >= 1)").unwrap_err();
        assert!(matches!(err, ParseError::Syntax { position: 4, .. }));
    }

    #[test]
    fn unterminated_input_reports_end_of_input() {
        let src = "(AND (GT x 5)";
        let err = parse(src).unwrap_err();
        assert_eq!(err.position(), Some(src.len()));
        assert!(err.to_string().contains("found end of input"));
    }

    #[test]
    fn empty_input_is_a_syntax_error() {
        let err = parse("   ").unwrap_err();
        assert!(matches!(err, ParseError::Syntax { position: 3, .. }));
        let err = parse("; only a comment").unwrap_err();
        assert!(matches!(err, ParseError::Syntax { .. }));
    }

    #[test]
    fn unbalanced_close_paren() {
        let err = parse("(NOT x))").unwrap_err();
        assert!(matches!(
            err,
            ParseError::Syntax { ref expected, position: 7, .. } if expected == "end of input"
        ));
    }

    #[test]
    fn head_must_be_operator() {
        let err = parse("((GT x 1))").unwrap_err();
        assert!(matches!(err, ParseError::Syntax { ref expected, .. } if expected == "operator"));
        let err = parse("()").unwrap_err();
        assert!(matches!(err, ParseError::Syntax { ref expected, .. } if expected == "operator"));
    }

    #[test]
    fn input_size_checked_before_parsing() {
        let tight = Limits {
            max_input_bytes: 8,
            ..Limits::default()
        };
        let err = parse_with_limits("(AND a b c d)", &tight).unwrap_err();
        assert_eq!(
            err,
            ParseError::InputTooLarge {
                size: 13,
                limit: 8
            }
        );
    }

    #[test]
    fn depth_limit_enforced() {
        assert!(parse_with_limits("(NOT (NOT x))", &limits(3)).is_ok());
        let err = parse_with_limits("(NOT (NOT (NOT x)))", &limits(3)).unwrap_err();
        assert!(matches!(err, ParseError::DepthExceeded { limit: 3, position: 15, .. }));
        let err = parse_with_limits("(NOT (NOT (NOT (NOT x))))", &limits(3)).unwrap_err();
        assert!(matches!(err, ParseError::DepthExceeded { limit: 3, position: 15, .. }));
    }

    #[test]
    fn parens_in_strings_and_comments_do_not_count_as_nesting() {
        let src = "(EQ s \"((((\") ; ((((\n";
        assert!(parse_with_limits(src, &limits(2)).is_ok());
    }

    #[test]
    fn hostile_nesting_does_not_overflow_stack() {
        let src = format!("{}x{}", "(NOT ".repeat(50_000), ")".repeat(50_000));
        let loose = Limits {
            max_input_bytes: usize::MAX,
            max_depth: usize::MAX,
            max_nodes: usize::MAX,
        };
        let err = parse_with_limits(&src, &loose).unwrap_err();
        assert!(matches!(
            err,
            ParseError::DepthExceeded {
                limit: MAX_DEPTH_CEILING,
                ..
            }
        ));
    }

    #[test]
    fn string_and_real_atoms() {
        let expr = parse("(EQ name \"a b\")").expect("should parse");
        assert_eq!(expr.operands()[1].as_atom(), Some(&Atom::Str("a b".into())));
        let expr = parse("(LT x 2.5)").expect("should parse");
        assert_eq!(expr.to_string(), "(LT x 2.5)");
    }

    #[test]
    fn negative_number_versus_minus_operator() {
        let expr = parse("(- -3 4)").expect("should parse");
        assert_eq!(expr.operands()[0].as_atom(), Some(&Atom::Int(-3)));
        assert_eq!(expr.operands()[1].as_atom(), Some(&Atom::Int(4)));
    }

    #[test]
    fn decimal_literal_is_exact() {
        let expected = BigRational::new(BigInt::from(275), BigInt::from(100));
        assert_eq!(atom("2.75"), Atom::Real(expected));
        let expected = BigRational::new(BigInt::from(-1), BigInt::from(2));
        assert_eq!(atom("-0.5"), Atom::Real(expected));
    }

    #[test]
    fn strict_number_grammar() {
        for bad in ["1.", "1.2.3", "12ab", "1e5", "-1.x", "0x10"] {
            let err = parse(bad).unwrap_err();
            assert!(
                matches!(err, ParseError::Syntax { ref expected, .. } if expected == "numeric literal"),
                "{bad}: {err:?}"
            );
        }
    }

    #[test]
    fn integer_overflow_is_reported() {
        let err = parse("99999999999999999999").unwrap_err();
        assert!(matches!(err, ParseError::IntegerOutOfRange { position: 0, .. }));
    }

    #[test]
    fn comments_and_whitespace_are_skipped() {
        let expr = parse("; leading comment\n  (NOT\tflag) ; trailing").expect("should parse");
        assert_eq!(expr.to_string(), "(NOT flag)");
    }

    #[test]
    fn string_literals_with_escapes() {
        assert_eq!(atom(r#""say \"hi\"\n""#), Atom::Str("say \"hi\"\n".into()));
        let err = parse(r#"(EQ s "a\qb")"#).unwrap_err();
        assert!(matches!(err, ParseError::Syntax { position: 8, ref found, .. } if found == "'\\q'"));
    }

    #[test]
    fn unterminated_string_reports_end_of_input() {
        let err = parse("\"abc").unwrap_err();
        assert_eq!(err.position(), Some(4));
    }

    #[test]
    fn rejects_foreign_characters() {
        let err = parse("(GT x $y)").unwrap_err();
        assert!(matches!(err, ParseError::Syntax { position: 6, .. }));
        let err = parse("(AND __import__('os'))").unwrap_err();
        assert!(matches!(err, ParseError::Syntax { .. }));
    }
}
