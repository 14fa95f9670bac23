//! Token-level SQL firewall.
//!
//! Queries are split into tokens (never executed) and checked for
//! destructive or administrative statements, stacked statements, access to
//! sensitive columns, always-true predicates and comment sequences. With a
//! schema, referenced tables must be declared by a `CREATE TABLE`.

use std::collections::BTreeSet;

use regex::Regex;

use crate::artifact::{Artifact, ArtifactKind};
use crate::engine::{EngineFault, VerificationEngine};
use crate::format::rejected;
use crate::result::{EngineDetail, EngineStatus, EngineVerdict, Issue, Severity};

const DESTRUCTIVE: &[&str] = &[
    "DROP", "DELETE", "UPDATE", "INSERT", "ALTER", "TRUNCATE", "CREATE", "MERGE", "REPLACE",
    "UPSERT", "RENAME",
];

const ADMINISTRATIVE: &[&str] = &[
    "GRANT", "REVOKE", "SET", "BEGIN", "COMMIT", "ROLLBACK", "SAVEPOINT", "START", "EXEC",
    "EXECUTE", "CALL", "SHUTDOWN", "ATTACH", "DETACH", "PRAGMA", "COPY", "LOAD", "VACUUM", "KILL",
];

const SENSITIVE_COLUMNS: &[&str] = &[
    "password",
    "password_hash",
    "passwd",
    "pwd",
    "secret",
    "secret_key",
    "api_key",
    "token",
    "ssn",
    "social_security",
    "salary",
    "credit_card",
    "bank_account",
    "balance",
];

/// Confidence of a clean verdict when only warnings were raised.
const WARNING_CONFIDENCE: f64 = 0.7;

#[derive(Debug, Clone, PartialEq, Eq)]
enum TokenKind {
    Word,
    QuotedIdent,
    Number,
    Str,
    Comment,
    Punct,
    /// A quote with no closing partner.
    Unterminated,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    text: String,
    line: usize,
}

impl Token {
    fn is_word(&self, upper: &str) -> bool {
        self.kind == TokenKind::Word && self.text.eq_ignore_ascii_case(upper)
    }

    fn is_punct(&self, punct: &str) -> bool {
        self.kind == TokenKind::Punct && self.text == punct
    }

    fn upper(&self) -> String {
        self.text.to_ascii_uppercase()
    }

    /// Normalized form used to compare operands of `=`.
    fn operand_key(&self) -> Option<String> {
        match self.kind {
            TokenKind::Number | TokenKind::Str => Some(self.text.clone()),
            TokenKind::Word | TokenKind::QuotedIdent => self.identifier(),
            _ => None,
        }
    }

    /// Bare or quoted identifier text, lowercased.
    fn identifier(&self) -> Option<String> {
        match self.kind {
            TokenKind::Word => Some(self.text.to_ascii_lowercase()),
            TokenKind::QuotedIdent => Some(unqualified(&self.text)),
            _ => None,
        }
    }
}

pub struct SqlSafetyEngine {
    lexer: Regex,
    create_table: Regex,
}

impl SqlSafetyEngine {
    pub const ID: &'static str = "sql-safety";

    pub fn new() -> Result<Self, regex::Error> {
        let lexer = Regex::new(concat!(
            r"(?s)(?P<comment>--[^\n]*|/\*.*?(?:\*/|$)|#[^\n]*)",
            r#"|(?P<str>'(?:[^']|'')*')"#,
            r#"|(?P<qident>"(?:[^"]|"")*"|`[^`]*`)"#,
            r#"|(?P<unterminated>['"`])"#,
            r"|(?P<num>\d+(?:\.\d+)?)",
            r"|(?P<word>[A-Za-z_][A-Za-z0-9_$]*)",
            r"|(?P<punct><>|!=|<=|>=|\|\||\S)",
        ))?;
        let create_table = Regex::new(
            r#"(?i)\bcreate\s+(?:temporary\s+|temp\s+)?table\s+(?:if\s+not\s+exists\s+)?([A-Za-z_"`][\w".`]*)"#,
        )?;
        Ok(Self {
            lexer,
            create_table,
        })
    }

    fn tokenize(&self, query: &str) -> Vec<Token> {
        let mut tokens = Vec::new();
        let (mut line, mut scanned) = (1, 0);
        for caps in self.lexer.captures_iter(query) {
            let Some(whole) = caps.get(0) else { continue };
            line += query[scanned..whole.start()].matches('\n').count();
            scanned = whole.start();
            let kind = if caps.name("comment").is_some() {
                TokenKind::Comment
            } else if caps.name("str").is_some() {
                TokenKind::Str
            } else if caps.name("qident").is_some() {
                TokenKind::QuotedIdent
            } else if caps.name("unterminated").is_some() {
                TokenKind::Unterminated
            } else if caps.name("num").is_some() {
                TokenKind::Number
            } else if caps.name("word").is_some() {
                TokenKind::Word
            } else {
                TokenKind::Punct
            };
            tokens.push(Token {
                kind,
                text: whole.as_str().to_string(),
                line,
            });
        }
        tokens
    }

    /// Table names declared by `CREATE TABLE`, lowercased, schema prefix dropped.
    fn schema_tables(&self, schema: &str) -> BTreeSet<String> {
        self.create_table
            .captures_iter(schema)
            .filter_map(|caps| caps.get(1))
            .map(|name| unqualified(name.as_str()))
            .collect()
    }

    pub fn analyze(&self, query: &str, schema: Option<&str>, allow_mutation: bool) -> Vec<Issue> {
        let tokens = self.tokenize(query);
        let mut issues = Vec::new();

        if let Some(tok) = tokens.iter().find(|t| t.kind == TokenKind::Unterminated) {
            issues.push(
                Issue::new(Severity::Critical, "syntax", "unterminated quoted literal")
                    .at_line(tok.line),
            );
        }
        for tok in tokens.iter().filter(|t| t.kind == TokenKind::Comment) {
            issues.push(
                Issue::new(
                    Severity::Warning,
                    "comment",
                    "comment sequence in query; comments are a common injection vector",
                )
                .at_line(tok.line),
            );
        }

        let code: Vec<&Token> = tokens
            .iter()
            .filter(|t| t.kind != TokenKind::Comment)
            .collect();
        let statements: Vec<&[&Token]> = code
            .split(|t| t.is_punct(";"))
            .filter(|stmt| !stmt.is_empty())
            .collect();
        if statements.len() > 1 {
            issues.push(Issue::new(
                Severity::Critical,
                "stacked-statements",
                format!(
                    "{} statements in one query; only a single statement is allowed",
                    statements.len()
                ),
            ));
        }

        for statement in &statements {
            check_commands(statement, allow_mutation, &mut issues);
        }
        check_sensitive_columns(&code, &mut issues);
        check_tautologies(&code, &mut issues);
        if let Some(schema) = schema {
            self.check_schema(&statements, schema, &mut issues);
        }
        issues
    }

    fn check_schema(&self, statements: &[&[&Token]], schema: &str, issues: &mut Vec<Issue>) {
        let known = self.schema_tables(schema);
        if known.is_empty() {
            issues.push(Issue::new(
                Severity::Critical,
                "schema",
                "schema declares no tables",
            ));
            return;
        }
        for statement in statements {
            let ctes = cte_names(statement);
            let mut reported = BTreeSet::new();
            for (tok, table) in referenced_tables(statement) {
                if known.contains(&table) || ctes.contains(&table) || !reported.insert(table.clone())
                {
                    continue;
                }
                issues.push(
                    Issue::new(
                        Severity::Critical,
                        "unknown-table",
                        format!("table '{table}' does not exist in the provided schema"),
                    )
                    .at_line(tok.line),
                );
            }
        }
    }

    fn check(&self, query: &str, schema: Option<&str>, allow_mutation: bool) -> EngineVerdict {
        if query.trim().is_empty() {
            return rejected("sql", "empty query", None);
        }
        let issues = self.analyze(query, schema, allow_mutation);
        issues_verdict(issues)
    }
}

/// Shared by the static safety engines: critical ⇒ blocked, warnings only
/// ⇒ verified at reduced confidence.
pub(crate) fn issues_verdict(issues: Vec<Issue>) -> EngineVerdict {
    let worst = issues.iter().map(|issue| issue.severity).max();
    let (status, confidence) = match worst {
        Some(Severity::Critical) => (EngineStatus::Blocked, 1.0),
        Some(Severity::Warning) => (EngineStatus::Verified, WARNING_CONFIDENCE),
        None => (EngineStatus::Verified, 1.0),
    };
    EngineVerdict::new(status, confidence, EngineDetail::Issues { issues })
}

fn unqualified(name: &str) -> String {
    let last = name.rsplit('.').next().unwrap_or(name);
    last.trim_matches(|c| c == '"' || c == '`').to_ascii_lowercase()
}

/// A statement starting with (or nesting, after `(`) a command keyword.
fn check_commands(statement: &[&Token], allow_mutation: bool, issues: &mut Vec<Issue>) {
    for (i, tok) in statement.iter().enumerate() {
        if tok.kind != TokenKind::Word {
            continue;
        }
        let leading = i == 0 || statement[i - 1].is_punct("(");
        if !leading {
            continue;
        }
        let keyword = tok.upper();
        if !allow_mutation && DESTRUCTIVE.contains(&keyword.as_str()) {
            issues.push(
                Issue::new(
                    Severity::Critical,
                    "destructive-command",
                    format!("destructive command {keyword}; only read queries are allowed"),
                )
                .at_line(tok.line),
            );
        } else if i == 0 && ADMINISTRATIVE.contains(&keyword.as_str()) {
            issues.push(
                Issue::new(
                    Severity::Critical,
                    "administrative-command",
                    format!("administrative command {keyword}"),
                )
                .at_line(tok.line),
            );
        }
    }
}

fn check_sensitive_columns(code: &[&Token], issues: &mut Vec<Issue>) {
    let mut reported = BTreeSet::new();
    for tok in code {
        let Some(name) = tok.identifier() else { continue };
        if SENSITIVE_COLUMNS.contains(&name.as_str()) && reported.insert(name.clone()) {
            issues.push(
                Issue::new(
                    Severity::Critical,
                    "sensitive-column",
                    format!("access to sensitive column '{name}' is forbidden"),
                )
                .at_line(tok.line),
            );
        }
    }
}

fn is_arithmetic(tok: &Token) -> bool {
    tok.kind == TokenKind::Punct && matches!(tok.text.as_str(), "+" | "-" | "*" | "/" | "%" | "." | "||")
}

/// `x = x` between two identical simple operands, and `OR TRUE`.
fn check_tautologies(code: &[&Token], issues: &mut Vec<Issue>) {
    for (i, window) in code.windows(3).enumerate() {
        let (lhs, op, rhs) = (window[0], window[1], window[2]);
        if !op.is_punct("=") {
            continue;
        }
        let extends_left = i > 0 && is_arithmetic(code[i - 1]);
        let extends_right = code.get(i + 3).is_some_and(|next| is_arithmetic(next));
        if extends_left || extends_right {
            continue;
        }
        if let (Some(a), Some(b)) = (lhs.operand_key(), rhs.operand_key()) {
            if a == b {
                issues.push(
                    Issue::new(
                        Severity::Critical,
                        "tautology",
                        format!(
                            "always-true predicate {} = {}; likely injection",
                            lhs.text, rhs.text
                        ),
                    )
                    .at_line(op.line),
                );
            }
        }
    }
    for (i, pair) in code.windows(2).enumerate() {
        let compared = code
            .get(i + 2)
            .is_some_and(|next| next.is_punct("=") || is_arithmetic(next));
        if !compared && pair[0].is_word("OR") && pair[1].is_word("TRUE") {
            issues.push(
                Issue::new(Severity::Critical, "tautology", "OR TRUE predicate; likely injection")
                    .at_line(pair[0].line),
            );
        }
    }
}

/// Names introduced by `WITH name AS (` or `, name AS (`.
fn cte_names(statement: &[&Token]) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    for window in statement.windows(3) {
        if window[1].is_word("AS") && window[2].is_punct("(") {
            if let Some(name) = window[0].identifier() {
                names.insert(name);
            }
        }
    }
    names
}

/// Tables named after `FROM`, `JOIN`, `INTO`, `UPDATE` and `TABLE`,
/// including comma-separated `FROM a, b` lists.
fn referenced_tables<'t>(statement: &[&'t Token]) -> Vec<(&'t Token, String)> {
    let mut tables = Vec::new();
    let mut i = 0;
    while i < statement.len() {
        let tok = statement[i];
        let introduces = ["FROM", "JOIN", "INTO", "UPDATE", "TABLE"]
            .iter()
            .any(|kw| tok.is_word(kw));
        i += 1;
        if !introduces {
            continue;
        }
        let list = tok.is_word("FROM");
        loop {
            let Some(name) = qualified_name(statement, &mut i) else {
                break;
            };
            tables.push((statement[i - 1], name));
            // Skip an alias, with or without AS.
            if statement.get(i).is_some_and(|t| t.is_word("AS")) {
                i += 1;
            }
            if statement
                .get(i)
                .is_some_and(|t| t.identifier().is_some() && !is_clause_keyword(t))
            {
                i += 1;
            }
            if list && statement.get(i).is_some_and(|t| t.is_punct(",")) {
                i += 1;
                continue;
            }
            break;
        }
    }
    tables
}

/// Reads `a` or `schema.a` starting at `*i`, returning the last component.
fn qualified_name(statement: &[&Token], i: &mut usize) -> Option<String> {
    let first = statement.get(*i)?;
    if first.identifier().is_none() || is_clause_keyword(first) {
        return None;
    }
    let mut name = first.identifier()?;
    *i += 1;
    while statement.get(*i).is_some_and(|t| t.is_punct(".")) {
        match statement.get(*i + 1).and_then(|t| t.identifier()) {
            Some(part) => {
                name = part;
                *i += 2;
            }
            None => break,
        }
    }
    Some(name)
}

fn is_clause_keyword(tok: &Token) -> bool {
    const CLAUSES: &[&str] = &[
        "WHERE", "ON", "USING", "JOIN", "INNER", "LEFT", "RIGHT", "FULL", "CROSS", "OUTER",
        "GROUP", "ORDER", "HAVING", "LIMIT", "OFFSET", "UNION", "EXCEPT", "INTERSECT", "SET",
        "VALUES", "SELECT", "NATURAL", "WINDOW", "RETURNING", "LATERAL", "IF",
    ];
    tok.kind == TokenKind::Word && CLAUSES.iter().any(|kw| tok.is_word(kw))
}

impl VerificationEngine for SqlSafetyEngine {
    fn id(&self) -> &str {
        Self::ID
    }

    fn supports(&self, kind: ArtifactKind) -> bool {
        kind == ArtifactKind::Sql
    }

    fn default_weight(&self) -> f64 {
        0.95
    }

    fn verify(&self, artifact: &Artifact) -> Result<EngineVerdict, EngineFault> {
        match artifact {
            Artifact::Sql {
                query,
                schema,
                allow_mutation,
            } => Ok(self.check(query, schema.as_deref(), *allow_mutation)),
            other => Err(EngineFault::Internal(format!(
                "sql engine cannot verify {} artifacts",
                other.kind()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> SqlSafetyEngine {
        SqlSafetyEngine::new().unwrap()
    }

    fn rules(query: &str) -> Vec<String> {
        engine()
            .analyze(query, None, false)
            .into_iter()
            .map(|issue| issue.rule)
            .collect()
    }

    fn verdict(query: &str, schema: Option<&str>, allow_mutation: bool) -> EngineVerdict {
        engine()
            .verify(&Artifact::Sql {
                query: query.into(),
                schema: schema.map(str::to_string),
                allow_mutation,
            })
            .unwrap()
    }

    #[test]
    fn plain_select_is_clean() {
        assert!(rules("SELECT id, name FROM users WHERE age > 21 ORDER BY name").is_empty());
        let v = verdict("SELECT 1", None, false);
        assert_eq!(v.status, EngineStatus::Verified);
        assert_eq!(v.confidence, 1.0);
    }

    #[test]
    fn destructive_commands_are_blocked() {
        for query in [
            "DROP TABLE users",
            "delete from users where id = 4",
            "UPDATE users SET name = 'x'",
            "INSERT INTO logs VALUES (1)",
            "TRUNCATE TABLE audit",
        ] {
            assert!(rules(query).contains(&"destructive-command".to_string()), "{query}");
            assert_eq!(verdict(query, None, false).status, EngineStatus::Blocked);
        }
    }

    #[test]
    fn mutation_can_be_allowed() {
        let v = verdict("INSERT INTO logs (msg) VALUES ('hi')", None, true);
        assert_eq!(v.status, EngineStatus::Verified);
    }

    #[test]
    fn select_for_update_is_not_a_mutation() {
        assert!(rules("SELECT id FROM jobs WHERE done = 0 FOR UPDATE").is_empty());
    }

    #[test]
    fn administrative_commands_are_blocked_even_with_mutation() {
        let v = verdict("GRANT ALL ON users TO mallory", None, true);
        assert_eq!(v.status, EngineStatus::Blocked);
    }

    #[test]
    fn stacked_statements_are_blocked() {
        let found = rules("SELECT * FROM users; DROP TABLE users");
        assert!(found.contains(&"stacked-statements".to_string()));
        assert!(found.contains(&"destructive-command".to_string()));
        assert!(!rules("SELECT * FROM users;").contains(&"stacked-statements".to_string()));
    }

    #[test]
    fn tautologies_are_detected() {
        assert!(rules("SELECT * FROM users WHERE name = '' OR 1=1").contains(&"tautology".into()));
        assert!(rules("SELECT * FROM t WHERE 'a' = 'a'").contains(&"tautology".into()));
        assert!(rules("SELECT * FROM t WHERE id = 5 OR TRUE").contains(&"tautology".into()));
        assert!(rules("SELECT * FROM t WHERE a.id = b.id").is_empty());
        assert!(rules("SELECT * FROM t WHERE x = x + 1").is_empty());
    }

    #[test]
    fn sensitive_columns_are_blocked() {
        let found = rules("SELECT u.Password, email FROM users u");
        assert_eq!(found, vec!["sensitive-column".to_string()]);
    }

    #[test]
    fn comments_only_warn() {
        let v = verdict("SELECT id FROM users -- list ids", None, false);
        assert_eq!(v.status, EngineStatus::Verified);
        assert_eq!(v.confidence, WARNING_CONFIDENCE);
    }

    #[test]
    fn strings_hide_keywords() {
        assert!(rules("SELECT id FROM notes WHERE body = 'DROP TABLE users; --'").is_empty());
    }

    #[test]
    fn unterminated_literal_is_blocked() {
        assert!(rules("SELECT * FROM t WHERE name = 'abc").contains(&"syntax".into()));
    }

    #[test]
    fn schema_checks_referenced_tables() {
        let schema = "CREATE TABLE users (id INT, name TEXT);\nCREATE TABLE IF NOT EXISTS public.orders (id INT);";
        let ok = verdict(
            "SELECT u.name FROM users u JOIN orders o ON o.id = u.id",
            Some(schema),
            false,
        );
        assert_eq!(ok.status, EngineStatus::Verified);

        let missing = engine().analyze("SELECT * FROM users, invoices", Some(schema), false);
        assert_eq!(missing.len(), 1);
        assert!(missing[0].message.contains("invoices"));

        let with_cte = engine().analyze(
            "WITH recent AS (SELECT * FROM orders) SELECT * FROM recent",
            Some(schema),
            false,
        );
        assert!(with_cte.is_empty(), "{with_cte:?}");
    }

    #[test]
    fn empty_query_is_rejected() {
        let v = verdict("   ", None, false);
        assert_eq!(v.status, EngineStatus::Error);
    }
}
