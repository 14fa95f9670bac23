//! SMT-LIB solver run as a subprocess.
//!
//! Commands are buffered and every check runs a fresh solver process over
//! the whole script, so a hung or crashed solver never poisons later calls.
//! A wall-clock guard kills the process if the solver ignores its own
//! timeout flag.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use num::bigint::BigInt;
use num::rational::BigRational;
use thiserror::Error;
use tracing::{debug, warn};

use crate::backends::smtlib_printer::to_smtlib;
use crate::compiler::LOGIC;
use crate::solver::{Model, ModelValue, SatResult, SmtSolver, SolverError};
use crate::sorts::SmtSort;
use crate::terms::SmtTerm;

/// Extra wall-clock time granted beyond the solver's own timeout.
const KILL_GRACE: Duration = Duration::from_millis(500);
const POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Z3,
    Cvc5,
}

impl Dialect {
    pub fn default_command(self) -> &'static str {
        match self {
            Dialect::Z3 => "z3",
            Dialect::Cvc5 => "cvc5",
        }
    }

    fn args(self, timeout: Duration) -> Vec<String> {
        let ms = timeout.as_millis().max(1);
        match self {
            Dialect::Z3 => vec!["-in".into(), "-smt2".into(), format!("-t:{ms}")],
            Dialect::Cvc5 => vec![
                "--lang".into(),
                "smt2".into(),
                "--produce-models".into(),
                format!("--tlimit-per={ms}"),
            ],
        }
    }
}

#[derive(Debug, Error)]
pub enum ProcessSolverError {
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("solver I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("solver killed after {0:?} without answering")]
    Killed(Duration),
    #[error("solver error: {0}")]
    Solver(String),
    #[error("failed to parse solver output: {0}")]
    Parse(String),
}

impl From<ProcessSolverError> for SolverError {
    fn from(err: ProcessSolverError) -> Self {
        match err {
            ProcessSolverError::Killed(_) => SolverError::Timeout(err.to_string()),
            other => SolverError::Internal(other.to_string()),
        }
    }
}

pub struct SmtLibProcessSolver {
    dialect: Dialect,
    command: String,
    timeout: Duration,
    commands: Vec<String>,
}

impl SmtLibProcessSolver {
    pub fn new(dialect: Dialect, timeout: Duration) -> Self {
        Self::with_command(dialect, dialect.default_command(), timeout)
    }

    pub fn with_command(dialect: Dialect, command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            dialect,
            command: command.into(),
            timeout,
            commands: Vec::new(),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Script for one check: buffered commands followed by the queries.
    fn script(&self, var_names: &[(&str, &SmtSort)]) -> String {
        let mut script = String::new();
        script.push_str("(set-option :produce-models true)\n");
        script.push_str(&format!("(set-logic {LOGIC})\n"));
        for cmd in &self.commands {
            script.push_str(cmd);
            script.push('\n');
        }
        script.push_str("(check-sat)\n");
        if !var_names.is_empty() {
            let names: Vec<&str> = var_names.iter().map(|(name, _)| *name).collect();
            script.push_str(&format!("(get-value ({}))\n", names.join(" ")));
        }
        script.push_str("(get-info :reason-unknown)\n");
        script.push_str("(exit)\n");
        script
    }

    fn run(&self, script: &str) -> Result<String, ProcessSolverError> {
        let started = Instant::now();
        let mut child = Command::new(&self.command)
            .args(self.dialect.args(self.timeout))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ProcessSolverError::Spawn {
                command: self.command.clone(),
                source,
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ProcessSolverError::Solver("failed to capture solver stdin".into()))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProcessSolverError::Solver("failed to capture solver stdout".into()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| ProcessSolverError::Solver("failed to capture solver stderr".into()))?;

        let out_reader = thread::spawn(move || {
            let mut buf = String::new();
            stdout.read_to_string(&mut buf).map(|_| buf)
        });
        let err_reader = thread::spawn(move || {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf);
            buf
        });

        // Written from its own thread so a solver that stops reading cannot
        // block us past the deadline. An early exit surfaces below through
        // the exit status.
        let payload = script.to_owned();
        let writer = thread::spawn(move || {
            if let Err(e) = stdin.write_all(payload.as_bytes()) {
                debug!(error = %e, "solver closed stdin early");
            }
        });

        let deadline = started + self.timeout + KILL_GRACE;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break Some(status);
            }
            if Instant::now() >= deadline {
                warn!(command = %self.command, "solver exceeded wall-clock budget, killing");
                let _ = child.kill();
                let _ = child.wait();
                break None;
            }
            thread::sleep(POLL_INTERVAL);
        };

        let _ = writer.join();
        let stdout = out_reader
            .join()
            .map_err(|_| ProcessSolverError::Solver("stdout reader panicked".into()))??;
        let stderr = err_reader.join().unwrap_or_default();
        debug!(
            command = %self.command,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "solver finished"
        );

        match status {
            None => Err(ProcessSolverError::Killed(started.elapsed())),
            Some(_) if stdout.trim().is_empty() => Err(ProcessSolverError::Solver(format!(
                "no output from solver; stderr: {}",
                stderr.trim()
            ))),
            Some(_) => Ok(stdout),
        }
    }
}

impl SmtSolver for SmtLibProcessSolver {
    type Error = ProcessSolverError;

    fn declare_var(&mut self, name: &str, sort: &SmtSort) -> Result<(), Self::Error> {
        self.commands.push(format!("(declare-const {name} {sort})"));
        Ok(())
    }

    fn assert(&mut self, term: &SmtTerm) -> Result<(), Self::Error> {
        self.commands.push(format!("(assert {})", to_smtlib(term)));
        Ok(())
    }

    fn push(&mut self) -> Result<(), Self::Error> {
        self.commands.push("(push 1)".into());
        Ok(())
    }

    fn pop(&mut self) -> Result<(), Self::Error> {
        self.commands.push("(pop 1)".into());
        Ok(())
    }

    fn check_sat(&mut self) -> Result<SatResult, Self::Error> {
        self.check_sat_with_model(&[]).map(|(result, _)| result)
    }

    fn check_sat_with_model(
        &mut self,
        var_names: &[(&str, &SmtSort)],
    ) -> Result<(SatResult, Option<Model>), Self::Error> {
        let output = self.run(&self.script(var_names))?;
        parse_response(&output, var_names)
    }

    fn reset(&mut self) -> Result<(), Self::Error> {
        self.commands.clear();
        Ok(())
    }
}

/// Interpret the output of `(check-sat) (get-value ..) (get-info :reason-unknown)`.
pub(crate) fn parse_response(
    output: &str,
    var_names: &[(&str, &SmtSort)],
) -> Result<(SatResult, Option<Model>), ProcessSolverError> {
    let items = read_sexprs(output)?;
    let mut items = items.into_iter();
    let verdict = items
        .next()
        .ok_or_else(|| ProcessSolverError::Parse("empty output".into()))?;

    let rest: Vec<Sexpr> = items.collect();
    match verdict {
        Sexpr::Atom(ref a) if a == "sat" => {
            let mut values = BTreeMap::new();
            if let Some(bindings) = rest.iter().find_map(value_bindings) {
                for (name, value) in bindings {
                    if let Some((_, sort)) = var_names.iter().find(|(n, _)| *n == name) {
                        values.insert(name.to_string(), model_value(value, sort));
                    }
                }
            }
            Ok((SatResult::Sat, Some(Model { values })))
        }
        Sexpr::Atom(ref a) if a == "unsat" => Ok((SatResult::Unsat, None)),
        Sexpr::Atom(ref a) if a == "unknown" || a == "timeout" => {
            let reason = rest
                .iter()
                .find_map(reason_unknown)
                .unwrap_or_else(|| a.clone());
            Ok((SatResult::Unknown(reason), None))
        }
        Sexpr::List(ref items) if is_error(items) => {
            Err(ProcessSolverError::Solver(verdict.to_string()))
        }
        other => Err(ProcessSolverError::Parse(format!(
            "unexpected check-sat answer `{other}`"
        ))),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Sexpr {
    Atom(String),
    List(Vec<Sexpr>),
}

impl std::fmt::Display for Sexpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Sexpr::Atom(a) => write!(f, "{a}"),
            Sexpr::List(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Top-level s-expressions in solver output. Iterative, so deeply nested
/// model values cannot overflow the stack.
pub(crate) fn read_sexprs(text: &str) -> Result<Vec<Sexpr>, ProcessSolverError> {
    let mut stack: Vec<Vec<Sexpr>> = vec![Vec::new()];
    let mut chars = text.char_indices().peekable();

    while let Some((_, ch)) = chars.next() {
        match ch {
            c if c.is_whitespace() => {}
            ';' => {
                for (_, c) in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
            }
            '(' => stack.push(Vec::new()),
            ')' => {
                if stack.len() < 2 {
                    return Err(ProcessSolverError::Parse("unbalanced ')'".into()));
                }
                let list = stack.pop().unwrap_or_default();
                if let Some(parent) = stack.last_mut() {
                    parent.push(Sexpr::List(list));
                }
            }
            '"' => {
                // SMT-LIB strings escape `"` by doubling it.
                let mut lit = String::from('"');
                loop {
                    match chars.next() {
                        Some((_, '"')) => {
                            if matches!(chars.peek(), Some((_, '"'))) {
                                chars.next();
                                lit.push_str("\"\"");
                            } else {
                                lit.push('"');
                                break;
                            }
                        }
                        Some((_, c)) => lit.push(c),
                        None => return Err(ProcessSolverError::Parse("unterminated string".into())),
                    }
                }
                push_atom(&mut stack, lit);
            }
            '|' => {
                let mut sym = String::new();
                loop {
                    match chars.next() {
                        Some((_, '|')) => break,
                        Some((_, c)) => sym.push(c),
                        None => return Err(ProcessSolverError::Parse("unterminated symbol".into())),
                    }
                }
                push_atom(&mut stack, sym);
            }
            c => {
                let mut atom = String::from(c);
                while let Some(&(_, next)) = chars.peek() {
                    if next.is_whitespace() || matches!(next, '(' | ')' | '"' | '|' | ';') {
                        break;
                    }
                    atom.push(next);
                    chars.next();
                }
                push_atom(&mut stack, atom);
            }
        }
    }
    if stack.len() != 1 {
        return Err(ProcessSolverError::Parse("unbalanced '('".into()));
    }
    Ok(stack.pop().unwrap_or_default())
}

fn push_atom(stack: &mut [Vec<Sexpr>], atom: String) {
    if let Some(top) = stack.last_mut() {
        top.push(Sexpr::Atom(atom));
    }
}

fn is_error(items: &[Sexpr]) -> bool {
    matches!(items.first(), Some(Sexpr::Atom(head)) if head == "error")
}

/// `((x 6) (y 9))` as name/value pairs.
fn value_bindings(expr: &Sexpr) -> Option<Vec<(&str, &Sexpr)>> {
    let Sexpr::List(pairs) = expr else {
        return None;
    };
    if pairs.is_empty() || is_error(pairs) {
        return None;
    }
    pairs
        .iter()
        .map(|pair| match pair {
            Sexpr::List(kv) if kv.len() == 2 => match &kv[0] {
                Sexpr::Atom(name) => Some((name.as_str(), &kv[1])),
                Sexpr::List(_) => None,
            },
            _ => None,
        })
        .collect()
}

fn reason_unknown(expr: &Sexpr) -> Option<String> {
    let Sexpr::List(items) = expr else {
        return None;
    };
    match items.as_slice() {
        [Sexpr::Atom(key), value] if key == ":reason-unknown" => {
            Some(value.to_string().trim_matches('"').to_string())
        }
        _ => None,
    }
}

fn model_value(value: &Sexpr, sort: &SmtSort) -> ModelValue {
    let parsed = match sort {
        SmtSort::Int => parse_int(value).map(ModelValue::Int),
        SmtSort::Real => parse_real(value).map(ModelValue::Real),
        SmtSort::Bool => match value {
            Sexpr::Atom(a) if a == "true" => Some(ModelValue::Bool(true)),
            Sexpr::Atom(a) if a == "false" => Some(ModelValue::Bool(false)),
            _ => None,
        },
        SmtSort::String => match value {
            Sexpr::Atom(a) if a.len() >= 2 && a.starts_with('"') && a.ends_with('"') => Some(
                ModelValue::Str(a[1..a.len() - 1].replace("\"\"", "\"")),
            ),
            _ => None,
        },
        SmtSort::Array(..) => None,
    };
    parsed.unwrap_or_else(|| ModelValue::Raw(value.to_string()))
}

/// `6`, `(- 7)`.
fn parse_int(value: &Sexpr) -> Option<BigInt> {
    match value {
        Sexpr::Atom(a) => a.parse().ok(),
        Sexpr::List(items) => match items.as_slice() {
            [Sexpr::Atom(minus), inner] if minus == "-" => parse_int(inner).map(|n| -n),
            _ => None,
        },
    }
}

/// `2.5`, `(- 2.5)`, `(/ 1.0 3.0)`, `(- (/ 1 3))`, or an integer.
fn parse_real(value: &Sexpr) -> Option<BigRational> {
    match value {
        Sexpr::Atom(a) => parse_decimal(a),
        Sexpr::List(items) => match items.as_slice() {
            [Sexpr::Atom(minus), inner] if minus == "-" => parse_real(inner).map(|r| -r),
            [Sexpr::Atom(slash), num, den] if slash == "/" => {
                let num = parse_real(num)?;
                let den = parse_real(den)?;
                if num::Zero::is_zero(&den) {
                    None
                } else {
                    Some(num / den)
                }
            }
            _ => None,
        },
    }
}

fn parse_decimal(text: &str) -> Option<BigRational> {
    match text.split_once('.') {
        None => text.parse::<BigInt>().ok().map(BigRational::from_integer),
        Some((int, frac)) => {
            if frac.is_empty() || !frac.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            let numer: BigInt = format!("{int}{frac}").parse().ok()?;
            let denom = num::pow(BigInt::from(10), frac.len());
            Some(BigRational::new(numer, denom))
        }
    }
}
