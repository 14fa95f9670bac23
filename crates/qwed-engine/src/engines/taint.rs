//! Source-to-sink data flow over Python text.
//!
//! Works on masked source (string and comment bodies blanked), split into
//! logical lines. A name assigned from an untrusted source is tainted;
//! taint flows through plain and augmented assignment until a fixed point.
//! A name assigned straight from a sanitizer call stays clean. A sink call
//! whose arguments hold a tainted name, or call a source directly, is a
//! finding.

use std::collections::{BTreeMap, BTreeSet};

use regex::{Regex, RegexBuilder};

use crate::result::{Issue, Severity};

const ASSIGNMENT: &str = r"\A\s*([A-Za-z_]\w*)\s*(?::[^=\n]+)?(?:[-+*/%|&^@]|//|\*\*|<<|>>)?=([^=].*)?\z";

const SOURCE: &str = r"\b(?:input|raw_input|getpass\.getpass|os\.getenv|os\.environ\.get|sys\.stdin\.read(?:line|lines)?|\w+\.recv(?:from)?|request\.(?:args|form|values|cookies|headers|GET|POST)\.get)\s*\(|\bsys\.argv\b|\bos\.environ\s*\[|\brequest\.(?:data|json|files|args|form|values|GET|POST)\b";

const SANITIZER: &str = r"\A\s*(?:int|float|bool|len|shlex\.quote|html\.escape|markupsafe\.escape|escape|re\.escape|secure_filename|werkzeug\.utils\.secure_filename)\s*\(";

const NAME: &str = r"(?:^|[^\w.])([A-Za-z_]\w*)";

/// `(severity, pattern, what reaching it means)`
const SINKS: &[(Severity, &str, &str)] = &[
    (Severity::Critical, r"\b(?:eval|exec|compile|__import__)\s*\(", "code execution"),
    (Severity::Critical, r"\b(?:os\.(?:system|popen)|subprocess\.(?:call|run|Popen|check_call|check_output|getoutput))\s*\(", "command injection"),
    (Severity::Critical, r"\b(?:pickle\.loads?|marshal\.loads|yaml\.(?:unsafe_)?load)\s*\(", "insecure deserialization"),
    (Severity::Critical, r"\b\w+\.execute(?:many)?\s*\(", "SQL injection"),
    (Severity::Warning, r"\b(?:open|shutil\.(?:copy|move|rmtree)|os\.(?:remove|unlink))\s*\(", "path traversal"),
    (Severity::Warning, r"\b(?:requests\.(?:get|post|put|delete)|urllib\.request\.urlopen)\s*\(", "server-side request forgery"),
];

struct Sink {
    severity: Severity,
    pattern: Regex,
    risk: &'static str,
}

pub(crate) struct TaintRules {
    assignment: Regex,
    source: Regex,
    sanitizer: Regex,
    name: Regex,
    sinks: Vec<Sink>,
}

struct Assignment {
    target: String,
    dependencies: Vec<String>,
    source: Option<String>,
    sanitized: bool,
}

impl TaintRules {
    pub(crate) fn new() -> Result<Self, regex::Error> {
        let sinks = SINKS
            .iter()
            .map(|&(severity, pattern, risk)| {
                Ok(Sink {
                    severity,
                    pattern: Regex::new(pattern)?,
                    risk,
                })
            })
            .collect::<Result<_, regex::Error>>()?;
        Ok(Self {
            assignment: RegexBuilder::new(ASSIGNMENT).dot_matches_new_line(true).build()?,
            source: Regex::new(SOURCE)?,
            sanitizer: Regex::new(SANITIZER)?,
            name: RegexBuilder::new(NAME).multi_line(true).build()?,
            sinks,
        })
    }

    /// Findings for tainted data reaching a sink, in source order.
    pub(crate) fn flows(&self, masked: &str) -> Vec<Issue> {
        let statements = logical_lines(masked);
        let assignments: Vec<Assignment> = statements
            .iter()
            .filter_map(|(_, text)| self.assignment(text))
            .collect();

        let clean: BTreeSet<&str> = assignments
            .iter()
            .filter(|a| a.sanitized)
            .map(|a| a.target.as_str())
            .collect();
        let mut tainted: BTreeMap<&str, String> = BTreeMap::new();
        for assignment in &assignments {
            if let Some(source) = &assignment.source {
                if !clean.contains(assignment.target.as_str()) {
                    tainted
                        .entry(assignment.target.as_str())
                        .or_insert_with(|| source.clone());
                }
            }
        }
        loop {
            let mut changed = false;
            for assignment in &assignments {
                let target = assignment.target.as_str();
                if clean.contains(target) || tainted.contains_key(target) {
                    continue;
                }
                let inherited = assignment
                    .dependencies
                    .iter()
                    .find_map(|dep| tainted.get(dep.as_str()).cloned());
                if let Some(source) = inherited {
                    tainted.insert(target, source);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        let mut issues = Vec::new();
        for (first_line, text) in &statements {
            for sink in &self.sinks {
                for found in sink.pattern.find_iter(text) {
                    let call = callee(found.as_str());
                    if !call.contains('.') && text[..found.start()].ends_with('.') {
                        continue;
                    }
                    let arguments = call_arguments(text, found.end());
                    let origin = self
                        .source
                        .find(arguments)
                        .map(|direct| callee(direct.as_str()).to_string())
                        .or_else(|| {
                            self.names(arguments)
                                .find_map(|name| tainted.get(name).cloned())
                        });
                    let Some(origin) = origin else {
                        continue;
                    };
                    let line = first_line + text[..found.start()].matches('\n').count();
                    issues.push(
                        Issue::new(
                            sink.severity,
                            "tainted-flow",
                            format!(
                                "untrusted data from {origin} reaches {call}() ({})",
                                sink.risk
                            ),
                        )
                        .at_line(line),
                    );
                }
            }
        }
        issues
    }

    fn assignment(&self, statement: &str) -> Option<Assignment> {
        let captures = self.assignment.captures(statement)?;
        let target = captures.get(1)?.as_str().to_string();
        let value = captures.get(2).map_or("", |m| m.as_str());
        let sanitized = self
            .sanitizer
            .find(value)
            .is_some_and(|call| value[call_end(value, call.end())..].trim().is_empty());
        let source = self
            .source
            .find(value)
            .map(|found| callee(found.as_str()).to_string());
        Some(Assignment {
            target,
            dependencies: self.names(value).map(str::to_string).collect(),
            source,
            sanitized,
        })
    }

    fn names<'t>(&'t self, text: &'t str) -> impl Iterator<Item = &'t str> + 't {
        self.name
            .captures_iter(text)
            .filter_map(|captures| captures.get(1))
            .map(|m| m.as_str())
    }
}

/// `os.system (` -> `os.system`
fn callee(matched: &str) -> &str {
    matched.trim_end_matches(|c: char| c == '(' || c.is_whitespace())
}

/// Index just past the `)` closing the call whose `(` ends at `open`.
fn call_end(text: &str, open: usize) -> usize {
    let mut depth = 1usize;
    for (offset, c) in text[open..].char_indices() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => {
                depth -= 1;
                if depth == 0 {
                    return open + offset + 1;
                }
            }
            _ => {}
        }
    }
    text.len()
}

fn call_arguments(text: &str, open: usize) -> &str {
    let end = call_end(text, open);
    let end = if end > open && text[..end].ends_with(')') {
        end - 1
    } else {
        end
    };
    &text[open..end]
}

/// Physical lines joined while brackets are open or a line ends in `\`.
/// Each entry carries its 1-based first line.
fn logical_lines(masked: &str) -> Vec<(usize, String)> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut first_line = 1usize;
    let mut depth = 0usize;
    for (index, line) in masked.lines().enumerate() {
        if current.is_empty() {
            first_line = index + 1;
        } else {
            current.push('\n');
        }
        current.push_str(line);
        for c in line.chars() {
            match c {
                '(' | '[' | '{' => depth += 1,
                ')' | ']' | '}' => depth = depth.saturating_sub(1),
                _ => {}
            }
        }
        if depth == 0 && !line.trim_end().ends_with('\\') {
            if !current.trim().is_empty() {
                statements.push((first_line, std::mem::take(&mut current)));
            }
            current.clear();
        }
    }
    if !current.trim().is_empty() {
        statements.push((first_line, current));
    }
    statements
}
