//! Deterministic in-process interpreter.
//!
//! [`ScriptedInterpreter`] understands a small, line-oriented subset of
//! Python: enough for `print`, `input`, assignments, `raise`, imports and the
//! reload preamble. Every call is recorded in a [`Journal`] shared with the
//! [`ScriptedFactory`] that created it, so tests can assert on what the
//! runtime asked the interpreter to do.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::bridge::BANNER;
use crate::error::InterpreterError;
use crate::interpreter::{Host, Interpreter, InterpreterFactory};
use crate::traceback::{Frame, Traceback};

/// Version reported by [`ScriptedInterpreter::load`].
pub const SCRIPTED_VERSION: &str = "3.11.3 (scripted)";

/// Everything the scripted interpreters of one factory were asked to do.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Journal {
    /// Interpreters created.
    pub created: usize,
    /// Successful loads.
    pub loads: usize,
    /// Shim installations.
    pub shims_installed: usize,
    /// Batches passed to `load_packages`.
    pub loaded_packages: Vec<Vec<String>>,
    /// Batches passed to `install_packages`.
    pub installed_packages: Vec<Vec<String>>,
    /// Modules reloaded by the reload preamble.
    pub reloaded: Vec<String>,
    /// Every snippet passed to `exec`, in order.
    pub executed: Vec<String>,
    /// Interpreters dropped.
    pub dropped: usize,
}

#[derive(Debug, Default)]
struct Shared {
    journal: Mutex<Journal>,
    failing_loads: AtomicUsize,
    missing_packages: Vec<String>,
    load_delay: Option<Duration>,
}

/// Creates [`ScriptedInterpreter`]s that share one [`Journal`].
#[derive(Debug, Clone, Default)]
pub struct ScriptedFactory {
    shared: Arc<Shared>,
}

impl ScriptedFactory {
    /// A factory whose interpreters always load.
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat `name` as unavailable to both package loaders.
    #[must_use]
    pub fn with_missing_package(self, name: impl Into<String>) -> Self {
        self.configure(|shared| shared.missing_packages.push(name.into()))
    }

    /// Make every load take `delay`.
    #[must_use]
    pub fn with_load_delay(self, delay: Duration) -> Self {
        self.configure(|shared| shared.load_delay = Some(delay))
    }

    fn configure(self, apply: impl FnOnce(&mut Shared)) -> Self {
        let mut shared = Arc::try_unwrap(self.shared).unwrap_or_else(|shared| Shared {
            journal: Mutex::new(shared.journal.lock().clone()),
            failing_loads: AtomicUsize::new(shared.failing_loads.load(Ordering::SeqCst)),
            missing_packages: shared.missing_packages.clone(),
            load_delay: shared.load_delay,
        });
        apply(&mut shared);
        Self {
            shared: Arc::new(shared),
        }
    }

    /// Make the next `count` loads fail.
    pub fn fail_next_loads(&self, count: usize) {
        self.shared.failing_loads.store(count, Ordering::SeqCst);
    }

    /// Snapshot of the journal.
    pub fn journal(&self) -> Journal {
        self.shared.journal.lock().clone()
    }
}

impl InterpreterFactory for ScriptedFactory {
    fn create(&self) -> Box<dyn Interpreter> {
        self.shared.journal.lock().created += 1;
        Box::new(ScriptedInterpreter {
            shared: Arc::clone(&self.shared),
            host: None,
            modules: HashSet::new(),
            files: BTreeMap::new(),
            dirs: BTreeSet::new(),
        })
    }
}

/// In-process interpreter for a line-oriented Python subset.
pub struct ScriptedInterpreter {
    shared: Arc<Shared>,
    host: Option<Arc<dyn Host>>,
    modules: HashSet<String>,
    files: BTreeMap<String, String>,
    dirs: BTreeSet<String>,
}

impl fmt::Debug for ScriptedInterpreter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedInterpreter")
            .field("loaded", &self.host.is_some())
            .field("modules", &self.modules)
            .finish_non_exhaustive()
    }
}

impl Drop for ScriptedInterpreter {
    fn drop(&mut self) {
        self.shared.journal.lock().dropped += 1;
    }
}

impl ScriptedInterpreter {
    fn host(&self) -> Result<&Arc<dyn Host>, InterpreterError> {
        self.host
            .as_ref()
            .ok_or_else(|| InterpreterError::Crashed("interpreter not loaded".into()))
    }

    fn check_packages(&self, names: &[String]) -> Result<(), InterpreterError> {
        match names
            .iter()
            .find(|name| self.shared.missing_packages.contains(name))
        {
            Some(name) => Err(InterpreterError::package(
                name.as_str(),
                format!("No module named '{name}'"),
            )),
            None => Ok(()),
        }
    }

    fn parent_exists(&self, path: &str) -> bool {
        path.rsplit_once('/')
            .is_none_or(|(parent, _)| parent.is_empty() || self.dirs.contains(parent))
    }
}

#[async_trait]
impl Interpreter for ScriptedInterpreter {
    async fn load(&mut self, host: Arc<dyn Host>) -> Result<String, InterpreterError> {
        if let Some(delay) = self.shared.load_delay {
            tokio::time::sleep(delay).await;
        }
        let failing = self
            .shared
            .failing_loads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(InterpreterError::Load("scripted load failure".into()));
        }
        host.write(&format!("{BANNER}\n"));
        self.host = Some(host);
        self.shared.journal.lock().loads += 1;
        Ok(SCRIPTED_VERSION.to_owned())
    }

    async fn install_shims(&mut self) -> Result<(), InterpreterError> {
        self.shared.journal.lock().shims_installed += 1;
        Ok(())
    }

    async fn load_packages(&mut self, names: &[String]) -> Result<(), InterpreterError> {
        self.check_packages(names)?;
        self.shared.journal.lock().loaded_packages.push(names.to_vec());
        Ok(())
    }

    async fn install_packages(&mut self, names: &[String]) -> Result<(), InterpreterError> {
        self.check_packages(names)?;
        self.shared
            .journal
            .lock()
            .installed_packages
            .push(names.to_vec());
        Ok(())
    }

    async fn exec(&mut self, code: &str) -> Result<(), InterpreterError> {
        self.shared.journal.lock().executed.push(code.to_owned());
        let host = Arc::clone(self.host()?);
        let mut run = Run {
            host,
            shared: &self.shared,
            modules: &mut self.modules,
            vars: HashMap::new(),
        };
        run.module(code).await
    }

    async fn read_file(&mut self, path: &str) -> Result<String, InterpreterError> {
        let path = normalize(path);
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| InterpreterError::filesystem(path, "No such file or directory"))
    }

    async fn write_file(&mut self, path: &str, contents: &str) -> Result<(), InterpreterError> {
        let path = normalize(path);
        if self.dirs.contains(path) {
            return Err(InterpreterError::filesystem(path, "Is a directory"));
        }
        if !self.parent_exists(path) {
            return Err(InterpreterError::filesystem(path, "No such file or directory"));
        }
        self.files.insert(path.to_owned(), contents.to_owned());
        Ok(())
    }

    async fn mkdir(&mut self, path: &str) -> Result<(), InterpreterError> {
        let path = normalize(path);
        if self.dirs.contains(path) || self.files.contains_key(path) {
            return Err(InterpreterError::filesystem(path, "File exists"));
        }
        if !self.parent_exists(path) {
            return Err(InterpreterError::filesystem(path, "No such file or directory"));
        }
        self.dirs.insert(path.to_owned());
        Ok(())
    }

    async fn rmdir(&mut self, path: &str) -> Result<(), InterpreterError> {
        let path = normalize(path);
        if !self.dirs.contains(path) {
            return Err(InterpreterError::filesystem(path, "No such file or directory"));
        }
        let prefix = format!("{path}/");
        let occupied = self.files.keys().any(|f| f.starts_with(&prefix))
            || self.dirs.iter().any(|d| d.starts_with(&prefix));
        if occupied {
            return Err(InterpreterError::filesystem(path, "Directory not empty"));
        }
        self.dirs.remove(path);
        Ok(())
    }
}

fn normalize(path: &str) -> &str {
    path.trim_start_matches("./").trim_end_matches('/')
}

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    None,
}

impl Value {
    const fn type_name(&self) -> &'static str {
        match self {
            Self::Str(_) => "str",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Bool(_) => "bool",
            Self::None => "NoneType",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(x) => write!(f, "{x:?}"),
            Self::Bool(true) => f.write_str("True"),
            Self::Bool(false) => f.write_str("False"),
            Self::None => f.write_str("None"),
        }
    }
}

/// Exception raised while running a snippet, before frames are attached.
struct Raise(String);

impl Raise {
    fn syntax() -> Self {
        Self("SyntaxError: invalid syntax".into())
    }

    fn name(name: &str) -> Self {
        Self(format!("NameError: name '{name}' is not defined"))
    }
}

enum Failure {
    Raise(Raise),
    Backend(InterpreterError),
}

impl From<Raise> for Failure {
    fn from(raise: Raise) -> Self {
        Self::Raise(raise)
    }
}

impl From<InterpreterError> for Failure {
    fn from(err: InterpreterError) -> Self {
        Self::Backend(err)
    }
}

/// State of one `exec` call: a fresh namespace over the shared module table.
struct Run<'a> {
    host: Arc<dyn Host>,
    shared: &'a Shared,
    modules: &'a mut HashSet<String>,
    vars: HashMap<String, Value>,
}

impl Run<'_> {
    async fn module(&mut self, code: &str) -> Result<(), InterpreterError> {
        // None outside a block, Some(taken) inside an `if` body.
        let mut block: Option<bool> = None;
        for (index, raw) in code.lines().enumerate() {
            let line = u32::try_from(index + 1).unwrap_or(u32::MAX);
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let indented = raw.starts_with(char::is_whitespace);
            let outcome = match (indented, block) {
                (true, Some(false)) => continue,
                (true, Some(true)) => self.statement(trimmed).await,
                (true, None) => Err(Raise("IndentationError: unexpected indent".into()).into()),
                (false, _) => {
                    block = None;
                    match self.block_header(trimmed) {
                        Some(Ok(taken)) => {
                            block = Some(taken);
                            Ok(())
                        }
                        Some(Err(failure)) => Err(failure),
                        None => self.statement(trimmed).await,
                    }
                }
            };
            match outcome {
                Ok(()) => {}
                Err(Failure::Backend(err)) => return Err(err),
                Err(Failure::Raise(Raise(exception))) => {
                    return Err(InterpreterError::Raised(Traceback {
                        frames: vec![
                            Frame::new("<exec>", 1, "run"),
                            Frame::new("code", line, "<module>"),
                        ],
                        exception,
                    }));
                }
            }
        }
        Ok(())
    }

    /// `if """name""" in sys.modules:` headers.
    fn block_header(&self, stmt: &str) -> Option<Result<bool, Failure>> {
        let condition = stmt.strip_prefix("if ")?.strip_suffix(':')?;
        let Some(literal) = condition.strip_suffix(" in sys.modules") else {
            return Some(Err(Raise::syntax().into()));
        };
        Some(match parse_str(literal.trim()) {
            Some(name) => Ok(self.modules.contains(&name)),
            None => Err(Raise::syntax().into()),
        })
    }

    async fn statement(&mut self, stmt: &str) -> Result<(), Failure> {
        if let Some(rest) = stmt.strip_prefix("import ") {
            for module in rest.split(',') {
                let module = module.split(" as ").next().unwrap_or_default().trim();
                self.modules.insert(module.to_owned());
            }
            return Ok(());
        }
        if let Some(rest) = stmt.strip_prefix("from ") {
            let module = rest.split_whitespace().next().unwrap_or_default();
            self.modules.insert(module.to_owned());
            return Ok(());
        }
        if stmt.starts_with("del ") || stmt == "pass" {
            return Ok(());
        }
        if stmt == "while True: pass" {
            loop {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        }
        if let Some(target) = call_args(stmt, "importlib.reload") {
            let name = target
                .strip_prefix("sys.modules[")
                .and_then(|t| t.strip_suffix(']'))
                .and_then(|t| parse_str(t.trim()))
                .ok_or_else(Raise::syntax)?;
            if !self.modules.contains(&name) {
                return Err(Raise(format!("KeyError: '{name}'")).into());
            }
            self.shared.journal.lock().reloaded.push(name);
            return Ok(());
        }
        if let Some(args) = call_args(stmt, "time.sleep") {
            #[allow(clippy::cast_precision_loss)]
            let seconds = match self.pure(args)? {
                Value::Int(n) => n as f64,
                Value::Float(x) => x,
                _ => return Err(Raise("TypeError: a number is required".into()).into()),
            };
            tokio::time::sleep(Duration::from_secs_f64(seconds.max(0.0))).await;
            return Ok(());
        }
        if let Some(args) = call_args(stmt, "print") {
            return self.print(args).await;
        }
        if stmt == "raise" {
            return Err(self.raise("").into());
        }
        if let Some(rest) = stmt.strip_prefix("raise ") {
            return Err(self.raise(rest.trim()).into());
        }
        if let Some((target, expr)) = assignment(stmt) {
            let value = self.eval(expr).await?;
            self.vars.insert(target.to_owned(), value);
            return Ok(());
        }
        self.eval(stmt).await.map(drop)
    }

    async fn print(&mut self, args: &str) -> Result<(), Failure> {
        let mut sep = " ".to_owned();
        let mut end = "\n".to_owned();
        let mut parts = Vec::new();
        for arg in split_top_level(args, ',') {
            let arg = arg.trim();
            if arg.is_empty() {
                continue;
            }
            if let Some((key, expr)) = assignment(arg) {
                let value = self.eval(expr).await?.to_string();
                match key {
                    "sep" => sep = value,
                    "end" => end = value,
                    "flush" | "file" => {}
                    other => {
                        return Err(Raise(format!(
                            "TypeError: '{other}' is an invalid keyword argument for print()"
                        ))
                        .into());
                    }
                }
            } else {
                parts.push(self.eval(arg).await?.to_string());
            }
        }
        let mut text = parts.join(&sep);
        text.push_str(&end);
        self.host.write(&text);
        Ok(())
    }

    fn raise(&self, rest: &str) -> Raise {
        if rest.is_empty() {
            return Raise("RuntimeError: No active exception to reraise".into());
        }
        let (name, message) = match rest.split_once('(') {
            Some((name, args)) => {
                let message = args
                    .strip_suffix(')')
                    .map(str::trim)
                    .filter(|a| !a.is_empty())
                    .map(|a| parse_str(a).unwrap_or_else(|| a.to_owned()));
                (name.trim(), message)
            }
            None => (rest, None),
        };
        if !is_identifier(name) {
            return Raise::syntax();
        }
        match message {
            Some(message) => Raise(format!("{name}: {message}")),
            None => Raise(name.to_owned()),
        }
    }

    /// Evaluate `a + b + ...`, where terms may call `input()`.
    async fn eval(&mut self, expr: &str) -> Result<Value, Failure> {
        let mut total = None;
        for term in split_top_level(expr, '+') {
            let term = term.trim();
            let value = if let Some(args) = call_args(term, "input") {
                let prompt = if args.trim().is_empty() {
                    String::new()
                } else {
                    self.pure(args)?.to_string()
                };
                Value::Str(self.host.read_line(&prompt).await?)
            } else if call_args(term, "sys.stdin.readline").is_some() {
                let line = self.host.read_line("").await?;
                Value::Str(format!("{line}\n"))
            } else {
                self.atom(term)?
            };
            total = Some(match total {
                None => value,
                Some(acc) => add(acc, value)?,
            });
        }
        total.ok_or_else(|| Raise::syntax().into())
    }

    /// Like [`eval`](Self::eval), without input calls.
    fn pure(&self, expr: &str) -> Result<Value, Failure> {
        let mut total = None;
        for term in split_top_level(expr, '+') {
            let value = self.atom(term.trim())?;
            total = Some(match total {
                None => value,
                Some(acc) => add(acc, value)?,
            });
        }
        total.ok_or_else(|| Raise::syntax().into())
    }

    fn atom(&self, expr: &str) -> Result<Value, Failure> {
        if let Some(s) = parse_str(expr) {
            return Ok(Value::Str(s));
        }
        if let Ok(n) = expr.parse::<i64>() {
            return Ok(Value::Int(n));
        }
        if expr.starts_with(|c: char| c.is_ascii_digit() || c == '.' || c == '-')
            && let Ok(x) = expr.parse::<f64>()
        {
            return Ok(Value::Float(x));
        }
        match expr {
            "True" => Ok(Value::Bool(true)),
            "False" => Ok(Value::Bool(false)),
            "None" => Ok(Value::None),
            name if is_identifier(name) => self
                .vars
                .get(name)
                .cloned()
                .ok_or_else(|| Raise::name(name).into()),
            _ => Err(Raise::syntax().into()),
        }
    }
}

fn add(left: Value, right: Value) -> Result<Value, Failure> {
    match (left, right) {
        (Value::Str(a), Value::Str(b)) => Ok(Value::Str(a + b.as_str())),
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a + b)),
        (left, right) => Err(Raise(format!(
            "TypeError: unsupported operand type(s) for +: '{}' and '{}'",
            left.type_name(),
            right.type_name()
        ))
        .into()),
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c == '_' || c.is_alphabetic())
        && chars.all(|c| c == '_' || c.is_alphanumeric())
}

/// The argument text of `name(...)`, when `expr` is exactly that call.
fn call_args<'a>(expr: &'a str, name: &str) -> Option<&'a str> {
    let args = expr.strip_prefix(name)?.strip_prefix('(')?.strip_suffix(')')?;
    // Reject `f(a) + g(b)`: the opening paren must close at the very end.
    let mut depth = 1usize;
    let mut quote = None;
    for c in args.chars() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '(' | '[') => depth += 1,
            (None, ')' | ']') => {
                depth -= 1;
                if depth == 0 {
                    return None;
                }
            }
            _ => {}
        }
    }
    Some(args)
}

/// `target = expr`, with `target` an identifier.
fn assignment(stmt: &str) -> Option<(&str, &str)> {
    let parts = split_top_level(stmt, '=');
    if parts.len() != 2 {
        return None;
    }
    let target = parts[0].trim();
    let expr = parts[1].trim();
    (is_identifier(target) && !expr.is_empty()).then_some((target, expr))
}

/// Split on `sep` outside quotes and brackets.
fn split_top_level(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote = None;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '(' | '[') => depth += 1,
            (None, ')' | ']') => depth = depth.saturating_sub(1),
            (None, c) if c == sep && depth == 0 => {
                parts.push(&s[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

/// A single-, double- or triple-quoted string literal.
fn parse_str(literal: &str) -> Option<String> {
    let body = ["\"\"\"", "'''", "\"", "'"].iter().find_map(|q| {
        literal
            .strip_prefix(q)
            .and_then(|rest| rest.strip_suffix(q))
            .filter(|_| literal.len() >= 2 * q.len())
    })?;
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    Some(out)
}
