//! The execution context: one interpreter and at most one session.

use std::sync::Arc;

use pybridge_channel::{Ready, SharedTransport};
use pybridge_core::{PackageSet, SessionId};
use serde::{Deserialize, Serialize};

use crate::bridge::{OutputSink, SessionBridge};
use crate::error::{InterpreterError, RunnerError};
use crate::interpreter::Interpreter;
use crate::reload::reload_preamble;

/// What [`ExecutionContext::init`] reports back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    /// Freshly generated session id.
    pub session_id: SessionId,
    /// Version string reported by the interpreter.
    pub interpreter_version: String,
}

/// Owns an interpreter and runs user code in it.
pub struct ExecutionContext {
    interpreter: Box<dyn Interpreter>,
    transport: SharedTransport,
    sink: OutputSink,
    session: Option<(SessionInfo, Arc<SessionBridge>)>,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("session", &self.session.as_ref().map(|(info, _)| info))
            .finish_non_exhaustive()
    }
}

impl ExecutionContext {
    /// Wrap an unstarted interpreter.
    pub fn new(interpreter: Box<dyn Interpreter>, transport: SharedTransport, sink: OutputSink) -> Self {
        Self {
            interpreter,
            transport,
            sink,
            session: None,
        }
    }

    /// The live session, if initialized.
    pub fn session(&self) -> Option<&SessionInfo> {
        self.session.as_ref().map(|(info, _)| info)
    }

    /// Load the interpreter and packages, then announce `Ready`.
    pub async fn init(&mut self, packages: &PackageSet) -> Result<SessionInfo, RunnerError> {
        if self.session.is_some() {
            return Err(RunnerError::AlreadyInitialized);
        }

        let session_id = SessionId::v4();
        let bridge = Arc::new(SessionBridge::new(
            session_id,
            Arc::clone(&self.transport),
            Arc::clone(&self.sink),
        ));

        let interpreter_version = self
            .interpreter
            .load(bridge.clone())
            .await
            .map_err(RunnerError::Initialization)?;
        self.interpreter
            .install_shims()
            .await
            .map_err(RunnerError::Initialization)?;

        let platform = packages.platform_list();
        if !platform.is_empty() {
            self.interpreter
                .load_packages(&platform)
                .await
                .map_err(RunnerError::Initialization)?;
        }
        let external = packages.external_list();
        if !external.is_empty() {
            self.interpreter
                .install_packages(&external)
                .await
                .map_err(RunnerError::Initialization)?;
        }

        let info = SessionInfo {
            session_id,
            interpreter_version,
        };
        tracing::info!(
            %session_id,
            version = %info.interpreter_version,
            platform = platform.len(),
            external = external.len(),
            "interpreter ready"
        );
        bridge.publish(
            Ready {
                session_id,
                interpreter_version: info.interpreter_version.clone(),
            }
            .into(),
        );
        self.session = Some((info.clone(), bridge));
        Ok(info)
    }

    fn bridge(&self) -> Result<&Arc<SessionBridge>, RunnerError> {
        self.session
            .as_ref()
            .map(|(_, bridge)| bridge)
            .ok_or(RunnerError::NotReady)
    }

    /// Evaluate `code`, then terminate any open output line.
    ///
    /// An exception surfaces as [`RunnerError::Execution`] with the dispatch
    /// frame removed.
    pub async fn run(&mut self, code: &str) -> Result<(), RunnerError> {
        let bridge = Arc::clone(self.bridge()?);
        let result = self.interpreter.exec(code).await;
        bridge.flush();
        result.map_err(map_exec_error)
    }

    /// Reload the listed modules that are already imported.
    pub async fn reload_modules(&mut self, modules: &[String]) -> Result<(), RunnerError> {
        self.bridge()?;
        if modules.is_empty() {
            return Ok(());
        }
        let preamble = reload_preamble(modules.iter().map(String::as_str));
        self.interpreter
            .exec(&preamble)
            .await
            .map_err(map_exec_error)
    }

    /// Read a UTF-8 text file.
    pub async fn read_file(&mut self, path: &str) -> Result<String, RunnerError> {
        self.bridge()?;
        self.interpreter
            .read_file(path)
            .await
            .map_err(RunnerError::Interpreter)
    }

    /// Write a UTF-8 text file.
    pub async fn write_file(&mut self, path: &str, contents: &str) -> Result<(), RunnerError> {
        self.bridge()?;
        self.interpreter
            .write_file(path, contents)
            .await
            .map_err(RunnerError::Interpreter)
    }

    /// Create a directory.
    pub async fn mkdir(&mut self, path: &str) -> Result<(), RunnerError> {
        self.bridge()?;
        self.interpreter.mkdir(path).await.map_err(RunnerError::Interpreter)
    }

    /// Remove an empty directory.
    pub async fn rmdir(&mut self, path: &str) -> Result<(), RunnerError> {
        self.bridge()?;
        self.interpreter.rmdir(path).await.map_err(RunnerError::Interpreter)
    }
}

fn map_exec_error(err: InterpreterError) -> RunnerError {
    match err {
        InterpreterError::Raised(tb) => RunnerError::Execution(tb.strip_dispatch_frame()),
        other => RunnerError::Interpreter(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedFactory;
    use crate::traceback::Frame;
    use crate::InterpreterFactory;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use pybridge_channel::{CoordinationMessage, DirectTransport};

    fn context(factory: &ScriptedFactory) -> (ExecutionContext, Arc<Mutex<Vec<CoordinationMessage>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink: OutputSink = {
            let seen = Arc::clone(&seen);
            Arc::new(move |message| seen.lock().push(message))
        };
        let ctx = ExecutionContext::new(factory.create(), Arc::new(DirectTransport::new()), sink);
        (ctx, seen)
    }

    fn stdout(seen: &[CoordinationMessage]) -> String {
        seen.iter()
            .filter_map(|m| match m {
                CoordinationMessage::OutputChunk(c) => Some(c.text.as_str()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn init_loads_packages_and_announces_ready() {
        let factory = ScriptedFactory::new();
        let (mut ctx, seen) = context(&factory);
        let packages = PackageSet::new(["numpy"], ["rich"]);

        let info = ctx.init(&packages).await.unwrap();
        assert_eq!(ctx.session(), Some(&info));

        let journal = factory.journal();
        assert_eq!(journal.shims_installed, 1);
        assert_eq!(journal.loaded_packages, vec![vec!["numpy".to_string()]]);
        assert_eq!(journal.installed_packages, vec![vec!["rich".to_string()]]);

        let seen = seen.lock();
        assert_eq!(stdout(&seen), "", "banner must be filtered");
        assert_eq!(
            seen.last(),
            Some(&CoordinationMessage::Ready(Ready {
                session_id: info.session_id,
                interpreter_version: info.interpreter_version.clone(),
            }))
        );
    }

    #[tokio::test]
    async fn empty_external_list_skips_installer() {
        let factory = ScriptedFactory::new();
        let (mut ctx, _) = context(&factory);
        ctx.init(&PackageSet::new(["numpy"], Vec::<String>::new()))
            .await
            .unwrap();
        assert!(factory.journal().installed_packages.is_empty());
    }

    #[tokio::test]
    async fn second_init_is_rejected() {
        let factory = ScriptedFactory::new();
        let (mut ctx, _) = context(&factory);
        ctx.init(&PackageSet::empty()).await.unwrap();
        assert!(matches!(
            ctx.init(&PackageSet::empty()).await,
            Err(RunnerError::AlreadyInitialized)
        ));
    }

    #[tokio::test]
    async fn run_before_init_is_not_ready() {
        let factory = ScriptedFactory::new();
        let (mut ctx, _) = context(&factory);
        assert!(matches!(ctx.run("print(1)").await, Err(RunnerError::NotReady)));
        assert!(matches!(ctx.read_file("a.txt").await, Err(RunnerError::NotReady)));
    }

    #[tokio::test]
    async fn run_prints_and_flushes() {
        let factory = ScriptedFactory::new();
        let (mut ctx, seen) = context(&factory);
        ctx.init(&PackageSet::empty()).await.unwrap();

        ctx.run("print(1)").await.unwrap();
        ctx.run("print('partial', end='')").await.unwrap();
        assert_eq!(stdout(&seen.lock()), "1\npartial\n");
    }

    #[tokio::test]
    async fn exception_loses_dispatch_frame() {
        let factory = ScriptedFactory::new();
        let (mut ctx, _) = context(&factory);
        ctx.init(&PackageSet::empty()).await.unwrap();

        let err = ctx.run("x = 1\nraise ValueError('bad value')").await.unwrap_err();
        let tb = err.traceback().unwrap();
        assert_eq!(tb.frames, vec![Frame::new("code", 2, "<module>")]);
        assert_eq!(tb.exception, "ValueError: bad value");
    }

    #[tokio::test]
    async fn failed_package_load_is_initialization_error() {
        let factory = ScriptedFactory::new().with_missing_package("nump");
        let (mut ctx, _) = context(&factory);
        let err = ctx
            .init(&PackageSet::new(["nump"], Vec::<String>::new()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RunnerError::Initialization(InterpreterError::Package { .. })
        ));
        assert!(ctx.session().is_none());
    }

    #[tokio::test]
    async fn reload_touches_only_imported_modules() {
        let factory = ScriptedFactory::new();
        let (mut ctx, _) = context(&factory);
        ctx.init(&PackageSet::empty()).await.unwrap();
        ctx.run("import utils").await.unwrap();

        ctx.reload_modules(&["utils".to_string(), "other".to_string()])
            .await
            .unwrap();
        assert_eq!(factory.journal().reloaded, vec!["utils".to_string()]);
    }

    #[tokio::test]
    async fn file_system_passthrough() {
        let factory = ScriptedFactory::new();
        let (mut ctx, _) = context(&factory);
        ctx.init(&PackageSet::empty()).await.unwrap();

        ctx.mkdir("data").await.unwrap();
        ctx.write_file("data/notes.txt", "héllo\n").await.unwrap();
        assert_eq!(ctx.read_file("data/notes.txt").await.unwrap(), "héllo\n");
        assert!(matches!(
            ctx.rmdir("data").await,
            Err(RunnerError::Interpreter(InterpreterError::Filesystem { .. }))
        ));
        assert!(ctx.read_file("missing.txt").await.is_err());
    }
}
