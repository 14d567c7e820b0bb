//! CPython subprocess backend.
//!
//! The child runs a small driver script that swaps `sys.stdout`,
//! `sys.stdin` and `builtins.input` for shims speaking JSON lines over the
//! original pipes. Requests go down stdin tagged by `op`; the child answers
//! with `event`-tagged lines until a terminal `ok`, `raised` or `failed`.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::error::InterpreterError;
use crate::interpreter::{Host, Interpreter, InterpreterFactory};
use crate::traceback::{Frame, Traceback};

const DRIVER: &str = include_str!("driver.py");

/// Executable used when none is configured.
pub const DEFAULT_PYTHON: &str = "python3";

/// How to start the Python child.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PythonConfig {
    /// Interpreter executable.
    pub executable: PathBuf,
    /// Working directory, which is also the root of the file system
    /// passthrough. Inherited when unset.
    pub working_dir: Option<PathBuf>,
}

impl Default for PythonConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from(DEFAULT_PYTHON),
            working_dir: None,
        }
    }
}

impl PythonConfig {
    /// Run in `dir`.
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum DriverRequest<'a> {
    Load,
    Shims,
    LoadPackages { names: &'a [String] },
    Install { names: &'a [String] },
    Exec { code: &'a str },
    Input { value: &'a str },
    ReadFile { path: &'a str },
    WriteFile { path: &'a str, contents: &'a str },
    Mkdir { path: &'a str },
    Rmdir { path: &'a str },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum DriverEvent {
    Output {
        text: String,
    },
    Input {
        prompt: String,
    },
    Ok {
        #[serde(default)]
        value: Option<String>,
    },
    Raised {
        frames: Vec<Frame>,
        exception: String,
    },
    Failed {
        target: String,
        message: String,
    },
}

/// What a failed request reports, by operation.
#[derive(Debug, Clone, Copy)]
enum Failing {
    Load,
    Package,
    Filesystem,
}

struct Pipes {
    child: Child,
    stdin: ChildStdin,
    events: Lines<BufReader<ChildStdout>>,
}

/// A CPython interpreter in a child process.
pub struct PythonProcess {
    config: PythonConfig,
    host: Option<Arc<dyn Host>>,
    pipes: Option<Pipes>,
}

impl std::fmt::Debug for PythonProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PythonProcess")
            .field("config", &self.config)
            .field("pid", &self.pipes.as_ref().and_then(|p| p.child.id()))
            .finish_non_exhaustive()
    }
}

impl PythonProcess {
    /// An unstarted process; nothing is spawned until [`Interpreter::load`].
    pub fn new(config: PythonConfig) -> Self {
        Self {
            config,
            host: None,
            pipes: None,
        }
    }

    fn spawn(&self) -> Result<Pipes, InterpreterError> {
        let mut command = Command::new(&self.config.executable);
        command
            .arg("-u")
            .arg("-c")
            .arg(DRIVER)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| {
            InterpreterError::Load(format!(
                "failed to start {}: {e}",
                self.config.executable.display()
            ))
        })?;
        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(InterpreterError::Load("child pipes unavailable".into()));
        };

        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(target: "pybridge::python", "{line}");
            }
        });

        tracing::debug!(pid = child.id(), "python child started");
        Ok(Pipes {
            child,
            stdin,
            events: BufReader::new(stdout).lines(),
        })
    }

    async fn send(&mut self, request: &DriverRequest<'_>) -> Result<(), InterpreterError> {
        let pipes = self.pipes_mut()?;
        let mut line = serde_json::to_string(request)
            .map_err(|e| InterpreterError::Crashed(format!("encode request: {e}")))?;
        line.push('\n');
        pipes
            .stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| InterpreterError::Crashed(format!("write to child: {e}")))?;
        pipes
            .stdin
            .flush()
            .await
            .map_err(|e| InterpreterError::Crashed(format!("write to child: {e}")))
    }

    fn pipes_mut(&mut self) -> Result<&mut Pipes, InterpreterError> {
        self.pipes
            .as_mut()
            .ok_or_else(|| InterpreterError::Crashed("interpreter not loaded".into()))
    }

    /// Send `request` and pump events until it completes.
    async fn call(
        &mut self,
        request: DriverRequest<'_>,
        failing: Failing,
    ) -> Result<Option<String>, InterpreterError> {
        let host = self
            .host
            .clone()
            .ok_or_else(|| InterpreterError::Crashed("interpreter not loaded".into()))?;
        self.send(&request).await?;

        loop {
            let line = self
                .pipes_mut()?
                .events
                .next_line()
                .await
                .map_err(|e| InterpreterError::Crashed(format!("read from child: {e}")))?;
            let Some(line) = line else {
                self.pipes = None;
                return Err(InterpreterError::Crashed("python child exited".into()));
            };

            let event = match serde_json::from_str::<DriverEvent>(&line) {
                Ok(event) => event,
                Err(_) => {
                    // Raw writes to fd 1 bypass the stdout shim.
                    host.write(&format!("{line}\n"));
                    continue;
                }
            };

            match event {
                DriverEvent::Output { text } => host.write(&text),
                DriverEvent::Input { prompt } => match host.read_line(&prompt).await {
                    Ok(value) => self.send(&DriverRequest::Input { value: &value }).await?,
                    Err(err) => {
                        self.pipes = None;
                        return Err(err);
                    }
                },
                DriverEvent::Ok { value } => return Ok(value),
                DriverEvent::Raised { frames, exception } => {
                    return Err(InterpreterError::Raised(Traceback { frames, exception }));
                }
                DriverEvent::Failed { target, message } => {
                    return Err(match failing {
                        Failing::Load => InterpreterError::Load(message),
                        Failing::Package => InterpreterError::package(target, message),
                        Failing::Filesystem => InterpreterError::filesystem(target, message),
                    });
                }
            }
        }
    }
}

#[async_trait]
impl Interpreter for PythonProcess {
    async fn load(&mut self, host: Arc<dyn Host>) -> Result<String, InterpreterError> {
        self.pipes = Some(self.spawn()?);
        self.host = Some(host);
        let version = self.call(DriverRequest::Load, Failing::Load).await?;
        Ok(version.unwrap_or_default())
    }

    async fn install_shims(&mut self) -> Result<(), InterpreterError> {
        self.call(DriverRequest::Shims, Failing::Load).await.map(drop)
    }

    async fn load_packages(&mut self, names: &[String]) -> Result<(), InterpreterError> {
        self.call(DriverRequest::LoadPackages { names }, Failing::Package)
            .await
            .map(drop)
    }

    async fn install_packages(&mut self, names: &[String]) -> Result<(), InterpreterError> {
        self.call(DriverRequest::Install { names }, Failing::Package)
            .await
            .map(drop)
    }

    async fn exec(&mut self, code: &str) -> Result<(), InterpreterError> {
        self.call(DriverRequest::Exec { code }, Failing::Load)
            .await
            .map(drop)
    }

    async fn read_file(&mut self, path: &str) -> Result<String, InterpreterError> {
        let contents = self
            .call(DriverRequest::ReadFile { path }, Failing::Filesystem)
            .await?;
        Ok(contents.unwrap_or_default())
    }

    async fn write_file(&mut self, path: &str, contents: &str) -> Result<(), InterpreterError> {
        self.call(DriverRequest::WriteFile { path, contents }, Failing::Filesystem)
            .await
            .map(drop)
    }

    async fn mkdir(&mut self, path: &str) -> Result<(), InterpreterError> {
        self.call(DriverRequest::Mkdir { path }, Failing::Filesystem)
            .await
            .map(drop)
    }

    async fn rmdir(&mut self, path: &str) -> Result<(), InterpreterError> {
        self.call(DriverRequest::Rmdir { path }, Failing::Filesystem)
            .await
            .map(drop)
    }
}

/// Creates [`PythonProcess`]es from one [`PythonConfig`].
#[derive(Debug, Clone, Default)]
pub struct PythonProcessFactory {
    config: PythonConfig,
}

impl PythonProcessFactory {
    /// Factory for `config`.
    pub fn new(config: PythonConfig) -> Self {
        Self { config }
    }

    /// The configuration handed to each process.
    pub fn config(&self) -> &PythonConfig {
        &self.config
    }
}

impl InterpreterFactory for PythonProcessFactory {
    fn create(&self) -> Box<dyn Interpreter> {
        Box::new(PythonProcess::new(self.config.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{OutputSink, SessionBridge};
    use crate::context::ExecutionContext;
    use crate::error::RunnerError;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use pybridge_channel::{CoordinationMessage, DirectTransport, InputBroker};
    use pybridge_core::{PackageSet, SessionId};

    fn python_available() -> bool {
        std::process::Command::new(DEFAULT_PYTHON)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|status| status.success())
    }

    fn output_sink() -> (OutputSink, Arc<Mutex<String>>) {
        let output = Arc::new(Mutex::new(String::new()));
        let sink: OutputSink = {
            let output = Arc::clone(&output);
            Arc::new(move |message| {
                if let CoordinationMessage::OutputChunk(chunk) = message {
                    output.lock().push_str(&chunk.text);
                }
            })
        };
        (sink, output)
    }

    #[test]
    fn requests_are_op_tagged() {
        let names = vec!["numpy".to_string()];
        let json = serde_json::to_string(&DriverRequest::LoadPackages { names: &names }).unwrap();
        assert_eq!(json, r#"{"op":"load_packages","names":["numpy"]}"#);
    }

    #[test]
    fn events_parse() {
        let event: DriverEvent = serde_json::from_str(
            r#"{"event":"raised","frames":[{"file":"code","line":1,"name":"<module>"}],"exception":"ValueError: x"}"#,
        )
        .unwrap();
        assert!(matches!(event, DriverEvent::Raised { ref frames, .. } if frames.len() == 1));
        let event: DriverEvent = serde_json::from_str(r#"{"event":"ok"}"#).unwrap();
        assert!(matches!(event, DriverEvent::Ok { value: None }));
    }

    #[tokio::test]
    async fn missing_executable_fails_to_load() {
        let mut process = PythonProcess::new(PythonConfig {
            executable: PathBuf::from("/nonexistent/python-for-pybridge"),
            working_dir: None,
        });
        let host = Arc::new(SessionBridge::new(
            SessionId::v4(),
            Arc::new(DirectTransport::new()),
            crate::bridge::discard_sink(),
        ));
        assert!(matches!(process.load(host).await, Err(InterpreterError::Load(_))));
    }

    #[tokio::test]
    async fn runs_real_python() {
        if !python_available() {
            eprintln!("python3 not found, skipping");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let factory = PythonProcessFactory::new(PythonConfig::default().with_working_dir(dir.path()));
        let (sink, output) = output_sink();
        let mut ctx = ExecutionContext::new(factory.create(), Arc::new(DirectTransport::new()), sink);

        let info = ctx.init(&PackageSet::new(["json"], Vec::<String>::new())).await.unwrap();
        assert!(info.interpreter_version.starts_with('3'));

        ctx.run("print('hello')\nprint('no newline', end='')").await.unwrap();
        assert_eq!(*output.lock(), "hello\nno newline\n");

        output.lock().clear();
        ctx.run("import urllib.request\nprint(dict(urllib.request._opener.addheaders)['User-Agent'])")
            .await
            .unwrap();
        let agent = output.lock().clone();
        assert!(agent.starts_with("pybridge (Python 3"), "{agent}");

        let err = ctx.run("def f():\n    raise ValueError('bad')\nf()").await.unwrap_err();
        let RunnerError::Execution(tb) = err else {
            panic!("expected execution error, got {err:?}");
        };
        assert_eq!(tb.frames.first().map(|f| f.file.as_str()), Some("code"));
        assert_eq!(tb.exception, "ValueError: bad");

        ctx.mkdir("data").await.unwrap();
        ctx.write_file("data/a.txt", "héllo").await.unwrap();
        assert_eq!(ctx.read_file("data/a.txt").await.unwrap(), "héllo");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("data/a.txt")).unwrap(),
            "héllo"
        );
        assert!(ctx.rmdir("data").await.is_err());
    }

    #[tokio::test]
    async fn input_round_trips_through_the_broker() {
        if !python_available() {
            eprintln!("python3 not found, skipping");
            return;
        }
        let transport = Arc::new(DirectTransport::new());
        let broker = Arc::new(InputBroker::new(transport.clone()));
        broker.attach();
        let (sink, output) = output_sink();
        let mut ctx = ExecutionContext::new(
            PythonProcessFactory::default().create(),
            transport,
            sink,
        );
        ctx.init(&PackageSet::empty()).await.unwrap();

        let answer = {
            let broker = Arc::clone(&broker);
            tokio::spawn(async move {
                let notice = broker.wait_for_request(None).await.unwrap();
                broker.submit(notice.request_id, "Ada").unwrap();
            })
        };
        ctx.run("name = input('Name? ')\nprint('Hi', name)").await.unwrap();
        answer.await.unwrap();
        assert_eq!(*output.lock(), "Name? Ada\nHi Ada\n");
    }

    #[tokio::test]
    async fn missing_platform_package_fails() {
        if !python_available() {
            eprintln!("python3 not found, skipping");
            return;
        }
        let mut ctx = ExecutionContext::new(
            PythonProcessFactory::default().create(),
            Arc::new(DirectTransport::new()),
            crate::bridge::discard_sink(),
        );
        let err = ctx
            .init(&PackageSet::new(["definitely_not_a_module_xyz"], Vec::<String>::new()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RunnerError::Initialization(InterpreterError::Package { .. })
        ));
    }
}
