//! Background worker hosting an [`ExecutionContext`].
//!
//! The context lives on its own task and is driven through a command
//! channel; each command carries a oneshot responder. Aborting the task
//! drops the context and, with it, the interpreter.

use pybridge_core::PackageSet;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::context::{ExecutionContext, SessionInfo};
use crate::error::RunnerError;

const COMMAND_CAPACITY: usize = 16;

type Reply<T> = oneshot::Sender<Result<T, RunnerError>>;

enum Command {
    Init {
        packages: PackageSet,
        reply: Reply<SessionInfo>,
    },
    Run {
        code: String,
        reply: Reply<()>,
    },
    Reload {
        modules: Vec<String>,
        reply: Reply<()>,
    },
    ReadFile {
        path: String,
        reply: Reply<String>,
    },
    WriteFile {
        path: String,
        contents: String,
        reply: Reply<()>,
    },
    Mkdir {
        path: String,
        reply: Reply<()>,
    },
    Rmdir {
        path: String,
        reply: Reply<()>,
    },
}

/// Handle to an execution context running on a background task.
#[derive(Debug)]
pub struct Worker {
    commands: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

impl Worker {
    /// Move `context` onto a new task.
    pub fn spawn(context: ExecutionContext) -> Self {
        let (commands, receiver) = mpsc::channel(COMMAND_CAPACITY);
        let task = tokio::spawn(serve(context, receiver));
        Self { commands, task }
    }

    async fn call<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T, RunnerError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| RunnerError::WorkerGone)?;
        response.await.map_err(|_| RunnerError::WorkerGone)?
    }

    /// Initialize the hosted context.
    pub async fn init(&self, packages: PackageSet) -> Result<SessionInfo, RunnerError> {
        self.call(|reply| Command::Init { packages, reply }).await
    }

    /// Run user code.
    pub async fn run(&self, code: impl Into<String>) -> Result<(), RunnerError> {
        let code = code.into();
        self.call(|reply| Command::Run { code, reply }).await
    }

    /// Reload watched modules.
    pub async fn reload(&self, modules: Vec<String>) -> Result<(), RunnerError> {
        self.call(|reply| Command::Reload { modules, reply }).await
    }

    /// Read a UTF-8 text file.
    pub async fn read_file(&self, path: impl Into<String>) -> Result<String, RunnerError> {
        let path = path.into();
        self.call(|reply| Command::ReadFile { path, reply }).await
    }

    /// Write a UTF-8 text file.
    pub async fn write_file(
        &self,
        path: impl Into<String>,
        contents: impl Into<String>,
    ) -> Result<(), RunnerError> {
        let (path, contents) = (path.into(), contents.into());
        self.call(|reply| Command::WriteFile {
            path,
            contents,
            reply,
        })
        .await
    }

    /// Create a directory.
    pub async fn mkdir(&self, path: impl Into<String>) -> Result<(), RunnerError> {
        let path = path.into();
        self.call(|reply| Command::Mkdir { path, reply }).await
    }

    /// Remove an empty directory.
    pub async fn rmdir(&self, path: impl Into<String>) -> Result<(), RunnerError> {
        let path = path.into();
        self.call(|reply| Command::Rmdir { path, reply }).await
    }

    /// Abort the task, dropping the context. In-flight calls fail with
    /// [`RunnerError::WorkerGone`].
    pub fn terminate(&self) {
        self.task.abort();
    }

    /// Whether the task has stopped.
    pub fn is_terminated(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(mut context: ExecutionContext, mut commands: mpsc::Receiver<Command>) {
    tracing::debug!("execution worker started");
    while let Some(command) = commands.recv().await {
        match command {
            Command::Init { packages, reply } => {
                let _ = reply.send(context.init(&packages).await);
            }
            Command::Run { code, reply } => {
                let _ = reply.send(context.run(&code).await);
            }
            Command::Reload { modules, reply } => {
                let _ = reply.send(context.reload_modules(&modules).await);
            }
            Command::ReadFile { path, reply } => {
                let _ = reply.send(context.read_file(&path).await);
            }
            Command::WriteFile {
                path,
                contents,
                reply,
            } => {
                let _ = reply.send(context.write_file(&path, &contents).await);
            }
            Command::Mkdir { path, reply } => {
                let _ = reply.send(context.mkdir(&path).await);
            }
            Command::Rmdir { path, reply } => {
                let _ = reply.send(context.rmdir(&path).await);
            }
        }
    }
    tracing::debug!("execution worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::discard_sink;
    use crate::testing::ScriptedFactory;
    use crate::InterpreterFactory;
    use pybridge_channel::DirectTransport;
    use std::sync::Arc;
    use std::time::Duration;

    fn worker(factory: &ScriptedFactory) -> Worker {
        Worker::spawn(ExecutionContext::new(
            factory.create(),
            Arc::new(DirectTransport::new()),
            discard_sink(),
        ))
    }

    #[tokio::test]
    async fn commands_are_forwarded() {
        let factory = ScriptedFactory::new();
        let worker = worker(&factory);
        worker.init(PackageSet::empty()).await.unwrap();
        worker.run("print('hi')").await.unwrap();
        worker.write_file("a.txt", "x").await.unwrap();
        assert_eq!(worker.read_file("a.txt").await.unwrap(), "x");
        assert_eq!(factory.journal().executed, vec!["print('hi')".to_string()]);
    }

    #[tokio::test]
    async fn terminate_fails_in_flight_run() {
        let factory = ScriptedFactory::new();
        let worker = Arc::new(worker(&factory));
        worker.init(PackageSet::empty()).await.unwrap();

        let running = {
            let worker = Arc::clone(&worker);
            tokio::spawn(async move { worker.run("while True: pass").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        worker.terminate();

        assert!(running.await.unwrap().unwrap_err().is_worker_gone());
        assert!(worker.run("print(1)").await.unwrap_err().is_worker_gone());
    }

    #[tokio::test]
    async fn dropping_the_handle_stops_the_interpreter() {
        let factory = ScriptedFactory::new();
        let worker = worker(&factory);
        worker.init(PackageSet::empty()).await.unwrap();
        drop(worker);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(factory.journal().dropped, 1);
    }
}
