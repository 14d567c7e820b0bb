//! Process-wide runner provider.
//!
//! Holds the defaults every runner starts from: configuration, interpreter
//! factory, the input transport and one attached [`InputBroker`] shared by
//! all runners.

use std::sync::Arc;

use pybridge_channel::{ChannelError, DirectTransport, InputBroker, SharedTransport};
use pybridge_core::{PackageSet, RunnerConfig, SessionId, TransportConfig};
use pybridge_proxy::ProxyTransport;
use pybridge_runner::SharedFactory;
use tokio::task::JoinHandle;

use crate::controller::RunnerController;
use crate::error::LifecycleError;

/// Build the transport selected by `config`.
pub fn transport_for(config: &TransportConfig) -> Result<SharedTransport, ChannelError> {
    let transport: SharedTransport = match config {
        TransportConfig::Direct => Arc::new(DirectTransport::new()),
        TransportConfig::Proxied { prefix } => Arc::new(ProxyTransport::install(prefix.as_str())?),
    };
    Ok(transport)
}

/// Creates runners that share configuration, transport and broker.
///
/// Must be created inside a Tokio runtime: the broker listens on a
/// background task for as long as the provider lives.
pub struct Provider {
    config: RunnerConfig,
    factory: SharedFactory,
    transport: SharedTransport,
    broker: Arc<InputBroker>,
    listener: JoinHandle<()>,
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("config", &self.config)
            .field("transport", &self.transport.kind())
            .finish_non_exhaustive()
    }
}

impl Provider {
    /// Provider using the transport named in `config`.
    pub fn new(config: RunnerConfig, factory: SharedFactory) -> Result<Self, LifecycleError> {
        let transport = transport_for(&config.transport)?;
        Ok(Self::with_transport(config, factory, transport))
    }

    /// Provider over an existing transport.
    pub fn with_transport(
        config: RunnerConfig,
        factory: SharedFactory,
        transport: SharedTransport,
    ) -> Self {
        let broker = Arc::new(InputBroker::new(Arc::clone(&transport)));
        let listener = broker.attach();
        tracing::debug!(
            transport = %transport.kind(),
            timeout_ms = config.timeout_ms,
            lazy_start = config.lazy_start,
            "runner provider ready"
        );
        Self {
            config,
            factory,
            transport,
            broker,
            listener,
        }
    }

    /// Process-wide configuration.
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// The shared transport.
    pub fn transport(&self) -> &SharedTransport {
        &self.transport
    }

    /// The shared broker.
    pub fn broker(&self) -> &Arc<InputBroker> {
        &self.broker
    }

    /// A runner whose packages are the defaults merged with `packages`.
    pub fn runner(&self, packages: &PackageSet) -> RunnerController {
        let config = RunnerConfig {
            packages: PackageSet::merge(&self.config.packages, packages),
            ..self.config.clone()
        };
        RunnerController::new(
            config,
            Arc::clone(&self.factory),
            Arc::clone(&self.transport),
            Arc::clone(&self.broker),
        )
    }

    /// Like [`runner`](Self::runner), initializing right away unless
    /// `lazy_start` is set.
    pub async fn start_runner(&self, packages: &PackageSet) -> Result<RunnerController, LifecycleError> {
        let runner = self.runner(packages);
        if self.config.lazy_start {
            return Ok(runner);
        }
        runner.create_execution_context()?;
        runner.initialize().await?;
        Ok(runner)
    }

    /// Answer the oldest outstanding request of `session_id`.
    pub fn send_input(&self, session_id: SessionId, value: impl Into<String>) -> Result<(), LifecycleError> {
        let request = self
            .broker
            .outstanding_for(session_id)
            .into_iter()
            .next()
            .ok_or(LifecycleError::NoPendingInput)?;
        self.broker.submit(request.request_id, value)?;
        Ok(())
    }

    /// Prompt of the oldest outstanding request of `session_id`.
    pub fn prompt(&self, session_id: SessionId) -> Option<String> {
        self.broker
            .outstanding_for(session_id)
            .into_iter()
            .next()
            .map(|request| request.prompt)
    }

    /// Whether any runner is waiting for input.
    pub fn is_awaiting_input(&self) -> bool {
        self.broker.is_awaiting_input()
    }
}

impl Drop for Provider {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use pybridge_channel::TransportKind;
    use pybridge_runner::testing::ScriptedFactory;

    #[tokio::test]
    async fn runner_packages_merge_defaults_and_overrides() {
        let config = RunnerConfig {
            packages: PackageSet::new(["numpy"], ["rich"]),
            ..RunnerConfig::default()
        };
        let factory = ScriptedFactory::new();
        let provider = Provider::new(config, Arc::new(factory.clone())).unwrap();

        let runner = provider
            .start_runner(&PackageSet::new(["pandas", "numpy"], ["rich", "attrs"]))
            .await
            .unwrap();
        assert!(runner.is_ready());

        let journal = factory.journal();
        assert_eq!(
            journal.loaded_packages,
            vec![vec!["numpy".to_string(), "pandas".to_string()]]
        );
        assert_eq!(
            journal.installed_packages,
            vec![vec!["rich".to_string(), "attrs".to_string()]]
        );
    }

    #[tokio::test]
    async fn lazy_provider_does_not_start() {
        let config = RunnerConfig {
            lazy_start: true,
            ..RunnerConfig::default()
        };
        let factory = ScriptedFactory::new();
        let provider = Provider::new(config, Arc::new(factory.clone())).unwrap();
        let runner = provider.start_runner(&PackageSet::empty()).await.unwrap();
        assert!(!runner.is_ready());
        assert_eq!(factory.journal().created, 0);
    }

    #[tokio::test]
    async fn proxied_transport_is_selected_by_config() {
        let config = RunnerConfig {
            transport: TransportConfig::proxied(),
            ..RunnerConfig::default()
        };
        let provider = Provider::new(config, Arc::new(ScriptedFactory::new())).unwrap();
        assert_eq!(provider.transport().kind(), TransportKind::Proxied);
    }

    #[tokio::test]
    async fn invalid_prefix_is_transport_unavailable() {
        let config = RunnerConfig {
            transport: TransportConfig::Proxied {
                prefix: "bad prefix/".into(),
            },
            ..RunnerConfig::default()
        };
        let err = Provider::new(config, Arc::new(ScriptedFactory::new())).unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::Channel(ChannelError::TransportUnavailable(_))
        ));
    }
}
