//! Production executor factory

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use hostfleet_exec::{
    ExecError, HostIdentity, LocalExecutor, RemoteExecutor, SessionOptions, SshExecutor, Transport,
};

use crate::pool::ExecutorFactory;

/// Opens SSH sessions, or binds the local process layer for `transport = "local"`
#[derive(Debug, Clone, Default)]
pub struct SessionExecutorFactory {
    options: SessionOptions,
}

impl SessionExecutorFactory {
    /// Create a factory applying `options` to every session
    pub fn new(options: SessionOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl ExecutorFactory for SessionExecutorFactory {
    async fn create(&self, host: &HostIdentity) -> Result<Arc<dyn RemoteExecutor>, ExecError> {
        match host.transport() {
            Transport::Local => {
                debug!(host = %host.name(), "binding local executor");
                let executor =
                    LocalExecutor::for_host(host)?.with_staging_dir(self.options.staging_dir.clone());
                Ok(Arc::new(executor))
            }
            Transport::Ssh => Ok(Arc::new(SshExecutor::connect(host, &self.options).await?)),
        }
    }
}
