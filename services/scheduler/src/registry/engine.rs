//! Reload signalling for the external execution engine.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::EngineReload;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to run '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' exited with {status}: {stderr}")]
    CommandFailed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("reload request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("reload endpoint returned {status}: {body}")]
    Status { status: u16, body: String },
}

/// Tells the execution engine that the registry file changed.
#[async_trait]
pub trait EngineGateway: Send + Sync {
    async fn reload(&self) -> Result<(), EngineError>;
}

/// Builds the gateway selected by configuration.
pub fn gateway_for(reload: &EngineReload) -> Result<std::sync::Arc<dyn EngineGateway>, EngineError> {
    let gateway: std::sync::Arc<dyn EngineGateway> = match reload {
        EngineReload::Command { program, args } => {
            std::sync::Arc::new(CommandReload::new(program.clone(), args.clone()))
        }
        EngineReload::Http { url } => std::sync::Arc::new(HttpReload::new(url.clone())?),
        EngineReload::Disabled => std::sync::Arc::new(NoopReload),
    };
    Ok(gateway)
}

/// Restarts the engine by running a local command, e.g. `docker restart ofelia`.
pub struct CommandReload {
    program: String,
    args: Vec<String>,
}

impl CommandReload {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl EngineGateway for CommandReload {
    async fn reload(&self) -> Result<(), EngineError> {
        debug!(program = %self.program, args = ?self.args, "Restarting execution engine");
        let output = Command::new(&self.program)
            .args(&self.args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| EngineError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(EngineError::CommandFailed {
                program: self.program.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        info!(program = %self.program, "Execution engine restarted");
        Ok(())
    }
}

/// Asks a running engine to re-read its configuration over HTTP.
pub struct HttpReload {
    client: reqwest::Client,
    url: String,
}

impl HttpReload {
    pub fn new(url: String) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl EngineGateway for HttpReload {
    async fn reload(&self) -> Result<(), EngineError> {
        let response = self.client.post(&self.url).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::Status { status, body });
        }

        info!(url = %self.url, "Execution engine reloaded");
        Ok(())
    }
}

/// Skips reloading.
pub struct NoopReload;

#[async_trait]
impl EngineGateway for NoopReload {
    async fn reload(&self) -> Result<(), EngineError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_command_reload_reports_exit_status() {
        let ok = CommandReload::new("sh", vec!["-c".into(), "exit 0".into()]);
        assert!(ok.reload().await.is_ok());

        let failing = CommandReload::new("sh", vec!["-c".into(), "echo boom >&2; exit 3".into()]);
        match failing.reload().await {
            Err(EngineError::CommandFailed { stderr, .. }) => assert_eq!(stderr, "boom"),
            other => panic!("expected CommandFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_command_reload_missing_program() {
        let missing = CommandReload::new("pollmesh-definitely-not-installed", vec![]);
        assert!(matches!(
            missing.reload().await,
            Err(EngineError::Spawn { .. })
        ));
    }

    #[tokio::test]
    async fn test_http_reload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/reload"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let gateway = HttpReload::new(format!("{}/reload", server.uri())).unwrap();
        gateway.reload().await.unwrap();
    }

    #[tokio::test]
    async fn test_http_reload_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&server)
            .await;

        let gateway = HttpReload::new(server.uri()).unwrap();
        assert!(matches!(
            gateway.reload().await,
            Err(EngineError::Status { status: 503, .. })
        ));
    }
}
