//! External engine process management
//!
//! The engine is a separate xray-compatible binary that the pipeline
//! configures and drives but does not implement. It is modeled as a scoped
//! capability behind two traits so the pipeline can run against a fake
//! engine in tests: a launcher that starts one process per batch, and a
//! handle that reports liveness and stops the process. `stop` is idempotent
//! and safe to call after a crash; `kill_on_drop` backstops unwinds so no
//! orphaned process keeps holding ports.

use crate::engine::config::BatchPlan;
use anyhow::Context;
use async_trait::async_trait;
use log::{debug, info};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::{Child, Command};

/// A running engine instance serving one batch
#[async_trait]
pub trait EngineHandle: Send {
    /// Whether the process is still alive
    fn is_running(&mut self) -> bool;

    /// Stop the process; idempotent, safe after a crash
    async fn stop(&mut self);
}

/// Starts one engine process for a synthesized batch configuration
#[async_trait]
pub trait EngineLauncher: Send + Sync {
    async fn start(&self, plan: &BatchPlan) -> crate::Result<Box<dyn EngineHandle>>;
}

/// Launcher spawning the external xray-compatible binary
pub struct XrayLauncher {
    binary: PathBuf,
}

impl XrayLauncher {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl EngineLauncher for XrayLauncher {
    async fn start(&self, plan: &BatchPlan) -> crate::Result<Box<dyn EngineHandle>> {
        let config_path =
            std::env::temp_dir().join(format!("proxy-sift-batch-{}.json", plan.index));
        let json = serde_json::to_string_pretty(&plan.config)?;
        tokio::fs::write(&config_path, json)
            .await
            .with_context(|| format!("failed to write engine config {:?}", config_path))?;

        let child = Command::new(&self.binary)
            .arg("run")
            .arg("-c")
            .arg(&config_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn engine {:?}", self.binary))?;

        info!(
            "engine started (pid {:?}) with {} listeners for batch {}",
            child.id(),
            plan.assignments.len(),
            plan.index
        );

        Ok(Box::new(XrayProcess {
            child,
            config_path,
            stopped: false,
        }))
    }
}

/// Handle to a spawned engine process
pub struct XrayProcess {
    child: Child,
    config_path: PathBuf,
    stopped: bool,
}

#[async_trait]
impl EngineHandle for XrayProcess {
    fn is_running(&mut self) -> bool {
        if self.stopped {
            return false;
        }
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                debug!("engine exited with {}", status);
                false
            }
            Err(e) => {
                debug!("engine status unavailable: {}", e);
                false
            }
        }
    }

    async fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        // start_kill fails when the process already exited; wait regardless
        // so a crashed engine is still reaped
        let _ = self.child.start_kill();
        let _ = self.child.wait().await;
        if let Err(e) = tokio::fs::remove_file(&self.config_path).await {
            debug!("could not remove engine config {:?}: {}", self.config_path, e);
        }
    }
}
