//! Process management for the WhatsApp Web bridge sidecar.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// How long a freshly spawned sidecar gets before we check it is still alive
const STARTUP_GRACE: Duration = Duration::from_millis(500);

/// Handle to a running sidecar process.
pub struct SidecarProcess {
    child: Child,
}

impl SidecarProcess {
    /// Check if the process is still running.
    #[cfg(test)]
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Stop the sidecar, waiting briefly for it to exit.
    pub async fn stop(&mut self) -> Result<()> {
        info!("Stopping WhatsApp sidecar");
        self.child
            .start_kill()
            .context("Failed to signal sidecar process")?;

        match tokio::time::timeout(Duration::from_secs(5), self.child.wait()).await {
            Ok(Ok(status)) => info!("WhatsApp sidecar exited: {}", status),
            Ok(Err(e)) => warn!("Error waiting for sidecar process: {}", e),
            Err(_) => warn!("Sidecar process did not exit in time"),
        }
        Ok(())
    }
}

/// Configuration for starting the sidecar process.
#[derive(Debug, Clone)]
pub struct SidecarConfig {
    /// Interpreter used to run the script
    pub program: String,
    pub script: PathBuf,
    pub session_dir: PathBuf,
    pub client_id: String,
    pub bridge_url: String,
}

/// Spawn the sidecar and forward its output to tracing.
pub async fn start_sidecar(config: &SidecarConfig) -> Result<SidecarProcess> {
    if !config.script.exists() {
        bail!(
            "WhatsApp sidecar script not found: {}",
            config.script.display()
        );
    }

    info!(
        "Starting WhatsApp sidecar: {} {}",
        config.program,
        config.script.display()
    );

    let mut child = Command::new(&config.program)
        .arg(&config.script)
        .env("WHATSAPP_SESSION_DIR", &config.session_dir)
        .env("WHATSAPP_CLIENT_ID", &config.client_id)
        .env("WHATSAPP_BRIDGE_URL", &config.bridge_url)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to spawn sidecar with {}", config.program))?;

    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                info!(target: "whatsapp_sidecar", "{}", line);
            }
        });
    }

    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!(target: "whatsapp_sidecar", "{}", line);
            }
        });
    }

    tokio::time::sleep(STARTUP_GRACE).await;

    match child.try_wait() {
        Ok(Some(status)) => bail!("Sidecar process exited immediately with status: {}", status),
        Ok(None) => debug!("Sidecar still running after startup grace period"),
        Err(e) => bail!("Failed to check sidecar process status: {}", e),
    }

    Ok(SidecarProcess { child })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(script: PathBuf) -> SidecarConfig {
        SidecarConfig {
            program: "sh".to_string(),
            script,
            session_dir: PathBuf::from("/tmp"),
            client_id: "whatsapp-bot".to_string(),
            bridge_url: "ws://127.0.0.1:3710".to_string(),
        }
    }

    #[tokio::test]
    async fn test_missing_script() {
        let err = start_sidecar(&config(PathBuf::from("/nonexistent/bridge.js")))
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_immediate_exit_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("bridge.sh");
        std::fs::write(&script, "exit 3\n").unwrap();

        let err = start_sidecar(&config(script)).await.err().unwrap();
        assert!(err.to_string().contains("exited immediately"));
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("bridge.sh");
        std::fs::write(&script, "echo started\nsleep 30\n").unwrap();

        let mut process = start_sidecar(&config(script)).await.unwrap();
        assert!(process.is_running());
        process.stop().await.unwrap();
        assert!(!process.is_running());
    }
}
