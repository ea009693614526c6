//! Child-process endpoints: a work item in on stdin, a reply out on stdout.

use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tracing::debug;

use super::tools;
use crate::error::WorkError;
use crate::task::{Output, WorkItem};

/// Reply a child writes to stdout
pub type Reply = std::result::Result<Output, WorkError>;

/// Runs each work item in a fresh child process.
///
/// The item goes to the child's stdin as JSON, the child answers on stdout
/// with a JSON [`Reply`]. `blueprint exec` is the matching child side.
#[derive(Debug, Clone)]
pub struct ProcessEndpoint {
    name: String,
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessEndpoint {
    pub fn new(name: impl Into<String>, program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args,
        }
    }

    /// Endpoint backed by this binary's `exec` subcommand
    pub fn current_exe(name: impl Into<String>) -> Result<Self> {
        let program = std::env::current_exe().context("Failed to locate current executable")?;
        Ok(Self::new(name, program, vec!["exec".into()]))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `item` in a fresh child and decode its reply
    pub async fn submit(&self, item: WorkItem) -> std::result::Result<Output, WorkError> {
        let payload = serde_json::to_vec(&item)
            .map_err(|e| WorkError::execution(format!("failed to encode item: {}", e)))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| WorkError::unavailable(&self.name, e.to_string()))?;
        debug!(endpoint = %self.name, item = %item.id, pid = ?child.id(), "child started");

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&payload)
                .await
                .map_err(|e| WorkError::execution(format!("failed to send item: {}", e)))?;
            // stdin closes on drop so the child sees EOF
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| WorkError::execution(format!("failed to wait for child: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(WorkError::execution(format!(
                "endpoint exited with {:?}: {}",
                output.status.code(),
                stderr.trim()
            )));
        }

        decode_reply(&output.stdout)
    }
}

fn decode_reply(stdout: &[u8]) -> std::result::Result<Output, WorkError> {
    serde_json::from_slice::<Reply>(stdout)
        .map_err(|e| WorkError::execution(format!("unreadable endpoint reply: {}", e)))?
}

/// Child side of the endpoint: one item from stdin, one reply on stdout
pub async fn serve_stdin() -> Result<()> {
    serve(tokio::io::stdin(), tokio::io::stdout()).await
}

/// Read one work item to EOF, run it with the built-in tools, write the reply
pub async fn serve<R, W>(mut input: R, mut output: W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut payload = Vec::new();
    input
        .read_to_end(&mut payload)
        .await
        .context("Failed to read work item")?;
    let item: WorkItem = serde_json::from_slice(&payload).context("Failed to parse work item")?;
    debug!(item = %item.id, action = item.action.name(), "serving endpoint item");

    let reply: Reply = tools::run(&item.action, "exec").await;
    let encoded = serde_json::to_vec(&reply).context("Failed to encode reply")?;

    output
        .write_all(&encoded)
        .await
        .context("Failed to write reply")?;
    output.flush().await.context("Failed to flush reply")?;
    Ok(())
}
