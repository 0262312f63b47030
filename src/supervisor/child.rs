//! Real OS-process implementation of [`RunnerSpawner`]. Each admitted room
//! gets one `ghost-runner --url <base> --room <hub_sid> --runner` child,
//! inheriting this process's stdio.

use super::state::RunnerSpawner;
use log::{info, warn};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};

/// Resolve the runner binary to spawn: an explicit `RUNNER_SCRIPT` override,
/// or the `ghost-runner` binary installed alongside this one.
pub fn resolve_runner_program(configured: &Option<String>) -> PathBuf {
    if let Some(path) = configured {
        return PathBuf::from(path);
    }
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("ghost-runner")))
        .unwrap_or_else(|| PathBuf::from("ghost-runner"))
}

/// Handle returned to [`SupervisorState`](super::state::SupervisorState) for
/// a spawned child. Dropping it does nothing by itself — termination is
/// explicit via [`ProcessSpawner::terminate`] so restart bookkeeping stays in
/// the pure state machine.
pub struct ChildHandle {
    kill_tx: Option<oneshot::Sender<()>>,
}

pub struct ProcessSpawner {
    program: PathBuf,
    base_url: String,
    exit_tx: mpsc::UnboundedSender<String>,
}

impl ProcessSpawner {
    pub fn new(program: PathBuf, base_url: String, exit_tx: mpsc::UnboundedSender<String>) -> Self {
        Self {
            program,
            base_url,
            exit_tx,
        }
    }
}

impl RunnerSpawner for ProcessSpawner {
    type Handle = ChildHandle;

    fn spawn(&self, hub_sid: &str) -> std::io::Result<ChildHandle> {
        let mut child = Command::new(&self.program)
            .arg("--url")
            .arg(&self.base_url)
            .arg("--room")
            .arg(hub_sid)
            .arg("--runner")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        info!("spawned ghost-runner for room {} (pid {:?})", hub_sid, child.id());

        let (kill_tx, kill_rx) = oneshot::channel();
        let hub_sid = hub_sid.to_string();
        let exit_tx = self.exit_tx.clone();

        tokio::spawn(async move {
            let mut kill_rx = kill_rx;
            let raced = tokio::select! {
                _ = &mut kill_rx => None,
                status = child.wait() => Some(status),
            };
            // If the kill request won the race, `child.wait()` above was
            // dropped (cancel-safe) and its borrow released — safe to
            // request the kill and wait again here.
            let status = match raced {
                Some(status) => status,
                None => {
                    let _ = child.start_kill();
                    child.wait().await
                }
            };
            match status {
                Ok(status) => info!("ghost-runner for room {} exited: {}", hub_sid, status),
                Err(e) => warn!("ghost-runner for room {} wait() failed: {}", hub_sid, e),
            }
            let _ = exit_tx.send(hub_sid);
        });

        Ok(ChildHandle {
            kill_tx: Some(kill_tx),
        })
    }

    fn terminate(&self, mut handle: ChildHandle) {
        if let Some(tx) = handle.kill_tx.take() {
            let _ = tx.send(());
        }
    }
}
