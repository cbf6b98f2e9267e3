// Fast-start safety net.
//
// The real local transcoder runs with the unmodified argv purely to place
// the first media-server-visible segments on disk within seconds; the
// media server times a session out after roughly two to three minutes of
// an empty output directory. The child is killed the moment the swarm
// completes (or dies).

use std::path::Path;
use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::{debug, warn};

pub(crate) struct FastStart {
    child: Option<Child>,
}

impl FastStart {
    /// Spawn the real transcoder, or a no-op guard when none is configured.
    pub fn spawn(real_transcoder: Option<&Path>, raw_args: &[String], cwd: &Path) -> Self {
        let Some(program) = real_transcoder else {
            return Self { child: None };
        };
        let spawned = Command::new(program)
            .args(raw_args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn();
        match spawned {
            Ok(child) => {
                debug!(program = %program.display(), "fast-start transcoder spawned");
                Self { child: Some(child) }
            }
            Err(e) => {
                warn!(program = %program.display(), error = %e, "fast-start spawn failed");
                Self { child: None }
            }
        }
    }

    /// Kill the child if it is still running.
    pub async fn terminate(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                warn!(error = %e, "fast-start kill failed");
            } else {
                debug!("fast-start transcoder terminated");
            }
        }
    }
}
