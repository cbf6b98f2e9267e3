// Exec of the real transcoder with exit-status passthrough.

use std::path::Path;

use tokio::process::Command;
use tracing::info;

use crate::error::LocalRunError;

/// Run the real transcoder in place. stdio is inherited: the media server
/// reads the genuine progress output straight from the child's stderr.
pub async fn run_local(transcoder: &Path, args: &[String]) -> Result<i32, LocalRunError> {
    info!(program = %transcoder.display(), args = args.len(), "running local transcoder");
    let status = Command::new(transcoder)
        .args(args)
        .status()
        .await
        .map_err(|source| LocalRunError::Spawn {
            program: transcoder.to_path_buf(),
            source,
        })?;
    // a signal death has no code; report it the way a shell would
    Ok(status.code().unwrap_or(1))
}
