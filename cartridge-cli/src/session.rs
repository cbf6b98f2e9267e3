// Per-session state capture and the install-global logs.
//
// Layout per spec: sessions/<id>/ holds the narrative log and the job
// request/response snapshots; cartridge_events.log and master.log live at
// the state-dir root and are append-only, one line per write.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use beam_proto::SessionId;
use chrono::Utc;
use dispatch::EventSink;
use tracing::warn;

pub struct Session {
    pub id: SessionId,
    pub dir: PathBuf,
    state_dir: PathBuf,
    // line-atomic appends: one writer at a time per file
    write_lock: Mutex<()>,
}

impl Session {
    /// Create the session identity (`<utc-compact-timestamp>_<pid>`) and
    /// its directory.
    pub fn create(state_dir: &Path) -> std::io::Result<Self> {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S").to_string();
        let id = SessionId::from_parts(&stamp, std::process::id());
        let dir = state_dir.join("sessions").join(id.as_str());
        std::fs::create_dir_all(&dir)?;
        std::fs::create_dir_all(state_dir)?;

        // First run on this install: record what we are.
        let install_meta = state_dir.join(".install_meta");
        if !install_meta.exists() {
            let meta = serde_json::json!({
                "cartridge_version": beam_proto::CARTRIDGE_VERSION,
                "first_run": Utc::now().to_rfc3339(),
            });
            let _ = std::fs::write(&install_meta, meta.to_string());
        }

        Ok(Self {
            id,
            dir,
            state_dir: state_dir.to_path_buf(),
            write_lock: Mutex::new(()),
        })
    }

    /// Scratch space for chunk staging directories.
    pub fn staging_root(&self) -> PathBuf {
        self.dir.join("staging")
    }

    /// Append one line to the session narrative (`00_session.log`).
    pub fn narrative(&self, line: &str) {
        let stamped = format!("{} {}\n", Utc::now().format("%H:%M:%S%.3f"), line);
        self.append(&self.dir.join("00_session.log"), &stamped);
    }

    /// Persist a JSON snapshot (`01_job_request.json`, …).
    pub fn write_json(&self, name: &str, value: &serde_json::Value) {
        let path = self.dir.join(name);
        match serde_json::to_vec_pretty(value) {
            Ok(bytes) => {
                if let Err(e) = std::fs::write(&path, bytes) {
                    warn!(name, error = %e, "state snapshot write failed");
                }
            }
            Err(e) => warn!(name, error = %e, "state snapshot serialization failed"),
        }
    }

    /// One line per session in the install-global `master.log`.
    pub fn append_master(&self, strategy: &str, exit_code: i32) {
        let line = format!(
            "{} session={} strategy={} exit={}\n",
            Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
            self.id,
            strategy,
            exit_code
        );
        self.append(&self.state_dir.join("master.log"), &line);
    }

    fn append(&self, path: &Path, line: &str) {
        let _guard = self.write_lock.lock().expect("session log lock poisoned");
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut f| f.write_all(line.as_bytes()));
        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "log append failed");
        }
    }
}

impl EventSink for Session {
    fn log_event(&self, kind: &str, detail: serde_json::Value) {
        let line = format!(
            "{}\n",
            serde_json::json!({
                "ts": Utc::now().to_rfc3339(),
                "session": self.id.as_str(),
                "event": kind,
                "detail": detail,
            })
        );
        self.append(&self.state_dir.join("cartridge_events.log"), &line);
        // chunk-level events additionally feed the per-session download
        // debug log used when dissecting multi-worker runs
        if kind.starts_with("chunk") || kind == "distribution" || kind == "endgame_duplicate" {
            self.append(&self.dir.join("chunk_download.log"), &line);
        }
    }
}
