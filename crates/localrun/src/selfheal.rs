// Self-heal of the interception point.
//
// On Plex the cartridge occupies the `Plex Transcoder` path and keeps the
// real binary under a backup name. Server upgrades rewrite that directory,
// so before anything else the backup is re-validated; when it is gone, the
// sibling files are searched for something that looks like a native
// executable. A fingerprint of the backup is kept so upgrades are visible
// in the logs. Jellyfin intercepts via a separate shim file and needs none
// of this.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::LocalRunError;

/// Well-known backup names tried before scanning the parent directory.
const BACKUP_SIBLINGS: &[&str] = &["Plex Transcoder.real", "Plex Transcoder.backup"];

pub struct SelfHeal {
    /// Expected location of the real transcoder backup.
    backup_path: PathBuf,
    /// Install-global state directory holding `.binary_fingerprint` and
    /// `.plex_version_history`.
    state_dir: PathBuf,
}

impl SelfHeal {
    pub fn new(backup_path: PathBuf, state_dir: PathBuf) -> Self {
        Self {
            backup_path,
            state_dir,
        }
    }

    /// Validate the backup transcoder, searching siblings when the expected
    /// path is gone. Returns the path to use for local exec and fast-start.
    pub fn locate_transcoder(&self) -> Result<PathBuf, LocalRunError> {
        if is_native_executable(&self.backup_path) {
            return Ok(self.backup_path.clone());
        }
        warn!(
            backup = %self.backup_path.display(),
            "backup transcoder missing, searching siblings"
        );

        let parent = self
            .backup_path
            .parent()
            .unwrap_or_else(|| Path::new("."));
        for name in BACKUP_SIBLINGS {
            let candidate = parent.join(name);
            if is_native_executable(&candidate) {
                info!(found = %candidate.display(), "recovered transcoder from sibling");
                return Ok(candidate);
            }
        }
        // last resort: anything in the parent directory with a native
        // executable magic
        if let Ok(entries) = std::fs::read_dir(parent) {
            for entry in entries.flatten() {
                let candidate = entry.path();
                if candidate != self.backup_path && is_native_executable(&candidate) {
                    info!(found = %candidate.display(), "recovered transcoder from directory scan");
                    return Ok(candidate);
                }
            }
        }

        Err(LocalRunError::TranscoderMissing {
            searched: parent.to_path_buf(),
        })
    }

    /// Compare the backup's md5 against the recorded fingerprint; a change
    /// is a host upgrade event. Returns whether the fingerprint changed.
    pub fn check_fingerprint(&self, transcoder: &Path) -> Result<bool, LocalRunError> {
        let bytes = std::fs::read(transcoder)?;
        let current = format!("{:x}", md5::compute(&bytes));

        let fingerprint_file = self.state_dir.join(".binary_fingerprint");
        let previous = std::fs::read_to_string(&fingerprint_file)
            .ok()
            .map(|s| s.trim().to_owned());

        let changed = match previous.as_deref() {
            Some(prev) if prev == current => false,
            Some(prev) => {
                info!(prev, new = %current, "transcoder fingerprint changed (host upgrade)");
                let history = self.state_dir.join(".plex_version_history");
                let line = format!(
                    "{} fingerprint {} -> {}\n",
                    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
                    prev,
                    current
                );
                if let Err(e) = append_line(&history, &line) {
                    warn!(error = %e, "version history append failed");
                }
                true
            }
            None => {
                debug!(fingerprint = %current, "recording initial transcoder fingerprint");
                false
            }
        };

        std::fs::create_dir_all(&self.state_dir)?;
        std::fs::write(&fingerprint_file, &current)?;
        Ok(changed)
    }
}

fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    use std::io::Write;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.write_all(line.as_bytes())
}

/// ELF or Mach-O magic check; upgrades drop all sorts of text stubs and
/// scripts where binaries used to be.
fn is_native_executable(path: &Path) -> bool {
    let Ok(bytes) = std::fs::read(path) else {
        return false;
    };
    if bytes.len() < 4 {
        return false;
    }
    let magic = [bytes[0], bytes[1], bytes[2], bytes[3]];
    matches!(
        magic,
        [0x7f, b'E', b'L', b'F']
            | [0xfe, 0xed, 0xfa, 0xce]
            | [0xfe, 0xed, 0xfa, 0xcf]
            | [0xce, 0xfa, 0xed, 0xfe]
            | [0xcf, 0xfa, 0xed, 0xfe]
            | [0xca, 0xfe, 0xba, 0xbe]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const ELF: &[u8] = &[0x7f, b'E', b'L', b'F', 0, 0, 0, 0];
    const MACHO: &[u8] = &[0xcf, 0xfa, 0xed, 0xfe, 0, 0, 0, 0];

    #[test]
    fn backup_in_place_is_used_directly() {
        let dir = tempfile::tempdir().unwrap();
        let backup = dir.path().join("Plex Transcoder.cartridge-backup");
        std::fs::write(&backup, ELF).unwrap();

        let heal = SelfHeal::new(backup.clone(), dir.path().to_path_buf());
        assert_eq!(heal.locate_transcoder().unwrap(), backup);
    }

    #[test]
    fn missing_backup_recovers_from_sibling() {
        let dir = tempfile::tempdir().unwrap();
        let backup = dir.path().join("Plex Transcoder.cartridge-backup");
        std::fs::write(dir.path().join("Plex Transcoder.real"), MACHO).unwrap();

        let heal = SelfHeal::new(backup, dir.path().to_path_buf());
        let found = heal.locate_transcoder().unwrap();
        assert!(found.ends_with("Plex Transcoder.real"));
    }

    #[test]
    fn directory_scan_skips_text_stubs() {
        let dir = tempfile::tempdir().unwrap();
        let backup = dir.path().join("gone");
        std::fs::write(dir.path().join("wrapper.sh"), b"#!/bin/sh\nexec nothing\n").unwrap();
        std::fs::write(dir.path().join("binary"), ELF).unwrap();

        let heal = SelfHeal::new(backup, dir.path().to_path_buf());
        let found = heal.locate_transcoder().unwrap();
        assert!(found.ends_with("binary"));
    }

    #[test]
    fn nothing_recoverable_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let heal = SelfHeal::new(dir.path().join("gone"), dir.path().to_path_buf());
        assert!(matches!(
            heal.locate_transcoder(),
            Err(LocalRunError::TranscoderMissing { .. })
        ));
    }

    #[test]
    fn fingerprint_change_is_recorded_as_upgrade() {
        let dir = tempfile::tempdir().unwrap();
        let binary = dir.path().join("transcoder");
        std::fs::write(&binary, ELF).unwrap();

        let heal = SelfHeal::new(binary.clone(), dir.path().to_path_buf());
        // first sighting: recorded, not a change
        assert!(!heal.check_fingerprint(&binary).unwrap());
        // unchanged: no event
        assert!(!heal.check_fingerprint(&binary).unwrap());

        // host upgrade swaps the binary
        std::fs::write(&binary, MACHO).unwrap();
        assert!(heal.check_fingerprint(&binary).unwrap());

        let history =
            std::fs::read_to_string(dir.path().join(".plex_version_history")).unwrap();
        assert!(history.contains("fingerprint"));
    }
}
