use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum LocalRunError {
    #[error("no real transcoder found near `{searched}`")]
    TranscoderMissing { searched: PathBuf },

    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: PathBuf,
        source: std::io::Error,
    },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}
