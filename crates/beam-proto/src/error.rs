#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    #[error("unknown source `{0}`, expected `plex` or `jellyfin`")]
    UnknownSource(String),

    #[error("malformed job id `{0}`")]
    MalformedJobId(String),
}
