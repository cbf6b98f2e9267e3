#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0}")]
    Invocation(#[from] invocation::InvocationError),

    #[error("{0}")]
    Dispatch(#[from] dispatch::DispatchError),

    #[error("{0}")]
    LocalRun(#[from] localrun::LocalRunError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CliError>;
