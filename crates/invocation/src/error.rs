#[derive(Debug, thiserror::Error)]
pub enum InvocationError {
    #[error("empty command line")]
    EmptyArgv,

    #[error("no input path in command line")]
    MissingInput,

    #[error("output target `{0}` is a bare flag, not a path")]
    FlagAsOutput(String),

    #[error("invalid value `{value}` for `{flag}`")]
    InvalidValue { flag: String, value: String },
}
