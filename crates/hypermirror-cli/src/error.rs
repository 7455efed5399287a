use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] hypermirror_core::ConfigError),

    #[error(transparent)]
    Mirror(#[from] hypermirror_core::MirrorError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => 2,
            Self::Mirror(error) => match error.code() {
                "source.unknown" => 2,
                code if code.starts_with("upstream.") => 3,
                _ => 4,
            },
            Self::Serialization(_) => 4,
            Self::Io(_) => 10,
        }
    }
}
