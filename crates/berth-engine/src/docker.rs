#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{program} CLI not found; install Docker (https://docs.docker.com/get-docker/) or set BERTH_ENGINE")]
    NotFound {
        program: String,
        source: std::io::Error,
    },

    #[error("{program} command failed: {args:?}\n{stderr}")]
    CommandFailed {
        program: String,
        args: Vec<String>,
        /// Exit code, `None` when terminated by a signal
        status: Option<i32>,
        stderr: String,
    },

    #[error("{program} output was not valid UTF-8")]
    InvalidUtf8 {
        program: String,
        source: std::string::FromUtf8Error,
    },

    #[error("unexpected {program} output: {output:?}")]
    UnexpectedOutput { program: String, output: String },
}

impl EngineError {
    /// Stderr of a failed command, empty for other variants.
    pub fn stderr(&self) -> &str {
        match self {
            Self::CommandFailed { stderr, .. } => stderr,
            _ => "",
        }
    }
}
