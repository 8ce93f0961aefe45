use std::fmt;

#[derive(Debug)]
pub enum Error {
    /// Source text failed to parse. Line and column are 1-based.
    Parse {
        line: u64,
        column: u64,
        message: String,
    },
    Parameter(String),
    Emit(String),
    Io(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Parse {
                line,
                column,
                message,
            } => write!(f, "{message}: line {line}; column {column}"),
            Error::Parameter(msg) => write!(f, "invalid parameters: {msg}"),
            Error::Emit(msg) => write!(f, "emit error: {msg}"),
            Error::Io(e) => write!(f, "read error: {e}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}
