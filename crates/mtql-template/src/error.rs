use std::fmt;

#[derive(Debug)]
pub enum TemplateError {
    Decode(String),
    Parameter(String),
    Emit(String),
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateError::Decode(msg) => write!(f, "template decode error: {msg}"),
            TemplateError::Parameter(msg) => write!(f, "invalid parameters: {msg}"),
            TemplateError::Emit(msg) => write!(f, "emit error: {msg}"),
        }
    }
}

impl std::error::Error for TemplateError {}

impl From<mtql::Error> for TemplateError {
    fn from(e: mtql::Error) -> Self {
        match e {
            mtql::Error::Parameter(msg) => TemplateError::Parameter(msg),
            other => TemplateError::Emit(other.to_string()),
        }
    }
}
