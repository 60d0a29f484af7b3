/// Protocol parsing errors
#[derive(Debug)]
pub enum ProtocolError {
    InsufficientData,
    InvalidMessage,
    UnsupportedProtocolVersion(i32),
    MissingParameter(&'static str),
    InvalidUtf8,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolError::InsufficientData => write!(f, "insufficient data"),
            ProtocolError::InvalidMessage => write!(f, "invalid message"),
            ProtocolError::UnsupportedProtocolVersion(v) => {
                write!(f, "unsupported protocol version: {}", v)
            }
            ProtocolError::MissingParameter(p) => write!(f, "missing parameter: {}", p),
            ProtocolError::InvalidUtf8 => write!(f, "invalid UTF-8"),
        }
    }
}

impl std::error::Error for ProtocolError {}
