use std::fmt;

/// Errors produced by the net service.
#[derive(Debug)]
pub enum NetError {
    /// Invalid service configuration
    Config { message: String },

    /// A consumer could not be registered, usually a bind failure
    Registration { port: u16, message: String },

    /// Read, write or close failure on a channel
    Io { message: String },

    /// Contract violations: null session from a consumer, writes against an
    /// unknown session
    Protocol { message: String },

    /// I/O work could not be scheduled and will be retried
    Backpressure { message: String },
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetError::Config { message } => write!(f, "Net configuration error: {}", message),
            NetError::Registration { port, message } => {
                write!(f, "Registration error on port {}: {}", port, message)
            }
            NetError::Io { message } => write!(f, "Net I/O error: {}", message),
            NetError::Protocol { message } => write!(f, "Net protocol error: {}", message),
            NetError::Backpressure { message } => write!(f, "Net backpressure: {}", message),
        }
    }
}

impl std::error::Error for NetError {}

impl NetError {
    pub fn config(message: impl Into<String>) -> Self {
        NetError::Config {
            message: message.into(),
        }
    }

    pub fn registration(port: u16, message: impl Into<String>) -> Self {
        NetError::Registration {
            port,
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        NetError::Protocol {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for NetError {
    fn from(error: std::io::Error) -> Self {
        NetError::Io {
            message: error.to_string(),
        }
    }
}
