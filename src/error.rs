use std::time::Duration;

/// Errors raised by the polling core and its transport.
///
/// Per-attribute parse problems never show up here, they travel as
/// [`Reading::Invalid`](crate::cryocon::attribute::Reading::Invalid).
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Transport unusable (refused, reset, closed by peer).
    #[error("connection error: {0}")]
    Connection(String),

    /// No reply within the round-trip deadline.
    #[error("timeout after {0:?} waiting for reply")]
    Timeout(Duration),

    /// The instrument answered a command with an explicit error.
    #[error("instrument rejected {command:?}: {reply:?}")]
    ProtocolFault { command: String, reply: String },

    /// A previous exchange was aborted with bytes possibly still in flight.
    #[error("channel desynchronized, reconnect required")]
    Desynchronized,

    #[error("unknown attribute {0:?}")]
    UnknownAttribute(String),

    /// Attribute exists but its channel/loop is not in the used set.
    #[error("attribute {0} is not configured")]
    Unconfigured(String),

    #[error("attribute {0} is read-only")]
    ReadOnly(String),

    #[error("invalid value for {attribute}: {reason}")]
    InvalidValue { attribute: String, reason: String },
}

impl Error {
    /// True for failures after which the transport must be re-dialed before
    /// the next batch or write.
    pub fn requires_reconnect(&self) -> bool {
        matches!(
            self,
            Error::Connection(_) | Error::Timeout(_) | Error::Desynchronized
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Connection(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_failures_require_reconnect() {
        assert!(Error::Connection("reset".to_string()).requires_reconnect());
        assert!(Error::Timeout(Duration::from_millis(200)).requires_reconnect());
        assert!(Error::Desynchronized.requires_reconnect());
        assert!(!Error::ReadOnly("channela".to_string()).requires_reconnect());
        assert!(!Error::ProtocolFault {
            command: "LOOP 1:SETPT 5".to_string(),
            reply: "NAK".to_string()
        }
        .requires_reconnect());
    }
}
