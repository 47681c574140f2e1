use std::io;
use thiserror::Error;

/// type alias for all operations in this crate that could fail with a [`PmixError`]
pub type Result<T> = std::result::Result<T, PmixError>;

/// status code reported on the wire for a successful operation
pub const SUCCESS: i32 = 0;

/// The error variants used throughout the data store, the fence protocol and the server.
///
/// Every variant maps onto a stable integer status (see [`PmixError::status`]) so that it can
/// be shipped back to a client inside a reply.
#[derive(Error, Debug)]
pub enum PmixError {
    /// the client library has not been initialized (or was already finalized)
    #[error("runtime is not initialized")]
    Init,

    /// the caller handed in malformed input
    #[error("bad parameter: {0}")]
    BadParam(String),

    /// the query was understood, but its target is absent
    #[error("not found")]
    NotFound,

    /// the query's target scope was left unspecified by the caller
    #[error("data value not found")]
    DataValueNotFound,

    /// an allocation failed while copying data
    #[error("out of memory")]
    NoMem,

    /// a streamed decode reached the natural end of its buffer
    #[error("unpack read past end of buffer")]
    UnpackPastEnd,

    /// a decode failed for any reason other than running out of data
    #[error("unpack failure: {0}")]
    UnpackFailure(String),

    /// the requested operation is not supported by this component
    #[error("operation not supported")]
    NotSupported,

    /// a collective did not complete within the time allowed
    #[error("operation timed out")]
    Timeout,

    /// the connection to the server went away
    #[error("lost connection to server: {0}")]
    LostConnection(String),

    /// the server answered with a status this client has no variant for
    #[error("server returned status {0}")]
    Server(i32),

    /// variant for errors caused by socket IO
    #[error("{0}")]
    Io(#[from] io::Error),

    /// Serde Error
    #[error("{0}")]
    Serde(#[from] serde_json::Error),

    /// errors that occurred while parsing configuration or command line input
    #[error("{0}")]
    Parsing(String),
}

impl PmixError {
    /// the integer status used to report this error on the wire
    pub fn status(&self) -> i32 {
        match self {
            PmixError::Init => -31,
            PmixError::BadParam(_) => -27,
            PmixError::NotFound => -46,
            PmixError::DataValueNotFound => -30,
            PmixError::NoMem => -32,
            PmixError::UnpackPastEnd => -50,
            PmixError::UnpackFailure(_) | PmixError::Serde(_) => -20,
            PmixError::NotSupported => -47,
            PmixError::Timeout => -24,
            PmixError::LostConnection(_) => -101,
            PmixError::Server(code) => *code,
            PmixError::Io(_) => -26,
            PmixError::Parsing(_) => -1,
        }
    }

    /// rebuilds an error from a status received on the wire
    pub fn from_status(status: i32) -> Self {
        match status {
            -31 => PmixError::Init,
            -27 => PmixError::BadParam("reported by server".to_string()),
            -46 => PmixError::NotFound,
            -30 => PmixError::DataValueNotFound,
            -32 => PmixError::NoMem,
            -50 => PmixError::UnpackPastEnd,
            -20 => PmixError::UnpackFailure("reported by server".to_string()),
            -47 => PmixError::NotSupported,
            -24 => PmixError::Timeout,
            -101 => PmixError::LostConnection("reported by server".to_string()),
            code => PmixError::Server(code),
        }
    }
}

/// converts a wire status into a `Result`, [`SUCCESS`] being the only `Ok` value
pub fn status_to_result(status: i32) -> Result<()> {
    if status == SUCCESS {
        Ok(())
    } else {
        Err(PmixError::from_status(status))
    }
}

/// converts a `Result` into the status that will be placed on the wire
pub fn result_to_status(result: &Result<()>) -> i32 {
    match result {
        Ok(()) => SUCCESS,
        Err(e) => e.status(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_survive_the_wire() {
        for err in [
            PmixError::Init,
            PmixError::NotFound,
            PmixError::DataValueNotFound,
            PmixError::NoMem,
            PmixError::NotSupported,
            PmixError::Timeout,
        ] {
            let back = PmixError::from_status(err.status());
            assert_eq!(back.status(), err.status());
        }
        assert!(status_to_result(SUCCESS).is_ok());
        assert!(matches!(status_to_result(-999), Err(PmixError::Server(-999))));
    }
}
