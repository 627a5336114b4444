//! Response envelope carried back from remote nodes.

use crate::error::{Error, Result};
use crate::types::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A failure captured on a remote node, shipped back opaquely.
///
/// `kind` is the short error name on the throwing side and `cause` keeps
/// whatever chain the thrower had.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteException {
    pub kind: String,
    pub message: String,
    pub cause: Option<Box<RemoteException>>,
}

impl RemoteException {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: RemoteException) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }
}

impl fmt::Display for RemoteException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(cause) = &self.cause {
            write!(f, " (caused by {cause})")?;
        }
        Ok(())
    }
}

impl std::error::Error for RemoteException {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|c| c as &(dyn std::error::Error + 'static))
    }
}

impl From<&Error> for RemoteException {
    fn from(error: &Error) -> Self {
        match error {
            // keep the original thrower's payload instead of nesting it
            Error::RemoteExecution { exception, .. } => exception.clone(),
            other => RemoteException::new(other.kind(), other.to_string()),
        }
    }
}

/// Response carrying an exception raised while processing a command remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionResponse {
    exception: RemoteException,
}

impl ExceptionResponse {
    pub fn new(exception: RemoteException) -> Self {
        Self { exception }
    }

    pub fn exception(&self) -> &RemoteException {
        &self.exception
    }

    pub fn set_exception(&mut self, exception: RemoteException) {
        self.exception = exception;
    }

    pub fn into_exception(self) -> RemoteException {
        self.exception
    }
}

/// What a remote node sends back for a command.
///
/// `Exception` means the command reached the node and failed there. Transport
/// failures never produce a `Response`; the RPC layer reports them as
/// [`Error::Network`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    /// Command ran; optional return payload.
    Success(Option<Vec<u8>>),
    /// Command ran but its precondition did not hold (e.g. conditional write).
    Unsuccessful,
    /// Command ran and raised.
    Exception(ExceptionResponse),
}

impl Response {
    pub fn exception(exception: RemoteException) -> Self {
        Response::Exception(ExceptionResponse::new(exception))
    }

    /// Wrap the local outcome of executing a command for a remote caller.
    pub fn from_result(result: Result<Option<Vec<u8>>>) -> Self {
        match result {
            Ok(payload) => Response::Success(payload),
            Err(e) => Response::exception(RemoteException::from(&e)),
        }
    }

    pub fn is_successful(&self) -> bool {
        matches!(self, Response::Success(_))
    }

    pub fn as_exception(&self) -> Option<&RemoteException> {
        match self {
            Response::Exception(r) => Some(r.exception()),
            _ => None,
        }
    }

    /// Convert into the caller's view, attributing a remote failure to `node_id`.
    ///
    /// `Unsuccessful` yields `Ok(None)`: the command ran and had nothing to return.
    pub fn into_result(self, node_id: NodeId) -> Result<Option<Vec<u8>>> {
        match self {
            Response::Success(payload) => Ok(payload),
            Response::Unsuccessful => Ok(None),
            Response::Exception(r) => Err(Error::RemoteExecution {
                node_id,
                exception: r.into_exception(),
            }),
        }
    }

    pub fn to_bytes(&self) -> std::result::Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn from_bytes(data: &[u8]) -> std::result::Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LockError;

    #[test]
    fn test_exception_survives_encoding() {
        let exception = RemoteException::new("Store", "write-through failed")
            .with_cause(RemoteException::new("Io", "disk full"));
        let response = Response::exception(exception.clone());

        let decoded = Response::from_bytes(&response.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.as_exception(), Some(&exception));
        assert_eq!(
            decoded.as_exception().unwrap().to_string(),
            "Store: write-through failed (caused by Io: disk full)"
        );
    }

    #[test]
    fn test_set_exception() {
        let mut response = ExceptionResponse::new(RemoteException::new("A", "first"));
        response.set_exception(RemoteException::new("B", "second"));
        assert_eq!(response.exception().kind, "B");
    }

    #[test]
    fn test_from_result_captures_error_kind() {
        let err: Error = LockError::Timeout {
            stripe: 2,
            timeout_ms: 100,
        }
        .into();
        let response = Response::from_result(Err(err));
        assert_eq!(response.as_exception().unwrap().kind, "LockTimeout");
        assert!(!response.is_successful());
    }

    #[test]
    fn test_into_result_marks_remote_execution() {
        let err = Response::exception(RemoteException::new("Store", "boom"))
            .into_result(7)
            .unwrap_err();
        match err {
            Error::RemoteExecution { node_id, exception } => {
                assert_eq!(node_id, 7);
                assert_eq!(exception.message, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }

        assert_eq!(
            Response::Success(Some(vec![1])).into_result(1).unwrap(),
            Some(vec![1])
        );
        assert_eq!(Response::Unsuccessful.into_result(1).unwrap(), None);
    }
}
