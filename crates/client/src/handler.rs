//! WAL dispatch through a content client.
//!
//! This is the piece that closes the loop: operations queued in the WAL
//! for a content-addressed backend are executed here against whichever
//! [`ContentClient`] was wired in (daemon-backed or simulated), and the
//! outcome flows back into the operation row.

use crate::client::ContentClient;
use std::sync::Arc;
use stowage_core::{ErrorKind, Operation, OperationType};
use stowage_wal::{BackendHandler, HandlerOutcome};
use tracing::debug;

/// Backend handler that executes operations via a [`ContentClient`].
pub struct ContentClientHandler {
    client: Arc<dyn ContentClient>,
}

impl ContentClientHandler {
    pub fn new(client: Arc<dyn ContentClient>) -> ContentClientHandler {
        ContentClientHandler { client }
    }

    /// Payload for an add: inline `content` parameter, or the file named
    /// by `path`.
    fn payload(&self, operation: &Operation) -> Result<Vec<u8>, HandlerOutcome> {
        if let Some(content) = operation.parameters.get("content") {
            return Ok(content.clone().into_bytes());
        }
        if let Some(path) = operation.parameters.get("path") {
            return std::fs::read(path).map_err(|e| {
                HandlerOutcome::failed(
                    ErrorKind::NotFound,
                    format!("cannot read add payload {path}: {e}"),
                )
            });
        }
        Err(HandlerOutcome::failed(
            ErrorKind::InvalidArgument,
            "add requires a content or path parameter",
        ))
    }

    fn require_cid<'a>(&self, operation: &'a Operation) -> Result<&'a str, HandlerOutcome> {
        operation.parameters.get("cid").map(String::as_str).ok_or_else(|| {
            HandlerOutcome::failed(
                ErrorKind::InvalidArgument,
                format!(
                    "{} requires a cid parameter",
                    operation.operation_type
                ),
            )
        })
    }
}

impl BackendHandler for ContentClientHandler {
    fn handle(&self, operation: &Operation) -> HandlerOutcome {
        debug!(
            operation_id = %operation.operation_id,
            operation_type = %operation.operation_type,
            "dispatching through content client"
        );
        match operation.operation_type {
            OperationType::Add | OperationType::Upload => {
                let payload = match self.payload(operation) {
                    Ok(payload) => payload,
                    Err(outcome) => return outcome,
                };
                match self.client.add(&payload) {
                    Ok(response) => HandlerOutcome {
                        success: true,
                        cid: Some(response.cid),
                        size: Some(response.size as i64),
                        destination: None,
                        error: None,
                        error_type: None,
                    },
                    Err(e) => HandlerOutcome::failed(e.kind(), e.to_string()),
                }
            }
            OperationType::Cat | OperationType::Get | OperationType::Download => {
                let cid = match self.require_cid(operation) {
                    Ok(cid) => cid,
                    Err(outcome) => return outcome,
                };
                match self.client.cat(cid) {
                    Ok(response) => {
                        // materialize to a destination path when asked
                        let destination = match operation.parameters.get("path") {
                            Some(path) => {
                                if let Err(e) = std::fs::write(path, &response.data) {
                                    return HandlerOutcome::failed(
                                        ErrorKind::ExecutionError,
                                        format!("cannot write {path}: {e}"),
                                    );
                                }
                                Some(path.clone())
                            }
                            None => None,
                        };
                        HandlerOutcome {
                            success: true,
                            cid: Some(cid.to_string()),
                            size: Some(response.data.len() as i64),
                            destination,
                            error: None,
                            error_type: None,
                        }
                    }
                    Err(e) => HandlerOutcome::failed(e.kind(), e.to_string()),
                }
            }
            OperationType::Pin => {
                let cid = match self.require_cid(operation) {
                    Ok(cid) => cid,
                    Err(outcome) => return outcome,
                };
                match self.client.pin(cid) {
                    Ok(response) => HandlerOutcome::ok_with_cid(response.cid),
                    Err(e) => HandlerOutcome::failed(e.kind(), e.to_string()),
                }
            }
            OperationType::Unpin | OperationType::Rm => {
                let cid = match self.require_cid(operation) {
                    Ok(cid) => cid,
                    Err(outcome) => return outcome,
                };
                match self.client.unpin(cid) {
                    Ok(response) => HandlerOutcome::ok_with_cid(response.cid),
                    Err(e) => HandlerOutcome::failed(e.kind(), e.to_string()),
                }
            }
            OperationType::List => match self.client.list_pins() {
                Ok(response) => HandlerOutcome {
                    success: true,
                    cid: None,
                    size: Some(response.pins.len() as i64),
                    destination: None,
                    error: None,
                    error_type: None,
                },
                Err(e) => HandlerOutcome::failed(e.kind(), e.to_string()),
            },
            other => HandlerOutcome::failed(
                ErrorKind::InvalidArgument,
                format!("operation {other} is not supported by the content client"),
            ),
        }
    }
}
