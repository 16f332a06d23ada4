//! Versioned wire envelope for task invocations.
//!
//! Producers and consumers may run different builds, so every invocation
//! crosses the broker wrapped in an envelope carrying an explicit schema
//! number. Decoding rejects schemas this build does not understand instead
//! of guessing.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::invocation::TaskInvocation;

/// Schema number written by this build.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("unsupported envelope schema {found} (this build speaks {supported})")]
    SchemaVersion { found: u32, supported: u32 },

    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    schema: u32,
    invocation: TaskInvocation,
}

/// Serialize an invocation into its wire form.
pub fn encode_invocation(invocation: &TaskInvocation) -> Result<Vec<u8>, ProtoError> {
    let envelope = Envelope {
        schema: SCHEMA_VERSION,
        invocation: invocation.clone(),
    };
    Ok(serde_json::to_vec(&envelope)?)
}

/// Deserialize an invocation from its wire form, checking the schema number.
pub fn decode_invocation(bytes: &[u8]) -> Result<TaskInvocation, ProtoError> {
    let envelope: Envelope = serde_json::from_slice(bytes)?;
    if envelope.schema != SCHEMA_VERSION {
        return Err(ProtoError::SchemaVersion {
            found: envelope.schema,
            supported: SCHEMA_VERSION,
        });
    }
    Ok(envelope.invocation)
}
