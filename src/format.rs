//! Encoding of session value snapshots for durable backends.
//!
//! The payload is a versioned JSON envelope. It is considered an implementation detail shared by
//! the bundled backends and may evolve.

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    value::Values,
};

const VERSION: u8 = 1;

#[derive(Debug, Serialize)]
struct EnvelopeRef<'a> {
    v: u8,
    values: &'a Values,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    v: u8,
    values: Values,
}

/// Encode a value snapshot into bytes.
pub fn encode_values(values: &Values) -> Result<Vec<u8>> {
    serde_json::to_vec(&EnvelopeRef { v: VERSION, values })
        .map_err(|err| Error::Malformed(err.to_string()))
}

/// Decode bytes produced by [`encode_values`].
pub fn decode_values(bytes: &[u8]) -> Result<Values> {
    let envelope: Envelope =
        serde_json::from_slice(bytes).map_err(|err| Error::Malformed(err.to_string()))?;

    if envelope.v != VERSION {
        return Err(Error::Malformed(format!(
            "Unsupported session record version: {}",
            envelope.v
        )));
    }

    Ok(envelope.values)
}
