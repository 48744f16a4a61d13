//! Wire frame for routed events.
//!
//! An envelope carries one serialized message plus the (type, subject) pair
//! the registries dispatch on. Payloads may be gzip-compressed; the frame
//! itself is JSON, with the payload base64-encoded so the envelope survives
//! any text transport.

use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::events::WireEvent;

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("failed to serialize event payload: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("failed to deserialize event payload: {0}")]
    Deserialize(#[source] serde_json::Error),
    #[error("failed to compress event payload: {0}")]
    Compress(#[source] std::io::Error),
    #[error("failed to decompress event payload: {0}")]
    Decompress(#[source] std::io::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub id: Uuid,
    pub event_type: String,
    pub subject: String,
    #[serde(with = "time::serde::rfc3339")]
    pub time: OffsetDateTime,
    #[serde(with = "base64_bytes")]
    pub data: Bytes,
    #[serde(default)]
    pub compressed: bool,
}

impl EventEnvelope {
    /// Serialize a message into an envelope, optionally gzipped.
    pub fn encode<T: WireEvent>(message: &T, compressed: bool) -> Result<Self, EnvelopeError> {
        let json = serde_json::to_vec(message).map_err(EnvelopeError::Serialize)?;

        let data = if compressed {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&json).map_err(EnvelopeError::Compress)?;
            Bytes::from(encoder.finish().map_err(EnvelopeError::Compress)?)
        } else {
            Bytes::from(json)
        };

        Ok(Self {
            id: Uuid::new_v4(),
            event_type: T::TYPE.to_string(),
            subject: T::SUBJECT.to_string(),
            time: OffsetDateTime::now_utc(),
            data,
            compressed,
        })
    }

    /// Decode the payload back into its message shape.
    pub fn decode<T: WireEvent>(&self) -> Result<T, EnvelopeError> {
        if self.compressed {
            let mut decoder = GzDecoder::new(self.data.as_ref());
            let mut json = Vec::new();
            decoder
                .read_to_end(&mut json)
                .map_err(EnvelopeError::Decompress)?;
            serde_json::from_slice(&json).map_err(EnvelopeError::Deserialize)
        } else {
            serde_json::from_slice(&self.data).map_err(EnvelopeError::Deserialize)
        }
    }
}

mod base64_bytes {
    use super::{Bytes, Engine, BASE64};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64
            .decode(encoded)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::{PublishAction, ServiceAccountChange};

    fn sample() -> ServiceAccountChange {
        ServiceAccountChange {
            action: PublishAction::Empty,
            service_account: None,
        }
    }

    #[test]
    fn plain_round_trip() {
        let envelope = EventEnvelope::encode(&sample(), false).unwrap();
        assert_eq!(envelope.event_type, ServiceAccountChange::TYPE);
        assert_eq!(envelope.subject, ServiceAccountChange::SUBJECT);
        assert!(!envelope.compressed);

        let decoded: ServiceAccountChange = envelope.decode().unwrap();
        assert_eq!(decoded, sample());
    }

    #[test]
    fn compressed_round_trip() {
        let envelope = EventEnvelope::encode(&sample(), true).unwrap();
        assert!(envelope.compressed);
        assert_ne!(envelope.data, EventEnvelope::encode(&sample(), false).unwrap().data);

        let decoded: ServiceAccountChange = envelope.decode().unwrap();
        assert_eq!(decoded, sample());
    }

    #[test]
    fn envelope_survives_json_transport() {
        let envelope = EventEnvelope::encode(&sample(), true).unwrap();
        let wire = serde_json::to_string(&envelope).unwrap();
        let back: EventEnvelope = serde_json::from_str(&wire).unwrap();

        let decoded: ServiceAccountChange = back.decode().unwrap();
        assert_eq!(decoded, sample());
    }

    #[test]
    fn garbage_payload_is_a_decode_error() {
        let mut envelope = EventEnvelope::encode(&sample(), false).unwrap();
        envelope.data = Bytes::from_static(b"not json");
        assert!(envelope.decode::<ServiceAccountChange>().is_err());
    }
}
