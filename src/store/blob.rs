// BLOB version prefix helpers. [version: u8][wincode payload].
// raw_samples.fields = Vec<FieldEntry>; aggregates.summaries = Vec<FieldAggregate>.

use crate::error::Error;
use crate::models::{FieldAggregate, FieldEntry};

pub(super) const BLOB_VERSION_FIELDS: u8 = 1;
pub(super) const BLOB_VERSION_SUMMARIES: u8 = 1;

fn with_version_prefix(version: u8, payload: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + payload.len());
    out.push(version);
    out.extend_from_slice(&payload);
    out
}

/// Payload after the version byte; errors on an empty blob or a version this build cannot read.
fn blob_payload(bytes: &[u8], expected_version: u8) -> Result<&[u8], Error> {
    match bytes.split_first() {
        Some((version, payload)) if *version == expected_version => Ok(payload),
        Some((version, _)) => Err(Error::Codec(format!(
            "blob version {version}, expected {expected_version}"
        ))),
        None => Err(Error::Codec("empty blob".into())),
    }
}

pub(super) fn encode_fields(entries: &Vec<FieldEntry>) -> Result<Vec<u8>, Error> {
    let payload =
        wincode::serialize(entries).map_err(|e| Error::Codec(format!("wincode fields: {e}")))?;
    Ok(with_version_prefix(BLOB_VERSION_FIELDS, payload))
}

pub(super) fn decode_fields(bytes: &[u8]) -> Result<Vec<FieldEntry>, Error> {
    wincode::deserialize(blob_payload(bytes, BLOB_VERSION_FIELDS)?)
        .map_err(|e| Error::Codec(format!("wincode deserialize fields: {e}")))
}

pub(super) fn encode_summaries(summaries: &Vec<FieldAggregate>) -> Result<Vec<u8>, Error> {
    let payload = wincode::serialize(summaries)
        .map_err(|e| Error::Codec(format!("wincode summaries: {e}")))?;
    Ok(with_version_prefix(BLOB_VERSION_SUMMARIES, payload))
}

pub(super) fn decode_summaries(bytes: &[u8]) -> Result<Vec<FieldAggregate>, Error> {
    wincode::deserialize(blob_payload(bytes, BLOB_VERSION_SUMMARIES)?)
        .map_err(|e| Error::Codec(format!("wincode deserialize summaries: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_payload_rejects_unknown_version() {
        let err = blob_payload(&[9, 1, 2], BLOB_VERSION_FIELDS).unwrap_err();
        assert!(err.to_string().contains("blob version 9"));
    }

    #[test]
    fn blob_payload_rejects_empty() {
        assert!(blob_payload(&[], BLOB_VERSION_FIELDS).is_err());
    }

    #[test]
    fn blob_payload_strips_prefix() {
        let blob = with_version_prefix(BLOB_VERSION_FIELDS, vec![7, 8]);
        assert_eq!(blob_payload(&blob, BLOB_VERSION_FIELDS).unwrap(), &[7, 8]);
    }
}
