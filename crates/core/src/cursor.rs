use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::CoreError;

/// Encode a `(created_at, id)` pair as an opaque pagination cursor.
///
/// Format: `base64url("{iso8601}|{uuid}")`.
#[must_use]
pub fn encode_cursor(created_at: DateTime<Utc>, id: Uuid) -> String {
    let raw = format!("{}|{id}", created_at.to_rfc3339());
    URL_SAFE.encode(raw)
}

/// Decode a cursor produced by [`encode_cursor`].
///
/// # Errors
/// Returns [`CoreError::InvalidCursor`] if the cursor is not valid base64,
/// is missing the `|` separator, or the timestamp/uuid halves don't parse.
pub fn decode_cursor(cursor: &str) -> Result<(DateTime<Utc>, Uuid), CoreError> {
    let bytes = URL_SAFE
        .decode(cursor)
        .map_err(|_| CoreError::invalid_cursor(cursor))?;
    let decoded = String::from_utf8(bytes).map_err(|_| CoreError::invalid_cursor(cursor))?;
    let (ts_str, id_str) = decoded
        .split_once('|')
        .ok_or_else(|| CoreError::invalid_cursor(cursor))?;
    let created_at = DateTime::parse_from_rfc3339(ts_str)
        .map_err(|_| CoreError::invalid_cursor(cursor))?
        .with_timezone(&Utc);
    let id = Uuid::parse_str(id_str).map_err(|_| CoreError::invalid_cursor(cursor))?;
    Ok((created_at, id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let now = Utc::now();
        let id = Uuid::new_v4();
        let cursor = encode_cursor(now, id);
        let (back_time, back_id) = decode_cursor(&cursor).unwrap();
        assert_eq!(back_id, id);
        assert_eq!(back_time.timestamp_millis(), now.timestamp_millis());
    }

    #[test]
    fn rejects_bad_base64() {
        assert!(decode_cursor("not valid base64!!").is_err());
    }

    #[test]
    fn rejects_missing_separator() {
        let cursor = URL_SAFE.encode("no-separator-here");
        assert!(decode_cursor(&cursor).is_err());
    }

    #[test]
    fn rejects_bad_uuid() {
        let raw = format!("{}|not-a-uuid", Utc::now().to_rfc3339());
        let cursor = URL_SAFE.encode(raw);
        assert!(decode_cursor(&cursor).is_err());
    }
}
