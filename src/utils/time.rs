use serde::{Deserialize, Deserializer, Serializer};
use time::OffsetDateTime;
use time::format_description::well_known::{Iso8601, Rfc3339};

use crate::error::{Error, Result};

/// Parse a backend timestamp into an OffsetDateTime.
///
/// The dashboard backend emits RFC 3339 strings in most places but plain
/// ISO 8601 date-times without an offset in others; the latter are assumed
/// to be UTC.
pub fn parse_timestamp(s: &str) -> Result<OffsetDateTime> {
    if let Ok(parsed) = OffsetDateTime::parse(s, &Rfc3339) {
        return Ok(parsed);
    }
    time::PrimitiveDateTime::parse(s, &Iso8601::DEFAULT)
        .map(|primitive| primitive.assume_utc())
        .map_err(|err| {
            Error::serialization(format!("invalid timestamp '{s}': {err}"), Some(Box::new(err)))
        })
}

/// Deserialize a backend timestamp string into an OffsetDateTime
pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<OffsetDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_timestamp(&s).map_err(serde::de::Error::custom)
}

/// Serialize an OffsetDateTime into an RFC 3339 formatted string
pub fn serialize<S>(datetime: &OffsetDateTime, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let s = datetime
        .format(&Rfc3339)
        .map_err(serde::ser::Error::custom)?;
    serializer.serialize_str(&s)
}
