//! Disk-resident storage shared by both cache families.
//!
//! [`image_store`] and [`metadata_store`] implement the two on-disk
//! layouts this crate uses: the image cache keeps bodies plus a
//! consolidated index with metadata inlined; the metadata cache additionally
//! keeps a per-entry sidecar so its index can be rebuilt by scanning the
//! directory if `index.json` is lost or corrupt.

pub mod image_store;
pub mod metadata_store;

use std::path::Path;
use std::time::SystemTime;

use tokio::io;

/// Write `bytes` to `path` atomically: write to a sibling `.tmp` file, then
/// rename over the destination. The temp file is removed on every path that
/// doesn't end in a successful rename.
pub(crate) async fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp = path.with_extension(format!(
        "{}.tmp",
        path.extension().and_then(|e| e.to_str()).unwrap_or("")
    ));
    if let Err(e) = tokio::fs::write(&tmp, bytes).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

/// Best-effort delete; a missing file is not an error.
pub(crate) async fn remove_if_exists(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// `serde(with = "iso8601")` helper for a mandatory `SystemTime` field,
/// formatted as an RFC 3339 (ISO 8601) string on disk.
pub(crate) mod iso8601 {
    use super::SystemTime;
    use serde::{de::Error as _, ser::Error as _, Deserialize, Deserializer, Serializer};
    use time::{format_description::well_known::Rfc3339, OffsetDateTime};

    pub fn serialize<S: Serializer>(t: &SystemTime, s: S) -> Result<S::Ok, S::Error> {
        let odt: OffsetDateTime = (*t).into();
        let text = odt.format(&Rfc3339).map_err(S::Error::custom)?;
        s.serialize_str(&text)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<SystemTime, D::Error> {
        let text = String::deserialize(d)?;
        let odt = OffsetDateTime::parse(&text, &Rfc3339).map_err(D::Error::custom)?;
        Ok(odt.into())
    }
}

/// `serde(with = "iso8601_opt")` helper for an optional `SystemTime` field.
pub(crate) mod iso8601_opt {
    use super::SystemTime;
    use serde::{de::Error as _, ser::Error as _, Deserialize, Deserializer, Serializer};
    use time::{format_description::well_known::Rfc3339, OffsetDateTime};

    pub fn serialize<S: Serializer>(
        t: &Option<SystemTime>,
        s: S,
    ) -> Result<S::Ok, S::Error> {
        match t {
            Some(t) => {
                let odt: OffsetDateTime = (*t).into();
                let text = odt.format(&Rfc3339).map_err(S::Error::custom)?;
                s.serialize_some(&text)
            }
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<SystemTime>, D::Error> {
        let text: Option<String> = Option::deserialize(d)?;
        match text {
            Some(text) => {
                let odt =
                    OffsetDateTime::parse(&text, &Rfc3339).map_err(D::Error::custom)?;
                Ok(Some(odt.into()))
            }
            None => Ok(None),
        }
    }
}
