//! Document loading: plain or gzip-compressed JSON files

use crate::error::{LoaderError, Result};
use flate2::read::GzDecoder;
use serde_json::Value;
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// Load and decode one document, gunzipping when the file name ends in
/// `.gz`.
pub async fn load_document(path: &Path) -> Result<Value> {
    let path_str = path.display().to_string();
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| LoaderError::DocumentRead {
            path: path_str.clone(),
            source,
        })?;

    let bytes = if path.extension().is_some_and(|ext| ext == "gz") {
        let mut decoder = GzDecoder::new(bytes.as_slice());
        let mut decompressed = Vec::new();
        decoder
            .read_to_end(&mut decompressed)
            .map_err(|source| LoaderError::DocumentRead {
                path: path_str.clone(),
                source,
            })?;
        decompressed
    } else {
        bytes
    };

    debug!(path = %path_str, bytes = bytes.len(), "Loaded document");
    serde_json::from_slice(&bytes).map_err(|source| LoaderError::DocumentParse {
        path: path_str,
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use serde_json::json;
    use std::io::Write;

    #[tokio::test]
    async fn test_load_plain_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        std::fs::write(&path, r#"{"@id": "m1", "@type": "sc:Manifest"}"#).unwrap();

        let value = load_document(&path).await.unwrap();
        assert_eq!(value, json!({"@id": "m1", "@type": "sc:Manifest"}));
    }

    #[tokio::test]
    async fn test_load_gzip_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json.gz");
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(br#"{"@id": "m1", "@type": "sc:Manifest"}"#)
            .unwrap();
        std::fs::write(&path, encoder.finish().unwrap()).unwrap();

        let value = load_document(&path).await.unwrap();
        assert_eq!(value, json!({"@id": "m1", "@type": "sc:Manifest"}));
    }

    #[tokio::test]
    async fn test_missing_file_is_read_error() {
        let err = load_document(Path::new("/nonexistent/doc.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, LoaderError::DocumentRead { .. }));
    }

    #[tokio::test]
    async fn test_invalid_json_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        std::fs::write(&path, "not json").unwrap();

        let err = load_document(&path).await.unwrap_err();
        assert!(matches!(err, LoaderError::DocumentParse { .. }));
    }
}
