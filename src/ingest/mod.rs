//! Loading exported run documents into typed records.

pub mod merge;
pub mod record;

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use record::{from_attributes, RunRecord};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("file is not UTF-8 JSON: {}", .0.display())]
    NotUtf8(PathBuf),
    #[error("not valid JSON in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("could not find items array in {}, expected 'data' or 'tests'", .0.display())]
    NoItems(PathBuf),
    #[error("no test items found in {}", .0.display())]
    Empty(PathBuf),
}

/// Records recovered from one document, plus the number of items that had
/// no usable test identity and were left out.
#[derive(Debug, Default)]
pub struct LoadedBatch {
    pub records: Vec<RunRecord>,
    pub dropped: usize,
}

/// Read and parse a JSON document.
pub async fn read_document(path: &Path) -> Result<Value, LoadError> {
    let bytes = tokio::fs::read(path).await.map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let text = String::from_utf8(bytes).map_err(|_| LoadError::NotUtf8(path.to_path_buf()))?;
    serde_json::from_str(&text).map_err(|source| LoadError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Attribute objects of every item in an export.
///
/// Accepts `{"data": [{"attributes": {..}}]}`, `{"tests": [{..}]}` or a
/// root array of objects. Items that are not objects, and `data` items
/// without an `attributes` object, are skipped. `None` means the document
/// has none of these shapes.
pub fn item_attributes(doc: &Value) -> Option<Vec<&Map<String, Value>>> {
    if let Some(data) = doc.get("data").and_then(Value::as_array) {
        return Some(
            data.iter()
                .filter_map(|item| item.get("attributes").and_then(Value::as_object))
                .collect(),
        );
    }
    let flat = doc
        .get("tests")
        .and_then(Value::as_array)
        .or_else(|| doc.as_array())?;
    Some(flat.iter().filter_map(Value::as_object).collect())
}

/// Convert a parsed document into records, dropping identity-less items.
pub fn records_from_document(doc: &Value, path: &Path) -> Result<LoadedBatch, LoadError> {
    let items = item_attributes(doc).ok_or_else(|| LoadError::NoItems(path.to_path_buf()))?;
    if items.is_empty() {
        return Err(LoadError::Empty(path.to_path_buf()));
    }

    let mut batch = LoadedBatch::default();
    for attrs in items {
        match from_attributes(attrs) {
            Some(rec) => batch.records.push(rec),
            None => batch.dropped += 1,
        }
    }

    if batch.dropped > 0 {
        warn!(
            path = %path.display(),
            dropped = batch.dropped,
            "items without a test identity were dropped"
        );
    }
    debug!(path = %path.display(), records = batch.records.len(), "document converted");
    Ok(batch)
}

/// Read a document from disk and convert it into records.
pub async fn load_records(path: &Path) -> Result<LoadedBatch, LoadError> {
    let doc = read_document(path).await?;
    records_from_document(&doc, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fixture() -> &'static Path {
        Path::new("fixture.json")
    }

    #[test]
    fn test_data_shape() {
        let doc = json!({"data": [
            {"id": "1", "attributes": {"test-id": "a", "status": "passed"}},
            {"id": "2"},
            {"id": "3", "attributes": {"test-id": "b", "status": "failed"}}
        ]});
        let batch = records_from_document(&doc, fixture()).unwrap();
        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.dropped, 0);
    }

    #[test]
    fn test_tests_and_root_array_shapes() {
        let doc = json!({"tests": [{"title": "a"}, {"title": "b"}]});
        assert_eq!(records_from_document(&doc, fixture()).unwrap().records.len(), 2);

        let doc = json!([{"title": "a"}, 5, {"title": "c"}]);
        assert_eq!(records_from_document(&doc, fixture()).unwrap().records.len(), 2);
    }

    #[test]
    fn test_unknown_shape_is_error() {
        let doc = json!({"items": []});
        assert!(matches!(
            records_from_document(&doc, fixture()),
            Err(LoadError::NoItems(_))
        ));
    }

    #[test]
    fn test_empty_items_is_error() {
        let doc = json!({"data": [{"id": "1"}]});
        assert!(matches!(
            records_from_document(&doc, fixture()),
            Err(LoadError::Empty(_))
        ));
    }

    #[test]
    fn test_identity_less_items_are_counted() {
        let doc = json!({"tests": [
            {"title": "ok", "status": "passed"},
            {"status": "failed"},
            {"title": "", "status": "failed"}
        ]});
        let batch = records_from_document(&doc, fixture()).unwrap();
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.dropped, 2);
    }

    #[tokio::test]
    async fn test_load_rejects_non_utf8() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("run.json");
        std::fs::write(&path, [0xff, 0xfe, 0x00]).unwrap();
        assert!(matches!(load_records(&path).await, Err(LoadError::NotUtf8(_))));
    }

    #[tokio::test]
    async fn test_load_rejects_invalid_json() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("run.json");
        std::fs::write(&path, "{\"data\": [").unwrap();
        assert!(matches!(load_records(&path).await, Err(LoadError::Json { .. })));
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let result = load_records(Path::new("/nonexistent/run.json")).await;
        assert!(matches!(result, Err(LoadError::Io { .. })));
    }
}
