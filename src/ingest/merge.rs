//! Merge paginated export pages into one `{"data": [...]}` document.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::{json, Value};
use tracing::info;

use super::read_document;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeSummary {
    pub pages: usize,
    pub items: usize,
}

/// Items a single page contributes. `data` items are kept as-is; `tests`
/// items are wrapped as `{"attributes": item}` so the merged document
/// loads the same way as a native export.
pub fn page_items(page: &Value) -> Vec<Value> {
    if let Some(data) = page.get("data").and_then(Value::as_array) {
        return data.clone();
    }
    page.get("tests")
        .and_then(Value::as_array)
        .map(|tests| {
            tests
                .iter()
                .map(|t| json!({ "attributes": t }))
                .collect()
        })
        .unwrap_or_default()
}

/// Merge `pages` (in lexicographic path order) and write the result to `out`.
pub async fn merge_pages(pages: &[PathBuf], out: &Path) -> Result<MergeSummary> {
    let mut ordered: Vec<&PathBuf> = pages.iter().collect();
    ordered.sort();

    let mut data = Vec::new();
    for page in &ordered {
        let doc = read_document(page).await?;
        data.extend(page_items(&doc));
    }

    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create output directory: {}", parent.display()))?;
    }

    let summary = MergeSummary {
        pages: ordered.len(),
        items: data.len(),
    };
    let body = serde_json::to_vec(&json!({ "data": data }))
        .context("failed to serialize merged document")?;
    tokio::fs::write(out, body)
        .await
        .with_context(|| format!("failed to write merged document: {}", out.display()))?;

    info!(out = %out.display(), pages = summary.pages, items = summary.items, "merged pages");
    Ok(summary)
}
