use std::mem;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use search_index::Index;
use serde_json::Value;
use walkdir::WalkDir;

/// How many documents are indexed between progress logs.
const PROGRESS_INTERVAL: usize = 1000;

#[derive(Debug, Clone, Copy)]
pub struct IndexingStats {
    pub documents: usize,
    pub batches: usize,
    pub elapsed: Duration,
}

impl IndexingStats {
    /// The average time spent per document in milliseconds.
    pub fn average_ms(&self) -> f64 {
        average_ms(self.documents, self.elapsed)
    }
}

fn average_ms(count: usize, elapsed: Duration) -> f64 {
    if count == 0 {
        return 0.0;
    }

    elapsed.as_secs_f64() * 1000.0 / count as f64
}

pub fn progress_line(count: usize, elapsed: Duration) -> String {
    format!(
        "Indexed {} documents, in {:.2}s (average {:.2}ms/doc)",
        count,
        elapsed.as_secs_f64(),
        average_ms(count, elapsed),
    )
}

/// Derives a document id from its file name by dropping the last extension.
///
/// A name made of only an extension, like `.json`, is kept whole so the
/// file is still indexed under a non-empty id.
pub fn document_id(file_name: &str) -> String {
    match file_name.rfind('.') {
        Some(0) | None => file_name.to_string(),
        Some(pos) => file_name[..pos].to_string(),
    }
}

fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = vec![];
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.with_context(|| format!("failed to list {}", dir.display()))?;
        if entry.file_type().is_dir() {
            continue;
        }

        files.push(entry.into_path());
    }

    Ok(files)
}

/// Indexes every JSON file directly inside `dir`, submitting them in
/// batches of `batch_size` documents.
#[instrument(name = "bulk-loader", skip_all, fields(dir = %dir.display(), batch_size = batch_size))]
pub async fn index_directory(
    index: &Index,
    dir: &Path,
    batch_size: usize,
) -> Result<IndexingStats> {
    let batch_size = batch_size.max(1);
    let files = {
        let dir = dir.to_path_buf();
        tokio::task::spawn_blocking(move || list_files(&dir)).await??
    };
    debug!("found {} files to index", files.len());

    let start = Instant::now();
    let mut batch = index.new_batch();
    let mut count = 0;
    let mut batches = 0;

    for path in files {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();

        let data = tokio::fs::read(&path)
            .await
            .with_context(|| format!("failed to read {}", name))?;
        let doc: Value = serde_json::from_slice(&data)
            .with_context(|| format!("failed to parse {}", name))?;

        batch
            .index(document_id(&name), &doc)
            .with_context(|| format!("failed to convert {}", name))?;

        if batch.len() >= batch_size {
            let full = mem::replace(&mut batch, index.new_batch());
            index.batch(full).await?;
            batches += 1;
        }

        count += 1;
        if count % PROGRESS_INTERVAL == 0 {
            info!("{}", progress_line(count, start.elapsed()));
        }
    }

    if !batch.is_empty() {
        index.batch(batch).await?;
        batches += 1;
    }

    let stats = IndexingStats {
        documents: count,
        batches,
        elapsed: start.elapsed(),
    };
    info!("{}", progress_line(stats.documents, stats.elapsed));

    Ok(stats)
}
