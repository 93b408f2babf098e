//! On-disk index loader / 磁盘索引加载
//!
//! Layout / 目录结构：
//! - `index_meta.json`: name, default field, indexed fields, facets
//! - `store/*.jsonl`: one `{"id": ..., "fields": {...}}` document per line
//!
//! Other files in the directory are ignored.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use super::engine::{IndexStats, SearchEngine};
use super::schema::{Document, IndexMeta, SearchError, SearchQuery, SearchResults};

pub const META_FILE: &str = "index_meta.json";
pub const STORE_DIR: &str = "store";

pub struct SearchIndex {
    meta: IndexMeta,
    engine: SearchEngine,
}

impl SearchIndex {
    /// Open and load an index directory / 打开索引目录
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SearchError> {
        let path = path.as_ref().to_path_buf();
        let meta_path = path.join(META_FILE);

        let raw = match std::fs::read_to_string(&meta_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SearchError::MissingMeta(meta_path))
            }
            Err(e) => return Err(SearchError::Io { path: meta_path, source: e }),
        };
        let meta: IndexMeta = serde_json::from_str(&raw).map_err(|e| SearchError::InvalidMeta {
            path: meta_path.clone(),
            message: e.to_string(),
        })?;
        if meta.default_field.is_empty() {
            return Err(SearchError::InvalidMeta {
                path: meta_path,
                message: "default_field must not be empty".to_string(),
            });
        }

        let mut engine = SearchEngine::new(&meta);
        for store_file in store_files(&path.join(STORE_DIR))? {
            load_documents(&store_file, &mut engine)?;
        }

        tracing::info!(
            "Opened index {:?} at {:?}: {} documents",
            meta.name,
            path,
            engine.document_count()
        );
        Ok(Self { meta, engine })
    }

    pub fn meta(&self) -> &IndexMeta {
        &self.meta
    }

    pub fn stats(&self) -> IndexStats {
        self.engine.stats()
    }

    /// Run a query; unknown facet fields yield empty counts / 查询
    pub fn query(&self, query: &SearchQuery) -> SearchResults {
        self.engine.search(query)
    }
}

/// `store/*.jsonl` sorted by name; a missing store is an empty index.
fn store_files(store: &Path) -> Result<Vec<PathBuf>, SearchError> {
    let entries = match std::fs::read_dir(store) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(SearchError::Io { path: store.to_path_buf(), source: e }),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| SearchError::Io { path: store.to_path_buf(), source: e })?;
        let path = entry.path();
        if path.extension().map_or(false, |ext| ext == "jsonl") && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn load_documents(path: &Path, engine: &mut SearchEngine) -> Result<(), SearchError> {
    let file = File::open(path).map_err(|e| SearchError::Io { path: path.to_path_buf(), source: e })?;
    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| SearchError::Io { path: path.to_path_buf(), source: e })?;
        if line.trim().is_empty() {
            continue;
        }
        let doc: Document = serde_json::from_str(&line).map_err(|e| SearchError::InvalidDocument {
            path: path.to_path_buf(),
            line: number + 1,
            message: e.to_string(),
        })?;
        engine.index_document(doc);
    }
    Ok(())
}
