//! Search index schema definition / 搜索索引的 Schema 定义

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Index metadata, `index_meta.json` / 索引元信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMeta {
    #[serde(default)]
    pub name: String,
    /// Field searched with the highest weight / 默认字段（权重最高）
    pub default_field: String,
    /// Full-text indexed fields / 全文索引字段
    #[serde(default)]
    pub fields: Vec<String>,
    /// Fields available for facet counting / 可聚合字段
    #[serde(default)]
    pub facets: Vec<String>,
}

impl IndexMeta {
    /// Indexed fields, default field first / 索引字段（默认字段在前）
    pub fn indexed_fields(&self) -> Vec<String> {
        let mut fields = vec![self.default_field.clone()];
        for field in &self.fields {
            if !fields.contains(field) {
                fields.push(field.clone());
            }
        }
        fields
    }
}

/// One stored document, a line of `store/*.jsonl` / 存储的文档
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl Document {
    /// Text content of a field for indexing / 字段文本
    pub fn text(&self, field: &str) -> Option<String> {
        self.fields.get(field).and_then(value_text)
    }

    /// Facet terms of a field / 字段聚合值
    pub fn facet_terms(&self, field: &str) -> Vec<String> {
        match self.fields.get(field) {
            Some(Value::Array(items)) => items.iter().filter_map(scalar_text).collect(),
            Some(value) => scalar_text(value).into_iter().collect(),
            None => Vec::new(),
        }
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(scalar_text).collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join(" "))
            }
        }
        other => scalar_text(other),
    }
}

/// Search query options / 搜索查询选项
#[derive(Debug, Clone)]
pub struct SearchQuery {
    /// Query string; `field:term` restricts a term to one field / 查询语句
    pub query: String,
    /// Stored fields returned with each hit / 返回的字段
    pub fields: Vec<String>,
    /// Fields to count facet terms for / 聚合字段
    pub facets: Vec<String>,
    /// Enable fuzzy search / 启用模糊搜索
    pub fuzzy: bool,
    /// Edit distance for fuzzy search (1-2) / 模糊搜索的编辑距离
    pub fuzzy_distance: u8,
    /// Maximum number of hits to return / 最大返回结果数
    pub limit: usize,
    /// Offset (for pagination) / 偏移量
    pub offset: usize,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            fields: Vec::new(),
            facets: Vec::new(),
            fuzzy: true,
            fuzzy_distance: 1,
            limit: 10,
            offset: 0,
        }
    }

    pub fn with_fields(mut self, fields: Vec<String>) -> Self {
        self.fields = fields;
        self
    }

    pub fn with_facets(mut self, facets: Vec<String>) -> Self {
        self.facets = facets;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn fuzzy(mut self, enabled: bool) -> Self {
        self.fuzzy = enabled;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
    /// Requested stored fields / 请求返回的字段
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacetCount {
    pub term: String,
    pub count: usize,
}

/// Search results / 搜索结果
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResults {
    /// Matching documents before pagination / 命中总数
    pub total: usize,
    pub max_score: f32,
    pub hits: Vec<SearchHit>,
    pub facets: BTreeMap<String, Vec<FacetCount>>,
}

/// Index open / query errors / 索引错误
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("index metadata missing at {}", .0.display())]
    MissingMeta(PathBuf),
    #[error("invalid index metadata at {}: {message}", path.display())]
    InvalidMeta { path: PathBuf, message: String },
    #[error("invalid document at {}:{line}: {message}", path.display())]
    InvalidDocument {
        path: PathBuf,
        line: usize,
        message: String,
    },
    #[error("cannot read index at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_defaults() {
        let meta: IndexMeta = serde_json::from_str(r#"{"default_field":"joke","fields":["joke","author"]}"#).unwrap();
        assert_eq!(meta.indexed_fields(), vec!["joke".to_string(), "author".to_string()]);
        assert!(meta.facets.is_empty());
    }

    #[test]
    fn test_document_text() {
        let doc: Document = serde_json::from_str(
            r#"{"id":"7","fields":{"joke":"hi","tags":["pun","short"],"year":1999,"nested":{"a":1}}}"#,
        )
        .unwrap();
        assert_eq!(doc.text("joke").as_deref(), Some("hi"));
        assert_eq!(doc.text("tags").as_deref(), Some("pun short"));
        assert_eq!(doc.text("year").as_deref(), Some("1999"));
        assert_eq!(doc.text("nested"), None);
        assert_eq!(doc.facet_terms("tags"), vec!["pun".to_string(), "short".to_string()]);
    }
}
