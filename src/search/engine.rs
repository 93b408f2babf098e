//! Search engine - in-memory full-text search over an opened index / 搜索引擎
//!
//! Built once when the index is opened, then read-only:
//! - index_document: index single document / 索引单个文档
//! - search: search / 搜索

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Map;

use super::schema::{Document, FacetCount, IndexMeta, SearchHit, SearchQuery, SearchResults};
use super::tokenizer::{contains_cjk, generate_ngrams, tokenize, tokenize_query};

/// Inverted index entry / 倒排索引条目
#[derive(Debug, Clone)]
struct PostingEntry {
    doc: usize,
    field: usize,
    term_frequency: u32,
}

/// Index statistics / 索引统计
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexStats {
    pub document_count: usize,
    pub token_count: usize,
    pub last_updated: Option<i64>,
}

/// Search engine / 搜索引擎
///
/// Inverted index with / 使用倒排索引实现全文搜索:
/// - default field boost / 默认字段加权
/// - prefix matching / 前缀匹配
/// - fuzzy matching (edit distance, CJK N-gram) / 模糊匹配
pub struct SearchEngine {
    fields: Vec<String>,
    documents: Vec<Document>,
    /// token -> postings / 倒排索引
    inverted_index: HashMap<String, Vec<PostingEntry>>,
    /// N-gram -> documents, default field only / N-gram 索引
    ngram_index: HashMap<String, Vec<usize>>,
    stats: IndexStats,
}

impl SearchEngine {
    pub fn new(meta: &IndexMeta) -> Self {
        Self {
            fields: meta.indexed_fields(),
            documents: Vec::new(),
            inverted_index: HashMap::new(),
            ngram_index: HashMap::new(),
            stats: IndexStats::default(),
        }
    }

    pub fn stats(&self) -> IndexStats {
        self.stats.clone()
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    /// Index single document / 索引单个文档
    pub fn index_document(&mut self, doc: Document) {
        let doc_idx = self.documents.len();

        for (field_idx, field) in self.fields.iter().enumerate() {
            let Some(text) = doc.text(field) else { continue };

            let mut frequencies: HashMap<String, u32> = HashMap::new();
            for token in tokenize(&text) {
                *frequencies.entry(token).or_default() += 1;
            }
            self.stats.token_count += frequencies.len();
            for (token, term_frequency) in frequencies {
                self.inverted_index.entry(token).or_default().push(PostingEntry {
                    doc: doc_idx,
                    field: field_idx,
                    term_frequency,
                });
            }

            // 默认字段生成 N-gram
            if field_idx == 0 && contains_cjk(&text) {
                let mut ngrams = generate_ngrams(&text, 1, 2);
                ngrams.sort();
                ngrams.dedup();
                for ngram in ngrams {
                    self.ngram_index.entry(ngram).or_default().push(doc_idx);
                }
            }
        }

        self.documents.push(doc);
        self.stats.document_count += 1;
        self.stats.last_updated = Some(chrono::Utc::now().timestamp());
    }

    fn boost(&self, field: usize) -> f32 {
        if field == 0 {
            2.0
        } else {
            1.0
        }
    }

    fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f == name)
    }

    /// 搜索
    pub fn search(&self, query: &SearchQuery) -> SearchResults {
        let mut scores: HashMap<usize, f32> = HashMap::new();

        for clause in query.query.split_whitespace() {
            // `field:term` limits the clause to one indexed field
            let (scope, text) = match clause.split_once(':') {
                Some((field, text)) if self.field_index(field).is_some() => {
                    (self.field_index(field), text)
                }
                _ => (None, clause),
            };
            let in_scope = |posting: &PostingEntry| scope.map_or(true, |f| posting.field == f);

            for token in tokenize_query(text) {
                let before = scores.len();

                // 精确匹配
                if let Some(postings) = self.inverted_index.get(&token) {
                    for posting in postings.iter().filter(|p| in_scope(*p)) {
                        *scores.entry(posting.doc).or_default() +=
                            self.boost(posting.field) * (1.0 + posting.term_frequency as f32 * 0.1);
                    }
                }

                // 前缀匹配
                for (idx_token, postings) in &self.inverted_index {
                    if idx_token.len() > token.len() && idx_token.starts_with(&token) {
                        for posting in postings.iter().filter(|p| in_scope(*p)) {
                            *scores.entry(posting.doc).or_default() += self.boost(posting.field) * 0.5;
                        }
                    }
                }

                if !query.fuzzy || scores.len() > before {
                    continue;
                }

                // 模糊匹配：中文用 N-gram，其他用编辑距离
                if contains_cjk(&token) {
                    if scope.map_or(true, |f| f == 0) {
                        for ngram in generate_ngrams(&token, 1, 2) {
                            if let Some(docs) = self.ngram_index.get(&ngram) {
                                for doc in docs {
                                    *scores.entry(*doc).or_default() += 0.3;
                                }
                            }
                        }
                    }
                } else {
                    for (idx_token, postings) in &self.inverted_index {
                        if idx_token != &token
                            && fuzzy_match(&token, idx_token, query.fuzzy_distance as usize)
                        {
                            for posting in postings.iter().filter(|p| in_scope(*p)) {
                                *scores.entry(posting.doc).or_default() +=
                                    self.boost(posting.field) * 0.3;
                            }
                        }
                    }
                }
            }
        }

        let mut ranked: Vec<(usize, f32)> = scores.into_iter().collect();
        // Score descending, then id for a stable order / 按分数排序
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| self.documents[a.0].id.cmp(&self.documents[b.0].id))
        });

        let mut facets: BTreeMap<String, Vec<FacetCount>> = BTreeMap::new();
        for facet in &query.facets {
            let mut counts: HashMap<String, usize> = HashMap::new();
            for (doc, _) in &ranked {
                for term in self.documents[*doc].facet_terms(facet) {
                    *counts.entry(term).or_default() += 1;
                }
            }
            let mut counts: Vec<FacetCount> = counts
                .into_iter()
                .map(|(term, count)| FacetCount { term, count })
                .collect();
            counts.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.term.cmp(&b.term)));
            facets.insert(facet.clone(), counts);
        }

        let hits = ranked
            .iter()
            .skip(query.offset)
            .take(query.limit)
            .map(|(doc, score)| {
                let document = &self.documents[*doc];
                let fields: Map<String, serde_json::Value> = query
                    .fields
                    .iter()
                    .filter_map(|f| document.fields.get(f).map(|v| (f.clone(), v.clone())))
                    .collect();
                SearchHit {
                    id: document.id.clone(),
                    score: *score,
                    fields,
                }
            })
            .collect();

        SearchResults {
            total: ranked.len(),
            max_score: ranked.first().map(|(_, score)| *score).unwrap_or(0.0),
            hits,
            facets,
        }
    }
}

/// 简单的编辑距离模糊匹配
fn fuzzy_match(s1: &str, s2: &str, max_distance: usize) -> bool {
    if s1 == s2 {
        return true;
    }

    let len1 = s1.chars().count();
    let len2 = s2.chars().count();

    // 长度差太大直接返回
    if len1.abs_diff(len2) > max_distance {
        return false;
    }

    levenshtein_distance(s1, s2) <= max_distance
}

/// 计算 Levenshtein 编辑距离
fn levenshtein_distance(s1: &str, s2: &str) -> usize {
    let a: Vec<char> = s1.chars().collect();
    let b: Vec<char> = s2.chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    // Two rows are enough / 只保留两行
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            current[j + 1] = (previous[j + 1] + 1)
                .min(current[j] + 1)
                .min(previous[j] + cost);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta() -> IndexMeta {
        serde_json::from_value(json!({
            "name": "jokes",
            "default_field": "joke",
            "fields": ["joke", "author"],
            "facets": ["category"]
        }))
        .unwrap()
    }

    fn doc(id: &str, joke: &str, author: &str, category: &str) -> Document {
        serde_json::from_value(json!({
            "id": id,
            "fields": { "joke": joke, "author": author, "category": category }
        }))
        .unwrap()
    }

    fn engine() -> SearchEngine {
        let mut engine = SearchEngine::new(&meta());
        engine.index_document(doc("1", "Why did the chicken cross the road", "anon", "animals"));
        engine.index_document(doc("2", "A horse walks into a bar", "chicken little", "animals"));
        engine.index_document(doc("3", "Knock knock, who is there", "anon", "classic"));
        engine.index_document(doc("4", "程序员的笑话", "佚名", "tech"));
        engine
    }

    #[test]
    fn test_default_field_ranks_first() {
        let results = engine().search(&SearchQuery::new("chicken"));
        assert_eq!(results.total, 2);
        assert_eq!(results.hits[0].id, "1");
        assert_eq!(results.hits[1].id, "2");
        assert!(results.max_score >= results.hits[1].score);
    }

    #[test]
    fn test_field_scope() {
        let results = engine().search(&SearchQuery::new("author:chicken"));
        assert_eq!(results.total, 1);
        assert_eq!(results.hits[0].id, "2");
    }

    #[test]
    fn test_prefix_and_fuzzy() {
        let engine = engine();
        let results = engine.search(&SearchQuery::new("knoc").fuzzy(false));
        assert_eq!(results.hits[0].id, "3");

        let results = engine.search(&SearchQuery::new("hors"));
        assert_eq!(results.hits[0].id, "2");

        // One edit away / 一个编辑距离
        let results = engine.search(&SearchQuery::new("chickan"));
        assert!(results.hits.iter().any(|h| h.id == "1"));
        let results = engine.search(&SearchQuery::new("chickan").fuzzy(false));
        assert_eq!(results.total, 0);
    }

    #[test]
    fn test_chinese_search() {
        let results = engine().search(&SearchQuery::new("笑话"));
        assert_eq!(results.hits[0].id, "4");
    }

    #[test]
    fn test_fields_facets_and_paging() {
        let query = SearchQuery::new("chicken knock")
            .with_fields(vec!["joke".into()])
            .with_facets(vec!["category".into()])
            .with_limit(1)
            .with_offset(1);
        let results = engine().search(&query);

        assert_eq!(results.total, 3);
        assert_eq!(results.hits.len(), 1);
        assert!(results.hits[0].fields.contains_key("joke"));
        assert!(!results.hits[0].fields.contains_key("author"));
        assert_eq!(
            results.facets["category"],
            vec![
                FacetCount { term: "animals".into(), count: 2 },
                FacetCount { term: "classic".into(), count: 1 },
            ]
        );
    }

    #[test]
    fn test_empty_query() {
        let results = engine().search(&SearchQuery::new("   "));
        assert_eq!(results.total, 0);
        assert!(results.hits.is_empty());
    }

    #[test]
    fn test_fuzzy_match() {
        assert!(fuzzy_match("test", "test", 1));
        assert!(fuzzy_match("test", "tеst", 1)); // 1个字符不同
        assert!(!fuzzy_match("test", "hello", 1));
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein_distance("", ""), 0);
        assert_eq!(levenshtein_distance("abc", "abc"), 0);
        assert_eq!(levenshtein_distance("abc", "abd"), 1);
        assert_eq!(levenshtein_distance("abc", "abcd"), 1);
        assert_eq!(levenshtein_distance("kitten", "sitting"), 3);
    }
}
