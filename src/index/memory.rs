//! In-memory text index
//!
//! A document map plus an inverted term index. Match queries require every
//! query term; phrase queries require the expression as a contiguous
//! substring. Results come back ordered by PageRank, highest first.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use regex::Regex;
use uuid::Uuid;

use super::{Document, IndexError, IndexResult, Indexer, Query, QueryType, SearchResults};

#[derive(Default)]
struct IndexData {
    docs: HashMap<Uuid, Document>,
    /// term -> ids of documents containing it
    terms: HashMap<String, HashSet<Uuid>>,
}

/// An in-memory [`Indexer`] implementation.
pub struct InMemoryIndex {
    data: RwLock<IndexData>,
    word_pattern: Regex,
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(IndexData::default()),
            // Compiled from a literal; cannot fail.
            word_pattern: Regex::new(r"\b[a-zA-Z0-9]+\b").unwrap(),
        }
    }

    /// Splits text into lowercase terms, dropping one- and two-letter words.
    fn tokenize(&self, text: &str) -> HashSet<String> {
        self.word_pattern
            .find_iter(&text.to_lowercase())
            .map(|m| m.as_str().to_string())
            .filter(|term| term.len() > 2)
            .collect()
    }

    fn read(&self) -> IndexResult<std::sync::RwLockReadGuard<'_, IndexData>> {
        self.data
            .read()
            .map_err(|e| IndexError::Store(format!("failed to lock index: {e}")))
    }

    fn write(&self) -> IndexResult<std::sync::RwLockWriteGuard<'_, IndexData>> {
        self.data
            .write()
            .map_err(|e| IndexError::Store(format!("failed to lock index: {e}")))
    }
}

impl Indexer for InMemoryIndex {
    fn index(&self, doc: &Document) -> IndexResult<()> {
        if doc.link_id.is_nil() {
            return Err(IndexError::MissingLinkId);
        }
        let terms = self.tokenize(&format!("{} {}", doc.title, doc.content));

        let mut data = self.write()?;

        // Remove the document's old terms before re-indexing.
        if data.docs.contains_key(&doc.link_id) {
            for ids in data.terms.values_mut() {
                ids.remove(&doc.link_id);
            }
        }

        let mut stored = doc.clone();
        if let Some(existing) = data.docs.get(&doc.link_id) {
            // A re-crawl must not wipe the score PageRank persisted earlier.
            stored.page_rank = existing.page_rank;
        }
        for term in terms {
            data.terms.entry(term).or_default().insert(doc.link_id);
        }
        data.docs.insert(doc.link_id, stored);
        Ok(())
    }

    fn find_by_id(&self, link_id: Uuid) -> IndexResult<Document> {
        let data = self.read()?;
        data.docs.get(&link_id).cloned().ok_or(IndexError::NotFound)
    }

    fn search(&self, query: &Query) -> IndexResult<SearchResults> {
        let data = self.read()?;

        let mut matches: Vec<Document> = match query.query_type {
            QueryType::Match => {
                let terms = self.tokenize(&query.expression);
                if terms.is_empty() {
                    Vec::new()
                } else {
                    // Intersect the posting lists of every query term.
                    let mut ids: Option<HashSet<Uuid>> = None;
                    for term in &terms {
                        let posting = data.terms.get(term).cloned().unwrap_or_default();
                        ids = Some(match ids {
                            None => posting,
                            Some(ids) => ids.intersection(&posting).copied().collect(),
                        });
                    }
                    ids.unwrap_or_default()
                        .into_iter()
                        .filter_map(|id| data.docs.get(&id).cloned())
                        .collect()
                }
            }
            QueryType::Phrase => {
                let phrase = query.expression.to_lowercase();
                data.docs
                    .values()
                    .filter(|doc| {
                        doc.content.to_lowercase().contains(&phrase)
                            || doc.title.to_lowercase().contains(&phrase)
                    })
                    .cloned()
                    .collect()
            }
        };

        matches.sort_by(|a, b| {
            b.page_rank
                .partial_cmp(&a.page_rank)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let total_count = matches.len() as u64;
        let page: Vec<Document> = matches.into_iter().skip(query.offset as usize).collect();
        Ok(SearchResults::new(page, total_count))
    }

    fn update_score(&self, link_id: Uuid, score: f64) -> IndexResult<()> {
        let mut data = self.write()?;
        let doc = data.docs.get_mut(&link_id).ok_or(IndexError::NotFound)?;
        doc.page_rank = score;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn doc(title: &str, content: &str) -> Document {
        Document {
            link_id: Uuid::new_v4(),
            url: format!("https://example.com/{}", title.to_lowercase()),
            title: title.to_string(),
            content: content.to_string(),
            indexed_at: Utc::now(),
            page_rank: 0.0,
        }
    }

    fn match_query(expression: &str) -> Query {
        Query {
            query_type: QueryType::Match,
            expression: expression.to_string(),
            offset: 0,
        }
    }

    #[test]
    fn test_index_and_find() {
        let index = InMemoryIndex::new();
        let document = doc("Rust", "systems programming language");
        index.index(&document).unwrap();

        let found = index.find_by_id(document.link_id).unwrap();
        assert_eq!(found.title, "Rust");
        assert_eq!(found.content, "systems programming language");
    }

    #[test]
    fn test_index_rejects_nil_link_id() {
        let index = InMemoryIndex::new();
        let mut document = doc("Nil", "no identity");
        document.link_id = Uuid::nil();
        assert!(matches!(
            index.index(&document),
            Err(IndexError::MissingLinkId)
        ));
    }

    #[test]
    fn test_find_unknown_is_not_found() {
        let index = InMemoryIndex::new();
        assert!(matches!(
            index.find_by_id(Uuid::new_v4()),
            Err(IndexError::NotFound)
        ));
    }

    #[test]
    fn test_match_query_requires_all_terms() {
        let index = InMemoryIndex::new();
        index.index(&doc("First", "the quick brown fox")).unwrap();
        index.index(&doc("Second", "the quick red panda")).unwrap();

        let results = index.search(&match_query("quick fox")).unwrap();
        assert_eq!(results.total_count(), 1);
        let titles: Vec<String> = results.map(|d| d.title).collect();
        assert_eq!(titles, vec!["First"]);
    }

    #[test]
    fn test_phrase_query_requires_substring() {
        let index = InMemoryIndex::new();
        index.index(&doc("First", "the quick brown fox")).unwrap();
        index.index(&doc("Second", "the brown quick fox")).unwrap();

        let results = index
            .search(&Query {
                query_type: QueryType::Phrase,
                expression: "quick brown".to_string(),
                offset: 0,
            })
            .unwrap();
        assert_eq!(results.total_count(), 1);
    }

    #[test]
    fn test_results_ordered_by_page_rank() {
        let index = InMemoryIndex::new();
        let low = doc("Low", "shared term ranking");
        let high = doc("High", "shared term ranking");
        index.index(&low).unwrap();
        index.index(&high).unwrap();
        index.update_score(low.link_id, 0.1).unwrap();
        index.update_score(high.link_id, 0.9).unwrap();

        let titles: Vec<String> = index
            .search(&match_query("shared"))
            .unwrap()
            .map(|d| d.title)
            .collect();
        assert_eq!(titles, vec!["High", "Low"]);
    }

    #[test]
    fn test_offset_skips_leading_results() {
        let index = InMemoryIndex::new();
        for i in 0..5 {
            let mut d = doc(&format!("Doc{i}"), "common words everywhere");
            d.page_rank = i as f64;
            index.index(&d).unwrap();
            index.update_score(d.link_id, i as f64).unwrap();
        }

        let mut query = match_query("common");
        query.offset = 3;
        let results = index.search(&query).unwrap();
        assert_eq!(results.total_count(), 5);
        assert_eq!(results.count(), 2);
    }

    #[test]
    fn test_reindex_preserves_page_rank() {
        let index = InMemoryIndex::new();
        let mut document = doc("Stable", "original content");
        index.index(&document).unwrap();
        index.update_score(document.link_id, 0.42).unwrap();

        document.content = "updated content".to_string();
        index.index(&document).unwrap();

        let found = index.find_by_id(document.link_id).unwrap();
        assert_eq!(found.content, "updated content");
        assert!((found.page_rank - 0.42).abs() < f64::EPSILON);

        // The old content's terms no longer match.
        let stale = index.search(&match_query("original")).unwrap();
        assert_eq!(stale.total_count(), 0);
    }

    #[test]
    fn test_update_score_unknown_is_not_found() {
        let index = InMemoryIndex::new();
        assert!(matches!(
            index.update_score(Uuid::new_v4(), 1.0),
            Err(IndexError::NotFound)
        ));
    }
}
