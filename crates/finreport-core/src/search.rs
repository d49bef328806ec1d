//! Retrieval and selection engine.
//!
//! Operates entirely through the [`DocumentStore`], [`VectorIndex`] and
//! [`EmbeddingProvider`] traits.
//!
//! # Scoring
//!
//! | Mode | Candidates | Score |
//! |------|------------|-------|
//! | `semantic` | top `candidate_k` chunks, MAX per document | cosine similarity |
//! | `keyword` | substring over filename and preview | `1.0` |
//! | `hybrid` | union of both | `semantic × w_s + boost × w_k` |
//!
//! Results are sorted by score (desc), upload time (desc), id (asc) and
//! truncated to the requested limit. Only `completed` documents without
//! deletion residue are ever returned.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::embedding::{embed_query, EmbeddingProvider};
use crate::error::{Error, Result};
use crate::models::{Document, DocumentCategory, DocumentFilter, SearchMode, SearchResult};
use crate::store::{DocumentStore, VectorFilter, VectorIndex};

const EXCERPT_CHARS: usize = 240;

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone)]
pub struct RetrievalParams {
    pub semantic_weight: f64,
    pub keyword_weight: f64,
    /// Number of chunk candidates fetched from the vector index.
    pub candidate_k: usize,
    /// Scores closer than this count as tied for recency ordering.
    pub tie_epsilon: f64,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            semantic_weight: 0.7,
            keyword_weight: 0.3,
            candidate_k: 80,
            tie_epsilon: 0.02,
        }
    }
}

/// Bundles all inputs for a single search invocation.
#[derive(Debug, Clone)]
pub struct SearchRequest<'a> {
    pub query: &'a str,
    pub mode: SearchMode,
    pub limit: usize,
    /// Empty = all categories.
    pub categories: &'a [DocumentCategory],
    /// Restrict to one principal's documents.
    pub owner: Option<&'a str>,
}

/// Preferences for [`auto_select`].
#[derive(Debug, Clone, Copy)]
pub struct SelectionPrefs {
    pub prefer_processed: bool,
    pub prefer_recent: bool,
}

impl Default for SelectionPrefs {
    fn default() -> Self {
        Self {
            prefer_processed: true,
            prefer_recent: true,
        }
    }
}

/// Borrowed collaborators used by retrieval.
#[derive(Clone, Copy)]
pub struct Retriever<'a> {
    pub documents: &'a dyn DocumentStore,
    pub index: &'a dyn VectorIndex,
    pub embedder: &'a dyn EmbeddingProvider,
    pub params: &'a RetrievalParams,
}

impl<'a> Retriever<'a> {
    pub async fn search(&self, req: &SearchRequest<'_>) -> Result<Vec<SearchResult>> {
        search(self, req).await
    }

    pub async fn auto_select(
        &self,
        context: &str,
        max_files: usize,
        prefs: SelectionPrefs,
        owner: Option<&str>,
    ) -> Result<Vec<Document>> {
        auto_select(self, context, max_files, prefs, owner).await
    }
}

struct Hit {
    score: f64,
    excerpt: Option<String>,
}

/// Run a search in the requested mode.
pub async fn search(r: &Retriever<'_>, req: &SearchRequest<'_>) -> Result<Vec<SearchResult>> {
    let query = req.query.trim();
    if query.is_empty() || req.limit == 0 {
        return Ok(Vec::new());
    }
    if req.mode.needs_embeddings() && !r.embedder.is_enabled() {
        return Err(Error::Validation(
            "semantic search requires embeddings".to_string(),
        ));
    }

    let semantic = if req.mode.needs_embeddings() {
        semantic_hits(r, req, query).await?
    } else {
        HashMap::new()
    };

    let keyword = if matches!(req.mode, SearchMode::Keyword | SearchMode::Hybrid) {
        let filter = DocumentFilter {
            search: Some(query.to_string()),
            categories: req.categories.to_vec(),
            owner: req.owner.map(str::to_string),
            searchable_only: true,
            limit: match req.mode {
                SearchMode::Keyword => req.limit,
                _ => r.params.candidate_k.max(req.limit),
            },
            ..DocumentFilter::default()
        };
        r.documents
            .list_documents(&filter)
            .await
            .map_err(Error::storage)?
    } else {
        Vec::new()
    };

    let mut docs: HashMap<String, Document> = keyword
        .into_iter()
        .map(|d| (d.id.clone(), d))
        .collect();
    let keyword_ids: Vec<String> = docs.keys().cloned().collect();

    let missing: Vec<String> = semantic
        .keys()
        .filter(|id| !docs.contains_key(*id))
        .cloned()
        .collect();
    if !missing.is_empty() {
        for doc in r
            .documents
            .get_documents(&missing)
            .await
            .map_err(Error::storage)?
        {
            docs.insert(doc.id.clone(), doc);
        }
    }

    let mut results: Vec<SearchResult> = Vec::new();
    for (id, doc) in docs {
        if !doc.is_searchable() {
            continue;
        }
        if !req.categories.is_empty() && !req.categories.contains(&doc.category) {
            continue;
        }
        if let Some(owner) = req.owner {
            if doc.owner != owner {
                continue;
            }
        }
        let boost = if keyword_ids.contains(&id) { 1.0 } else { 0.0 };
        let sem = semantic.get(&id);
        let (score, excerpt) = match req.mode {
            SearchMode::Keyword => (1.0, None),
            SearchMode::Semantic => match sem {
                Some(hit) => (hit.score, hit.excerpt.clone()),
                None => continue,
            },
            SearchMode::Hybrid => {
                let s = sem.map(|h| h.score).unwrap_or(0.0);
                (
                    s * r.params.semantic_weight + boost * r.params.keyword_weight,
                    sem.and_then(|h| h.excerpt.clone()),
                )
            }
        };
        let excerpt = excerpt.or_else(|| excerpt_of(&doc.content_preview));
        results.push(SearchResult {
            document_id: doc.id,
            score,
            excerpt,
            filename: doc.filename,
            category: doc.category,
            vector_status: doc.vector_status,
            uploaded_at: doc.uploaded_at,
        });
    }

    results.sort_by(result_order);
    results.truncate(req.limit);
    Ok(results)
}

/// Score desc, upload time desc, id asc.
pub fn result_order(a: &SearchResult, b: &SearchResult) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.uploaded_at.cmp(&a.uploaded_at))
        .then_with(|| a.document_id.cmp(&b.document_id))
}

/// Chunk hits aggregated per document by MAX score.
async fn semantic_hits(
    r: &Retriever<'_>,
    req: &SearchRequest<'_>,
    query: &str,
) -> Result<HashMap<String, Hit>> {
    let vector = embed_query(r.embedder, query)
        .await
        .map_err(|e| Error::transient("embedding", e))?;
    let filter = VectorFilter {
        owner: req.owner.map(str::to_string),
        categories: req.categories.to_vec(),
        searchable_only: true,
        ..VectorFilter::default()
    };
    let hits = r
        .index
        .query(&vector, r.params.candidate_k, &filter)
        .await
        .map_err(Error::storage)?;

    let mut by_doc: HashMap<String, Hit> = HashMap::new();
    for hit in hits {
        let entry = by_doc.entry(hit.document_id.clone()).or_insert(Hit {
            score: f64::NEG_INFINITY,
            excerpt: None,
        });
        if hit.score > entry.score {
            entry.score = hit.score;
            entry.excerpt = excerpt_of(&hit.text);
        }
    }
    Ok(by_doc)
}

fn excerpt_of(text: &str) -> Option<String> {
    let text = text.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.chars().take(EXCERPT_CHARS).collect())
    }
}

/// Choose up to `max_files` documents relevant to `context`.
///
/// Runs a semantic search (keyword when embeddings are disabled) with a
/// wider limit, then re-ranks with [`rank_for_selection`]. When nothing
/// matches the result is empty; callers ask the user to pick files rather
/// than guessing.
pub async fn auto_select(
    r: &Retriever<'_>,
    context: &str,
    max_files: usize,
    prefs: SelectionPrefs,
    owner: Option<&str>,
) -> Result<Vec<Document>> {
    if max_files == 0 {
        return Ok(Vec::new());
    }
    let limit = (max_files * 4).max(20);
    let mode = if r.embedder.is_enabled() {
        SearchMode::Semantic
    } else {
        SearchMode::Keyword
    };
    let results = search(
        r,
        &SearchRequest {
            query: context,
            mode,
            limit,
            categories: &[],
            owner,
        },
    )
    .await?;

    if results.is_empty() {
        return Ok(Vec::new());
    }

    let scores: HashMap<String, f64> = results
        .iter()
        .map(|res| (res.document_id.clone(), res.score))
        .collect();
    let ids: Vec<String> = results.into_iter().map(|res| res.document_id).collect();
    let candidates: Vec<(Document, f64)> = r
        .documents
        .get_documents(&ids)
        .await
        .map_err(Error::storage)?
        .into_iter()
        .map(|d| {
            let score = scores.get(&d.id).copied().unwrap_or(0.0);
            (d, score)
        })
        .collect();

    let mut ranked = rank_for_selection(candidates, prefs, r.params.tie_epsilon);
    ranked.truncate(max_files);
    Ok(ranked)
}

/// Order selection candidates.
///
/// With `prefer_processed`, every `completed` document precedes every other
/// one. With `prefer_recent`, runs of scores within `epsilon` of the run's
/// leader are ordered newest first.
pub fn rank_for_selection(
    mut candidates: Vec<(Document, f64)>,
    prefs: SelectionPrefs,
    epsilon: f64,
) -> Vec<Document> {
    candidates.sort_by(|(a, sa), (b, sb)| {
        sb.partial_cmp(sa)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.uploaded_at.cmp(&a.uploaded_at))
            .then_with(|| a.id.cmp(&b.id))
    });

    let (mut first, mut second): (Vec<_>, Vec<_>) = if prefs.prefer_processed {
        candidates.into_iter().partition(|(d, _)| d.is_searchable())
    } else {
        (candidates, Vec::new())
    };

    if prefs.prefer_recent {
        bucket_by_recency(&mut first, epsilon);
        bucket_by_recency(&mut second, epsilon);
    }
    first.extend(second);
    first.into_iter().map(|(d, _)| d).collect()
}

/// `items` must be sorted by score desc.
fn bucket_by_recency(items: &mut [(Document, f64)], epsilon: f64) {
    let mut start = 0;
    while start < items.len() {
        let leader = items[start].1;
        let end = items[start..]
            .iter()
            .position(|(_, s)| (leader - s).abs() >= epsilon)
            .map(|p| start + p)
            .unwrap_or(items.len());
        items[start..end].sort_by(|(a, _), (b, _)| {
            b.uploaded_at
                .cmp(&a.uploaded_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        start = end;
    }
}

/// Registry listing for pickers and the file-list intent.
pub async fn available(
    documents: &dyn DocumentStore,
    filter: &DocumentFilter,
) -> Result<Vec<Document>> {
    documents
        .list_documents(filter)
        .await
        .map_err(Error::storage)
}
