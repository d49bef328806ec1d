//! Retrieval service: owns the collaborators and hands borrowed views to
//! the core retrieval functions.

use std::sync::Arc;

use finreport_core::embedding::EmbeddingProvider;
use finreport_core::error::Result;
use finreport_core::models::{
    Document, DocumentCategory, DocumentFilter, Principal, SearchMode, SearchResult,
};
use finreport_core::search::{self, RetrievalParams, Retriever, SearchRequest, SelectionPrefs};
use finreport_core::store::{DocumentStore, VectorIndex};

#[derive(Clone)]
pub struct SearchService {
    documents: Arc<dyn DocumentStore>,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    params: RetrievalParams,
    final_limit: usize,
}

impl SearchService {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        params: RetrievalParams,
        final_limit: usize,
    ) -> Self {
        Self {
            documents,
            index,
            embedder,
            params,
            final_limit,
        }
    }

    fn retriever(&self) -> Retriever<'_> {
        Retriever {
            documents: self.documents.as_ref(),
            index: self.index.as_ref(),
            embedder: self.embedder.as_ref(),
            params: &self.params,
        }
    }

    pub fn embeddings_enabled(&self) -> bool {
        self.embedder.is_enabled()
    }

    /// Hybrid when embeddings are available, keyword otherwise.
    pub fn default_mode(&self) -> SearchMode {
        if self.embeddings_enabled() {
            SearchMode::Hybrid
        } else {
            SearchMode::Keyword
        }
    }

    pub fn final_limit(&self) -> usize {
        self.final_limit
    }

    /// `limit` defaults to `retrieval.final_limit`.
    pub async fn search(
        &self,
        principal: &Principal,
        query: &str,
        mode: SearchMode,
        limit: Option<usize>,
        categories: &[DocumentCategory],
    ) -> Result<Vec<SearchResult>> {
        let request = SearchRequest {
            query,
            mode,
            limit: limit.unwrap_or(self.final_limit),
            categories,
            owner: Some(principal.as_str()),
        };
        let results = self.retriever().search(&request).await?;
        tracing::debug!(query, mode = %mode, results = results.len(), "search");
        Ok(results)
    }

    pub async fn auto_select(
        &self,
        principal: &Principal,
        context: &str,
        max_files: usize,
        prefs: SelectionPrefs,
    ) -> Result<Vec<Document>> {
        self.retriever()
            .auto_select(context, max_files, prefs, Some(principal.as_str()))
            .await
    }

    /// Registry listing scoped to `principal`.
    pub async fn available(
        &self,
        principal: &Principal,
        mut filter: DocumentFilter,
    ) -> Result<Vec<Document>> {
        filter.owner = Some(principal.as_str().to_string());
        search::available(self.documents.as_ref(), &filter).await
    }
}
