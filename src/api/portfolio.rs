// Typed portfolio endpoints over the cached client
// Author: kelexine (https://github.com/kelexine)

use super::models::{Document, Estate, EstateInput, ItemResponse, ListResponse, Plot};
use crate::cache::{ApiCache, CacheConfig, CacheStats, FetchOptions};
use crate::client::{multipart, ApiClient};
use crate::error::Result;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

const ESTATES_KEY: &str = "estates";
const DOCUMENTS_KEY: &str = "documents";

fn estate_key(id: &str) -> String {
    format!("estate:{}", id)
}

fn plots_key(estate_id: &str) -> String {
    format!("plots:{}", estate_id)
}

/// Portfolio API facade.
///
/// Reads are served through per-resource response caches; writes go straight
/// to the API and invalidate the keys they affect.
pub struct PortfolioApi {
    client: ApiClient,
    estates: ApiCache<Vec<Estate>>,
    estate: ApiCache<Estate>,
    plots: ApiCache<Vec<Plot>>,
    documents: ApiCache<Vec<Document>>,
}

/// Hit/miss figures for each resource cache.
#[derive(Debug, Clone, Serialize)]
pub struct PortfolioCacheStats {
    pub estates: CacheStats,
    pub estate: CacheStats,
    pub plots: CacheStats,
    pub documents: CacheStats,
}

impl PortfolioApi {
    /// Must be called inside a Tokio runtime (the caches start their sweeps).
    pub fn new(client: ApiClient, cache: &CacheConfig) -> Self {
        Self {
            client,
            estates: ApiCache::new(cache.clone()),
            estate: ApiCache::new(cache.clone()),
            plots: ApiCache::new(cache.clone()),
            documents: ApiCache::new(cache.clone()),
        }
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub async fn list_estates(&self) -> Result<Arc<Vec<Estate>>> {
        let client = self.client.clone();
        self.estates
            .fetch_with_cache(
                ESTATES_KEY,
                move || async move {
                    let list: ListResponse<Estate> = client.get("/estates").await?;
                    Ok(list.into_vec())
                },
                FetchOptions::default(),
            )
            .await
    }

    pub async fn get_estate(&self, id: &str) -> Result<Arc<Estate>> {
        let client = self.client.clone();
        let path = format!("/estates/{}", urlencoding::encode(id));
        self.estate
            .fetch_with_cache(
                &estate_key(id),
                move || async move {
                    let item: ItemResponse<Estate> = client.get(&path).await?;
                    Ok(item.into_inner())
                },
                FetchOptions::default(),
            )
            .await
    }

    pub async fn create_estate(&self, input: &EstateInput) -> Result<Estate> {
        let item: ItemResponse<Estate> = self.client.post("/estates", input).await?;
        let estate = item.into_inner();
        self.estates.invalidate(ESTATES_KEY);
        self.estate.set(&estate_key(&estate.id), estate.clone(), None);
        debug!("Created estate {}", estate.id);
        Ok(estate)
    }

    pub async fn update_estate(&self, id: &str, input: &EstateInput) -> Result<Estate> {
        let path = format!("/estates/{}", urlencoding::encode(id));
        let item: ItemResponse<Estate> = self.client.patch(&path, input).await?;
        let estate = item.into_inner();
        self.estates.invalidate(ESTATES_KEY);
        self.estate.set(&estate_key(id), estate.clone(), None);
        Ok(estate)
    }

    pub async fn delete_estate(&self, id: &str) -> Result<()> {
        let path = format!("/estates/{}", urlencoding::encode(id));
        let _: serde_json::Value = self.client.delete(&path).await?;
        self.estates.invalidate(ESTATES_KEY);
        self.estate.invalidate(&estate_key(id));
        self.plots.invalidate(&plots_key(id));
        debug!("Deleted estate {}", id);
        Ok(())
    }

    pub async fn list_plots(&self, estate_id: &str) -> Result<Arc<Vec<Plot>>> {
        let client = self.client.clone();
        let path = format!("/estates/{}/plots", urlencoding::encode(estate_id));
        self.plots
            .fetch_with_cache(
                &plots_key(estate_id),
                move || async move {
                    let list: ListResponse<Plot> = client.get(&path).await?;
                    Ok(list.into_vec())
                },
                FetchOptions::default(),
            )
            .await
    }

    pub async fn list_documents(&self) -> Result<Arc<Vec<Document>>> {
        let client = self.client.clone();
        self.documents
            .fetch_with_cache(
                DOCUMENTS_KEY,
                move || async move {
                    let list: ListResponse<Document> = client.get("/documents").await?;
                    Ok(list.into_vec())
                },
                FetchOptions::default(),
            )
            .await
    }

    /// Upload a file as multipart form-data under the `file` field.
    pub async fn upload_document(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
        estate_id: Option<&str>,
    ) -> Result<Document> {
        let part = multipart::Part::bytes(bytes).file_name(file_name.to_string());
        let mut form = multipart::Form::new().part("file", part);
        if let Some(estate_id) = estate_id {
            form = form.text("estateId", estate_id.to_string());
        }

        let item: ItemResponse<Document> = self.client.upload("/documents/upload", form).await?;
        self.documents.invalidate(DOCUMENTS_KEY);
        Ok(item.into_inner())
    }

    pub fn cache_stats(&self) -> PortfolioCacheStats {
        PortfolioCacheStats {
            estates: self.estates.stats(),
            estate: self.estate.stats(),
            plots: self.plots.stats(),
            documents: self.documents.stats(),
        }
    }

    /// Stop cache sweeps and pending background refreshes.
    pub fn dispose(&self) {
        self.estates.dispose();
        self.estate.dispose();
        self.plots.dispose();
        self.documents.dispose();
    }
}
