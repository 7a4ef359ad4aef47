use crate::domain::ports::ProductLookupBox;
use crate::domain::product::{Product, ProductId};
use crate::error::{PurchaseError, Result};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Answer for one identifier. `None` means the store did not return it.
struct Entry {
    fetched_at: Instant,
    product: Option<Product>,
}

/// Resolves product identifiers into store metadata and keeps the latest
/// answer in an advisory cache.
pub struct ProductCatalog {
    lookup: ProductLookupBox,
    known: Vec<ProductId>,
    ttl: Duration,
    cache: RwLock<HashMap<ProductId, Entry>>,
}

impl ProductCatalog {
    /// Creates a catalog for the identifiers the application sells.
    ///
    /// # Arguments
    ///
    /// * `lookup` - The store's product metadata service.
    /// * `known` - Product identifiers configured for this application.
    /// * `ttl` - How long a fetch is trusted before `product` refetches.
    pub fn new(lookup: ProductLookupBox, known: Vec<ProductId>, ttl: Duration) -> Self {
        Self {
            lookup,
            known,
            ttl,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Fetches metadata for `ids`, omitting identifiers the store does not know.
    /// Each requested identifier's cache entry is replaced; others are kept.
    pub async fn fetch_products(&self, ids: &[ProductId]) -> Result<Vec<Product>> {
        let products = self
            .lookup
            .lookup(ids)
            .await
            .map_err(|e| PurchaseError::CatalogUnavailable(e.to_string()))?;

        let products: Vec<Product> = products
            .into_iter()
            .filter(|p| ids.contains(&p.id))
            .collect();
        debug!(requested = ids.len(), found = products.len(), "catalog fetched");

        let fetched_at = Instant::now();
        let mut cache = self.cache.write().await;
        for id in ids {
            let product = products.iter().find(|p| &p.id == id).cloned();
            cache.insert(id.clone(), Entry { fetched_at, product });
        }
        Ok(products)
    }

    /// Refetches every known product.
    pub async fn refresh(&self) -> Result<Vec<Product>> {
        self.fetch_products(&self.known).await
    }

    /// Returns purchasable metadata for `id`, refreshing first when it has no fresh entry.
    ///
    /// Identifiers outside the configured set are rejected without a lookup.
    pub async fn product(&self, id: &ProductId) -> Result<Product> {
        if !self.known.contains(id) {
            return Err(PurchaseError::InvalidProduct(id.clone()));
        }

        if let Some(product) = self.cached(id).await? {
            return Self::purchasable(product);
        }

        if let Err(e) = self.refresh().await {
            warn!(product = %id, error = %e, "catalog refresh failed");
            return Err(e);
        }
        match self.cached(id).await? {
            Some(product) => Self::purchasable(product),
            None => Err(PurchaseError::InvalidProduct(id.clone())),
        }
    }

    /// `Ok(None)` means `id` was never fetched or its entry is stale. A fresh
    /// entry the store left empty is an `InvalidProduct`.
    async fn cached(&self, id: &ProductId) -> Result<Option<Product>> {
        let cache = self.cache.read().await;
        match cache.get(id) {
            Some(entry) if entry.fetched_at.elapsed() < self.ttl => entry
                .product
                .clone()
                .map(Some)
                .ok_or_else(|| PurchaseError::InvalidProduct(id.clone())),
            _ => Ok(None),
        }
    }

    fn purchasable(product: Product) -> Result<Product> {
        if product.available {
            Ok(product)
        } else {
            Err(PurchaseError::InvalidProduct(product.id))
        }
    }
}
