use crate::domain::ports::TransactionStore;
use crate::domain::transaction::{Transaction, TransactionId};
use crate::error::{PurchaseError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamilyDescriptor, DB, IteratorMode, Options};
use std::path::Path;
use std::sync::Arc;

/// Column Family for transactions not yet finalized.
pub const CF_PENDING: &str = "pending";
/// Column Family for finalized purchases, keyed by product.
pub const CF_OWNED: &str = "owned";

fn internal(message: String) -> PurchaseError {
    PurchaseError::InternalError(Box::new(std::io::Error::other(message)))
}

/// A persistent transaction store backed by RocksDB.
///
/// Lets unfinished transactions survive a process relaunch, so the queue can
/// hand them to the next subscriber. `Clone` shares the underlying `Arc<DB>`.
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at `path` with the `pending` and
    /// `owned` column families.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_pending = ColumnFamilyDescriptor::new(CF_PENDING, Options::default());
        let cf_owned = ColumnFamilyDescriptor::new(CF_OWNED, Options::default());

        let db = DB::open_cf_descriptors(&opts, path, vec![cf_pending, cf_owned])?;

        Ok(Self { db: Arc::new(db) })
    }

    fn put(&self, cf_name: &str, key: &[u8], tx: &Transaction) -> Result<()> {
        let cf = self
            .db
            .cf_handle(cf_name)
            .ok_or_else(|| internal(format!("{cf_name} column family not found")))?;
        let value = serde_json::to_vec(tx).map_err(|e| internal(format!("Serialization error: {e}")))?;
        self.db.put_cf(&cf, key, value)?;
        Ok(())
    }

    fn scan(&self, cf_name: &str) -> Result<Vec<Transaction>> {
        let cf = self
            .db
            .cf_handle(cf_name)
            .ok_or_else(|| internal(format!("{cf_name} column family not found")))?;

        let mut transactions = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_key, value) = item.map_err(|e| internal(format!("RocksDB iteration error: {e}")))?;
            let tx = serde_json::from_slice(&value)
                .map_err(|e| internal(format!("Failed to deserialize transaction: {e}")))?;
            transactions.push(tx);
        }
        Ok(transactions)
    }
}

#[async_trait]
impl TransactionStore for RocksDBStore {
    async fn store_pending(&self, tx: Transaction) -> Result<()> {
        self.put(CF_PENDING, tx.id.as_str().as_bytes(), &tx)
    }

    async fn remove_pending(&self, id: &TransactionId) -> Result<Option<Transaction>> {
        let cf = self
            .db
            .cf_handle(CF_PENDING)
            .ok_or_else(|| internal(format!("{CF_PENDING} column family not found")))?;

        let key = id.as_str().as_bytes();
        let Some(bytes) = self.db.get_cf(&cf, key)? else {
            return Ok(None);
        };
        let tx = serde_json::from_slice(&bytes)
            .map_err(|e| internal(format!("Deserialization error: {e}")))?;
        self.db.delete_cf(&cf, key)?;
        Ok(Some(tx))
    }

    async fn pending(&self) -> Result<Vec<Transaction>> {
        self.scan(CF_PENDING)
    }

    async fn store_owned(&self, tx: Transaction) -> Result<()> {
        self.put(CF_OWNED, tx.product.as_str().as_bytes(), &tx)
    }

    async fn owned(&self) -> Result<Vec<Transaction>> {
        self.scan(CF_OWNED)
    }
}
