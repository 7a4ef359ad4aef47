use crate::domain::product::{LocalizedPrice, Product, ProductId};
use crate::error::{PurchaseError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Deserialize)]
struct CatalogRow {
    id: String,
    title: String,
    price: Decimal,
    currency: String,
    #[serde(default = "default_available")]
    available: bool,
}

fn default_available() -> bool {
    true
}

impl From<CatalogRow> for Product {
    fn from(row: CatalogRow) -> Self {
        Product {
            id: ProductId::new(row.id),
            title: row.title,
            price: LocalizedPrice {
                amount: row.price,
                currency: row.currency,
            },
            available: row.available,
        }
    }
}

/// Reads the store's product list from CSV with columns
/// `id, title, price, currency, available`.
pub struct CatalogReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> CatalogReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily deserializes products.
    pub fn products(self) -> impl Iterator<Item = Result<Product>> {
        self.reader
            .into_deserialize::<CatalogRow>()
            .map(|row| row.map(Product::from).map_err(PurchaseError::from))
    }
}
