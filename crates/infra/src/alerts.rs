//! Stock threshold scanning. Delivery of alerts is left to the caller.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use stockflow_core::CompanyId;
use stockflow_costing::is_low_stock;
use stockflow_inventory::{ProductId, ProductStock};

use crate::error::LedgerResult;
use crate::store::InventoryStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertKind {
    OutOfStock,
    LowStock,
    Overstock,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAlert {
    pub company_id: CompanyId,
    pub product_id: ProductId,
    pub sku: String,
    pub kind: AlertKind,
    pub current_stock: Decimal,
    /// The threshold that was crossed (`None` for out-of-stock without a minimum).
    pub threshold: Option<Decimal>,
}

/// Classify one product. Out-of-stock wins over low-stock.
pub fn classify(product: &ProductStock) -> Option<AlertKind> {
    let stock = product.current_stock();
    if stock.is_zero() {
        return Some(AlertKind::OutOfStock);
    }
    if product.min_stock().is_some_and(|min| is_low_stock(stock, min)) {
        return Some(AlertKind::LowStock);
    }
    if product.max_stock().is_some_and(|max| stock > max) {
        return Some(AlertKind::Overstock);
    }
    None
}

/// Read-only scan of a company's products against their thresholds.
#[derive(Debug)]
pub struct LowStockScanner<S> {
    store: S,
}

impl<S> LowStockScanner<S>
where
    S: InventoryStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn scan(&self, company_id: CompanyId) -> LedgerResult<Vec<StockAlert>> {
        let alerts: Vec<_> = self
            .store
            .list_products(company_id)?
            .into_iter()
            .filter_map(|product| {
                let kind = classify(&product)?;
                let threshold = match kind {
                    AlertKind::OutOfStock | AlertKind::LowStock => product.min_stock(),
                    AlertKind::Overstock => product.max_stock(),
                };
                Some(StockAlert {
                    company_id,
                    product_id: product.id_typed(),
                    sku: product.sku().to_string(),
                    kind,
                    current_stock: product.current_stock(),
                    threshold,
                })
            })
            .collect();
        debug!(%company_id, alerts = alerts.len(), "stock scan finished");
        Ok(alerts)
    }
}
