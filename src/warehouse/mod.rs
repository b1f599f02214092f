pub mod seed;
pub mod sqlite;

use crate::errors::AppResult;
use crate::models::{Credentials, SqlValue};

pub use seed::{DemoDataSpec, SaleInput, WarehouseWriter};
pub use sqlite::SqliteWarehouse;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WarehouseRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
}

/// An open, authenticated session against the warehouse.
///
/// Implementations are not expected to be shared between threads; the connection
/// manager serializes access.
pub trait WarehouseConnection: Send {
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> AppResult<WarehouseRows>;

    fn ping(&mut self) -> AppResult<()> {
        self.execute("SELECT 1", &[]).map(|_| ())
    }

    fn close(self: Box<Self>) -> AppResult<()>;
}

pub trait Warehouse: Send + Sync {
    fn name(&self) -> &str;

    /// Fails with `Authentication` for rejected credentials and `Connectivity`
    /// when the warehouse cannot be reached.
    fn connect(&self, credentials: &Credentials) -> AppResult<Box<dyn WarehouseConnection>>;
}
