use crate::errors::{AppError, AppResult};
use chrono::{Datelike, NaiveDate, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rusqlite::{params, Connection};
use std::fs;
use std::path::Path;

const SCHEMA_SQL: &str = include_str!("schema.sql");

const STORES: &[(&str, &str, &str, &str)] = &[
    ("Loja Centro", "São Paulo", "SP", "Southeast"),
    ("Loja Copacabana", "Rio de Janeiro", "RJ", "Southeast"),
    ("Loja Savassi", "Belo Horizonte", "MG", "Southeast"),
    ("Loja Batel", "Curitiba", "PR", "South"),
    ("Loja Moinhos", "Porto Alegre", "RS", "South"),
    ("Loja Boa Viagem", "Recife", "PE", "Northeast"),
    ("Loja Barra", "Salvador", "BA", "Northeast"),
    ("Loja Ponta Negra", "Manaus", "AM", "North"),
    ("Loja Asa Sul", "Brasília", "DF", "Central-West"),
];

const PRODUCTS: &[(&str, &str, &str, f64)] = &[
    ("Notebook Pro 14", "Orion", "Electronics", 4_200.0),
    ("Smartphone X", "Orion", "Electronics", 2_800.0),
    ("Wireless Earbuds", "Sonora", "Electronics", 450.0),
    ("Smart TV 50", "Vista", "Electronics", 3_100.0),
    ("Office Chair", "Ergo", "Furniture", 900.0),
    ("Standing Desk", "Ergo", "Furniture", 1_700.0),
    ("Bookshelf", "Casa", "Furniture", 520.0),
    ("Running Shoes", "Stride", "Apparel", 380.0),
    ("Winter Jacket", "Stride", "Apparel", 610.0),
    ("Cotton T-Shirt", "Basic", "Apparel", 70.0),
    ("Coffee Maker", "Aroma", "Home", 340.0),
    ("Blender", "Aroma", "Home", 260.0),
    ("Cookware Set", "Chef", "Home", 780.0),
    ("Board Game", "Play", "Toys", 150.0),
    ("Building Blocks", "Play", "Toys", 220.0),
];

const SALESPERSONS: &[&str] = &[
    "Ana Souza",
    "Bruno Lima",
    "Carla Mendes",
    "Diego Rocha",
    "Elisa Martins",
    "Felipe Araújo",
    "Gabriela Costa",
    "Henrique Alves",
    "Isabela Ferreira",
    "João Ribeiro",
    "Karina Duarte",
    "Lucas Pereira",
];

const CUSTOMERS: &[(&str, &str, &str)] = &[
    ("Mariana Silva", "São Paulo", "SP"),
    ("Rafael Gomes", "Campinas", "SP"),
    ("Patrícia Nunes", "Rio de Janeiro", "RJ"),
    ("Thiago Barros", "Niterói", "RJ"),
    ("Vanessa Cardoso", "Curitiba", "PR"),
    ("Rodrigo Teixeira", "Porto Alegre", "RS"),
    ("Juliana Moreira", "Recife", "PE"),
    ("Marcelo Dias", "Salvador", "BA"),
    ("Camila Ramos", "Manaus", "AM"),
    ("André Castro", "Brasília", "DF"),
];

#[derive(Debug, Clone)]
pub struct SaleInput {
    pub transaction_id: i64,
    pub date: NaiveDate,
    pub customer_id: Option<i64>,
    pub store_code: i64,
    pub product_sku: i64,
    pub salesperson_badge: i64,
    pub quantity: i64,
    pub total_amount: f64,
}

#[derive(Debug, Clone)]
pub struct DemoDataSpec {
    pub seed: u64,
    pub year: i32,
    pub transactions: usize,
}

impl Default for DemoDataSpec {
    fn default() -> Self {
        Self {
            seed: 42,
            year: Utc::now().year(),
            transactions: 2_000,
        }
    }
}

/// Read-write handle used to build a warehouse file. The dashboard itself only
/// ever opens warehouses read-only.
pub struct WarehouseWriter {
    conn: Connection,
}

impl WarehouseWriter {
    pub fn create(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn })
    }

    pub fn add_user(&self, account: &str, user: &str, token: &str) -> AppResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO warehouse_users (account, user_name, token, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![account, user, token, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn add_customer(&self, id: i64, name: &str, city: &str, state: &str) -> AppResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO dim_customer (id, name, city, state) VALUES (?1, ?2, ?3, ?4)",
            params![id, name, city, state],
        )?;
        Ok(())
    }

    pub fn add_store(&self, code: i64, name: &str, city: &str, state: &str, region: &str) -> AppResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO dim_store (code, name, city, state, region) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![code, name, city, state, region],
        )?;
        Ok(())
    }

    pub fn add_product(&self, sku: i64, name: &str, brand: &str, category: &str) -> AppResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO dim_product (sku, name, brand, category) VALUES (?1, ?2, ?3, ?4)",
            params![sku, name, brand, category],
        )?;
        Ok(())
    }

    pub fn add_salesperson(&self, badge: i64, name: &str) -> AppResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO dim_salesperson (badge, name) VALUES (?1, ?2)",
            params![badge, name],
        )?;
        Ok(())
    }

    pub fn add_sale(&self, sale: &SaleInput) -> AppResult<()> {
        insert_sale(&self.conn, sale)
    }

    /// Fills every dimension and `spec.transactions` random sales within `spec.year`.
    /// Identical seed settings always produce an identical warehouse.
    pub fn seed_demo(&mut self, spec: &DemoDataSpec) -> AppResult<usize> {
        let last_day = NaiveDate::from_ymd_opt(spec.year, 12, 31)
            .ok_or_else(|| AppError::Internal(format!("Invalid demo year {}", spec.year)))?;
        let days_in_year = last_day.ordinal();
        let mut rng = StdRng::seed_from_u64(spec.seed);

        let tx = self.conn.transaction()?;
        for (index, (name, city, state, region)) in STORES.iter().enumerate() {
            tx.execute(
                "INSERT OR REPLACE INTO dim_store (code, name, city, state, region) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![index as i64 + 1, name, city, state, region],
            )?;
        }
        for (index, (name, brand, category, _)) in PRODUCTS.iter().enumerate() {
            tx.execute(
                "INSERT OR REPLACE INTO dim_product (sku, name, brand, category) VALUES (?1, ?2, ?3, ?4)",
                params![index as i64 + 1, name, brand, category],
            )?;
        }
        for (index, name) in SALESPERSONS.iter().enumerate() {
            tx.execute(
                "INSERT OR REPLACE INTO dim_salesperson (badge, name) VALUES (?1, ?2)",
                params![index as i64 + 1, name],
            )?;
        }
        for (index, (name, city, state)) in CUSTOMERS.iter().enumerate() {
            tx.execute(
                "INSERT OR REPLACE INTO dim_customer (id, name, city, state) VALUES (?1, ?2, ?3, ?4)",
                params![index as i64 + 1, name, city, state],
            )?;
        }

        let first_id: i64 = tx.query_row(
            "SELECT COALESCE(MAX(transaction_id), 0) + 1 FROM fact_sales",
            [],
            |row| row.get(0),
        )?;

        for offset in 0..spec.transactions {
            let ordinal = rng.random_range(1..=days_in_year);
            let date = NaiveDate::from_yo_opt(spec.year, ordinal)
                .ok_or_else(|| AppError::Internal(format!("Invalid ordinal {}", ordinal)))?;
            let product_index = rng.random_range(0..PRODUCTS.len());
            let quantity = rng.random_range(1..=4_i64);
            let unit_price = PRODUCTS[product_index].3 * rng.random_range(0.9..1.1);
            let total_amount = (unit_price * quantity as f64 * 100.0).round() / 100.0;

            insert_sale(
                &tx,
                &SaleInput {
                    transaction_id: first_id + offset as i64,
                    date,
                    customer_id: Some(rng.random_range(0..CUSTOMERS.len()) as i64 + 1),
                    store_code: rng.random_range(0..STORES.len()) as i64 + 1,
                    product_sku: product_index as i64 + 1,
                    salesperson_badge: rng.random_range(0..SALESPERSONS.len()) as i64 + 1,
                    quantity,
                    total_amount,
                },
            )?;
        }
        tx.commit()?;

        tracing::info!(
            seed = spec.seed,
            year = spec.year,
            transactions = spec.transactions,
            "seeded demo warehouse"
        );
        Ok(spec.transactions)
    }
}

fn insert_sale(conn: &Connection, sale: &SaleInput) -> AppResult<()> {
    let full_date = sale.date.format("%Y-%m-%d").to_string();
    conn.execute(
        "INSERT OR IGNORE INTO dim_date (full_date, year, month, day, quarter) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            full_date,
            sale.date.year(),
            sale.date.month(),
            sale.date.day(),
            (sale.date.month() - 1) / 3 + 1
        ],
    )?;
    conn.execute(
        "INSERT INTO fact_sales (
           transaction_id, sale_date, customer_id, store_code, product_sku, salesperson_badge, quantity, total_amount
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            sale.transaction_id,
            full_date,
            sale.customer_id,
            sale.store_code,
            sale.product_sku,
            sale.salesperson_badge,
            sale.quantity,
            sale.total_amount
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{DemoDataSpec, WarehouseWriter};
    use rusqlite::Connection;

    #[test]
    fn demo_seed_is_deterministic() {
        let dir = tempfile::tempdir().expect("tempdir");
        let spec = DemoDataSpec {
            seed: 7,
            year: 2024,
            transactions: 150,
        };

        let mut totals = Vec::new();
        for name in ["a.sqlite", "b.sqlite"] {
            let path = dir.path().join(name);
            let mut writer = WarehouseWriter::create(&path).expect("create");
            assert_eq!(writer.seed_demo(&spec).expect("seed"), 150);
            let conn = Connection::open(&path).expect("open");
            let total: f64 = conn
                .query_row("SELECT SUM(total_amount) FROM fact_sales", [], |row| row.get(0))
                .expect("sum");
            totals.push(total);
        }
        assert_eq!(totals[0], totals[1]);
    }

    #[test]
    fn enriched_view_joins_every_dimension() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("wh.sqlite");
        let mut writer = WarehouseWriter::create(&path).expect("create");
        writer
            .seed_demo(&DemoDataSpec {
                seed: 1,
                year: 2023,
                transactions: 20,
            })
            .expect("seed");

        let conn = Connection::open(&path).expect("open");
        let unmatched: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sales_enriched
                 WHERE region IS NULL OR category IS NULL OR salesperson_name IS NULL OR quarter IS NULL",
                [],
                |row| row.get(0),
            )
            .expect("count");
        assert_eq!(unmatched, 0);
    }
}
