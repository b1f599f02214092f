//! Fixed, pre-authored warehouse queries.
//!
//! Every statement is a `&'static str`. Filter values only ever travel as bound
//! parameters: `?1`/`?2` date range, `?3` category, `?4` region, `?5` store city,
//! `?6` product, `?7` salesperson and `?8` the row limit for ranked queries.
//! Optional filters use `(?n IS NULL OR column = ?n)` so the SQL text never changes.
//! The multi-select filters (`?5`..`?7`) bind a JSON array and match through
//! `json_each`, so any number of choices still uses one fixed statement.
//! Calendar buckets come from `sale_date` itself, never from `dim_date`.

use crate::errors::{AppError, AppResult};
use crate::models::{AggregateResult, FilterOptions, FilterSelection, SqlValue};
use crate::warehouse::WarehouseConnection;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

macro_rules! sales_filter {
    () => {
        " WHERE sale_date BETWEEN ?1 AND ?2
            AND (?3 IS NULL OR category = ?3)
            AND (?4 IS NULL OR region = ?4)
            AND (?5 IS NULL OR store_city IN (SELECT value FROM json_each(?5)))
            AND (?6 IS NULL OR product_name IN (SELECT value FROM json_each(?6)))
            AND (?7 IS NULL OR salesperson_name IN (SELECT value FROM json_each(?7))) "
    };
}

const KPIS_SQL: &str = concat!(
    "SELECT COALESCE(SUM(total_amount), 0.0) AS total_revenue,
            COUNT(*) AS transaction_count,
            COALESCE(SUM(quantity), 0) AS units_sold
     FROM sales_enriched",
    sales_filter!()
);

const SALES_BY_PRODUCT_SQL: &str = concat!(
    "SELECT product_name AS label, SUM(total_amount) AS total_sales
     FROM sales_enriched",
    sales_filter!(),
    "GROUP BY product_name ORDER BY total_sales DESC, label ASC LIMIT ?8"
);

const SALES_BY_CATEGORY_SQL: &str = concat!(
    "SELECT category AS label, SUM(total_amount) AS total_sales
     FROM sales_enriched",
    sales_filter!(),
    "GROUP BY category ORDER BY total_sales DESC, label ASC"
);

const MONTHLY_TREND_BY_CITY_SQL: &str = concat!(
    "SELECT strftime('%Y-%m', sale_date) AS month, store_city AS series, SUM(total_amount) AS total_sales
     FROM sales_enriched",
    sales_filter!(),
    "GROUP BY 1, 2 ORDER BY 1 ASC, 2 ASC"
);

const TOP_SALESPERSONS_SQL: &str = concat!(
    "SELECT salesperson_name AS label, SUM(total_amount) AS total_sales
     FROM sales_enriched",
    sales_filter!(),
    "GROUP BY salesperson_name ORDER BY total_sales DESC, label ASC LIMIT ?8"
);

const TOP_STORES_SQL: &str = concat!(
    "SELECT store_city AS label, SUM(total_amount) AS total_sales
     FROM sales_enriched",
    sales_filter!(),
    "GROUP BY store_city ORDER BY total_sales DESC, label ASC LIMIT ?8"
);

const MONTHLY_PATTERN_SQL: &str = concat!(
    "SELECT CAST(strftime('%m', sale_date) AS INTEGER) AS month, SUM(total_amount) AS total_sales
     FROM sales_enriched",
    sales_filter!(),
    "GROUP BY 1 ORDER BY 1 ASC"
);

const QUARTERLY_SALES_SQL: &str = concat!(
    "SELECT (CAST(strftime('%m', sale_date) AS INTEGER) + 2) / 3 AS quarter, SUM(total_amount) AS total_sales
     FROM sales_enriched",
    sales_filter!(),
    "GROUP BY 1 ORDER BY 1 ASC"
);

const PRODUCT_PARETO_SQL: &str = concat!(
    "SELECT product_name AS label, SUM(total_amount) AS total_sales
     FROM sales_enriched",
    sales_filter!(),
    "GROUP BY product_name ORDER BY total_sales DESC, label ASC"
);

const RAW_RECORDS_SQL: &str = concat!(
    "SELECT sale_date, product_name, category, store_city, salesperson_name, quantity, total_amount
     FROM sales_enriched",
    sales_filter!(),
    "ORDER BY sale_date ASC, transaction_id ASC LIMIT ?8"
);

const DISTINCT_CATEGORIES_SQL: &str =
    "SELECT DISTINCT category AS value FROM sales_enriched WHERE category IS NOT NULL ORDER BY value";
const DISTINCT_REGIONS_SQL: &str =
    "SELECT DISTINCT region AS value FROM sales_enriched WHERE region IS NOT NULL ORDER BY value";
const DISTINCT_STORE_CITIES_SQL: &str =
    "SELECT DISTINCT store_city AS value FROM sales_enriched WHERE store_city IS NOT NULL ORDER BY value";
const DISTINCT_PRODUCTS_SQL: &str =
    "SELECT DISTINCT product_name AS value FROM sales_enriched WHERE product_name IS NOT NULL ORDER BY value";
const DISTINCT_SALESPERSONS_SQL: &str =
    "SELECT DISTINCT salesperson_name AS value FROM sales_enriched WHERE salesperson_name IS NOT NULL ORDER BY value";
const DATE_BOUNDS_SQL: &str = "SELECT MIN(sale_date) AS min_date, MAX(sale_date) AS max_date FROM fact_sales";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParamShape {
    None,
    Filtered,
    FilteredWithLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryName {
    Kpis,
    SalesByProduct,
    SalesByCategory,
    MonthlyTrendByCity,
    TopSalespersons,
    TopStores,
    MonthlyPattern,
    QuarterlySales,
    ProductPareto,
    RawRecords,
    DistinctCategories,
    DistinctRegions,
    DistinctStoreCities,
    DistinctProducts,
    DistinctSalespersons,
    DateBounds,
}

impl QueryName {
    pub const ALL: [QueryName; 16] = [
        Self::Kpis,
        Self::SalesByProduct,
        Self::SalesByCategory,
        Self::MonthlyTrendByCity,
        Self::TopSalespersons,
        Self::TopStores,
        Self::MonthlyPattern,
        Self::QuarterlySales,
        Self::ProductPareto,
        Self::RawRecords,
        Self::DistinctCategories,
        Self::DistinctRegions,
        Self::DistinctStoreCities,
        Self::DistinctProducts,
        Self::DistinctSalespersons,
        Self::DateBounds,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Kpis => "kpis",
            Self::SalesByProduct => "sales_by_product",
            Self::SalesByCategory => "sales_by_category",
            Self::MonthlyTrendByCity => "monthly_trend_by_city",
            Self::TopSalespersons => "top_salespersons",
            Self::TopStores => "top_stores",
            Self::MonthlyPattern => "monthly_pattern",
            Self::QuarterlySales => "quarterly_sales",
            Self::ProductPareto => "product_pareto",
            Self::RawRecords => "raw_records",
            Self::DistinctCategories => "distinct_categories",
            Self::DistinctRegions => "distinct_regions",
            Self::DistinctStoreCities => "distinct_store_cities",
            Self::DistinctProducts => "distinct_products",
            Self::DistinctSalespersons => "distinct_salespersons",
            Self::DateBounds => "date_bounds",
        }
    }

    pub fn sql(self) -> &'static str {
        match self {
            Self::Kpis => KPIS_SQL,
            Self::SalesByProduct => SALES_BY_PRODUCT_SQL,
            Self::SalesByCategory => SALES_BY_CATEGORY_SQL,
            Self::MonthlyTrendByCity => MONTHLY_TREND_BY_CITY_SQL,
            Self::TopSalespersons => TOP_SALESPERSONS_SQL,
            Self::TopStores => TOP_STORES_SQL,
            Self::MonthlyPattern => MONTHLY_PATTERN_SQL,
            Self::QuarterlySales => QUARTERLY_SALES_SQL,
            Self::ProductPareto => PRODUCT_PARETO_SQL,
            Self::RawRecords => RAW_RECORDS_SQL,
            Self::DistinctCategories => DISTINCT_CATEGORIES_SQL,
            Self::DistinctRegions => DISTINCT_REGIONS_SQL,
            Self::DistinctStoreCities => DISTINCT_STORE_CITIES_SQL,
            Self::DistinctProducts => DISTINCT_PRODUCTS_SQL,
            Self::DistinctSalespersons => DISTINCT_SALESPERSONS_SQL,
            Self::DateBounds => DATE_BOUNDS_SQL,
        }
    }

    fn shape(self) -> ParamShape {
        match self {
            Self::SalesByProduct | Self::TopSalespersons | Self::TopStores | Self::RawRecords => {
                ParamShape::FilteredWithLimit
            }
            Self::Kpis
            | Self::SalesByCategory
            | Self::MonthlyTrendByCity
            | Self::MonthlyPattern
            | Self::QuarterlySales
            | Self::ProductPareto => ParamShape::Filtered,
            Self::DistinctCategories
            | Self::DistinctRegions
            | Self::DistinctStoreCities
            | Self::DistinctProducts
            | Self::DistinctSalespersons
            | Self::DateBounds => ParamShape::None,
        }
    }

    pub fn uses_filter(self) -> bool {
        self.shape() != ParamShape::None
    }

    pub fn requires_limit(self) -> bool {
        self.shape() == ParamShape::FilteredWithLimit
    }
}

/// Parameters for one catalog invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryParams {
    pub selection: FilterSelection,
    pub limit: Option<u32>,
}

impl QueryParams {
    pub fn new(selection: FilterSelection) -> Self {
        Self {
            selection,
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Positional values bound to the statement of `name`.
    pub fn bind(&self, name: QueryName) -> AppResult<Vec<SqlValue>> {
        let shape = name.shape();
        if shape == ParamShape::None {
            return Ok(Vec::new());
        }
        let range = self.selection.date_range;
        if !range.is_valid() {
            return Err(AppError::InvalidRange(format!(
                "start date {} is after end date {}",
                range.start, range.end
            )));
        }

        let mut values = vec![
            SqlValue::from(range.start),
            SqlValue::from(range.end),
            SqlValue::from(self.selection.category.clone()),
            SqlValue::from(self.selection.region.clone()),
            choices(&self.selection.store_city)?,
            choices(&self.selection.product)?,
            choices(&self.selection.salesperson)?,
        ];
        if shape == ParamShape::FilteredWithLimit {
            let limit = self.limit.ok_or_else(|| {
                AppError::Query(format!("Query '{}' requires a row limit", name.as_str()))
            })?;
            values.push(SqlValue::Integer(i64::from(limit)));
        }
        Ok(values)
    }
}

/// A multi-select binds as a JSON array, or NULL when nothing is selected.
fn choices(values: &[String]) -> AppResult<SqlValue> {
    if values.is_empty() {
        return Ok(SqlValue::Null);
    }
    Ok(SqlValue::Text(serde_json::to_string(values)?))
}

/// Runs a catalog entry. No matching rows yields an empty result, not an error.
pub fn run_query(
    conn: &mut dyn WarehouseConnection,
    name: QueryName,
    params: &QueryParams,
) -> AppResult<AggregateResult> {
    let values = params.bind(name)?;
    let started = std::time::Instant::now();
    let rows = conn.execute(name.sql(), &values)?;
    tracing::debug!(
        query = name.as_str(),
        rows = rows.rows.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "catalog query executed"
    );
    Ok(AggregateResult {
        query: name.as_str().to_string(),
        columns: rows.columns,
        rows: rows.rows,
    })
}

/// Distinct dimension values and date bounds for the filter widgets.
pub fn load_filter_options(conn: &mut dyn WarehouseConnection) -> AppResult<FilterOptions> {
    let unfiltered = QueryParams::new(FilterSelection::default());
    let mut distinct = |name: QueryName| -> AppResult<Vec<String>> {
        let result = run_query(&mut *conn, name, &unfiltered)?;
        Ok(result
            .rows
            .iter()
            .filter_map(|row| row.first().and_then(SqlValue::as_str).map(ToString::to_string))
            .collect())
    };

    let categories = distinct(QueryName::DistinctCategories)?;
    let regions = distinct(QueryName::DistinctRegions)?;
    let store_cities = distinct(QueryName::DistinctStoreCities)?;
    let products = distinct(QueryName::DistinctProducts)?;
    let salespersons = distinct(QueryName::DistinctSalespersons)?;

    let bounds = run_query(conn, QueryName::DateBounds, &unfiltered)?;
    let parse_bound = |column: &str| {
        bounds
            .str_at(0, column)
            .and_then(|raw| NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok())
    };

    Ok(FilterOptions {
        categories,
        regions,
        store_cities,
        products,
        salespersons,
        min_date: parse_bound("min_date"),
        max_date: parse_bound("max_date"),
    })
}
