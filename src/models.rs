use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ─── Filters ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn full_year(year: i32) -> Self {
        // Jan 1 and Dec 31 exist for every year chrono can represent.
        let start = NaiveDate::from_ymd_opt(year, 1, 1).unwrap_or(NaiveDate::MIN);
        let end = NaiveDate::from_ymd_opt(year, 12, 31).unwrap_or(NaiveDate::MAX);
        Self { start, end }
    }

    pub fn is_valid(&self) -> bool {
        self.start <= self.end
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

impl Default for DateRange {
    fn default() -> Self {
        Self::full_year(Utc::now().year())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterSelection {
    pub date_range: DateRange,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    /// Empty means every store city.
    #[serde(default)]
    pub store_city: Vec<String>,
    #[serde(default)]
    pub product: Vec<String>,
    #[serde(default)]
    pub salesperson: Vec<String>,
}

impl FilterSelection {
    pub fn for_range(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            date_range: DateRange::new(start, end),
            ..Self::default()
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_store_cities<I, S>(mut self, cities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.store_city = cities.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_products<I, S>(mut self, products: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.product = products.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_salespersons<I, S>(mut self, salespersons: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.salesperson = salespersons.into_iter().map(Into::into).collect();
        self
    }

    /// Trims every dimension filter and turns blank values into "no filter".
    /// Multi-select lists are sorted and deduplicated so equal selections compare equal.
    pub fn normalized(self) -> Self {
        Self {
            date_range: self.date_range,
            category: normalize_choice(self.category),
            region: normalize_choice(self.region),
            store_city: normalize_choices(self.store_city),
            product: normalize_choices(self.product),
            salesperson: normalize_choices(self.salesperson),
        }
    }

    /// Row-level predicate equivalent to the catalog's WHERE clause.
    pub fn matches(&self, record: &SalesRecord) -> bool {
        fn accepts(filter: &Option<String>, value: &str) -> bool {
            filter.as_deref().map_or(true, |expected| expected == value)
        }

        fn accepts_any(filter: &[String], value: &str) -> bool {
            filter.is_empty() || filter.iter().any(|expected| expected == value)
        }

        self.date_range.contains(record.date)
            && accepts(&self.category, &record.category)
            && accepts(&self.region, &record.region)
            && accepts_any(&self.store_city, &record.store_city)
            && accepts_any(&self.product, &record.product)
            && accepts_any(&self.salesperson, &record.salesperson)
    }
}

fn normalize_choice(value: Option<String>) -> Option<String> {
    value
        .map(|raw| raw.trim().to_string())
        .filter(|trimmed| !trimmed.is_empty())
}

fn normalize_choices(values: Vec<String>) -> Vec<String> {
    let mut values: Vec<String> = values
        .into_iter()
        .filter_map(|raw| normalize_choice(Some(raw)))
        .collect();
    values.sort();
    values.dedup();
    values
}

/// Filter selection tagged with the filter-state version it was read at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionedFilter {
    pub version: u64,
    pub selection: FilterSelection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterOptions {
    pub categories: Vec<String>,
    pub regions: Vec<String>,
    pub store_cities: Vec<String>,
    pub products: Vec<String>,
    pub salespersons: Vec<String>,
    pub min_date: Option<NaiveDate>,
    pub max_date: Option<NaiveDate>,
}

// ─── Warehouse data ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SalesRecord {
    pub transaction_id: i64,
    pub date: NaiveDate,
    pub product: String,
    pub category: String,
    pub brand: String,
    pub region: String,
    pub store_city: String,
    pub salesperson: String,
    pub customer: String,
    pub quantity: i64,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl SqlValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(value) => Some(*value as f64),
            Self::Real(value) => Some(*value),
            Self::Text(raw) => raw.parse().ok(),
            Self::Null => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            Self::Real(value) => Some(value.round() as i64),
            Self::Text(raw) => raw.parse().ok(),
            Self::Null => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Stable textual form used for cache keys and CSV cells.
    pub fn render(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Integer(value) => value.to_string(),
            Self::Real(value) => value.to_string(),
            Self::Text(value) => value.clone(),
        }
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<NaiveDate> for SqlValue {
    fn from(value: NaiveDate) -> Self {
        Self::Text(value.format("%Y-%m-%d").to_string())
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Tabular result of one catalog query. Zero rows is a valid result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateResult {
    pub query: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
}

impl AggregateResult {
    pub fn empty(query: &str, columns: &[&str]) -> Self {
        Self {
            query: query.to_string(),
            columns: columns.iter().map(ToString::to_string).collect(),
            rows: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|column| column.eq_ignore_ascii_case(name))
    }

    pub fn value(&self, row: usize, column: &str) -> Option<&SqlValue> {
        let index = self.column_index(column)?;
        self.rows.get(row).and_then(|cells| cells.get(index))
    }

    pub fn f64_at(&self, row: usize, column: &str) -> Option<f64> {
        self.value(row, column).and_then(SqlValue::as_f64)
    }

    pub fn i64_at(&self, row: usize, column: &str) -> Option<i64> {
        self.value(row, column).and_then(SqlValue::as_i64)
    }

    pub fn str_at(&self, row: usize, column: &str) -> Option<&str> {
        self.value(row, column).and_then(SqlValue::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KpiSet {
    pub total_revenue: f64,
    pub transaction_count: i64,
    pub average_ticket: f64,
    pub units_sold: i64,
}

impl KpiSet {
    pub fn from_result(result: &AggregateResult) -> Self {
        if result.is_empty() {
            return Self::default();
        }
        let total_revenue = result.f64_at(0, "total_revenue").unwrap_or(0.0);
        let transaction_count = result.i64_at(0, "transaction_count").unwrap_or(0);
        let units_sold = result.i64_at(0, "units_sold").unwrap_or(0);
        let average_ticket = if transaction_count > 0 {
            total_revenue / transaction_count as f64
        } else {
            0.0
        };
        Self {
            total_revenue,
            transaction_count,
            average_ticket,
            units_sold,
        }
    }
}

// ─── Credentials ────────────────────────────────────────────────────────────

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub account: String,
    pub user: String,
    pub token: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("account", &self.account)
            .field("user", &self.user)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

// ─── Widgets ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WidgetId {
    Kpis,
    SalesByProduct,
    SalesByCategory,
    SalesTrend,
    TopSalespersons,
    TopStores,
    MonthlyPattern,
    QuarterlySales,
    ProductPareto,
    RawData,
}

impl WidgetId {
    pub const ALL: [WidgetId; 10] = [
        Self::Kpis,
        Self::SalesByProduct,
        Self::SalesByCategory,
        Self::SalesTrend,
        Self::TopSalespersons,
        Self::TopStores,
        Self::MonthlyPattern,
        Self::QuarterlySales,
        Self::ProductPareto,
        Self::RawData,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Kpis => "kpis",
            Self::SalesByProduct => "sales-by-product",
            Self::SalesByCategory => "sales-by-category",
            Self::SalesTrend => "sales-trend",
            Self::TopSalespersons => "top-salespersons",
            Self::TopStores => "top-stores",
            Self::MonthlyPattern => "monthly-pattern",
            Self::QuarterlySales => "quarterly-sales",
            Self::ProductPareto => "product-pareto",
            Self::RawData => "raw-data",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Self::Kpis => "Key Performance Indicators",
            Self::SalesByProduct => "Total Sales by Product",
            Self::SalesByCategory => "Total Sales by Category",
            Self::SalesTrend => "Sales Trend Over Time",
            Self::TopSalespersons => "Top 10 Salespersons",
            Self::TopStores => "Top 10 Stores",
            Self::MonthlyPattern => "Monthly Sales Pattern",
            Self::QuarterlySales => "Quarterly Sales",
            Self::ProductPareto => "Pareto Analysis - Products (80/20 Rule)",
            Self::RawData => "Sales Data Table",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|id| id.as_str() == raw)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KpiCard {
    pub label: String,
    pub value: f64,
    pub display: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BarDatum {
    pub label: String,
    pub value: f64,
    pub display: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesPoint {
    pub x: String,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineSeries {
    pub name: String,
    pub points: Vec<SeriesPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParetoPoint {
    pub rank: usize,
    pub product: String,
    pub sales: f64,
    pub cumulative_sales: f64,
    pub cumulative_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParetoInsight {
    pub products_in_head: usize,
    pub total_products: usize,
    pub share_of_products: f64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase", tag = "kind")]
pub enum WidgetContent {
    KpiCards {
        cards: Vec<KpiCard>,
    },
    BarChart {
        x_title: String,
        y_title: String,
        horizontal: bool,
        bars: Vec<BarDatum>,
    },
    DonutChart {
        slices: Vec<BarDatum>,
    },
    LineChart {
        x_title: String,
        y_title: String,
        series: Vec<LineSeries>,
    },
    ParetoChart {
        points: Vec<ParetoPoint>,
        reference_percentage: f64,
        insight: ParetoInsight,
    },
    Table {
        columns: Vec<String>,
        rows: Vec<Vec<String>>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase", tag = "status")]
pub enum WidgetState {
    Ready { content: WidgetContent },
    Empty { message: String },
    Error { code: String, message: String, recoverable: bool },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetView {
    pub id: WidgetId,
    pub title: String,
    pub generation: u64,
    pub state: WidgetState,
}

impl WidgetView {
    pub fn is_ready(&self) -> bool {
        matches!(self.state, WidgetState::Ready { .. })
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.state, WidgetState::Empty { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self.state, WidgetState::Error { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardView {
    pub filter: VersionedFilter,
    pub widgets: Vec<WidgetView>,
    pub rendered_at: DateTime<Utc>,
}

impl DashboardView {
    pub fn widget(&self, id: WidgetId) -> Option<&WidgetView> {
        self.widgets.iter().find(|widget| widget.id == id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BooleanResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportResponse {
    pub path: String,
    pub rows: usize,
}

#[cfg(test)]
mod tests {
    use super::{AggregateResult, FilterSelection, KpiSet, SalesRecord, SqlValue, WidgetContent, WidgetId, WidgetState};
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn record(region: &str, day: NaiveDate) -> SalesRecord {
        SalesRecord {
            transaction_id: 1,
            date: day,
            product: "Notebook".to_string(),
            category: "Electronics".to_string(),
            brand: "Acme".to_string(),
            region: region.to_string(),
            store_city: "Recife".to_string(),
            salesperson: "Ana".to_string(),
            customer: "Bruno".to_string(),
            quantity: 1,
            amount: 10.0,
        }
    }

    #[test]
    fn blank_filters_normalize_to_none() {
        let mut selection = FilterSelection::for_range(date(2024, 1, 1), date(2024, 12, 31));
        selection.category = Some("   ".to_string());
        selection.region = Some(" South ".to_string());
        let normalized = selection.normalized();
        assert!(normalized.category.is_none());
        assert_eq!(normalized.region.as_deref(), Some("South"));
    }

    #[test]
    fn predicate_respects_range_and_region() {
        let selection = FilterSelection::for_range(date(2024, 1, 1), date(2024, 6, 30)).with_region("South");
        assert!(selection.matches(&record("South", date(2024, 3, 1))));
        assert!(!selection.matches(&record("North", date(2024, 3, 1))));
        assert!(!selection.matches(&record("South", date(2024, 7, 1))));
    }

    #[test]
    fn multi_select_lists_are_trimmed_sorted_and_deduplicated() {
        let selection = FilterSelection::default()
            .with_store_cities(["Recife ", "", "Manaus", "Recife"])
            .with_salespersons(["  "])
            .normalized();
        assert_eq!(selection.store_city, vec!["Manaus", "Recife"]);
        assert!(selection.salesperson.is_empty());
        assert!(selection.product.is_empty());
    }

    #[test]
    fn predicate_accepts_any_selected_value() {
        let range = FilterSelection::for_range(date(2024, 1, 1), date(2024, 12, 31));
        let day = date(2024, 3, 1);

        let cities = range.clone().with_store_cities(["Manaus", "Recife"]);
        assert!(cities.matches(&record("South", day)));
        let elsewhere = range.clone().with_store_cities(["Manaus", "Curitiba"]);
        assert!(!elsewhere.matches(&record("South", day)));

        let people = range.clone().with_salespersons(["Ana", "Caio"]).with_products(["Notebook"]);
        assert!(people.matches(&record("South", day)));
        let other_product = range.with_products(["Phone"]);
        assert!(!other_product.matches(&record("South", day)));
    }

    #[test]
    fn multi_select_fields_deserialize_as_lists() {
        let selection: FilterSelection = serde_json::from_str(
            r#"{"dateRange":{"start":"2024-01-01","end":"2024-12-31"},"storeCity":["Recife","Manaus"]}"#,
        )
        .expect("deserialize");
        assert_eq!(selection.store_city, vec!["Recife", "Manaus"]);
        assert!(selection.salesperson.is_empty());
    }

    #[test]
    fn widget_payload_fields_are_camel_case() {
        let state = WidgetState::Ready {
            content: WidgetContent::BarChart {
                x_title: "Product".to_string(),
                y_title: "Total Sales".to_string(),
                horizontal: true,
                bars: Vec::new(),
            },
        };
        let json = serde_json::to_value(&state).expect("serialize");
        assert_eq!(json["status"], "ready");
        assert_eq!(json["content"]["kind"], "barChart");
        assert_eq!(json["content"]["xTitle"], "Product");
        assert_eq!(json["content"]["yTitle"], "Total Sales");
        assert!(json["content"].get("x_title").is_none());
    }

    #[test]
    fn kpis_from_empty_result_are_zero() {
        let result = AggregateResult::empty("kpis", &["total_revenue", "transaction_count"]);
        let kpis = KpiSet::from_result(&result);
        assert_eq!(kpis.transaction_count, 0);
        assert_eq!(kpis.average_ticket, 0.0);
    }

    #[test]
    fn kpis_derive_average_ticket() {
        let result = AggregateResult {
            query: "kpis".to_string(),
            columns: vec![
                "total_revenue".to_string(),
                "transaction_count".to_string(),
                "units_sold".to_string(),
            ],
            rows: vec![vec![SqlValue::Real(1000.0), SqlValue::Integer(4), SqlValue::Integer(9)]],
        };
        let kpis = KpiSet::from_result(&result);
        assert_eq!(kpis.average_ticket, 250.0);
        assert_eq!(kpis.units_sold, 9);
    }

    #[test]
    fn widget_ids_parse_back() {
        for id in WidgetId::ALL {
            assert_eq!(WidgetId::parse(id.as_str()), Some(id));
        }
        assert!(WidgetId::parse("unknown").is_none());
    }

    #[test]
    fn untagged_sql_values_serialize_plainly() {
        let json = serde_json::to_string(&vec![SqlValue::Null, SqlValue::Integer(3), SqlValue::from("x")])
            .expect("serialize");
        assert_eq!(json, "[null,3,\"x\"]");
    }
}
