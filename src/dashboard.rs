use crate::cache::{CacheKey, CacheStats, ResultCache};
use crate::catalog::{self, QueryName, QueryParams};
use crate::config::DashboardConfig;
use crate::connection::{ConnectionManager, RetryPolicy, SessionHandle};
use crate::errors::{AppError, AppResult};
use crate::filter::FilterState;
use crate::models::{
    AggregateResult, DashboardView, ExportResponse, FilterOptions, FilterSelection, KpiSet, VersionedFilter,
    WidgetId, WidgetState, WidgetView,
};
use crate::presentation;
use crate::secrets::{secret_store_from_config, SecretStore};
use crate::warehouse::{SqliteWarehouse, Warehouse};
use chrono::Utc;
use std::sync::Arc;

/// Everything one dashboard user interacts with: the filter, the cached query
/// results and the warehouse session behind them.
pub struct DashboardService {
    config: DashboardConfig,
    filters: FilterState,
    cache: ResultCache,
    connections: ConnectionManager,
}

impl DashboardService {
    pub fn new(
        config: DashboardConfig,
        warehouse: Arc<dyn Warehouse>,
        secrets: Arc<dyn SecretStore>,
    ) -> AppResult<Self> {
        config.validate()?;
        let initial = FilterSelection {
            date_range: config.default_range.unwrap_or_default(),
            ..FilterSelection::default()
        };
        let filters = FilterState::new(initial)?;
        let connections = ConnectionManager::new(warehouse, secrets, RetryPolicy::from_config(&config.warehouse));
        Ok(Self {
            config,
            filters,
            cache: ResultCache::new(),
            connections,
        })
    }

    /// SQLite warehouse at the configured path, credentials from the configured secret source.
    pub fn from_config(config: DashboardConfig) -> AppResult<Self> {
        let warehouse = Arc::new(SqliteWarehouse::new(&config.warehouse_path()));
        let secrets = secret_store_from_config(&config);
        tracing::info!(
            warehouse = %config.warehouse_path().display(),
            secret_source = ?config.secrets.source,
            "dashboard service configured"
        );
        Self::new(config, warehouse, secrets)
    }

    pub fn config(&self) -> &DashboardConfig {
        &self.config
    }

    pub fn current_filter(&self) -> VersionedFilter {
        self.filters.snapshot()
    }

    /// Applies a new selection. Cached results of older generations are dropped
    /// before this returns.
    pub fn set_filter(&self, selection: FilterSelection) -> AppResult<VersionedFilter> {
        let updated = self.filters.set_filter(selection)?;
        self.cache.advance_to(updated.version);
        Ok(updated)
    }

    pub async fn load_dashboard(&self) -> DashboardView {
        let started = std::time::Instant::now();
        let filter = self.filters.snapshot();
        self.cache.advance_to(filter.version);

        // One connection attempt per load: a refused or unreachable warehouse
        // fails every widget with the same error instead of once per query.
        let widgets = match self.connections.ensure_session().await {
            Ok(_) => {
                let mut widgets = Vec::with_capacity(self.config.widgets.len());
                for id in &self.config.widgets {
                    widgets.push(self.render_widget(*id, &filter).await);
                }
                widgets
            }
            Err(error) => {
                tracing::warn!(
                    version = filter.version,
                    code = error.code(),
                    error = %error,
                    "warehouse session unavailable"
                );
                let state = presentation::error_state(&error);
                self.config
                    .widgets
                    .iter()
                    .map(|id| WidgetView {
                        id: *id,
                        title: id.title().to_string(),
                        generation: filter.version,
                        state: state.clone(),
                    })
                    .collect()
            }
        };

        let failed = widgets.iter().filter(|widget| widget.is_error()).count();
        tracing::info!(
            version = filter.version,
            widgets = widgets.len(),
            failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "dashboard rendered"
        );
        DashboardView {
            filter,
            widgets,
            rendered_at: Utc::now(),
        }
    }

    pub async fn refresh_widget(&self, id: WidgetId) -> AppResult<WidgetView> {
        if !self.config.widgets.contains(&id) {
            return Err(AppError::NotFound(format!("Widget '{}' is not visible", id.as_str())));
        }
        let filter = self.filters.snapshot();
        Ok(self.render_widget(id, &filter).await)
    }

    /// Runs the widget's single query through the cache. Any failure becomes an
    /// inline error state for this widget only.
    pub async fn render_widget(&self, id: WidgetId, filter: &VersionedFilter) -> WidgetView {
        let (query, params) = self.widget_query(id, &filter.selection);
        let state = match self.fetch(query, params, filter.version).await {
            Ok(result) => self.present(id, &result),
            Err(error) => {
                tracing::warn!(
                    widget = id.as_str(),
                    query = query.as_str(),
                    version = filter.version,
                    code = error.code(),
                    error = %error,
                    "widget query failed"
                );
                presentation::error_state(&error)
            }
        };
        WidgetView {
            id,
            title: id.title().to_string(),
            generation: filter.version,
            state,
        }
    }

    pub async fn kpis(&self) -> AppResult<KpiSet> {
        let filter = self.filters.snapshot();
        let (query, params) = self.widget_query(WidgetId::Kpis, &filter.selection);
        let result = self.fetch(query, params, filter.version).await?;
        Ok(KpiSet::from_result(&result))
    }

    pub async fn filter_options(&self) -> AppResult<FilterOptions> {
        self.connections.with_session(catalog::load_filter_options).await
    }

    /// Writes the raw-records table for the current filter as CSV into the exports dir.
    pub async fn export_csv(&self) -> AppResult<ExportResponse> {
        let filter = self.filters.snapshot();
        let (query, params) = self.widget_query(WidgetId::RawData, &filter.selection);
        let result = self.fetch(query, params, filter.version).await?;

        let dir = self.config.exports_path();
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("sales_data_{}.csv", Utc::now().format("%Y%m%d_%H%M%S")));
        std::fs::write(&path, presentation::to_csv(&result))?;

        tracing::info!(path = %path.display(), rows = result.len(), version = filter.version, "sales data exported");
        Ok(ExportResponse {
            path: path.to_string_lossy().to_string(),
            rows: result.len(),
        })
    }

    pub async fn session(&self) -> Option<SessionHandle> {
        self.connections.current_session().await
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Releases the warehouse session and forgets rejected credentials. Safe to
    /// call more than once.
    pub async fn shutdown(&self) -> bool {
        let released = self.connections.release_all().await;
        self.cache.clear();
        released
    }

    fn widget_query(&self, id: WidgetId, selection: &FilterSelection) -> (QueryName, QueryParams) {
        let params = QueryParams::new(selection.clone());
        let top_n = self.config.presentation.top_n;
        match id {
            WidgetId::Kpis => (QueryName::Kpis, params),
            WidgetId::SalesByProduct => (QueryName::SalesByProduct, params.with_limit(top_n)),
            WidgetId::SalesByCategory => (QueryName::SalesByCategory, params),
            WidgetId::SalesTrend => (QueryName::MonthlyTrendByCity, params),
            WidgetId::TopSalespersons => (QueryName::TopSalespersons, params.with_limit(top_n)),
            WidgetId::TopStores => (QueryName::TopStores, params.with_limit(top_n)),
            WidgetId::MonthlyPattern => (QueryName::MonthlyPattern, params),
            WidgetId::QuarterlySales => (QueryName::QuarterlySales, params),
            WidgetId::ProductPareto => (QueryName::ProductPareto, params),
            WidgetId::RawData => (
                QueryName::RawRecords,
                params.with_limit(self.config.presentation.raw_row_limit),
            ),
        }
    }

    async fn fetch(&self, query: QueryName, params: QueryParams, generation: u64) -> AppResult<Arc<AggregateResult>> {
        let connections = &self.connections;
        let key = CacheKey::new(query, params.clone());
        self.cache
            .get_or_compute(key, generation, || async move {
                connections
                    .with_session(move |conn| catalog::run_query(conn, query, &params))
                    .await
            })
            .await
    }

    fn present(&self, id: WidgetId, result: &AggregateResult) -> WidgetState {
        let config = &self.config.presentation;
        match id {
            WidgetId::Kpis => presentation::render_kpis(&KpiSet::from_result(result), config),
            WidgetId::SalesByProduct => presentation::render_ranking(result, "Product", config),
            WidgetId::SalesByCategory => presentation::render_category_donut(result, config),
            WidgetId::SalesTrend => presentation::render_trend(result, config),
            WidgetId::TopSalespersons => presentation::render_ranking(result, "Salesperson", config),
            WidgetId::TopStores => presentation::render_ranking(result, "Store City", config),
            WidgetId::MonthlyPattern => presentation::render_monthly_pattern(result, config),
            WidgetId::QuarterlySales => presentation::render_quarterly(result, config),
            WidgetId::ProductPareto => presentation::render_pareto(result, config),
            WidgetId::RawData => presentation::render_table(result, config),
        }
    }
}
