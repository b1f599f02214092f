use crate::config::DashboardConfig;
use crate::dashboard::DashboardService;
use crate::init_tracing;
use crate::models::{
    BooleanResponse, DashboardView, ExportResponse, FilterOptions, FilterSelection, VersionedFilter, WidgetId,
    WidgetView,
};
use crate::secrets::KeyringSecretStore;
use std::sync::Arc;
use tauri::Manager;

#[derive(Clone)]
struct AppState {
    service: Arc<DashboardService>,
    tokens: Arc<KeyringSecretStore>,
}

#[tauri::command]
fn get_filter(state: tauri::State<'_, AppState>) -> Result<VersionedFilter, String> {
    Ok(state.service.current_filter())
}

#[tauri::command]
fn set_filter(state: tauri::State<'_, AppState>, selection: FilterSelection) -> Result<VersionedFilter, String> {
    state.service.set_filter(selection).map_err(to_client_error)
}

#[tauri::command]
async fn load_dashboard(state: tauri::State<'_, AppState>) -> Result<DashboardView, String> {
    Ok(state.service.load_dashboard().await)
}

#[tauri::command]
async fn refresh_widget(state: tauri::State<'_, AppState>, widget_id: WidgetId) -> Result<WidgetView, String> {
    state.service.refresh_widget(widget_id).await.map_err(to_client_error)
}

#[tauri::command]
async fn get_filter_options(state: tauri::State<'_, AppState>) -> Result<FilterOptions, String> {
    state.service.filter_options().await.map_err(to_client_error)
}

#[tauri::command]
async fn export_csv(state: tauri::State<'_, AppState>) -> Result<ExportResponse, String> {
    state.service.export_csv().await.map_err(to_client_error)
}

#[tauri::command]
async fn save_warehouse_token(state: tauri::State<'_, AppState>, token: String) -> Result<BooleanResponse, String> {
    let saved = state.tokens.save_token(&token).map_err(to_client_error)?;
    // The open session was authenticated with the previous token.
    state.service.shutdown().await;
    Ok(saved)
}

#[tauri::command]
async fn clear_warehouse_token(state: tauri::State<'_, AppState>) -> Result<BooleanResponse, String> {
    let cleared = state.tokens.clear_token().map_err(to_client_error)?;
    state.service.shutdown().await;
    Ok(cleared)
}

#[tauri::command]
fn has_warehouse_token(state: tauri::State<'_, AppState>) -> Result<BooleanResponse, String> {
    state.tokens.has_token().map_err(to_client_error)
}

pub fn run() {
    let app = tauri::Builder::default()
        .setup(|app| {
            let app_data_dir = app.path().app_data_dir().map_err(|error| error.to_string())?;
            std::fs::create_dir_all(&app_data_dir).map_err(|error| error.to_string())?;
            let config = DashboardConfig::load(&app_data_dir).map_err(|error| error.to_string())?;
            init_tracing(&config.log_dir(), &config.log_filter).map_err(|error| error.to_string())?;

            let tokens = Arc::new(KeyringSecretStore::new(
                &config.secrets.keyring_service,
                &config.warehouse.account,
                &config.warehouse.user,
            ));
            let service = Arc::new(DashboardService::from_config(config).map_err(|error| error.to_string())?);
            tracing::info!(data_dir = %app_data_dir.display(), "sales dashboard started");

            app.manage(AppState { service, tokens });
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            get_filter,
            set_filter,
            load_dashboard,
            refresh_widget,
            get_filter_options,
            export_csv,
            save_warehouse_token,
            clear_warehouse_token,
            has_warehouse_token
        ])
        .build(tauri::generate_context!())
        .expect("failed to build tauri app");

    app.run(|handle, event| {
        if let tauri::RunEvent::Exit = event {
            if let Some(state) = handle.try_state::<AppState>() {
                let released = tauri::async_runtime::block_on(state.service.shutdown());
                tracing::info!(released, "sales dashboard exiting");
            }
        }
    });
}

fn to_client_error(error: impl std::fmt::Display) -> String {
    error.to_string()
}
