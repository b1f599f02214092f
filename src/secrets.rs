use crate::config::{DashboardConfig, SecretSource};
use crate::errors::{AppError, AppResult};
use crate::models::{BooleanResponse, Credentials};
use std::sync::{Arc, Mutex};

const ACCOUNT_VAR: &str = "SALES_DASHBOARD_ACCOUNT";
const USER_VAR: &str = "SALES_DASHBOARD_USER";
const TOKEN_VAR: &str = "SALES_DASHBOARD_TOKEN";

/// Read-only source of warehouse credentials, consulted when a session opens.
pub trait SecretStore: Send + Sync {
    fn credentials(&self) -> AppResult<Credentials>;
}

pub fn secret_store_from_config(config: &DashboardConfig) -> Arc<dyn SecretStore> {
    match config.secrets.source {
        SecretSource::Keyring => Arc::new(KeyringSecretStore::new(
            &config.secrets.keyring_service,
            &config.warehouse.account,
            &config.warehouse.user,
        )),
        SecretSource::Env => Arc::new(EnvSecretStore::new(
            &config.warehouse.account,
            &config.warehouse.user,
        )),
    }
}

/// Token lives in the OS keyring under (service, user); account and user come from config.
pub struct KeyringSecretStore {
    service: String,
    account: String,
    user: String,
    lock: Mutex<()>,
}

impl KeyringSecretStore {
    pub fn new(service: &str, account: &str, user: &str) -> Self {
        Self {
            service: service.to_string(),
            account: account.to_string(),
            user: user.to_string(),
            lock: Mutex::new(()),
        }
    }

    fn entry(&self) -> AppResult<keyring::Entry> {
        keyring::Entry::new(&self.service, &self.user).map_err(AppError::from)
    }

    fn guard(&self) -> AppResult<std::sync::MutexGuard<'_, ()>> {
        self.lock
            .lock()
            .map_err(|_| AppError::Internal("keyring mutex poisoned".to_string()))
    }

    pub fn save_token(&self, token: &str) -> AppResult<BooleanResponse> {
        if token.trim().is_empty() {
            return Err(AppError::SecretStore("Token cannot be empty".to_string()));
        }
        let _guard = self.guard()?;
        self.entry()?.set_password(token)?;
        tracing::info!(service = %self.service, user = %self.user, "stored warehouse token");
        Ok(BooleanResponse { success: true })
    }

    pub fn clear_token(&self) -> AppResult<BooleanResponse> {
        let _guard = self.guard()?;
        match self.entry()?.delete_credential() {
            Ok(_) => Ok(BooleanResponse { success: true }),
            Err(keyring::Error::NoEntry) => Ok(BooleanResponse { success: true }),
            Err(error) => Err(AppError::from(error)),
        }
    }

    pub fn has_token(&self) -> AppResult<BooleanResponse> {
        let _guard = self.guard()?;
        match self.entry()?.get_password() {
            Ok(value) => Ok(BooleanResponse {
                success: !value.is_empty(),
            }),
            Err(keyring::Error::NoEntry) => Ok(BooleanResponse { success: false }),
            Err(error) => Err(AppError::from(error)),
        }
    }
}

impl SecretStore for KeyringSecretStore {
    fn credentials(&self) -> AppResult<Credentials> {
        let _guard = self.guard()?;
        let token = match self.entry()?.get_password() {
            Ok(token) => token,
            Err(keyring::Error::NoEntry) => {
                return Err(AppError::Authentication(format!(
                    "No warehouse token stored for user '{}'",
                    self.user
                )))
            }
            Err(error) => return Err(AppError::from(error)),
        };
        Ok(Credentials {
            account: self.account.clone(),
            user: self.user.clone(),
            token,
        })
    }
}

/// Reads `SALES_DASHBOARD_TOKEN` (and optionally account/user) from the process environment.
pub struct EnvSecretStore {
    default_account: String,
    default_user: String,
}

impl EnvSecretStore {
    pub fn new(default_account: &str, default_user: &str) -> Self {
        Self {
            default_account: default_account.to_string(),
            default_user: default_user.to_string(),
        }
    }

    fn resolve<F>(&self, lookup: F) -> AppResult<Credentials>
    where
        F: Fn(&str) -> Option<String>,
    {
        let token = lookup(TOKEN_VAR)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| AppError::Authentication(format!("{} is not set", TOKEN_VAR)))?;
        Ok(Credentials {
            account: lookup(ACCOUNT_VAR).unwrap_or_else(|| self.default_account.clone()),
            user: lookup(USER_VAR).unwrap_or_else(|| self.default_user.clone()),
            token,
        })
    }
}

impl SecretStore for EnvSecretStore {
    fn credentials(&self) -> AppResult<Credentials> {
        self.resolve(|key| std::env::var(key).ok())
    }
}

/// Fixed credentials, for embedding and tests.
pub struct StaticSecretStore {
    credentials: Credentials,
}

impl StaticSecretStore {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }
}

impl SecretStore for StaticSecretStore {
    fn credentials(&self) -> AppResult<Credentials> {
        Ok(self.credentials.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::{EnvSecretStore, SecretStore, StaticSecretStore};
    use crate::errors::AppError;
    use crate::models::Credentials;
    use std::collections::HashMap;

    #[test]
    fn env_store_requires_token() {
        let store = EnvSecretStore::new("local", "analyst");
        let result = store.resolve(|_| None);
        assert!(matches!(result, Err(AppError::Authentication(_))));
    }

    #[test]
    fn env_store_falls_back_to_config_identity() {
        let env: HashMap<&str, &str> = HashMap::from([("SALES_DASHBOARD_TOKEN", "s3cret")]);
        let store = EnvSecretStore::new("local", "analyst");
        let credentials = store
            .resolve(|key| env.get(key).map(ToString::to_string))
            .expect("credentials");
        assert_eq!(credentials.account, "local");
        assert_eq!(credentials.user, "analyst");
        assert_eq!(credentials.token, "s3cret");
    }

    #[test]
    fn debug_output_hides_token() {
        let store = StaticSecretStore::new(Credentials {
            account: "acme".to_string(),
            user: "bi".to_string(),
            token: "super-secret-token".to_string(),
        });
        let rendered = format!("{:?}", store.credentials().expect("credentials"));
        assert!(!rendered.contains("super-secret-token"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
