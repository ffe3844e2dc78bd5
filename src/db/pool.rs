use bb8::Pool;
use bb8_tiberius::ConnectionManager;
use std::time::Duration;
use tiberius::{AuthMethod, Config, EncryptionLevel};

use crate::config::DatabaseConfig;
use crate::error::DbError;

pub type SqlPool = Pool<ConnectionManager>;

/// Build the tiberius configuration for the legacy server.
pub fn tiberius_config(settings: &DatabaseConfig) -> Config {
    let mut config = Config::new();
    config.host(&settings.host);
    config.port(settings.port);
    config.database(&settings.database);
    config.application_name("port-adhoc-compta");
    config.authentication(AuthMethod::sql_server(&settings.user, &settings.password));
    // The legacy server does not negotiate TLS (Encrypt=no).
    config.encryption(EncryptionLevel::NotSupported);
    if settings.trust_cert {
        config.trust_cert();
    }
    config
}

/// Create the SQL Server connection pool
pub async fn create_pool(settings: &DatabaseConfig) -> Result<SqlPool, DbError> {
    let manager = ConnectionManager::new(tiberius_config(settings));

    Pool::builder()
        .max_size(settings.max_connections)
        .connection_timeout(Duration::from_secs(10))
        .build(manager)
        .await
        .map_err(|e| DbError::Pool(e.to_string()))
}
