use serde::{Deserialize, Serialize};

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub labels: LabelConfig,
    pub procedures: ProcedureConfig,
    pub auth: AuthConfig,
    pub upload: UploadConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// SQL Server connection settings.
///
/// Named instances (`HOST\INSTANCE`) are reached through their TCP port;
/// set `port` to the instance's port instead of relying on SQL Browser.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub trust_cert: bool,
    pub max_connections: u32,
    /// Use the in-process store instead of SQL Server (local development).
    pub in_memory: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelConfig {
    /// Language used when a request does not ask for one, and the fallback
    /// when the requested language has no label rows.
    pub default_language: String,
}

/// Names of the legacy stored procedures and staging table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcedureConfig {
    pub search: String,
    pub import_direct: String,
    pub import_sage: String,
    pub import_exact: String,
    pub staging_table: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub users: Vec<ApiUser>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ApiUser {
    pub username: String,
    pub token: String,
    #[serde(default)]
    pub superuser: bool,
    /// Django-style codenames, e.g. `comptabilite.add_societe`.
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub max_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1433,
            database: "TEST_TDB".to_string(),
            user: "sa".to_string(),
            password: String::new(),
            trust_cert: true,
            max_connections: 20,
            in_memory: false,
        }
    }
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            default_language: "fr".to_string(),
        }
    }
}

impl Default for ProcedureConfig {
    fn default() -> Self {
        Self {
            search: "PS_S_000423_SelectRechercheEcriture_SRE".to_string(),
            import_direct: "PS_I_000101_InsertionFaitFinancier".to_string(),
            import_sage: "PS_S_000104_InsertionFaitsFinanciers".to_string(),
            import_exact: "PS_S_000105_InsertionFaitsFinanciersExact".to_string(),
            staging_table: "T_W_ImportEcritures_IMP".to_string(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_bytes: 20 * 1024 * 1024,
        }
    }
}

// Credentials stay out of the startup log line.
impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("trust_cert", &self.trust_cert)
            .field("max_connections", &self.max_connections)
            .field("in_memory", &self.in_memory)
            .finish()
    }
}

impl std::fmt::Debug for ApiUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiUser")
            .field("username", &self.username)
            .field("superuser", &self.superuser)
            .field("permissions", &self.permissions)
            .finish()
    }
}

impl AppConfig {
    /// Load configuration: defaults, then `compta.toml` (or `$COMPTA_CONFIG`),
    /// then `COMPTA__SECTION__KEY` environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let file = std::env::var("COMPTA_CONFIG").unwrap_or_else(|_| "compta".to_string());

        config::Config::builder()
            .add_source(config::File::with_name(&file).required(false))
            .add_source(
                config::Environment::with_prefix("COMPTA")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_point_at_legacy_procedures() {
        let config = AppConfig::default();
        assert_eq!(config.labels.default_language, "fr");
        assert_eq!(
            config.procedures.search,
            "PS_S_000423_SelectRechercheEcriture_SRE"
        );
        assert_eq!(
            config.procedures.import_sage,
            "PS_S_000104_InsertionFaitsFinanciers"
        );
        assert!(!config.database.in_memory);
    }

    #[test]
    fn test_debug_hides_secrets() {
        let mut config = AppConfig::default();
        config.database.password = "G4L|pK$9".to_string();
        config.auth.users.push(ApiUser {
            username: "gilles".to_string(),
            token: "very-secret-token".to_string(),
            superuser: false,
            permissions: vec![],
        });

        let printed = format!("{:?}", config);
        assert!(!printed.contains("G4L|pK$9"));
        assert!(!printed.contains("very-secret-token"));
        assert!(printed.contains("gilles"));
    }

    #[test]
    fn test_partial_document_keeps_defaults() {
        let config: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(
                "[server]\nport = 9000\n[labels]\ndefault_language = \"en\"\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.labels.default_language, "en");
        assert_eq!(config.database.max_connections, 20);
    }
}
