use super::parsing::{
    env_optional, env_or_default, parse_bool, parse_cors_origins, parse_environment, parse_u16,
    parse_u32, parse_u64,
};
use super::secret::load_or_create_secret_key;
use super::types::{
    AdminSettings, ApiSettings, ConfigError, CorsSettings, DatabaseSettings, RateLimitSettings,
    RedisSettings, RuntimeSettings, SecuritySettings, ServerHost, ServerPort, ServerSettings,
    Settings, TelemetrySettings,
};

const SUPPORTED_ALGORITHMS: &[&str] = &["HS256", "HS384", "HS512"];

impl Settings {
    pub(crate) fn load() -> Result<Self, ConfigError> {
        let host = env_or_default("EXAM_HOST", "0.0.0.0");
        let port = env_or_default("EXAM_PORT", "8000");

        let environment =
            parse_environment(env_optional("EXAM_ENV").or_else(|| env_optional("ENVIRONMENT")));
        let strict_config =
            env_optional("EXAM_STRICT_CONFIG").map(|value| parse_bool(&value)).unwrap_or(false)
                || environment.is_production();

        let project_name = env_or_default("PROJECT_NAME", "Exam Service");
        let version = env_or_default("VERSION", env!("CARGO_PKG_VERSION"));
        let api_v1_str = env_or_default("API_V1_STR", "/api/v1");

        let secret_key = match env_optional("SECRET_KEY") {
            Some(value) => value,
            None => load_or_create_secret_key(),
        };

        let access_token_expire_minutes = parse_u64(
            "ACCESS_TOKEN_EXPIRE_MINUTES",
            env_or_default("ACCESS_TOKEN_EXPIRE_MINUTES", "1440"),
        )?;
        let refresh_token_expire_days = parse_u64(
            "REFRESH_TOKEN_EXPIRE_DAYS",
            env_or_default("REFRESH_TOKEN_EXPIRE_DAYS", "7"),
        )?;
        let algorithm = env_or_default("ALGORITHM", "HS256").to_ascii_uppercase();

        let cors_origins = parse_cors_origins(env_optional("BACKEND_CORS_ORIGINS"))?;

        let postgres_server = env_or_default("POSTGRES_SERVER", "localhost");
        let postgres_port = parse_u16("POSTGRES_PORT", env_or_default("POSTGRES_PORT", "5432"))?;
        let postgres_user = env_or_default("POSTGRES_USER", "exam");
        let postgres_password = env_or_default("POSTGRES_PASSWORD", "");
        let postgres_db = env_or_default("POSTGRES_DB", "exam_db");
        let database_url = env_optional("DATABASE_URL");
        let max_connections = parse_u32(
            "DATABASE_MAX_CONNECTIONS",
            env_or_default("DATABASE_MAX_CONNECTIONS", "30"),
        )?;

        let redis_host = env_or_default("REDIS_HOST", "localhost");
        let redis_port = parse_u16("REDIS_PORT", env_or_default("REDIS_PORT", "6379"))?;
        let redis_db = parse_u16("REDIS_DB", env_or_default("REDIS_DB", "0"))?;
        let redis_password = env_or_default("REDIS_PASSWORD", "");

        let login_limit = parse_u64("LOGIN_RATE_LIMIT", env_or_default("LOGIN_RATE_LIMIT", "10"))?;
        let submit_limit =
            parse_u64("SUBMIT_RATE_LIMIT", env_or_default("SUBMIT_RATE_LIMIT", "5"))?;
        let window_seconds = parse_u64(
            "RATE_LIMIT_WINDOW_SECONDS",
            env_or_default("RATE_LIMIT_WINDOW_SECONDS", "60"),
        )?;

        let first_superuser_username = env_or_default("FIRST_SUPERUSER_USERNAME", "admin");
        let first_superuser_email = env_or_default("FIRST_SUPERUSER_EMAIL", "admin@example.com");
        let first_superuser_password = env_or_default("FIRST_SUPERUSER_PASSWORD", "");

        let log_level = env_or_default("EXAM_LOG_LEVEL", "info");
        let json = env_optional("EXAM_LOG_JSON").map(|value| parse_bool(&value)).unwrap_or(false);
        let prometheus_enabled =
            env_optional("PROMETHEUS_ENABLED").map(|value| parse_bool(&value)).unwrap_or(false);

        let settings = Self {
            server: ServerSettings {
                host: ServerHost::parse(host)?,
                port: ServerPort::parse(port)?,
            },
            runtime: RuntimeSettings { environment, strict_config },
            api: ApiSettings { project_name, version, api_v1_str },
            security: SecuritySettings {
                secret_key,
                access_token_expire_minutes,
                refresh_token_expire_days,
                algorithm,
            },
            cors: CorsSettings { origins: cors_origins },
            database: DatabaseSettings {
                postgres_server,
                postgres_port,
                postgres_user,
                postgres_password,
                postgres_db,
                database_url,
                max_connections,
            },
            redis: RedisSettings {
                host: redis_host,
                port: redis_port,
                db: redis_db,
                password: redis_password,
            },
            rate_limit: RateLimitSettings { login_limit, submit_limit, window_seconds },
            admin: AdminSettings {
                first_superuser_username,
                first_superuser_email,
                first_superuser_password,
            },
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled },
        };

        settings.validate()?;
        Ok(settings)
    }

    pub(crate) fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host.0, self.server.port.0)
    }

    pub(crate) fn server_host(&self) -> &str {
        &self.server.host.0
    }

    pub(crate) fn server_port(&self) -> u16 {
        self.server.port.0
    }

    pub(crate) fn api(&self) -> &ApiSettings {
        &self.api
    }

    pub(crate) fn security(&self) -> &SecuritySettings {
        &self.security
    }

    pub(crate) fn cors(&self) -> &CorsSettings {
        &self.cors
    }

    pub(crate) fn database(&self) -> &DatabaseSettings {
        &self.database
    }

    pub(crate) fn redis(&self) -> &RedisSettings {
        &self.redis
    }

    pub(crate) fn rate_limit(&self) -> &RateLimitSettings {
        &self.rate_limit
    }

    pub(crate) fn admin(&self) -> &AdminSettings {
        &self.admin
    }

    pub(crate) fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    pub(crate) fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !SUPPORTED_ALGORITHMS.contains(&self.security.algorithm.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "ALGORITHM",
                value: self.security.algorithm.clone(),
            });
        }

        if self.security.access_token_expire_minutes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "ACCESS_TOKEN_EXPIRE_MINUTES",
                value: "0".to_string(),
            });
        }

        if self.security.refresh_token_expire_days == 0 {
            return Err(ConfigError::InvalidValue {
                field: "REFRESH_TOKEN_EXPIRE_DAYS",
                value: "0".to_string(),
            });
        }

        if self.rate_limit.window_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "RATE_LIMIT_WINDOW_SECONDS",
                value: "0".to_string(),
            });
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::InvalidValue {
                field: "DATABASE_MAX_CONNECTIONS",
                value: "0".to_string(),
            });
        }

        if !(self.runtime.strict_config || self.runtime.environment.is_production()) {
            return Ok(());
        }

        if env_optional("SECRET_KEY").is_none() {
            return Err(ConfigError::MissingSecret("SECRET_KEY"));
        }
        if self.database.database_url.is_none() && self.database.postgres_password.is_empty() {
            return Err(ConfigError::MissingSecret("POSTGRES_PASSWORD"));
        }
        if self.admin.first_superuser_password.is_empty() {
            return Err(ConfigError::MissingSecret("FIRST_SUPERUSER_PASSWORD"));
        }

        Ok(())
    }
}
