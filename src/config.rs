//! Layered settings: built-in defaults, then an optional TOML file, then
//! `PETPAL__SECTION__KEY` environment variables.

use crate::functions::password::DEFAULT_HISTORY_SIZE;
use crate::functions::{BookingKind, ReminderSettings};
use config::{Config, ConfigBuilder, Environment, File};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const ENV_PREFIX: &str = "PETPAL";
pub const CONFIG_PATH_ENV: &str = "PETPAL_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "petpal.toml";

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub firebase: FirebaseSettings,
    pub server: ServerSettings,
    pub reminders: RemindersSettings,
    pub password: PasswordSettings,
    pub watch: WatchSettings,
    pub events: EventsSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FirebaseSettings {
    /// Defaults to the project of the service account key.
    pub project_id: Option<String>,
    /// Path to the service account JSON.
    pub credentials: Option<PathBuf>,
    /// `host:port` of a Firestore emulator; skips OAuth when set.
    pub firestore_emulator_host: Option<String>,
}

impl FirebaseSettings {
    pub fn credentials_path(&self) -> Option<PathBuf> {
        self.credentials.clone().or_else(|| {
            std::env::var_os("GOOGLE_APPLICATION_CREDENTIALS").map(PathBuf::from)
        })
    }

    pub fn emulator_host(&self) -> Option<String> {
        self.firestore_emulator_host
            .clone()
            .or_else(|| std::env::var("FIRESTORE_EMULATOR_HOST").ok())
            .filter(|host| !host.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub address: IpAddr,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8080,
        }
    }
}

impl ServerSettings {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemindersSettings {
    pub enabled: bool,
    pub interval_minutes: u64,
    pub window_minutes: i64,
    pub collections: Vec<String>,
}

impl Default for RemindersSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_minutes: 30,
            window_minutes: 60,
            collections: BookingKind::ALL
                .iter()
                .map(|kind| kind.collection().to_string())
                .collect(),
        }
    }
}

impl RemindersSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes.max(1) * 60)
    }

    pub fn reminder_settings(&self) -> ReminderSettings {
        ReminderSettings {
            window: chrono::Duration::minutes(self.window_minutes),
            collections: self.collections.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PasswordSettings {
    pub history_size: usize,
}

impl Default for PasswordSettings {
    fn default() -> Self {
        Self {
            history_size: DEFAULT_HISTORY_SIZE,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatchSettings {
    pub enabled: bool,
    pub reconnect_delay_secs: u64,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            reconnect_delay_secs: 5,
        }
    }
}

impl WatchSettings {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EventsSettings {
    /// Bearer secret the auth event sender must present.
    pub shared_secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// The explicitly requested config file: `path`, else `PETPAL_CONFIG`.
pub fn config_path(path: Option<&Path>) -> Option<PathBuf> {
    path.map(Path::to_path_buf)
        .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from))
}

/// Loads [`Settings`].
///
/// `path` wins over `PETPAL_CONFIG`, which wins over `./petpal.toml`. An explicitly named
/// file must exist; the default one is optional.
pub fn load_settings(path: Option<&Path>) -> Result<Settings, SettingsError> {
    let file = match config_path(path) {
        Some(path) => File::from(path.as_path()).required(true),
        None => File::from(Path::new(DEFAULT_CONFIG_FILE)).required(false),
    };

    build(Config::builder().add_source(file), environment())
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("reminders.collections")
}

fn build(
    builder: ConfigBuilder<config::builder::DefaultState>,
    environment: Environment,
) -> Result<Settings, SettingsError> {
    let settings = builder
        .add_source(environment)
        .build()?
        .try_deserialize::<Settings>()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> Environment {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        environment().source(Some(map))
    }

    #[test]
    fn test_explicit_config_path_wins() {
        assert_eq!(
            config_path(Some(Path::new("/etc/petpal/petpal.toml"))),
            Some(PathBuf::from("/etc/petpal/petpal.toml"))
        );
    }

    #[test]
    fn test_defaults() {
        let settings = build(Config::builder(), env(&[])).unwrap();

        assert_eq!(settings.server.port, 8080);
        assert!(settings.reminders.enabled);
        assert_eq!(settings.reminders.interval(), Duration::from_secs(30 * 60));
        assert_eq!(
            settings.reminders.collections,
            vec!["vetBookings".to_string(), "sitterBookings".to_string()]
        );
        assert_eq!(settings.password.history_size, 3);
        assert_eq!(settings.watch.reconnect_delay(), Duration::from_secs(5));
        assert_eq!(settings.logging.level, "info");
        assert!(settings.events.shared_secret.is_none());
    }

    #[test]
    fn test_file_then_environment() {
        let file = File::from_str(
            r#"
            [firebase]
            project_id = "petpal-dev"

            [server]
            address = "127.0.0.1"
            port = 9000

            [reminders]
            window_minutes = 90
            collections = ["vetBookings"]
            "#,
            FileFormat::Toml,
        );

        let settings = build(
            Config::builder().add_source(file),
            env(&[
                ("PETPAL__SERVER__PORT", "9100"),
                ("PETPAL__EVENTS__SHARED_SECRET", "s3cret"),
                ("PETPAL__LOGGING__JSON", "true"),
            ]),
        )
        .unwrap();

        assert_eq!(settings.firebase.project_id.as_deref(), Some("petpal-dev"));
        assert_eq!(settings.server.socket_addr().to_string(), "127.0.0.1:9100");
        assert_eq!(settings.reminders.collections, vec!["vetBookings".to_string()]);
        assert_eq!(
            settings.reminders.reminder_settings().window,
            chrono::Duration::minutes(90)
        );
        assert_eq!(settings.events.shared_secret.as_deref(), Some("s3cret"));
        assert!(settings.logging.json);
    }
}
