//! Connector configuration management

use anyhow::{Context, Result, anyhow};
use common::{LogFormat, Serial};
use device::ProxyOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory name used below the system and user config directories
const CONFIG_DIR: &str = "hsm-connector";
const CONFIG_FILE: &str = "connector.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectorConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub device: DeviceSettings,
    #[serde(default)]
    pub security: SecuritySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Listen address as `host:port`
    #[serde(default = "ServerSettings::default_listen")]
    pub listen: String,
    #[serde(default = "ServerSettings::default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
    /// Send sd-notify lifecycle notifications
    #[serde(default)]
    pub service_mode: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen: Self::default_listen(),
            log_level: Self::default_log_level(),
            log_format: LogFormat::default(),
            service_mode: false,
        }
    }
}

impl ServerSettings {
    fn default_listen() -> String {
        "localhost:12345".to_string()
    }

    fn default_log_level() -> String {
        "info".to_string()
    }

    /// Host and port halves of the listen address
    pub fn address_and_port(&self) -> Option<(&str, &str)> {
        split_listen(&self.listen)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// Serial of the device to use; any device when unset
    #[serde(default)]
    pub serial: Option<String>,
    /// Response read deadline in milliseconds (0 = wait forever)
    #[serde(default)]
    pub read_timeout_ms: u64,
    /// Write+read attempts per request
    #[serde(default = "DeviceSettings::default_retry_attempts")]
    pub retry_attempts: u32,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            serial: None,
            read_timeout_ms: 0,
            retry_attempts: Self::default_retry_attempts(),
        }
    }
}

impl DeviceSettings {
    fn default_retry_attempts() -> u32 {
        device::proxy::DEFAULT_ATTEMPTS
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecuritySettings {
    /// Reject requests whose Host header is not listed
    #[serde(default)]
    pub host_header_allowlist_enabled: bool,
    #[serde(default = "SecuritySettings::default_allowlist")]
    pub host_header_allowlist: Vec<String>,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            host_header_allowlist_enabled: false,
            host_header_allowlist: Self::default_allowlist(),
        }
    }
}

impl SecuritySettings {
    pub fn default_allowlist() -> Vec<String> {
        ["localhost", "localhost.", "127.0.0.1", "[::1]"]
            .iter()
            .map(|h| h.to_string())
            .collect()
    }
}

/// Command line values that take precedence over the file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub listen: Option<String>,
    pub log_level: Option<String>,
    pub debug: bool,
    pub serial: Option<String>,
    pub enable_host_header_allowlist: bool,
    pub host_header_allowlist: Option<Vec<String>>,
    pub service_mode: bool,
}

impl ConnectorConfig {
    /// Load configuration from the specified path
    ///
    /// Values are not validated here; command line overrides are applied
    /// first and [`ConnectorConfig::validate`] runs on the merged result.
    pub fn load(path: &Path) -> Result<Self> {
        let path = expand_path(path);
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: ConnectorConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load `path` if given, else the first existing standard file, else
    /// the built-in defaults
    ///
    /// Returns the configuration with the file it came from.
    pub fn resolve(path: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        let found = match path {
            Some(p) => Some(p.to_path_buf()),
            None => Self::search_paths().into_iter().find(|p| p.exists()),
        };

        match found {
            Some(p) => Ok((Self::load(&p)?, Some(p))),
            None => Ok((Self::default(), None)),
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = self.to_toml()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    /// Get the per-user configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join(CONFIG_DIR).join(CONFIG_FILE)
        } else {
            PathBuf::from(".config").join(CONFIG_DIR).join(CONFIG_FILE)
        }
    }

    /// Standard locations, in lookup order
    pub fn search_paths() -> Vec<PathBuf> {
        vec![
            Self::default_path(),
            PathBuf::from("/etc").join(CONFIG_DIR).join(CONFIG_FILE),
            PathBuf::from("/usr/local/etc")
                .join(CONFIG_DIR)
                .join(CONFIG_FILE),
        ]
    }

    /// Fold command line values into the configuration
    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(listen) = overrides.listen {
            self.server.listen = listen;
        }
        if let Some(level) = overrides.log_level {
            self.server.log_level = level;
        }
        if overrides.debug {
            self.server.log_level = "debug".to_string();
        }
        if let Some(serial) = overrides.serial {
            self.device.serial = Some(serial);
        }
        if overrides.enable_host_header_allowlist {
            self.security.host_header_allowlist_enabled = true;
        }
        if let Some(hosts) = overrides.host_header_allowlist {
            self.security.host_header_allowlist = hosts;
        }
        if overrides.service_mode {
            self.server.service_mode = true;
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.server.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.server.log_level,
                valid_levels.join(", ")
            ));
        }

        match self.server.address_and_port() {
            Some((_, port)) if port.parse::<u16>().is_ok() => {}
            _ => {
                return Err(anyhow!(
                    "Invalid listen address '{}', expected host:port",
                    self.server.listen
                ));
            }
        }

        self.serial()?;

        if self.device.retry_attempts == 0 {
            return Err(anyhow!("retry_attempts must be at least 1"));
        }

        if self.security.host_header_allowlist_enabled
            && self.security.host_header_allowlist.is_empty()
        {
            return Err(anyhow!(
                "Host header allowlist is enabled but contains no hosts"
            ));
        }

        Ok(())
    }

    /// Canonical serial of the device to use
    pub fn serial(&self) -> Result<Serial> {
        match &self.device.serial {
            Some(s) => Serial::canonicalize(s).map_err(|e| anyhow!(e)),
            None => Ok(Serial::any()),
        }
    }

    pub fn proxy_options(&self) -> ProxyOptions {
        let read_timeout = match self.device.read_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };
        ProxyOptions {
            attempts: self.device.retry_attempts,
            read_timeout,
        }
    }

    /// Hosts accepted in the Host header, `None` when not enforced
    pub fn host_allowlist(&self) -> Option<Vec<String>> {
        self.security
            .host_header_allowlist_enabled
            .then(|| self.security.host_header_allowlist.clone())
    }
}

/// Split `host:port`, keeping brackets of IPv6 literals on the host
pub fn split_listen(listen: &str) -> Option<(&str, &str)> {
    let (host, port) = listen.rsplit_once(':')?;
    if host.contains(':') && !(host.starts_with('[') && host.ends_with(']')) {
        return None;
    }
    Some((host, port))
}

fn expand_path(path: &Path) -> PathBuf {
    match path.to_str() {
        Some(s) => PathBuf::from(shellexpand::tilde(s).as_ref()),
        None => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ConnectorConfig::default();
        assert_eq!(config.server.listen, "localhost:12345");
        assert_eq!(config.server.log_level, "info");
        assert_eq!(config.server.log_format, LogFormat::Text);
        assert_eq!(config.device.retry_attempts, 2);
        assert!(!config.security.host_header_allowlist_enabled);
        assert_eq!(config.security.host_header_allowlist.len(), 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = ConnectorConfig::default();
        let toml_str = config.to_toml().unwrap();
        let parsed: ConnectorConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.server.listen, parsed.server.listen);
        assert_eq!(
            config.security.host_header_allowlist,
            parsed.security.host_header_allowlist
        );
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = ConnectorConfig::default();
        config.server.log_level = "invalid".to_string();
        assert!(config.validate().is_err());

        config.server.log_level = "debug".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_listen() {
        let mut config = ConnectorConfig::default();
        for bad in ["localhost", "localhost:http", "::1:80", "host:70000"] {
            config.server.listen = bad.to_string();
            assert!(config.validate().is_err(), "{}", bad);
        }
        for good in ["127.0.0.1:12345", "[::1]:12345", "0.0.0.0:0"] {
            config.server.listen = good.to_string();
            assert!(config.validate().is_ok(), "{}", good);
        }
    }

    #[test]
    fn test_validate_serial() {
        let mut config = ConnectorConfig::default();
        config.device.serial = Some("123".to_string());
        assert_eq!(config.serial().unwrap().as_str(), "0000000123");

        config.device.serial = Some("12345678901".to_string());
        assert!(config.validate().is_err());

        config.device.serial = Some("12a".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_retry_and_allowlist() {
        let mut config = ConnectorConfig::default();
        config.device.retry_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = ConnectorConfig::default();
        config.security.host_header_allowlist_enabled = true;
        config.security.host_header_allowlist.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_split_listen() {
        assert_eq!(split_listen("localhost:12345"), Some(("localhost", "12345")));
        assert_eq!(split_listen("[::1]:80"), Some(("[::1]", "80")));
        assert_eq!(split_listen("localhost"), None);
        assert_eq!(split_listen("::1:80"), None);
    }

    #[test]
    fn test_proxy_options() {
        let mut config = ConnectorConfig::default();
        assert_eq!(config.proxy_options().read_timeout, None);

        config.device.read_timeout_ms = 250;
        config.device.retry_attempts = 3;
        let options = config.proxy_options();
        assert_eq!(options.read_timeout, Some(Duration::from_millis(250)));
        assert_eq!(options.attempts, 3);
    }

    #[test]
    fn test_apply_overrides() {
        let mut config = ConnectorConfig::default();
        config.apply(Overrides {
            listen: Some("127.0.0.1:9999".to_string()),
            log_level: Some("warn".to_string()),
            debug: true,
            serial: Some("42".to_string()),
            enable_host_header_allowlist: true,
            host_header_allowlist: Some(vec!["hsm.local".to_string()]),
            service_mode: true,
        });

        assert_eq!(config.server.listen, "127.0.0.1:9999");
        // --debug wins over an explicit level
        assert_eq!(config.server.log_level, "debug");
        assert_eq!(config.device.serial.as_deref(), Some("42"));
        assert_eq!(
            config.host_allowlist(),
            Some(vec!["hsm.local".to_string()])
        );
        assert!(config.server.service_mode);
    }

    #[test]
    fn test_empty_overrides_keep_file_values() {
        let mut config = ConnectorConfig::default();
        config.security.host_header_allowlist_enabled = true;
        config.apply(Overrides::default());
        assert!(config.host_allowlist().is_some());
        assert_eq!(config.server.log_level, "info");
    }
}
