//! Config loading, cert generation, and port selection.

use std::path::{Path, PathBuf};

use podium_certgen::GeneratedCert;
use tracing::info;

use crate::config::Config;
use crate::error::ServerError;
use crate::net::{find_free_port, validate_port};

const CERT_FILE: &str = "podium.crt";
const KEY_FILE: &str = "podium.key";

/// Load configuration from the given path, or the default location.
///
/// A missing file yields defaults. The result is validated.
pub fn load_config(path: Option<&Path>) -> Result<Config, ServerError> {
    let config_path = match path {
        Some(p) => p.to_path_buf(),
        None => default_config_path(),
    };

    let config = if config_path.exists() {
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ServerError::Config(format!("failed to read config: {e}")))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| ServerError::Config(format!("failed to parse config: {e}")))?;
        info!(path = %config_path.display(), "loaded config");
        config
    } else {
        info!("no config file found, using defaults");
        Config::default()
    };

    config.validate()?;
    Ok(config)
}

/// Load TLS cert and key from `config_dir`, or generate them if missing.
///
/// Returns `(cert_pem, key_pem)`.
pub fn load_or_generate_certs(
    config_dir: &Path,
    name: &str,
) -> Result<(String, String), ServerError> {
    let cert_path = config_dir.join(CERT_FILE);
    let key_path = config_dir.join(KEY_FILE);

    if cert_path.exists() && key_path.exists() {
        let cert_pem = std::fs::read_to_string(&cert_path)
            .map_err(|e| ServerError::Config(format!("failed to read cert: {e}")))?;
        let key_pem = std::fs::read_to_string(&key_path)
            .map_err(|e| ServerError::Config(format!("failed to read key: {e}")))?;
        info!(path = %cert_path.display(), "loaded existing TLS cert");
        return Ok((cert_pem, key_pem));
    }

    std::fs::create_dir_all(config_dir)
        .map_err(|e| ServerError::Config(format!("failed to create config dir: {e}")))?;

    let GeneratedCert {
        cert_pem,
        key_pem,
        fingerprint,
    } = podium_certgen::generate_certificate(name)
        .map_err(|e| ServerError::Config(format!("failed to generate cert: {e}")))?;

    std::fs::write(&cert_path, &cert_pem)
        .map_err(|e| ServerError::Config(format!("failed to write cert: {e}")))?;
    std::fs::write(&key_path, &key_pem)
        .map_err(|e| ServerError::Config(format!("failed to write key: {e}")))?;

    info!(%fingerprint, "generated new TLS cert");
    Ok((cert_pem, key_pem))
}

/// The port to listen on: `override_port`, else the configured port. Zero
/// picks the first port in the configured range that is free on the
/// configured bind address.
pub fn select_port(config: &Config, override_port: Option<u32>) -> Result<u16, ServerError> {
    match override_port.unwrap_or(config.server.port) {
        0 => {
            let (start, end) = config.port_range();
            find_free_port(config.server.bind_ip()?, start, end)
        }
        port => validate_port(port),
    }
}

/// Get the default config directory path.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("~/.config"))
        .join("podium")
}

/// Get the default config file path.
pub fn default_config_path() -> PathBuf {
    config_dir().join("config.toml")
}
