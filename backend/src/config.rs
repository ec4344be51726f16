use std::env;
use std::path::PathBuf;

pub const MAX_FILE_SIZE_BYTES: usize = 5 * 1024 * 1024;
pub const ALLOWED_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "webp"];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid PORT value: {0}")]
    InvalidPort(String),
}

/// Runtime configuration. Only host, port and debug come from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub debug: bool,
    pub upload_dir: PathBuf,
    pub weights_path: PathBuf,
    pub max_body_bytes: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            debug: false,
            upload_dir: PathBuf::from("static").join("uploads"),
            weights_path: PathBuf::from("model").join("weights.safetensors"),
            max_body_bytes: MAX_FILE_SIZE_BYTES,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = AppConfig::default();

        if let Some(host) = lookup("HOST") {
            cfg.host = host;
        }
        if let Some(port) = lookup("PORT") {
            cfg.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidPort(port.clone()))?;
        }
        cfg.debug = lookup("DEBUG")
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Ok(cfg)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
