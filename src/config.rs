use std::str::FromStr;
use std::time::Duration;

use dotenvy::dotenv;

use crate::error::AppError;

fn default_max_file_size() -> u64 {
    // 10 GB in bytes
    10 * 1024 * 1024 * 1024
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub ws_url: String,
    pub max_file_size: u64,
    pub reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    pub request_timeout: Option<Duration>,
    pub chart_width: u32,
    pub chart_height: u32,
}

impl Default for Config {
    fn default() -> Self {
        let api_url = "http://localhost:8000".to_string();
        Self {
            ws_url: ws_url_from(&api_url),
            api_url,
            max_file_size: default_max_file_size(),
            reconnect_attempts: 3,
            reconnect_delay: Duration::from_millis(1000),
            request_timeout: None,
            chart_width: 800,
            chart_height: 400,
        }
    }
}

impl Config {
    pub fn new() -> Result<Self, AppError> {
        // Load .env file first
        dotenv().ok();

        let defaults = Config::default();

        let api_url = std::env::var("DATA_PROCESSOR_API_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or(defaults.api_url);
        let ws_url = std::env::var("DATA_PROCESSOR_WS_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|_| ws_url_from(&api_url));

        Ok(Config {
            api_url,
            ws_url,
            max_file_size: parse_var("DATA_PROCESSOR_MAX_FILE_SIZE")?
                .unwrap_or(defaults.max_file_size),
            reconnect_attempts: parse_var("DATA_PROCESSOR_RECONNECT_ATTEMPTS")?
                .unwrap_or(defaults.reconnect_attempts),
            reconnect_delay: parse_var("DATA_PROCESSOR_RECONNECT_DELAY_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.reconnect_delay),
            request_timeout: parse_var("DATA_PROCESSOR_REQUEST_TIMEOUT_SECS")?
                .map(Duration::from_secs),
            chart_width: parse_var("DATA_PROCESSOR_CHART_WIDTH")?.unwrap_or(defaults.chart_width),
            chart_height: parse_var("DATA_PROCESSOR_CHART_HEIGHT")?
                .unwrap_or(defaults.chart_height),
        })
    }

    /// Config pointed at one backend, deriving the progress channel URL from it.
    pub fn with_api_url(api_url: &str) -> Self {
        let api_url = api_url.trim_end_matches('/').to_string();
        Self {
            ws_url: ws_url_from(&api_url),
            api_url,
            ..Config::default()
        }
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_url, path.trim_start_matches('/'))
    }

    pub fn progress_url(&self, session_id: &str) -> String {
        format!("{}/ws/progress/{}", self.ws_url, session_id)
    }
}

pub fn load_config() -> Result<Config, AppError> {
    Config::new()
}

fn ws_url_from(api_url: &str) -> String {
    if let Some(rest) = api_url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = api_url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        api_url.to_string()
    }
}

fn parse_var<T: FromStr>(key: &str) -> Result<Option<T>, AppError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| AppError::Config(format!("{} has an invalid value: {}", key, raw))),
        Err(_) => Ok(None),
    }
}
