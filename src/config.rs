use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::auth::session_store::SessionStore;
use crate::dashboard::DashboardOptions;
use crate::live::ReconnectPolicy;

const APP_DIR: &str = "mail_sorter";
const WS_PATH: &str = "ws/emails/";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Config {
    /// Root of the backend API, e.g. `http://localhost:8000/api/`.
    pub api_base_url: String,
    pub ws_url: Option<String>,
    pub db_path: Option<String>,
    #[serde(default = "default_session_cookie")]
    pub session_cookie_name: String,
    #[serde(default = "default_csrf_cookie")]
    pub csrf_cookie_name: String,
    #[serde(default = "default_toast_ttl")]
    pub toast_ttl_secs: u64,
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
    /// Enables capped exponential backoff when set.
    pub reconnect_max_delay_secs: Option<u64>,
    #[serde(default)]
    pub keep_failed_selection: bool,
    #[serde(default = "default_true")]
    pub desktop_notifications: bool,
}

fn default_session_cookie() -> String {
    "sessionid".to_string()
}

fn default_csrf_cookie() -> String {
    "csrftoken".to_string()
}

fn default_toast_ttl() -> u64 {
    4
}

fn default_reconnect_delay() -> u64 {
    3
}

fn default_true() -> bool {
    true
}

impl Config {
    fn template() -> Self {
        Self {
            api_base_url: "http://localhost:8000/api/".to_string(),
            ws_url: None,
            db_path: None,
            session_cookie_name: default_session_cookie(),
            csrf_cookie_name: default_csrf_cookie(),
            toast_ttl_secs: default_toast_ttl(),
            reconnect_delay_secs: default_reconnect_delay(),
            reconnect_max_delay_secs: None,
            keep_failed_selection: false,
            desktop_notifications: true,
        }
    }

    pub fn api_base(&self) -> Result<Url> {
        let mut url = Url::parse(&self.api_base_url)
            .map_err(|e| anyhow!("api_base_url is not a valid URL: {e}"))?;
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(url)
    }

    /// Explicit `ws_url`, or the API origin with its scheme switched to
    /// ws/wss and the live path appended.
    pub fn ws_url(&self) -> Result<Url> {
        if let Some(raw) = &self.ws_url {
            return Url::parse(raw).map_err(|e| anyhow!("ws_url is not a valid URL: {e}"));
        }
        let api = self.api_base()?;
        let scheme = match api.scheme() {
            "https" => "wss",
            "http" => "ws",
            other => return Err(anyhow!("unsupported api_base_url scheme {other}")),
        };
        let mut origin = api.clone();
        origin.set_path("/");
        origin.set_query(None);
        origin
            .set_scheme(scheme)
            .map_err(|_| anyhow!("cannot derive ws_url from {api}"))?;
        Ok(origin.join(WS_PATH)?)
    }

    /// Host the session cookie is filed under in the keyring.
    pub fn session_key(&self) -> Result<String> {
        let api = self.api_base()?;
        let host = api
            .host_str()
            .ok_or_else(|| anyhow!("api_base_url has no host"))?;
        Ok(match api.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        })
    }

    /// Keyring home of this backend's session and CSRF cookies.
    pub fn session_store(&self) -> Result<SessionStore> {
        Ok(SessionStore::new(
            self.session_key()?,
            &self.session_cookie_name,
            &self.csrf_cookie_name,
        ))
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        let base = Duration::from_secs(self.reconnect_delay_secs);
        match self.reconnect_max_delay_secs {
            Some(max) => ReconnectPolicy::capped_exponential(base, Duration::from_secs(max)),
            None => ReconnectPolicy::fixed(base),
        }
    }

    pub fn dashboard_options(&self) -> DashboardOptions {
        DashboardOptions {
            toast_ttl: Duration::from_secs(self.toast_ttl_secs),
            reconnect: self.reconnect_policy(),
            keep_failed_selection: self.keep_failed_selection,
        }
    }
}

fn config_dir() -> Result<PathBuf> {
    Ok(dirs::config_dir()
        .ok_or_else(|| anyhow!("no config dir available"))?
        .join(APP_DIR))
}

pub fn config_path() -> Result<PathBuf> {
    let mut p = config_dir()?;
    fs::create_dir_all(&p)?;
    p.push("config.toml");
    Ok(p)
}

pub fn default_db_path() -> Result<PathBuf> {
    let mut p = config_dir()?;
    fs::create_dir_all(&p)?;
    p.push("cache.db");
    Ok(p)
}

pub fn load_config() -> Result<Config> {
    load_config_from(&config_path()?)
}

/// Reads `path`; if it does not exist a template is written there and an
/// error asks the user to fill it in.
pub fn load_config_from(path: &Path) -> Result<Config> {
    if !path.exists() {
        let body = toml::to_string_pretty(&Config::template())?;
        fs::write(path, body)?;
        return Err(anyhow!(
            "Created template config at {}; edit it and run again",
            path.display()
        ));
    }
    let s = fs::read_to_string(path)?;
    let cfg: Config = toml::from_str(&s)?;
    cfg.api_base()?;
    Ok(cfg)
}

pub fn resolve_db_path(cfg: &Config) -> Result<PathBuf> {
    if let Some(p) = &cfg.db_path {
        Ok(PathBuf::from(p))
    } else {
        default_db_path()
    }
}
