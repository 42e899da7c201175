use anyhow::{Result, anyhow};
use keyring::{Entry, Error as KeyringError};

use crate::auth::cookies::get_cookie;

const SERVICE: &str = "mail_sorter";

/// The browser cookies a backend session is made of. The CSRF value is what
/// mutating requests echo back in `X-CSRFToken`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionCookies {
    pub session: Option<String>,
    pub csrf: Option<String>,
}

impl SessionCookies {
    /// Reads either a pasted `Cookie:` header (both cookies picked out by
    /// name) or a bare session value.
    pub fn parse(input: &str, session_name: &str, csrf_name: &str) -> Self {
        let input = input.trim();
        let input = input
            .strip_prefix("Cookie:")
            .or_else(|| input.strip_prefix("cookie:"))
            .map_or(input, str::trim);
        if !input.contains('=') {
            return Self {
                session: (!input.is_empty()).then(|| input.to_string()),
                csrf: None,
            };
        }
        Self {
            session: get_cookie(input, session_name).map(str::to_string),
            csrf: get_cookie(input, csrf_name).map(str::to_string),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.session.is_none() && self.csrf.is_none()
    }
}

/// Session cookies in the OS keyring, one entry per cookie under the API
/// host (`localhost:8000/sessionid`).
pub struct SessionStore {
    host: String,
    session_name: String,
    csrf_name: String,
}

impl SessionStore {
    pub fn new(
        host: impl Into<String>,
        session_name: impl Into<String>,
        csrf_name: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            session_name: session_name.into(),
            csrf_name: csrf_name.into(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn entry_key(&self, cookie: &str) -> String {
        format!("{}/{cookie}", self.host)
    }

    fn entry(&self, cookie: &str) -> Result<Entry> {
        Entry::new(SERVICE, &self.entry_key(cookie)).map_err(|e| anyhow!(e.to_string()))
    }

    /// Stores every cookie present; absent ones keep their old value.
    pub fn save(&self, cookies: &SessionCookies) -> Result<()> {
        for (name, value) in self.pairs(cookies) {
            if let Some(value) = value {
                self.entry(name)?
                    .set_password(value)
                    .map_err(|e| anyhow!(e.to_string()))?;
            }
        }
        Ok(())
    }

    pub fn load(&self) -> Result<SessionCookies> {
        Ok(SessionCookies {
            session: self.load_one(&self.session_name)?,
            csrf: self.load_one(&self.csrf_name)?,
        })
    }

    /// Forget the stored session (after logout or an expired session)
    pub fn clear(&self) -> Result<()> {
        for name in [&self.session_name, &self.csrf_name] {
            match self.entry(name)?.delete_credential() {
                Ok(()) | Err(KeyringError::NoEntry) => {}
                Err(e) => return Err(anyhow!(e.to_string())),
            }
        }
        Ok(())
    }

    fn load_one(&self, name: &str) -> Result<Option<String>> {
        match self.entry(name)?.get_password() {
            Ok(v) => Ok(Some(v)),
            Err(KeyringError::NoEntry) => Ok(None),
            Err(e) => Err(anyhow!(e.to_string())),
        }
    }

    fn pairs<'a>(&'a self, cookies: &'a SessionCookies) -> [(&'a str, Option<&'a str>); 2] {
        [
            (self.session_name.as_str(), cookies.session.as_deref()),
            (self.csrf_name.as_str(), cookies.csrf.as_deref()),
        ]
    }
}
