use log::{debug, warn};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::cookie::{CookieStore, Jar};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::api::types::{
    BulkRequest, DeleteResponse, DisconnectRequest, ErrorBody, FetchRequest, FetchResponse,
    RecategorizeResponse, RefreshTokenStatus, UnsubscribeResponse,
};
use crate::api::{ApiError, SorterApi};
use crate::auth::cookies::get_cookie;
use crate::auth::guard::{is_success, status_error};
use crate::auth::session_store::SessionCookies;
use crate::domain::account::Account;
use crate::domain::category::{Category, CategoryDraft, CategoryId};
use crate::domain::email::{EmailDetail, EmailId};

const CSRF_HEADER: &str = "X-CSRFToken";

/// `SorterApi` over HTTP. Cookies (session + CSRF) live in a shared jar so
/// they ride along on every request, like a browser session would.
pub struct HttpBackend {
    client: Client,
    base: Url,
    jar: Arc<Jar>,
    csrf_cookie: String,
}

impl HttpBackend {
    pub fn new(base: Url, csrf_cookie: impl Into<String>) -> Result<Self, ApiError> {
        let base = with_trailing_slash(base);
        let jar = Arc::new(Jar::default());
        let client = Client::builder()
            .cookie_provider(jar.clone())
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base,
            jar,
            csrf_cookie: csrf_cookie.into(),
        })
    }

    /// Seeds the session and CSRF cookies under the names the backend uses.
    pub fn with_session(mut self, cookies: &SessionCookies, session_name: &str) -> Self {
        if let Some(value) = &cookies.session {
            self = self.with_cookie(session_name, value);
        }
        if let Some(value) = &cookies.csrf {
            let name = self.csrf_cookie.clone();
            self = self.with_cookie(&name, value);
        }
        self
    }

    /// Seeds the jar with a cookie obtained from a browser login.
    pub fn with_cookie(self, name: &str, value: &str) -> Self {
        self.jar
            .add_cookie_str(&format!("{name}={value}; Path=/"), &self.base);
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Cookie header the live channel should present during its handshake.
    pub fn cookie_header(&self) -> Option<String> {
        self.jar
            .cookies(&self.base)
            .and_then(|h| h.to_str().ok().map(str::to_string))
    }

    fn csrf_token(&self) -> Option<String> {
        let header = self.cookie_header()?;
        get_cookie(&header, &self.csrf_cookie).map(str::to_string)
    }

    fn url(&self, path: &str) -> Result<Url, ApiError> {
        Ok(self.base.join(path)?)
    }

    fn get(&self, path: &str) -> Result<RequestBuilder, ApiError> {
        Ok(self.client.get(self.url(path)?))
    }

    /// Mutating requests echo the CSRF cookie in a header.
    fn mutating(&self, method: reqwest::Method, path: &str) -> Result<RequestBuilder, ApiError> {
        let mut req = self.client.request(method, self.url(path)?);
        match self.csrf_token() {
            Some(token) => req = req.header(CSRF_HEADER, token),
            None => warn!(
                "no {} cookie; {path} goes out without {} and may be refused",
                self.csrf_cookie, CSRF_HEADER
            ),
        }
        Ok(req)
    }

    fn send(&self, req: RequestBuilder) -> Result<Response, ApiError> {
        let res = req
            .send()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        let status = res.status().as_u16();
        debug!("{} -> {status}", res.url());
        if is_success(status) {
            return Ok(res);
        }
        let body = res.text().unwrap_or_default();
        Err(status_error(status, body))
    }

    fn json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, ApiError> {
        let res = self.send(req)?;
        res.json::<T>()
            .map_err(|e| ApiError::Decode(e.to_string()))
    }
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

impl SorterApi for HttpBackend {
    fn list_categories(&self) -> Result<Vec<Category>, ApiError> {
        self.json(self.get("categories/")?)
    }

    fn create_category(&self, draft: &CategoryDraft) -> Result<Category, ApiError> {
        let req = self
            .mutating(reqwest::Method::POST, "categories/")?
            .json(draft);
        self.json(req)
    }

    fn update_category(
        &self,
        id: CategoryId,
        draft: &CategoryDraft,
    ) -> Result<Category, ApiError> {
        let req = self
            .mutating(reqwest::Method::PUT, &format!("categories/{id}/"))?
            .json(draft);
        self.json(req)
    }

    fn delete_category(&self, id: CategoryId) -> Result<(), ApiError> {
        let req = self.mutating(reqwest::Method::DELETE, &format!("categories/{id}/"))?;
        self.send(req)?;
        Ok(())
    }

    fn list_accounts(&self) -> Result<Vec<Account>, ApiError> {
        let value: serde_json::Value = self.json(self.get("auth/accounts/")?)?;
        if !value.is_array() {
            return Ok(Vec::new());
        }
        serde_json::from_value(value).map_err(|e| ApiError::Decode(e.to_string()))
    }

    fn disconnect_account(&self, uid: &str) -> Result<(), ApiError> {
        let req = self
            .mutating(reqwest::Method::POST, "auth/disconnect/")?
            .json(&DisconnectRequest { uid });
        match self.send(req) {
            Ok(_) => Ok(()),
            // the backend explains refusals as {"error": "..."}
            Err(ApiError::Status { status, body }) => {
                let body = serde_json::from_str::<ErrorBody>(&body)
                    .map(|e| e.error)
                    .unwrap_or(body);
                Err(ApiError::Status { status, body })
            }
            Err(e) => Err(e),
        }
    }

    fn has_refresh_token(&self) -> Result<bool, ApiError> {
        let status: RefreshTokenStatus = self.json(self.get("auth/refresh-token/")?)?;
        Ok(status.has_refresh_token)
    }

    fn fetch_emails(&self, limit: u32) -> Result<FetchResponse, ApiError> {
        let req = self
            .mutating(reqwest::Method::POST, "fetch-emails/")?
            .json(&FetchRequest { limit });
        self.json(req)
    }

    fn email_detail(&self, id: &str) -> Result<EmailDetail, ApiError> {
        self.json(self.get(&format!("emails/{id}/"))?)
    }

    fn recategorize(&self, id: &str) -> Result<RecategorizeResponse, ApiError> {
        let req = self.mutating(
            reqwest::Method::POST,
            &format!("emails/{id}/recategorize/"),
        )?;
        self.json(req)
    }

    fn delete_emails(&self, ids: &[EmailId]) -> Result<DeleteResponse, ApiError> {
        let req = self
            .mutating(reqwest::Method::POST, "delete-emails/")?
            .json(&BulkRequest { email_ids: ids });
        self.json(req)
    }

    fn unsubscribe_emails(&self, ids: &[EmailId]) -> Result<UnsubscribeResponse, ApiError> {
        let req = self
            .mutating(reqwest::Method::POST, "unsubscribe-emails/")?
            .json(&BulkRequest { email_ids: ids });
        self.json(req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use tiny_http::{Response as Reply, Server};

    #[test]
    fn base_url_gets_trailing_slash() {
        let b = HttpBackend::new(Url::parse("http://localhost:8000/api").unwrap(), "csrftoken")
            .unwrap();
        assert_eq!(b.base_url().as_str(), "http://localhost:8000/api/");
        assert_eq!(
            b.url("emails/e1/recategorize/").unwrap().as_str(),
            "http://localhost:8000/api/emails/e1/recategorize/"
        );
    }

    #[test]
    fn csrf_token_comes_from_jar() {
        let b = HttpBackend::new(Url::parse("http://localhost:8000/api/").unwrap(), "csrftoken")
            .unwrap()
            .with_cookie("sessionid", "s1");
        b.jar.add_cookie_str("csrftoken=t1; Path=/", b.base_url());

        assert_eq!(b.csrf_token().as_deref(), Some("t1"));
        let header = b.cookie_header().unwrap();
        assert!(header.contains("sessionid=s1"));
    }

    struct Captured {
        method: String,
        path: String,
        headers: Vec<(String, String)>,
    }

    impl Captured {
        fn header(&self, name: &str) -> Option<&str> {
            self.headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str())
        }
    }

    /// Loopback server that answers one request with `reply` and hands the
    /// request back for inspection.
    fn serve_once(reply: &'static str) -> (Url, thread::JoinHandle<Captured>) {
        let server = Server::http("127.0.0.1:0").unwrap();
        let port = server.server_addr().port();
        let handle = thread::spawn(move || {
            let request = server
                .recv_timeout(Duration::from_secs(5))
                .unwrap()
                .expect("no request arrived");
            let captured = Captured {
                method: request.method().to_string(),
                path: request.url().to_string(),
                headers: request
                    .headers()
                    .iter()
                    .map(|h| (h.field.to_string(), h.value.to_string()))
                    .collect(),
            };
            request.respond(Reply::from_string(reply)).unwrap();
            captured
        });
        (Url::parse(&format!("http://127.0.0.1:{port}/api/")).unwrap(), handle)
    }

    #[test]
    fn bulk_delete_sends_csrf_header_from_stored_session() {
        let (base, server) = serve_once(r#"{"successes":["e1"],"failures":[]}"#);
        let cookies = SessionCookies::parse("sessionid=s1; csrftoken=t1", "sessionid", "csrftoken");
        let b = HttpBackend::new(base, "csrftoken")
            .unwrap()
            .with_session(&cookies, "sessionid");

        let resp = b.delete_emails(&["e1".to_string()]).unwrap();
        assert_eq!(resp.successes, vec!["e1"]);

        let req = server.join().unwrap();
        assert_eq!(req.method, "POST");
        assert_eq!(req.path, "/api/delete-emails/");
        assert_eq!(req.header(CSRF_HEADER), Some("t1"));
        let cookie = req.header("Cookie").unwrap();
        assert!(cookie.contains("sessionid=s1"));
        assert!(cookie.contains("csrftoken=t1"));
    }

    #[test]
    fn reads_do_not_carry_csrf_header() {
        let (base, server) = serve_once(r#"{"has_refresh_token":true}"#);
        let b = HttpBackend::new(base, "csrftoken")
            .unwrap()
            .with_cookie("sessionid", "s1")
            .with_cookie("csrftoken", "t1");

        assert!(b.has_refresh_token().unwrap());
        let req = server.join().unwrap();
        assert_eq!(req.method, "GET");
        assert!(req.header(CSRF_HEADER).is_none());
    }
}
