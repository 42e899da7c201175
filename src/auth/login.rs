use log::debug;
use url::Url;

use crate::api::ApiError;

const LOGIN_PATH: &str = "auth/login/google-oauth2/";

/// Google login entry point on the backend. Without a stored refresh token
/// the consent screen is forced so Google issues one.
pub fn login_url(api_base: &Url, has_refresh_token: bool) -> Result<Url, url::ParseError> {
    let mut url = api_base.join(LOGIN_PATH)?;
    if !has_refresh_token {
        url.query_pairs_mut()
            .append_pair("prompt", "consent")
            .append_pair("access_type", "offline");
    }
    Ok(url)
}

/// Login URL from the outcome of the refresh-token check. A failed check
/// (usually no session yet) gets the plain login page.
pub fn login_url_after_check(
    api_base: &Url,
    has_refresh_token: Result<bool, ApiError>,
) -> Result<Url, url::ParseError> {
    let has_refresh_token = has_refresh_token.unwrap_or_else(|e| {
        debug!("refresh-token check failed ({e}); using the plain login page");
        true
    });
    login_url(api_base, has_refresh_token)
}
