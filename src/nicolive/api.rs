//! Out-of-band HTTP calls to the broadcast site.
//!
//! Everything the protocol layer needs besides the comment socket goes
//! through [`NicoApi`]: broadcast metadata, post keys, the owner-comment
//! path, login and user info. [`HttpNicoApi`] is the reqwest
//! implementation; tests substitute their own.

use async_trait::async_trait;
use reqwest::redirect::Policy;
use reqwest::{Client, RequestBuilder, Response};

use super::account::Account;
use super::error::NicoError;
use super::live_waku::{self, LiveWaku};
use super::user::User;
use super::xml;
use crate::constants::HTTP_REQUEST_TIMEOUT;

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Default base URL for broadcast APIs.
pub const DEFAULT_LIVE_BASE: &str = "https://live.nicovideo.jp";
/// Default login endpoint.
pub const DEFAULT_LOGIN_URL: &str = "https://secure.nicovideo.jp/secure/login?site=niconico";
/// Default base URL for the user info API.
pub const DEFAULT_USER_API_BASE: &str = "https://api.ce.nicovideo.jp";

/// Broadcast-site operations used by the hub.
#[async_trait]
pub trait NicoApi: Send + Sync {
    /// Resolve broadcast metadata and the comment server (`FetchInformation`).
    async fn fetch_information(
        &self,
        broad_id: &str,
        account: &Account,
    ) -> Result<LiveWaku, NicoError>;

    /// Post key for block `block_no` of `thread`.
    async fn fetch_post_key(
        &self,
        thread: &str,
        block_no: u64,
        account: &Account,
    ) -> Result<String, NicoError>;

    /// Owner-comment token for a broadcast the account owns.
    async fn publish_status(&self, broad_id: &str, account: &Account) -> Result<String, NicoError>;

    /// Post an owner comment.
    async fn comment_owner(
        &self,
        broad_id: &str,
        token: &str,
        text: &str,
        account: &Account,
    ) -> Result<(), NicoError>;

    /// Log in and store the new session in `account`.
    async fn login(&self, account: &mut Account) -> Result<(), NicoError>;

    /// Name and avatar of a registered user.
    async fn fetch_user_info(&self, user_id: &str, account: &Account) -> Result<User, NicoError>;
}

/// Base URLs used by [`HttpNicoApi`].
#[derive(Debug, Clone)]
pub struct ApiEndpoints {
    /// Broadcast APIs (`/api/getplayerstatus`, …).
    pub live_base: String,
    /// Login form target.
    pub login_url: String,
    /// User info API.
    pub user_api_base: String,
}

impl Default for ApiEndpoints {
    fn default() -> Self {
        Self {
            live_base: DEFAULT_LIVE_BASE.to_string(),
            login_url: DEFAULT_LOGIN_URL.to_string(),
            user_api_base: DEFAULT_USER_API_BASE.to_string(),
        }
    }
}

/// reqwest-backed [`NicoApi`].
#[derive(Debug, Clone)]
pub struct HttpNicoApi {
    client: Client,
    endpoints: ApiEndpoints,
}

impl HttpNicoApi {
    /// Client against the production site.
    pub fn new() -> Result<Self, NicoError> {
        Self::with_endpoints(ApiEndpoints::default())
    }

    /// Client against custom base URLs.
    pub fn with_endpoints(endpoints: ApiEndpoints) -> Result<Self, NicoError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(HTTP_REQUEST_TIMEOUT)
            .redirect(Policy::none())
            .build()
            .map_err(|e| NicoError::Network(e.to_string()))?;
        Ok(Self { client, endpoints })
    }

    fn live_url(&self, path: &str) -> String {
        format!("{}{path}", self.endpoints.live_base.trim_end_matches('/'))
    }

    fn with_session(req: RequestBuilder, account: &Account) -> RequestBuilder {
        req.header(reqwest::header::COOKIE, account.cookie_header())
    }

    /// Send and read the body, classifying HTTP failures.
    async fn send_text(req: RequestBuilder) -> Result<String, NicoError> {
        let resp = req.send().await?;
        let resp = check_http_status(resp)?;
        Ok(resp.text().await?)
    }
}

fn check_http_status(resp: Response) -> Result<Response, NicoError> {
    let status = resp.status();
    if status.is_server_error() {
        return Err(NicoError::Network(format!("server returned {status}")));
    }
    if !status.is_success() {
        return Err(NicoError::Other(format!("server returned {status}")));
    }
    Ok(resp)
}

#[async_trait]
impl NicoApi for HttpNicoApi {
    async fn fetch_information(
        &self,
        broad_id: &str,
        account: &Account,
    ) -> Result<LiveWaku, NicoError> {
        let req = self
            .client
            .get(self.live_url("/api/getplayerstatus"))
            .query(&[("v", broad_id)]);
        let body = Self::send_text(Self::with_session(req, account)).await?;
        live_waku::parse_player_status(broad_id, &body)
    }

    async fn fetch_post_key(
        &self,
        thread: &str,
        block_no: u64,
        account: &Account,
    ) -> Result<String, NicoError> {
        let block_no = block_no.to_string();
        let req = self
            .client
            .get(self.live_url("/api/getpostkey"))
            .query(&[("thread", thread), ("block_no", block_no.as_str())]);
        let body = Self::send_text(Self::with_session(req, account)).await?;

        match body.trim().strip_prefix("postkey=") {
            Some(key) if !key.is_empty() => Ok(key.to_string()),
            _ => Err(NicoError::SendComment("no post key returned".to_string())),
        }
    }

    async fn publish_status(&self, broad_id: &str, account: &Account) -> Result<String, NicoError> {
        let req = self
            .client
            .get(self.live_url("/api/getpublishstatus"))
            .query(&[("v", broad_id)]);
        let body = Self::send_text(Self::with_session(req, account)).await?;

        live_waku::check_status(&body, "getpublishstatus")?;
        xml::section(&body, "stream")
            .and_then(|s| xml::child_text(s, "token"))
            .filter(|t| !t.is_empty())
            .ok_or_else(|| NicoError::Protocol("getpublishstatus: missing token".to_string()))
    }

    async fn comment_owner(
        &self,
        broad_id: &str,
        token: &str,
        text: &str,
        account: &Account,
    ) -> Result<(), NicoError> {
        let req = self
            .client
            .put(self.live_url(&format!("/api/broadcast/{broad_id}")))
            .form(&[("body", text), ("token", token)]);

        // Everything on this path is reported as a send failure.
        let body = Self::send_text(Self::with_session(req, account))
            .await
            .map_err(|e| NicoError::SendComment(e.to_string()))?;
        if body.contains("status=error") {
            return Err(NicoError::SendComment(format!(
                "owner comment rejected: {}",
                body.trim()
            )));
        }
        Ok(())
    }

    async fn login(&self, account: &mut Account) -> Result<(), NicoError> {
        let req = self.client.post(&self.endpoints.login_url).form(&[
            ("mail_tel", account.mail.as_str()),
            ("password", account.pass.as_str()),
        ]);
        let resp = req.send().await?;
        if resp.status().is_server_error() {
            return Err(NicoError::Network(format!("server returned {}", resp.status())));
        }

        let session = resp
            .cookies()
            .find(|c| c.name() == "user_session" && c.value() != "deleted")
            .map(|c| c.value().to_string())
            .ok_or_else(|| NicoError::IncorrectAccount("no user_session cookie".to_string()))?;
        account.usersession = session;
        Ok(())
    }

    async fn fetch_user_info(&self, user_id: &str, account: &Account) -> Result<User, NicoError> {
        let url = format!(
            "{}/api/v1/user.info",
            self.endpoints.user_api_base.trim_end_matches('/')
        );
        let req = self.client.get(url).query(&[("user_id", user_id)]);
        let body = Self::send_text(Self::with_session(req, account)).await?;

        live_waku::check_status(&body, "nicovideo_user_response")?;
        let user = xml::section(&body, "user")
            .ok_or_else(|| NicoError::Protocol("user.info: missing user".to_string()))?;
        Ok(User {
            name: xml::child_text(user, "nickname").unwrap_or_default(),
            thumbnail_url: xml::child_text(user, "thumbnail_url").unwrap_or_default(),
            ..User::new(user_id)
        })
    }
}
