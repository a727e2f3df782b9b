//! Typed client for the to-do API
//!
//! Every protected call first asks the session for a token with at least
//! `min_validity_secs` left. If the gateway still answers 401, the session is
//! renewed once and the call retried once; a second rejection ends the
//! session instead of looping.

use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::client::session::{Freshness, TokenSession};
use crate::error::{ForgeError, Result};
use crate::store::{NewTodo, TodoItem};

/// Body of `GET /api/hello`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Greeting {
    pub message: String,
}

/// Body of `GET /api/me`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub claims: Vec<IdentityClaim>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityClaim {
    #[serde(rename = "type")]
    pub claim_type: String,
    pub value: String,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Anonymous,
    Protected,
}

/// API client borrowing the caller's [`TokenSession`].
///
/// # Examples
///
/// ```no_run
/// use forge_gate::{ApiClient, TokenSession};
///
/// # async fn example(session: &TokenSession) -> forge_gate::Result<()> {
/// let api = ApiClient::new(reqwest::Client::new(), "https://localhost:5001", session, 30)?;
/// println!("{}", api.hello().await?.message);
///
/// api.create_todo("Buy milk", false).await?;
/// for todo in api.list_todos().await? {
///     println!("{} {}", todo.id, todo.title);
/// }
/// # Ok(())
/// # }
/// ```
pub struct ApiClient<'s> {
    http: reqwest::Client,
    base: Url,
    session: &'s TokenSession,
    min_validity_secs: u64,
}

impl<'s> ApiClient<'s> {
    /// Creates a client for the gateway at `api_base`.
    ///
    /// # Errors
    ///
    /// Returns [`ForgeError::Config`] when `api_base` is not a URL.
    pub fn new(
        http: reqwest::Client,
        api_base: &str,
        session: &'s TokenSession,
        min_validity_secs: u64,
    ) -> Result<Self> {
        let mut base = Url::parse(api_base)
            .map_err(|e| ForgeError::Config(format!("invalid API base '{api_base}': {e}")))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self {
            http,
            base,
            session,
            min_validity_secs,
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| ForgeError::Config(format!("invalid API path '{path}': {e}")).into())
    }

    /// `GET /api/hello`; works without a session.
    pub async fn hello(&self) -> Result<Greeting> {
        let url = self.url("api/hello")?;
        let resp = self
            .send(|| self.http.get(url.clone()), Access::Anonymous)
            .await?;
        Ok(resp.json().await?)
    }

    /// `GET /api/me`
    pub async fn me(&self) -> Result<Identity> {
        let url = self.url("api/me")?;
        let resp = self
            .send(|| self.http.get(url.clone()), Access::Protected)
            .await?;
        Ok(resp.json().await?)
    }

    /// `GET /api/todos`, newest first.
    pub async fn list_todos(&self) -> Result<Vec<TodoItem>> {
        let url = self.url("api/todos")?;
        let resp = self
            .send(|| self.http.get(url.clone()), Access::Protected)
            .await?;
        Ok(resp.json().await?)
    }

    /// `POST /api/todos`
    pub async fn create_todo(&self, title: &str, is_done: bool) -> Result<TodoItem> {
        let url = self.url("api/todos")?;
        let body = NewTodo {
            title: title.to_string(),
            is_done,
        };
        let resp = self
            .send(|| self.http.post(url.clone()).json(&body), Access::Protected)
            .await?;
        Ok(resp.json().await?)
    }

    async fn send<F>(&self, build: F, access: Access) -> Result<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        if access == Access::Anonymous {
            let resp = transmit(build()).await?;
            return check_status(resp).await;
        }

        if self.session.ensure_fresh(self.min_validity_secs).await? == Freshness::NoLease {
            return Err(ForgeError::NotAuthenticated.into());
        }

        let resp = self.dispatch(build()).await?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return check_status(resp).await;
        }

        tracing::debug!("API rejected the bearer token, renewing once");
        if self.session.force_renew().await? == Freshness::NoLease {
            return Err(ForgeError::NotAuthenticated.into());
        }

        let retry = self.dispatch(build()).await?;
        if retry.status() == StatusCode::UNAUTHORIZED {
            return Err(ForgeError::SessionEnded(
                "the API rejected the renewed token".to_string(),
            )
            .into());
        }
        check_status(retry).await
    }

    async fn dispatch(&self, request: RequestBuilder) -> Result<Response> {
        transmit(self.session.decorate(request).await).await
    }
}

/// Sends `request` as built; anonymous calls never carry the bearer token.
async fn transmit(request: RequestBuilder) -> Result<Response> {
    request
        .send()
        .await
        .map_err(|e| ForgeError::Upstream(format!("API request failed: {e}")).into())
}

async fn check_status(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let detail = resp
        .json::<ErrorBody>()
        .await
        .unwrap_or_default()
        .error
        .unwrap_or_else(|| status.to_string());

    let err = match status {
        StatusCode::BAD_REQUEST => ForgeError::InvalidInput(detail),
        StatusCode::UNAUTHORIZED => ForgeError::Unauthenticated(detail),
        StatusCode::FORBIDDEN => ForgeError::Forbidden(detail),
        _ => ForgeError::Upstream(format!("API returned {status}: {detail}")),
    };
    Err(err.into())
}
