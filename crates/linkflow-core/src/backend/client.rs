use reqwest::header::{HeaderMap, HeaderValue, COOKIE};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::config::{FlowConfig, TokenEndpoint};
use crate::model::{InstitutionId, InstitutionStatus, ItemId, SessionToken};

const USER_AGENT: &str = "linkflow/0.1.0";

/// Errors returned by the backend client.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP status {status} body: {body}")]
    HttpStatus { status: StatusCode, body: String },
    #[error("base URL cannot carry path segments: {0}")]
    InvalidBaseUrl(Url),
    #[error("session cookie is not a valid header value")]
    InvalidCookie,
    #[error("failed to deserialize response: {0}")]
    Deserialize(#[from] serde_json::Error),
    #[error("response is missing field '{0}'")]
    MissingField(&'static str),
    #[error("backend reported {}: {}", .0.error_code.as_deref().unwrap_or("error"), .0.summary())]
    Api(ApiErrorBody),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// HTTP client for the account-linking backend.
///
/// Every call is a single request with no retry. The optional session cookie
/// is sent on every request because the backend scopes institution lookups
/// and balances to the signed-in user.
#[derive(Debug, Clone)]
pub struct BackendClient {
    http: Client,
    base_url: Url,
}

impl BackendClient {
    pub fn new(config: &FlowConfig) -> BackendResult<Self> {
        Self::with_base_url(config.base_url.clone(), config.session_cookie.as_deref())
    }

    /// Build a client against an explicit base URL (useful for testing).
    pub fn with_base_url(base_url: Url, session_cookie: Option<&str>) -> BackendResult<Self> {
        if base_url.cannot_be_a_base() {
            return Err(BackendError::InvalidBaseUrl(base_url));
        }
        let mut headers = HeaderMap::new();
        if let Some(cookie) = session_cookie {
            let mut value =
                HeaderValue::from_str(cookie).map_err(|_| BackendError::InvalidCookie)?;
            value.set_sensitive(true);
            headers.insert(COOKIE, value);
        }
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()?;
        Ok(Self { http, base_url })
    }

    /// Request a fresh session token for initializing the linking SDK.
    pub async fn link_token(&self, endpoint: TokenEndpoint) -> BackendResult<SessionToken> {
        #[derive(Deserialize)]
        struct LinkTokenEnvelope {
            link_token: Option<String>,
        }

        let segment = endpoint.path().trim_start_matches('/');
        let envelope: LinkTokenEnvelope = self.get_json(&[segment]).await?;
        envelope
            .link_token
            .map(SessionToken::from)
            .ok_or(BackendError::MissingField("link_token"))
    }

    /// Probe the item search route. The body is not interpreted.
    pub async fn search_items(&self) -> BackendResult<StatusCode> {
        let url = self.endpoint(&["item", "search"])?;
        let response = self.http.get(url).send().await?;
        Ok(response.status())
    }

    /// Ask whether the signed-in user already linked `institution_id`.
    pub async fn institution_status(
        &self,
        institution_id: &InstitutionId,
    ) -> BackendResult<InstitutionStatus> {
        let body: serde_json::Value = self
            .get_json(&["cash", "user", "institution", institution_id.as_str()])
            .await?;
        Ok(InstitutionStatus::from_response(&body))
    }

    /// Hand the SDK's public token to the backend for exchange.
    ///
    /// Neither the status nor the body of the response is inspected; only
    /// transport failures are reported.
    pub async fn exchange_public_token(&self, public_token: &str) -> BackendResult<()> {
        #[derive(Serialize)]
        struct ExchangeRequest<'a> {
            public_token: &'a str,
        }

        let url = self.endpoint(&["cash", "set_access_token"])?;
        let response = self
            .http
            .post(url)
            .json(&ExchangeRequest { public_token })
            .send()
            .await?;
        tracing::debug!(status = %response.status(), "token exchange completed");
        Ok(())
    }

    /// Fetch balances for the most recently exchanged item.
    pub async fn balance(&self) -> BackendResult<BalanceReport> {
        let envelope: BalanceEnvelope = self.get_json(&["cash", "balance", "get"]).await?;
        envelope.into_report()
    }

    /// Refresh stored balances for one item.
    pub async fn refresh_balance(&self, item_id: &ItemId) -> BackendResult<BalanceReport> {
        let envelope: BalanceEnvelope = self
            .get_json(&["cash", "balance", item_id.as_str(), "update"])
            .await?;
        envelope.into_report()
    }

    /// Pull new transactions for one item.
    pub async fn sync_transactions(&self, item_id: &ItemId) -> BackendResult<TransactionSync> {
        let body: serde_json::Value = self
            .get_json(&["cash", "item", item_id.as_str(), "transactions"])
            .await?;
        if let Some(error) = ApiErrorBody::extract(&body) {
            return Err(BackendError::Api(error));
        }
        let sync: TransactionSync = serde_json::from_value(body)?;
        Ok(sync)
    }

    /// Unlink an item together with its accounts and transactions.
    pub async fn remove_item(&self, item_id: &ItemId) -> BackendResult<RemovedItem> {
        let body: serde_json::Value = self
            .get_json(&["cash", "item", item_id.as_str(), "delete"])
            .await?;
        if let Some(error) = ApiErrorBody::extract(&body) {
            return Err(BackendError::Api(error));
        }
        Ok(serde_json::from_value(body)?)
    }

    /// Look up display details for an institution.
    pub async fn institution(&self, institution_id: &InstitutionId) -> BackendResult<Institution> {
        #[derive(Deserialize)]
        struct InstitutionEnvelope {
            institution: Option<Institution>,
            error: Option<ApiErrorBody>,
        }

        let envelope: InstitutionEnvelope = self
            .get_json(&["cash", "institution", institution_id.as_str()])
            .await?;
        if let Some(error) = envelope.error {
            return Err(BackendError::Api(error));
        }
        envelope
            .institution
            .ok_or(BackendError::MissingField("institution"))
    }

    fn endpoint(&self, segments: &[&str]) -> BackendResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| BackendError::InvalidBaseUrl(self.base_url.clone()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<R>(&self, segments: &[&str]) -> BackendResult<R>
    where
        R: DeserializeOwned,
    {
        let url = self.endpoint(segments)?;
        tracing::debug!(%url, "GET");
        let response = self.http.get(url).send().await?;
        Self::decode(response).await
    }

    async fn decode<R>(response: Response) -> BackendResult<R>
    where
        R: DeserializeOwned,
    {
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(BackendError::HttpStatus { status, body: text });
        }

        let payload = response.json::<R>().await?;
        Ok(payload)
    }
}

/// Error payload the backend returns in place of a result.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub display_message: Option<String>,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl ApiErrorBody {
    fn extract(body: &serde_json::Value) -> Option<Self> {
        body.get("error")
            .filter(|value| value.is_object())
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub fn summary(&self) -> &str {
        self.display_message
            .as_deref()
            .or(self.error_message.as_deref())
            .unwrap_or("no message")
    }
}

#[derive(Debug, Deserialize)]
struct BalanceEnvelope {
    item: Option<ItemRef>,
    #[serde(default)]
    accounts: Vec<AccountBalance>,
    error: Option<ApiErrorBody>,
}

impl BalanceEnvelope {
    fn into_report(self) -> BackendResult<BalanceReport> {
        if let Some(error) = self.error {
            return Err(BackendError::Api(error));
        }
        let item = self.item.ok_or(BackendError::MissingField("item.item_id"))?;
        Ok(BalanceReport {
            item,
            accounts: self.accounts,
        })
    }
}

/// Item descriptor embedded in balance responses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItemRef {
    pub item_id: ItemId,
    #[serde(default)]
    pub institution_id: Option<InstitutionId>,
}

/// Balances for every account under one item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceReport {
    pub item: ItemRef,
    pub accounts: Vec<AccountBalance>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountBalance {
    pub account_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub balances: Balances,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Balances {
    #[serde(default)]
    pub current: Option<f64>,
    #[serde(default)]
    pub available: Option<f64>,
    #[serde(default)]
    pub iso_currency_code: Option<String>,
}

/// Transactions added by one sync run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionSync {
    #[serde(default)]
    pub added: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemovedItem {
    #[serde(default)]
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Institution {
    pub institution_id: InstitutionId,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn client(server: &MockServer) -> BackendClient {
        BackendClient::with_base_url(Url::parse(&server.base_url()).unwrap(), None).unwrap()
    }

    #[tokio::test]
    async fn link_token_reads_field() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/b_testing");
            then.status(200)
                .json_body(json!({ "link_token": "link-sandbox-123", "expiration": "soon" }));
        });

        let token = client(&server)
            .link_token(TokenEndpoint::Testing)
            .await
            .unwrap();
        mock.assert();
        assert_eq!(token.as_str(), "link-sandbox-123");
    }

    #[tokio::test]
    async fn link_token_missing_field() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/create_link_token");
            then.status(200)
                .json_body(json!({ "error_code": "INVALID_API_KEYS" }));
        });

        let err = client(&server)
            .link_token(TokenEndpoint::Create)
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::MissingField("link_token")));
    }

    #[tokio::test]
    async fn link_token_http_status_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/b_testing");
            then.status(500).body("boom");
        });

        let err = client(&server)
            .link_token(TokenEndpoint::Testing)
            .await
            .unwrap_err();
        match err {
            BackendError::HttpStatus { status, body } => {
                assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
                assert_eq!(body, "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn session_cookie_is_forwarded() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/cash/user/institution/ins_1")
                .header("cookie", "session=abc");
            then.status(200).json_body(json!("exists"));
        });

        let client = BackendClient::with_base_url(
            Url::parse(&server.base_url()).unwrap(),
            Some("session=abc"),
        )
        .unwrap();
        let status = client
            .institution_status(&InstitutionId::new("ins_1"))
            .await
            .unwrap();
        mock.assert();
        assert_eq!(status, InstitutionStatus::Exists);
    }

    #[tokio::test]
    async fn institution_status_empty_string_is_not_linked() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/cash/user/institution/ins_9");
            then.status(200).json_body(json!(""));
        });

        let status = client(&server)
            .institution_status(&InstitutionId::new("ins_9"))
            .await
            .unwrap();
        assert_eq!(status, InstitutionStatus::NotLinked);
    }

    #[tokio::test]
    async fn base_url_prefix_is_kept() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/app/b_testing");
            then.status(200).json_body(json!({ "link_token": "t" }));
        });

        let base = Url::parse(&format!("{}/app/", server.base_url())).unwrap();
        let client = BackendClient::with_base_url(base, None).unwrap();
        client.link_token(TokenEndpoint::Testing).await.unwrap();
        mock.assert();
    }

    #[tokio::test]
    async fn exchange_sends_json_and_ignores_failure_status() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/cash/set_access_token")
                .header("content-type", "application/json")
                .json_body(json!({ "public_token": "public-sandbox-1" }));
            then.status(400).json_body(json!({ "error_code": "INVALID_PUBLIC_TOKEN" }));
        });

        client(&server)
            .exchange_public_token("public-sandbox-1")
            .await
            .unwrap();
        mock.assert();
    }

    #[tokio::test]
    async fn balance_parses_item_and_accounts() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/cash/balance/get");
            then.status(200).json_body(json!({
                "item": { "item_id": "item_1", "institution_id": "ins_1" },
                "accounts": [
                    {
                        "account_id": "acc_1",
                        "name": "Checking",
                        "subtype": "checking",
                        "balances": { "current": 110.5, "available": 100.0 }
                    }
                ]
            }));
        });

        let report = client(&server).balance().await.unwrap();
        assert_eq!(report.item.item_id.as_str(), "item_1");
        assert_eq!(
            report.item.institution_id.as_ref().map(InstitutionId::as_str),
            Some("ins_1")
        );
        assert_eq!(report.accounts.len(), 1);
        assert_eq!(report.accounts[0].balances.current, Some(110.5));
    }

    #[tokio::test]
    async fn balance_surfaces_backend_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/cash/balance/get");
            then.status(200).json_body(json!({
                "error": {
                    "display_message": null,
                    "error_code": "ITEM_LOGIN_REQUIRED",
                    "error_type": "ITEM_ERROR",
                    "error_message": "the login details of this item have changed"
                }
            }));
        });

        let err = client(&server).balance().await.unwrap_err();
        match err {
            BackendError::Api(body) => {
                assert_eq!(body.error_code.as_deref(), Some("ITEM_LOGIN_REQUIRED"));
                assert_eq!(body.summary(), "the login details of this item have changed");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn balance_without_item_is_missing_field() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/cash/balance/get");
            then.status(200).json_body(json!({ "accounts": [] }));
        });

        let err = client(&server).balance().await.unwrap_err();
        assert!(matches!(err, BackendError::MissingField("item.item_id")));
    }

    #[tokio::test]
    async fn sync_transactions_collects_added() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/cash/item/item_1/transactions");
            then.status(200).json_body(json!({
                "added": [{ "transaction_id": "t1" }, { "transaction_id": "t2" }]
            }));
        });

        let sync = client(&server)
            .sync_transactions(&ItemId::new("item_1"))
            .await
            .unwrap();
        assert_eq!(sync.added.len(), 2);
    }

    #[tokio::test]
    async fn refresh_and_remove_item() {
        let server = MockServer::start();
        let refresh = server.mock(|when, then| {
            when.method(GET).path("/cash/balance/item_1/update");
            then.status(200).json_body(json!({
                "item": { "item_id": "item_1" },
                "accounts": []
            }));
        });
        let remove = server.mock(|when, then| {
            when.method(GET).path("/cash/item/item_1/delete");
            then.status(200).json_body(json!({ "request_id": "req_1" }));
        });

        let client = client(&server);
        let item_id = ItemId::new("item_1");
        let report = client.refresh_balance(&item_id).await.unwrap();
        assert_eq!(report.item.item_id, item_id);
        let removed = client.remove_item(&item_id).await.unwrap();
        assert_eq!(removed.request_id.as_deref(), Some("req_1"));
        refresh.assert();
        remove.assert();
    }

    #[tokio::test]
    async fn institution_lookup() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/cash/institution/ins_3");
            then.status(200).json_body(json!({
                "institution": { "institution_id": "ins_3", "name": "First Platypus Bank" },
                "request_id": "req"
            }));
        });

        let institution = client(&server)
            .institution(&InstitutionId::new("ins_3"))
            .await
            .unwrap();
        assert_eq!(institution.name, "First Platypus Bank");
    }

    #[tokio::test]
    async fn search_items_reports_status() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/item/search");
            then.status(404);
        });

        let status = client(&server).search_items().await.unwrap();
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn endpoint_encodes_segments() {
        let client =
            BackendClient::with_base_url(Url::parse("http://localhost:5000").unwrap(), None)
                .unwrap();
        let url = client
            .endpoint(&["cash", "item", "a/b", "transactions"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:5000/cash/item/a%2Fb/transactions"
        );
    }

    #[test]
    fn rejects_non_base_url() {
        let err =
            BackendClient::with_base_url(Url::parse("mailto:someone@example.com").unwrap(), None)
                .unwrap_err();
        assert!(matches!(err, BackendError::InvalidBaseUrl(_)));
    }
}
