use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::backend::BackendClient;
use crate::config::TokenEndpoint;
use crate::model::{InstitutionId, InstitutionStatus, ItemId, SessionToken};
use crate::storage::{TokenStore, LINK_TOKEN_KEY};

use super::{FlowError, LinkError, LinkMetadata, LinkOutcome, LinkSdk, LinkSession, PageSurface};

/// How a linking attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowOutcome {
    /// Token exchanged, balances fetched and transactions synced for this item.
    Linked { item_id: ItemId },
    /// The user already linked this institution; nothing was exchanged.
    AlreadyLinked { institution_id: InstitutionId },
    /// The user left the SDK UI or the SDK failed.
    Exited { status: Option<String> },
    /// The SDK hung up without reporting success or exit.
    Abandoned,
}

/// The three reactions a [`LinkHandler`] dispatches SDK outcomes to.
pub trait LinkCallbacks {
    fn on_success(
        &self,
        public_token: &str,
        metadata: &LinkMetadata,
    ) -> impl Future<Output = Result<FlowOutcome, FlowError>>;

    fn on_event(&self, name: &str, metadata: &LinkMetadata);

    fn on_exit(&self, error: Option<&LinkError>, metadata: &LinkMetadata) -> FlowOutcome;
}

/// A session token bound to its callbacks, ready to be opened.
pub struct LinkHandler<'c, C> {
    token: SessionToken,
    callbacks: &'c C,
}

impl<'c, C> LinkHandler<'c, C>
where
    C: LinkCallbacks,
{
    pub fn new(token: SessionToken, callbacks: &'c C) -> Self {
        Self { token, callbacks }
    }

    pub fn token(&self) -> &SessionToken {
        &self.token
    }

    /// Route one outcome. Returns `None` while the session is still open.
    pub async fn dispatch(&self, outcome: LinkOutcome) -> Result<Option<FlowOutcome>, FlowError> {
        match outcome {
            LinkOutcome::Success {
                public_token,
                metadata,
            } => self
                .callbacks
                .on_success(&public_token, &metadata)
                .await
                .map(Some),
            LinkOutcome::Exit { error, metadata } => {
                Ok(Some(self.callbacks.on_exit(error.as_ref(), &metadata)))
            }
            LinkOutcome::Event { name, metadata } => {
                self.callbacks.on_event(&name, &metadata);
                Ok(None)
            }
        }
    }

    /// Dispatch outcomes until a terminal one arrives or the SDK hangs up.
    pub async fn drive(&self, mut session: LinkSession) -> Result<FlowOutcome, FlowError> {
        while let Some(outcome) = session.next().await {
            if let Some(done) = self.dispatch(outcome).await? {
                return Ok(done);
            }
        }
        tracing::warn!("linking session closed without success or exit");
        Ok(FlowOutcome::Abandoned)
    }
}

/// Orchestrates one account-linking attempt end to end.
///
/// Every backend call is awaited in order and any failure is returned to the
/// caller as is. The only recovery is hiding the loader when the SDK exits
/// with [`REQUIRES_CREDENTIALS`](super::REQUIRES_CREDENTIALS).
pub struct LinkFlowController<S, P, K> {
    backend: BackendClient,
    store: Arc<Mutex<S>>,
    page: P,
    sdk: K,
    token_endpoint: TokenEndpoint,
}

impl<S, P, K> LinkFlowController<S, P, K>
where
    S: TokenStore + Send + 'static,
    P: PageSurface,
    K: LinkSdk,
{
    pub fn new(backend: BackendClient, store: S, page: P, sdk: K) -> Self {
        Self {
            backend,
            store: Arc::new(Mutex::new(store)),
            page,
            sdk,
            token_endpoint: TokenEndpoint::default(),
        }
    }

    pub fn with_token_endpoint(mut self, endpoint: TokenEndpoint) -> Self {
        self.token_endpoint = endpoint;
        self
    }

    /// The session token last written to storage, if any.
    pub async fn stored_session_token(&self) -> Result<Option<SessionToken>, FlowError> {
        let store = self.store.lock().await;
        Ok(store.load(LINK_TOKEN_KEY)?.map(SessionToken::from))
    }

    /// Request a session token and keep it in storage under `link_token`.
    pub async fn fetch_session_token(&self) -> Result<SessionToken, FlowError> {
        let token = self.backend.link_token(self.token_endpoint).await?;
        let store = self.store.lock().await;
        store.save(LINK_TOKEN_KEY, token.as_str())?;
        tracing::debug!(endpoint = %self.token_endpoint, "session token stored");
        Ok(token)
    }

    pub fn initialize_handler(&self, token: SessionToken) -> LinkHandler<'_, Self> {
        LinkHandler::new(token, self)
    }

    /// Show the loader and open the SDK UI for the handler's token.
    pub fn handle_link_button_click(
        &self,
        handler: &LinkHandler<'_, Self>,
    ) -> Result<LinkSession, FlowError> {
        self.page.show_loader();
        self.sdk.open(handler.token())
    }

    /// Full attempt: token, handler, click, then react to the SDK until it finishes.
    pub async fn run(&self) -> Result<FlowOutcome, FlowError> {
        let token = self.fetch_session_token().await?;
        let handler = self.initialize_handler(token);
        let session = self.handle_link_button_click(&handler)?;
        handler.drive(session).await
    }

    /// Fetch balances for the freshly exchanged item, then hide the loader and
    /// reload the page before handing the item id back.
    pub async fn fetch_balance(&self) -> Result<ItemId, FlowError> {
        let report = self.backend.balance().await?;
        for account in &report.accounts {
            tracing::debug!(
                account_id = %account.account_id,
                current = ?account.balances.current,
                "account balance"
            );
        }
        self.page.hide_loader();
        self.page.reload();
        Ok(report.item.item_id)
    }

    pub async fn sync_transactions(&self, item_id: &ItemId) -> Result<(), FlowError> {
        let sync = self.backend.sync_transactions(item_id).await?;
        tracing::info!(item_id = %item_id, added = sync.added.len(), "transactions synced");
        Ok(())
    }
}

impl<S, P, K> LinkCallbacks for LinkFlowController<S, P, K>
where
    S: TokenStore + Send + 'static,
    P: PageSurface,
    K: LinkSdk,
{
    async fn on_success(
        &self,
        public_token: &str,
        metadata: &LinkMetadata,
    ) -> Result<FlowOutcome, FlowError> {
        let institution_id = metadata
            .institution_id()
            .cloned()
            .ok_or(FlowError::MissingInstitution)?;
        tracing::info!(institution_id = %institution_id, "link succeeded");

        if self.backend.institution_status(&institution_id).await? == InstitutionStatus::Exists {
            tracing::info!(institution_id = %institution_id, "institution has already been linked");
            self.page.scroll_to_top();
            self.page.reload();
            return Ok(FlowOutcome::AlreadyLinked { institution_id });
        }

        self.backend.exchange_public_token(public_token).await?;
        let item_id = self.fetch_balance().await?;
        self.sync_transactions(&item_id).await?;
        Ok(FlowOutcome::Linked { item_id })
    }

    fn on_event(&self, name: &str, metadata: &LinkMetadata) {
        tracing::info!(event = name, metadata = ?metadata, "link event");
    }

    fn on_exit(&self, error: Option<&LinkError>, metadata: &LinkMetadata) -> FlowOutcome {
        tracing::info!(error = ?error, status = ?metadata.status, "link exited");
        if metadata.requires_credentials() {
            self.page.hide_loader();
        }
        FlowOutcome::Exited {
            status: metadata.status.clone(),
        }
    }
}
