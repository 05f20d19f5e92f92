use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::model::{InstitutionId, SessionToken};

use super::FlowError;

/// Exit status for which the loader must be hidden.
pub const REQUIRES_CREDENTIALS: &str = "requires_credentials";

/// Outcome reported by the linking SDK.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LinkOutcome {
    Success {
        public_token: String,
        #[serde(default)]
        metadata: LinkMetadata,
    },
    Exit {
        #[serde(default)]
        error: Option<LinkError>,
        #[serde(default)]
        metadata: LinkMetadata,
    },
    Event {
        name: String,
        #[serde(default)]
        metadata: LinkMetadata,
    },
}

/// Metadata attached to every SDK outcome.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LinkMetadata {
    #[serde(default)]
    pub institution: Option<LinkInstitution>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl LinkMetadata {
    pub fn institution_id(&self) -> Option<&InstitutionId> {
        self.institution
            .as_ref()
            .map(|institution| &institution.institution_id)
    }

    pub fn requires_credentials(&self) -> bool {
        self.status.as_deref() == Some(REQUIRES_CREDENTIALS)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkInstitution {
    pub institution_id: InstitutionId,
    #[serde(default)]
    pub name: Option<String>,
}

/// Error the SDK attaches to an exit.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LinkError {
    #[serde(default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub display_message: Option<String>,
}

/// Opens the third-party linking UI for a session token.
pub trait LinkSdk {
    fn open(&self, token: &SessionToken) -> Result<LinkSession, FlowError>;
}

/// Feeding half of a [`LinkSession`], held by the SDK integration.
#[derive(Debug, Clone)]
pub struct LinkSender {
    tx: mpsc::UnboundedSender<LinkOutcome>,
}

impl LinkSender {
    /// Returns `false` once the session has been dropped.
    pub fn send(&self, outcome: LinkOutcome) -> bool {
        self.tx.send(outcome).is_ok()
    }
}

/// Stream of outcomes from one open SDK UI.
#[derive(Debug)]
pub struct LinkSession {
    rx: mpsc::UnboundedReceiver<LinkOutcome>,
}

impl LinkSession {
    pub fn channel() -> (LinkSender, LinkSession) {
        let (tx, rx) = mpsc::unbounded_channel();
        (LinkSender { tx }, LinkSession { rx })
    }

    /// Next outcome, or `None` once the SDK side hung up.
    pub async fn next(&mut self) -> Option<LinkOutcome> {
        self.rx.recv().await
    }
}

/// SDK stand-in that plays back a fixed list of outcomes on every open.
#[derive(Debug, Clone, Default)]
pub struct ReplaySdk {
    script: Vec<LinkOutcome>,
    opened_with: Arc<Mutex<Vec<SessionToken>>>,
}

impl ReplaySdk {
    pub fn new(script: Vec<LinkOutcome>) -> Self {
        Self {
            script,
            opened_with: Arc::default(),
        }
    }

    /// Load a JSON array of outcomes, e.g.
    /// `[{"type": "event", "name": "OPEN"}, {"type": "success", "public_token": "..."}]`.
    pub fn from_file(path: &Path) -> Result<Self, FlowError> {
        let raw = fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, FlowError> {
        let script: Vec<LinkOutcome> = serde_json::from_str(raw)?;
        Ok(Self::new(script))
    }

    /// Tokens passed to `open`, oldest first.
    pub fn opened_with(&self) -> Vec<SessionToken> {
        self.opened_with
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl LinkSdk for ReplaySdk {
    fn open(&self, token: &SessionToken) -> Result<LinkSession, FlowError> {
        self.opened_with
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(token.clone());
        let (sender, session) = LinkSession::channel();
        for outcome in &self.script {
            sender.send(outcome.clone());
        }
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_outcome_script() {
        let sdk = ReplaySdk::from_json(
            r#"[
                {"type": "event", "name": "OPEN", "metadata": {"view_name": "CONSENT"}},
                {"type": "exit", "error": null, "metadata": {"status": "requires_credentials"}},
                {"type": "success", "public_token": "public-sandbox-1",
                 "metadata": {"institution": {"institution_id": "ins_1", "name": "Bank"}}}
            ]"#,
        )
        .unwrap();
        assert_eq!(sdk.script.len(), 3);

        match &sdk.script[0] {
            LinkOutcome::Event { name, metadata } => {
                assert_eq!(name, "OPEN");
                assert_eq!(metadata.extra["view_name"], "CONSENT");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        match &sdk.script[1] {
            LinkOutcome::Exit { error, metadata } => {
                assert!(error.is_none());
                assert!(metadata.requires_credentials());
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        match &sdk.script[2] {
            LinkOutcome::Success { metadata, .. } => {
                assert_eq!(metadata.institution_id().map(InstitutionId::as_str), Some("ins_1"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn session_ends_when_sender_drops() {
        let (sender, mut session) = LinkSession::channel();
        assert!(sender.send(LinkOutcome::Event {
            name: "OPEN".into(),
            metadata: LinkMetadata::default(),
        }));
        drop(sender);
        assert!(session.next().await.is_some());
        assert!(session.next().await.is_none());
    }

    #[tokio::test]
    async fn replay_records_tokens() {
        let sdk = ReplaySdk::new(vec![]);
        let mut session = sdk.open(&SessionToken::new("link-1")).unwrap();
        assert!(session.next().await.is_none());
        assert_eq!(sdk.opened_with(), vec![SessionToken::new("link-1")]);
    }
}
