//! One account-linking attempt: token issuance, the SDK round trip, and the
//! follow-up exchange, balance and transaction calls.

mod controller;
mod error;
mod page;
mod sdk;

pub use controller::{FlowOutcome, LinkCallbacks, LinkFlowController, LinkHandler};
pub use error::FlowError;
pub use page::{LoggingPage, PageAction, PageSurface, RecordingPage};
pub use sdk::{
    LinkError, LinkInstitution, LinkMetadata, LinkOutcome, LinkSdk, LinkSender, LinkSession,
    ReplaySdk, REQUIRES_CREDENTIALS,
};
