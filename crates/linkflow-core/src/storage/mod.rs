//! Key/value persistence for values the flow keeps between page loads.

mod error;
mod file;
mod memory;

pub use error::StoreError;
pub use file::FileTokenStore;
pub use memory::MemoryTokenStore;

/// Key under which the current session token is kept.
pub const LINK_TOKEN_KEY: &str = "link_token";

/// String-keyed storage, the counterpart of browser local storage.
pub trait TokenStore {
    fn load(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn save(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn delete(&self, key: &str) -> Result<(), StoreError>;
}
