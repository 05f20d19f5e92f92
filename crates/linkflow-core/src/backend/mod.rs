mod client;

pub use client::{
    AccountBalance, ApiErrorBody, BackendClient, BackendError, BackendResult, BalanceReport,
    Balances, Institution, ItemRef, RemovedItem, TransactionSync,
};
