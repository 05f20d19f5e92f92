//! Core library for driving an account-linking attempt against the linking backend.

pub mod backend;
pub mod config;
pub mod flow;
pub mod model;
pub mod storage;
