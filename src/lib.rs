//! `gestor-http` is the resilient request layer of the Gestor de Finanzas
//! dashboard.
//!
//! Every backend call goes through [`ApiClient`], which:
//! - attaches `Authorization: Bearer <token>` from a [`KeyValueStore`]
//! - retries timeouts, network failures and transient statuses with capped
//!   exponential backoff
//! - tears down the stored session on 401/403
//! - publishes connection health through a [`ConnectionMonitor`]

mod auth;
mod client;
mod error;
mod monitor;
mod options;
mod response;
pub mod retry;
pub mod storage;

pub use auth::{LoginCredentials, LoginResponse, LogoutOutcome, RegisterCredentials, UserData};
pub use client::{ApiClient, AuthInvalidated};
pub use error::{ApiError, ErrorKind};
pub use monitor::{ConnectionMonitor, ConnectionState, Subscription};
pub use options::ClientOptions;
pub use response::{ApiResponse, ResponseBody};
pub use storage::{FileStore, KeyValueStore, MemoryStore, StoreError};

pub type Result<T> = std::result::Result<T, ApiError>;
