//! Call session store: pending dialogs, call records, active sessions,
//! registrations, script sessions with their step log, and the script
//! catalogue. One contract, three interchangeable back-ends; the back-end
//! never changes call semantics. When the configured back-end cannot be
//! opened the in-memory one is used with a warning.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::warn;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::entities::{
    CallRecord, CallStatus, RegistrationInfo, SessionRecord, StepExecution,
};
use crate::media::feed::MediaFeed;
use crate::script::model::{PhoneMapping, Script};

pub mod file;
pub mod memory;
pub mod postgres;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use postgres::PostgresStore;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Registration for an unknown user (maps to 401 at the SIP layer).
    #[error("user not found")]
    UserUnknown,
    /// Registration for a disabled user (maps to 403 at the SIP layer).
    #[error("user disabled")]
    UserDisabled,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn backend(e: impl std::fmt::Display) -> Self {
        StoreError::Backend(e.to_string())
    }
}

/// Short-lived tuple kept between sending 200 OK to an INVITE and the
/// matching ACK.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDialog {
    pub call_id: String,
    pub peer_rtp: SocketAddr,
    pub created_at: DateTime<Utc>,
}

/// Runtime-only state of an answered call: where the caller's media comes
/// from, the fan-out feed the demultiplexer fills, the session-wide stop
/// signal and the recording destination. Never persisted.
#[derive(Clone)]
pub struct ActiveCall {
    pub peer_rtp: SocketAddr,
    pub feed: MediaFeed,
    pub cancel: CancellationToken,
    pub recording_path: PathBuf,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    // pending dialogs
    async fn put_pending(&self, call_id: &str, peer_rtp: SocketAddr) -> Result<(), StoreError>;
    async fn get_pending(&self, call_id: &str) -> Result<Option<PendingDialog>, StoreError>;
    async fn remove_pending(&self, call_id: &str) -> Result<(), StoreError>;

    // call records
    async fn put_call(&self, record: &CallRecord) -> Result<(), StoreError>;
    async fn get_call(&self, call_id: &str) -> Result<Option<CallRecord>, StoreError>;
    async fn update_call_status(
        &self,
        call_id: &str,
        status: CallStatus,
        answer_time: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;
    async fn set_call_recording(&self, call_id: &str, url: &str) -> Result<(), StoreError>;

    // active sessions (runtime-only, never leaves the process)
    async fn put_active(&self, call_id: &str, active: ActiveCall) -> Result<(), StoreError>;
    async fn get_active(&self, call_id: &str) -> Result<Option<ActiveCall>, StoreError>;
    async fn remove_active(&self, call_id: &str) -> Result<(), StoreError>;
    async fn active_count(&self) -> usize;

    // registrations
    async fn put_registration(&self, info: &RegistrationInfo) -> Result<(), StoreError>;

    // script sessions and their step log
    async fn save_session(&self, record: &SessionRecord) -> Result<(), StoreError>;
    async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>, StoreError>;
    async fn record_step(&self, exec: &StepExecution) -> Result<(), StoreError>;

    // script catalogue
    async fn save_script(&self, script: &Script) -> Result<(), StoreError>;
    async fn load_scripts(&self) -> Result<Vec<Script>, StoreError>;
    async fn save_phone_mapping(&self, mapping: &PhoneMapping) -> Result<(), StoreError>;
    async fn load_phone_mappings(&self) -> Result<Vec<PhoneMapping>, StoreError>;
}

/// Back-end selection per configuration. Unknown drivers and connection
/// failures fall back to memory so a missing database never takes the
/// signaling path down.
pub async fn open_store(
    driver: &str,
    dsn: Option<&str>,
    storage_root: &std::path::Path,
) -> Arc<dyn SessionStore> {
    match driver {
        "memory" | "" => Arc::new(MemoryStore::new()),
        "file" => Arc::new(FileStore::new(storage_root.to_path_buf())),
        "postgres" => {
            let Some(dsn) = dsn else {
                warn!("[store] postgres selected but no DSN given, using memory store");
                return Arc::new(MemoryStore::new());
            };
            match PostgresStore::connect(dsn).await {
                Ok(store) => Arc::new(store),
                Err(e) => {
                    warn!("[store] postgres unavailable ({e}), using memory store");
                    Arc::new(MemoryStore::new())
                }
            }
        }
        other => {
            warn!("[store] unknown driver {other:?}, using memory store");
            Arc::new(MemoryStore::new())
        }
    }
}
