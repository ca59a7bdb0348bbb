//! In-memory back-end: the default, the fallback, and the one tests use.
//! Everything lives behind short `RwLock`s keyed by call or session id.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::entities::{CallRecord, CallStatus, RegistrationInfo, SessionRecord, StepExecution};
use crate::script::model::{PhoneMapping, Script};
use crate::store::{ActiveCall, PendingDialog, SessionStore, StoreError};

#[derive(Default)]
pub struct MemoryStore {
    pending: RwLock<HashMap<String, PendingDialog>>,
    calls: RwLock<HashMap<String, CallRecord>>,
    active: RwLock<HashMap<String, ActiveCall>>,
    registrations: RwLock<HashMap<String, RegistrationInfo>>,
    sessions: RwLock<HashMap<String, SessionRecord>>,
    steps: RwLock<Vec<StepExecution>>,
    scripts: RwLock<HashMap<String, Script>>,
    mappings: RwLock<Vec<PhoneMapping>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Step log for one session, in insertion order. Test support.
    pub fn steps_for(&self, session_id: &str) -> Vec<StepExecution> {
        self.steps
            .read()
            .unwrap()
            .iter()
            .filter(|s| s.session_id == session_id)
            .cloned()
            .collect()
    }

    pub fn session_by_call(&self, call_id: &str) -> Option<SessionRecord> {
        self.sessions
            .read()
            .unwrap()
            .values()
            .find(|s| s.call_id == call_id)
            .cloned()
    }

    pub fn registration(&self, username: &str) -> Option<RegistrationInfo> {
        self.registrations.read().unwrap().get(username).cloned()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.read().unwrap().len()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn put_pending(&self, call_id: &str, peer_rtp: SocketAddr) -> Result<(), StoreError> {
        self.pending.write().unwrap().insert(
            call_id.to_string(),
            PendingDialog {
                call_id: call_id.to_string(),
                peer_rtp,
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn get_pending(&self, call_id: &str) -> Result<Option<PendingDialog>, StoreError> {
        Ok(self.pending.read().unwrap().get(call_id).cloned())
    }

    async fn remove_pending(&self, call_id: &str) -> Result<(), StoreError> {
        self.pending.write().unwrap().remove(call_id);
        Ok(())
    }

    async fn put_call(&self, record: &CallRecord) -> Result<(), StoreError> {
        self.calls
            .write()
            .unwrap()
            .insert(record.call_id.clone(), record.clone());
        Ok(())
    }

    async fn get_call(&self, call_id: &str) -> Result<Option<CallRecord>, StoreError> {
        Ok(self.calls.read().unwrap().get(call_id).cloned())
    }

    async fn update_call_status(
        &self,
        call_id: &str,
        status: CallStatus,
        answer_time: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let mut calls = self.calls.write().unwrap();
        let Some(call) = calls.get_mut(call_id) else {
            return Err(StoreError::NotFound(call_id.to_string()));
        };
        if let Some(t) = answer_time {
            call.answer_time = Some(t);
        }
        if status.is_terminal() {
            call.seal(status, Utc::now());
        } else {
            call.status = status;
        }
        Ok(())
    }

    async fn set_call_recording(&self, call_id: &str, url: &str) -> Result<(), StoreError> {
        let mut calls = self.calls.write().unwrap();
        let Some(call) = calls.get_mut(call_id) else {
            return Err(StoreError::NotFound(call_id.to_string()));
        };
        call.recording_url = Some(url.to_string());
        Ok(())
    }

    async fn put_active(&self, call_id: &str, active: ActiveCall) -> Result<(), StoreError> {
        self.active
            .write()
            .unwrap()
            .insert(call_id.to_string(), active);
        Ok(())
    }

    async fn get_active(&self, call_id: &str) -> Result<Option<ActiveCall>, StoreError> {
        Ok(self.active.read().unwrap().get(call_id).cloned())
    }

    async fn remove_active(&self, call_id: &str) -> Result<(), StoreError> {
        self.active.write().unwrap().remove(call_id);
        Ok(())
    }

    async fn active_count(&self) -> usize {
        self.active.read().unwrap().len()
    }

    async fn put_registration(&self, info: &RegistrationInfo) -> Result<(), StoreError> {
        self.registrations
            .write()
            .unwrap()
            .insert(info.username.clone(), info.clone());
        Ok(())
    }

    async fn save_session(&self, record: &SessionRecord) -> Result<(), StoreError> {
        self.sessions
            .write()
            .unwrap()
            .insert(record.session_id.clone(), record.clone());
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>, StoreError> {
        Ok(self.sessions.read().unwrap().get(session_id).cloned())
    }

    async fn record_step(&self, exec: &StepExecution) -> Result<(), StoreError> {
        self.steps.write().unwrap().push(exec.clone());
        Ok(())
    }

    async fn save_script(&self, script: &Script) -> Result<(), StoreError> {
        self.scripts
            .write()
            .unwrap()
            .insert(script.id.clone(), script.clone());
        Ok(())
    }

    async fn load_scripts(&self) -> Result<Vec<Script>, StoreError> {
        Ok(self.scripts.read().unwrap().values().cloned().collect())
    }

    async fn save_phone_mapping(&self, mapping: &PhoneMapping) -> Result<(), StoreError> {
        self.mappings.write().unwrap().push(mapping.clone());
        Ok(())
    }

    async fn load_phone_mappings(&self) -> Result<Vec<PhoneMapping>, StoreError> {
        Ok(self.mappings.read().unwrap().clone())
    }
}
