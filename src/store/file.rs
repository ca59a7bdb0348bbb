//! File back-end: one JSON document per record under the storage root,
//! mirroring the memory back-end's semantics. Pending dialogs, call records
//! and registrations go to disk; runtime-only state (active sessions) and
//! the high-churn session/step log stay in an embedded memory store.
//!
//! Layout:
//!   <root>/sessions/<call_id>.json       pending dialogs
//!   <root>/calls/<call_id>.json          call records
//!   <root>/registrations/<user>.json     registrations
//!   <root>/scripts/<id>.json             script catalogue
//!   <root>/mappings.json                 phone mappings

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

use crate::entities::{CallRecord, CallStatus, RegistrationInfo, SessionRecord, StepExecution};
use crate::script::model::{PhoneMapping, Script};
use crate::store::{ActiveCall, MemoryStore, PendingDialog, SessionStore, StoreError};

pub struct FileStore {
    root: PathBuf,
    runtime: MemoryStore,
}

impl FileStore {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            runtime: MemoryStore::new(),
        }
    }

    fn dir(&self, kind: &str) -> PathBuf {
        self.root.join(kind)
    }

    fn record_path(&self, kind: &str, key: &str) -> PathBuf {
        // Keys come off the wire; keep them from escaping the store dir.
        let safe: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || "-_.@".contains(c) { c } else { '_' })
            .collect();
        self.dir(kind).join(format!("{safe}.json"))
    }

    fn write_record<T: Serialize>(&self, path: &Path, record: &T) -> Result<(), StoreError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(StoreError::backend)?;
        }
        let mut value = serde_json::to_value(record).map_err(StoreError::backend)?;
        if let Some(obj) = value.as_object_mut() {
            obj.insert(
                "savedAt".to_string(),
                json!(humantime::format_rfc3339(SystemTime::now()).to_string()),
            );
        }
        let bytes = serde_json::to_vec_pretty(&value).map_err(StoreError::backend)?;
        std::fs::write(path, bytes).map_err(StoreError::backend)
    }

    fn read_record<T: serde::de::DeserializeOwned>(
        &self,
        path: &Path,
    ) -> Result<Option<T>, StoreError> {
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::backend(e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(StoreError::backend)
    }

    fn remove_record(&self, path: &Path) -> Result<(), StoreError> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::backend(e)),
        }
    }
}

#[async_trait]
impl SessionStore for FileStore {
    async fn put_pending(&self, call_id: &str, peer_rtp: SocketAddr) -> Result<(), StoreError> {
        let dialog = json!({
            "callId": call_id,
            "remoteRtpAddr": peer_rtp.to_string(),
            "status": "pending",
            "createdAt": Utc::now().to_rfc3339(),
        });
        self.write_record(&self.record_path("sessions", call_id), &dialog)
    }

    async fn get_pending(&self, call_id: &str) -> Result<Option<PendingDialog>, StoreError> {
        let Some(value) =
            self.read_record::<serde_json::Value>(&self.record_path("sessions", call_id))?
        else {
            return Ok(None);
        };
        let addr = value
            .get("remoteRtpAddr")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<SocketAddr>().ok());
        let created_at = value
            .get("createdAt")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        Ok(addr.map(|peer_rtp| PendingDialog {
            call_id: call_id.to_string(),
            peer_rtp,
            created_at,
        }))
    }

    async fn remove_pending(&self, call_id: &str) -> Result<(), StoreError> {
        self.remove_record(&self.record_path("sessions", call_id))
    }

    async fn put_call(&self, record: &CallRecord) -> Result<(), StoreError> {
        self.write_record(&self.record_path("calls", &record.call_id), record)
    }

    async fn get_call(&self, call_id: &str) -> Result<Option<CallRecord>, StoreError> {
        self.read_record(&self.record_path("calls", call_id))
    }

    async fn update_call_status(
        &self,
        call_id: &str,
        status: CallStatus,
        answer_time: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let Some(mut call) = self.get_call(call_id).await? else {
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
        self.put_call(&call).await
    }

    async fn set_call_recording(&self, call_id: &str, url: &str) -> Result<(), StoreError> {
        let Some(mut call) = self.get_call(call_id).await? else {
            return Err(StoreError::NotFound(call_id.to_string()));
        };
        call.recording_url = Some(url.to_string());
        self.put_call(&call).await
    }

    async fn put_active(&self, call_id: &str, active: ActiveCall) -> Result<(), StoreError> {
        self.runtime.put_active(call_id, active).await
    }

    async fn get_active(&self, call_id: &str) -> Result<Option<ActiveCall>, StoreError> {
        self.runtime.get_active(call_id).await
    }

    async fn remove_active(&self, call_id: &str) -> Result<(), StoreError> {
        self.runtime.remove_active(call_id).await
    }

    async fn active_count(&self) -> usize {
        self.runtime.active_count().await
    }

    async fn put_registration(&self, info: &RegistrationInfo) -> Result<(), StoreError> {
        self.write_record(&self.record_path("registrations", &info.username), info)
    }

    async fn save_session(&self, record: &SessionRecord) -> Result<(), StoreError> {
        self.runtime.save_session(record).await
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>, StoreError> {
        self.runtime.get_session(session_id).await
    }

    async fn record_step(&self, exec: &StepExecution) -> Result<(), StoreError> {
        self.runtime.record_step(exec).await
    }

    async fn save_script(&self, script: &Script) -> Result<(), StoreError> {
        self.write_record(&self.record_path("scripts", &script.id), script)
    }

    async fn load_scripts(&self) -> Result<Vec<Script>, StoreError> {
        let dir = self.dir("scripts");
        let entries = match std::fs::read_dir(&dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::backend(e)),
        };
        let mut scripts = Vec::new();
        for entry in entries {
            let entry = entry.map_err(StoreError::backend)?;
            if let Some(script) = self.read_record::<Script>(&entry.path())? {
                scripts.push(script);
            }
        }
        Ok(scripts)
    }

    async fn save_phone_mapping(&self, mapping: &PhoneMapping) -> Result<(), StoreError> {
        let mut mappings = self.load_phone_mappings().await?;
        mappings.push(mapping.clone());
        self.write_record(&self.root.join("mappings.json"), &json!({ "mappings": mappings }))
    }

    async fn load_phone_mappings(&self) -> Result<Vec<PhoneMapping>, StoreError> {
        let Some(value) =
            self.read_record::<serde_json::Value>(&self.root.join("mappings.json"))?
        else {
            return Ok(Vec::new());
        };
        let mappings = value
            .get("mappings")
            .cloned()
            .unwrap_or(serde_json::Value::Array(Vec::new()));
        serde_json::from_value(mappings).map_err(StoreError::backend)
    }
}
