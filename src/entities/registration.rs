use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Extracted from a REGISTER request and handed to the store. Registration
/// is bookkeeping only; accepting INVITEs does not require it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationInfo {
    pub username: String,
    pub contact_ip: String,
    pub contact_port: u16,
    pub expires: u32,
    pub user_agent: String,
    pub source_ip: String,
    pub registered_at: DateTime<Utc>,
}

impl RegistrationInfo {
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.registered_at + chrono::Duration::seconds(self.expires as i64)
    }

    pub fn contact(&self) -> String {
        format!("{}:{}", self.contact_ip, self.contact_port)
    }
}
