use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::script::model::StepType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Starting,
    Running,
    Completed,
    Failed,
    Timeout,
    Cancelled,
    Transferred,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Starting => "starting",
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Timeout => "timeout",
            SessionStatus::Cancelled => "cancelled",
            SessionStatus::Transferred => "transferred",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Starting | SessionStatus::Running)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Timeout,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
            StepStatus::Timeout => "timeout",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "stepId")]
    pub step_id: String,
}

/// One script session per answered call. The transcript and context are
/// mutated only by the owning interpreter task; the store sees snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub call_id: String,
    pub status: SessionStatus,
    pub script_id: String,
    pub script_name: String,
    pub script_version: String,
    pub caller_number: String,
    pub callee_number: String,
    pub client_rtp_addr: String,
    pub current_step_id: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_secs: i64,
    pub context: Map<String, Value>,
    pub conversation: Vec<ConversationMessage>,
    pub total_steps: u32,
    pub result: Option<String>,
    pub error_message: Option<String>,
    pub recording_url: Option<String>,
}

impl SessionRecord {
    pub fn add_message(&mut self, role: Role, content: impl Into<String>, step_id: &str) {
        self.conversation.push(ConversationMessage {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            step_id: step_id.to_string(),
        });
    }

    pub fn set_context(&mut self, key: &str, value: Value) {
        self.context.insert(key.to_string(), value);
    }

    pub fn context_flag(&self, key: &str) -> bool {
        self.context.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn user_messages(&self) -> impl Iterator<Item = &ConversationMessage> {
        self.conversation.iter().filter(|m| m.role == Role::User)
    }

    /// Seal at `now` with a terminal status. A second seal is a no-op so
    /// concurrent BYE and timeout cannot fight over the outcome.
    pub fn seal(&mut self, status: SessionStatus, now: DateTime<Utc>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        self.end_time = Some(now);
        self.duration_secs = (now - self.start_time).num_seconds().max(0);
        true
    }
}

/// Append-only log of one step attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    pub session_id: String,
    pub step_id: String,
    pub step_type: StepType,
    pub status: StepStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: i64,
    pub input: Option<String>,
    pub output: Option<String>,
    pub user_input: Option<String>,
    pub ai_response: Option<String>,
    pub tts_text: Option<String>,
    pub error_message: Option<String>,
    pub next_step_id: Option<String>,
}

impl StepExecution {
    pub fn begin(session_id: &str, step_id: &str, step_type: StepType) -> Self {
        Self {
            session_id: session_id.to_string(),
            step_id: step_id.to_string(),
            step_type,
            status: StepStatus::Running,
            start_time: Utc::now(),
            end_time: None,
            duration_ms: 0,
            input: None,
            output: None,
            user_input: None,
            ai_response: None,
            tts_text: None,
            error_message: None,
            next_step_id: None,
        }
    }

    fn close(&mut self, status: StepStatus) {
        let now = Utc::now();
        self.status = status;
        self.end_time = Some(now);
        self.duration_ms = (now - self.start_time).num_milliseconds().max(0);
    }

    pub fn complete(&mut self, next_step_id: Option<&str>) {
        self.next_step_id = next_step_id.map(str::to_string);
        self.close(StepStatus::Completed);
    }

    pub fn skip(&mut self, next_step_id: Option<&str>) {
        self.next_step_id = next_step_id.map(str::to_string);
        self.close(StepStatus::Skipped);
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.error_message = Some(message.into());
        self.close(StepStatus::Failed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> SessionRecord {
        SessionRecord {
            session_id: "s1".into(),
            call_id: "c1".into(),
            status: SessionStatus::Running,
            script_id: "script".into(),
            script_name: "demo".into(),
            script_version: "1.0.0".into(),
            caller_number: "1001".into(),
            callee_number: "10086".into(),
            client_rtp_addr: "192.0.2.1:4000".into(),
            current_step_id: None,
            start_time: Utc::now(),
            end_time: None,
            duration_secs: 0,
            context: Map::new(),
            conversation: Vec::new(),
            total_steps: 0,
            result: None,
            error_message: None,
            recording_url: None,
        }
    }

    #[test]
    fn double_seal_is_a_noop() {
        let mut rec = record();
        let now = Utc::now();
        assert!(rec.seal(SessionStatus::Cancelled, now));
        assert!(!rec.seal(SessionStatus::Timeout, now));
        assert_eq!(rec.status, SessionStatus::Cancelled);
    }

    #[test]
    fn transcript_is_append_only_and_ordered() {
        let mut rec = record();
        rec.add_message(Role::User, "你好", "welcome");
        rec.add_message(Role::Assistant, "您好", "welcome");
        assert_eq!(rec.conversation.len(), 2);
        assert!(rec.conversation[0].timestamp <= rec.conversation[1].timestamp);
        assert_eq!(rec.user_messages().count(), 1);
    }

    #[test]
    fn context_flags_default_false() {
        let mut rec = record();
        assert!(!rec.context_flag("no_user_response"));
        rec.set_context("no_user_response", Value::Bool(true));
        assert!(rec.context_flag("no_user_response"));
    }
}
