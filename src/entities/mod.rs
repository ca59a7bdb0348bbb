//! Persistent record types shared by the SIP layer, the store back-ends and
//! the script engine.

pub mod call;
pub mod registration;
pub mod session;

pub use call::{CallDirection, CallRecord, CallStatus};
pub use registration::RegistrationInfo;
pub use session::{
    ConversationMessage, Role, SessionRecord, SessionStatus, StepExecution, StepStatus,
};

/// SIP Call-ID, the key joining signaling, media and script state.
pub type CallId = String;
