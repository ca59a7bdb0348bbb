//! SIP signaling: message model, wire grammar, response composition and the
//! per-method dialog core that drives call setup and teardown.

pub mod builder;
pub mod core;
pub mod message;
pub mod parse;

pub use self::core::{SipConfig, SipCore, SipEvent};
pub use message::{SipHeader, SipMessage, SipMethod, SipRequest, SipResponse};
