//! External service adapters: TTS, streaming ASR and LLM. The traits are
//! deliberately narrow; vendor policy (endpoints, retries, credentials)
//! lives inside each adapter, and the engine is handed trait objects.

use std::future::Future;
use std::pin::Pin;

pub mod asr;
pub mod error;
pub mod llm;
pub mod tts;

pub use asr::{AsrPort, AsrStream};
pub use error::{AsrError, LlmError, TtsError};
pub use llm::{LlmAction, LlmPort, LlmReply};
pub use tts::TtsPort;

/// Boxed future used by all AI ports so implementations stay object-safe.
pub type AiFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
