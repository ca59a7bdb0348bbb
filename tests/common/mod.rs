//! Shared test doubles: scripted media, scripted/failing LLMs and silent
//! AI ports for driving the interpreter and engine without a network peer.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use lingsip::ai::{
    AiFuture, AsrError, AsrPort, AsrStream, LlmError, LlmPort, LlmReply, TtsError, TtsPort,
};
use lingsip::entities::{SessionRecord, SessionStatus};
use lingsip::media::{CallMedia, MediaError};

/// Media double driven by a queue of listen results. An empty string is a
/// silent window; with `block_when_empty` the double parks on the stop
/// signal once the queue runs dry, like a caller who just stops talking.
pub struct ScriptedMedia {
    listens: Mutex<VecDeque<String>>,
    dtmf: Mutex<VecDeque<String>>,
    pub spoken: Mutex<Vec<String>>,
    cancel: CancellationToken,
    block_when_empty: bool,
}

impl ScriptedMedia {
    pub fn new(listens: &[&str], cancel: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            listens: Mutex::new(listens.iter().map(|s| s.to_string()).collect()),
            dtmf: Mutex::new(VecDeque::new()),
            spoken: Mutex::new(Vec::new()),
            cancel,
            block_when_empty: false,
        })
    }

    pub fn blocking_after(listens: &[&str], cancel: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            listens: Mutex::new(listens.iter().map(|s| s.to_string()).collect()),
            dtmf: Mutex::new(VecDeque::new()),
            spoken: Mutex::new(Vec::new()),
            cancel,
            block_when_empty: true,
        })
    }

    pub fn push_dtmf(&self, digits: &str) {
        self.dtmf.lock().unwrap().push_back(digits.to_string());
    }

    pub fn spoken_texts(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }
}

impl CallMedia for ScriptedMedia {
    fn speak(&self, text: String, _voice_id: String) -> AiFuture<Result<(), MediaError>> {
        let cancelled = self.cancel.is_cancelled();
        if !cancelled {
            self.spoken.lock().unwrap().push(text);
        }
        Box::pin(async move {
            if cancelled {
                Err(MediaError::Cancelled)
            } else {
                Ok(())
            }
        })
    }

    fn listen(&self, _max_wait: Duration) -> AiFuture<Result<String, MediaError>> {
        let next = self.listens.lock().unwrap().pop_front();
        let cancel = self.cancel.clone();
        let block = self.block_when_empty;
        Box::pin(async move {
            if cancel.is_cancelled() {
                return Err(MediaError::Cancelled);
            }
            match next {
                Some(text) => Ok(text),
                None if block => {
                    cancel.cancelled().await;
                    Err(MediaError::Cancelled)
                }
                None => Ok(String::new()),
            }
        })
    }

    fn collect_dtmf(
        &self,
        _max_wait: Duration,
        _max_digits: usize,
        _terminator: char,
    ) -> AiFuture<Result<String, MediaError>> {
        let next = self.dtmf.lock().unwrap().pop_front().unwrap_or_default();
        Box::pin(async move { Ok(next) })
    }

    fn wait(&self, _duration: Duration) -> AiFuture<Result<(), MediaError>> {
        let cancelled = self.cancel.is_cancelled();
        Box::pin(async move {
            if cancelled {
                Err(MediaError::Cancelled)
            } else {
                Ok(())
            }
        })
    }
}

/// LLM double replying from a fixed queue; the queue exhausted, it keeps
/// answering with a neutral phrase.
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<LlmReply>>,
}

impl ScriptedLlm {
    pub fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| LlmReply::text(*r)).collect()),
        })
    }
}

impl LlmPort for ScriptedLlm {
    fn query(&self, _prompt: String) -> AiFuture<Result<LlmReply, LlmError>> {
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| LlmReply::text("好的。"));
        Box::pin(async move { Ok(reply) })
    }
}

/// LLM double that fails every query (outage scenario).
pub struct FailingLlm;

impl LlmPort for FailingLlm {
    fn query(&self, _prompt: String) -> AiFuture<Result<LlmReply, LlmError>> {
        Box::pin(async move { Err(LlmError::GenerationFailed("vendor down".into())) })
    }
}

/// TTS double returning a single quiet frame.
pub struct FixedTts;

impl TtsPort for FixedTts {
    fn synthesize(&self, _text: String, _voice: String) -> AiFuture<Result<Vec<i16>, TtsError>> {
        Box::pin(async move { Ok(vec![5000i16; 160]) })
    }
}

/// ASR double that finalises an empty transcript (it should normally never
/// even be reached because silent windows produce no audio).
pub struct SilentAsr;

impl AsrPort for SilentAsr {
    fn open(&self, _dialog_id: String) -> AiFuture<Result<AsrStream, AsrError>> {
        Box::pin(async move {
            let (stream, mut backend) = AsrStream::pair();
            tokio::spawn(async move {
                let _ = backend.collect_audio().await;
                let _ = backend.final_tx.send(Ok(String::new()));
            });
            Ok(stream)
        })
    }
}

pub fn session_record(call_id: &str, script_id: &str) -> SessionRecord {
    SessionRecord {
        session_id: format!("session-{call_id}"),
        call_id: call_id.to_string(),
        status: SessionStatus::Running,
        script_id: script_id.to_string(),
        script_name: script_id.to_string(),
        script_version: "1.0.0".to_string(),
        caller_number: "1001".to_string(),
        callee_number: "10086".to_string(),
        client_rtp_addr: "192.0.2.9:40000".to_string(),
        current_step_id: None,
        start_time: Utc::now(),
        end_time: None,
        duration_secs: 0,
        context: serde_json::Map::new(),
        conversation: Vec::new(),
        total_steps: 0,
        result: None,
        error_message: None,
        recording_url: None,
    }
}
