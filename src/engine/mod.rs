//! The AI phone engine: one interpreter task per answered call, driving the
//! script graph against the media controller and the AI adapters, plus the
//! cross-cutting termination path every exit goes through.

pub mod conditions;
pub mod interpreter;
pub mod text;

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{Local, Utc};
use log::{error, info, warn};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::ai::{AsrPort, LlmPort, TtsPort};
use crate::entities::{CallStatus, SessionRecord, SessionStatus};
use crate::media::{CallMedia, MediaFeed, MediaSession, Recorder};
use crate::rtp::endpoint::RtpEndpoint;
use crate::script::ScriptManager;
use crate::store::{ActiveCall, SessionStore};
use self::interpreter::{run_script, InterpreterDeps, Outcome};

/// Requests the engine raises towards the SIP layer.
#[derive(Debug, PartialEq, Eq)]
pub enum EngineEvent {
    /// Best-effort BYE for an interpreter-initiated hangup.
    SendBye { call_id: String },
}

struct CallRuntime {
    session_id: String,
    peer_ip: IpAddr,
    feed: MediaFeed,
    cancel: CancellationToken,
    recorder: Option<Recorder>,
}

pub struct PhoneEngine {
    store: Arc<dyn SessionStore>,
    scripts: Arc<ScriptManager>,
    endpoint: Arc<RtpEndpoint>,
    tts: Arc<dyn TtsPort>,
    asr: Arc<dyn AsrPort>,
    llm: Arc<dyn LlmPort>,
    events: UnboundedSender<EngineEvent>,
    storage_root: PathBuf,
    calls: Mutex<HashMap<String, CallRuntime>>,
}

impl PhoneEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn SessionStore>,
        scripts: Arc<ScriptManager>,
        endpoint: Arc<RtpEndpoint>,
        tts: Arc<dyn TtsPort>,
        asr: Arc<dyn AsrPort>,
        llm: Arc<dyn LlmPort>,
        events: UnboundedSender<EngineEvent>,
        storage_root: PathBuf,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            scripts,
            endpoint,
            tts,
            asr,
            llm,
            events,
            storage_root,
            calls: Mutex::new(HashMap::new()),
        })
    }

    /// Handle a completed handshake: wire media, start recording, resolve
    /// the script for the dialled number and spawn the interpreter. When no
    /// script resolves the call is hung up again.
    pub async fn start_call(
        self: Arc<Self>,
        call_id: String,
        peer_rtp: std::net::SocketAddr,
        caller: String,
        callee: String,
    ) {
        let Some(script) = self
            .scripts
            .resolve_by_phone(&callee, Local::now().naive_local())
        else {
            warn!("[engine] no script for dialled number {callee:?}, hanging up {call_id}");
            self.hangup_unstarted(&call_id).await;
            return;
        };

        let feed = MediaFeed::new();
        let cancel = CancellationToken::new();
        let recording_path = self
            .storage_root
            .join("audio")
            .join(format!("recorded_{call_id}.wav"));

        let (rec_tx, rec_rx) = tokio::sync::mpsc::unbounded_channel();
        let recorder = match Recorder::spawn(recording_path.clone(), rec_rx) {
            Ok(rec) => {
                feed.set_recorder(rec_tx);
                Some(rec)
            }
            Err(e) => {
                error!("[engine] cannot open recording for {call_id}: {e}");
                None
            }
        };

        let active = ActiveCall {
            peer_rtp,
            feed: feed.clone(),
            cancel: cancel.clone(),
            recording_path: recording_path.clone(),
        };
        if let Err(e) = self.store.put_active(&call_id, active).await {
            warn!("[engine] failed to store active session for {call_id}: {e}");
        }
        self.endpoint.register_feed(peer_rtp.ip(), feed.clone());

        let media = MediaSession::new(
            call_id.clone(),
            feed.clone(),
            self.endpoint.sender(peer_rtp),
            cancel.clone(),
            self.tts.clone(),
            self.asr.clone(),
        );

        let session_id = Uuid::new_v4().to_string();
        let mut session = SessionRecord {
            session_id: session_id.clone(),
            call_id: call_id.clone(),
            status: SessionStatus::Starting,
            script_id: script.id.clone(),
            script_name: script.name.clone(),
            script_version: script.version.clone(),
            caller_number: caller,
            callee_number: callee,
            client_rtp_addr: peer_rtp.to_string(),
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
        };
        if let Err(e) = self.store.save_session(&session).await {
            warn!("[engine] failed to create session record for {call_id}: {e}");
        }

        if let Some(snapshot) = self.scripts.mark_executed(&script.id) {
            let _ = self.store.save_script(&snapshot).await;
        }

        {
            let mut calls = self.calls.lock().unwrap();
            calls.insert(
                call_id.clone(),
                CallRuntime {
                    session_id,
                    peer_ip: peer_rtp.ip(),
                    feed,
                    cancel: cancel.clone(),
                    recorder,
                },
            );
        }

        info!(
            "[engine] starting script {:?} for {call_id} (session {})",
            script.name, session.session_id
        );

        let engine = self.clone();
        let media: Arc<dyn CallMedia> = Arc::new(media);
        tokio::spawn(async move {
            let deps = InterpreterDeps {
                media: media.clone(),
                llm: engine.llm.clone(),
                store: engine.store.clone(),
            };
            session.status = SessionStatus::Running;
            let _ = engine.store.save_session(&session).await;

            let outcome = run_script(&script, &mut session, &deps, &cancel).await;

            if matches!(outcome, Outcome::Failed(_)) && !cancel.is_cancelled() {
                // The caller hears an apology before the line drops.
                let _ = media
                    .speak(text::FAILURE_APOLOGY.to_string(), script.speaker_id.clone())
                    .await;
            }
            if matches!(outcome, Outcome::Completed) {
                if let Some(snapshot) = engine.scripts.mark_succeeded(&script.id) {
                    let _ = engine.store.save_script(&snapshot).await;
                }
            }
            let call_id = session.call_id.clone();
            engine.finish_call(&call_id, &mut session, outcome).await;
        });
    }

    /// Peer CANCEL: stop an in-flight session or close the never-started
    /// call record.
    pub async fn handle_cancel(&self, call_id: &str) {
        let cancel = {
            let calls = self.calls.lock().unwrap();
            calls.get(call_id).map(|c| c.cancel.clone())
        };
        match cancel {
            Some(token) => token.cancel(),
            None => {
                info!("[engine] CANCEL for {call_id} before media start");
                let _ = self
                    .store
                    .update_call_status(call_id, CallStatus::Cancelled, None)
                    .await;
            }
        }
    }

    /// Peer BYE: the interpreter observes the stop signal and finishes the
    /// termination path itself.
    pub async fn handle_bye(&self, call_id: &str) {
        let cancel = {
            let calls = self.calls.lock().unwrap();
            calls.get(call_id).map(|c| c.cancel.clone())
        };
        match cancel {
            Some(token) => token.cancel(),
            None => {
                let _ = self
                    .store
                    .update_call_status(call_id, CallStatus::Ended, None)
                    .await;
            }
        }
    }

    /// Hangup for calls that never got a session (no script resolved).
    async fn hangup_unstarted(&self, call_id: &str) {
        let _ = self
            .store
            .update_call_status(call_id, CallStatus::Ended, None)
            .await;
        let _ = self.events.send(EngineEvent::SendBye {
            call_id: call_id.to_string(),
        });
    }

    /// The one termination path (§ cross-cutting): stop media, flush the
    /// recording, seal the session, promote the call record, drop the
    /// active entry, and send BYE when we ended the call ourselves. Running
    /// it twice is a no-op.
    async fn finish_call(&self, call_id: &str, session: &mut SessionRecord, outcome: Outcome) {
        let runtime = {
            let mut calls = self.calls.lock().unwrap();
            calls.remove(call_id)
        };
        let Some(runtime) = runtime else {
            return; // already terminated
        };

        runtime.cancel.cancel();
        self.endpoint.unregister_feed(&runtime.peer_ip);

        runtime.feed.clear_recorder();
        let mut recording_url = None;
        if let Some(recorder) = runtime.recorder {
            match recorder.finish().await {
                Ok(samples) => {
                    recording_url = Some(format!("/api/uploads/audio/recorded_{call_id}.wav"));
                    info!("[engine] recording for {call_id} flushed ({samples} samples)");
                }
                Err(e) => warn!("[engine] recording flush failed for {call_id}: {e}"),
            }
        }

        let (status, error, peer_hung_up) = match &outcome {
            Outcome::Completed => (SessionStatus::Completed, None, false),
            Outcome::Failed(msg) => (SessionStatus::Failed, Some(msg.clone()), false),
            Outcome::Timeout(msg) => (SessionStatus::Timeout, Some(msg.clone()), false),
            Outcome::Cancelled => (SessionStatus::Cancelled, None, true),
        };

        if session.seal(status, Utc::now()) {
            session.error_message = error.clone();
            session.recording_url = recording_url.clone();
            if status == SessionStatus::Completed {
                session.result = Some("Script execution completed successfully".to_string());
            }
            if let Err(e) = self.store.save_session(session).await {
                warn!("[engine] failed to seal session {}: {e}", runtime.session_id);
            }
        }

        let call_status = if status == SessionStatus::Failed {
            CallStatus::Failed
        } else {
            CallStatus::Ended
        };
        if let Ok(Some(mut call)) = self.store.get_call(call_id).await {
            call.error_message = error;
            let _ = self.store.put_call(&call).await;
        }
        if let Err(e) = self.store.update_call_status(call_id, call_status, None).await {
            warn!("[engine] failed to close call record {call_id}: {e}");
        }
        if let Some(url) = recording_url {
            let _ = self.store.set_call_recording(call_id, &url).await;
        }

        if let Err(e) = self.store.remove_active(call_id).await {
            warn!("[engine] failed to remove active session {call_id}: {e}");
        }

        if !peer_hung_up {
            let _ = self.events.send(EngineEvent::SendBye {
                call_id: call_id.to_string(),
            });
        }

        info!(
            "[engine] call {call_id} finished: session {} {}",
            runtime.session_id,
            status.as_str()
        );
    }
}
