//! The per-call script interpreter: walks the graph one step at a time,
//! drives the media controller and the LLM, and appends a step execution
//! for every attempt. Successors are resolved by identifier at each
//! transition, so cyclic scripts run within the step budget.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{info, warn};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::ai::{LlmAction, LlmPort, LlmReply};
use crate::engine::{conditions, text};
use crate::entities::{Role, SessionRecord, StepExecution};
use crate::media::{CallMedia, MediaError};
use crate::script::model::{
    CollectData, DtmfData, Script, SayAndListenData, Step, StepData,
};
use crate::store::SessionStore;

/// Turns attempted per conversational step: one initial listen plus two
/// retries.
const MAX_TURN_RETRIES: usize = 2;

const SAY_INITIAL_LISTEN: Duration = Duration::from_secs(15);
const SAY_RETRY_LISTEN: Duration = Duration::from_secs(10);
const COLLECT_INITIAL_LISTEN: Duration = Duration::from_secs(20);
const COLLECT_RETRY_LISTEN: Duration = Duration::from_secs(15);

const DEFAULT_WAIT: Duration = Duration::from_secs(1);
const DEFAULT_DTMF_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_DTMF_MAX_DIGITS: usize = 1;
const DEFAULT_DTMF_TERMINATOR: char = '#';

pub struct InterpreterDeps {
    pub media: Arc<dyn CallMedia>,
    pub llm: Arc<dyn LlmPort>,
    pub store: Arc<dyn SessionStore>,
}

/// How a session ended. The engine maps this onto session and call record
/// statuses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Failed(String),
    Timeout(String),
    Cancelled,
}

/// Step-level abort: either the stop signal fired or the step failed hard.
enum StepAbort {
    Cancelled,
    Fatal(String),
}

impl From<MediaError> for StepAbort {
    fn from(e: MediaError) -> Self {
        match e {
            MediaError::Cancelled => StepAbort::Cancelled,
            other => StepAbort::Fatal(other.to_string()),
        }
    }
}

type StepResult = Result<Option<String>, StepAbort>;

pub async fn run_script(
    script: &Script,
    session: &mut SessionRecord,
    deps: &InterpreterDeps,
    cancel: &CancellationToken,
) -> Outcome {
    let max_duration = chrono::Duration::milliseconds(script.max_duration_ms as i64);
    let mut current = Some(script.start_step_id.clone());
    let mut executed: u32 = 0;

    loop {
        let Some(step_id) = current else {
            info!(
                "[interpreter] {} script completed after {executed} steps",
                session.call_id
            );
            return Outcome::Completed;
        };
        if cancel.is_cancelled() {
            return Outcome::Cancelled;
        }
        if Utc::now() - session.start_time >= max_duration {
            warn!("[interpreter] {} exceeded max duration", session.call_id);
            return Outcome::Timeout("Script execution timeout".to_string());
        }
        if executed >= script.max_steps {
            warn!("[interpreter] {} exceeded max step count", session.call_id);
            return Outcome::Timeout("Max step count reached".to_string());
        }

        let Some(step) = script.step(&step_id) else {
            let message = format!("Next step not found: {step_id}");
            warn!("[interpreter] {} {message}", session.call_id);
            return Outcome::Failed(message);
        };

        info!(
            "[interpreter] {} executing step {:?} ({})",
            session.call_id,
            step.id,
            step.step_type().as_str()
        );
        session.current_step_id = Some(step.id.clone());
        let _ = deps.store.save_session(session).await;

        let mut exec = StepExecution::begin(&session.session_id, &step.id, step.step_type());
        let result = execute_step(script, step, session, deps, &mut exec).await;
        executed += 1;
        session.total_steps = executed;

        let next = match result {
            Ok(next) => {
                // record/transfer placeholders mark themselves skipped
                if exec.status == crate::entities::StepStatus::Running {
                    exec.complete(next.as_deref());
                }
                next
            }
            Err(StepAbort::Cancelled) => {
                exec.fail("session stopped");
                let _ = deps.store.record_step(&exec).await;
                return Outcome::Cancelled;
            }
            Err(StepAbort::Fatal(message)) => {
                exec.fail(&message);
                let _ = deps.store.record_step(&exec).await;
                let message = format!("Step execution failed: {message}");
                warn!("[interpreter] {} {message}", session.call_id);
                return Outcome::Failed(message);
            }
        };
        let _ = deps.store.record_step(&exec).await;
        let _ = deps.store.save_session(session).await;

        current = next;
    }
}

async fn execute_step(
    script: &Script,
    step: &Step,
    session: &mut SessionRecord,
    deps: &InterpreterDeps,
    exec: &mut StepExecution,
) -> StepResult {
    match &step.data {
        StepData::SayAndListen(data) => {
            say_and_listen(script, step, data, session, deps, exec).await
        }
        StepData::PlayAudio(data) => {
            let text = data
                .audio_text
                .as_deref()
                .filter(|t| !t.is_empty())
                .or(data.welcome.as_deref())
                .filter(|t| !t.is_empty())
                .ok_or_else(|| StepAbort::Fatal("no audio text provided".to_string()))?;
            let voice = voice_for(script, data.speaker_id.as_deref());
            deps.media.speak(text.to_string(), voice).await?;
            exec.tts_text = Some(text.to_string());
            Ok(data.next_step.clone())
        }
        StepData::Collect(data) => collect(script, step, data, session, deps, exec).await,
        StepData::Condition(data) => {
            let result = conditions::evaluate(&data.condition, session);
            exec.input = Some(data.condition.clone());
            exec.output = Some(format!("condition result: {result}"));
            info!(
                "[interpreter] {} condition {:?} -> {result}",
                session.call_id, data.condition
            );
            Ok(if result {
                data.true_next.clone()
            } else {
                data.false_next.clone()
            })
        }
        StepData::Wait(data) => {
            let duration = data
                .wait_time
                .filter(|&ms| ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_WAIT);
            deps.media.wait(duration).await?;
            Ok(data.next_step.clone())
        }
        StepData::Dtmf(data) => dtmf(script, step, data, session, deps, exec).await,
        StepData::Record(data) => {
            // Placeholder: the dedicated record step is not implemented;
            // the call-wide recording sink already captures the audio.
            exec.skip(data.next_step.as_deref());
            Ok(data.next_step.clone())
        }
        StepData::Transfer(data) => {
            // Placeholder: transfer is not implemented.
            exec.skip(data.next_step.as_deref());
            Ok(data.next_step.clone())
        }
        StepData::Hangup => {
            info!("[interpreter] {} hangup step", session.call_id);
            Ok(None)
        }
    }
}

fn voice_for(script: &Script, step_voice: Option<&str>) -> String {
    step_voice
        .filter(|v| !v.is_empty())
        .unwrap_or(&script.speaker_id)
        .to_string()
}

/// One listen attempt that treats recognition failures as silence (they are
/// retried by the turn loop) and propagates cancellation.
async fn listen_or_empty(
    media: &dyn CallMedia,
    call_id: &str,
    window: Duration,
) -> Result<String, StepAbort> {
    match media.listen(window).await {
        Ok(t) => Ok(t),
        Err(MediaError::Cancelled) => Err(StepAbort::Cancelled),
        Err(e) => {
            warn!("[interpreter] {call_id} listen failed: {e}");
            Ok(String::new())
        }
    }
}

async fn say_and_listen(
    script: &Script,
    step: &Step,
    data: &SayAndListenData,
    session: &mut SessionRecord,
    deps: &InterpreterDeps,
    exec: &mut StepExecution,
) -> StepResult {
    let voice = voice_for(script, data.speaker_id.as_deref());

    if let Some(welcome) = data.welcome.as_deref().filter(|w| !w.is_empty()) {
        deps.media.speak(welcome.to_string(), voice.clone()).await?;
        exec.tts_text = Some(welcome.to_string());
    }

    let mut got_input = false;
    let mut attempt = 0usize;
    while attempt <= MAX_TURN_RETRIES && !got_input {
        let window = if attempt == 0 {
            SAY_INITIAL_LISTEN
        } else {
            SAY_RETRY_LISTEN
        };
        info!(
            "[interpreter] {} waiting for user (attempt {})",
            session.call_id,
            attempt + 1
        );
        let user_text = listen_or_empty(deps.media.as_ref(), &session.call_id, window).await?;

        if user_text.is_empty() {
            attempt += 1;
            if attempt <= MAX_TURN_RETRIES {
                let prompt = text::SAY_RETRY_PROMPTS[attempt - 1];
                if let Err(e) = deps.media.speak(prompt.to_string(), voice.clone()).await {
                    match e {
                        MediaError::Cancelled => return Err(StepAbort::Cancelled),
                        other => warn!(
                            "[interpreter] {} retry prompt failed: {other}",
                            session.call_id
                        ),
                    }
                }
            }
            continue;
        }

        got_input = true;
        info!(
            "[interpreter] {} user said {:?}",
            session.call_id, user_text
        );
        session.add_message(Role::User, user_text.clone(), &step.id);
        exec.user_input = Some(user_text);

        let prompt = text::compose_prompt(data.prompt.as_deref().unwrap_or(""), &session.conversation);
        let reply = match deps.llm.query(prompt).await {
            Ok(reply) => reply,
            Err(e) => {
                // The dialog must end gracefully even with the model down.
                warn!("[interpreter] {} llm failed: {e}", session.call_id);
                LlmReply::text(text::fallback_reply(session.conversation.len()))
            }
        };

        session.add_message(Role::Assistant, reply.text.clone(), &step.id);
        exec.ai_response = Some(reply.text.clone());
        deps.media.speak(reply.text.clone(), voice.clone()).await?;
        let _ = deps.store.save_session(session).await;

        match reply.action {
            Some(LlmAction::Hangup { reason }) => {
                info!("[interpreter] {} model hangup: {reason}", session.call_id);
                exec.output = Some(format!("hangup: {reason}"));
                exec.complete(None);
                return Ok(None);
            }
            Some(LlmAction::Refer { target }) => {
                info!("[interpreter] {} model refer to {target}", session.call_id);
                session.set_context("refer_target", Value::String(target));
            }
            None => {}
        }
        if text::is_farewell(&reply.text) {
            info!("[interpreter] {} assistant said goodbye", session.call_id);
            break;
        }
    }

    if got_input {
        session.context.remove("no_user_response");
    } else {
        warn!(
            "[interpreter] {} no user input after {attempt} attempts",
            session.call_id
        );
        session.set_context("no_user_response", Value::Bool(true));
        session.set_context("retry_count", Value::from(attempt as u64));
    }

    Ok(data.next_step.clone())
}

async fn collect(
    script: &Script,
    step: &Step,
    data: &CollectData,
    session: &mut SessionRecord,
    deps: &InterpreterDeps,
    exec: &mut StepExecution,
) -> StepResult {
    let voice = voice_for(script, data.speaker_id.as_deref());

    if let Some(welcome) = data.welcome.as_deref().filter(|w| !w.is_empty()) {
        deps.media.speak(welcome.to_string(), voice.clone()).await?;
        exec.tts_text = Some(welcome.to_string());
    }

    let mut attempt = 0usize;
    while attempt <= MAX_TURN_RETRIES {
        let window = if attempt == 0 {
            COLLECT_INITIAL_LISTEN
        } else {
            COLLECT_RETRY_LISTEN
        };
        let user_text = listen_or_empty(deps.media.as_ref(), &session.call_id, window).await?;

        if !user_text.is_empty() {
            session.add_message(Role::User, user_text.clone(), &step.id);
            exec.user_input = Some(user_text.clone());
            if let Some(key) = data.collect_key.as_deref().filter(|k| !k.is_empty()) {
                session.set_context(key, Value::String(user_text.clone()));
            }
            info!(
                "[interpreter] {} collected {:?} (key {:?})",
                session.call_id, user_text, data.collect_key
            );
            return Ok(data.next_step.clone());
        }

        attempt += 1;
        if attempt <= MAX_TURN_RETRIES {
            let prompt = text::COLLECT_RETRY_PROMPTS[attempt - 1];
            if let Err(e) = deps.media.speak(prompt.to_string(), voice.clone()).await {
                match e {
                    MediaError::Cancelled => return Err(StepAbort::Cancelled),
                    other => warn!(
                        "[interpreter] {} collect retry prompt failed: {other}",
                        session.call_id
                    ),
                }
            }
        }
    }

    warn!(
        "[interpreter] {} collect failed after {attempt} attempts",
        session.call_id
    );
    session.set_context("collect_failed", Value::Bool(true));
    session.set_context("collect_retry_count", Value::from(attempt as u64));

    // A dedicated failure branch wins over the normal successor.
    Ok(data
        .false_next
        .clone()
        .filter(|s| !s.is_empty())
        .or_else(|| data.next_step.clone()))
}

async fn dtmf(
    script: &Script,
    step: &Step,
    data: &DtmfData,
    session: &mut SessionRecord,
    deps: &InterpreterDeps,
    exec: &mut StepExecution,
) -> StepResult {
    let voice = voice_for(script, data.speaker_id.as_deref());

    if let Some(prompt) = data.dtmf_prompt.as_deref().filter(|p| !p.is_empty()) {
        deps.media.speak(prompt.to_string(), voice).await?;
        exec.tts_text = Some(prompt.to_string());
    }

    let timeout = data
        .dtmf_timeout
        .filter(|&ms| ms > 0)
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_DTMF_TIMEOUT);
    let max_digits = data
        .dtmf_max_digits
        .filter(|&n| n > 0)
        .unwrap_or(DEFAULT_DTMF_MAX_DIGITS);
    let terminator = data
        .dtmf_terminator
        .as_deref()
        .and_then(|t| t.chars().next())
        .unwrap_or(DEFAULT_DTMF_TERMINATOR);

    let input = deps
        .media
        .collect_dtmf(timeout, max_digits, terminator)
        .await?;

    if input.is_empty() {
        info!("[interpreter] {} no DTMF input", session.call_id);
        return Ok(data.false_next.clone());
    }

    info!("[interpreter] {} DTMF input {:?}", session.call_id, input);
    session.add_message(Role::User, format!("DTMF: {input}"), &step.id);
    exec.user_input = Some(input.clone());

    if let Some(target) = data
        .dtmf_options
        .as_ref()
        .and_then(|options| options.get(&input))
        .filter(|t| !t.is_empty())
    {
        return Ok(Some(target.clone()));
    }
    Ok(data.next_step.clone())
}
