//! The per-call media controller. Owns the RTP sender, the inbound feed and
//! the stop signal, and exposes the operations the interpreter drives:
//! speak, listen, collect DTMF and cancellable waits. Operations within one
//! session are strictly sequential; the stop signal interrupts any of them
//! promptly.

use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::ai::asr::transcribe_pcm;
use crate::ai::{AiFuture, AsrError, AsrPort, TtsError, TtsPort};
use crate::media::feed::MediaFeed;
use crate::rtp::endpoint::{PaceOutcome, RtpSender};
use crate::vad::{TurnDetector, TurnState, DEFAULT_ONSET_TIMEOUT};

/// Granularity of waits on the feed so deadlines and cancellation are
/// observed promptly.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("operation cancelled")]
    Cancelled,
    #[error(transparent)]
    Tts(#[from] TtsError),
    #[error("recognition failed: {0}")]
    Asr(#[from] AsrError),
}

/// The interpreter's view of a call's media. `MediaSession` is the real
/// implementation; tests substitute scripted ones.
pub trait CallMedia: Send + Sync {
    /// Synthesise and play text; returns once the last frame went out.
    fn speak(&self, text: String, voice_id: String) -> AiFuture<Result<(), MediaError>>;
    /// One turn of listening: VAD then ASR. `Ok("")` means no usable speech.
    fn listen(&self, max_wait: Duration) -> AiFuture<Result<String, MediaError>>;
    /// Drain DTMF digits until terminator, digit bound or deadline.
    fn collect_dtmf(
        &self,
        max_wait: Duration,
        max_digits: usize,
        terminator: char,
    ) -> AiFuture<Result<String, MediaError>>;
    /// Cancellable sleep.
    fn wait(&self, duration: Duration) -> AiFuture<Result<(), MediaError>>;
}

struct Inner {
    call_id: String,
    feed: MediaFeed,
    sender: tokio::sync::Mutex<RtpSender>,
    cancel: CancellationToken,
    tts: Arc<dyn TtsPort>,
    asr: Arc<dyn AsrPort>,
}

#[derive(Clone)]
pub struct MediaSession {
    inner: Arc<Inner>,
}

impl MediaSession {
    pub fn new(
        call_id: String,
        feed: MediaFeed,
        sender: RtpSender,
        cancel: CancellationToken,
        tts: Arc<dyn TtsPort>,
        asr: Arc<dyn AsrPort>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                call_id,
                feed,
                sender: tokio::sync::Mutex::new(sender),
                cancel,
                tts,
                asr,
            }),
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }
}

impl Inner {
    async fn speak(&self, text: String, voice_id: String) -> Result<(), MediaError> {
        if text.is_empty() {
            return Ok(());
        }
        if self.cancel.is_cancelled() {
            return Err(MediaError::Cancelled);
        }
        info!("[media] {} speak {:?} voice={}", self.call_id, text, voice_id);

        let synthesis = self.tts.synthesize(text, voice_id);
        let pcm = tokio::select! {
            _ = self.cancel.cancelled() => return Err(MediaError::Cancelled),
            result = synthesis => result?,
        };

        let mut sender = self.sender.lock().await;
        match sender.send_pcm(&pcm, &self.cancel).await {
            PaceOutcome::Completed => Ok(()),
            PaceOutcome::Cancelled => Err(MediaError::Cancelled),
        }
    }

    async fn listen(&self, max_wait: Duration) -> Result<String, MediaError> {
        if self.cancel.is_cancelled() {
            return Err(MediaError::Cancelled);
        }
        info!(
            "[media] {} listening (window {} ms)",
            self.call_id,
            max_wait.as_millis()
        );

        // A turn starts from silence; stale audio belongs to the previous
        // operation.
        self.feed.clear_audio();
        let onset_timeout = DEFAULT_ONSET_TIMEOUT.min(max_wait);
        let mut detector = TurnDetector::new(onset_timeout);
        let deadline = Instant::now() + max_wait;

        loop {
            let buffered = self.feed.take_audio();
            if !buffered.is_empty() && detector.push(&buffered) != TurnState::Listening {
                break;
            }
            if Instant::now() >= deadline {
                break;
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(MediaError::Cancelled),
                _ = self.feed.wait_audio(POLL_INTERVAL) => {}
            }
        }

        if detector.state() == TurnState::NoSpeech || !detector.onset_seen() {
            info!("[media] {} no speech in listen window", self.call_id);
            return Ok(String::new());
        }
        if !detector.enough_for_asr() {
            info!("[media] {} utterance too short for recognition", self.call_id);
            return Ok(String::new());
        }

        let audio = detector.take_audio();
        match transcribe_pcm(self.asr.as_ref(), &self.call_id, &audio).await {
            Ok(text) => Ok(text),
            // A recognizer that never finalises is the same as silence to
            // the dialog; the turn loop retries.
            Err(AsrError::Timeout) => {
                warn!("[media] {} recognition timed out", self.call_id);
                Ok(String::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn collect_dtmf(
        &self,
        max_wait: Duration,
        max_digits: usize,
        terminator: char,
    ) -> Result<String, MediaError> {
        if self.cancel.is_cancelled() {
            return Err(MediaError::Cancelled);
        }
        info!(
            "[media] {} collecting dtmf (max {max_digits}, terminator {terminator:?})",
            self.call_id
        );

        let deadline = Instant::now() + max_wait;
        let mut digits = String::new();
        loop {
            while let Some(digit) = self.feed.pop_dtmf() {
                if digit == terminator {
                    return Ok(digits);
                }
                digits.push(digit);
                if digits.len() >= max_digits {
                    return Ok(digits);
                }
            }
            if Instant::now() >= deadline {
                return Ok(digits);
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(MediaError::Cancelled),
                _ = self.feed.wait_dtmf(POLL_INTERVAL) => {}
            }
        }
    }

    async fn wait(&self, duration: Duration) -> Result<(), MediaError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(MediaError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

impl CallMedia for MediaSession {
    fn speak(&self, text: String, voice_id: String) -> AiFuture<Result<(), MediaError>> {
        let inner = self.inner.clone();
        Box::pin(async move { inner.speak(text, voice_id).await })
    }

    fn listen(&self, max_wait: Duration) -> AiFuture<Result<String, MediaError>> {
        let inner = self.inner.clone();
        Box::pin(async move { inner.listen(max_wait).await })
    }

    fn collect_dtmf(
        &self,
        max_wait: Duration,
        max_digits: usize,
        terminator: char,
    ) -> AiFuture<Result<String, MediaError>> {
        let inner = self.inner.clone();
        Box::pin(async move { inner.collect_dtmf(max_wait, max_digits, terminator).await })
    }

    fn wait(&self, duration: Duration) -> AiFuture<Result<(), MediaError>> {
        let inner = self.inner.clone();
        Box::pin(async move { inner.wait(duration).await })
    }
}
