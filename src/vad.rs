//! Amplitude-threshold turn detection tuned for 8 kHz telephony. The
//! detector consumes 20 ms frames and decides when the caller started and
//! finished speaking; wall-clock accounting is entirely frame-based so the
//! logic is deterministic under test.
//!
//! Thresholds match the production tuning for narrow-band calls: sample
//! amplitude 500 to beat line noise, a frame counts as speech when at
//! least 20% of its samples clear that bar, end of utterance after 2 s of
//! accumulated silence once at least 2 s were spoken, 10 s hard cap,
//! 1 s minimum before audio is worth sending to ASR.

use std::time::Duration;

use crate::audio::{pcm_duration_ms, FRAME_SAMPLES};

/// |sample| at or below this is silence.
pub const SILENCE_THRESHOLD: i16 = 500;

/// Fraction of samples in a frame that must exceed the threshold for the
/// frame to count as speech.
pub const VALID_FRAME_RATIO: f64 = 0.2;

/// Default wait for the caller to start speaking.
pub const DEFAULT_ONSET_TIMEOUT: Duration = Duration::from_secs(8);

/// Accumulated silence after onset that ends the utterance.
pub const END_SILENCE: Duration = Duration::from_secs(2);

/// Minimum utterance length before silence may end it.
pub const MIN_UTTERANCE: Duration = Duration::from_secs(2);

/// Hard cap on a single utterance.
pub const MAX_UTTERANCE: Duration = Duration::from_secs(10);

/// Minimum audio worth sending to ASR.
pub const MIN_ASR_AUDIO: Duration = Duration::from_secs(1);

/// Per-frame verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    /// Still waiting for onset or for the utterance to finish.
    Listening,
    /// No speech before the onset timeout; the window is over.
    NoSpeech,
    /// Utterance finished (end silence or hard cap).
    Complete,
}

pub struct TurnDetector {
    onset_timeout: Duration,
    samples: Vec<i16>,
    onset_seen: bool,
    frames_total: u64,
    silent_run_ms: u64,
    utterance_ms: u64,
    state: TurnState,
}

impl TurnDetector {
    pub fn new(onset_timeout: Duration) -> Self {
        Self {
            onset_timeout,
            samples: Vec::new(),
            onset_seen: false,
            frames_total: 0,
            silent_run_ms: 0,
            utterance_ms: 0,
            state: TurnState::Listening,
        }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn onset_seen(&self) -> bool {
        self.onset_seen
    }

    /// Feed decoded PCM from the wire. Arbitrary slice sizes are accepted
    /// and re-framed internally.
    pub fn push(&mut self, pcm: &[i16]) -> TurnState {
        if self.state != TurnState::Listening {
            return self.state;
        }
        // Frames preceding onset are retained: the caller may have started
        // mid-frame and ASR copes better with a little leading context.
        self.samples.extend_from_slice(pcm);

        while self.state == TurnState::Listening {
            let framed = self.frames_total as usize * FRAME_SAMPLES;
            if self.samples.len() < framed + FRAME_SAMPLES {
                break;
            }
            let frame = &self.samples[framed..framed + FRAME_SAMPLES];
            let is_speech = frame_is_speech(frame);
            self.frames_total += 1;
            self.advance(is_speech);
        }
        self.state
    }

    fn advance(&mut self, is_speech: bool) {
        let frame_ms = pcm_duration_ms(FRAME_SAMPLES);

        if !self.onset_seen {
            if is_speech {
                self.onset_seen = true;
                self.silent_run_ms = 0;
                self.utterance_ms = frame_ms;
            } else if self.frames_total * frame_ms >= self.onset_timeout.as_millis() as u64 {
                self.state = TurnState::NoSpeech;
            }
            return;
        }

        self.utterance_ms += frame_ms;
        if is_speech {
            self.silent_run_ms = 0;
        } else {
            self.silent_run_ms += frame_ms;
        }

        let spoken_long_enough = self.utterance_ms >= MIN_UTTERANCE.as_millis() as u64;
        let silence_ended_it = self.silent_run_ms >= END_SILENCE.as_millis() as u64;
        if (spoken_long_enough && silence_ended_it)
            || self.utterance_ms >= MAX_UTTERANCE.as_millis() as u64
        {
            self.state = TurnState::Complete;
        }
    }

    /// The captured window. Meaningful once `Complete`; empty on `NoSpeech`.
    pub fn take_audio(self) -> Vec<i16> {
        match self.state {
            TurnState::NoSpeech => Vec::new(),
            _ => self.samples,
        }
    }

    /// True when the capture is long enough to bother ASR with.
    pub fn enough_for_asr(&self) -> bool {
        pcm_duration_ms(self.samples.len()) >= MIN_ASR_AUDIO.as_millis() as u64
    }
}

fn frame_is_speech(frame: &[i16]) -> bool {
    if frame.is_empty() {
        return false;
    }
    let loud = frame
        .iter()
        .filter(|&&s| s > SILENCE_THRESHOLD || s < -SILENCE_THRESHOLD)
        .count();
    (loud as f64 / frame.len() as f64) > VALID_FRAME_RATIO
}

#[cfg(test)]
mod tests {
    use super::*;

    fn speech_frame() -> Vec<i16> {
        // Half the samples well above the threshold.
        (0..FRAME_SAMPLES)
            .map(|i| if i % 2 == 0 { 4000 } else { 0 })
            .collect()
    }

    fn silence_frame() -> Vec<i16> {
        vec![100; FRAME_SAMPLES]
    }

    fn frames(detector: &mut TurnDetector, frame: &[i16], count: usize) -> TurnState {
        let mut state = detector.state();
        for _ in 0..count {
            state = detector.push(frame);
            if state != TurnState::Listening {
                break;
            }
        }
        state
    }

    #[test]
    fn frame_classification_uses_the_ratio() {
        assert!(frame_is_speech(&speech_frame()));
        assert!(!frame_is_speech(&silence_frame()));
        // exactly 20% loud is not enough; strictly more is
        let mut borderline = vec![0i16; FRAME_SAMPLES];
        for s in borderline.iter_mut().take(FRAME_SAMPLES / 5) {
            *s = 1000;
        }
        assert!(!frame_is_speech(&borderline));
        borderline[FRAME_SAMPLES / 5] = -1000;
        assert!(frame_is_speech(&borderline));
    }

    #[test]
    fn silence_until_the_onset_timeout_reports_no_speech() {
        let mut det = TurnDetector::new(Duration::from_secs(8));
        // 8 s = 400 frames of silence
        let state = frames(&mut det, &silence_frame(), 400);
        assert_eq!(state, TurnState::NoSpeech);
        assert!(det.take_audio().is_empty());
    }

    #[test]
    fn utterance_ends_after_two_seconds_of_silence() {
        let mut det = TurnDetector::new(Duration::from_secs(8));
        // 2.5 s of speech, then silence
        assert_eq!(frames(&mut det, &speech_frame(), 125), TurnState::Listening);
        let state = frames(&mut det, &silence_frame(), 100);
        assert_eq!(state, TurnState::Complete);
        assert!(det.enough_for_asr());
        // 2.5 s speech + 2 s closing silence
        assert_eq!(det.take_audio().len(), (125 + 100) * FRAME_SAMPLES);
    }

    #[test]
    fn closing_silence_must_fully_accumulate() {
        let mut det = TurnDetector::new(Duration::from_secs(8));
        assert_eq!(frames(&mut det, &speech_frame(), 25), TurnState::Listening);
        // 1.98 s of silence is not yet the end
        assert_eq!(frames(&mut det, &silence_frame(), 99), TurnState::Listening);
        // the 100th silent frame crosses 2 s and closes the turn
        assert_eq!(det.push(&silence_frame()), TurnState::Complete);
    }

    #[test]
    fn hard_cap_closes_a_monologue() {
        let mut det = TurnDetector::new(Duration::from_secs(8));
        let state = frames(&mut det, &speech_frame(), 600);
        assert_eq!(state, TurnState::Complete);
    }

    #[test]
    fn pre_onset_audio_is_retained() {
        let mut det = TurnDetector::new(Duration::from_secs(8));
        frames(&mut det, &silence_frame(), 10);
        frames(&mut det, &speech_frame(), 125);
        frames(&mut det, &silence_frame(), 100);
        assert_eq!(det.state(), TurnState::Complete);
        assert_eq!(det.take_audio().len(), (10 + 125 + 100) * FRAME_SAMPLES);
    }

    #[test]
    fn odd_slice_sizes_are_reframed() {
        let mut det = TurnDetector::new(Duration::from_secs(1));
        let audio = speech_frame();
        // push in 100-sample slices
        for chunk in audio.iter().copied().collect::<Vec<_>>().chunks(100).cycle().take(300) {
            if det.push(chunk) != TurnState::Listening {
                break;
            }
        }
        assert!(det.onset_seen());
    }
}
