use thiserror::Error;

#[derive(Debug, Error)]
pub enum TtsError {
    #[error("synthesis failed: {0}")]
    SynthesisFailed(String),
    #[error("synthesis returned no audio")]
    EmptyAudio,
    #[error("synthesis timed out")]
    Timeout,
}

#[derive(Debug, Error)]
pub enum AsrError {
    #[error("transcription failed: {0}")]
    TranscriptionFailed(String),
    #[error("recognizer unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("recognition timed out")]
    Timeout,
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("generation failed: {0}")]
    GenerationFailed(String),
    #[error("rate limited")]
    RateLimited,
    #[error("generation timed out")]
    Timeout,
}
