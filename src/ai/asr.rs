//! Session-oriented streaming speech recognition. A vendor adapter opens an
//! `AsrStream` per listen window; the caller feeds little-endian PCM bytes
//! in real-time-sized chunks, signals end of audio and awaits the final
//! transcript. Partials are surfaced on a side channel for logging.

use std::time::Duration;

use log::{debug, info};
use tokio::sync::{mpsc, oneshot};

use crate::ai::error::AsrError;
use crate::ai::AiFuture;
use crate::audio::SAMPLES_PER_MS;

/// Bytes per streamed chunk (~100 ms of 16-bit PCM at 8 kHz).
pub const CHUNK_BYTES: usize = 1600;

/// Pause between chunks to emulate real-time capture towards the vendor.
pub const CHUNK_INTERVAL: Duration = Duration::from_millis(50);

/// Deadline for the final transcript after end-of-audio.
pub const FINAL_TIMEOUT: Duration = Duration::from_secs(15);

/// Audio shorter than this never reaches the recognizer.
pub const MIN_AUDIO_MS: u64 = 1000;

/// Audio beyond this is truncated before streaming (10 s).
pub const MAX_AUDIO_SAMPLES: usize = 80_000;

pub trait AsrPort: Send + Sync {
    fn open(&self, dialog_id: String) -> AiFuture<Result<AsrStream, AsrError>>;
}

enum StreamInput {
    Audio(Vec<u8>),
    End,
}

/// Caller half of one recognition session.
pub struct AsrStream {
    input_tx: mpsc::Sender<StreamInput>,
    partial_rx: mpsc::UnboundedReceiver<String>,
    final_rx: oneshot::Receiver<Result<String, AsrError>>,
}

/// Adapter half: the vendor task consumes inputs and resolves the final
/// transcript (partials optional).
pub struct AsrBackend {
    pub input_rx: mpsc::Receiver<StreamInput>,
    pub partial_tx: mpsc::UnboundedSender<String>,
    pub final_tx: oneshot::Sender<Result<String, AsrError>>,
}

impl AsrBackend {
    /// Drain inputs into one PCM byte buffer until end-of-audio.
    pub async fn collect_audio(&mut self) -> Vec<u8> {
        let mut audio = Vec::new();
        while let Some(input) = self.input_rx.recv().await {
            match input {
                StreamInput::Audio(bytes) => audio.extend_from_slice(&bytes),
                StreamInput::End => break,
            }
        }
        audio
    }
}

impl AsrStream {
    pub fn pair() -> (AsrStream, AsrBackend) {
        let (input_tx, input_rx) = mpsc::channel(64);
        let (partial_tx, partial_rx) = mpsc::unbounded_channel();
        let (final_tx, final_rx) = oneshot::channel();
        (
            AsrStream {
                input_tx,
                partial_rx,
                final_rx,
            },
            AsrBackend {
                input_rx,
                partial_tx,
                final_tx,
            },
        )
    }

    pub async fn send(&self, bytes: Vec<u8>) -> Result<(), AsrError> {
        self.input_tx
            .send(StreamInput::Audio(bytes))
            .await
            .map_err(|_| AsrError::ServiceUnavailable("recognizer closed".into()))
    }

    pub async fn send_end(&self) -> Result<(), AsrError> {
        self.input_tx
            .send(StreamInput::End)
            .await
            .map_err(|_| AsrError::ServiceUnavailable("recognizer closed".into()))
    }

    pub fn try_partial(&mut self) -> Option<String> {
        self.partial_rx.try_recv().ok()
    }

    /// Await the final transcript, bounded by `FINAL_TIMEOUT`.
    pub async fn final_result(self) -> Result<String, AsrError> {
        match tokio::time::timeout(FINAL_TIMEOUT, self.final_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(AsrError::ServiceUnavailable("recognizer dropped".into())),
            Err(_) => Err(AsrError::Timeout),
        }
    }
}

/// Stream a PCM capture through a recognition session: short audio returns
/// empty without contacting the adapter, long audio is truncated, chunks go
/// out at a real-time-ish cadence, and the final transcript is awaited.
pub async fn transcribe_pcm(
    port: &dyn AsrPort,
    dialog_id: &str,
    pcm: &[i16],
) -> Result<String, AsrError> {
    if (pcm.len() / SAMPLES_PER_MS) < MIN_AUDIO_MS as usize {
        info!(
            "[asr] {} samples is below the {MIN_AUDIO_MS} ms floor, skipping",
            pcm.len()
        );
        return Ok(String::new());
    }
    let pcm = if pcm.len() > MAX_AUDIO_SAMPLES {
        debug!("[asr] truncating {} samples to {MAX_AUDIO_SAMPLES}", pcm.len());
        &pcm[..MAX_AUDIO_SAMPLES]
    } else {
        pcm
    };

    let mut bytes = Vec::with_capacity(pcm.len() * 2);
    for &sample in pcm {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }

    let mut stream = port.open(dialog_id.to_string()).await?;
    for chunk in bytes.chunks(CHUNK_BYTES) {
        stream.send(chunk.to_vec()).await?;
        tokio::time::sleep(CHUNK_INTERVAL).await;
    }
    stream.send_end().await?;

    while let Some(partial) = stream.try_partial() {
        debug!("[asr] partial for {dialog_id}: {partial:?}");
    }

    let text = stream.final_result().await?;
    info!("[asr] final for {dialog_id}: {text:?}");
    Ok(text)
}

/// HTTP vendor adapter: buffers the stream and posts one recognition
/// request at end-of-audio, resolving the final transcript from the JSON
/// `text` field.
pub struct HttpAsr {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpAsr {
    pub fn new(endpoint: String) -> Result<Self, AsrError> {
        let client = reqwest::Client::builder()
            .timeout(FINAL_TIMEOUT)
            .build()
            .map_err(|e| AsrError::ServiceUnavailable(e.to_string()))?;
        Ok(Self { client, endpoint })
    }
}

#[derive(serde::Deserialize)]
struct RecognitionResponse {
    text: String,
}

impl AsrPort for HttpAsr {
    fn open(&self, dialog_id: String) -> AiFuture<Result<AsrStream, AsrError>> {
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        Box::pin(async move {
            let (stream, mut backend) = AsrStream::pair();
            tokio::spawn(async move {
                let audio = backend.collect_audio().await;
                debug!("[asr] posting {} bytes for {dialog_id}", audio.len());
                let result = async {
                    let resp = client
                        .post(&endpoint)
                        .header("content-type", "application/octet-stream")
                        .body(audio)
                        .send()
                        .await
                        .map_err(|e| AsrError::TranscriptionFailed(e.to_string()))?;
                    if !resp.status().is_success() {
                        return Err(AsrError::TranscriptionFailed(format!(
                            "vendor returned {}",
                            resp.status()
                        )));
                    }
                    let parsed: RecognitionResponse = resp
                        .json()
                        .await
                        .map_err(|e| AsrError::TranscriptionFailed(e.to_string()))?;
                    Ok(parsed.text)
                }
                .await;
                let _ = backend.final_tx.send(result);
            });
            Ok(stream)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Echoes a fixed transcript after collecting the whole stream.
    struct FixedAsr(String);

    impl AsrPort for FixedAsr {
        fn open(&self, _dialog_id: String) -> AiFuture<Result<AsrStream, AsrError>> {
            let text = self.0.clone();
            Box::pin(async move {
                let (stream, mut backend) = AsrStream::pair();
                tokio::spawn(async move {
                    let audio = backend.collect_audio().await;
                    let _ = backend
                        .final_tx
                        .send(Ok(format!("{text}:{}", audio.len())));
                });
                Ok(stream)
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn short_audio_skips_the_adapter() {
        struct Panicking;
        impl AsrPort for Panicking {
            fn open(&self, _d: String) -> AiFuture<Result<AsrStream, AsrError>> {
                panic!("adapter must not be contacted for short audio");
            }
        }
        let pcm = vec![1000i16; 7999]; // just under 1 s
        let text = transcribe_pcm(&Panicking, "d1", &pcm).await.unwrap();
        assert_eq!(text, "");
    }

    #[tokio::test(start_paused = true)]
    async fn audio_is_streamed_and_truncated() {
        let pcm = vec![1000i16; MAX_AUDIO_SAMPLES + 8000];
        let text = transcribe_pcm(&FixedAsr("ok".into()), "d2", &pcm).await.unwrap();
        // 80_000 samples → 160_000 bytes reach the backend
        assert_eq!(text, format!("ok:{}", MAX_AUDIO_SAMPLES * 2));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_backend_is_a_service_error() {
        struct Dropping;
        impl AsrPort for Dropping {
            fn open(&self, _d: String) -> AiFuture<Result<AsrStream, AsrError>> {
                Box::pin(async move {
                    let (stream, backend) = AsrStream::pair();
                    drop(backend);
                    Ok(stream)
                })
            }
        }
        let pcm = vec![1000i16; 16000];
        let err = transcribe_pcm(&Dropping, "d3", &pcm).await.unwrap_err();
        assert!(matches!(
            err,
            AsrError::ServiceUnavailable(_) | AsrError::Timeout
        ));
    }
}
