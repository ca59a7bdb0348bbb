//! Text-to-speech port and the HTTP adapter. Synthesised audio comes back
//! as 8 kHz mono linear PCM ready for the RTP pacer; quiet vendor output is
//! lifted towards a nominal telephone level before it leaves the adapter.

use std::time::Duration;

use log::debug;
use serde::Serialize;

use crate::ai::error::TtsError;
use crate::ai::AiFuture;

/// Peak the amplification aims for.
const NOMINAL_PEAK: i16 = 8000;

/// Amplification never exceeds this factor.
const MAX_AMPLIFY: f64 = 4.0;

/// Per-synthesis deadline.
pub const SYNTHESIS_TIMEOUT: Duration = Duration::from_secs(30);

pub trait TtsPort: Send + Sync {
    fn synthesize(&self, text: String, voice_id: String) -> AiFuture<Result<Vec<i16>, TtsError>>;
}

/// Lift quiet audio towards the nominal peak, at most 4×. Audio already at
/// or above the nominal peak, and all-zero audio, pass through untouched.
pub fn amplify_to_nominal(samples: &mut [i16]) {
    let peak = samples.iter().map(|&s| (s as i32).abs()).max().unwrap_or(0);
    if peak == 0 || peak >= NOMINAL_PEAK as i32 {
        return;
    }
    let ratio = (NOMINAL_PEAK as f64 / peak as f64).min(MAX_AMPLIFY);
    for s in samples.iter_mut() {
        *s = ((*s as f64) * ratio) as i16;
    }
    debug!("[tts] amplified audio by {ratio:.2}x (peak was {peak})");
}

#[derive(Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
    voice: &'a str,
    #[serde(rename = "sampleRate")]
    sample_rate: u32,
    codec: &'a str,
}

/// HTTP vendor adapter: POST the text, receive raw little-endian 16-bit PCM.
pub struct HttpTts {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTts {
    pub fn new(endpoint: String) -> Result<Self, TtsError> {
        let client = reqwest::Client::builder()
            .timeout(SYNTHESIS_TIMEOUT)
            .build()
            .map_err(|e| TtsError::SynthesisFailed(e.to_string()))?;
        Ok(Self { client, endpoint })
    }
}

impl TtsPort for HttpTts {
    fn synthesize(&self, text: String, voice_id: String) -> AiFuture<Result<Vec<i16>, TtsError>> {
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        Box::pin(async move {
            let body = SynthesisRequest {
                text: &text,
                voice: &voice_id,
                sample_rate: crate::audio::SAMPLE_RATE,
                codec: "pcm",
            };
            let resp = client
                .post(&endpoint)
                .json(&body)
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        TtsError::Timeout
                    } else {
                        TtsError::SynthesisFailed(e.to_string())
                    }
                })?;
            if !resp.status().is_success() {
                return Err(TtsError::SynthesisFailed(format!(
                    "vendor returned {}",
                    resp.status()
                )));
            }
            let bytes = resp
                .bytes()
                .await
                .map_err(|e| TtsError::SynthesisFailed(e.to_string()))?;
            if bytes.len() < 2 {
                return Err(TtsError::EmptyAudio);
            }

            let mut samples: Vec<i16> = bytes
                .chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]]))
                .collect();
            amplify_to_nominal(&mut samples);
            debug!("[tts] synthesized {} samples for {text:?}", samples.len());
            Ok(samples)
        })
    }
}
