//! WAV output for call recordings: PCM 16-bit mono at the telephony rate,
//! written through `hound` (44-byte canonical header, little-endian data).

use std::fs::{create_dir_all, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::Result;
use hound::{SampleFormat, WavSpec, WavWriter};

use crate::audio::SAMPLE_RATE;

pub fn telephony_spec() -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

/// Incremental WAV sink. Samples are appended as they arrive from the RTP
/// path; `finish` finalises the header so the file is valid even when the
/// call produced no audio at all.
pub struct WavSink {
    path: PathBuf,
    writer: Option<WavWriter<BufWriter<File>>>,
    samples_written: u64,
}

impl WavSink {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent() {
            create_dir_all(dir)?;
        }
        let writer = WavWriter::create(&path, telephony_spec())?;
        Ok(Self {
            path,
            writer: Some(writer),
            samples_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    pub fn push(&mut self, samples: &[i16]) -> Result<()> {
        if let Some(w) = self.writer.as_mut() {
            for &s in samples {
                w.write_sample(s)?;
            }
            self.samples_written += samples.len() as u64;
        }
        Ok(())
    }

    /// Finalise the header. Idempotent.
    pub fn finish(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer.finalize()?;
        }
        Ok(())
    }
}

impl Drop for WavSink {
    fn drop(&mut self) {
        let _ = self.finish();
    }
}

/// One-shot write of a full PCM buffer, used by tests and tooling.
pub fn write_pcm(path: impl AsRef<Path>, samples: &[i16]) -> Result<()> {
    let mut sink = WavSink::create(path)?;
    sink.push(samples)?;
    sink.finish()
}
