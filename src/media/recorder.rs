//! Recording task: drains inbound PCM copies from the feed into a WAV sink
//! until the feed detaches it, then finalises the file. One per call,
//! started at ACK, flushed on every termination path.

use std::path::PathBuf;

use anyhow::Result;
use log::{info, warn};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

use crate::audio::wav::WavSink;

pub struct Recorder {
    handle: JoinHandle<Result<u64>>,
    path: PathBuf,
}

impl Recorder {
    /// Spawn the writer task. `rx` is the receiver half registered on the
    /// call's media feed; the task ends when the sender side is dropped.
    pub fn spawn(path: PathBuf, mut rx: UnboundedReceiver<Vec<i16>>) -> Result<Self> {
        let mut sink = WavSink::create(&path)?;
        let task_path = path.clone();
        let handle = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Err(e) = sink.push(&frame) {
                    warn!("[recording] write to {} failed: {e}", task_path.display());
                }
            }
            sink.finish()?;
            let samples = sink.samples_written();
            info!(
                "[recording] finalized {} ({samples} samples)",
                task_path.display()
            );
            Ok(samples)
        });
        Ok(Self { handle, path })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Await the writer after the feed detached it; returns the sample
    /// count written.
    pub async fn finish(self) -> Result<u64> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(anyhow::anyhow!("recorder task failed: {e}")),
        }
    }
}
