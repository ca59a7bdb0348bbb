//! Per-call fan-out point between the RTP demultiplexer and the media
//! controller. The demultiplexer pushes decoded PCM and DTMF digits in;
//! the listen loop, the DTMF collector and the recorder task consume them.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Notify;

/// Bound on buffered inbound PCM (12 s at 8 kHz). Overflow discards the
/// oldest samples so a stalled consumer never blocks the demultiplexer.
pub const AUDIO_BUFFER_CAP: usize = 96_000;

/// Bound on queued DTMF digits. Overflow discards the oldest digit.
pub const DTMF_QUEUE_CAP: usize = 10;

#[derive(Clone)]
pub struct MediaFeed {
    inner: Arc<FeedInner>,
}

struct FeedInner {
    audio: Mutex<VecDeque<i16>>,
    audio_notify: Notify,
    dtmf: Mutex<VecDeque<char>>,
    dtmf_notify: Notify,
    recorder: Mutex<Option<UnboundedSender<Vec<i16>>>>,
}

impl MediaFeed {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(FeedInner {
                audio: Mutex::new(VecDeque::new()),
                audio_notify: Notify::new(),
                dtmf: Mutex::new(VecDeque::new()),
                dtmf_notify: Notify::new(),
                recorder: Mutex::new(None),
            }),
        }
    }

    /// Append decoded PCM from the wire. Never blocks; oldest samples are
    /// discarded once the buffer bound is reached.
    pub fn push_audio(&self, samples: &[i16]) {
        {
            let mut buf = self.inner.audio.lock().unwrap();
            buf.extend(samples.iter().copied());
            let excess = buf.len().saturating_sub(AUDIO_BUFFER_CAP);
            if excess > 0 {
                buf.drain(..excess);
            }
        }
        if let Some(tx) = self.inner.recorder.lock().unwrap().as_ref() {
            let _ = tx.send(samples.to_vec());
        }
        self.inner.audio_notify.notify_one();
    }

    /// Drain everything buffered so far.
    pub fn take_audio(&self) -> Vec<i16> {
        let mut buf = self.inner.audio.lock().unwrap();
        buf.drain(..).collect()
    }

    /// Drop any buffered audio; a listen window starts from silence.
    pub fn clear_audio(&self) {
        self.inner.audio.lock().unwrap().clear();
    }

    /// Wait until new audio arrives or the timeout elapses.
    pub async fn wait_audio(&self, timeout: Duration) {
        let _ = tokio::time::timeout(timeout, self.inner.audio_notify.notified()).await;
    }

    /// Enqueue a DTMF digit. Never blocks; oldest digit is discarded when
    /// the queue is full.
    pub fn push_dtmf(&self, digit: char) {
        {
            let mut q = self.inner.dtmf.lock().unwrap();
            if q.len() >= DTMF_QUEUE_CAP {
                q.pop_front();
            }
            q.push_back(digit);
        }
        self.inner.dtmf_notify.notify_one();
    }

    pub fn pop_dtmf(&self) -> Option<char> {
        self.inner.dtmf.lock().unwrap().pop_front()
    }

    pub fn clear_dtmf(&self) {
        self.inner.dtmf.lock().unwrap().clear();
    }

    pub async fn wait_dtmf(&self, timeout: Duration) {
        let _ = tokio::time::timeout(timeout, self.inner.dtmf_notify.notified()).await;
    }

    /// Attach the recording task; every subsequent inbound frame is copied
    /// to it in addition to the listen buffer.
    pub fn set_recorder(&self, tx: UnboundedSender<Vec<i16>>) {
        *self.inner.recorder.lock().unwrap() = Some(tx);
    }

    pub fn clear_recorder(&self) {
        *self.inner.recorder.lock().unwrap() = None;
    }
}

impl Default for MediaFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_overflow_discards_oldest() {
        let feed = MediaFeed::new();
        let first: Vec<i16> = vec![1; AUDIO_BUFFER_CAP];
        feed.push_audio(&first);
        feed.push_audio(&[2, 2, 2]);
        let drained = feed.take_audio();
        assert_eq!(drained.len(), AUDIO_BUFFER_CAP);
        assert_eq!(&drained[drained.len() - 3..], &[2, 2, 2]);
        assert_eq!(drained[0], 1);
    }

    #[test]
    fn dtmf_overflow_discards_oldest() {
        let feed = MediaFeed::new();
        for d in "0123456789".chars() {
            feed.push_dtmf(d);
        }
        feed.push_dtmf('#');
        assert_eq!(feed.pop_dtmf(), Some('1'));
        let mut rest = String::new();
        while let Some(d) = feed.pop_dtmf() {
            rest.push(d);
        }
        assert_eq!(rest, "23456789#");
    }

    #[tokio::test]
    async fn recorder_receives_copies() {
        let feed = MediaFeed::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        feed.set_recorder(tx);
        feed.push_audio(&[5, 6, 7]);
        assert_eq!(rx.recv().await.unwrap(), vec![5, 6, 7]);
        assert_eq!(feed.take_audio(), vec![5, 6, 7]);
        feed.clear_recorder();
        feed.push_audio(&[8]);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn wait_audio_returns_after_push() {
        let feed = MediaFeed::new();
        let waiter = feed.clone();
        let handle = tokio::spawn(async move {
            waiter.wait_audio(Duration::from_secs(5)).await;
            waiter.take_audio()
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        feed.push_audio(&[9]);
        assert_eq!(handle.await.unwrap(), vec![9]);
    }
}
