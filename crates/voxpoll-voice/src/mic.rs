//! Shared microphone slot.
//!
//! Capture itself is platform code behind [`MicrophoneSource`]. The slot
//! keeps at most one open stream and hands the same one back on every
//! acquisition until it is released.

use crate::error::VoiceError;
use std::sync::{Arc, Mutex, PoisonError};

/// An open capture stream.
pub trait AudioStream: Send + Sync {
    /// Stops capture and releases the device.
    fn stop(&self);
}

/// Opens capture streams. Permission and device errors surface as
/// [`VoiceError::Microphone`].
pub trait MicrophoneSource: Send + Sync {
    fn open(&self) -> Result<Arc<dyn AudioStream>, VoiceError>;
}

pub struct SharedMicrophone {
    source: Arc<dyn MicrophoneSource>,
    slot: Mutex<Option<Arc<dyn AudioStream>>>,
}

impl SharedMicrophone {
    pub fn new(source: Arc<dyn MicrophoneSource>) -> Self {
        Self {
            source,
            slot: Mutex::new(None),
        }
    }

    /// Returns the open stream, opening one first if needed.
    pub fn acquire(&self) -> Result<Arc<dyn AudioStream>, VoiceError> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(stream) = slot.as_ref() {
            return Ok(Arc::clone(stream));
        }
        let stream = self.source.open().inspect_err(|e| {
            tracing::warn!(error = %e, "microphone acquisition failed");
        })?;
        *slot = Some(Arc::clone(&stream));
        tracing::debug!("microphone stream opened");
        Ok(stream)
    }

    /// Stops and forgets the open stream. No-op when nothing is open.
    pub fn release(&self) {
        let stream = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(stream) = stream {
            stream.stop();
            tracing::debug!("microphone stream released");
        }
    }

    pub fn is_active(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl std::fmt::Debug for SharedMicrophone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedMicrophone")
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    pub(crate) struct FakeStream {
        pub stopped: AtomicBool,
    }

    impl AudioStream for FakeStream {
        fn stop(&self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    pub(crate) struct FakeSource {
        pub opens: AtomicUsize,
        pub deny: AtomicBool,
    }

    impl MicrophoneSource for FakeSource {
        fn open(&self) -> Result<Arc<dyn AudioStream>, VoiceError> {
            if self.deny.load(Ordering::SeqCst) {
                return Err(VoiceError::Microphone("permission denied".into()));
            }
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(FakeStream::default()))
        }
    }

    #[test]
    fn second_acquire_returns_same_stream() {
        let source = Arc::new(FakeSource::default());
        let mic = SharedMicrophone::new(source.clone());

        let first = mic.acquire().unwrap();
        let second = mic.acquire().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(source.opens.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn release_then_acquire_reopens() {
        let source = Arc::new(FakeSource::default());
        let mic = SharedMicrophone::new(source.clone());

        mic.acquire().unwrap();
        mic.release();
        assert!(!mic.is_active());
        mic.release();

        mic.acquire().unwrap();
        assert_eq!(source.opens.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn denied_permission_leaves_slot_empty() {
        let source = Arc::new(FakeSource::default());
        source.deny.store(true, Ordering::SeqCst);
        let mic = SharedMicrophone::new(source);

        let err = mic.acquire().err().unwrap();
        assert!(matches!(err, VoiceError::Microphone(_)));
        assert!(!mic.is_active());
    }
}
