//! Combined-transcript capture buffer for the pyworkbench library.
//!
//! [`TranscriptBuffer`] accumulates everything a run writes to stdout and
//! stderr as ONE ordered byte stream — both interpreter streams are rebound to
//! the same sink, so the transcript preserves program output ordering. The
//! buffer is shared between the session thread (which reads the transcript
//! after a run) and the VM-side writer objects (which append during it) via
//! `Arc<Mutex<_>>` interior mutability — no `unsafe` code required.
//!
//! A fresh buffer is created for every run and never reused, so content from
//! one invocation cannot leak into the next. The transcript is read back even
//! when the run raised, so diagnostics written before the fault survive.

use std::sync::{Arc, Mutex};

// ── Inner state ───────────────────────────────────────────────────────────────

struct TranscriptInner {
    data: Vec<u8>,
    max_bytes: usize,
    limit_exceeded: bool,
}

impl TranscriptInner {
    fn new(max_bytes: usize) -> Self {
        Self {
            data: Vec::new(),
            max_bytes,
            limit_exceeded: false,
        }
    }
}

/// Rejected write: accepting the data would push the transcript over the
/// configured byte limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranscriptOverflow {
    /// The limit that was exceeded, in bytes.
    pub limit_bytes: usize,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// A thread-safe sink that captures a run's stdout and stderr as one stream.
///
/// Cheap to clone — all clones share the same underlying data via
/// `Arc<Mutex<TranscriptInner>>`.
#[derive(Clone)]
pub struct TranscriptBuffer {
    inner: Arc<Mutex<TranscriptInner>>,
}

impl TranscriptBuffer {
    /// Creates an empty buffer that accepts up to `max_bytes` in total.
    pub fn new(max_bytes: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TranscriptInner::new(max_bytes))),
        }
    }

    /// Appends `data` to the transcript.
    ///
    /// Returns `Err(TranscriptOverflow { limit_bytes })` if accepting `data`
    /// would exceed `max_bytes`. On error the buffer state is *not* modified
    /// and `is_limit_exceeded()` latches to `true`.
    pub fn write(&self, data: &[u8]) -> Result<(), TranscriptOverflow> {
        let mut inner = self.inner.lock().expect("TranscriptBuffer mutex poisoned");
        if inner.data.len() + data.len() > inner.max_bytes {
            inner.limit_exceeded = true;
            return Err(TranscriptOverflow {
                limit_bytes: inner.max_bytes,
            });
        }
        inner.data.extend_from_slice(data);
        Ok(())
    }

    /// `true` once any write has been rejected by the byte limit.
    pub fn is_limit_exceeded(&self) -> bool {
        let inner = self.inner.lock().expect("TranscriptBuffer mutex poisoned");
        inner.limit_exceeded
    }

    /// Number of bytes accumulated so far.
    pub fn len(&self) -> usize {
        let inner = self.inner.lock().expect("TranscriptBuffer mutex poisoned");
        inner.data.len()
    }

    /// `true` when nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consumes this handle and returns the full transcript as UTF-8 text.
    ///
    /// Invalid UTF-8 sequences are replaced with the Unicode replacement
    /// character via [`String::from_utf8_lossy`]. If another clone still
    /// exists (the VM-side writer object), this falls back to locking and
    /// cloning the bytes rather than panicking.
    pub fn into_string(self) -> String {
        match Arc::try_unwrap(self.inner) {
            Ok(mutex) => {
                let inner = mutex.into_inner().expect("TranscriptBuffer mutex poisoned");
                String::from_utf8_lossy(&inner.data).into_owned()
            }
            Err(arc) => {
                let inner = arc.lock().expect("TranscriptBuffer mutex poisoned");
                String::from_utf8_lossy(&inner.data).into_owned()
            }
        }
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
