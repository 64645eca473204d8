//! Single-use wrapper around an LZ4-compressed UTF-8 property value.
//!
//! Decoding is deferred until the value is first needed. The wrapper then
//! frees its compressed bytes, so it can be materialized exactly once.
//! [`CompressedText`] is the cached slot around it: it keeps the decoded
//! text so every reader after the first gets the same string.

use std::fmt;
use std::sync::{Mutex, OnceLock};

use bytes::Bytes;

use crate::cache::lock::mutex_lock;

use super::error::DomainError;

const SOURCE: &str = "domain::lazy";

enum LazyState {
    Compressed(Bytes),
    Materialized,
    Discarded,
}

pub struct LazyCompressedString {
    state: Mutex<LazyState>,
}

impl LazyCompressedString {
    /// Wrap bytes produced by [`lz4_flex::compress_prepend_size`].
    pub fn new(compressed: impl Into<Bytes>) -> Self {
        Self {
            state: Mutex::new(LazyState::Compressed(compressed.into())),
        }
    }

    /// Compress `text` and wrap the result.
    pub fn compress(text: &str) -> Self {
        Self::new(lz4_flex::compress_prepend_size(text.as_bytes()))
    }

    /// The compressed bytes. Fails once the value has been materialized or discarded.
    pub fn raw_bytes(&self) -> Result<Bytes, DomainError> {
        match &*mutex_lock(&self.state, SOURCE, "raw_bytes") {
            LazyState::Compressed(bytes) => Ok(bytes.clone()),
            LazyState::Materialized => Err(DomainError::precondition(
                "compressed bytes requested after the value was materialized",
            )),
            LazyState::Discarded => Err(DomainError::precondition(
                "compressed bytes requested after the value was discarded",
            )),
        }
    }

    /// Decompress to a string and release the compressed bytes.
    ///
    /// Only the first call succeeds.
    pub fn materialize(&self) -> Result<String, DomainError> {
        let mut state = mutex_lock(&self.state, SOURCE, "materialize");
        let bytes = match &*state {
            LazyState::Compressed(bytes) => bytes.clone(),
            LazyState::Materialized => {
                return Err(DomainError::precondition(
                    "lazy compressed value materialized twice",
                ));
            }
            LazyState::Discarded => {
                return Err(DomainError::precondition(
                    "lazy compressed value materialized after its bytes were discarded",
                ));
            }
        };

        let raw = lz4_flex::decompress_size_prepended(&bytes)
            .map_err(|err| DomainError::validation(format!("lz4 decompression failed: {err}")))?;
        let text = String::from_utf8(raw).map_err(|err| {
            DomainError::validation(format!("decompressed value is not utf-8: {err}"))
        })?;

        *state = LazyState::Materialized;
        Ok(text)
    }

    /// Drop the compressed bytes without decoding them.
    pub fn discard(&self) {
        let mut state = mutex_lock(&self.state, SOURCE, "discard");
        if matches!(*state, LazyState::Compressed(_)) {
            *state = LazyState::Discarded;
        }
    }

    pub fn is_materialized(&self) -> bool {
        matches!(
            *mutex_lock(&self.state, SOURCE, "is_materialized"),
            LazyState::Materialized
        )
    }

    /// Size of the compressed payload, or `None` once it has been released.
    pub fn compressed_len(&self) -> Option<usize> {
        match &*mutex_lock(&self.state, SOURCE, "compressed_len") {
            LazyState::Compressed(bytes) => Some(bytes.len()),
            _ => None,
        }
    }
}

impl fmt::Debug for LazyCompressedString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*mutex_lock(&self.state, SOURCE, "debug") {
            LazyState::Compressed(bytes) => format!("compressed({} bytes)", bytes.len()),
            LazyState::Materialized => "materialized".to_string(),
            LazyState::Discarded => "discarded".to_string(),
        };
        f.debug_struct("LazyCompressedString")
            .field("state", &state)
            .finish()
    }
}

/// Shared property slot holding a compressed value and, once read, its text.
pub struct CompressedText {
    lazy: LazyCompressedString,
    text: OnceLock<String>,
    init: Mutex<()>,
}

impl CompressedText {
    pub fn new(lazy: LazyCompressedString) -> Self {
        Self {
            lazy,
            text: OnceLock::new(),
            init: Mutex::new(()),
        }
    }

    /// The single-use wrapper underneath.
    pub fn lazy(&self) -> &LazyCompressedString {
        &self.lazy
    }

    /// Decoded text. The first call materializes the wrapper, later calls
    /// return the cached string.
    pub fn text(&self) -> Result<&str, DomainError> {
        if let Some(text) = self.text.get() {
            return Ok(text);
        }
        let _init = mutex_lock(&self.init, SOURCE, "text");
        if let Some(text) = self.text.get() {
            return Ok(text);
        }
        let text = self.lazy.materialize()?;
        Ok(self.text.get_or_init(|| text))
    }

    pub fn is_decoded(&self) -> bool {
        self.text.get().is_some()
    }

    /// Compressed form for re-encoding: the original bytes while they are
    /// held, otherwise the cached text compressed again.
    pub fn to_bytes(&self) -> Result<Bytes, DomainError> {
        match self.text.get() {
            Some(text) => Ok(Bytes::from(lz4_flex::compress_prepend_size(text.as_bytes()))),
            None => self.lazy.raw_bytes(),
        }
    }
}

impl fmt::Debug for CompressedText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompressedText")
            .field("lazy", &self.lazy)
            .field("decoded", &self.is_decoded())
            .finish()
    }
}
