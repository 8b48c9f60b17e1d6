//! Scripted [`FrameWriter`] for forwarder tests.

use std::io;

use async_trait::async_trait;

use crate::forwarder::FrameWriter;

/// Records writes and fails on demand.
#[derive(Debug, Default)]
pub struct MockFrameWriter {
    written: Vec<Vec<u8>>,
    reported_len: Option<usize>,
    write_error: Option<io::ErrorKind>,
    close_error: Option<io::ErrorKind>,
    close_calls: usize,
}

impl MockFrameWriter {
    /// A writer that accepts everything and reports `message.len()`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `len` bytes written regardless of the message size.
    #[must_use]
    pub fn reporting(mut self, len: usize) -> Self {
        self.reported_len = Some(len);
        self
    }

    /// Fail every write with `kind`.
    #[must_use]
    pub fn fail_writes(mut self, kind: io::ErrorKind) -> Self {
        self.write_error = Some(kind);
        self
    }

    /// Fail every close with `kind`.
    #[must_use]
    pub fn fail_close(mut self, kind: io::ErrorKind) -> Self {
        self.close_error = Some(kind);
        self
    }

    /// Messages accepted so far.
    #[must_use]
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.written.clone()
    }

    /// Number of `close` calls.
    #[must_use]
    pub fn close_calls(&self) -> usize {
        self.close_calls
    }
}

#[async_trait]
impl FrameWriter for MockFrameWriter {
    async fn write(&mut self, message: &[u8]) -> io::Result<usize> {
        if let Some(kind) = self.write_error {
            return Err(io::Error::new(kind, "scripted write failure"));
        }
        self.written.push(message.to_vec());
        Ok(self.reported_len.unwrap_or(message.len()))
    }

    async fn close(&mut self) -> io::Result<()> {
        self.close_calls += 1;
        match self.close_error {
            Some(kind) => Err(io::Error::new(kind, "scripted close failure")),
            None => Ok(()),
        }
    }
}
