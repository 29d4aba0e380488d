use crate::domain::config::FramingMode;
use tracing::warn;

/// Turns raw transport reads into candidate protocol messages
#[derive(Debug)]
pub struct MessageFramer {
    mode: FramingMode,
    max_line_length: usize,
    pending: Vec<u8>,
}

impl MessageFramer {
    pub fn new(mode: FramingMode, max_line_length: usize) -> Self {
        Self {
            mode,
            max_line_length,
            pending: Vec::new(),
        }
    }

    /// Feed one read; returns the messages completed by it
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        match self.mode {
            FramingMode::Chunk => vec![String::from_utf8_lossy(bytes).into_owned()],
            FramingMode::Line => self.push_lines(bytes),
        }
    }

    fn push_lines(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let mut messages = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if !line.is_empty() {
                messages.push(String::from_utf8_lossy(&line).into_owned());
            }
        }

        if self.pending.len() > self.max_line_length {
            warn!(
                "Discarding {} bytes of unterminated input",
                self.pending.len()
            );
            self.pending.clear();
        }

        messages
    }

    /// Bytes buffered towards the next line
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
