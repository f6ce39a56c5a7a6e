use std::io;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{Span, debug, info_span, trace, warn};

use super::command::NO_MORE;
use crate::transport::Transport;

/// Stream broken, closed, or silent past the read timeout. Always fatal.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("{console}: i/o error: {source}")]
    Io {
        console: String,
        #[source]
        source: io::Error,
    },
    #[error("{console}: no {waiting_for} within {waited:?}; last output: {tail:?}")]
    Timeout {
        console: String,
        waiting_for: &'static str,
        waited: Duration,
        tail: String,
    },
    #[error("{console}: console closed; last output: {tail:?}")]
    Closed { console: String, tail: String },
}

/// The device answered with an `ERROR:` line.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{console}: CLI error: {message}")]
pub struct CommandError {
    pub console: String,
    /// Raw text buffered up to and including the error line.
    pub message: String,
}

/// Output of a command the device accepted, or its rejection. Being a
/// `Result`, it cannot be dropped silently.
pub type CommandResult = Result<String, CommandError>;

/// A text pattern searched for in the buffered console stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Marker {
    /// Matches a line that begins with the text.
    LineStart(String),
    /// Matches the text anywhere.
    Contains(String),
    /// Matches only when the buffer currently ends with the text, i.e. the
    /// device printed a prompt and is now waiting for input.
    TrailingPrompt(String),
}

impl Marker {
    /// Byte offset in `buf` of the line holding the first match.
    pub fn find(&self, buf: &str) -> Option<usize> {
        match self {
            Marker::LineStart(text) => {
                let mut offset = 0;
                for line in buf.split_inclusive('\n') {
                    if line.trim_start_matches('\r').starts_with(text.as_str()) {
                        return Some(offset);
                    }
                    offset += line.len();
                }
                None
            }
            Marker::Contains(text) => buf.find(text.as_str()).map(|pos| line_start(buf, pos)),
            Marker::TrailingPrompt(text) => buf
                .ends_with(text.as_str())
                .then(|| line_start(buf, buf.len() - text.len())),
        }
    }
}

fn line_start(buf: &str, pos: usize) -> usize {
    buf[..pos].rfind('\n').map_or(0, |nl| nl + 1)
}

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub prompt: Marker,
    pub error: Marker,
    pub paging_suffix: String,
    pub read_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            prompt: Marker::TrailingPrompt("# ".into()),
            error: Marker::LineStart("ERROR:".into()),
            paging_suffix: format!(" | {NO_MORE}"),
            read_timeout: Duration::from_secs(120),
        }
    }
}

/// Which of the two raced markers appeared first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Winner {
    Prompt,
    Error,
}

/// Earliest match wins; an error line is taken over a prompt at the same offset.
fn race(error: &Marker, prompt: &Marker, buf: &str) -> Option<(Winner, usize)> {
    match (error.find(buf), prompt.find(buf)) {
        (Some(e), Some(p)) if e <= p => Some((Winner::Error, e)),
        (_, Some(p)) => Some((Winner::Prompt, p)),
        (Some(e), None) => Some((Winner::Error, e)),
        (None, None) => None,
    }
}

/// One interactive CLI session on a remote device.
pub struct SessionChannel {
    name: String,
    transport: Box<dyn Transport>,
    config: ChannelConfig,
    buf: String,
    /// trailing bytes of a character split across reads
    partial: Vec<u8>,
    span: Span,
}

impl SessionChannel {
    pub fn new(name: &str, transport: Box<dyn Transport>, config: ChannelConfig) -> Self {
        Self {
            name: name.to_string(),
            transport,
            config,
            buf: String::new(),
            partial: Vec::new(),
            span: info_span!("console", name),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Block until the readiness banner, then the first prompt.
    pub fn await_ready(
        &mut self,
        ready: &Marker,
        prompt: &Marker,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let span = self.span.clone();
        let _enter = span.enter();
        debug!("waiting for cli loading banner");
        let pos = self.read_until(timeout, "readiness banner", |buf| ready.find(buf))?;
        // only look for the prompt after the banner line
        self.buf.drain(..pos);
        if let Some(nl) = self.buf.find('\n') {
            self.buf.drain(..=nl);
        }
        debug!("received cli loading banner");
        self.read_until(timeout, "first prompt", |buf| prompt.find(buf))?;
        self.buf.clear();
        debug!("received cli command prompt");
        Ok(())
    }

    /// Send one command line and resolve it against the error/prompt race.
    pub fn send(
        &mut self,
        command: &str,
        suppress_paging: bool,
    ) -> Result<CommandResult, TransportError> {
        let span = self.span.clone();
        let _enter = span.enter();

        let mut line = command.to_string();
        if suppress_paging {
            line.push_str(&self.config.paging_suffix);
        }
        debug!(command = %line, "send");

        // anything left over belongs to an earlier command
        self.buf.clear();
        self.partial.clear();
        let mut wire = line.into_bytes();
        wire.push(b'\n');
        self.transport
            .send(&wire)
            .map_err(|source| TransportError::Io {
                console: self.name.clone(),
                source,
            })?;

        let timeout = self.config.read_timeout;
        let (prompt, error) = (self.config.prompt.clone(), self.config.error.clone());
        let mut winner = Winner::Prompt;
        self.read_until(timeout, "prompt or CLI error", |buf| {
            race(&error, &prompt, buf).map(|(w, pos)| {
                winner = w;
                pos
            })
        })?;

        match winner {
            Winner::Prompt => {
                let output = strip_echo_and_prompt(&self.buf);
                trace!(%output, "command output");
                self.buf.clear();
                Ok(Ok(output))
            }
            Winner::Error => {
                let message = self.drain_error(&prompt);
                warn!(%message, "received CLI ERROR");
                Ok(Err(CommandError {
                    console: self.name.clone(),
                    message,
                }))
            }
        }
    }

    /// After an error line, consume up to the next prompt so the following
    /// command starts on a clean stream. Returns the text before that prompt.
    fn drain_error(&mut self, prompt: &Marker) -> String {
        let timeout = self.config.read_timeout;
        let message = match self.read_until(timeout, "prompt after CLI error", |buf| prompt.find(buf)) {
            Ok(pos) => self.buf[..pos].trim_end().to_string(),
            Err(e) => {
                warn!(error = %e, "no prompt after CLI error; discarding residue");
                self.buf.trim_end().to_string()
            }
        };
        self.buf.clear();
        message
    }

    /// Read into the buffer until `check` reports a match or `timeout` runs out.
    fn read_until<F>(
        &mut self,
        timeout: Duration,
        waiting_for: &'static str,
        mut check: F,
    ) -> Result<usize, TransportError>
    where
        F: FnMut(&str) -> Option<usize>,
    {
        let start = Instant::now();
        let mut chunk = [0u8; 4096];
        loop {
            if let Some(pos) = check(&self.buf) {
                return Ok(pos);
            }
            let remaining = timeout.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                return Err(TransportError::Timeout {
                    console: self.name.clone(),
                    waiting_for,
                    waited: timeout,
                    tail: tail(&self.buf),
                });
            }
            match self.transport.recv(&mut chunk, remaining) {
                Ok(0) => {
                    return Err(TransportError::Closed {
                        console: self.name.clone(),
                        tail: tail(&self.buf),
                    });
                }
                Ok(n) => {
                    self.partial.extend_from_slice(&chunk[..n]);
                    decode_into(&mut self.buf, &mut self.partial);
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                    ) => {}
                Err(source) => {
                    return Err(TransportError::Io {
                        console: self.name.clone(),
                        source,
                    });
                }
            }
        }
    }
}

/// Move complete UTF-8 from `partial` into `buf`. An incomplete sequence at
/// the end stays in `partial` for the next read; invalid bytes become U+FFFD.
fn decode_into(buf: &mut String, partial: &mut Vec<u8>) {
    loop {
        match std::str::from_utf8(partial) {
            Ok(text) => {
                buf.push_str(text);
                partial.clear();
                return;
            }
            Err(e) => {
                let valid = e.valid_up_to();
                buf.push_str(&String::from_utf8_lossy(&partial[..valid]));
                match e.error_len() {
                    None => {
                        partial.drain(..valid);
                        return;
                    }
                    Some(bad) => {
                        buf.push(char::REPLACEMENT_CHARACTER);
                        partial.drain(..valid + bad);
                    }
                }
            }
        }
    }
}

/// Drop the echoed command (first line) and the new prompt (last line).
fn strip_echo_and_prompt(raw: &str) -> String {
    let lines: Vec<&str> = raw.lines().collect();
    if lines.len() <= 2 {
        return String::new();
    }
    lines[1..lines.len() - 1].join("\n")
}

fn tail(buf: &str) -> String {
    const KEEP: usize = 200;
    let mut start = buf.len().saturating_sub(KEEP);
    while !buf.is_char_boundary(start) {
        start += 1;
    }
    buf[start..].to_string()
}
