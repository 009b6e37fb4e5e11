//! Prompt-terminated response collection with deadlines.

use crate::error::{DriverError, DriverResult};
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Cap on buffered response text; older text is dropped beyond it.
pub const MAX_RESPONSE_BUFFER: usize = 16 * 1024;

/// Text received before a prompt, and the prompt that ended it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    pub prompt: String,
    pub text: String,
}

/// Text received from the instrument, waited on by command senders.
///
/// The transport thread pushes text in; a command thread blocks in
/// [`wait_for`](Self::wait_for) until one of its prompts shows up or the
/// deadline passes.
#[derive(Debug, Default)]
pub struct ResponseBuffer {
    text: Mutex<String>,
    arrived: Condvar,
}

impl ResponseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, text: &str) {
        let mut buffer = self.text.lock();
        buffer.push_str(text);
        if buffer.len() > MAX_RESPONSE_BUFFER {
            let mut cut = buffer.len() - MAX_RESPONSE_BUFFER;
            while !buffer.is_char_boundary(cut) {
                cut += 1;
            }
            buffer.drain(..cut);
        }
        self.arrived.notify_all();
    }

    pub fn clear(&self) {
        self.text.lock().clear();
    }

    /// Block until one of `prompts` is received or `timeout` elapses.
    ///
    /// The earliest prompt in the buffer wins. The prompt and everything
    /// before it are consumed. A timeout too large to form a deadline waits
    /// without one.
    pub fn wait_for(&self, prompts: &[&str], timeout: Duration) -> DriverResult<Response> {
        let deadline = Instant::now().checked_add(timeout);
        let mut buffer = self.text.lock();
        loop {
            let found = prompts
                .iter()
                .filter_map(|p| buffer.find(p).map(|idx| (idx, *p)))
                .min_by_key(|(idx, _)| *idx);
            if let Some((idx, prompt)) = found {
                let text = buffer[..idx].to_string();
                buffer.drain(..idx + prompt.len());
                return Ok(Response {
                    prompt: prompt.to_string(),
                    text,
                });
            }
            match deadline {
                Some(deadline) if Instant::now() >= deadline => {
                    return Err(DriverError::Timeout(timeout));
                }
                Some(deadline) => {
                    self.arrived.wait_until(&mut buffer, deadline);
                }
                None => self.arrived.wait(&mut buffer),
            }
        }
    }
}
