//! Test doubles for app-level collaborators
//!
//! The storage and backend doubles live next to their traits
//! ([`crate::storage::MemoryStore`], [`crate::store::MemoryRemoteStore`]);
//! this module adds the email side.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::sharing::{EmailMessage, MailError, Mailer};

/// Mailer that keeps every delivered message
#[derive(Debug, Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<EmailMessage>>,
    failures: Mutex<VecDeque<String>>,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next send with `message`
    pub fn fail_next(&self, message: impl Into<String>) {
        self.failures.lock().unwrap().push_back(message.into());
    }

    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().unwrap().clone()
    }
}

impl Mailer for RecordingMailer {
    async fn send(&self, message: EmailMessage) -> Result<(), MailError> {
        if let Some(reason) = self.failures.lock().unwrap().pop_front() {
            return Err(MailError(reason));
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}
