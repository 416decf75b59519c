//! Scripted stand-ins for the browser-backed surface and the voice pipeline.

use crate::inbox::{ContactId, Message};
use crate::session::{ChatSurface, SessionError};
use crate::speech::Speaker;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SurfaceCall {
    UnreadList,
    Open(String),
    OpenPhone(String),
    Read,
    Compose(String),
    Close,
    ResetSearch,
    Offline(bool),
    VoiceStart,
    VoiceFinish,
    Join(String),
    Leave,
    Screenshot,
}

/// In-memory `ChatSurface` with per-contact message scripts, failure
/// injection, and a call journal. The unread list is consumed by each read,
/// mirroring the client clearing its unread badges.
#[derive(Default)]
pub struct ScriptedSurface {
    logged_in: AtomicBool,
    unread: Mutex<Vec<ContactId>>,
    scripts: Mutex<HashMap<ContactId, Vec<Message>>>,
    failing: Mutex<HashSet<ContactId>>,
    current: Mutex<Option<ContactId>>,
    read_delay: Mutex<Option<Duration>>,
    journal: Mutex<Vec<SurfaceCall>>,
    frames: Mutex<u64>,
}

impl ScriptedSurface {
    pub fn new() -> Self {
        let surface = Self::default();
        surface.logged_in.store(true, Ordering::SeqCst);
        surface
    }

    pub fn set_logged_in(&self, logged_in: bool) {
        self.logged_in.store(logged_in, Ordering::SeqCst);
    }

    pub fn set_unread(&self, contacts: &[&str]) {
        *self.unread.lock().unwrap() = contacts.iter().map(|c| c.to_string()).collect();
    }

    pub fn script(&self, contact: &str, messages: Vec<Message>) {
        self.scripts.lock().unwrap().insert(contact.to_string(), messages);
    }

    pub fn fail_open(&self, contact: &str) {
        self.failing.lock().unwrap().insert(contact.to_string());
    }

    pub fn clear_failures(&self) {
        self.failing.lock().unwrap().clear();
    }

    pub fn set_read_delay(&self, delay: Duration) {
        *self.read_delay.lock().unwrap() = Some(delay);
    }

    pub fn journal(&self) -> Vec<SurfaceCall> {
        self.journal.lock().unwrap().clone()
    }

    fn record(&self, call: SurfaceCall) {
        self.journal.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ChatSurface for ScriptedSurface {
    async fn is_logged_in(&self) -> bool {
        // Capability probe, not session traffic: kept out of the journal.
        self.logged_in.load(Ordering::SeqCst)
    }

    async fn unread_contacts(&self) -> Result<Vec<ContactId>, SessionError> {
        self.record(SurfaceCall::UnreadList);
        Ok(std::mem::take(&mut *self.unread.lock().unwrap()))
    }

    async fn open_conversation(&self, contact: &str) -> Result<(), SessionError> {
        self.record(SurfaceCall::Open(contact.to_string()));
        if self.failing.lock().unwrap().contains(contact) {
            return Err(SessionError::ElementMissing { selector: contact.to_string() });
        }
        *self.current.lock().unwrap() = Some(contact.to_string());
        Ok(())
    }

    async fn open_phone(&self, number: &str) -> Result<(), SessionError> {
        self.record(SurfaceCall::OpenPhone(number.to_string()));
        *self.current.lock().unwrap() = Some(number.to_string());
        Ok(())
    }

    async fn read_messages(&self) -> Result<Vec<Message>, SessionError> {
        self.record(SurfaceCall::Read);
        let delay = *self.read_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let current = self.current.lock().unwrap().clone();
        let scripts = self.scripts.lock().unwrap();
        Ok(current.and_then(|c| scripts.get(&c).cloned()).unwrap_or_default())
    }

    async fn compose(&self, text: &str) -> Result<(), SessionError> {
        self.record(SurfaceCall::Compose(text.to_string()));
        Ok(())
    }

    async fn close_conversation(&self) {
        self.record(SurfaceCall::Close);
        *self.current.lock().unwrap() = None;
    }

    async fn reset_search(&self) {
        self.record(SurfaceCall::ResetSearch);
    }

    async fn set_offline(&self, offline: bool) {
        self.record(SurfaceCall::Offline(offline));
    }

    async fn start_voice_note(&self) -> Result<(), SessionError> {
        self.record(SurfaceCall::VoiceStart);
        Ok(())
    }

    async fn finish_voice_note(&self) -> Result<(), SessionError> {
        self.record(SurfaceCall::VoiceFinish);
        Ok(())
    }

    async fn join_meeting(&self, link: &str) -> Result<(), SessionError> {
        self.record(SurfaceCall::Join(link.to_string()));
        Ok(())
    }

    async fn leave_meeting(&self) -> Result<(), SessionError> {
        self.record(SurfaceCall::Leave);
        Ok(())
    }

    async fn screenshot_b64(&self) -> Result<String, SessionError> {
        self.record(SurfaceCall::Screenshot);
        let mut frames = self.frames.lock().unwrap();
        *frames += 1;
        Ok(format!("frame-{}", frames))
    }
}

#[derive(Default)]
pub struct RecordingSpeaker {
    texts: Mutex<Vec<String>>,
}

impl RecordingSpeaker {
    pub fn spoken(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Speaker for RecordingSpeaker {
    async fn speak(&self, text: &str) -> anyhow::Result<()> {
        self.texts.lock().unwrap().push(text.to_string());
        Ok(())
    }
}
