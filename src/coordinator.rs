use crate::actions::{CallInvite, CallState, RecordState, VoiceNote};
use crate::config::AppConfig;
use crate::inbox::{messages_after, ConversationLog, FallbackPolicy};
use crate::session::{ChatSurface, SendTarget, SessionError};
use crate::speech::Speaker;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Outcome of one scheduler tick.
#[derive(Clone, Copy, Debug, Default)]
pub struct PollReport {
    /// The tick found a cycle already in flight and was dropped.
    pub skipped: bool,
    /// Contacts processed to completion this cycle.
    pub contacts: usize,
    /// New messages handed to the speaker this cycle.
    pub new_messages: usize,
}

#[derive(Clone, Copy, Debug, Serialize)]
pub struct Status {
    pub logged_in: bool,
    pub call_active: bool,
    pub recording: bool,
}

struct Shared {
    log: ConversationLog,
    call: CallInvite,
    voice: VoiceNote,
}

/// Owns every piece of process state and the one logical browser session.
///
/// All session-touching entry points funnel through `shared`, so a poll
/// cycle, a toggle, and a send can never interleave on the page. A separate
/// `cycle` mutex gives polling its dropped-tick semantics: a tick that finds
/// it held returns immediately instead of queueing.
pub struct Coordinator<S: ChatSurface> {
    surface: S,
    shared: Mutex<Shared>,
    cycle: Mutex<()>,
    speaker: Arc<dyn Speaker>,
    on_stale: FallbackPolicy,
}

impl<S: ChatSurface> Coordinator<S> {
    pub fn new(surface: S, speaker: Arc<dyn Speaker>, cfg: &AppConfig) -> Self {
        Self {
            surface,
            shared: Mutex::new(Shared {
                log: ConversationLog::default(),
                call: CallInvite::new(cfg.call_contact.clone(), cfg.meeting_link.clone()),
                voice: VoiceNote::new(cfg.voice_contact.clone()),
            }),
            cycle: Mutex::new(()),
            speaker,
            on_stale: cfg.on_stale,
        }
    }

    /// One pass over the unread conversations. Safe to call repeatedly; a
    /// call that overlaps a running cycle reports `skipped` and does nothing.
    pub async fn poll_once(&self) -> PollReport {
        let Ok(_cycle) = self.cycle.try_lock() else {
            return PollReport { skipped: true, ..Default::default() };
        };
        let mut shared = self.shared.lock().await;
        self.run_cycle(&mut shared).await
    }

    async fn run_cycle(&self, shared: &mut Shared) -> PollReport {
        let mut report = PollReport::default();

        if !self.surface.is_logged_in().await {
            debug!("not logged in, skipping poll cycle");
            return report;
        }
        let unread = match self.surface.unread_contacts().await {
            Ok(unread) => unread,
            Err(e) => {
                warn!(error = %e, "could not read unread conversations");
                return report;
            }
        };
        if unread.is_empty() {
            return report;
        }

        // Known UI state before the first open.
        self.surface.close_conversation().await;

        for contact in &unread {
            match self.process_contact(contact, &mut shared.log).await {
                Ok(fresh) => {
                    report.contacts += 1;
                    report.new_messages += fresh;
                }
                Err(e) => {
                    warn!(contact = %contact, error = %e, "skipping contact this cycle");
                }
            }
        }

        self.surface.set_offline(false).await;
        self.surface.close_conversation().await;
        report
    }

    /// Open, scrape, diff, and hand off one contact's new messages. Offline
    /// emulation is lifted for the open (the click has to land) and engaged
    /// before the scrape so reading emits no receipts.
    async fn process_contact(
        &self,
        contact: &str,
        log: &mut ConversationLog,
    ) -> Result<usize, SessionError> {
        self.surface.set_offline(false).await;
        self.surface.open_conversation(contact).await?;
        self.surface.set_offline(true).await;

        let rendered = self.surface.read_messages().await?;
        let fresh = messages_after(log.last_seen(contact), &rendered, self.on_stale);
        for message in fresh {
            if let Err(e) = self.speaker.speak(&message.text).await {
                warn!(contact = %contact, error = %e, "speaker rejected message");
            }
        }
        let count = fresh.len();
        log.note(contact, &rendered);

        self.surface.set_offline(false).await;
        self.surface.close_conversation().await;
        Ok(count)
    }

    pub async fn toggle_call(&self) -> Result<CallState, SessionError> {
        let mut shared = self.shared.lock().await;
        shared.call.toggle(&self.surface).await
    }

    pub async fn toggle_recording(&self) -> Result<RecordState, SessionError> {
        let mut shared = self.shared.lock().await;
        shared.voice.toggle(&self.surface).await
    }

    pub async fn send_text(&self, target: &SendTarget, text: &str) -> Result<(), SessionError> {
        let _shared = self.shared.lock().await;
        self.surface.send_to(target, text).await
    }

    /// Frame capture for the stream. Read-only CDP, deliberately outside the
    /// session lock so a long poll cycle cannot stall the feed.
    pub async fn screenshot_b64(&self) -> Result<String, SessionError> {
        self.surface.screenshot_b64().await
    }

    #[cfg(test)]
    pub(crate) fn surface(&self) -> &S {
        &self.surface
    }

    pub async fn status(&self) -> Status {
        let logged_in = self.surface.is_logged_in().await;
        let shared = self.shared.lock().await;
        Status {
            logged_in,
            call_active: shared.call.state() == CallState::Active,
            recording: shared.voice.state() == RecordState::Recording,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inbox::Message;
    use crate::testing::{RecordingSpeaker, ScriptedSurface, SurfaceCall};
    use std::time::Duration;

    fn coordinator(surface: ScriptedSurface) -> (Arc<Coordinator<ScriptedSurface>>, Arc<RecordingSpeaker>) {
        let speaker = Arc::new(RecordingSpeaker::default());
        let cfg = AppConfig {
            call_contact: "Ada".into(),
            voice_contact: "Ada".into(),
            ..AppConfig::default()
        };
        (Arc::new(Coordinator::new(surface, speaker.clone(), &cfg)), speaker)
    }

    #[tokio::test]
    async fn empty_unread_list_touches_nothing() {
        let surface = ScriptedSurface::new();
        let (coordinator, speaker) = coordinator(surface);

        let report = coordinator.poll_once().await;
        assert_eq!((report.contacts, report.new_messages), (0, 0));
        assert!(!report.skipped);
        // The only surface traffic is the unread-list read itself.
        assert_eq!(coordinator.surface.journal(), vec![SurfaceCall::UnreadList]);
        assert!(speaker.spoken().is_empty());
    }

    #[tokio::test]
    async fn logged_out_cycle_is_a_noop() {
        let surface = ScriptedSurface::new();
        surface.set_logged_in(false);
        let (coordinator, _speaker) = coordinator(surface);

        let report = coordinator.poll_once().await;
        assert_eq!(report.contacts, 0);
        assert!(coordinator.surface.journal().is_empty());
    }

    #[tokio::test]
    async fn first_poll_speaks_everything_then_goes_quiet() {
        let surface = ScriptedSurface::new();
        surface.set_unread(&["alice"]);
        surface.script(
            "alice",
            vec![Message::new("hi", "10:00"), Message::new("yo", "10:01")],
        );
        let (coordinator, speaker) = coordinator(surface);

        let report = coordinator.poll_once().await;
        assert_eq!((report.contacts, report.new_messages), (1, 2));
        assert_eq!(speaker.spoken(), vec!["hi".to_string(), "yo".to_string()]);

        // Same snapshot again: nothing new.
        coordinator.surface.set_unread(&["alice"]);
        let report = coordinator.poll_once().await;
        assert_eq!(report.new_messages, 0);
        assert_eq!(speaker.spoken().len(), 2);
    }

    #[tokio::test]
    async fn suffix_only_after_stored_message() {
        let surface = ScriptedSurface::new();
        surface.set_unread(&["alice"]);
        surface.script("alice", vec![Message::new("hi", "10:00")]);
        let (coordinator, speaker) = coordinator(surface);
        coordinator.poll_once().await;

        coordinator.surface.set_unread(&["alice"]);
        coordinator.surface.script(
            "alice",
            vec![
                Message::new("hi", "10:00"),
                Message::new("yo", "10:01"),
                Message::new("ok", "10:02"),
            ],
        );
        let report = coordinator.poll_once().await;
        assert_eq!(report.new_messages, 2);
        assert_eq!(
            speaker.spoken(),
            vec!["hi".to_string(), "yo".to_string(), "ok".to_string()]
        );
    }

    #[tokio::test]
    async fn broken_contact_does_not_abort_the_cycle() {
        let surface = ScriptedSurface::new();
        surface.set_unread(&["bad", "good"]);
        surface.fail_open("bad");
        surface.script("good", vec![Message::new("hello", "11:00")]);
        let (coordinator, speaker) = coordinator(surface);

        let report = coordinator.poll_once().await;
        assert_eq!((report.contacts, report.new_messages), (1, 1));
        assert_eq!(speaker.spoken(), vec!["hello".to_string()]);
    }

    #[tokio::test]
    async fn offline_wraps_the_scrape() {
        let surface = ScriptedSurface::new();
        surface.set_unread(&["alice"]);
        surface.script("alice", vec![Message::new("hi", "10:00")]);
        let (coordinator, _speaker) = coordinator(surface);
        coordinator.poll_once().await;

        let calls = coordinator.surface.journal();
        let open = calls.iter().position(|c| matches!(c, SurfaceCall::Open(_))).unwrap();
        let read = calls.iter().position(|c| matches!(c, SurfaceCall::Read)).unwrap();
        // Online for the click, offline before the read, online again after.
        assert!(calls[..open].contains(&SurfaceCall::Offline(false)));
        assert_eq!(calls[open + 1..read], [SurfaceCall::Offline(true)]);
        assert!(calls[read..].contains(&SurfaceCall::Offline(false)));
    }

    #[tokio::test]
    async fn overlapping_poll_is_dropped() {
        let surface = ScriptedSurface::new();
        surface.set_unread(&["alice"]);
        surface.script("alice", vec![Message::new("hi", "10:00")]);
        surface.set_read_delay(Duration::from_millis(50));
        let (coordinator, _speaker) = coordinator(surface);

        let (a, b) = tokio::join!(coordinator.poll_once(), coordinator.poll_once());
        assert!(a.skipped != b.skipped, "exactly one tick must run");
        let ran = if a.skipped { b } else { a };
        assert_eq!(ran.contacts, 1);
        // The dropped tick produced no surface traffic of its own.
        let reads = coordinator
            .surface
            .journal()
            .iter()
            .filter(|c| matches!(c, SurfaceCall::Read))
            .count();
        assert_eq!(reads, 1);
    }

    #[tokio::test]
    async fn send_text_reports_real_failures() {
        let surface = ScriptedSurface::new();
        surface.set_logged_in(false);
        let (coordinator, _speaker) = coordinator(surface);
        let result = coordinator
            .send_text(&SendTarget::Contact("Ada".into()), "hello")
            .await;
        assert!(matches!(result, Err(SessionError::NotLoggedIn)));
    }

    #[tokio::test]
    async fn status_reflects_machine_states() {
        let surface = ScriptedSurface::new();
        let (coordinator, _speaker) = coordinator(surface);
        let status = coordinator.status().await;
        assert!(status.logged_in && !status.call_active && !status.recording);

        coordinator.toggle_recording().await.unwrap();
        let status = coordinator.status().await;
        assert!(status.recording);
    }
}
