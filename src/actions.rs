use crate::session::{ChatSurface, SendTarget, SessionError};
use tracing::info;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallState {
    Idle,
    Active,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordState {
    Idle,
    Recording,
}

/// Two-state call-invite flow. `toggle` is the only entry point: callers
/// flip the state, they cannot force one. A failed transition keeps the
/// prior state so the next toggle retries it.
pub struct CallInvite {
    contact: String,
    meeting_link: String,
    state: CallState,
}

impl CallInvite {
    pub fn new(contact: impl Into<String>, meeting_link: impl Into<String>) -> Self {
        Self { contact: contact.into(), meeting_link: meeting_link.into(), state: CallState::Idle }
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub async fn toggle<S: ChatSurface + ?Sized>(
        &mut self,
        surface: &S,
    ) -> Result<CallState, SessionError> {
        if self.contact.is_empty() {
            return Err(SessionError::NotConfigured("call contact"));
        }
        let target = SendTarget::Contact(self.contact.clone());
        match self.state {
            CallState::Idle => {
                let invite = format!(
                    "Hey! I invite you to my call.\n{}\nClick the link to join.",
                    self.meeting_link
                );
                surface.send_to(&target, &invite).await?;
                surface.join_meeting(&self.meeting_link).await?;
                self.state = CallState::Active;
                info!(contact = %self.contact, "call started");
            }
            CallState::Active => {
                surface.leave_meeting().await?;
                surface.send_to(&target, "Hey! I ended the call.").await?;
                self.state = CallState::Idle;
                info!(contact = %self.contact, "call ended");
            }
        }
        Ok(self.state)
    }
}

/// Two-state voice-note flow: start capture in the configured conversation,
/// then send it on the next toggle.
pub struct VoiceNote {
    contact: String,
    state: RecordState,
}

impl VoiceNote {
    pub fn new(contact: impl Into<String>) -> Self {
        Self { contact: contact.into(), state: RecordState::Idle }
    }

    pub fn state(&self) -> RecordState {
        self.state
    }

    pub async fn toggle<S: ChatSurface + ?Sized>(
        &mut self,
        surface: &S,
    ) -> Result<RecordState, SessionError> {
        if self.contact.is_empty() {
            return Err(SessionError::NotConfigured("voice contact"));
        }
        match self.state {
            RecordState::Idle => {
                if !surface.is_logged_in().await {
                    return Err(SessionError::NotLoggedIn);
                }
                surface.open_conversation(&self.contact).await?;
                surface.start_voice_note().await?;
                self.state = RecordState::Recording;
                info!(contact = %self.contact, "recording started");
            }
            RecordState::Recording => {
                surface.finish_voice_note().await?;
                surface.close_conversation().await;
                self.state = RecordState::Idle;
                info!(contact = %self.contact, "recording sent");
            }
        }
        Ok(self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedSurface, SurfaceCall};

    #[tokio::test]
    async fn call_toggle_alternates_states() {
        let surface = ScriptedSurface::new();
        let mut call = CallInvite::new("Ada", "https://meet.example/room");

        assert_eq!(call.toggle(&surface).await.unwrap(), CallState::Active);
        assert_eq!(call.state(), CallState::Active);
        assert_eq!(call.toggle(&surface).await.unwrap(), CallState::Idle);
        assert_eq!(call.state(), CallState::Idle);

        let calls = surface.journal();
        let joins = calls.iter().filter(|c| matches!(c, SurfaceCall::Join(_))).count();
        let leaves = calls.iter().filter(|c| matches!(c, SurfaceCall::Leave)).count();
        assert_eq!((joins, leaves), (1, 1));
        // Invite goes out before the meeting is joined; the farewell after it ends.
        let join_at = calls.iter().position(|c| matches!(c, SurfaceCall::Join(_))).unwrap();
        let first_send = calls.iter().position(|c| matches!(c, SurfaceCall::Compose(_))).unwrap();
        assert!(first_send < join_at);
    }

    #[tokio::test]
    async fn call_toggle_requires_configuration() {
        let surface = ScriptedSurface::new();
        let mut call = CallInvite::new("", "https://meet.example/room");
        assert!(matches!(
            call.toggle(&surface).await,
            Err(SessionError::NotConfigured("call contact"))
        ));
        assert!(surface.journal().is_empty());
    }

    #[tokio::test]
    async fn recording_toggle_alternates_states() {
        let surface = ScriptedSurface::new();
        let mut note = VoiceNote::new("Ada");

        assert_eq!(note.toggle(&surface).await.unwrap(), RecordState::Recording);
        assert_eq!(note.toggle(&surface).await.unwrap(), RecordState::Idle);

        assert_eq!(
            surface.journal(),
            vec![
                SurfaceCall::Open("Ada".into()),
                SurfaceCall::VoiceStart,
                SurfaceCall::VoiceFinish,
                SurfaceCall::Close,
            ]
        );
    }

    #[tokio::test]
    async fn failed_transition_keeps_state() {
        let surface = ScriptedSurface::new();
        surface.fail_open("Ada");
        let mut note = VoiceNote::new("Ada");

        assert!(note.toggle(&surface).await.is_err());
        assert_eq!(note.state(), RecordState::Idle);

        surface.clear_failures();
        assert_eq!(note.toggle(&surface).await.unwrap(), RecordState::Recording);
    }

    #[tokio::test]
    async fn toggles_are_noops_when_logged_out() {
        let surface = ScriptedSurface::new();
        surface.set_logged_in(false);
        let mut note = VoiceNote::new("Ada");
        let mut call = CallInvite::new("Ada", "https://meet.example/room");

        assert!(matches!(note.toggle(&surface).await, Err(SessionError::NotLoggedIn)));
        assert!(matches!(call.toggle(&surface).await, Err(SessionError::NotLoggedIn)));
        assert_eq!(note.state(), RecordState::Idle);
        assert_eq!(call.state(), CallState::Idle);
    }
}
