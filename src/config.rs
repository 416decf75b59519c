use crate::inbox::FallbackPolicy;
use std::env;
use std::time::Duration;
use tracing::warn;

/// Process configuration, read once at startup from `CHATPILOT_*` variables.
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Run the Chromium session without a window. Defaults to false: the
    /// session needs a one-time interactive login scan.
    pub headless: bool,
    /// Messaging client entry URL.
    pub client_url: String,
    /// Port for the HTTP control surface (the frame stream shares it).
    pub http_port: u16,
    /// Period of the unread poll loop.
    pub poll_interval: Duration,
    /// Period of the websocket frame push.
    pub stream_interval: Duration,
    /// Meeting room the call-invite flow shares and joins.
    pub meeting_link: String,
    /// Contact that receives call invites. Empty disables the toggle.
    pub call_contact: String,
    /// Contact that receives voice notes. Empty disables the toggle.
    pub voice_contact: String,
    /// Translate-and-speak endpoint; new messages are logged when unset.
    pub speak_url: Option<String>,
    /// What to do when the stored last-seen message scrolled out of view.
    pub on_stale: FallbackPolicy,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            headless: flag("CHATPILOT_HEADLESS", false),
            client_url: var_or("CHATPILOT_URL", "https://web.whatsapp.com"),
            http_port: parsed("CHATPILOT_PORT", 7000),
            poll_interval: Duration::from_millis(parsed("CHATPILOT_POLL_MS", 1000)),
            stream_interval: Duration::from_millis(parsed("CHATPILOT_STREAM_MS", 100)),
            meeting_link: var_or("CHATPILOT_MEETING_LINK", "https://meet.jit.si/chatpilot-room"),
            call_contact: var_or("CHATPILOT_CALL_CONTACT", ""),
            voice_contact: var_or("CHATPILOT_VOICE_CONTACT", ""),
            speak_url: env::var("CHATPILOT_SPEAK_URL").ok().filter(|v| !v.trim().is_empty()),
            on_stale: policy("CHATPILOT_ON_STALE"),
        }
    }
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn flag(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.trim(), "1" | "true" | "yes"),
        Err(_) => default,
    }
}

fn parsed<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(v) => v.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %v, "unparsable value, using default");
            default
        }),
        Err(_) => default,
    }
}

fn policy(key: &str) -> FallbackPolicy {
    match env::var(key) {
        Ok(v) => FallbackPolicy::parse(&v).unwrap_or_else(|| {
            warn!(key, value = %v, "unknown fallback policy, using full history");
            FallbackPolicy::default()
        }),
        Err(_) => FallbackPolicy::default(),
    }
}
