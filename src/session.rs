use crate::browser::{Browser, BrowserConfig};
use crate::config::AppConfig;
use crate::inbox::{ContactId, Message};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no active login in the messaging session")]
    NotLoggedIn,
    #[error("element did not appear: {selector}")]
    ElementMissing { selector: String },
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("{0} is not configured")]
    NotConfigured(&'static str),
    #[error("browser error: {0}")]
    Browser(String),
}

/// Where an outbound message goes: a conversation label or a raw phone
/// number reachable through the client's direct-send URL.
#[derive(Clone, Debug)]
pub enum SendTarget {
    Contact(String),
    Phone(String),
}

/// Everything the engine and the action machines need from the shared
/// messaging session. One logical browser session backs all of it, so
/// callers are expected to serialize access (see `Coordinator`).
#[async_trait]
pub trait ChatSurface: Send + Sync {
    async fn is_logged_in(&self) -> bool;

    /// Labels of conversations currently flagged with unread messages.
    async fn unread_contacts(&self) -> Result<Vec<ContactId>, SessionError>;

    async fn open_conversation(&self, contact: &str) -> Result<(), SessionError>;

    async fn open_phone(&self, number: &str) -> Result<(), SessionError>;

    /// Ordered message rows currently rendered in the open conversation.
    async fn read_messages(&self) -> Result<Vec<Message>, SessionError>;

    /// Type into the composer and send.
    async fn compose(&self, text: &str) -> Result<(), SessionError>;

    /// Best-effort: close whatever conversation is open.
    async fn close_conversation(&self);

    /// Best-effort: clear a leftover search filter.
    async fn reset_search(&self);

    /// Advisory: emulate offline so reading does not emit read receipts.
    async fn set_offline(&self, offline: bool);

    async fn start_voice_note(&self) -> Result<(), SessionError>;

    async fn finish_voice_note(&self) -> Result<(), SessionError>;

    /// Open the meeting link in a secondary tab, mute the camera if the
    /// control exists, and join.
    async fn join_meeting(&self, link: &str) -> Result<(), SessionError>;

    async fn leave_meeting(&self) -> Result<(), SessionError>;

    async fn screenshot_b64(&self) -> Result<String, SessionError>;

    /// Open the target and send one message. Backs the send endpoint and the
    /// call-invite machine.
    async fn send_to(&self, target: &SendTarget, text: &str) -> Result<(), SessionError> {
        if !self.is_logged_in().await {
            return Err(SessionError::NotLoggedIn);
        }
        match target {
            SendTarget::Contact(name) => self.open_conversation(name).await?,
            SendTarget::Phone(number) => self.open_phone(number).await?,
        }
        self.compose(text).await
    }
}

const CHATS_PANE: &str = r#"[aria-label="Chats"]"#;
const CHAT_LIST: &str = "[aria-label='Chat list']";
const SEARCH_BOX: &str = r#"#side div[contenteditable="true"][data-tab="3"]"#;
const CANCEL_SEARCH: &str = r#"[aria-label="Cancel search"]"#;
const COMPOSE_BOX: &str = r#"[aria-placeholder="Type a message"]"#;
const MESSAGE_ROWS: &str = ".message-in, .message-out";
const CHAT_MENU: &str = r#"#main [aria-label="Menu"]"#;
const MENU_POPUP: &str = r#"[role="application"]"#;
const CLOSE_CHAT: &str = r#"[role="application"] [aria-label="Close chat"]"#;
const VOICE_BUTTON: &str = r#"[aria-label="Voice message"]"#;
const VOICE_SEND: &str = r#"[aria-label="Send"]"#;
const CAMERA_OFF: &str = r#"[aria-label="Stop camera"]"#;
const JOIN_MEETING: &str = r#"[aria-label="Join meeting"]"#;

const UNREAD_ROWS_JS: &str = r##"
(() => {
  const rows = document.querySelectorAll(
    "[aria-label='Chat list'] [role='listitem']:has([aria-label*='unread message']) [role='gridcell'] span[title]"
  );
  return Array.from(rows).map((el) => el.textContent || "");
})()
"##;

const MESSAGE_SCRAPE_JS: &str = r##"
(() => {
  const out = [];
  document.querySelectorAll(".message-in, .message-out").forEach((row) => {
    let text = "";
    const body = row.querySelector("[class*='copyable-text'] > div");
    if (body) {
      const span =
        body.querySelector("span[aria-label] span") || body.querySelector("span[class]");
      if (span) {
        span.childNodes.forEach((node) => {
          if (node.nodeName === "#text") text += (node.textContent || "").trim();
          if (node.nodeName === "IMG") text += node.getAttribute("alt") || "";
        });
      }
    }
    const stamp = row
      .querySelector("[class*='copyable-text']")
      ?.parentElement?.querySelector("div:nth-of-type(2) > div > span");
    out.push({
      text,
      time: stamp ? stamp.innerText : "-",
      inbound: row.classList.contains("message-in"),
    });
  });
  return out;
})()
"##;

/// `ChatSurface` over a live web messaging client, driven entirely through
/// aria labels and the client's rendered DOM.
pub struct WebChatSurface {
    browser: Browser,
    base_url: String,
}

impl WebChatSurface {
    /// Launch Chromium and load the client. The one fatal path in the
    /// process: no session, no service.
    pub async fn launch(cfg: &AppConfig) -> anyhow::Result<Self> {
        let browser = Browser::launch(BrowserConfig { headless: cfg.headless }).await?;
        browser.goto(&cfg.client_url).await?;
        info!(url = %cfg.client_url, "messaging client loaded");
        Ok(Self { browser, base_url: cfg.client_url.trim_end_matches('/').to_string() })
    }

    fn missing(selector: &str) -> SessionError {
        SessionError::ElementMissing { selector: selector.to_string() }
    }
}

#[async_trait]
impl ChatSurface for WebChatSurface {
    async fn is_logged_in(&self) -> bool {
        self.browser.wait_for(CHATS_PANE, Duration::from_secs(5)).await.is_ok()
    }

    async fn unread_contacts(&self) -> Result<Vec<ContactId>, SessionError> {
        self.browser
            .wait_for(CHAT_LIST, Duration::from_secs(60))
            .await
            .map_err(|_| Self::missing(CHAT_LIST))?;
        self.reset_search().await;
        self.browser
            .eval_json(UNREAD_ROWS_JS)
            .await
            .map_err(|e| SessionError::Browser(e.to_string()))
    }

    async fn open_conversation(&self, contact: &str) -> Result<(), SessionError> {
        self.browser
            .wait_for(SEARCH_BOX, Duration::from_secs(5))
            .await
            .map_err(|_| Self::missing(SEARCH_BOX))?;
        self.browser
            .type_into(SEARCH_BOX, contact)
            .await
            .map_err(|_| Self::missing(SEARCH_BOX))?;
        let row = format!(r#"span[title="{contact}"]"#);
        self.browser
            .wait_for(&row, Duration::from_secs(5))
            .await
            .map_err(|_| Self::missing(&row))?;
        self.browser.click(&row).await.map_err(|_| Self::missing(&row))?;
        self.browser.settle().await;
        Ok(())
    }

    async fn open_phone(&self, number: &str) -> Result<(), SessionError> {
        let url = format!("{}/send?phone={}", self.base_url, number);
        self.browser
            .goto(&url)
            .await
            .map_err(|e| SessionError::Navigation(e.to_string()))?;
        self.browser.settle().await;
        Ok(())
    }

    async fn read_messages(&self) -> Result<Vec<Message>, SessionError> {
        self.browser
            .wait_for(MESSAGE_ROWS, Duration::from_secs(10))
            .await
            .map_err(|_| Self::missing(MESSAGE_ROWS))?;
        self.browser
            .eval_json(MESSAGE_SCRAPE_JS)
            .await
            .map_err(|e| SessionError::Browser(e.to_string()))
    }

    async fn compose(&self, text: &str) -> Result<(), SessionError> {
        self.browser
            .wait_for(COMPOSE_BOX, Duration::from_secs(10))
            .await
            .map_err(|_| Self::missing(COMPOSE_BOX))?;
        self.browser
            .type_into(COMPOSE_BOX, text)
            .await
            .map_err(|_| Self::missing(COMPOSE_BOX))?;
        self.browser
            .press_enter()
            .await
            .map_err(|e| SessionError::Browser(e.to_string()))?;
        self.browser.settle().await;
        Ok(())
    }

    async fn close_conversation(&self) {
        if self.browser.wait_for(CHAT_MENU, Duration::from_millis(500)).await.is_err() {
            return;
        }
        if self.browser.click(CHAT_MENU).await.is_err() {
            return;
        }
        if self.browser.wait_for(MENU_POPUP, Duration::from_secs(1)).await.is_err() {
            return;
        }
        if self.browser.wait_for(CLOSE_CHAT, Duration::from_secs(1)).await.is_ok() {
            let _ = self.browser.click(CLOSE_CHAT).await;
        }
    }

    async fn reset_search(&self) {
        if self.browser.wait_for(CANCEL_SEARCH, Duration::from_millis(500)).await.is_ok() {
            let _ = self.browser.click(CANCEL_SEARCH).await;
        }
    }

    async fn set_offline(&self, offline: bool) {
        // Advisory: a failure here only risks leaking a read receipt.
        if let Err(e) = self.browser.set_network_conditions(offline).await {
            debug!(offline, error = %e, "network condition emulation failed");
        }
    }

    async fn start_voice_note(&self) -> Result<(), SessionError> {
        self.browser
            .wait_for(VOICE_BUTTON, Duration::from_secs(5))
            .await
            .map_err(|_| Self::missing(VOICE_BUTTON))?;
        self.browser.click(VOICE_BUTTON).await.map_err(|_| Self::missing(VOICE_BUTTON))
    }

    async fn finish_voice_note(&self) -> Result<(), SessionError> {
        self.browser
            .wait_for(VOICE_SEND, Duration::from_secs(5))
            .await
            .map_err(|_| Self::missing(VOICE_SEND))?;
        self.browser.click(VOICE_SEND).await.map_err(|_| Self::missing(VOICE_SEND))?;
        self.browser.settle().await;
        Ok(())
    }

    async fn join_meeting(&self, link: &str) -> Result<(), SessionError> {
        self.browser
            .open_aux(link)
            .await
            .map_err(|e| SessionError::Navigation(e.to_string()))?;
        sleep(Duration::from_secs(1)).await;
        // Camera mute is best-effort: some rooms render no such control.
        if let Err(e) = self.browser.aux_click(CAMERA_OFF).await {
            debug!(error = %e, "camera control not found");
        }
        sleep(Duration::from_secs(1)).await;
        self.browser
            .aux_click(JOIN_MEETING)
            .await
            .map_err(|_| Self::missing(JOIN_MEETING))?;
        sleep(Duration::from_secs(1)).await;
        Ok(())
    }

    async fn leave_meeting(&self) -> Result<(), SessionError> {
        self.browser
            .close_aux()
            .await
            .map_err(|e| SessionError::Browser(e.to_string()))
    }

    async fn screenshot_b64(&self) -> Result<String, SessionError> {
        self.browser
            .screenshot_b64()
            .await
            .map_err(|e| SessionError::Browser(e.to_string()))
    }
}
