use anyhow::Result;
use base64::{engine::general_purpose::STANDARD, Engine};
use chromiumoxide::browser::Browser as OxideBrowser;
use chromiumoxide::cdp::browser_protocol::browser::{GrantPermissionsParams, PermissionType};
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType, InsertTextParams,
};
use chromiumoxide::cdp::browser_protocol::network::{
    EmulateNetworkConditionsParams, EnableParams,
};
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tokio::time::sleep;

#[derive(Clone)]
pub struct BrowserConfig {
    pub headless: bool,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self { headless: false }
    }
}

/// Chromium session holding the primary messaging-client page and, while a
/// call is active, a secondary meeting tab.
pub struct Browser {
    page: Page,
    aux: Mutex<Option<Page>>,
    browser: OxideBrowser,
}

impl Browser {
    pub async fn launch(cfg: BrowserConfig) -> Result<Self> {
        let mut builder = chromiumoxide::browser::BrowserConfig::builder();
        if !cfg.headless {
            builder = builder.with_head();
        }
        // Use a unique user data dir per run to avoid ProcessSingleton profile lock conflicts
        // observed when Chromium is restarted rapidly or multiple instances are spawned.
        let ts = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis();
        let mut profile_dir: PathBuf = std::env::temp_dir();
        profile_dir.push(format!("chatpilot-profile-{}-{}", std::process::id(), ts));
        let _ = std::fs::create_dir_all(&profile_dir);
        builder = builder.user_data_dir(profile_dir.clone());
        builder = builder
            .arg(format!("--user-data-dir={}", profile_dir.display()))
            .arg("--no-first-run")
            .arg("--no-default-browser-check");
        let bcfg = builder.build().map_err(|e| anyhow::anyhow!(e))?;
        let (browser, mut handler) = OxideBrowser::launch(bcfg).await?;
        tokio::spawn(async move {
            while let Some(_ev) = handler.next().await {}
        });
        let page = browser.new_page("about:blank").await?;
        set_viewport(&page).await;
        // Network domain must be enabled before conditions can be emulated.
        let _ = page.execute(EnableParams::default()).await;
        Ok(Self { page, aux: Mutex::new(None), browser })
    }

    pub async fn goto(&self, url: &str) -> Result<()> {
        self.page.goto(url).await?;
        self.page.wait_for_navigation().await?;
        Ok(())
    }

    /// Poll for a selector until it resolves or the deadline passes.
    pub async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.page.find_element(selector).await.is_ok() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                anyhow::bail!("element not found within {:?}: {}", timeout, selector);
            }
            sleep(Duration::from_millis(100)).await;
        }
    }

    pub async fn click(&self, selector: &str) -> Result<()> {
        self.page.find_element(selector).await?.click().await?;
        Ok(())
    }

    /// Focus an element and feed text through CDP Input.insertText.
    pub async fn type_into(&self, selector: &str, text: &str) -> Result<()> {
        self.page.find_element(selector).await?.click().await?;
        self.page
            .execute(InsertTextParams { text: text.to_string() })
            .await?;
        Ok(())
    }

    pub async fn press_enter(&self) -> Result<()> {
        let down = DispatchKeyEventParams::builder()
            .r#type(DispatchKeyEventType::KeyDown)
            .key("Enter")
            .code("Enter")
            .text("\r")
            .windows_virtual_key_code(13)
            .build()
            .map_err(|e| anyhow::anyhow!(e))?;
        let up = DispatchKeyEventParams::builder()
            .r#type(DispatchKeyEventType::KeyUp)
            .key("Enter")
            .code("Enter")
            .windows_virtual_key_code(13)
            .build()
            .map_err(|e| anyhow::anyhow!(e))?;
        self.page.execute(down).await?;
        self.page.execute(up).await?;
        Ok(())
    }

    /// Evaluate an expression in the page and deserialize its JSON value.
    pub async fn eval_json<T: DeserializeOwned>(&self, js: &str) -> Result<T> {
        Ok(self.page.evaluate(js).await?.into_value()?)
    }

    /// Emulate network conditions on the primary page. Offline zeroes
    /// throughput; online lifts throttling entirely.
    pub async fn set_network_conditions(&self, offline: bool) -> Result<()> {
        let throughput = if offline { 0.0 } else { -1.0 };
        let params = EmulateNetworkConditionsParams::builder()
            .offline(offline)
            .latency(0.0)
            .download_throughput(throughput)
            .upload_throughput(throughput)
            .build()
            .map_err(|e| anyhow::anyhow!(e))?;
        self.page.execute(params).await?;
        Ok(())
    }

    /// Open the secondary meeting tab, granting it capture permissions first.
    pub async fn open_aux(&self, url: &str) -> Result<()> {
        let _ = self
            .browser
            .execute(GrantPermissionsParams {
                permissions: vec![PermissionType::AudioCapture, PermissionType::VideoCapture],
                origin: Some(url.to_string()),
                browser_context_id: None,
            })
            .await;
        let page = self.browser.new_page("about:blank").await?;
        set_viewport(&page).await;
        page.goto(url).await?;
        page.wait_for_navigation().await?;
        *self.aux.lock().await = Some(page);
        Ok(())
    }

    pub async fn aux_click(&self, selector: &str) -> Result<()> {
        let guard = self.aux.lock().await;
        let page = guard
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("no secondary tab open"))?;
        page.find_element(selector).await?.click().await?;
        Ok(())
    }

    /// Close the secondary tab, if any, and return the primary page to front.
    pub async fn close_aux(&self) -> Result<()> {
        if let Some(page) = self.aux.lock().await.take() {
            page.close().await?;
        }
        self.page.bring_to_front().await?;
        Ok(())
    }

    pub async fn screenshot_b64(&self) -> Result<String> {
        use chromiumoxide::page::ScreenshotParamsBuilder;
        let take = || async {
            self.page
                .screenshot(ScreenshotParamsBuilder::default().build())
                .await
        };
        match take().await {
            Ok(bytes) => Ok(STANDARD.encode(bytes)),
            Err(e) => {
                let msg = format!("{}", e);
                if msg.contains("0 width") || msg.contains("0 height") {
                    // Force viewport and retry once
                    set_viewport(&self.page).await;
                    sleep(Duration::from_millis(50)).await;
                    let bytes = take().await?;
                    return Ok(STANDARD.encode(bytes));
                }
                Err(anyhow::anyhow!(e))
            }
        }
    }

    /// Fixed short pause standing in for network settling after navigation
    /// and sends.
    pub async fn settle(&self) {
        sleep(Duration::from_millis(400)).await;
    }
}

async fn set_viewport(page: &Page) {
    let _ = page
        .execute(
            SetDeviceMetricsOverrideParams::builder()
                .width(1366)
                .height(768)
                .device_scale_factor(1.0)
                .mobile(false)
                .build()
                .unwrap(),
        )
        .await;
}
