use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use std::time::Duration;
use thirtyfour::prelude::*;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::models::RawPage;

/// Loads one URL into a page snapshot. Failures surface as errors the
/// orchestrator catches per URL.
#[async_trait]
pub trait PageLoader: Send + Sync {
    async fn load(&self, url: &str) -> Result<RawPage>;
}

/// Acquiring a browser context beyond the pool cap is a hard error,
/// not a queued wait. Callers must release a context before another
/// can be handed out.
#[derive(Debug, Error)]
#[error("browser pool exhausted ({capacity} contexts in use)")]
pub struct PoolExhausted {
    pub capacity: usize,
}

/// Bookkeeping for a fixed-capacity resource pool. Kept separate from
/// the WebDriver plumbing so the accounting is testable on its own.
struct PoolState<T> {
    capacity: usize,
    live: usize,
    idle: Vec<T>,
}

#[derive(Debug)]
enum Slot<T> {
    /// An existing idle resource.
    Ready(T),
    /// Capacity reserved; the caller creates the resource and must
    /// call `creation_failed` if that fails.
    Vacant,
}

impl<T> PoolState<T> {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            live: 0,
            idle: Vec::new(),
        }
    }

    fn checkout(&mut self) -> Result<Slot<T>, PoolExhausted> {
        if let Some(resource) = self.idle.pop() {
            return Ok(Slot::Ready(resource));
        }
        if self.live < self.capacity {
            self.live += 1;
            return Ok(Slot::Vacant);
        }
        Err(PoolExhausted {
            capacity: self.capacity,
        })
    }

    fn creation_failed(&mut self) {
        self.live = self.live.saturating_sub(1);
    }

    fn put_back(&mut self, resource: T) {
        self.idle.push(resource);
    }

    fn retire(&mut self) {
        self.live = self.live.saturating_sub(1);
    }

    fn drain_idle(&mut self) -> Vec<T> {
        self.live = self.live.saturating_sub(self.idle.len());
        std::mem::take(&mut self.idle)
    }
}

/// Pool of headless browser sessions against one WebDriver server.
/// Constructed explicitly and passed by reference; no ambient
/// singleton.
pub struct BrowserPool {
    webdriver_url: String,
    nav_timeout: Duration,
    state: Mutex<PoolState<WebDriver>>,
}

impl BrowserPool {
    pub fn new(webdriver_url: &str, capacity: usize, nav_timeout: Duration) -> Self {
        Self {
            webdriver_url: webdriver_url.to_string(),
            nav_timeout,
            state: Mutex::new(PoolState::new(capacity)),
        }
    }

    async fn acquire(&self) -> Result<WebDriver> {
        let slot = self.state.lock().await.checkout()?;
        match slot {
            Slot::Ready(driver) => Ok(driver),
            Slot::Vacant => match self.new_session().await {
                Ok(driver) => Ok(driver),
                Err(e) => {
                    self.state.lock().await.creation_failed();
                    Err(e)
                }
            },
        }
    }

    async fn new_session(&self) -> Result<WebDriver> {
        let mut caps = DesiredCapabilities::chrome();
        caps.set_headless()?;
        caps.add_arg("--disable-gpu")?;
        caps.add_arg("--no-sandbox")?;
        let driver = WebDriver::new(&self.webdriver_url, caps)
            .await
            .with_context(|| {
                format!(
                    "Failed to start a browser session via {}. Is a WebDriver server running?",
                    self.webdriver_url
                )
            })?;
        driver.set_page_load_timeout(self.nav_timeout).await?;
        Ok(driver)
    }

    async fn release(&self, driver: WebDriver) {
        self.state.lock().await.put_back(driver);
    }

    /// A session that failed mid-navigation may be wedged; quit it
    /// instead of returning it to the pool.
    async fn discard(&self, driver: WebDriver) {
        self.state.lock().await.retire();
        if let Err(e) = driver.quit().await {
            warn!(error = %e, "failed to quit browser session");
        }
    }

    pub async fn shutdown(&self) {
        let drivers = self.state.lock().await.drain_idle();
        for driver in drivers {
            if let Err(e) = driver.quit().await {
                warn!(error = %e, "failed to quit browser session on shutdown");
            }
        }
    }

    async fn navigate(&self, driver: &WebDriver, url: &str) -> Result<RawPage> {
        let snapshot = async {
            driver.goto(url).await?;
            let html = driver.source().await?;
            let text = driver.find(By::Tag("body")).await?.text().await?;
            Ok::<_, anyhow::Error>(RawPage {
                url: url.to_string(),
                html,
                text,
            })
        };
        let page = tokio::time::timeout(self.nav_timeout, snapshot)
            .await
            .map_err(|_| anyhow!("navigation timed out after {:?}: {}", self.nav_timeout, url))??;

        if page.html.trim().is_empty() && page.text.trim().is_empty() {
            return Err(anyhow!("no content found on page: {}", url));
        }
        Ok(page)
    }
}

#[async_trait]
impl PageLoader for BrowserPool {
    async fn load(&self, url: &str) -> Result<RawPage> {
        let driver = self.acquire().await?;
        debug!(url, "loading page");
        match self.navigate(&driver, url).await {
            Ok(page) => {
                self.release(driver).await;
                Ok(page)
            }
            Err(e) => {
                self.discard(driver).await;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_checkout_up_to_capacity() {
        let mut state: PoolState<u32> = PoolState::new(2);
        assert!(matches!(state.checkout(), Ok(Slot::Vacant)));
        assert!(matches!(state.checkout(), Ok(Slot::Vacant)));
        // Third acquisition is a hard error, not a wait.
        let err = state.checkout().unwrap_err();
        assert_eq!(err.capacity, 2);
    }

    #[test]
    fn test_pool_put_back_and_reuse() {
        let mut state: PoolState<u32> = PoolState::new(1);
        assert!(matches!(state.checkout(), Ok(Slot::Vacant)));
        state.put_back(7);
        match state.checkout() {
            Ok(Slot::Ready(v)) => assert_eq!(v, 7),
            _ => panic!("expected idle resource"),
        }
    }

    #[test]
    fn test_pool_creation_failure_frees_slot() {
        let mut state: PoolState<u32> = PoolState::new(1);
        assert!(matches!(state.checkout(), Ok(Slot::Vacant)));
        state.creation_failed();
        assert!(matches!(state.checkout(), Ok(Slot::Vacant)));
    }

    #[test]
    fn test_pool_retire_frees_slot() {
        let mut state: PoolState<u32> = PoolState::new(1);
        assert!(matches!(state.checkout(), Ok(Slot::Vacant)));
        state.retire();
        assert!(matches!(state.checkout(), Ok(Slot::Vacant)));
    }

    #[test]
    fn test_pool_drain_idle() {
        let mut state: PoolState<u32> = PoolState::new(3);
        for _ in 0..3 {
            assert!(matches!(state.checkout(), Ok(Slot::Vacant)));
        }
        state.put_back(1);
        state.put_back(2);
        let drained = state.drain_idle();
        assert_eq!(drained.len(), 2);
        // One resource still checked out; two slots free again.
        assert!(matches!(state.checkout(), Ok(Slot::Vacant)));
        assert!(matches!(state.checkout(), Ok(Slot::Vacant)));
        assert!(state.checkout().is_err());
    }

    #[tokio::test]
    #[ignore] // Requires a running WebDriver server.
    async fn test_load_real_page() {
        let pool = BrowserPool::new("http://localhost:9515", 1, Duration::from_secs(20));
        let result = pool.load("https://example.com").await;
        pool.shutdown().await;
        assert!(result.is_ok() || result.is_err());
    }
}
