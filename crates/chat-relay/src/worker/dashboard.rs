use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{info, warn};

type Opener = fn(&str) -> std::io::Result<()>;

/// Opens the history dashboard in a browser, once per process.
pub struct DashboardLauncher {
    url: String,
    delay: Duration,
    launched: AtomicBool,
    opener: Opener,
}

impl DashboardLauncher {
    pub fn new(url: impl Into<String>, delay: Duration) -> Self {
        Self {
            url: url.into(),
            delay,
            launched: AtomicBool::new(false),
            opener: open_in_browser,
        }
    }

    pub fn with_opener(mut self, opener: Opener) -> Self {
        self.opener = opener;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Schedule the browser launch; returns false if it already happened.
    pub fn launch_once(&self) -> bool {
        if self.launched.swap(true, Ordering::SeqCst) {
            return false;
        }

        let url = self.url.clone();
        let delay = self.delay;
        let opener = self.opener;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match opener(&url) {
                Ok(()) => info!("Opened dashboard at {}", url),
                Err(e) => warn!("Could not open dashboard at {}: {}", url, e),
            }
        });

        true
    }
}

fn open_in_browser(url: &str) -> std::io::Result<()> {
    #[cfg(target_os = "windows")]
    let mut command = {
        let mut c = Command::new("cmd");
        c.args(["/C", "start", "", url]);
        c
    };

    #[cfg(target_os = "macos")]
    let mut command = {
        let mut c = Command::new("open");
        c.arg(url);
        c
    };

    #[cfg(all(unix, not(target_os = "macos")))]
    let mut command = {
        let mut c = Command::new("xdg-open");
        c.arg(url);
        c
    };

    command.spawn().map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    static OPENED: AtomicUsize = AtomicUsize::new(0);

    fn record_open(url: &str) -> std::io::Result<()> {
        assert_eq!(url, "http://127.0.0.1:5000");
        OPENED.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_launches_once_after_delay() {
        let launcher = DashboardLauncher::new("http://127.0.0.1:5000", Duration::from_secs(2))
            .with_opener(record_open);

        assert!(launcher.launch_once());
        assert!(!launcher.launch_once());

        tokio::time::sleep(Duration::from_millis(1900)).await;
        assert_eq!(OPENED.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        tokio::task::yield_now().await;
        assert_eq!(OPENED.load(Ordering::SeqCst), 1);
    }
}
