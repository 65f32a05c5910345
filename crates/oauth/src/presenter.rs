use tracing::{info, warn};

use crate::Result;

/// Shows an authorization URL to the human doing the login.
///
/// Failing to present is not fatal to the flow: the engine logs it and keeps
/// waiting for the callback, and the URL is repeated in any timeout error.
pub trait UrlPresenter: Send + Sync {
    fn present(&self, url: &str) -> Result<()>;
}

/// Opens the system browser, printing the URL when no browser can be launched.
#[derive(Debug, Default, Clone, Copy)]
pub struct BrowserPresenter;

impl UrlPresenter for BrowserPresenter {
    fn present(&self, url: &str) -> Result<()> {
        info!("opening browser for login");
        if let Err(e) = open::that(url) {
            warn!(error = %e, url = %url, "could not open browser");
            println!("Could not open browser. Please visit:\n{url}");
            return Err(e.into());
        }
        Ok(())
    }
}
