use std::sync::{Arc, Mutex, PoisonError};

/// Page-level side effects the flow is allowed to trigger.
pub trait PageSurface {
    fn show_loader(&self);
    fn hide_loader(&self);
    fn scroll_to_top(&self);
    fn reload(&self);
}

/// Page surface for headless runs; every action becomes a log line.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingPage;

impl PageSurface for LoggingPage {
    fn show_loader(&self) {
        tracing::info!("loader shown");
    }

    fn hide_loader(&self) {
        tracing::info!("loader hidden");
    }

    fn scroll_to_top(&self) {
        tracing::debug!("scrolled to top");
    }

    fn reload(&self) {
        tracing::info!("page reload requested");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageAction {
    ShowLoader,
    HideLoader,
    ScrollToTop,
    Reload,
}

/// Page surface that remembers every action in order. Clones share the log.
#[derive(Debug, Clone, Default)]
pub struct RecordingPage {
    actions: Arc<Mutex<Vec<PageAction>>>,
}

impl RecordingPage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn actions(&self) -> Vec<PageAction> {
        self.actions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether the loader is currently visible, replaying the recorded toggles.
    pub fn loader_visible(&self) -> bool {
        self.actions()
            .iter()
            .rev()
            .find_map(|action| match action {
                PageAction::ShowLoader => Some(true),
                PageAction::HideLoader => Some(false),
                _ => None,
            })
            .unwrap_or(false)
    }

    pub fn reloaded(&self) -> bool {
        self.actions().contains(&PageAction::Reload)
    }

    fn record(&self, action: PageAction) {
        self.actions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(action);
    }
}

impl PageSurface for RecordingPage {
    fn show_loader(&self) {
        self.record(PageAction::ShowLoader);
    }

    fn hide_loader(&self) {
        self.record(PageAction::HideLoader);
    }

    fn scroll_to_top(&self) {
        self.record(PageAction::ScrollToTop);
    }

    fn reload(&self) {
        self.record(PageAction::Reload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loader_visibility_follows_last_toggle() {
        let page = RecordingPage::new();
        assert!(!page.loader_visible());
        page.show_loader();
        page.scroll_to_top();
        assert!(page.loader_visible());
        page.hide_loader();
        assert!(!page.loader_visible());
        assert!(!page.reloaded());
    }
}
