use crate::features::capture::Placemark;
use crate::features::workflow::{ClassificationResult, WorkflowError};
use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum Screen {
    Capture,
    Loading,
    Result,
}

/// Everything the screens render from. The test selection itself lives in the
/// selection store; this only caches what the capture screen last showed.
pub struct AppState {
    pub nav_stack: Vec<Screen>,
    pub locale: String,
    pub last_error: Option<String>,
    /// Label derived from the latest selection event.
    pub capture_label: Option<String>,
    pub selection_sequence: u64,
    pub loading_message: Option<String>,
    pub classification_in_flight: bool,
    /// Bumped per capture and on reset; results tagged with an older value
    /// are dropped.
    pub classification_generation: u64,
    pub last_result: Option<ClassificationResult>,
    pub result_thumbnail: Option<String>,
    pub last_failure: Option<WorkflowError>,
    pub placemark: Option<Placemark>,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            nav_stack: Vec::new(),
            locale: "en".into(),
            last_error: None,
            capture_label: None,
            selection_sequence: 0,
            loading_message: None,
            classification_in_flight: false,
            classification_generation: 0,
            last_result: None,
            result_thumbnail: None,
            last_failure: None,
            placemark: None,
        }
    }

    pub fn ensure_navigation(&mut self) {
        if self.nav_stack.is_empty() {
            self.nav_stack.push(Screen::Capture);
        }
    }

    pub fn current_screen(&self) -> Screen {
        self.nav_stack.last().copied().unwrap_or(Screen::Capture)
    }

    pub fn push_screen(&mut self, screen: Screen) {
        self.ensure_navigation();
        if self.current_screen() != screen {
            self.nav_stack.push(screen);
        }
    }

    pub fn replace_current(&mut self, screen: Screen) {
        self.ensure_navigation();
        if let Some(last) = self.nav_stack.last_mut() {
            *last = screen;
        }
    }

    pub fn pop_screen(&mut self) {
        self.ensure_navigation();
        if self.nav_stack.len() > 1 {
            self.nav_stack.pop();
        }
    }

    pub fn reset_navigation(&mut self) {
        self.nav_stack.clear();
        self.nav_stack.push(Screen::Capture);
    }

    /// Leaves the cached capture label alone: it mirrors the selection store,
    /// which outlives any reset.
    pub fn reset_runtime(&mut self) {
        self.last_error = None;
        self.loading_message = None;
        self.classification_in_flight = false;
        self.classification_generation += 1;
        self.clear_result();
    }

    pub fn clear_result(&mut self) {
        self.last_result = None;
        self.result_thumbnail = None;
        self.last_failure = None;
        self.placemark = None;
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
