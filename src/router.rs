use crate::config::{ClassifierMode, ConfigError, CoreConfig};
use crate::features::capture::{
    CapturedImage, Coordinate, LatestFix, LocationProvider, Placemark,
};
use crate::features::classifier::{
    Classifier, ClassifierError, FixedLabelClassifier, HostClassifier, Prediction,
};
use crate::features::deep_link::LinkParser;
use crate::features::presenter::capture_label;
use crate::features::screens::{
    render_capture_screen, render_loading_screen, render_result_screen,
};
use crate::features::selection::{commit_link, SelectionEvent, SelectionStore};
use crate::features::workflow::{ClassificationResult, ClassificationWorkflow, WorkflowError};
use crate::i18n::update_locale;
use crate::state::{AppState, Screen};
use chrono::{DateTime, TimeZone, Utc};
use rust_i18n::t;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::runtime::{Builder, Runtime};
use tokio::task::JoinHandle;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("failed to start worker runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Work finished off the dispatch thread, applied on the next command.
enum Notification {
    SelectionChanged(SelectionEvent),
    /// The photo passed the header check but could not be decoded.
    CaptureFailed {
        generation: u64,
        error: String,
    },
    ClassificationFinished {
        generation: u64,
        outcome: Result<ClassificationResult, WorkflowError>,
        thumbnail: Option<String>,
    },
}

type NotificationQueue = Arc<Mutex<Vec<Notification>>>;

fn lock_queue(queue: &Mutex<Vec<Notification>>) -> MutexGuard<'_, Vec<Notification>> {
    queue.lock().unwrap_or_else(|poisoned| {
        tracing::warn!("notification queue poisoned, recovering");
        poisoned.into_inner()
    })
}

fn push_notification(queue: &NotificationQueue, notification: Notification) {
    lock_queue(queue).push(notification);
}

/// Everything one app process needs: the selection store, the capture
/// workflow and the screen state the host renders.
pub struct Core {
    config: CoreConfig,
    runtime: Runtime,
    store: SelectionStore,
    parser: LinkParser,
    workflow: Arc<ClassificationWorkflow>,
    host_classifier: Option<Arc<HostClassifier>>,
    location: LatestFix,
    ui: Mutex<AppState>,
    notifications: NotificationQueue,
    _selection_listener: JoinHandle<()>,
}

impl Core {
    pub fn new(config: CoreConfig) -> Result<Self, CoreError> {
        config.validate()?;
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("stripscan-worker")
            .enable_all()
            .build()?;

        let store = SelectionStore::new(config.event_capacity);
        let notifications: NotificationQueue = Arc::new(Mutex::new(Vec::new()));

        let listener = {
            let _guard = runtime.enter();
            let queue = Arc::clone(&notifications);
            store.on_change(move |event| {
                push_notification(&queue, Notification::SelectionChanged(event.clone()));
            })
        };

        let mut host_classifier = None;
        let classifier: Arc<dyn Classifier> = match &config.classifier {
            ClassifierMode::Host => {
                let host = Arc::new(HostClassifier::new());
                host_classifier = Some(Arc::clone(&host));
                host
            }
            ClassifierMode::Fixed { label } => Arc::new(FixedLabelClassifier::new(label.clone())),
        };
        let workflow = Arc::new(ClassificationWorkflow::new(
            classifier,
            config.default_test_type,
        ));

        tracing::info!(
            scheme = config.link_scheme.as_deref().unwrap_or("*"),
            default_test_type = %config.default_test_type,
            host_inference = host_classifier.is_some(),
            "core started"
        );

        Ok(Self {
            parser: LinkParser::new(config.link_scheme.as_deref()),
            config,
            runtime,
            store,
            workflow,
            host_classifier,
            location: LatestFix::new(),
            ui: Mutex::new(AppState::new()),
            notifications,
            _selection_listener: listener,
        })
    }

    #[cfg(test)]
    pub fn store(&self) -> &SelectionStore {
        &self.store
    }

    fn ui_lock(&self) -> MutexGuard<'_, AppState> {
        match self.ui.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("ui state mutex poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn drain_notifications(&self) -> Vec<Notification> {
        lock_queue(&self.notifications).drain(..).collect()
    }

    pub fn handle_command(&self, command: Command) -> Value {
        let mut state = self.ui_lock();
        self.apply_notifications(&mut state);
        state.ensure_navigation();

        let action = match parse_action(command) {
            Ok(action) => action,
            Err(err) => {
                tracing::warn!(error = %err, "command rejected");
                state.last_error = Some(err);
                return self.respond(&state);
            }
        };

        match action {
            Action::Init { locale } => {
                if let Some(locale) = locale {
                    update_locale(&mut state, &locale);
                }
            }
            Action::OpenLink { url } => match commit_link(&self.store, &self.parser, &url) {
                Ok(selection) => {
                    // The listener refreshes the label too; setting it here keeps
                    // this response current.
                    state.capture_label = Some(capture_label(&selection));
                    state.selection_sequence = self.store.sequence();
                    state.last_error = None;
                }
                Err(err) => state.last_error = Some(err.code().to_string()),
            },
            Action::CaptureScreen => {
                state.last_error = None;
                state.reset_navigation();
            }
            Action::LocationUpdate { coordinate } => self.location.update(coordinate),
            Action::Classify {
                path,
                location,
                captured_at,
            } => {
                if let Some(coordinate) = location {
                    self.location.update(coordinate);
                }
                let location = self.location.current_location();
                self.start_classification(&mut state, &path, location, captured_at)
            }
            Action::InferenceResult { request_id, outcome } => match &self.host_classifier {
                Some(host) => {
                    if !host.complete(request_id, outcome) {
                        state.last_error = Some("unknown_inference_request".into());
                    }
                }
                None => state.last_error = Some("host_inference_disabled".into()),
            },
            Action::LocationResolved { placemark } => {
                state.placemark = (!placemark.is_empty()).then_some(placemark);
            }
            Action::Back => {
                if state.current_screen() == Screen::Result {
                    state.clear_result();
                }
                state.pop_screen();
            }
            Action::Reset => {
                if let Some(host) = &self.host_classifier {
                    let cancelled = host.cancel_all();
                    if cancelled > 0 {
                        tracing::info!(cancelled, "pending inference cancelled by reset");
                    }
                }
                state.reset_runtime();
                state.reset_navigation();
            }
        }

        self.respond(&state)
    }

    fn start_classification(
        &self,
        state: &mut AppState,
        path: &str,
        location: Option<Coordinate>,
        captured_at: DateTime<Utc>,
    ) {
        if state.classification_in_flight {
            state.last_error = Some("classification_in_progress".into());
            return;
        }

        // Header only here; the full decode runs on the worker.
        let (width, height) = match CapturedImage::read_dimensions(path) {
            Ok(dims) => dims,
            Err(err) => {
                tracing::warn!(error = %err, "captured image unusable");
                state.last_error = Some(format!("{}:{err}", err.code()));
                return;
            }
        };
        tracing::debug!(width, height, "capture accepted");

        state.clear_result();
        state.last_error = None;
        state.classification_in_flight = true;
        state.classification_generation += 1;
        state.loading_message = Some(t!("loading.classifying").to_string());
        state.push_screen(Screen::Loading);

        let generation = state.classification_generation;
        let selection = self.store.get();
        let workflow = Arc::clone(&self.workflow);
        let queue = Arc::clone(&self.notifications);
        let max_side = self.config.thumbnail_max_side;
        let path = path.to_string();

        self.runtime.spawn(async move {
            let decoded = tokio::task::spawn_blocking(move || CapturedImage::from_path(path))
                .await
                .map_err(|e| format!("capture_decode_aborted:{e}"))
                .and_then(|res| res.map_err(|e| format!("{}:{e}", e.code())));
            let image = match decoded {
                Ok(image) => image,
                Err(error) => {
                    tracing::warn!(%error, "captured image could not be decoded");
                    push_notification(&queue, Notification::CaptureFailed { generation, error });
                    return;
                }
            };

            let outcome = workflow
                .run(image, selection.as_ref(), location, captured_at)
                .await;
            let thumbnail = outcome.as_ref().ok().and_then(|result| {
                result
                    .image()
                    .thumbnail_png_base64(max_side)
                    .map_err(|e| tracing::warn!(error = %e, "thumbnail failed"))
                    .ok()
            });
            push_notification(
                &queue,
                Notification::ClassificationFinished {
                    generation,
                    outcome,
                    thumbnail,
                },
            );
        });
    }

    fn apply_notifications(&self, state: &mut AppState) {
        for notification in self.drain_notifications() {
            match notification {
                Notification::SelectionChanged(event) => {
                    if event.sequence() <= state.selection_sequence {
                        continue;
                    }
                    state.selection_sequence = event.sequence();
                    // The store may already hold something newer than the event.
                    let label = match self.store.get() {
                        Some(current) => capture_label(&current),
                        None => capture_label(event.selection()),
                    };
                    state.capture_label = Some(label);
                }
                Notification::CaptureFailed { generation, error } => {
                    if generation != state.classification_generation {
                        continue;
                    }
                    state.classification_in_flight = false;
                    state.loading_message = None;
                    state.last_error = Some(error);
                    if state.current_screen() == Screen::Loading {
                        state.pop_screen();
                    }
                }
                Notification::ClassificationFinished {
                    generation,
                    outcome,
                    thumbnail,
                } => {
                    if generation != state.classification_generation {
                        tracing::debug!(generation, "dropping stale classification result");
                        continue;
                    }
                    state.classification_in_flight = false;
                    state.loading_message = None;
                    match outcome {
                        Ok(result) => {
                            tracing::debug!(id = %result.id(), label = result.label(), "showing result");
                            state.last_result = Some(result);
                            state.result_thumbnail = thumbnail;
                            state.last_failure = None;
                        }
                        Err(err) => {
                            tracing::debug!(code = err.code(), "showing classification failure");
                            state.last_result = None;
                            state.last_failure = Some(err);
                        }
                    }
                    if state.current_screen() == Screen::Loading {
                        state.replace_current(Screen::Result);
                    } else {
                        state.push_screen(Screen::Result);
                    }
                }
            }
        }
    }

    fn respond(&self, state: &AppState) -> Value {
        let mut ui = self.render_ui(state);
        if let Some(host) = &self.host_classifier {
            let requests = host.drain_requests();
            if let Some(obj) = ui.as_object_mut() {
                obj.insert("pending_inference".into(), json!(requests));
            }
        }
        ui
    }

    fn render_ui(&self, state: &AppState) -> Value {
        match state.current_screen() {
            Screen::Capture => {
                let selection = self.store.get();
                render_capture_screen(
                    state,
                    selection.as_ref(),
                    self.workflow.default_test_type(),
                )
            }
            Screen::Loading => render_loading_screen(state),
            Screen::Result => render_result_screen(state),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct Command {
    pub action: String,
    pub locale: Option<String>,
    pub url: Option<String>,
    pub path: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub captured_at_ms: Option<i64>,
    pub request_id: Option<String>,
    pub predictions: Option<Vec<Prediction>>,
    pub error: Option<String>,
    /// `model_load` or `inference` (the default) when `error` is set.
    pub error_kind: Option<String>,
    pub place_name: Option<String>,
    pub locality: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug)]
enum Action {
    Init {
        locale: Option<String>,
    },
    OpenLink {
        url: String,
    },
    CaptureScreen,
    LocationUpdate {
        coordinate: Coordinate,
    },
    Classify {
        path: String,
        location: Option<Coordinate>,
        captured_at: DateTime<Utc>,
    },
    InferenceResult {
        request_id: Uuid,
        outcome: Result<Vec<Prediction>, ClassifierError>,
    },
    LocationResolved {
        placemark: Placemark,
    },
    Back,
    Reset,
}

fn parse_action(command: Command) -> Result<Action, String> {
    let Command {
        action,
        locale,
        url,
        path,
        latitude,
        longitude,
        captured_at_ms,
        request_id,
        predictions,
        error,
        error_kind,
        place_name,
        locality,
        country,
    } = command;

    match action.as_str() {
        "init" => Ok(Action::Init { locale }),
        "open_link" => Ok(Action::OpenLink {
            url: url.ok_or_else(|| "missing_url".to_string())?,
        }),
        "capture_screen" => Ok(Action::CaptureScreen),
        "location_update" => Ok(Action::LocationUpdate {
            coordinate: coordinate_from(latitude, longitude)
                .ok_or_else(|| "invalid_location".to_string())?,
        }),
        "classify" => {
            let path = path.ok_or_else(|| "missing_image_path".to_string())?;
            let location = coordinate_from(latitude, longitude);
            let captured_at = match captured_at_ms {
                Some(ms) => Utc
                    .timestamp_millis_opt(ms)
                    .single()
                    .ok_or_else(|| "invalid_captured_at".to_string())?,
                None => Utc::now(),
            };
            Ok(Action::Classify {
                path,
                location,
                captured_at,
            })
        }
        "inference_result" => {
            let raw_id = request_id.ok_or_else(|| "missing_request_id".to_string())?;
            let request_id =
                Uuid::parse_str(&raw_id).map_err(|_| "invalid_request_id".to_string())?;
            let outcome = match (error, error_kind.as_deref()) {
                (Some(err), Some("model_load")) => Err(ClassifierError::ModelLoad(err)),
                (Some(err), None | Some("inference")) => Err(ClassifierError::Inference(err)),
                (Some(_), Some(other)) => return Err(format!("unknown_error_kind:{other}")),
                (None, _) => Ok(predictions.unwrap_or_default()),
            };
            Ok(Action::InferenceResult {
                request_id,
                outcome,
            })
        }
        "location_resolved" => Ok(Action::LocationResolved {
            placemark: Placemark {
                name: place_name,
                locality,
                country,
            },
        }),
        "back" => Ok(Action::Back),
        "reset" => Ok(Action::Reset),
        other => Err(format!("unknown_action:{other}")),
    }
}

fn coordinate_from(latitude: Option<f64>, longitude: Option<f64>) -> Option<Coordinate> {
    let (lat, lon) = (latitude?, longitude?);
    let coordinate = Coordinate::new(lat, lon);
    if coordinate.is_none() {
        tracing::warn!(lat, lon, "ignoring out-of-range location");
    }
    coordinate
}

pub fn error_ui(message: &str) -> Value {
    json!({
        "type": "Column",
        "padding": 24,
        "children": [
            { "type": "Text", "text": "Error", "size": 18.0 },
            { "type": "Text", "text": message }
        ]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::capture::test_support::png_bytes;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    fn make_command(action: &str) -> Command {
        Command {
            action: action.into(),
            ..Default::default()
        }
    }

    fn open_link(url: &str) -> Command {
        Command {
            url: Some(url.into()),
            ..make_command("open_link")
        }
    }

    fn fixed_core(label: &str) -> Core {
        Core::new(CoreConfig {
            classifier: ClassifierMode::Fixed {
                label: label.into(),
            },
            ..CoreConfig::default()
        })
        .unwrap()
    }

    fn photo() -> NamedTempFile {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), png_bytes(32, 48, [200, 40, 40])).unwrap();
        file
    }

    fn classify(file: &NamedTempFile) -> Command {
        Command {
            path: Some(file.path().to_string_lossy().into_owned()),
            captured_at_ms: Some(1_700_000_000_000),
            ..make_command("classify")
        }
    }

    fn extract_texts(ui: &Value) -> Vec<String> {
        fn walk(node: &Value, acc: &mut Vec<String>) {
            if let Some(text) = node.get("text").and_then(|t| t.as_str()) {
                acc.push(text.to_string());
            }
            if let Some(children) = node.get("children").and_then(|c| c.as_array()) {
                for child in children {
                    walk(child, acc);
                }
            }
        }
        let mut acc = Vec::new();
        walk(ui, &mut acc);
        acc
    }

    /// Poll with `init` until `done` holds for the rendered UI.
    fn wait_for(core: &Core, mut done: impl FnMut(&Value) -> bool) -> Value {
        for _ in 0..300 {
            let ui = core.handle_command(make_command("init"));
            if done(&ui) {
                return ui;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("condition not reached");
    }

    fn has_text(ui: &Value, needle: &str) -> bool {
        extract_texts(ui).iter().any(|t| t.contains(needle))
    }

    #[test]
    fn first_render_is_capture_screen_with_default_hint() {
        let core = fixed_core("positive");
        let ui = core.handle_command(make_command("init"));
        let texts = extract_texts(&ui);
        assert!(texts.iter().any(|t| t.contains("Covid")), "{texts:?}");
        assert!(texts.iter().any(|t| t.contains("antibody_covid5")));
        assert!(ui.get("pending_inference").is_none());
    }

    #[test]
    fn opening_link_updates_capture_label() {
        let core = fixed_core("positive");
        let ui = core.handle_command(open_link("testtt://covid|LOT42"));
        assert!(has_text(&ui, "Batch#: LOT42"));
        assert_eq!(core.store().sequence(), 1);

        let ui = core.handle_command(open_link("testtt://pregnancy|P1"));
        assert!(has_text(&ui, "Test type: pregnancy"));
        assert!(has_text(&ui, "Batch#: P1"));
        assert!(has_text(&ui, "antibody_preg1"));
    }

    #[test]
    fn single_segment_link_is_malformed_and_keeps_label() {
        let core = fixed_core("positive");
        core.handle_command(open_link("testtt://covid|LOT42"));

        let ui = core.handle_command(open_link("testtt://pregnancy"));
        assert!(has_text(&ui, "link_malformed"));
        assert!(has_text(&ui, "Batch#: LOT42"));
        assert!(!has_text(&ui, "Test type: pregnancy"));
        assert_eq!(core.store().sequence(), 1);
    }

    #[test]
    fn rejected_link_keeps_previous_selection() {
        let core = fixed_core("positive");
        core.handle_command(open_link("testtt://covid|LOT42"));

        let ui = core.handle_command(open_link("testtt://measles|X"));
        assert!(has_text(&ui, "link_unknown_test_type"));
        assert!(has_text(&ui, "Batch#: LOT42"));

        let ui = core.handle_command(open_link("other://covid|LOT1"));
        assert!(has_text(&ui, "Batch#: LOT42"));
        assert_eq!(core.store().sequence(), 1);
    }

    #[test]
    fn selection_set_outside_dispatch_reaches_the_screen() {
        let core = fixed_core("positive");
        let parser = LinkParser::new(Some("testtt"));
        commit_link(core.store(), &parser, "testtt://pregnancy|P9").unwrap();
        let ui = wait_for(&core, |ui| has_text(ui, "Batch#: P9"));
        assert!(has_text(&ui, "pregnancy"));
    }

    #[test]
    fn fixed_classifier_produces_result_screen() {
        let core = fixed_core("positive");
        core.handle_command(open_link("testtt://covid|LOT42"));
        let file = photo();

        let ui = core.handle_command(classify(&file));
        assert_eq!(ui["children"][1]["type"], "Progress");

        let ui = wait_for(&core, |ui| has_text(ui, "Classification Result"));
        let texts = extract_texts(&ui);
        assert!(texts.iter().any(|t| t.contains("positive")), "{texts:?}");
        assert!(texts.iter().any(|t| t == "✅"));
        assert!(texts.iter().any(|t| t.contains("Batch#: LOT42")));
        assert!(texts.iter().any(|t| t.contains("Covid")));
        assert!(texts.iter().any(|t| t == "Confidence: 100%"));
        assert!(!texts.iter().any(|t| t.contains(", -")));
        let children = ui["children"].as_array().unwrap();
        assert!(children.iter().any(|c| c["type"] == "ImageBase64"));
    }

    #[test]
    fn location_and_back_navigation() {
        let core = fixed_core("negative");
        let file = photo();
        core.handle_command(classify(&file));
        wait_for(&core, |ui| has_text(ui, "Classification Result"));

        let ui = core.handle_command(Command {
            place_name: Some("Harpa".into()),
            locality: Some("Reykjavík".into()),
            country: Some("Iceland".into()),
            ..make_command("location_resolved")
        });
        assert!(has_text(&ui, "Harpa, Reykjavík, Iceland"));
        assert!(has_text(&ui, "❌"));

        let ui = core.handle_command(make_command("back"));
        assert!(has_text(&ui, "Scan Test"));
        let ui = core.handle_command(make_command("back"));
        assert!(has_text(&ui, "Scan Test"));
    }

    #[test]
    fn location_update_is_stamped_on_next_capture() {
        let core = fixed_core("positive");
        core.handle_command(Command {
            latitude: Some(64.1466),
            longitude: Some(-21.9426),
            ..make_command("location_update")
        });
        let file = photo();
        core.handle_command(classify(&file));
        let ui = wait_for(&core, |ui| has_text(ui, "Classification Result"));
        assert!(has_text(&ui, "64.1466, -21.9426"));

        let state = core.ui_lock();
        let location = state.last_result.as_ref().and_then(|r| r.location()).unwrap();
        assert_eq!(location.latitude(), 64.1466);
        drop(state);

        core.handle_command(Command {
            latitude: Some(123.0),
            longitude: Some(0.0),
            ..make_command("location_update")
        });
        assert_eq!(core.ui_lock().last_error.as_deref(), Some("invalid_location"));
    }

    #[test]
    fn influenza_selection_fails_without_calling_classifier() {
        let core = fixed_core("positive");
        core.handle_command(open_link("testtt://influenza|F1"));
        let file = photo();
        core.handle_command(classify(&file));
        let ui = wait_for(&core, |ui| has_text(ui, "not available yet"));
        assert!(has_text(&ui, "influenza"));
    }

    #[test]
    fn bad_image_path_stays_on_capture() {
        let core = fixed_core("positive");
        let ui = core.handle_command(Command {
            path: Some("/nonexistent/strip.jpg".into()),
            ..make_command("classify")
        });
        assert!(has_text(&ui, "Scan Test"));
        assert!(extract_texts(&ui).iter().any(|t| t.contains("capture_read_failed")));

        let ui = core.handle_command(make_command("classify"));
        assert!(has_text(&ui, "missing_image_path"));
    }

    #[test]
    fn unknown_action_is_reported() {
        let core = fixed_core("positive");
        let ui = core.handle_command(make_command("frobnicate"));
        assert!(has_text(&ui, "unknown_action:frobnicate"));
    }

    fn host_core() -> Core {
        Core::new(CoreConfig::default()).unwrap()
    }

    fn request_id(ui: &Value) -> Option<String> {
        let req = ui["pending_inference"].as_array()?.first()?;
        assert_eq!(req["model_identifier"], "antibody_covid5");
        req["id"].as_str().map(str::to_string)
    }

    /// Requests are handed out once, so check every response seen so far.
    fn wait_for_request(core: &Core, seen: &[&Value]) -> String {
        if let Some(id) = seen.iter().find_map(|ui| request_id(ui)) {
            return id;
        }
        let mut id = None;
        wait_for(core, |ui| {
            id = request_id(ui);
            id.is_some()
        });
        id.unwrap()
    }

    #[test]
    fn host_inference_round_trip() {
        let core = host_core();
        let file = photo();
        let ui = core.handle_command(classify(&file));
        assert!(ui["pending_inference"].is_array());

        let id = wait_for_request(&core, &[&ui]);
        core.handle_command(Command {
            request_id: Some(id),
            predictions: Some(vec![
                Prediction::new("negative", 0.2),
                Prediction::new("positive", 0.7),
            ]),
            ..make_command("inference_result")
        });
        let ui = wait_for(&core, |ui| has_text(ui, "Classification Result"));
        assert!(has_text(&ui, "positive"));
    }

    #[test]
    fn host_error_and_second_capture_while_busy() {
        let core = host_core();
        let file = photo();
        let first = core.handle_command(classify(&file));
        let second = core.handle_command(classify(&file));
        assert!(has_text(&second, "Classifying"));
        assert_eq!(
            core.ui_lock().last_error.as_deref(),
            Some("classification_in_progress")
        );

        let id = wait_for_request(&core, &[&first, &second]);
        core.handle_command(Command {
            request_id: Some(id.clone()),
            error: Some("model missing".into()),
            ..make_command("inference_result")
        });
        let ui = wait_for(&core, |ui| has_text(ui, "model missing"));
        assert!(has_text(&ui, "Error classifying image"));

        core.handle_command(Command {
            request_id: Some(id),
            ..make_command("inference_result")
        });
        assert_eq!(
            core.ui_lock().last_error.as_deref(),
            Some("unknown_inference_request")
        );
    }

    #[test]
    fn model_load_error_kind_reaches_the_result_screen() {
        let core = host_core();
        let file = photo();
        let ui = core.handle_command(classify(&file));
        let id = wait_for_request(&core, &[&ui]);

        core.handle_command(Command {
            request_id: Some(id),
            error: Some("antibody_cov19".into()),
            error_kind: Some("model_load".into()),
            ..make_command("inference_result")
        });
        let ui = wait_for(&core, |ui| has_text(ui, "Error classifying image"));
        assert!(extract_texts(&ui)
            .iter()
            .any(|t| t.contains("failed to load model `antibody_cov19`")));
    }

    #[test]
    fn unknown_error_kind_is_rejected() {
        let core = host_core();
        let ui = core.handle_command(Command {
            request_id: Some(Uuid::new_v4().to_string()),
            error: Some("boom".into()),
            error_kind: Some("gpu".into()),
            ..make_command("inference_result")
        });
        assert!(extract_texts(&ui).iter().any(|t| t.contains("unknown_error_kind:gpu")));
    }

    #[test]
    fn late_decode_failure_returns_to_capture() {
        let core = fixed_core("positive");
        let generation = {
            let mut state = core.ui_lock();
            state.ensure_navigation();
            state.classification_in_flight = true;
            state.classification_generation += 1;
            state.push_screen(Screen::Loading);
            state.classification_generation
        };
        push_notification(
            &core.notifications,
            Notification::CaptureFailed {
                generation,
                error: "capture_decode_failed:truncated".into(),
            },
        );

        let ui = core.handle_command(make_command("init"));
        assert!(has_text(&ui, "Scan Test"));
        assert!(extract_texts(&ui)
            .iter()
            .any(|t| t.contains("capture_decode_failed:truncated")));
        assert!(!core.ui_lock().classification_in_flight);
    }

    #[test]
    fn stale_decode_failure_is_ignored() {
        let core = fixed_core("positive");
        core.handle_command(make_command("init"));
        push_notification(
            &core.notifications,
            Notification::CaptureFailed {
                generation: 7,
                error: "capture_decode_failed:old".into(),
            },
        );
        let ui = core.handle_command(make_command("init"));
        assert!(!extract_texts(&ui).iter().any(|t| t.contains("old")));
    }

    #[test]
    fn poisoned_queue_still_delivers_results() {
        let core = fixed_core("positive");
        let queue = Arc::clone(&core.notifications);
        let _ = std::thread::spawn(move || {
            let _guard = queue.lock().unwrap();
            panic!("worker died holding the queue");
        })
        .join();
        assert!(core.notifications.is_poisoned());

        let file = photo();
        core.handle_command(classify(&file));
        let ui = wait_for(&core, |ui| has_text(ui, "Classification Result"));
        assert!(has_text(&ui, "positive"));
    }

    #[test]
    fn reset_cancels_pending_inference_and_drops_result() {
        let core = host_core();
        let file = photo();
        let ui = core.handle_command(classify(&file));
        let _ = wait_for_request(&core, &[&ui]);

        let ui = core.handle_command(make_command("reset"));
        assert!(has_text(&ui, "Scan Test"));
        std::thread::sleep(Duration::from_millis(100));
        let ui = core.handle_command(make_command("init"));
        assert!(has_text(&ui, "Scan Test"));
        assert!(!has_text(&ui, "Error classifying image"));
    }

    #[test]
    fn inference_result_without_host_mode_is_an_error() {
        let core = fixed_core("positive");
        core.handle_command(make_command("capture_screen"));
        let ui = core.handle_command(Command {
            request_id: Some(Uuid::new_v4().to_string()),
            ..make_command("inference_result")
        });
        assert!(has_text(&ui, "host_inference_disabled"));

        let ui = core.handle_command(Command {
            request_id: Some("nope".into()),
            ..make_command("inference_result")
        });
        assert!(has_text(&ui, "invalid_request_id"));
    }
}
