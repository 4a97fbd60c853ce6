use crate::features::presenter::{
    confidence_line, coordinate_line, display_name_for, format_captured_at, location_line,
    symbol_for,
};
use crate::features::selection::TestSelection;
use crate::features::test_type::{classifier_config, TestType};
use crate::state::AppState;
use crate::ui::{node, Button, Column, ImageBase64, Progress, Text};
use chrono::Local;
use rust_i18n::t;
use serde_json::Value;

pub fn render_capture_screen(
    state: &AppState,
    selection: Option<&TestSelection>,
    default_test_type: TestType,
) -> Value {
    let title = t!("capture.title");
    let mut children = vec![node(Text::new(&title).size(22.0).bold(), "capture_title")];

    match &state.capture_label {
        Some(label) => children.push(node(
            Text::new(label).size(16.0).content_description("selection_label"),
            "selection_label",
        )),
        None => {
            let hint = t!("capture.no_selection");
            children.push(node(Text::new(&hint).size(14.0), "no_selection"));
            let default_line = t!(
                "capture.default_test",
                name = display_name_for(default_test_type)
            );
            children.push(node(Text::new(&default_line).size(12.0), "default_test"));
        }
    }

    let effective = selection
        .map(TestSelection::test_type)
        .unwrap_or(default_test_type);
    let model_line = match classifier_config(effective) {
        Some(config) => t!("capture.model_in_use", model = config.model_identifier).to_string(),
        None => t!("capture.no_model").to_string(),
    };
    children.push(node(Text::new(&model_line).size(12.0), "model_line"));

    if let Some(err) = &state.last_error {
        let line = t!("error.prefix", message = err);
        children.push(node(
            Text::new(&line).size(14.0).content_description("error_text"),
            "error_text",
        ));
    }

    let scan = t!("capture.scan_button");
    children.push(node(
        Button::new(&scan, "classify")
            .requires_camera(true)
            .id("scan_test"),
        "scan_button",
    ));

    node(Column::new(children).padding(24), "capture_root")
}

pub fn render_result_screen(state: &AppState) -> Value {
    let mut children: Vec<Value> = Vec::new();

    if let Some(result) = &state.last_result {
        let model = t!("result.model_used", name = display_name_for(result.test_type()));
        children.push(node(Text::new(&model).size(20.0).bold(), "model_used"));

        if let Some(batch) = result.auxiliary_fields().first() {
            let batch_line = format!("Batch#: {batch}");
            children.push(node(Text::new(&batch_line).size(14.0), "batch"));
        }

        if let Some(b64) = &state.result_thumbnail {
            children.push(node(
                ImageBase64::new(b64).content_description("captured_test"),
                "thumbnail",
            ));
        }

        let label = t!("result.classification", label = result.label());
        children.push(node(Text::new(&label).size(20.0).bold(), "label"));
        children.push(node(
            Text::new(symbol_for(result.label()).glyph())
                .size(48.0)
                .content_description("result_symbol"),
            "symbol",
        ));
        let confidence = confidence_line(result.confidence());
        children.push(node(Text::new(&confidence).size(12.0), "confidence"));

        let location = location_line(state.placemark.as_ref());
        children.push(node(Text::new(&location), "location"));
        if let Some(coords) = coordinate_line(result.location()) {
            children.push(node(Text::new(&coords).size(12.0), "coordinates"));
        }

        let date = format_captured_at(&result.captured_at().with_timezone(&Local));
        children.push(node(Text::new(&date), "date"));
    } else if let Some(failure) = &state.last_failure {
        let title = t!("result.failure_title");
        children.push(node(Text::new(&title).size(20.0).bold(), "failure_title"));
        let message = failure.user_message();
        children.push(node(
            Text::new(&message).content_description("failure_message"),
            "failure_message",
        ));
    }

    let again = t!("result.scan_again");
    children.push(node(Button::new(&again, "back").id("scan_again"), "back"));
    node(Column::new(children).padding(16), "result_root")
}

pub fn render_loading_screen(state: &AppState) -> Value {
    let fallback = t!("loading.classifying");
    let message = state.loading_message.as_deref().unwrap_or(&*fallback);
    let children = vec![
        node(Text::new(message).size(16.0), "loading_text"),
        node(Progress::new().text(message), "progress"),
    ];
    node(Column::new(children).padding(24), "loading_root")
}
