use crate::features::capture::{Coordinate, Placemark};
use crate::features::selection::TestSelection;
use crate::features::test_type::TestType;
use chrono::{DateTime, TimeZone};
use serde::Serialize;
use std::fmt::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Symbol {
    Positive,
    Negative,
    Invalid,
    Unknown,
}

impl Symbol {
    pub fn glyph(self) -> &'static str {
        match self {
            Symbol::Positive => "✅",
            Symbol::Negative => "❌",
            Symbol::Invalid => "❓",
            Symbol::Unknown => "🤷‍♀️",
        }
    }
}

/// Exact match on the known labels; anything else is `Unknown`.
pub fn symbol_for(label: &str) -> Symbol {
    match label {
        "positive" => Symbol::Positive,
        "negative" => Symbol::Negative,
        "invalid" => Symbol::Invalid,
        _ => Symbol::Unknown,
    }
}

pub fn display_name_for(test_type: TestType) -> &'static str {
    match test_type {
        TestType::Covid => "Covid",
        TestType::Influenza => "Influenza",
        TestType::Pregnancy => "Pregnancy",
        TestType::Unset => "Unknown",
    }
}

pub fn location_line(placemark: Option<&Placemark>) -> String {
    let parts: Vec<&str> = placemark
        .map(|p| {
            [&p.name, &p.locality, &p.country]
                .into_iter()
                .filter_map(|part| part.as_deref())
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .collect()
        })
        .unwrap_or_default();

    if parts.is_empty() {
        "Location: Unknown".to_string()
    } else {
        format!("Location: {}", parts.join(", "))
    }
}

/// `Confidence: 87%`. NaN shows as unknown.
pub fn confidence_line(confidence: f32) -> String {
    if confidence.is_nan() {
        return "Confidence: Unknown".to_string();
    }
    let percent = (confidence.clamp(0.0, 1.0) * 100.0).round();
    format!("Confidence: {percent:.0}%")
}

/// Raw fix under the place name, four decimals (about 10 m).
pub fn coordinate_line(location: Option<Coordinate>) -> Option<String> {
    location.map(|c| format!("{:.4}, {:.4}", c.latitude(), c.longitude()))
}

/// `Jun 28, 2023 at 02:05 PM`
pub fn format_captured_at<Tz>(at: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    at.format("%b %d, %Y at %I:%M %p").to_string()
}

/// Label shown under the Scan button once a kit has been scanned.
pub fn capture_label(selection: &TestSelection) -> String {
    match selection.batch_number() {
        Some(batch) => format!("Test type: {} \nBatch#: {}", selection.test_type(), batch),
        None => format!("Test type: {}", selection.test_type()),
    }
}
