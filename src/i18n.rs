use crate::state::AppState;

pub fn update_locale(state: &mut AppState, locale_str: &str) {
    let normalized = normalize_locale(locale_str);
    tracing::debug!(requested = locale_str, locale = normalized, "locale updated");
    state.locale = normalized.to_string();
    rust_i18n::set_locale(normalized);
}

fn normalize_locale(locale_str: &str) -> &'static str {
    let trimmed = locale_str.trim();
    if trimmed.is_empty() {
        return "en";
    }

    // Compiled locales are keyed by bare language ("en", "is"), so BCP-47 tags
    // such as "is-IS" / "en_US" are cut down to their language part.
    let lower = trimmed.to_ascii_lowercase().replace('_', "-");
    match lower.split('-').next().unwrap_or("en") {
        "is" => "is",
        _ => "en",
    }
}
