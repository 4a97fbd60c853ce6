rust_i18n::i18n!("locales", fallback = "en");

mod config;
mod features;
mod i18n;
mod router;
mod state;
mod ui;

use config::CoreConfig;
use features::qr_scan::decode_link_from_luma;
use jni::objects::{JByteArray, JClass, JString};
use jni::sys::{jint, jstring};
use jni::JNIEnv;
use router::{error_ui, Command, Core, CoreError};
use serde::Deserialize;
use serde_json::Value;
use std::{ptr, sync::OnceLock};
use tracing_subscriber::EnvFilter;

static CORE: OnceLock<Core> = OnceLock::new();
static LOGGING: OnceLock<()> = OnceLock::new();

/// Install the fmt subscriber once. `RUST_LOG` wins over `default_level`.
fn init_logging(default_level: &str) {
    LOGGING.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(default_level))
            .unwrap_or_else(|_| EnvFilter::new("info"));
        // Fails only if the host process already installed a subscriber.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init();
    });
}

/// Only `config` is read here; the rest of the command goes to the core.
#[derive(Deserialize)]
struct InitEnvelope {
    config: Option<Value>,
}

fn core_for(raw: &str) -> Result<&'static Core, CoreError> {
    if let Some(core) = CORE.get() {
        return Ok(core);
    }

    let config = match serde_json::from_str::<InitEnvelope>(raw).ok().and_then(|e| e.config) {
        Some(value) => CoreConfig::from_json(&value.to_string())?,
        None => CoreConfig::default(),
    };
    init_logging(&config.log_level);

    // A concurrent first dispatch may win the race; the loser's core is dropped.
    let core = Core::new(config)?;
    Ok(CORE.get_or_init(|| core))
}

fn dispatch_json(raw: &str) -> Value {
    let command: Command = match serde_json::from_str(raw) {
        Ok(command) => command,
        Err(e) => {
            tracing::warn!(error = %e, "undecodable command");
            return error_ui("invalid_json");
        }
    };
    match core_for(raw) {
        Ok(core) => core.handle_command(command),
        Err(e) => {
            tracing::error!(error = %e, "core failed to start");
            error_ui(&format!("core_init_failed:{e}"))
        }
    }
}

#[no_mangle]
pub extern "system" fn Java_com_stripscan_MainActivity_dispatch(
    mut env: JNIEnv,
    _class: JClass,
    input: JString,
) -> jstring {
    let response = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let input_str: String = env
            .get_string(&input)
            .map(|s| s.into())
            .unwrap_or_else(|_| "{}".to_string());
        dispatch_json(&input_str)
    }));

    let json_value = response.unwrap_or_else(|_| error_ui("panic"));
    match env.new_string(json_value.to_string()) {
        Ok(java_str) => java_str.into_raw(),
        Err(_) => {
            let fallback = error_ui("jni_new_string_failed").to_string();
            env.new_string(fallback)
                .map(|s| s.into_raw())
                .unwrap_or(ptr::null_mut())
        }
    }
}

/// Decode the kit QR code from a tightly packed luma plane.
/// Returns the link text, or null when the frame has none.
#[no_mangle]
pub extern "system" fn Java_com_stripscan_MainActivity_scanLinkFromFrame(
    env: JNIEnv,
    _class: JClass,
    luma_array: JByteArray,
    width: jint,
    height: jint,
) -> jstring {
    let response = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let luma = env
            .convert_byte_array(&luma_array)
            .map_err(|e| format!("jni_luma_array_err:{e}"))?;
        if width <= 0 || height <= 0 {
            return Err(format!("invalid_frame_size:{width}x{height}"));
        }
        match decode_link_from_luma(&luma, width as u32, height as u32) {
            Ok(Some(text)) => env
                .new_string(text)
                .map(|s| s.into_raw())
                .map_err(|e| format!("jni_new_string_err:{e}")),
            Ok(None) => Ok(ptr::null_mut()),
            Err(e) => Err(e.to_string()),
        }
    }));

    match response {
        Ok(Ok(raw)) => raw,
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "frame scan failed");
            ptr::null_mut()
        }
        Err(_) => ptr::null_mut(),
    }
}
