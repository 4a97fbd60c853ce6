use base64::Engine;
use image::{codecs::png::PngEncoder, ColorType, GenericImageView, ImageEncoder};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("captured image is empty")]
    Empty,
    #[error("failed to read captured image: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to decode captured image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("failed to encode thumbnail: {0}")]
    Thumbnail(String),
}

impl CaptureError {
    pub fn code(&self) -> &'static str {
        match self {
            CaptureError::Empty => "capture_empty",
            CaptureError::Io(_) => "capture_read_failed",
            CaptureError::Decode(_) => "capture_decode_failed",
            CaptureError::Thumbnail(_) => "capture_thumbnail_failed",
        }
    }
}

/// Handle to one photo of a test strip.
///
/// Holds the encoded bytes as delivered by the camera; clones share them.
#[derive(Debug, Clone, Serialize)]
pub struct CapturedImage {
    #[serde(skip)]
    bytes: Arc<[u8]>,
    width: u32,
    height: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_path: Option<String>,
}

impl CapturedImage {
    /// Validates that `bytes` decode as an image and records its size.
    pub fn from_encoded(bytes: Vec<u8>) -> Result<Self, CaptureError> {
        if bytes.is_empty() {
            return Err(CaptureError::Empty);
        }
        let decoded = image::load_from_memory(&bytes)?;
        let (width, height) = decoded.dimensions();
        Ok(Self {
            bytes: bytes.into(),
            width,
            height,
            source_path: None,
        })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, CaptureError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let mut image = Self::from_encoded(bytes)?;
        image.source_path = Some(path.to_string_lossy().into_owned());
        Ok(image)
    }

    /// Reads only the image header. Cheap enough to run before the full
    /// decode is handed to the worker.
    pub fn read_dimensions(path: impl AsRef<Path>) -> Result<(u32, u32), CaptureError> {
        let reader = image::io::Reader::open(path)?.with_guessed_format()?;
        Ok(reader.into_dimensions()?)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn source_path(&self) -> Option<&str> {
        self.source_path.as_deref()
    }

    /// PNG thumbnail no larger than `max_side` on either axis, base64 encoded
    /// for an `ImageBase64` node.
    pub fn thumbnail_png_base64(&self, max_side: u32) -> Result<String, CaptureError> {
        let decoded = image::load_from_memory(&self.bytes)?;
        let side = max_side.max(1);
        let thumb = if decoded.width() > side || decoded.height() > side {
            decoded.thumbnail(side, side)
        } else {
            decoded
        };
        let rgba = thumb.to_rgba8();

        let mut buf = Vec::new();
        PngEncoder::new(&mut buf)
            .write_image(&rgba, rgba.width(), rgba.height(), ColorType::Rgba8)
            .map_err(|e| CaptureError::Thumbnail(e.to_string()))?;
        Ok(base64::engine::general_purpose::STANDARD.encode(buf))
    }
}

/// WGS84 position reported by the platform location service.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    latitude: f64,
    longitude: f64,
}

impl Coordinate {
    /// `None` for non-finite or out-of-range values.
    pub fn new(latitude: f64, longitude: f64) -> Option<Self> {
        let valid = latitude.is_finite()
            && longitude.is_finite()
            && (-90.0..=90.0).contains(&latitude)
            && (-180.0..=180.0).contains(&longitude);
        valid.then_some(Self {
            latitude,
            longitude,
        })
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }
}

/// Best-effort position source. `None` until a fix exists.
pub trait LocationProvider: Send + Sync {
    fn current_location(&self) -> Option<Coordinate>;
}

/// Latest fix pushed in by the host's location service.
#[derive(Debug, Default)]
pub struct LatestFix {
    fix: Mutex<Option<Coordinate>>,
}

impl LatestFix {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Option<Coordinate>> {
        self.fix
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn update(&self, coordinate: Coordinate) {
        *self.slot() = Some(coordinate);
    }
}

impl LocationProvider for LatestFix {
    fn current_location(&self) -> Option<Coordinate> {
        *self.slot()
    }
}

/// Reverse-geocoder output. Any part may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placemark {
    pub name: Option<String>,
    pub locality: Option<String>,
    pub country: Option<String>,
}

impl Placemark {
    pub fn is_empty(&self) -> bool {
        [&self.name, &self.locality, &self.country]
            .iter()
            .all(|p| p.as_deref().map(str::trim).unwrap_or("").is_empty())
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::png_bytes;
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn decodes_dimensions() {
        let img = CapturedImage::from_encoded(png_bytes(12, 7, [200, 10, 10])).unwrap();
        assert_eq!((img.width(), img.height()), (12, 7));
        assert!(img.source_path().is_none());
    }

    #[test]
    fn rejects_empty_and_garbage() {
        assert!(matches!(
            CapturedImage::from_encoded(Vec::new()),
            Err(CaptureError::Empty)
        ));
        let err = CapturedImage::from_encoded(b"not an image".to_vec()).unwrap_err();
        assert_eq!(err.code(), "capture_decode_failed");
    }

    #[test]
    fn loads_from_path() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&png_bytes(4, 4, [0, 0, 0])).unwrap();
        file.flush().unwrap();

        let img = CapturedImage::from_path(file.path()).unwrap();
        assert_eq!(img.width(), 4);
        assert_eq!(
            img.source_path(),
            Some(file.path().to_string_lossy().as_ref())
        );
    }

    #[test]
    fn header_dimensions_match_full_decode() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&png_bytes(30, 20, [5, 5, 5])).unwrap();
        file.flush().unwrap();
        assert_eq!(CapturedImage::read_dimensions(file.path()).unwrap(), (30, 20));

        let err = CapturedImage::read_dimensions("/definitely/not/here.png").unwrap_err();
        assert_eq!(err.code(), "capture_read_failed");

        let mut junk = NamedTempFile::new().unwrap();
        junk.write_all(b"not an image at all").unwrap();
        junk.flush().unwrap();
        let err = CapturedImage::read_dimensions(junk.path()).unwrap_err();
        assert_eq!(err.code(), "capture_decode_failed");
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = CapturedImage::from_path("/definitely/not/here.png").unwrap_err();
        assert_eq!(err.code(), "capture_read_failed");
    }

    #[test]
    fn thumbnail_is_bounded() {
        let img = CapturedImage::from_encoded(png_bytes(400, 100, [1, 2, 3])).unwrap();
        let b64 = img.thumbnail_png_base64(64).unwrap();
        let raw = base64::engine::general_purpose::STANDARD
            .decode(b64)
            .unwrap();
        let thumb = image::load_from_memory(&raw).unwrap();
        assert!(thumb.width() <= 64 && thumb.height() <= 64);
        assert_eq!(thumb.width(), 64);
    }

    #[test]
    fn coordinate_range_checked() {
        assert!(Coordinate::new(64.13, -21.9).is_some());
        assert!(Coordinate::new(90.0, 180.0).is_some());
        assert!(Coordinate::new(90.5, 0.0).is_none());
        assert!(Coordinate::new(0.0, -181.0).is_none());
        assert!(Coordinate::new(f64::NAN, 0.0).is_none());
    }

    #[test]
    fn latest_fix_keeps_newest() {
        let provider = LatestFix::new();
        assert!(provider.current_location().is_none());
        provider.update(Coordinate::new(1.0, 2.0).unwrap());
        provider.update(Coordinate::new(64.1, -21.9).unwrap());
        let fix = provider.current_location().unwrap();
        assert_eq!((fix.latitude(), fix.longitude()), (64.1, -21.9));
    }

    #[test]
    fn poisoned_fix_still_updates() {
        let provider = Arc::new(LatestFix::new());
        let holder = Arc::clone(&provider);
        let _ = std::thread::spawn(move || {
            let _guard = holder.fix.lock().unwrap();
            panic!("location thread died holding the lock");
        })
        .join();
        assert!(provider.fix.is_poisoned());

        provider.update(Coordinate::new(10.0, 20.0).unwrap());
        assert_eq!(
            provider.current_location(),
            Coordinate::new(10.0, 20.0)
        );
    }

    #[test]
    fn blank_placemark_is_empty() {
        assert!(Placemark::default().is_empty());
        let p = Placemark {
            name: Some("  ".into()),
            ..Default::default()
        };
        assert!(p.is_empty());
        let p = Placemark {
            country: Some("Iceland".into()),
            ..Default::default()
        };
        assert!(!p.is_empty());
    }
}
