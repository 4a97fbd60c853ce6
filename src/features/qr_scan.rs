use rxing::common::HybridBinarizer;
use rxing::Exceptions;
use rxing::{
    BarcodeFormat, BinaryBitmap, DecodeHintValue, DecodeHints, Luma8LuminanceSource,
    MultiFormatReader, Reader,
};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("luma buffer holds {actual} bytes, frame needs {expected}")]
    BufferTooSmall { expected: usize, actual: usize },
    #[error("qr decode failed: {0}")]
    Decode(String),
}

/// Decode the kit QR code from a camera luminance (Y) plane.
///
/// Rows must be tightly packed (`row_stride == width`); callers with padded
/// rows copy them out first. `Ok(None)` means no code in this frame.
pub fn decode_link_from_luma(
    luma: &[u8],
    width: u32,
    height: u32,
) -> Result<Option<String>, ScanError> {
    let expected = width as usize * height as usize;
    if expected == 0 || luma.len() < expected {
        return Err(ScanError::BufferTooSmall {
            expected,
            actual: luma.len(),
        });
    }

    let hints = DecodeHints::default()
        .with(DecodeHintValue::TryHarder(true))
        .with(DecodeHintValue::PossibleFormats(HashSet::from([
            BarcodeFormat::QR_CODE,
        ])));

    let source = Luma8LuminanceSource::new(luma[..expected].to_vec(), width, height);
    let mut bitmap = BinaryBitmap::new(HybridBinarizer::new(source));
    let mut reader = MultiFormatReader::default();

    match reader.decode_with_hints(&mut bitmap, &hints) {
        Ok(result) => {
            let text = result.getText().to_string();
            tracing::debug!(len = text.len(), "qr code decoded from frame");
            Ok(Some(text))
        }
        Err(Exceptions::NotFoundException(_)) => Ok(None),
        Err(e) => Err(ScanError::Decode(format!("{e:?}"))),
    }
}
