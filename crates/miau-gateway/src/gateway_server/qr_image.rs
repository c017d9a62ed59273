use std::io::Cursor;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::{DynamicImage, ImageFormat, Luma};
use qrcode::{EcLevel, QrCode};

const QR_IMAGE_SIZE_PX: u32 = 256;
const PNG_DATA_URL_PREFIX: &str = "data:image/png;base64,";

/// Renders a login QR payload as a medium-ECC PNG data URL.
pub(super) fn render_qr_data_url(payload: &str) -> Result<String> {
    let code = QrCode::with_error_correction_level(payload.as_bytes(), EcLevel::M)
        .context("failed to encode qr payload")?;
    let pixels = code
        .render::<Luma<u8>>()
        .min_dimensions(QR_IMAGE_SIZE_PX, QR_IMAGE_SIZE_PX)
        .build();

    let mut png = Cursor::new(Vec::new());
    DynamicImage::ImageLuma8(pixels)
        .write_to(&mut png, ImageFormat::Png)
        .context("failed to write qr png")?;
    Ok(format!(
        "{PNG_DATA_URL_PREFIX}{}",
        BASE64.encode(png.into_inner())
    ))
}
