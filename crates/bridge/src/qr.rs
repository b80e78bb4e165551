//! Pairing-token rendering.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use qrcode::render::svg;
use qrcode::QrCode;

const DATA_URL_PREFIX: &str = "data:image/svg+xml;base64,";

/// Render a pairing token as a QR code SVG data URL for browser display.
pub fn render_pairing_code(code: &str) -> Result<String, qrcode::types::QrError> {
    let qr = QrCode::new(code.as_bytes())?;
    let image = qr
        .render::<svg::Color>()
        .min_dimensions(256, 256)
        .dark_color(svg::Color("#000000"))
        .light_color(svg::Color("#ffffff"))
        .build();
    Ok(format!("{DATA_URL_PREFIX}{}", STANDARD.encode(image)))
}
