//! Pairing challenge → displayable image.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use qrcode::render::svg;
use qrcode::QrCode;
use thiserror::Error;

/// Minimum edge length of the rendered image, in pixels
const QR_SIZE_PX: u32 = 256;

#[derive(Debug, Error)]
pub enum QrError {
    #[error("pairing token is empty")]
    Empty,
    #[error("pairing token cannot be encoded: {0}")]
    Encode(String),
}

/// Render `token` as an SVG QR code wrapped in a base64 `data:` URL that
/// an `<img src>` can display directly.
pub fn encode_data_url(token: &str) -> Result<String, QrError> {
    if token.is_empty() {
        return Err(QrError::Empty);
    }

    let code = QrCode::new(token.as_bytes()).map_err(|e| QrError::Encode(e.to_string()))?;
    let image = code
        .render()
        .min_dimensions(QR_SIZE_PX, QR_SIZE_PX)
        .dark_color(svg::Color("#000000"))
        .light_color(svg::Color("#FFFFFF"))
        .build();

    Ok(format!("data:image/svg+xml;base64,{}", STANDARD.encode(image)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_pairing_token_as_svg_data_url() {
        let url = encode_data_url("2@Qx9kF1,abcdEFGH,ijklMNOP==").expect("encode");
        let payload = url
            .strip_prefix("data:image/svg+xml;base64,")
            .expect("svg data url prefix");
        let svg = STANDARD.decode(payload).expect("base64");
        let svg = String::from_utf8(svg).expect("utf8");
        assert!(svg.contains("<svg"));
        assert!(svg.contains("#000000"));
    }

    #[test]
    fn empty_token_is_rejected() {
        assert!(matches!(encode_data_url(""), Err(QrError::Empty)));
    }

    #[test]
    fn oversized_token_is_an_encode_error() {
        let token = "x".repeat(8_000);
        assert!(matches!(encode_data_url(&token), Err(QrError::Encode(_))));
    }
}
