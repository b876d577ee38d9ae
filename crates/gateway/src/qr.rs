//! Pairing code rendering.

use {
    qrcode::{QrCode, render::svg},
    tracing::warn,
};

/// Render a pairing code as an SVG QR image for dashboards.
pub fn render_svg(code: &str) -> Option<String> {
    match QrCode::new(code.as_bytes()) {
        Ok(qr) => Some(
            qr.render::<svg::Color<'_>>()
                .min_dimensions(256, 256)
                .build(),
        ),
        Err(e) => {
            warn!(error = %e, "failed to render pairing code");
            None
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn renders_svg_document() {
        let svg = render_svg("2@abc,def,ghi").unwrap();
        assert!(svg.contains("<svg"));
        assert!(svg.contains("</svg>"));
    }
}
