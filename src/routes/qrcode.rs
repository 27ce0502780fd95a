// routes/qrcode.rs
// PNG rendering of otpauth enrollment URLs.

use std::io::Cursor;

use anyhow::{Context, Result};
use axum::{
    body::Body,
    http::header::CONTENT_TYPE,
    response::Response,
};
use image::{ImageFormat, Luma};
use qrcode::QrCode;

use crate::error::{AppError, AppResult};
use crate::models::User;
use crate::totp::build_totp;

/// Encodes `payload` as a QR code PNG at least 200px wide.
pub fn qr_png(payload: &str) -> Result<Vec<u8>> {
    let code = QrCode::new(payload.as_bytes()).context("payload too large for a QR code")?;
    let img = code.render::<Luma<u8>>().min_dimensions(200, 200).build();

    // image 0.25: write_to requires Write + Seek -> Cursor<Vec<u8>>
    let mut cursor = Cursor::new(Vec::<u8>::new());
    image::DynamicImage::ImageLuma8(img)
        .write_to(&mut cursor, ImageFormat::Png)
        .context("png encoding failed")?;
    Ok(cursor.into_inner())
}

/// Enrollment QR for `user`, scanned once by their authenticator app.
pub fn enrollment_png_response(user: &User) -> AppResult<Response> {
    let totp = build_totp(&user.username, &user.secret)
        .map_err(|err| AppError::Internal(err.context("invalid stored secret")))?;
    let png = qr_png(&totp.get_url())?;
    Response::builder()
        .header(CONTENT_TYPE, "image/png")
        .header("Cache-Control", "no-store")
        .body(Body::from(png))
        .map_err(|err| AppError::Internal(err.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn png_has_signature() {
        let png = qr_png("otpauth://totp/SalesDesk:ama?secret=JBSWY3DPEHPK3PXP").unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
    }
}
