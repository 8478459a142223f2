//! Marker image resolution
//!
//! A [`MarkerImageProvider`] turns a payload string and a size into pixels.
//! Two backends are provided: [`QrServerProvider`] asks a remote QR rendering
//! service over HTTP, [`LocalQrProvider`] renders the code in-process.

use std::fmt;
use std::io::Read;
use std::str::FromStr;
use std::time::Duration;

use image::{ColorType, DynamicImage, Luma};
use qrcode::{EcLevel, QrCode};
use thiserror::Error;

/// Service used when no other URL is configured
pub const DEFAULT_SERVICE_URL: &str = "https://api.qrserver.com/v1/create-qr-code/";

/// Upper bound for a single marker request
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const MAX_RESPONSE_BYTES: u64 = 8 * 1024 * 1024;

/// Why a marker image could not be produced
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("service responded with HTTP {0}")]
    Status(u16),

    #[error("response is not a decodable image: {0}")]
    Decode(String),

    #[error("response exceeds {0} bytes")]
    TooLarge(u64),

    #[error("could not render marker: {0}")]
    Render(String),
}

/// QR error correction level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorCorrection {
    L,
    M,
    #[default]
    Q,
    H,
}

impl ErrorCorrection {
    fn ec_level(self) -> EcLevel {
        match self {
            ErrorCorrection::L => EcLevel::L,
            ErrorCorrection::M => EcLevel::M,
            ErrorCorrection::Q => EcLevel::Q,
            ErrorCorrection::H => EcLevel::H,
        }
    }
}

impl fmt::Display for ErrorCorrection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letter = match self {
            ErrorCorrection::L => "L",
            ErrorCorrection::M => "M",
            ErrorCorrection::Q => "Q",
            ErrorCorrection::H => "H",
        };
        f.write_str(letter)
    }
}

impl FromStr for ErrorCorrection {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "L" => Ok(ErrorCorrection::L),
            "M" => Ok(ErrorCorrection::M),
            "Q" => Ok(ErrorCorrection::Q),
            "H" => Ok(ErrorCorrection::H),
            _ => Err(format!("unknown error correction level {:?} (expected L, M, Q or H)", s)),
        }
    }
}

/// Pixel layout of a [`MarkerImage`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// One byte per pixel
    Gray,
    /// Three bytes per pixel
    Rgb,
}

impl PixelFormat {
    /// Bytes per pixel
    pub fn components(self) -> usize {
        match self {
            PixelFormat::Gray => 1,
            PixelFormat::Rgb => 3,
        }
    }
}

/// Decoded marker pixels, 8 bits per component, fully opaque
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerImage {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub pixels: Vec<u8>,
}

impl MarkerImage {
    /// Wrap raw pixels, checking the buffer matches the dimensions
    pub fn new(
        width: u32,
        height: u32,
        format: PixelFormat,
        pixels: Vec<u8>,
    ) -> Result<Self, FetchError> {
        let expected = width as usize * height as usize * format.components();
        if width == 0 || height == 0 || pixels.len() != expected {
            return Err(FetchError::Decode(format!(
                "{}x{} {:?} image needs {} bytes, got {}",
                width,
                height,
                format,
                expected,
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            format,
            pixels,
        })
    }

    /// Decode PNG, JPEG or GIF bytes
    pub fn decode(bytes: &[u8]) -> Result<Self, FetchError> {
        let image = image::load_from_memory(bytes).map_err(|e| FetchError::Decode(e.to_string()))?;
        Self::from_dynamic(&image)
    }

    /// Convert a decoded image, flattening transparency onto white paper
    pub fn from_dynamic(image: &DynamicImage) -> Result<Self, FetchError> {
        let grayscale = matches!(
            image.color(),
            ColorType::L8 | ColorType::La8 | ColorType::L16 | ColorType::La16
        );

        if grayscale {
            let pixels = image
                .to_luma_alpha8()
                .pixels()
                .map(|p| over_white(p[0], p[1]))
                .collect();
            Self::new(image.width(), image.height(), PixelFormat::Gray, pixels)
        } else {
            let rgba = image.to_rgba8();
            let mut pixels = Vec::with_capacity(rgba.width() as usize * rgba.height() as usize * 3);
            for p in rgba.pixels() {
                pixels.push(over_white(p[0], p[3]));
                pixels.push(over_white(p[1], p[3]));
                pixels.push(over_white(p[2], p[3]));
            }
            Self::new(image.width(), image.height(), PixelFormat::Rgb, pixels)
        }
    }
}

/// Composite one channel over a white background
fn over_white(value: u8, alpha: u8) -> u8 {
    let alpha = alpha as u32;
    let blended = value as u32 * alpha + 255 * (255 - alpha);
    ((blended + 127) / 255) as u8
}

/// Resolves a marker payload into an image of `size` x `size` pixels
///
/// Implementations are shared across worker threads when markers are fetched
/// in parallel.
pub trait MarkerImageProvider: Send + Sync {
    fn resolve(&self, payload: &str, size: u32) -> Result<MarkerImage, FetchError>;
}

impl<P: MarkerImageProvider + ?Sized> MarkerImageProvider for &P {
    fn resolve(&self, payload: &str, size: u32) -> Result<MarkerImage, FetchError> {
        (**self).resolve(payload, size)
    }
}

impl<P: MarkerImageProvider + ?Sized> MarkerImageProvider for Box<P> {
    fn resolve(&self, payload: &str, size: u32) -> Result<MarkerImage, FetchError> {
        (**self).resolve(payload, size)
    }
}

/// Fetches markers from a `create-qr-code` style HTTP service
///
/// Requests have the form
/// `GET {service}?size={size}x{size}&ecc={level}&data={payload}` where the
/// payload is form-urlencoded UTF-8.
pub struct QrServerProvider {
    agent: ureq::Agent,
    service_url: String,
    error_correction: ErrorCorrection,
}

impl QrServerProvider {
    pub fn new(
        service_url: impl Into<String>,
        timeout: Duration,
        error_correction: ErrorCorrection,
    ) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            agent,
            service_url: service_url.into(),
            error_correction,
        }
    }

    /// URL requested for a payload
    pub fn request_url(&self, payload: &str, size: u32) -> String {
        let data: String = form_urlencoded::byte_serialize(payload.as_bytes()).collect();
        let separator = if self.service_url.contains('?') { '&' } else { '?' };
        format!(
            "{}{}size={}x{}&ecc={}&data={}",
            self.service_url, separator, size, size, self.error_correction, data
        )
    }
}

impl Default for QrServerProvider {
    fn default() -> Self {
        Self::new(DEFAULT_SERVICE_URL, DEFAULT_TIMEOUT, ErrorCorrection::default())
    }
}

impl fmt::Debug for QrServerProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QrServerProvider")
            .field("service_url", &self.service_url)
            .field("error_correction", &self.error_correction)
            .finish()
    }
}

impl MarkerImageProvider for QrServerProvider {
    fn resolve(&self, payload: &str, size: u32) -> Result<MarkerImage, FetchError> {
        let url = self.request_url(payload, size);
        tracing::debug!(%url, "requesting marker image");

        let response = match self.agent.get(&url).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(code, _)) => return Err(FetchError::Status(code)),
            Err(e) => return Err(FetchError::Network(e.to_string())),
        };

        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_RESPONSE_BYTES + 1)
            .read_to_end(&mut bytes)
            .map_err(|e| FetchError::Network(e.to_string()))?;

        if bytes.len() as u64 > MAX_RESPONSE_BYTES {
            return Err(FetchError::TooLarge(MAX_RESPONSE_BYTES));
        }

        MarkerImage::decode(&bytes)
    }
}

/// Renders markers in-process, no network involved
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalQrProvider {
    error_correction: ErrorCorrection,
}

impl LocalQrProvider {
    pub fn new(error_correction: ErrorCorrection) -> Self {
        Self { error_correction }
    }
}

impl MarkerImageProvider for LocalQrProvider {
    fn resolve(&self, payload: &str, size: u32) -> Result<MarkerImage, FetchError> {
        let code = QrCode::with_error_correction_level(payload.as_bytes(), self.error_correction.ec_level())
            .map_err(|e| FetchError::Render(e.to_string()))?;

        let rendered = code
            .render::<Luma<u8>>()
            .min_dimensions(size, size)
            .build();

        MarkerImage::new(
            rendered.width(),
            rendered.height(),
            PixelFormat::Gray,
            rendered.into_raw(),
        )
    }
}
