//! Template configuration
//!
//! Every template `<name>.pdf` is paired with a `<name>.toml` in the same
//! directory describing where the marker goes and what it encodes:
//!
//! ```toml
//! qrCodeSize = 60
//! qrCodeX = 520.0
//! qrCodeY = 20.0
//! qrCodePageFormat = "%02d"
//! qrCodeTextTemplate = "P{0} V3 S1"
//! maxPageCount = 99
//! ```
//!
//! The configuration is validated as a whole when it is loaded, so a run never
//! starts with a pattern that would fail halfway through.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::marker::{ErrorCorrection, MarkerEncoder};

/// Location of a named template and its configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateSource {
    pub dir: PathBuf,
    pub name: String,
}

impl TemplateSource {
    pub fn new(dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            name: name.into(),
        }
    }

    /// Path of the template PDF
    pub fn pdf_path(&self) -> PathBuf {
        self.dir.join(format!("{}.pdf", self.name))
    }

    /// Path of the template configuration
    pub fn config_path(&self) -> PathBuf {
        self.dir.join(format!("{}.toml", self.name))
    }

    /// Load and validate this template's configuration
    pub fn load_config(&self) -> Result<BookConfig> {
        BookConfig::load(&self.config_path())
    }
}

/// Configuration file as written on disk, before validation
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConfig {
    qr_code_size: Option<i64>,
    qr_code_x: Option<f32>,
    qr_code_y: Option<f32>,
    qr_code_page_format: Option<String>,
    qr_code_text_template: Option<String>,
    max_page_count: Option<i64>,
    qr_code_error_correction: Option<String>,
}

/// Validated, immutable configuration for one template
#[derive(Debug, Clone, PartialEq)]
pub struct BookConfig {
    /// Marker edge length, in pixels requested from the backend and in points on the page
    pub marker_size: u32,
    /// Left edge of the marker in page coordinates
    pub marker_x: f32,
    /// Bottom edge of the marker in page coordinates
    pub marker_y: f32,
    /// printf-style page label format
    pub page_format: String,
    /// Message template with a single `{0}` placeholder
    pub text_template: String,
    /// Largest page count the template allows
    pub max_page_count: Option<u32>,
    pub error_correction: ErrorCorrection,
}

impl BookConfig {
    /// Load a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::Config(format!(
                "no configuration found at {}",
                path.display()
            )));
        }

        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&contents)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), strip_prefix(&e))))
    }

    /// Parse and validate a configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(contents)
            .map_err(|e| Error::Config(format!("malformed TOML: {}", e)))?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self> {
        let size = required(raw.qr_code_size, "qrCodeSize")?;
        let marker_size = u32::try_from(size)
            .ok()
            .filter(|s| *s > 0)
            .ok_or_else(|| Error::Config(format!("qrCodeSize must be a positive integer, got {}", size)))?;

        let marker_x = finite(required(raw.qr_code_x, "qrCodeX")?, "qrCodeX")?;
        let marker_y = finite(required(raw.qr_code_y, "qrCodeY")?, "qrCodeY")?;

        let page_format = required(raw.qr_code_page_format, "qrCodePageFormat")?;
        let text_template = required(raw.qr_code_text_template, "qrCodeTextTemplate")?;

        let max_page_count = match raw.max_page_count {
            None => None,
            Some(max) => Some(
                u32::try_from(max)
                    .ok()
                    .filter(|m| *m > 0)
                    .ok_or_else(|| {
                        Error::Config(format!("maxPageCount must be a positive integer, got {}", max))
                    })?,
            ),
        };

        let error_correction = match raw.qr_code_error_correction {
            None => ErrorCorrection::default(),
            Some(level) => level
                .parse()
                .map_err(|e| Error::Config(format!("qrCodeErrorCorrection: {}", e)))?,
        };

        let config = Self {
            marker_size,
            marker_x,
            marker_y,
            page_format,
            text_template,
            max_page_count,
            error_correction,
        };

        // Compile both patterns now so malformed ones fail before any page work
        MarkerEncoder::from_config(&config)?;

        Ok(config)
    }

    /// Reject page counts this template cannot produce
    ///
    /// A count of zero is rejected rather than producing an empty document.
    pub fn check_page_count(&self, page_count: u32) -> Result<()> {
        if page_count == 0 {
            return Err(Error::Config("page count must be at least 1".to_string()));
        }

        if let Some(max) = self.max_page_count {
            if page_count > max {
                return Err(Error::Config(format!(
                    "requested {} pages but the template allows at most {} (maxPageCount)",
                    page_count, max
                )));
            }
        }

        Ok(())
    }
}

fn required<T>(value: Option<T>, key: &str) -> Result<T> {
    value.ok_or_else(|| Error::Config(format!("missing required option `{}`", key)))
}

fn finite(value: f32, key: &str) -> Result<f32> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(Error::Config(format!("{} must be a finite number, got {}", key, value)))
    }
}

/// Drop the "Configuration error: " prefix when re-wrapping a config error
fn strip_prefix(error: &Error) -> String {
    match error {
        Error::Config(message) => message.clone(),
        other => other.to_string(),
    }
}
