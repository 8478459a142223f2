//! Jetbook Library
//!
//! Generates printable notebooks from a one-page PDF template. The template
//! page is repeated N times and page `k` is stamped with a QR code whose
//! payload identifies `k`, so a scanned page can be matched back to its
//! position in the book.
//!
//! This library provides functionality to:
//! - Load and validate template configurations
//! - Encode per-page marker payloads
//! - Resolve marker images from a QR service or render them locally
//! - Expand a template and composite markers onto its pages
//! - Persist the finished book atomically
//!
//! # Example
//!
//! ```no_run
//! use jetbook::marker::QrServerProvider;
//! use jetbook::{BookAssembler, TemplateSource};
//! use std::path::Path;
//!
//! let source = TemplateSource::new("templates", "lined");
//! let config = source.load_config().expect("Failed to load configuration");
//!
//! let mut assembler = BookAssembler::new(config, QrServerProvider::default())
//!     .expect("Failed to prepare assembler");
//! let report = assembler
//!     .assemble(&source.pdf_path(), 48, Path::new("results/lined-result.pdf"))
//!     .expect("Failed to assemble book");
//!
//! println!("{} pages written to {}", report.page_count, report.output.display());
//! ```

pub mod assembler;
pub mod config;
pub mod error;
pub mod layout;
pub mod marker;
pub mod pdf;

// Re-export commonly used items
pub use assembler::{
    preview_payloads, AssemblyOptions, AssemblyReport, AssemblyState, BookAssembler, CancelToken,
};
pub use config::{BookConfig, TemplateSource};
pub use error::{Error, Result};
