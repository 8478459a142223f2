//! Book assembly
//!
//! [`BookAssembler`] turns a one-page template into an N-page book whose page
//! `k` carries the marker for `k`. A run moves through these states:
//!
//! ```text
//! Idle -> ConfigLoaded -> Expanded -> Stamping(1) .. Stamping(N) -> Stamped -> Persisted
//! ```
//!
//! and ends in `Aborted` on the first error. The output file is only replaced
//! once every page has been stamped; an aborted run leaves the destination as
//! it was and removes its temporary file.
//!
//! # Example
//!
//! ```no_run
//! use jetbook::{BookAssembler, TemplateSource};
//! use jetbook::marker::LocalQrProvider;
//! use std::path::Path;
//!
//! let source = TemplateSource::new("templates", "dot-grid");
//! let config = source.load_config().expect("config");
//! let provider = LocalQrProvider::new(config.error_correction);
//!
//! let mut assembler = BookAssembler::new(config, provider).expect("assembler");
//! assembler
//!     .assemble(&source.pdf_path(), 36, Path::new("results/dot-grid-result.pdf"))
//!     .expect("Failed to assemble book");
//! ```

use std::fmt;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rayon::prelude::*;

use crate::config::BookConfig;
use crate::error::{Error, Result};
use crate::layout::MarkerBox;
use crate::marker::{MarkerEncoder, MarkerImage, MarkerImageProvider};
use crate::pdf::{composite_marker, Template, WorkingDocument};

/// Where a run currently is
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssemblyState {
    Idle,
    ConfigLoaded,
    Expanded,
    /// Page being stamped (1-based)
    Stamping(u32),
    Stamped,
    Persisted,
    /// The run failed; holds the error message
    Aborted(String),
}

impl fmt::Display for AssemblyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssemblyState::Idle => write!(f, "idle"),
            AssemblyState::ConfigLoaded => write!(f, "config loaded"),
            AssemblyState::Expanded => write!(f, "expanded"),
            AssemblyState::Stamping(page) => write!(f, "stamping page {}", page),
            AssemblyState::Stamped => write!(f, "stamped"),
            AssemblyState::Persisted => write!(f, "persisted"),
            AssemblyState::Aborted(reason) => write!(f, "aborted: {}", reason),
        }
    }
}

/// Shared flag that stops a run before its next page
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Run options that are not part of the template configuration
#[derive(Debug, Clone)]
pub struct AssemblyOptions {
    /// Markers fetched concurrently; 1 stamps pages strictly one after another
    pub jobs: usize,
    pub cancel: CancelToken,
}

impl Default for AssemblyOptions {
    fn default() -> Self {
        Self {
            jobs: 1,
            cancel: CancelToken::default(),
        }
    }
}

/// Outcome of a successful run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyReport {
    pub output: PathBuf,
    pub page_count: u32,
    /// Marker payload of every page, in page order
    pub payloads: Vec<String>,
}

/// Drives template expansion, marker stamping and persistence
pub struct BookAssembler<P> {
    config: BookConfig,
    encoder: MarkerEncoder,
    marker: MarkerBox,
    provider: P,
    options: AssemblyOptions,
    state: AssemblyState,
}

impl<P: MarkerImageProvider> BookAssembler<P> {
    pub fn new(config: BookConfig, provider: P) -> Result<Self> {
        let encoder = MarkerEncoder::from_config(&config)?;
        let marker = MarkerBox::new(config.marker_size as f32, config.marker_x, config.marker_y)?;

        Ok(Self {
            config,
            encoder,
            marker,
            provider,
            options: AssemblyOptions::default(),
            state: AssemblyState::Idle,
        })
    }

    pub fn with_options(mut self, options: AssemblyOptions) -> Self {
        self.options = options;
        self
    }

    pub fn config(&self) -> &BookConfig {
        &self.config
    }

    pub fn state(&self) -> &AssemblyState {
        &self.state
    }

    /// Build a `page_count` page book from `template` and write it to `output`
    pub fn assemble(&mut self, template: &Path, page_count: u32, output: &Path) -> Result<AssemblyReport> {
        self.state = AssemblyState::Idle;

        match self.run(template, page_count, output) {
            Ok(report) => Ok(report),
            Err(e) => {
                tracing::error!(error = %e, state = %self.state, "assembly aborted");
                self.transition(AssemblyState::Aborted(e.to_string()));
                Err(e)
            }
        }
    }

    fn run(&mut self, template: &Path, page_count: u32, output: &Path) -> Result<AssemblyReport> {
        self.config.check_page_count(page_count)?;
        self.transition(AssemblyState::ConfigLoaded);

        let template = Template::open(template)?;
        if !self.marker.fits_within(&template.page_box()) {
            tracing::warn!(
                template = %template.path().display(),
                "marker box extends beyond the template page"
            );
        }

        let mut work = template.expand(page_count)?;
        self.transition(AssemblyState::Expanded);

        let payloads = self.stamp(&mut work, page_count)?;
        self.transition(AssemblyState::Stamped);

        persist(work, output)?;
        self.transition(AssemblyState::Persisted);

        Ok(AssemblyReport {
            output: output.to_path_buf(),
            page_count,
            payloads,
        })
    }

    /// Encode, resolve and composite the marker of every page
    fn stamp(&mut self, work: &mut WorkingDocument, page_count: u32) -> Result<Vec<String>> {
        let size = self.config.marker_size;
        let mut payloads = Vec::with_capacity(page_count as usize);

        if self.options.jobs <= 1 {
            for page in 1..=page_count {
                self.transition(AssemblyState::Stamping(page));
                let (payload, image) =
                    fetch_marker(&self.encoder, &self.provider, &self.options.cancel, size, page)?;
                composite_marker(work, page, &image, &self.marker)?;
                payloads.push(payload);
            }
            return Ok(payloads);
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.jobs)
            .build()
            .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?;

        let encoder = &self.encoder;
        let provider = &self.provider;
        let cancel = &self.options.cancel;
        let markers = pool.install(|| {
            (1..=page_count)
                .into_par_iter()
                .map(|page| fetch_marker(encoder, provider, cancel, size, page))
                .collect::<Result<Vec<_>>>()
        })?;

        for (page, (payload, image)) in (1..=page_count).zip(markers) {
            self.transition(AssemblyState::Stamping(page));
            composite_marker(work, page, &image, &self.marker)?;
            payloads.push(payload);
        }

        Ok(payloads)
    }

    fn transition(&mut self, next: AssemblyState) {
        match &next {
            AssemblyState::Stamping(page) => tracing::debug!(page, "stamping"),
            AssemblyState::Aborted(_) => {}
            other => tracing::info!(state = %other, "assembly state"),
        }
        self.state = next;
    }
}

/// Payload and image for one page
fn fetch_marker<P: MarkerImageProvider>(
    encoder: &MarkerEncoder,
    provider: &P,
    cancel: &CancelToken,
    size: u32,
    page: u32,
) -> Result<(String, MarkerImage)> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled { page });
    }

    let payload = encoder.encode(page);
    tracing::debug!(page, %payload, "resolving marker");

    let image = provider
        .resolve(&payload, size)
        .map_err(|source| Error::ImageFetch { page, source })?;

    Ok((payload, image))
}

/// Write the document to a temporary file beside `output`, then rename it into place
fn persist(work: WorkingDocument, output: &Path) -> Result<()> {
    let dir = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;

    let mut temp = tempfile::Builder::new()
        .prefix(".jetbook-")
        .suffix(".pdf")
        .tempfile_in(&dir)?;

    {
        let mut writer = BufWriter::new(temp.as_file_mut());
        work.finalize(&mut writer)?;
        writer.flush()?;
    }
    temp.as_file().sync_all()?;

    temp.persist(output).map_err(|e| Error::Io(e.error))?;
    tracing::debug!(output = %output.display(), "persisted book");

    Ok(())
}

/// Payloads of pages `1..=page_count` without building a document
pub fn preview_payloads(config: &BookConfig, page_count: u32) -> Result<Vec<String>> {
    config.check_page_count(page_count)?;
    let encoder = MarkerEncoder::from_config(config)?;
    Ok((1..=page_count).map(|page| encoder.encode(page)).collect())
}
