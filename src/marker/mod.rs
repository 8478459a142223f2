//! Per-page marker payloads and marker images

pub mod encoder;
pub mod provider;

pub use encoder::{encode, MarkerEncoder, PageFormat, TextTemplate};
pub use provider::{
    ErrorCorrection, FetchError, LocalQrProvider, MarkerImage, MarkerImageProvider, PixelFormat,
    QrServerProvider, DEFAULT_SERVICE_URL, DEFAULT_TIMEOUT,
};
