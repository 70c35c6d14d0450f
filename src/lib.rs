use codec::SourceDataset;
use std::string::FromUtf8Error;
use thiserror::Error;
use tracing::subscriber::{set_global_default, SetGlobalDefaultError};
use tracing::Subscriber;
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

pub mod codec;
pub mod dataset;
pub mod geometry;
pub mod index;
pub mod matcher;
pub mod pipeline;
pub mod policy;
pub mod schedule;
pub mod title;

pub use codec::{decode, decode_viewport, encode, encode_to_vec, DecodedFile, OutputFeature, Segment};
pub use index::{ReferenceLine, SpatialIndex};
pub use matcher::{MatchConfig, MatchParams, MatchResult};
pub use pipeline::{run, RunConfig, RunSummary};
pub use policy::{Decision, ExclusionReason, ShadowRule};

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("geojson error: {0}")]
    GeoJson(#[from] geojson::Error),
    #[error("{dataset} input is not a feature collection")]
    NotAFeatureCollection { dataset: SourceDataset },
    #[error("{dataset} feature {index}: unsupported geometry type {kind}")]
    UnsupportedGeometry {
        dataset: SourceDataset,
        index: usize,
        kind: String,
    },
    #[error("{dataset} feature {index}: invalid geometry, {reason}")]
    InvalidGeometry {
        dataset: SourceDataset,
        index: usize,
        reason: String,
    },
    #[error("reference set is empty")]
    EmptyReferenceSet,
    #[error("reference line {index}: {reason}")]
    InvalidReferenceLine { index: usize, reason: String },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("no features to encode")]
    NoFeatures,
    #[error("title longer than 255 bytes: {title:?}")]
    TitleTooLong { title: String },
    #[error("feature has {0} coordinates, at most 65535 fit")]
    TooManyCoordinates(usize),
    #[error("feature {title:?} has no coordinates")]
    EmptyFeature { title: String },
    #[error("too many {what}: {count}")]
    CountOverflow { what: &'static str, count: usize },
    #[error("coordinate {value} is out of fixed-point range from base {base}")]
    FixedPointOverflow { value: f64, base: f64 },
    #[error("unknown source dataset tag {0}")]
    UnknownSource(u8),
    #[error("invalid title: {0}")]
    InvalidTitle(#[from] FromUtf8Error),
    #[error("invalid timestamp: {0}")]
    Time(#[from] time::error::Parse),
    #[error("could not format deadline: {0}")]
    Format(#[from] time::error::Format),
    #[error("could not install logger: {0}")]
    Logging(#[from] SetGlobalDefaultError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

fn get_subscriber(env_filter: &str) -> impl Subscriber + Send + Sync {
    const PKG_NAME: &str = env!("CARGO_PKG_NAME");
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(env_filter));
    let formatting_layer = BunyanFormattingLayer::new(PKG_NAME.into(), std::io::stderr);
    Registry::default()
        .with(env_filter)
        .with(JsonStorageLayer)
        .with(formatting_layer)
}

/// Installs the global bunyan subscriber; `RUST_LOG` overrides `env_filter`.
pub fn init_logging(env_filter: &str) -> Result<()> {
    set_global_default(get_subscriber(env_filter))?;
    Ok(())
}
