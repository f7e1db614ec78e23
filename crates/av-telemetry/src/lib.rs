//! Shared wire/data-model types and pure numerical routines for the video
//! analytics pipeline: MISB ST 0601 KLV decoding and photogrammetric
//! georeferencing. Kept dependency-free (beyond `serde`) so both the
//! pipeline binary and its tests can share one definition of the data
//! model without pulling in tokio/axum.

pub mod geo;
pub mod klv;
pub mod model;

pub use geo::georeference;
pub use klv::decode as decode_klv;
pub use model::{
    BBox, Detection, EnrichedDetection, GeoCoordinates, GimbalMethod, MetadataPacket, Telemetry,
};
