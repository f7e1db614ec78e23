use serde::{Deserialize, Serialize};

/// Decoded MISB ST 0601 telemetry for a single frame. Every field is optional
/// because a given KLV packet may carry any subset of tags; callers must not
/// assume any particular field is present beyond what `Telemetry::has_position`
/// checks for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    pub timestamp_us: Option<u64>,
    pub roll: Option<f64>,
    pub pitch: Option<f64>,
    pub heading: Option<f64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
    pub sensor_h_fov: Option<f64>,
    pub sensor_v_fov: Option<f64>,
    pub gimbal_roll_rel: Option<f64>,
    pub gimbal_pitch_rel: Option<f64>,
    pub gimbal_yaw_rel: Option<f64>,
    pub sensor_width_mm: Option<f32>,
    pub sensor_height_mm: Option<f32>,
    pub focal_length_mm: Option<f32>,
    pub gimbal_yaw_abs: Option<f64>,
    pub gimbal_pitch_abs: Option<f64>,
    pub gimbal_roll_abs: Option<f64>,
}

impl Telemetry {
    /// Required fields for georeferencing: lat/lon/alt must all be present.
    pub fn has_position(&self) -> bool {
        self.latitude.is_some() && self.longitude.is_some() && self.altitude.is_some()
    }
}

/// Axis-aligned pixel bounding box, `[x1, y1, x2, y2]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BBox {
    pub fn center(&self) -> (f64, f64) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }
}

/// A single tracked/detected object for one frame, prior to georeferencing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BBox,
    pub class_name: String,
    pub class_id: i64,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track_id: Option<u64>,
}

/// How the gimbal's world-frame orientation was derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GimbalMethod {
    AbsoluteWorldFrame,
    RelativeApproxTransform,
    FallbackNadir,
}

/// Photogrammetric ground-intersection result for one detection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoCoordinates {
    pub latitude: f64,
    pub longitude: f64,
    pub estimated_ground_distance_m: f64,
    pub camera_azimuth_deg: f64,
    pub camera_elevation_deg: f64,
    pub gimbal_method: GimbalMethod,
    pub has_camera_specs: bool,
    pub calculation_method: &'static str,
}

/// A `Detection` enriched with (optional) ground coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedDetection {
    #[serde(flatten)]
    pub detection: Detection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geo_coordinates: Option<GeoCoordinates>,
}

/// Per-frame JSON metadata packet fanned out over UDP/SSE/disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataPacket {
    pub frame: u64,
    pub timestamp: String,
    pub telemetry: Telemetry,
    pub detections: Vec<EnrichedDetection>,
    pub detection_count: usize,
}
