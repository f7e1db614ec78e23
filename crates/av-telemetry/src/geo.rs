//! Photogrammetric ground-intersection for a single detection: given a pixel
//! bounding box, platform/gimbal telemetry, and frame dimensions, estimate
//! the lat/lon the detection's bbox center is looking at under a flat-earth
//! assumption. Pure function, no I/O, no logging — callers decide what a
//! `None` means for their sink.

use crate::model::{BBox, GeoCoordinates, GimbalMethod, Telemetry};

const METERS_PER_DEGREE_LAT: f64 = 111_320.0;
const DEFAULT_H_FOV_DEG: f64 = 60.0;
const MIN_LOOK_DOWN_ANGLE_DEG: f64 = 5.0;

pub fn georeference(
    bbox: &BBox,
    telemetry: &Telemetry,
    frame_width: f64,
    frame_height: f64,
) -> Option<GeoCoordinates> {
    if !telemetry.has_position() {
        return None;
    }
    let platform_lat = telemetry.latitude?;
    let platform_lon = telemetry.longitude?;
    let platform_alt = telemetry.altitude?;

    let platform_roll = telemetry.roll.unwrap_or(0.0);
    let platform_pitch = telemetry.pitch.unwrap_or(0.0);
    let platform_heading = telemetry.heading.unwrap_or(0.0);

    let has_absolute = telemetry.gimbal_yaw_abs.is_some() || telemetry.gimbal_pitch_abs.is_some();
    let has_relative = telemetry.gimbal_yaw_rel.is_some() || telemetry.gimbal_pitch_rel.is_some();

    let (gimbal_yaw_world, gimbal_pitch_world, _gimbal_roll_world, gimbal_method) = if has_absolute
    {
        (
            telemetry.gimbal_yaw_abs.unwrap_or(0.0),
            telemetry.gimbal_pitch_abs.unwrap_or(-90.0),
            telemetry.gimbal_roll_abs.unwrap_or(0.0),
            GimbalMethod::AbsoluteWorldFrame,
        )
    } else if has_relative {
        let gimbal_yaw_rel = telemetry.gimbal_yaw_rel.unwrap_or(0.0);
        let gimbal_pitch_rel = telemetry.gimbal_pitch_rel.unwrap_or(-90.0);
        let gimbal_roll_rel = telemetry.gimbal_roll_rel.unwrap_or(0.0);
        (
            platform_heading + gimbal_yaw_rel,
            gimbal_pitch_rel + platform_pitch,
            gimbal_roll_rel + platform_roll,
            GimbalMethod::RelativeApproxTransform,
        )
    } else {
        (platform_heading, -90.0, 0.0, GimbalMethod::FallbackNadir)
    };

    let bbox_center_x = (bbox.x1 + bbox.x2) / 2.0;
    let bbox_center_y = (bbox.y1 + bbox.y2) / 2.0;
    let pixel_offset_x = bbox_center_x - frame_width / 2.0;
    let pixel_offset_y = bbox_center_y - frame_height / 2.0;

    let (alpha_x, alpha_y, has_camera_specs) = match (
        telemetry.sensor_width_mm,
        telemetry.sensor_height_mm,
        telemetry.focal_length_mm,
    ) {
        (Some(w), Some(h), Some(f)) if w != 0.0 && h != 0.0 && f != 0.0 => {
            let (w, h, f) = (w as f64, h as f64, f as f64);
            let angle_per_pixel_x = (w / (2.0 * f)).atan() * 2.0 / frame_width;
            let angle_per_pixel_y = (h / (2.0 * f)).atan() * 2.0 / frame_height;
            (
                pixel_offset_x * angle_per_pixel_x,
                pixel_offset_y * angle_per_pixel_y,
                true,
            )
        }
        _ => match (telemetry.sensor_h_fov, telemetry.sensor_v_fov) {
            (Some(h_fov), Some(v_fov)) => {
                let h_fov_rad = h_fov.to_radians();
                let v_fov_rad = v_fov.to_radians();
                (
                    (pixel_offset_x / frame_width) * h_fov_rad,
                    (pixel_offset_y / frame_height) * v_fov_rad,
                    true,
                )
            }
            _ => {
                let h_fov_rad = DEFAULT_H_FOV_DEG.to_radians();
                let v_fov_rad = h_fov_rad * (frame_height / frame_width);
                (
                    (pixel_offset_x / frame_width) * h_fov_rad,
                    (pixel_offset_y / frame_height) * v_fov_rad,
                    false,
                )
            }
        },
    };

    let camera_azimuth = (gimbal_yaw_world + alpha_x.to_degrees()).rem_euclid(360.0);
    let camera_elevation = gimbal_pitch_world + alpha_y.to_degrees();

    if camera_elevation >= 0.0 {
        return None;
    }
    let look_down_angle = camera_elevation.abs();
    if look_down_angle < MIN_LOOK_DOWN_ANGLE_DEG {
        return None;
    }

    let horizontal_distance = platform_alt * look_down_angle.to_radians().tan();
    let meters_per_degree_lon = METERS_PER_DEGREE_LAT * platform_lat.to_radians().cos();

    let displacement_north = horizontal_distance * camera_azimuth.to_radians().cos();
    let displacement_east = horizontal_distance * camera_azimuth.to_radians().sin();

    let target_lat = platform_lat + displacement_north / METERS_PER_DEGREE_LAT;
    let target_lon = platform_lon + displacement_east / meters_per_degree_lon;

    Some(GeoCoordinates {
        latitude: target_lat,
        longitude: target_lon,
        estimated_ground_distance_m: horizontal_distance,
        camera_azimuth_deg: camera_azimuth,
        camera_elevation_deg: camera_elevation,
        gimbal_method,
        has_camera_specs,
        calculation_method: "photogrammetry",
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nadir_telemetry() -> Telemetry {
        Telemetry {
            latitude: Some(34.0),
            longitude: Some(-118.0),
            altitude: Some(500.0),
            heading: Some(0.0),
            ..Default::default()
        }
    }

    fn center_bbox(w: f64, h: f64) -> BBox {
        BBox {
            x1: w / 2.0 - 5.0,
            y1: h / 2.0 - 5.0,
            x2: w / 2.0 + 5.0,
            y2: h / 2.0 + 5.0,
        }
    }

    #[test]
    fn missing_position_returns_none() {
        let t = Telemetry::default();
        let bbox = center_bbox(1920.0, 1080.0);
        assert_eq!(georeference(&bbox, &t, 1920.0, 1080.0), None);
    }

    #[test]
    fn nadir_center_bbox_lands_near_directly_below() {
        let t = nadir_telemetry();
        let bbox = center_bbox(1920.0, 1080.0);
        let result = georeference(&bbox, &t, 1920.0, 1080.0).expect("should resolve");
        assert_eq!(result.gimbal_method, GimbalMethod::FallbackNadir);
        assert!((result.latitude - 34.0).abs() < 0.001);
        assert!((result.longitude - (-118.0)).abs() < 0.001);
    }

    #[test]
    fn looking_above_horizon_returns_none() {
        let mut t = nadir_telemetry();
        t.gimbal_yaw_abs = Some(0.0);
        t.gimbal_pitch_abs = Some(10.0); // pointed upward
        let bbox = center_bbox(1920.0, 1080.0);
        assert_eq!(georeference(&bbox, &t, 1920.0, 1080.0), None);
    }

    #[test]
    fn near_horizon_within_grazing_band_returns_none() {
        let mut t = nadir_telemetry();
        t.gimbal_yaw_abs = Some(0.0);
        t.gimbal_pitch_abs = Some(-2.0); // within the 5 degree exclusion band
        let bbox = center_bbox(1920.0, 1080.0);
        assert_eq!(georeference(&bbox, &t, 1920.0, 1080.0), None);
    }

    #[test]
    fn absolute_gimbal_takes_priority_over_relative() {
        let mut t = nadir_telemetry();
        t.gimbal_yaw_abs = Some(45.0);
        t.gimbal_pitch_abs = Some(-90.0);
        t.gimbal_yaw_rel = Some(999.0);
        let bbox = center_bbox(1920.0, 1080.0);
        let result = georeference(&bbox, &t, 1920.0, 1080.0).unwrap();
        assert_eq!(result.gimbal_method, GimbalMethod::AbsoluteWorldFrame);
    }

    #[test]
    fn relative_gimbal_combines_with_platform_heading() {
        let mut t = nadir_telemetry();
        t.heading = Some(10.0);
        t.gimbal_yaw_rel = Some(20.0);
        t.gimbal_pitch_rel = Some(-90.0);
        let bbox = center_bbox(1920.0, 1080.0);
        let result = georeference(&bbox, &t, 1920.0, 1080.0).unwrap();
        assert_eq!(result.gimbal_method, GimbalMethod::RelativeApproxTransform);
        assert!((result.camera_azimuth_deg - 30.0).abs() < 0.01);
    }
}
