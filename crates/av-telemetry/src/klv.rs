//! MISB ST 0601 local-set decoder.
//!
//! Mirrors the byte layout and tag scaling of the reference decoder this
//! crate was built against: a 16-byte universal key, a BER-encoded length,
//! then tag/length/value triples. Decoding never panics — any malformed or
//! truncated packet yields `None` (whole-packet) or simply omits that one
//! field (per-tag), the same graceful-degradation contract the telemetry
//! consumer depends on.

use crate::model::Telemetry;

pub const MISB_0601_KEY: [u8; 16] = [
    0x06, 0x0E, 0x2B, 0x34, 0x02, 0x0B, 0x01, 0x01, 0x0E, 0x01, 0x03, 0x01, 0x01, 0x00, 0x00, 0x00,
];

/// Decode a MISB ST 0601 local-set packet. Returns `None` if the key does
/// not match, the BER length is malformed, or the packet is otherwise not a
/// recognizable 0601 set.
pub fn decode(data: &[u8]) -> Option<Telemetry> {
    if data.len() < MISB_0601_KEY.len() || &data[..16] != &MISB_0601_KEY {
        return None;
    }

    let mut offset = 16usize;
    let length_byte = *data.get(offset)?;
    offset += 1;

    let value_length: usize = if length_byte < 0x80 {
        length_byte as usize
    } else if length_byte == 0x81 {
        let b = *data.get(offset)? as usize;
        offset += 1;
        b
    } else if length_byte == 0x82 {
        let hi = *data.get(offset)? as usize;
        let lo = *data.get(offset + 1)? as usize;
        offset += 2;
        (hi << 8) | lo
    } else {
        return None;
    };

    let end_offset = offset.saturating_add(value_length);
    let mut telemetry = Telemetry::default();

    while offset < end_offset && offset < data.len() {
        let tag = data[offset];
        offset += 1;
        if offset >= data.len() {
            break;
        }
        let item_length = data[offset] as usize;
        offset += 1;
        if offset + item_length > data.len() {
            break;
        }
        let value = &data[offset..offset + item_length];
        offset += item_length;

        apply_tag(&mut telemetry, tag, value);
    }

    Some(telemetry)
}

fn apply_tag(t: &mut Telemetry, tag: u8, value: &[u8]) {
    match tag {
        2 if value.len() == 8 => {
            t.timestamp_us = Some(u64::from_be_bytes(value.try_into().unwrap()));
        }
        5 if value.len() == 2 => {
            t.roll = Some(i16::from_be_bytes(value.try_into().unwrap()) as f64 / 100.0);
        }
        6 if value.len() == 2 => {
            t.pitch = Some(i16::from_be_bytes(value.try_into().unwrap()) as f64 / 100.0);
        }
        7 if value.len() == 2 => {
            t.heading = Some(u16::from_be_bytes(value.try_into().unwrap()) as f64 / 100.0);
        }
        13 if value.len() == 4 => {
            t.latitude = Some(i32::from_be_bytes(value.try_into().unwrap()) as f64 / 1e7);
        }
        14 if value.len() == 4 => {
            t.longitude = Some(i32::from_be_bytes(value.try_into().unwrap()) as f64 / 1e7);
        }
        15 if value.len() == 2 => {
            t.altitude = Some(u16::from_be_bytes(value.try_into().unwrap()) as f64 / 10.0);
        }
        18 if value.len() == 2 => {
            t.sensor_h_fov = Some(u16::from_be_bytes(value.try_into().unwrap()) as f64 / 100.0);
        }
        19 if value.len() == 2 => {
            t.sensor_v_fov = Some(u16::from_be_bytes(value.try_into().unwrap()) as f64 / 100.0);
        }
        21 if value.len() == 4 => {
            t.gimbal_roll_rel = Some(i32::from_be_bytes(value.try_into().unwrap()) as f64 / 1e6);
        }
        22 if value.len() == 4 => {
            t.gimbal_pitch_rel = Some(i32::from_be_bytes(value.try_into().unwrap()) as f64 / 1e6);
        }
        23 if value.len() == 4 => {
            t.gimbal_yaw_rel = Some(i32::from_be_bytes(value.try_into().unwrap()) as f64 / 1e6);
        }
        102 if value.len() == 4 => {
            t.sensor_width_mm = Some(f32::from_be_bytes(value.try_into().unwrap()));
        }
        103 if value.len() == 4 => {
            t.sensor_height_mm = Some(f32::from_be_bytes(value.try_into().unwrap()));
        }
        104 if value.len() == 4 => {
            t.focal_length_mm = Some(f32::from_be_bytes(value.try_into().unwrap()));
        }
        105 if value.len() == 4 => {
            t.gimbal_yaw_abs = Some(i32::from_be_bytes(value.try_into().unwrap()) as f64 / 1e6);
        }
        106 if value.len() == 4 => {
            t.gimbal_pitch_abs = Some(i32::from_be_bytes(value.try_into().unwrap()) as f64 / 1e6);
        }
        107 if value.len() == 4 => {
            t.gimbal_roll_abs = Some(i32::from_be_bytes(value.try_into().unwrap()) as f64 / 1e6);
        }
        // Unknown tag, or known tag with the wrong declared length: skip it.
        // The outer loop has already advanced `offset` past the value bytes.
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet_with_items(items: &[(u8, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        for (tag, value) in items {
            body.push(*tag);
            body.push(value.len() as u8);
            body.extend_from_slice(value);
        }
        let mut packet = MISB_0601_KEY.to_vec();
        packet.push(body.len() as u8);
        packet.extend_from_slice(&body);
        packet
    }

    #[test]
    fn rejects_wrong_key() {
        let mut data = vec![0u8; 20];
        data[0] = 0xFF;
        assert_eq!(decode(&data), None);
    }

    #[test]
    fn decodes_lat_lon_alt() {
        let lat = (34.0052_f64 * 1e7) as i32;
        let lon = (-118.2437_f64 * 1e7) as i32;
        let alt = (1500.0_f64 * 10.0) as u16;
        let data = packet_with_items(&[
            (13, &lat.to_be_bytes()),
            (14, &lon.to_be_bytes()),
            (15, &alt.to_be_bytes()),
        ]);
        let t = decode(&data).expect("should decode");
        assert!((t.latitude.unwrap() - 34.0052).abs() < 1e-4);
        assert!((t.longitude.unwrap() - (-118.2437)).abs() < 1e-4);
        assert!((t.altitude.unwrap() - 1500.0).abs() < 1e-6);
    }

    #[test]
    fn ber_length_0x81_form() {
        let lat = 100_000_000i32; // 10.0 degrees
        let mut body = Vec::new();
        body.push(13u8);
        body.push(4u8);
        body.extend_from_slice(&lat.to_be_bytes());
        let mut data = MISB_0601_KEY.to_vec();
        data.push(0x81);
        data.push(body.len() as u8);
        data.extend_from_slice(&body);
        let t = decode(&data).unwrap();
        assert!((t.latitude.unwrap() - 10.0).abs() < 1e-6);
    }

    #[test]
    fn ber_length_0x82_form() {
        let lat = 100_000_000i32;
        let mut body = Vec::new();
        body.push(13u8);
        body.push(4u8);
        body.extend_from_slice(&lat.to_be_bytes());
        let mut data = MISB_0601_KEY.to_vec();
        data.push(0x82);
        data.extend_from_slice(&(body.len() as u16).to_be_bytes());
        data.extend_from_slice(&body);
        let t = decode(&data).unwrap();
        assert!((t.latitude.unwrap() - 10.0).abs() < 1e-6);
    }

    #[test]
    fn truncated_item_stops_gracefully_without_panicking() {
        let mut data = MISB_0601_KEY.to_vec();
        data.push(10); // declared value_length
        data.push(13); // tag
        data.push(4); // item_length says 4 bytes follow
        data.push(0xAB); // but only one byte is actually present
        let t = decode(&data).expect("truncation should not be fatal");
        assert_eq!(t.latitude, None);
    }

    #[test]
    fn ber_length_boundary_255_still_fits_one_byte_form() {
        // 255 is the largest value the single-byte (0x81) form can carry;
        // the declared length exceeds the actual tag/value bytes present, so
        // the loop must stop at the data boundary rather than read past it.
        let alt = 5000u16;
        let mut data = MISB_0601_KEY.to_vec();
        data.push(0x81);
        data.push(255);
        data.push(15); // tag
        data.push(2); // item_length
        data.extend_from_slice(&alt.to_be_bytes());
        let t = decode(&data).expect("should not panic on truncated declared length");
        assert!((t.altitude.unwrap() - 500.0).abs() < 1e-6);
    }

    #[test]
    fn ber_length_boundary_256_requires_two_byte_form() {
        let alt = 5000u16;
        let mut data = MISB_0601_KEY.to_vec();
        data.push(0x82);
        data.extend_from_slice(&256u16.to_be_bytes());
        data.push(15);
        data.push(2);
        data.extend_from_slice(&alt.to_be_bytes());
        let t = decode(&data).expect("should not panic on truncated declared length");
        assert!((t.altitude.unwrap() - 500.0).abs() < 1e-6);
    }

    #[test]
    fn ber_length_boundary_65535_max_two_byte_form() {
        let alt = 5000u16;
        let mut data = MISB_0601_KEY.to_vec();
        data.push(0x82);
        data.extend_from_slice(&65535u16.to_be_bytes());
        data.push(15);
        data.push(2);
        data.extend_from_slice(&alt.to_be_bytes());
        let t = decode(&data).expect("should not panic on max two-byte declared length");
        assert!((t.altitude.unwrap() - 500.0).abs() < 1e-6);
    }

    #[test]
    fn unknown_tag_is_skipped_not_fatal() {
        let data = packet_with_items(&[(200, &[1, 2, 3]), (15, &5000u16.to_be_bytes())]);
        let t = decode(&data).unwrap();
        assert!((t.altitude.unwrap() - 500.0).abs() < 1e-6);
    }
}
