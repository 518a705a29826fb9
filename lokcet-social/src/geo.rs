//! Great-circle distance and phone number matching used by suggestions.

use crate::models::Location;

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Radius within which users count as nearby.
pub const MAX_DISTANCE_KM: f64 = 10.0;

/// Haversine distance in kilometres.
pub fn distance_km(a: Location, b: Location) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lng = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

/// Digits only, with the `84` country code folded into a leading `0`.
pub fn normalize_phone(phone: &str) -> String {
    let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
    match digits.strip_prefix("84") {
        Some(rest) if !rest.is_empty() => format!("0{rest}"),
        _ => digits,
    }
}
