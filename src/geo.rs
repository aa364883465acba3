//! Great-circle distance and proximity ranking.
//!
//! Haversine on a spherical Earth (R = 6371 km). Ranking is pure and stable:
//! records with coordinates come first in ascending distance, records without
//! coordinates follow in their original order.

use serde::{Deserialize, Serialize};

use crate::entity::types::{EntityRecord, RankedResult};

/// Mean Earth radius in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// A bare latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    /// Build a point, returning `None` for non-finite or out-of-range input.
    pub fn new(lat: f64, lng: f64) -> Option<Self> {
        if is_valid_coordinate(lat, lng) {
            Some(Self { lat, lng })
        } else {
            None
        }
    }
}

/// A reference location for ranking, as reported by a location source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

impl Location {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self {
            lat,
            lng,
            city: None,
            state: None,
            country: None,
        }
    }

    pub fn point(&self) -> GeoPoint {
        GeoPoint {
            lat: self.lat,
            lng: self.lng,
        }
    }

    pub fn is_valid(&self) -> bool {
        is_valid_coordinate(self.lat, self.lng)
    }
}

pub fn is_valid_coordinate(lat: f64, lng: f64) -> bool {
    lat.is_finite()
        && lng.is_finite()
        && (-90.0..=90.0).contains(&lat)
        && (-180.0..=180.0).contains(&lng)
}

/// Great-circle distance between two points in kilometres.
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
    // Rounding can push h a hair past 1.0 for antipodal points.
    let h = h.clamp(0.0, 1.0);
    2.0 * EARTH_RADIUS_KM * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Rank records by distance from `origin`.
///
/// With no origin the input order is kept and no distances are attached.
/// Records lacking coordinates are never dropped; they trail the ranked ones.
pub fn rank(records: Vec<EntityRecord>, origin: Option<&Location>) -> Vec<RankedResult> {
    let Some(origin) = origin else {
        return records.into_iter().map(RankedResult::unranked).collect();
    };

    let from = origin.point();
    let mut ranked = Vec::with_capacity(records.len());
    let mut unranked = Vec::new();

    for record in records {
        match record.coordinates {
            Some(point) => {
                let km = haversine_km(from, point);
                ranked.push(RankedResult::at_distance(record, km));
            }
            None => unranked.push(RankedResult::unranked(record)),
        }
    }

    // sort_by is stable, so equal distances keep backend order.
    ranked.sort_by(|a, b| {
        let da = a.distance_km.unwrap_or(f64::INFINITY);
        let db = b.distance_km.unwrap_or(f64::INFINITY);
        da.total_cmp(&db)
    });
    ranked.extend(unranked);
    ranked
}

/// Human-readable distance: metres below 1 km, one decimal above.
pub fn format_distance(km: f64) -> String {
    if km < 1.0 {
        format!("{:.0} m", km * 1000.0)
    } else if km < 100.0 {
        format!("{:.1} km", km)
    } else {
        format!("{:.0} km", km)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use chrono::{DateTime, Utc};

    const PERTH: GeoPoint = GeoPoint { lat: -31.9505, lng: 115.8605 };
    const MECCA: GeoPoint = GeoPoint { lat: 21.4225, lng: 39.8262 };
    const MEDINA: GeoPoint = GeoPoint { lat: 24.4686, lng: 39.6142 };

    fn record(id: &str, coords: Option<(f64, f64)>) -> EntityRecord {
        EntityRecord {
            id: id.into(),
            slug: None,
            name: format!("Mosque {}", id),
            address: None,
            city: None,
            state: None,
            coordinates: coords.map(|(lat, lng)| GeoPoint { lat, lng }),
            category: None,
            created_at: DateTime::<Utc>::default(),
        }
    }

    fn ids(results: &[RankedResult]) -> Vec<&str> {
        results.iter().map(|r| r.record.id.as_str()).collect()
    }

    #[test]
    fn test_haversine_zero_for_same_point() {
        assert_abs_diff_eq!(haversine_km(MECCA, MECCA), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_haversine_symmetric() {
        let ab = haversine_km(MECCA, PERTH);
        let ba = haversine_km(PERTH, MECCA);
        assert_abs_diff_eq!(ab, ba, epsilon = 1e-9);
    }

    #[test]
    fn test_haversine_mecca_medina() {
        // Roughly 340 km as the crow flies.
        let d = haversine_km(MECCA, MEDINA);
        assert!(d > 330.0 && d < 345.0, "got {d}");
    }

    #[test]
    fn test_haversine_antipodal_is_half_circumference() {
        let a = GeoPoint { lat: 0.0, lng: 0.0 };
        let b = GeoPoint { lat: 0.0, lng: 180.0 };
        let half_circumference = std::f64::consts::PI * EARTH_RADIUS_KM;
        assert_abs_diff_eq!(haversine_km(a, b), half_circumference, epsilon = 1e-6);
    }

    #[test]
    fn test_rank_without_origin_is_identity() {
        let input = vec![
            record("c", Some((0.0, 0.0))),
            record("a", None),
            record("b", Some((1.0, 1.0))),
        ];
        let out = rank(input, None);
        assert_eq!(ids(&out), vec!["c", "a", "b"]);
        assert!(out.iter().all(|r| r.distance_km.is_none()));
    }

    #[test]
    fn test_rank_orders_by_distance_and_trails_unranked() {
        let origin = Location::new(PERTH.lat, PERTH.lng);
        let input = vec![
            record("far", Some((-33.8688, 151.2093))),   // Sydney
            record("none-1", None),
            record("near", Some((-31.95, 115.87))),       // Perth CBD
            record("none-2", None),
            record("mid", Some((-34.9285, 138.6007))),    // Adelaide
        ];
        let out = rank(input, Some(&origin));
        assert_eq!(ids(&out), vec!["near", "mid", "far", "none-1", "none-2"]);
        assert!(out[..3].iter().all(|r| r.distance_km.is_some()));
        assert!(out[3..].iter().all(|r| r.distance_km.is_none()));
    }

    #[test]
    fn test_rank_is_stable_for_ties() {
        let origin = Location::new(0.0, 0.0);
        let input = vec![
            record("first", Some((1.0, 0.0))),
            record("second", Some((-1.0, 0.0))),
            record("third", Some((1.0, 0.0))),
        ];
        let out = rank(input, Some(&origin));
        assert_eq!(ids(&out), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_rank_idempotent() {
        let origin = Location::new(MEDINA.lat, MEDINA.lng);
        let input = vec![
            record("a", Some((MECCA.lat, MECCA.lng))),
            record("b", None),
            record("c", Some((MEDINA.lat, MEDINA.lng))),
        ];
        let first = rank(input.clone(), Some(&origin));
        let second = rank(input, Some(&origin));
        assert_eq!(first, second);
    }

    #[test]
    fn test_location_validation() {
        assert!(Location::new(31.95, 115.86).is_valid());
        assert!(!Location::new(91.0, 0.0).is_valid());
        assert!(!Location::new(0.0, -181.0).is_valid());
        assert!(!Location::new(f64::NAN, 0.0).is_valid());
        assert!(GeoPoint::new(0.0, f64::INFINITY).is_none());
    }

    #[test]
    fn test_format_distance() {
        assert_eq!(format_distance(0.85), "850 m");
        assert_eq!(format_distance(12.34), "12.3 km");
        assert_eq!(format_distance(3421.7), "3422 km");
    }
}
