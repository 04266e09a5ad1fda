//! Great-circle distance and geofence containment.

use crate::geofence::Geofence;
use crate::types::Coordinate;

/// Mean Earth radius in meters (IUGG).
pub const EARTH_RADIUS_METERS: f64 = 6_371_008.8;

/// Returns `true` if `latitude` is finite and within [-90, 90].
#[must_use]
pub fn is_valid_latitude(latitude: f64) -> bool {
    (-90.0..=90.0).contains(&latitude)
}

/// Returns `true` if `longitude` is finite and within [-180, 180].
#[must_use]
pub fn is_valid_longitude(longitude: f64) -> bool {
    (-180.0..=180.0).contains(&longitude)
}

/// Surface distance between two coordinates in meters (haversine).
///
/// Symmetric in its arguments and exactly zero for identical coordinates.
#[must_use]
pub fn distance_meters(a: Coordinate, b: Coordinate) -> f64 {
    let lat_a = a.latitude.to_radians();
    let lat_b = b.latitude.to_radians();
    // abs() keeps the result bit-identical when the arguments are swapped
    let d_lat = (lat_b - lat_a).abs();
    let d_lon = (b.longitude.to_radians() - a.longitude.to_radians()).abs();

    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lon / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_METERS * h.sqrt().min(1.0).asin()
}

/// Returns `true` if `point` lies within `fence`'s radius of its center.
///
/// Inactive fences never contain anything.
#[must_use]
pub fn is_contained(point: Coordinate, fence: &Geofence) -> bool {
    fence.active && distance_meters(point, fence.center) <= fence.radius_meters
}

/// First fence in iteration order that contains `point`.
pub fn find_containing<'a, I>(point: Coordinate, fences: I) -> Option<&'a Geofence>
where
    I: IntoIterator<Item = &'a Geofence>,
{
    fences.into_iter().find(|fence| is_contained(point, fence))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geofence::NewGeofence;

    fn fence(name: &str, lat: f64, lon: f64, radius: f64, active: bool) -> Geofence {
        Geofence::from_new(NewGeofence {
            name: name.to_string(),
            color: None,
            center: Coordinate::new(lat, lon),
            radius_meters: radius,
            active,
        })
    }

    #[test]
    fn test_distance_is_zero_for_same_point() {
        let points = [
            Coordinate::new(0.0, 0.0),
            Coordinate::new(37.0, -122.0),
            Coordinate::new(-89.9, 179.9),
        ];
        for p in points {
            assert!(distance_meters(p, p).abs() < f64::EPSILON);
        }
    }

    #[test]
    fn test_distance_is_symmetric() {
        let pairs = [
            (Coordinate::new(0.0, 0.0), Coordinate::new(1.0, 0.0)),
            (Coordinate::new(37.7749, -122.4194), Coordinate::new(51.5074, -0.1278)),
            (Coordinate::new(-33.86, 151.2), Coordinate::new(35.68, 139.69)),
            (Coordinate::new(10.0, 179.5), Coordinate::new(10.0, -179.5)),
        ];
        for (a, b) in pairs {
            assert_eq!(distance_meters(a, b).to_bits(), distance_meters(b, a).to_bits());
        }
    }

    #[test]
    fn test_one_degree_of_latitude() {
        let d = distance_meters(Coordinate::new(0.0, 0.0), Coordinate::new(1.0, 0.0));
        assert!((d - 111_195.0).abs() < 10.0, "got {d}");
    }

    #[test]
    fn test_distinct_points_have_positive_distance() {
        let d = distance_meters(Coordinate::new(37.0, -122.0), Coordinate::new(37.0001, -122.0));
        assert!(d > 10.0 && d < 12.0, "got {d}");
    }

    #[test]
    fn test_center_is_contained() {
        let office = fence("Office", 37.0, -122.0, 100.0, true);
        assert!(is_contained(Coordinate::new(37.0, -122.0), &office));
    }

    #[test]
    fn test_point_outside_radius() {
        let office = fence("Office", 37.0, -122.0, 100.0, true);
        // ~111 m north
        assert!(!is_contained(Coordinate::new(37.001, -122.0), &office));
    }

    #[test]
    fn test_inactive_fence_contains_nothing() {
        let off = fence("Off", 0.0, 0.0, 1_000_000.0, false);
        for p in [
            Coordinate::new(0.0, 0.0),
            Coordinate::new(0.001, 0.001),
            Coordinate::new(5.0, 5.0),
        ] {
            assert!(!is_contained(p, &off));
        }
    }

    #[test]
    fn test_find_containing_prefers_first_match() {
        let big = fence("Campus", 0.0, 0.0, 500.0, true);
        let small = fence("Lab", 0.0, 0.0, 50.0, true);
        let fences = vec![big, small];

        let hit = find_containing(Coordinate::new(0.0, 0.0), &fences).unwrap();
        assert_eq!(hit.name, "Campus");

        assert!(find_containing(Coordinate::new(3.0, 3.0), &fences).is_none());
    }

    #[test]
    fn test_coordinate_range_checks() {
        assert!(is_valid_latitude(-90.0));
        assert!(!is_valid_latitude(90.01));
        assert!(is_valid_longitude(180.0));
        assert!(!is_valid_longitude(f64::INFINITY));
        assert!(!is_valid_latitude(f64::NAN));
    }
}
