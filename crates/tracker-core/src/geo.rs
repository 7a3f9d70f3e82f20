//! Great-circle distance.

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Haversine distance in meters between two points given in degrees.
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_M * c
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_known_distances() {
        assert_eq!(haversine_m(12.34, 56.78, 12.34, 56.78), 0.0);

        // One degree of latitude along a meridian.
        let one_degree = haversine_m(0.0, 0.0, 1.0, 0.0);
        assert!((one_degree - 111_194.93).abs() < 1.0);

        // Paris to London, roughly 343.5 km.
        let d = haversine_m(48.8566, 2.3522, 51.5074, -0.1278);
        assert!((d - 343_556.0).abs() < 500.0, "got {d}");
    }

    proptest! {
        #[test]
        fn prop_symmetric_and_non_negative(
            lat1 in -90.0f64..90.0, lon1 in -180.0f64..180.0,
            lat2 in -90.0f64..90.0, lon2 in -180.0f64..180.0,
        ) {
            let forward = haversine_m(lat1, lon1, lat2, lon2);
            let backward = haversine_m(lat2, lon2, lat1, lon1);
            prop_assert!(forward >= 0.0);
            prop_assert!((forward - backward).abs() < 1e-6);
            // Never more than half the circumference.
            prop_assert!(forward <= std::f64::consts::PI * EARTH_RADIUS_M + 1e-6);
        }
    }
}
