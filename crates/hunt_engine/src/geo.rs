use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const EARTH_RADIUS_KM: f64 = 6371.0;
pub const KM_PER_DEGREE_LAT: f64 = 111.32;
const MIN_LNG_SCALE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum CoordinateError {
    #[error("latitude {0} is not a finite number in [-90, 90]")]
    Latitude(f64),
    #[error("longitude {0} is not a finite number in [-180, 180]")]
    Longitude(f64),
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Result<Self, CoordinateError> {
        let point = Self { lat, lng };
        point.validate()?;
        Ok(point)
    }

    pub fn validate(&self) -> Result<(), CoordinateError> {
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return Err(CoordinateError::Latitude(self.lat));
        }
        if !self.lng.is_finite() || !(-180.0..=180.0).contains(&self.lng) {
            return Err(CoordinateError::Longitude(self.lng));
        }
        Ok(())
    }

    /// Great-circle distance in kilometres (haversine).
    pub fn distance_km(&self, other: LatLng) -> f64 {
        let d_lat = (other.lat - self.lat).to_radians();
        let d_lng = (other.lng - self.lng).to_radians();
        let a = (d_lat * 0.5).sin().powi(2)
            + self.lat.to_radians().cos() * other.lat.to_radians().cos() * (d_lng * 0.5).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
    }
}

/// Axis-aligned bounds in degrees, `south_west` to `north_east`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoBounds {
    pub south_west: LatLng,
    pub north_east: LatLng,
}

impl GeoBounds {
    pub fn around_circle(center: LatLng, radius_km: f64) -> Self {
        let radius_km = radius_km.max(0.0);
        let d_lat = radius_km / KM_PER_DEGREE_LAT;
        let lng_scale = (KM_PER_DEGREE_LAT * center.lat.to_radians().cos()).max(MIN_LNG_SCALE);
        let d_lng = (radius_km / lng_scale).min(180.0);
        Self {
            south_west: LatLng {
                lat: (center.lat - d_lat).max(-90.0),
                lng: (center.lng - d_lng).max(-180.0),
            },
            north_east: LatLng {
                lat: (center.lat + d_lat).min(90.0),
                lng: (center.lng + d_lng).min(180.0),
            },
        }
    }

    pub fn contains(&self, point: LatLng) -> bool {
        (self.south_west.lat..=self.north_east.lat).contains(&point.lat)
            && (self.south_west.lng..=self.north_east.lng).contains(&point.lng)
    }

    pub fn center(&self) -> LatLng {
        LatLng {
            lat: (self.south_west.lat + self.north_east.lat) * 0.5,
            lng: (self.south_west.lng + self.north_east.lng) * 0.5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_out_of_range_and_non_finite() {
        assert!(LatLng::new(41.9, 12.5).is_ok());
        assert_eq!(LatLng::new(91.0, 0.0), Err(CoordinateError::Latitude(91.0)));
        assert_eq!(
            LatLng::new(0.0, -180.5),
            Err(CoordinateError::Longitude(-180.5))
        );
        assert!(LatLng::new(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn distance_between_rome_and_milan_is_plausible() {
        let rome = LatLng { lat: 41.9028, lng: 12.4964 };
        let milan = LatLng { lat: 45.4642, lng: 9.19 };
        let distance = rome.distance_km(milan);
        assert!((distance - 477.0).abs() < 5.0, "distance was {distance}");
    }

    #[test]
    fn circle_bounds_contain_center_and_scale_with_radius() {
        let center = LatLng { lat: 45.0, lng: 9.0 };
        let small = GeoBounds::around_circle(center, 5.0);
        let large = GeoBounds::around_circle(center, 500.0);

        assert!(small.contains(center));
        assert!(large.contains(small.north_east));
        assert!((small.center().lat - center.lat).abs() < 1e-9);
        assert!(large.north_east.lat - large.south_west.lat > small.north_east.lat - small.south_west.lat);
    }

    #[test]
    fn circle_bounds_clamp_at_poles() {
        let bounds = GeoBounds::around_circle(LatLng { lat: 89.9, lng: 0.0 }, 500.0);
        assert_eq!(bounds.north_east.lat, 90.0);
        assert!(bounds.south_west.lng >= -180.0);
        assert!(bounds.north_east.lng <= 180.0);
    }
}
