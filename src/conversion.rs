use std::f64::consts::{FRAC_PI_2, TAU};

use crate::constants::{Degree, Radian};

/// A sky position in the native spherical coordinates of the tessellation.
///
/// `colatitude` θ is measured from the north pole in [0, π], `longitude` φ is in [0, 2π).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkyCoord {
    pub colatitude: Radian,
    pub longitude: Radian,
}

impl SkyCoord {
    /// Build a coordinate from an equatorial-like pair in degrees.
    ///
    /// Arguments
    /// ---------
    /// * `lon`: longitude-like angle (e.g. right ascension), any real value, wrapped into [0, 360)
    /// * `lat`: latitude-like angle (e.g. declination), must lie in [-90, 90]
    ///
    /// Return
    /// ------
    /// * `None` if an angle is not finite or the latitude is out of range
    pub fn from_degrees(lon: Degree, lat: Degree) -> Option<Self> {
        if !lon.is_finite() || !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return None;
        }
        Some(SkyCoord {
            colatitude: FRAC_PI_2 - lat.to_radians(),
            longitude: wrap_longitude(lon.to_radians()),
        })
    }

    /// Latitude in radians, in [-π/2, π/2].
    #[inline]
    pub fn latitude(&self) -> Radian {
        FRAC_PI_2 - self.colatitude
    }
}

/// Wrap an angle into [0, 2π).
#[inline]
pub(crate) fn wrap_longitude(lon: Radian) -> Radian {
    let wrapped = lon.rem_euclid(TAU);
    // rem_euclid can round up to exactly TAU for tiny negative inputs
    if wrapped >= TAU {
        0.0
    } else {
        wrapped
    }
}
