//! Coordinate mapping between raster reference systems.
//!
//! Identity for matching references, and pure-Rust WGS84 <-> UTM
//! (Snyder 1987, USGS Prof. Paper 1395) for EPSG 4326 and 326xx/327xx,
//! which covers Landsat scenes and SRTM/Copernicus DEM tiles.

use crate::types::{GlofError, GlofResult, SpatialReference};

const A: f64 = 6_378_137.0;
const F: f64 = 1.0 / 298.257_223_563;
const E2: f64 = 2.0 * F - F * F;
const E_PRIME2: f64 = E2 / (1.0 - E2);
const K0: f64 = 0.9996;
const FALSE_EASTING: f64 = 500_000.0;
const FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

/// Maps coordinates from one reference system into another, in place
pub trait CoordinateMapper: Send + Sync {
    fn map(&self, xs: &mut [f64], ys: &mut [f64]) -> GlofResult<()>;

    fn is_identity(&self) -> bool {
        false
    }
}

/// No-op mapper for grids sharing a reference system
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityMapper;

impl CoordinateMapper for IdentityMapper {
    fn map(&self, _xs: &mut [f64], _ys: &mut [f64]) -> GlofResult<()> {
        Ok(())
    }

    fn is_identity(&self) -> bool {
        true
    }
}

/// Supported projections for the pure-Rust mapper
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    /// WGS84 longitude/latitude in degrees
    Geographic,
    /// WGS84 / UTM zone, metres
    Utm { zone: u32, north: bool },
}

impl Projection {
    pub fn from_epsg(epsg: u32) -> Option<Self> {
        if epsg == 4326 {
            return Some(Projection::Geographic);
        }
        parse_utm_epsg(epsg).map(|(zone, north)| Projection::Utm { zone, north })
    }

    fn to_lon_lat(self, x: f64, y: f64) -> (f64, f64) {
        match self {
            Projection::Geographic => (x, y),
            Projection::Utm { zone, north } => utm_to_wgs84(x, y, zone, north),
        }
    }

    fn from_lon_lat(self, lon: f64, lat: f64) -> (f64, f64) {
        match self {
            Projection::Geographic => (lon, lat),
            Projection::Utm { zone, north } => wgs84_to_utm(lon, lat, zone, north),
        }
    }
}

/// EPSG-to-EPSG mapper through geographic WGS84
#[derive(Debug, Clone, Copy)]
pub struct EpsgMapper {
    from: Projection,
    to: Projection,
}

impl EpsgMapper {
    pub fn new(from: Projection, to: Projection) -> Self {
        Self { from, to }
    }
}

impl CoordinateMapper for EpsgMapper {
    fn map(&self, xs: &mut [f64], ys: &mut [f64]) -> GlofResult<()> {
        if xs.len() != ys.len() {
            return Err(GlofError::Alignment(format!(
                "coordinate slices differ in length: {} != {}",
                xs.len(),
                ys.len()
            )));
        }
        for (x, y) in xs.iter_mut().zip(ys.iter_mut()) {
            let (lon, lat) = self.from.to_lon_lat(*x, *y);
            let (tx, ty) = self.to.from_lon_lat(lon, lat);
            *x = tx;
            *y = ty;
        }
        Ok(())
    }
}

/// Select a mapper taking coordinates in `from` into `to`.
///
/// Fails when neither side has a reference system, or when the pair is
/// outside what the pure-Rust mapper supports.
pub fn mapper_for(
    from: Option<&SpatialReference>,
    to: Option<&SpatialReference>,
) -> GlofResult<Box<dyn CoordinateMapper>> {
    match (from, to) {
        (None, None) => Err(GlofError::Alignment(
            "both source and destination reference systems are undefined; no coordinate mapping is possible"
                .to_string(),
        )),
        (Some(defined), None) | (None, Some(defined)) => {
            log::warn!(
                "One grid has no reference system; assuming it shares {}",
                defined
            );
            Ok(Box::new(IdentityMapper))
        }
        (Some(a), Some(b)) if a == b => Ok(Box::new(IdentityMapper)),
        (Some(a), Some(b)) => {
            let from_proj = a.epsg().and_then(Projection::from_epsg);
            let to_proj = b.epsg().and_then(Projection::from_epsg);
            match (from_proj, to_proj) {
                (Some(f), Some(t)) => {
                    log::debug!("Mapping coordinates {} -> {}", a, b);
                    Ok(Box::new(EpsgMapper::new(f, t)))
                }
                _ => Err(GlofError::Alignment(format!(
                    "unsupported reference system pair {} -> {}",
                    a, b
                ))),
            }
        }
    }
}

/// EPSG 326xx -> (zone, north), 327xx -> (zone, south)
pub fn parse_utm_epsg(epsg: u32) -> Option<(u32, bool)> {
    if (32601..=32660).contains(&epsg) {
        Some((epsg - 32600, true))
    } else if (32701..=32760).contains(&epsg) {
        Some((epsg - 32700, false))
    } else {
        None
    }
}

fn central_meridian(zone: u32) -> f64 {
    ((zone as f64 - 1.0) * 6.0 - 180.0 + 3.0).to_radians()
}

/// WGS84 (lon, lat) degrees -> UTM (easting, northing) metres
pub fn wgs84_to_utm(lon_deg: f64, lat_deg: f64, zone: u32, north: bool) -> (f64, f64) {
    let lat = lat_deg.to_radians();
    let lon = lon_deg.to_radians();
    let lon0 = central_meridian(zone);

    let sin_lat = lat.sin();
    let cos_lat = lat.cos();
    let tan_lat = lat.tan();

    let n = A / (1.0 - E2 * sin_lat * sin_lat).sqrt();
    let t = tan_lat * tan_lat;
    let c = E_PRIME2 * cos_lat * cos_lat;
    let a = cos_lat * (lon - lon0);
    let m = meridional_arc(lat);

    let a2 = a * a;
    let a3 = a2 * a;
    let a4 = a2 * a2;
    let a5 = a4 * a;
    let a6 = a4 * a2;

    let easting = K0
        * n
        * (a + (1.0 - t + c) * a3 / 6.0
            + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * E_PRIME2) * a5 / 120.0)
        + FALSE_EASTING;

    let northing = K0
        * (m + n
            * tan_lat
            * (a2 / 2.0
                + (5.0 - t + 9.0 * c + 4.0 * c * c) * a4 / 24.0
                + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * E_PRIME2) * a6 / 720.0));

    if north {
        (easting, northing)
    } else {
        (easting, northing + FALSE_NORTHING_SOUTH)
    }
}

/// UTM (easting, northing) metres -> WGS84 (lon, lat) degrees
pub fn utm_to_wgs84(easting: f64, northing: f64, zone: u32, north: bool) -> (f64, f64) {
    let x = easting - FALSE_EASTING;
    let y = if north {
        northing
    } else {
        northing - FALSE_NORTHING_SOUTH
    };

    // Footpoint latitude (Snyder eq. 8-18, 3-26)
    let m = y / K0;
    let mu = m / (A * (1.0 - E2 / 4.0 - 3.0 * E2 * E2 / 64.0 - 5.0 * E2 * E2 * E2 / 256.0));
    let e1 = (1.0 - (1.0 - E2).sqrt()) / (1.0 + (1.0 - E2).sqrt());
    let phi1 = mu
        + (3.0 * e1 / 2.0 - 27.0 * e1.powi(3) / 32.0) * (2.0 * mu).sin()
        + (21.0 * e1 * e1 / 16.0 - 55.0 * e1.powi(4) / 32.0) * (4.0 * mu).sin()
        + (151.0 * e1.powi(3) / 96.0) * (6.0 * mu).sin()
        + (1097.0 * e1.powi(4) / 512.0) * (8.0 * mu).sin();

    let sin_phi1 = phi1.sin();
    let cos_phi1 = phi1.cos();
    let tan_phi1 = phi1.tan();

    let c1 = E_PRIME2 * cos_phi1 * cos_phi1;
    let t1 = tan_phi1 * tan_phi1;
    let n1 = A / (1.0 - E2 * sin_phi1 * sin_phi1).sqrt();
    let r1 = A * (1.0 - E2) / (1.0 - E2 * sin_phi1 * sin_phi1).powf(1.5);
    let d = x / (n1 * K0);

    let d2 = d * d;
    let d3 = d2 * d;
    let d4 = d2 * d2;
    let d5 = d4 * d;
    let d6 = d4 * d2;

    let lat = phi1
        - (n1 * tan_phi1 / r1)
            * (d2 / 2.0
                - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * E_PRIME2) * d4 / 24.0
                + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1 - 252.0 * E_PRIME2 - 3.0 * c1 * c1)
                    * d6
                    / 720.0);

    let lon = central_meridian(zone)
        + (d - (1.0 + 2.0 * t1 + c1) * d3 / 6.0
            + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * E_PRIME2 + 24.0 * t1 * t1) * d5
                / 120.0)
            / cos_phi1;

    (lon.to_degrees(), lat.to_degrees())
}

/// Meridional arc from the equator to `lat` radians (Snyder eq. 3-21)
fn meridional_arc(lat: f64) -> f64 {
    let e4 = E2 * E2;
    let e6 = e4 * E2;

    A * ((1.0 - E2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * lat
        - (3.0 * E2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * lat).sin()
        + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * lat).sin()
        - (35.0 * e6 / 3072.0) * (6.0 * lat).sin())
}
