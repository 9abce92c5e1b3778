//! Snapped lat/lng grids.
//!
//! Tile edges align to a regular degree interval. When the interval does not
//! evenly divide 180° (longitude) or 90° (latitude), the grid is shifted by
//! half a tile so the equator and prime meridian bisect a tile instead of
//! bounding one; origins then sit on half-cell lines. The shifted snap is the
//! closed form `floor((x + off) / w) * w - off` (ceil analogue for latitude),
//! which tiles the area of use without gaps or overlaps.
use crate::core::grid::{BBox, block_size_for};
use crate::error::{Error, Result};

const EPS: f64 = 1e-9;

#[derive(Clone, Debug)]
pub struct SnappedGrid {
    /// Tile width in degrees.
    pub width: f64,
    /// Tile height in degrees.
    pub height: f64,
    /// Pixel columns per tile.
    pub cols: usize,
    /// Pixel rows per tile.
    pub rows: usize,
    /// GeoTIFF block edge in pixels.
    pub block_size: usize,
    /// Longitude half-cell offset (0 when the width divides 180°).
    off_x: f64,
    /// Latitude half-cell offset (0 when the height divides 90°).
    off_y: f64,
}

impl SnappedGrid {
    /// Square grid of `degrees`-sized tiles, `cols` pixels on a side.
    ///
    /// The size must be a whole number of degrees, and when the half-cell
    /// offset applies it must be whole too; otherwise no origin encodes and
    /// the catalog would be empty.
    pub fn new(degrees: f64, cols: usize) -> Result<SnappedGrid> {
        if !(degrees > 0.0) || degrees > 90.0 {
            return Err(Error::config(format!(
                "tile size must be in (0, 90] degrees, got {}",
                degrees
            )));
        }
        if cols == 0 {
            return Err(Error::config("tile column count must be positive"));
        }
        if degrees.fract().abs() > EPS {
            return Err(Error::config(format!(
                "tile size must be a whole number of degrees, got {}",
                degrees
            )));
        }
        let block_size = block_size_for(cols)?;
        let off_x = if (180.0 % degrees).abs() > EPS {
            degrees / 2.0
        } else {
            0.0
        };
        let off_y = if (90.0 % degrees).abs() > EPS {
            degrees / 2.0
        } else {
            0.0
        };
        // Tile ids name whole-degree origins, so a fractional offset would
        // make every origin unencodable.
        if off_x.fract().abs() > EPS || off_y.fract().abs() > EPS {
            return Err(Error::config(format!(
                "{}-degree tiles need a half-cell offset of {} degrees; \
                 tile origins must fall on whole degrees",
                degrees,
                degrees / 2.0
            )));
        }
        Ok(SnappedGrid {
            width: degrees,
            height: degrees,
            cols,
            rows: cols,
            block_size,
            off_x,
            off_y,
        })
    }

    pub fn name(&self) -> String {
        format!("{}/{}", self.width as i64, self.cols)
    }

    pub fn xres(&self) -> f64 {
        self.width / self.cols as f64
    }

    pub fn yres(&self) -> f64 {
        self.height / self.rows as f64
    }

    /// Top-left corner of the grid cell containing (x, y).
    ///
    /// The post-condition `-180 <= lng <= 180 - width` and
    /// `-90 + height <= lat <= 90` guards against points outside the grid's
    /// area of use; a violation is a grid misconfiguration, not a runtime
    /// data condition.
    pub fn origin_of(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        let lng = ((x + self.off_x) / self.width).floor() * self.width - self.off_x;
        let lat = ((y - self.off_y) / self.height).ceil() * self.height + self.off_y;

        if lng < -180.0 - EPS || lng > 180.0 - self.width + EPS {
            return Err(Error::config(format!(
                "point ({}, {}) snaps to longitude {} outside grid {}",
                x,
                y,
                lng,
                self.name()
            )));
        }
        if lat > 90.0 + EPS || lat < -90.0 + self.height - EPS {
            return Err(Error::config(format!(
                "point ({}, {}) snaps to latitude {} outside grid {}",
                x,
                y,
                lat,
                self.name()
            )));
        }
        Ok((lng, lat))
    }

    pub fn tile_id_of(&self, x: f64, y: f64) -> Result<String> {
        let (lng, lat) = self.origin_of(x, y)?;
        self.encode(lng, lat)
    }

    /// Encode a grid-snapped origin as `"{lat:02}{N|S}_{lng:03}{E|W}"`.
    pub fn encode(&self, lng: f64, lat: f64) -> Result<String> {
        let lng_i = lng.round();
        let lat_i = lat.round();
        if (lng - lng_i).abs() > 1e-6 || (lat - lat_i).abs() > 1e-6 {
            return Err(Error::config(format!(
                "tile origin ({}, {}) does not fall on whole degrees",
                lng, lat
            )));
        }
        let ns = if lat_i >= 0.0 { 'N' } else { 'S' };
        let ew = if lng_i >= 0.0 { 'E' } else { 'W' };
        Ok(format!(
            "{:02}{}_{:03}{}",
            lat_i.abs() as i64,
            ns,
            lng_i.abs() as i64,
            ew
        ))
    }

    /// Exact inverse of [`encode`](Self::encode): tile ID back to its
    /// top-left origin `(lng, lat)`.
    pub fn decode(&self, tile_id: &str) -> Result<(f64, f64)> {
        let (lat_part, lng_part) = tile_id
            .split_once('_')
            .ok_or_else(|| Error::config(format!("malformed tile id: {}", tile_id)))?;

        let parse = |part: &str, pos: char, neg: char| -> Result<f64> {
            let (digits, suffix) = part.split_at(part.len().saturating_sub(1));
            let mag: f64 = digits
                .parse()
                .map_err(|_| Error::config(format!("malformed tile id: {}", tile_id)))?;
            match suffix.chars().next() {
                Some(c) if c == pos => Ok(mag),
                Some(c) if c == neg => Ok(-mag),
                _ => Err(Error::config(format!("malformed tile id: {}", tile_id))),
            }
        };

        let lat = parse(lat_part, 'N', 'S')?;
        let lng = parse(lng_part, 'E', 'W')?;

        // The id must name an actual grid origin, not an arbitrary corner.
        let (slng, slat) = self.origin_of(lng + EPS, lat - EPS)?;
        if (slng - lng).abs() > 1e-6 || (slat - lat).abs() > 1e-6 {
            return Err(Error::config(format!(
                "tile id {} is not aligned to grid {}",
                tile_id,
                self.name()
            )));
        }
        Ok((lng, lat))
    }

    pub fn bounds_of(&self, tile_id: &str) -> Result<BBox> {
        let (lng, lat) = self.decode(tile_id)?;
        Ok(BBox::new(lng, lat - self.height, lng + self.width, lat))
    }

    /// Longitude origins, west to east, covering [-180, 180].
    fn lng_origins(&self) -> Vec<f64> {
        let first = ((-180.0 + self.off_x) / self.width).ceil() * self.width - self.off_x;
        let mut origins = Vec::new();
        let mut lng = first;
        while lng + self.width <= 180.0 + EPS {
            origins.push(lng);
            lng += self.width;
        }
        origins
    }

    /// Latitude origins, north to south, restricted to origins whose tiles
    /// lie fully inside [-90, 90].
    fn lat_origins(&self) -> Vec<f64> {
        let first = ((90.0 - self.off_y) / self.height).floor() * self.height + self.off_y;
        let mut origins = Vec::new();
        let mut lat = first;
        while lat - self.height >= -90.0 - EPS {
            origins.push(lat);
            lat -= self.height;
        }
        origins
    }

    /// Every tile ID of the grid: the cross product of longitude and
    /// latitude snap points over the offset-adjusted range.
    pub fn tile_ids(&self) -> Vec<String> {
        let lngs = self.lng_origins();
        let lats = self.lat_origins();
        let mut ids = Vec::with_capacity(lngs.len() * lats.len());
        for lat in &lats {
            for lng in &lngs {
                // Origins produced by the iterators are grid-snapped whole
                // degrees; encode cannot fail for them.
                if let Ok(id) = self.encode(*lng, *lat) {
                    ids.push(id);
                }
            }
        }
        ids
    }

    /// Geographic area of use: the extent tiled by [`tile_ids`](Self::tile_ids).
    pub fn area_of_use(&self) -> BBox {
        let lngs = self.lng_origins();
        let lats = self.lat_origins();
        let left = lngs.first().copied().unwrap_or(-180.0);
        let right = lngs.last().copied().unwrap_or(180.0 - self.width) + self.width;
        let top = lats.first().copied().unwrap_or(90.0);
        let bottom = lats.last().copied().unwrap_or(-90.0 + self.height) - self.height;
        BBox::new(left, bottom, right, top)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn grid_10() -> SnappedGrid {
        SnappedGrid::new(10.0, 40000).unwrap()
    }

    fn grid_8() -> SnappedGrid {
        SnappedGrid::new(8.0, 32000).unwrap()
    }

    #[test]
    fn aligned_grid_scenarios() {
        let g = grid_10();
        assert_eq!(g.tile_id_of(0.0, 0.0).unwrap(), "00N_000E");
        assert_eq!(g.tile_id_of(-1.0, -1.0).unwrap(), "00N_010W");
    }

    #[test]
    fn offset_grid_scenarios() {
        let g = grid_8();
        assert_eq!(g.tile_id_of(0.0, 0.0).unwrap(), "04N_004W");
        assert_eq!(g.tile_id_of(5.0, -5.0).unwrap(), "04S_004E");
    }

    #[test]
    fn tile_id_is_idempotent_on_own_origin() {
        for g in [grid_10(), grid_8()] {
            for (x, y) in [(12.3, 45.6), (-77.0, -33.0), (0.0, 0.0)] {
                let id = g.tile_id_of(x, y).unwrap();
                let (lng, lat) = g.decode(&id).unwrap();
                // Re-derive from a point just inside the origin corner.
                let id2 = g.tile_id_of(lng + 1e-7, lat - 1e-7).unwrap();
                assert_eq!(id, id2);
            }
        }
    }

    #[test]
    fn decode_inverts_encode() {
        let g = grid_8();
        for id in ["04N_004W", "04S_004E", "84N_180W", "76S_172E"] {
            let (lng, lat) = g.decode(id).unwrap();
            assert_eq!(g.encode(lng, lat).unwrap(), id);
        }
        assert!(g.decode("03N_000E").is_err()); // not a grid origin
        assert!(g.decode("garbage").is_err());
    }

    #[test]
    fn bounds_contain_query_point() {
        for g in [grid_10(), grid_8()] {
            let aou = g.area_of_use();
            for (x, y) in [
                (0.0, 0.0),
                (-1.0, -1.0),
                (179.9, aou.top - 0.1),
                (aou.left + 0.1, aou.bottom + 0.1),
                (33.33, -7.77),
            ] {
                let id = g.tile_id_of(x, y).unwrap();
                let b = g.bounds_of(&id).unwrap();
                assert!(
                    b.contains(x, y),
                    "{:?} does not contain ({}, {}) in {}",
                    b,
                    x,
                    y,
                    g.name()
                );
            }
        }
    }

    #[test]
    fn boundary_point_resolves_to_one_tile() {
        let g = grid_10();
        // x = 10 is the shared edge of 000E and 010E tiles; left-inclusive.
        assert_eq!(g.tile_id_of(10.0, 5.0).unwrap(), "10N_010E");
        // y = 10 is the shared edge; top-inclusive means it belongs to the
        // tile whose top is 10.
        assert_eq!(g.tile_id_of(5.0, 10.0).unwrap(), "10N_000E");
    }

    #[test]
    fn offset_grid_tiles_cover_area_of_use_exactly() {
        let g = grid_8();
        let aou = g.area_of_use();
        assert_relative_eq!(aou.left, -180.0);
        assert_relative_eq!(aou.right, 180.0);
        assert_relative_eq!(aou.top, 84.0);
        assert_relative_eq!(aou.bottom, -84.0);

        let ids = g.tile_ids();
        let unique: std::collections::HashSet<_> = ids.iter().collect();
        assert_eq!(ids.len(), unique.len(), "duplicate tile ids");

        let tile_area: f64 = ids.iter().map(|id| g.bounds_of(id).unwrap().area()).sum();
        assert_relative_eq!(tile_area, aou.area(), epsilon = 1e-6);
    }

    #[test]
    fn aligned_grid_catalog_size() {
        let g = grid_10();
        // 36 columns x 18 rows
        assert_eq!(g.tile_ids().len(), 36 * 18);
        let aou = g.area_of_use();
        assert_relative_eq!(aou.top, 90.0);
        assert_relative_eq!(aou.bottom, -90.0);
    }

    #[test]
    fn resolution_and_blocks() {
        let g = grid_10();
        assert_relative_eq!(g.xres(), 0.00025);
        assert_eq!(g.block_size, 400);
    }

    #[test]
    fn out_of_use_point_is_config_error() {
        let g = grid_8();
        // 89N is above the offset grid's area of use.
        assert!(g.tile_id_of(0.0, 89.0).is_err());
        // Longitude beyond the antimeridian.
        assert!(g.tile_id_of(181.0, 0.0).is_err());
    }

    #[test]
    fn invalid_parameters_rejected() {
        assert!(SnappedGrid::new(0.0, 4000).is_err());
        assert!(SnappedGrid::new(10.0, 0).is_err());
        // Prime pixel count: no valid block size.
        assert!(SnappedGrid::new(10.0, 39989).is_err());
    }

    #[test]
    fn unencodable_origins_rejected_at_construction() {
        // 7-degree tiles snap origins onto half degrees (offset 3.5), so
        // nothing would encode and the catalog would come out empty.
        assert!(matches!(
            SnappedGrid::new(7.0, 33600),
            Err(Error::Config(_))
        ));
        // A fractional tile size leaves gaps between whole-degree ids.
        assert!(SnappedGrid::new(1.5, 6000).is_err());

        // An odd size that divides 180 evenly needs no offset and stays
        // valid, with a full catalog.
        let g = SnappedGrid::new(9.0, 36000).unwrap();
        assert_eq!(g.tile_ids().len(), 40 * 20);
    }
}
