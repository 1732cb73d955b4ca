/**
 * The globe tile index binds aircraft to regional buckets for sharded
 * snapshot emission.
 *
 * A hand-authored list of rectangles covers the busy regions with one
 * tile each; everything else falls into a uniform grid of
 * [`GLOBE_INDEX_GRID`]-degree cells. Tile ids below 1000 are reserved for
 * the special rectangles (their position in the table); grid cells get
 * `row * GLOBE_LAT_MULT + col + 1000`.
 */

/// Edge length of the uniform grid cells, degrees
pub const GLOBE_INDEX_GRID: f64 = 3.0;

/// Stride between grid rows in the tile id space
pub const GLOBE_LAT_MULT: u16 = 128;

/// Ids below this belong to the special rectangles
pub const GLOBE_SPECIAL_BASE: u16 = 1000;

/// (south, west, north, east); `west > east` wraps the antimeridian
#[derive(Debug, Copy, Clone)]
pub struct TileRect {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

impl TileRect {
    fn contains(&self, lat: f64, lon: f64) -> bool {
        if lat < self.south || lat > self.north {
            return false;
        }
        if self.west <= self.east {
            lon >= self.west && lon <= self.east
        } else {
            // wraps the antimeridian
            lon >= self.west || lon <= self.east
        }
    }

    fn center(&self) -> (f64, f64) {
        let lat = (self.south + self.north) / 2.;
        let lon = if self.west <= self.east {
            (self.west + self.east) / 2.
        } else {
            let mut mid = (self.west + self.east + 360.) / 2.;
            if mid > 180. {
                mid -= 360.;
            }
            mid
        };
        (lat, lon)
    }
}

/// Busy and special regions, first hit wins
pub static SPECIAL_TILES: &[TileRect] = &[
    // central Europe
    TileRect { south: 45.0, west: 0.0, north: 55.0, east: 15.0 },
    // British Isles and the North Sea
    TileRect { south: 50.0, west: -11.0, north: 61.0, east: 0.0 },
    // Iberia and western Mediterranean
    TileRect { south: 35.0, west: -11.0, north: 45.0, east: 5.0 },
    // Italy, Alps, Adriatic
    TileRect { south: 36.0, west: 5.0, north: 45.0, east: 20.0 },
    // southeastern Europe and Turkey
    TileRect { south: 34.0, west: 20.0, north: 45.0, east: 40.0 },
    // Scandinavia and the Baltics
    TileRect { south: 55.0, west: 0.0, north: 71.0, east: 32.0 },
    // US northeast corridor
    TileRect { south: 36.0, west: -83.0, north: 46.0, east: -64.0 },
    // US southeast and Florida
    TileRect { south: 24.0, west: -92.0, north: 36.0, east: -72.0 },
    // US midwest
    TileRect { south: 36.0, west: -98.0, north: 49.0, east: -83.0 },
    // US west coast
    TileRect { south: 31.0, west: -125.0, north: 49.0, east: -108.0 },
    // Texas and the Gulf
    TileRect { south: 24.0, west: -108.0, north: 36.0, east: -92.0 },
    // Japan and Korea
    TileRect { south: 30.0, west: 126.0, north: 46.0, east: 147.0 },
    // eastern China
    TileRect { south: 20.0, west: 105.0, north: 41.0, east: 126.0 },
    // southeast Asia
    TileRect { south: -11.0, west: 93.0, north: 20.0, east: 128.0 },
    // India
    TileRect { south: 5.0, west: 67.0, north: 30.0, east: 93.0 },
    // Gulf states
    TileRect { south: 20.0, west: 40.0, north: 34.0, east: 60.0 },
    // Australian east coast
    TileRect { south: -44.0, west: 138.0, north: -24.0, east: 156.0 },
    // New Zealand and the dateline
    TileRect { south: -51.0, west: 160.0, north: -30.0, east: -170.0 },
    // Hawaii and the mid-Pacific, wrapping the antimeridian
    TileRect { south: 15.0, west: 175.0, north: 30.0, east: -150.0 },
    // Brazil southeast
    TileRect { south: -30.0, west: -55.0, north: -15.0, east: -38.0 },
];

fn quantize(value: f64, offset: f64) -> u16 {
    // clamp the poles / antimeridian edge into the last cell
    let cell = ((value + offset) / GLOBE_INDEX_GRID).floor();
    let max = (2. * offset / GLOBE_INDEX_GRID) - 1.;
    cell.clamp(0., max) as u16
}

/// Cell center of the quantized coordinate
fn cell_center(cell: u16, offset: f64) -> f64 {
    (cell as f64 + 0.5) * GLOBE_INDEX_GRID - offset
}

/// The tile id for a position
pub fn globe_index(latitude: f64, longitude: f64) -> u16 {
    let row = quantize(latitude, 90.);
    let col = quantize(longitude, 180.);
    // the whole grid cell must map to one tile, so rectangles are tested
    // against the cell center
    let lat = cell_center(row, 90.);
    let lon = cell_center(col, 180.);

    for (i, rect) in SPECIAL_TILES.iter().enumerate() {
        if rect.contains(lat, lon) {
            return i as u16;
        }
    }
    row * GLOBE_LAT_MULT + col + GLOBE_SPECIAL_BASE
}

/// A representative position inside a tile (the rectangle or cell center)
pub fn globe_index_center(index: u16) -> Option<(f64, f64)> {
    if index < GLOBE_SPECIAL_BASE {
        return SPECIAL_TILES.get(index as usize).map(|r| r.center());
    }
    let raw = index - GLOBE_SPECIAL_BASE;
    let row = raw / GLOBE_LAT_MULT;
    let col = raw % GLOBE_LAT_MULT;
    let lat = cell_center(row, 90.);
    let lon = cell_center(col, 180.);
    if !(-90. ..=90.).contains(&lat) || !(-180. ..=180.).contains(&lon) {
        return None;
    }
    Some((lat, lon))
}

/// The id a tile's own representative position maps back to; equals the
/// input for every id `globe_index` can produce
pub fn globe_index_index(index: u16) -> Option<u16> {
    globe_index_center(index).map(|(lat, lon)| globe_index(lat, lon))
}

/// Bounding box (south, west, north, east) of a tile, for snapshot headers
pub fn globe_index_bbox(index: u16) -> Option<(f64, f64, f64, f64)> {
    if index < GLOBE_SPECIAL_BASE {
        return SPECIAL_TILES
            .get(index as usize)
            .map(|r| (r.south, r.west, r.north, r.east));
    }
    let raw = index - GLOBE_SPECIAL_BASE;
    let row = raw / GLOBE_LAT_MULT;
    let col = raw % GLOBE_LAT_MULT;
    let south = row as f64 * GLOBE_INDEX_GRID - 90.;
    let west = col as f64 * GLOBE_INDEX_GRID - 180.;
    Some((
        south,
        west,
        south + GLOBE_INDEX_GRID,
        west + GLOBE_INDEX_GRID,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_special_regions_hit() {
        // Frankfurt lies in the central Europe rectangle
        assert_eq!(globe_index(50.03, 8.57), 0);
        // Heathrow in the British Isles rectangle
        assert_eq!(globe_index(51.47, -0.45), 1);
        // first hit wins where rectangles could overlap
        let idx = globe_index(54.0, 10.0);
        assert_eq!(idx, 0);
    }

    #[test]
    fn test_grid_fallback() {
        // middle of the South Atlantic: no special rectangle
        let idx = globe_index(-40.0, -20.0);
        assert!(idx >= GLOBE_SPECIAL_BASE);
        let row = (idx - GLOBE_SPECIAL_BASE) / GLOBE_LAT_MULT;
        let col = (idx - GLOBE_SPECIAL_BASE) % GLOBE_LAT_MULT;
        assert_eq!(row, ((-40.0 + 90.0) / GLOBE_INDEX_GRID) as u16);
        assert_eq!(col, ((-20.0 + 180.0) / GLOBE_INDEX_GRID) as u16);
    }

    #[test]
    fn test_antimeridian_rectangle() {
        // the mid-Pacific rectangle matches on both sides of the dateline
        let west_side = globe_index(20.0, 179.0);
        let east_side = globe_index(20.0, -160.0);
        assert_eq!(west_side, east_side);
        assert!(west_side < GLOBE_SPECIAL_BASE);
    }

    #[test]
    fn test_inverse_is_identity() {
        let samples = [
            (50.03, 8.57),
            (51.47, -0.45),
            (-40.0, -20.0),
            (20.0, 179.9),
            (20.0, -160.0),
            (0.0, 0.0),
            (89.9, 12.0),
            (-89.9, -179.9),
            (35.0, 139.7),
            (-33.9, 151.2),
        ];
        for (lat, lon) in samples {
            let idx = globe_index(lat, lon);
            assert_eq!(
                globe_index_index(idx),
                Some(idx),
                "round trip failed for ({lat}, {lon}) -> {idx}"
            );
        }
    }

    #[test]
    fn test_cell_stability() {
        // every position of one grid cell maps to the same tile
        let a = globe_index(-40.1, -20.1);
        let b = globe_index(-40.9, -20.9);
        assert_eq!(a, b);
    }

    #[test]
    fn test_bbox_contains_center() {
        for idx in [0u16, 1, 5, globe_index(-40.0, -20.0)] {
            let (south, west, north, east) = globe_index_bbox(idx).unwrap();
            let (lat, lon) = globe_index_center(idx).unwrap();
            assert!(lat >= south && lat <= north);
            if west <= east {
                assert!(lon >= west && lon <= east);
            }
        }
    }
}
