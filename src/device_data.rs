//! The typed values decoded from device responses. All distances are in
//! millimeters, absolute within the room's bounding box.

use std::fmt::Display;

/// A point on the floor plan, used for room corners and zones.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Point {
    pub x: u16,
    pub y: u16,
}

impl Point {
    /// Builds a point from its coordinates.
    pub fn new(x: u16, y: u16) -> Self {
        Self { x, y }
    }
}

impl Display for Point {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// The position reported for one tracked slot.
///
/// `(0, 0)` is not the room's origin: the device uses it to say that nothing
/// is detected in the slot. Use [Position::is_absent] before treating a
/// position as a detection.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Position {
    pub x: u16,
    pub y: u16,
}

impl Position {
    /// The "no detection in this slot" sentinel.
    pub const ABSENT: Position = Position { x: 0, y: 0 };

    /// Builds a position from its coordinates.
    pub fn new(x: u16, y: u16) -> Self {
        Self { x, y }
    }

    /// Whether this is the absence sentinel rather than a detection.
    pub fn is_absent(&self) -> bool {
        *self == Self::ABSENT
    }

    /// The largest of the per-axis distances to `other`.
    pub fn chebyshev_distance(&self, other: &Self) -> u16 {
        self.x.abs_diff(other.x).max(self.y.abs_diff(other.y))
    }
}

impl From<Point> for Position {
    fn from(p: Point) -> Self {
        Self { x: p.x, y: p.y }
    }
}

impl Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_absent() {
            write!(f, "(absent)")
        } else {
            write!(f, "({}, {})", self.x, self.y)
        }
    }
}

/// Counts how many slots hold an actual detection.
pub fn count_present(positions: &[Position]) -> usize {
    positions.iter().filter(|p| !p.is_absent()).count()
}

/// The monitored room: a bounding box plus the corners of the actual floor
/// shape inside it, which need not be rectangular.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomGeometry {
    pub width: u16,
    pub height: u16,
    pub corners: Vec<Point>,
}

/// A region of interest configured on the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Zone {
    #[allow(missing_docs)]
    Circular { center: Point, radius: u16 },
    #[allow(missing_docs)]
    Polygonal { corners: Vec<Point> },
}

/// A raw candidate detection together with how confident the fusion stage
/// is that it is a real person.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionSample {
    pub position: Point,
    /// The raw byte divided by 10, so roughly between 0 and 26.
    pub confidence: f64,
}

/// Layout of the thermal map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThermalResolution {
    pub cols: u8,
    pub rows: u8,
    pub pixel_size_mm: u8,
}

impl ThermalResolution {
    /// Number of pixels in a full map.
    pub fn pixel_count(&self) -> usize {
        self.cols as usize * self.rows as usize
    }
}

/// A full thermal map, row-major, in tenths of a degree. A pixel of 0 carries
/// no reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThermalFrame {
    pub resolution: ThermalResolution,
    pub pixels: Vec<u16>,
}

impl ThermalFrame {
    /// The pixel at `col`, `row`, if the map is that large.
    pub fn pixel(&self, col: usize, row: usize) -> Option<u16> {
        if col >= self.resolution.cols as usize {
            return None;
        }
        self.pixels
            .get(row * self.resolution.cols as usize + col)
            .copied()
    }

    /// Mean of the pixels that carry a reading, in tenths of a degree.
    pub fn average(&self) -> Option<f64> {
        let readings: Vec<f64> = self
            .pixels
            .iter()
            .filter(|&&p| p != 0)
            .map(|&p| p as f64)
            .collect();
        if readings.is_empty() {
            None
        } else {
            Some(readings.iter().sum::<f64>() / readings.len() as f64)
        }
    }
}
