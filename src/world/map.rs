// Static collision map consumed by the simulation
// Map data itself lives outside the core; the simulation only asks "is this point blocked?"

use thiserror::Error;

/// Read-only collision query over a tile grid
pub trait CollisionMap: Send + Sync {
    fn width_tiles(&self) -> u32;
    fn height_tiles(&self) -> u32;
    /// Edge length of one tile in pixels
    fn tile_size(&self) -> u32;
    /// Whether the pixel coordinate lies on a blocked tile (outside the map counts as blocked)
    fn is_blocked(&self, x: f32, y: f32) -> bool;

    fn width_px(&self) -> f32 {
        (self.width_tiles() * self.tile_size()) as f32
    }

    fn height_px(&self) -> f32 {
        (self.height_tiles() * self.tile_size()) as f32
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MapError {
    #[error("map has no rows")]
    Empty,
    #[error("map row {row} has width {found}, expected {expected}")]
    RaggedRow { row: usize, expected: usize, found: usize },
    #[error("unknown tile '{tile}' at row {row}, column {column}")]
    UnknownTile { tile: char, row: usize, column: usize },
    #[error("tile size must be non-zero")]
    ZeroTileSize,
}

/// Grid of open/blocked tiles
#[derive(Debug, Clone)]
pub struct TileMap {
    width: u32,
    height: u32,
    tile_size: u32,
    blocked: Vec<bool>,
}

impl TileMap {
    /// Open arena surrounded by a one-tile wall
    pub fn bordered(width: u32, height: u32, tile_size: u32) -> Result<Self, MapError> {
        if tile_size == 0 {
            return Err(MapError::ZeroTileSize);
        }
        if width == 0 || height == 0 {
            return Err(MapError::Empty);
        }
        let blocked = (0..height)
            .flat_map(|row| {
                (0..width).map(move |col| {
                    row == 0 || col == 0 || row == height - 1 || col == width - 1
                })
            })
            .collect();
        Ok(Self {
            width,
            height,
            tile_size,
            blocked,
        })
    }

    /// Parse an ASCII map: `#` is blocked, `.` or space is open
    pub fn from_ascii(text: &str, tile_size: u32) -> Result<Self, MapError> {
        if tile_size == 0 {
            return Err(MapError::ZeroTileSize);
        }
        let rows: Vec<&str> = text
            .lines()
            .map(|line| line.trim_end())
            .filter(|line| !line.is_empty())
            .collect();
        let first = rows.first().ok_or(MapError::Empty)?;
        let width = first.chars().count();

        let mut blocked = Vec::with_capacity(width * rows.len());
        for (row, line) in rows.iter().enumerate() {
            let found = line.chars().count();
            if found != width {
                return Err(MapError::RaggedRow {
                    row,
                    expected: width,
                    found,
                });
            }
            for (column, tile) in line.chars().enumerate() {
                match tile {
                    '#' => blocked.push(true),
                    '.' | ' ' => blocked.push(false),
                    tile => return Err(MapError::UnknownTile { tile, row, column }),
                }
            }
        }

        Ok(Self {
            width: width as u32,
            height: rows.len() as u32,
            tile_size,
            blocked,
        })
    }

    fn tile_blocked(&self, col: u32, row: u32) -> bool {
        self.blocked[(row * self.width + col) as usize]
    }
}

impl CollisionMap for TileMap {
    fn width_tiles(&self) -> u32 {
        self.width
    }

    fn height_tiles(&self) -> u32 {
        self.height
    }

    fn tile_size(&self) -> u32 {
        self.tile_size
    }

    fn is_blocked(&self, x: f32, y: f32) -> bool {
        if !x.is_finite() || !y.is_finite() || x < 0.0 || y < 0.0 {
            return true;
        }
        let col = (x / self.tile_size as f32).floor() as u32;
        let row = (y / self.tile_size as f32).floor() as u32;
        if col >= self.width || row >= self.height {
            return true;
        }
        self.tile_blocked(col, row)
    }
}
