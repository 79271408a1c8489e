use serde::{Deserialize, Serialize};

/// A single board tile. Coordinates are redundant with the tile's position in
/// the grid vector but keep reveal records and snapshots self-describing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tile {
    pub x: u32,
    pub z: u32,
    pub is_mine: bool,
    pub is_revealed: bool,
    pub neighbor_mines: u8,
}

/// Coordinates of a mine, reported at game end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinePos {
    pub x: u32,
    pub z: u32,
}

/// A tile as delivered to clients. For the player audience `is_mine` and
/// `neighbor_mines` are omitted unless the tile is revealed; the spectator
/// god view carries them for every tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileSnapshot {
    pub x: u32,
    pub z: u32,
    pub is_revealed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_mine: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub neighbor_mines: Option<u8>,
}

/// Fixed N×N board held by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grid {
    size: usize,
    tiles: Vec<Tile>,
}

impl Grid {
    pub fn new(size: usize) -> Self {
        let mut tiles = Vec::with_capacity(size * size);
        for x in 0..size {
            for z in 0..size {
                tiles.push(Tile {
                    x: x as u32,
                    z: z as u32,
                    ..Tile::default()
                });
            }
        }
        Self { size, tiles }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn in_bounds(&self, x: i32, z: i32) -> bool {
        x >= 0 && z >= 0 && (x as usize) < self.size && (z as usize) < self.size
    }

    pub fn tile(&self, x: usize, z: usize) -> &Tile {
        &self.tiles[x * self.size + z]
    }

    pub fn tile_mut(&mut self, x: usize, z: usize) -> &mut Tile {
        &mut self.tiles[x * self.size + z]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tile> {
        self.tiles.iter()
    }

    /// The in-bounds 8-neighborhood of (x, z).
    pub fn neighbors(&self, x: usize, z: usize) -> impl Iterator<Item = (usize, usize)> + use<> {
        let size = self.size as i32;
        let (x, z) = (x as i32, z as i32);
        (-1..=1)
            .flat_map(move |dx| (-1..=1).map(move |dz| (x + dx, z + dz)))
            .filter(move |&(nx, nz)| {
                (nx, nz) != (x, z) && nx >= 0 && nz >= 0 && nx < size && nz < size
            })
            .map(|(nx, nz)| (nx as usize, nz as usize))
    }

    pub fn mines(&self) -> Vec<MinePos> {
        self.tiles
            .iter()
            .filter(|t| t.is_mine)
            .map(|t| MinePos { x: t.x, z: t.z })
            .collect()
    }

    pub fn revealed_count(&self) -> usize {
        self.tiles.iter().filter(|t| t.is_revealed).count()
    }
}
