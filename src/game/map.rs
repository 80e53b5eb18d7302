//! Static map geometry: walls, slice subdivision, spawn points, spatial index.

use std::collections::HashMap;

use crate::ws::protocol::{Material, Orientation, Vec2, WallSnapshot};

/// Play field dimensions in pixels.
pub const FIELD_WIDTH: f32 = 480.0;
pub const FIELD_HEIGHT: f32 = 270.0;

/// Tile size used by the spatial index and the vision grid.
pub const TILE_SIZE: f32 = 8.0;
pub const GRID_COLS: usize = (FIELD_WIDTH / TILE_SIZE) as usize; // 60
pub const GRID_ROWS: usize = (FIELD_HEIGHT / TILE_SIZE) as usize; // 34
pub const GRID_TILE_COUNT: usize = GRID_COLS * GRID_ROWS; // 2040

/// Each wall is subdivided into exactly this many independently
/// destructible slices along its long axis.
pub const SLICES_PER_WALL: usize = 5;

pub type WallId = u32;

/// Axis-aligned rectangle in game-space pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn left(&self) -> f32 {
        self.x
    }
    pub fn right(&self) -> f32 {
        self.x + self.width
    }
    pub fn top(&self) -> f32 {
        self.y
    }
    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.left() < other.right()
            && self.right() > other.left()
            && self.top() < other.bottom()
            && self.bottom() > other.top()
    }

    pub fn contains_point(&self, p: Vec2) -> bool {
        p.x >= self.left() && p.x <= self.right() && p.y >= self.top() && p.y <= self.bottom()
    }

    /// Nearest point on the circle with the given center/radius that still
    /// intersects this rect, used for distance-to-rect checks.
    pub fn distance_to_point(&self, p: Vec2) -> f32 {
        let cx = p.x.clamp(self.left(), self.right());
        let cy = p.y.clamp(self.top(), self.bottom());
        Vec2::new(p.x - cx, p.y - cy).length()
    }

    pub fn intersects_circle(&self, center: Vec2, radius: f32) -> bool {
        self.distance_to_point(center) <= radius
    }
}

/// A destructible wall, subdivided into `SLICES_PER_WALL` equal slices
/// along its long axis.
#[derive(Debug, Clone)]
pub struct Wall {
    pub id: WallId,
    pub rect: Rect,
    pub orientation: Orientation,
    pub material: Material,
    pub slice_health: [i32; SLICES_PER_WALL],
    pub max_slice_health: i32,
    /// Boundary walls exist only for physics containment and are never
    /// sent to clients.
    pub renderable: bool,
}

impl Wall {
    pub fn new(id: WallId, rect: Rect, material: Material, max_slice_health: i32) -> Self {
        let orientation = if rect.width >= rect.height {
            Orientation::Horizontal
        } else {
            Orientation::Vertical
        };
        Self {
            id,
            rect,
            orientation,
            material,
            slice_health: [max_slice_health; SLICES_PER_WALL],
            max_slice_health,
            renderable: true,
        }
    }

    /// Length of the wall's long axis.
    fn long_dim(&self) -> f32 {
        match self.orientation {
            Orientation::Horizontal => self.rect.width,
            Orientation::Vertical => self.rect.height,
        }
    }

    /// Width of a single slice along the long axis.
    pub fn slice_long_dim(&self) -> f32 {
        self.long_dim() / SLICES_PER_WALL as f32
    }

    /// Rectangle covered by the i-th slice, regardless of its health.
    pub fn slice_rect(&self, index: usize) -> Rect {
        let slice_len = self.slice_long_dim();
        match self.orientation {
            Orientation::Horizontal => Rect::new(
                self.rect.x + slice_len * index as f32,
                self.rect.y,
                slice_len,
                self.rect.height,
            ),
            Orientation::Vertical => Rect::new(
                self.rect.x,
                self.rect.y + slice_len * index as f32,
                self.rect.width,
                slice_len,
            ),
        }
    }

    pub fn destruction_mask(&self) -> [bool; SLICES_PER_WALL] {
        let mut mask = [false; SLICES_PER_WALL];
        for i in 0..SLICES_PER_WALL {
            mask[i] = self.slice_health[i] <= 0;
        }
        mask
    }

    pub fn is_slice_intact(&self, index: usize) -> bool {
        self.slice_health[index] > 0
    }

    /// Rectangles of every intact slice — the collision/occlusion surface.
    pub fn intact_slice_rects(&self) -> impl Iterator<Item = Rect> + '_ {
        (0..SLICES_PER_WALL)
            .filter(move |&i| self.is_slice_intact(i))
            .map(move |i| self.slice_rect(i))
    }

    /// Index of the slice containing a local point within this wall's
    /// bounding rectangle.
    pub fn slice_at(&self, point: Vec2) -> usize {
        let slice_len = self.slice_long_dim();
        let offset = match self.orientation {
            Orientation::Horizontal => point.x - self.rect.x,
            Orientation::Vertical => point.y - self.rect.y,
        };
        ((offset / slice_len).floor() as isize)
            .clamp(0, SLICES_PER_WALL as isize - 1) as usize
    }

    pub fn to_snapshot(&self) -> WallSnapshot {
        WallSnapshot {
            id: self.id,
            x: self.rect.x,
            y: self.rect.y,
            width: self.rect.width,
            height: self.rect.height,
            orientation: self.orientation,
            material: self.material,
            slice_health: self.slice_health,
            max_slice_health: self.max_slice_health,
            destruction_mask: self.destruction_mask(),
        }
    }
}

fn tile_index(col: usize, row: usize) -> usize {
    row * GRID_COLS + col
}

fn tile_coords_for_point(p: Vec2) -> (isize, isize) {
    (
        (p.x / TILE_SIZE).floor() as isize,
        (p.y / TILE_SIZE).floor() as isize,
    )
}

/// Static map: walls, spawn points, and a read-only 8x8 tile spatial
/// index mapping a tile to the ids of walls overlapping it.
pub struct MapModel {
    pub walls: Vec<Wall>,
    pub red_spawns: Vec<Vec2>,
    pub blue_spawns: Vec<Vec2>,
    /// tile index -> wall ids whose bounding rect overlaps that tile
    spatial_index: HashMap<usize, Vec<WallId>>,
    next_wall_id: WallId,
}

/// Input description of a wall before slice-health assignment, as read
/// from a map file. Pre-zeroed slices model partial walls shorter than
/// five full tiles (spec.md §3).
pub struct WallSpec {
    pub rect: Rect,
    pub material: Material,
    pub max_slice_health: i32,
    pub pre_destroyed_slices: Vec<usize>,
}

impl MapModel {
    /// Build a map from wall specs and spawn points, computing slice
    /// geometry and the spatial index once.
    pub fn load(
        wall_specs: Vec<WallSpec>,
        red_spawns: Vec<Vec2>,
        blue_spawns: Vec<Vec2>,
    ) -> Result<Self, MapLoadError> {
        if red_spawns.is_empty() || blue_spawns.is_empty() {
            return Err(MapLoadError::MissingSpawnPoints);
        }

        let mut walls = Vec::with_capacity(wall_specs.len() + 4);
        let mut next_wall_id: WallId = 0;

        for spec in wall_specs {
            if spec.rect.width <= 0.0 || spec.rect.height <= 0.0 {
                return Err(MapLoadError::InvalidWallGeometry);
            }
            let mut wall = Wall::new(next_wall_id, spec.rect, spec.material, spec.max_slice_health);
            for idx in spec.pre_destroyed_slices {
                if idx < SLICES_PER_WALL {
                    wall.slice_health[idx] = 0;
                }
            }
            walls.push(wall);
            next_wall_id += 1;
        }

        // Boundary walls: thin invisible rectangles just outside the field,
        // used only for physics containment.
        const BOUNDARY_THICKNESS: f32 = 16.0;
        let boundary_specs = [
            Rect::new(
                -BOUNDARY_THICKNESS,
                -BOUNDARY_THICKNESS,
                FIELD_WIDTH + BOUNDARY_THICKNESS * 2.0,
                BOUNDARY_THICKNESS,
            ),
            Rect::new(-BOUNDARY_THICKNESS, FIELD_HEIGHT, FIELD_WIDTH + BOUNDARY_THICKNESS * 2.0, BOUNDARY_THICKNESS),
            Rect::new(-BOUNDARY_THICKNESS, 0.0, BOUNDARY_THICKNESS, FIELD_HEIGHT),
            Rect::new(FIELD_WIDTH, 0.0, BOUNDARY_THICKNESS, FIELD_HEIGHT),
        ];
        for rect in boundary_specs {
            let mut wall = Wall::new(next_wall_id, rect, Material::Concrete, i32::MAX / 2);
            wall.renderable = false;
            walls.push(wall);
            next_wall_id += 1;
        }

        let mut map = Self {
            walls,
            red_spawns,
            blue_spawns,
            spatial_index: HashMap::new(),
            next_wall_id,
        };
        map.rebuild_spatial_index();
        Ok(map)
    }

    fn rebuild_spatial_index(&mut self) {
        self.spatial_index.clear();
        for wall in &self.walls {
            let (min_col, min_row) = tile_coords_for_point(Vec2::new(wall.rect.left(), wall.rect.top()));
            let (max_col, max_row) = tile_coords_for_point(Vec2::new(
                wall.rect.right() - 0.001,
                wall.rect.bottom() - 0.001,
            ));
            for row in min_row.max(0)..=max_row.max(0) {
                for col in min_col.max(0)..=max_col.max(0) {
                    if col < 0 || row < 0 || col as usize >= GRID_COLS || row as usize >= GRID_ROWS {
                        continue;
                    }
                    let key = tile_index(col as usize, row as usize);
                    self.spatial_index.entry(key).or_default().push(wall.id);
                }
            }
        }
    }

    pub fn wall(&self, id: WallId) -> Option<&Wall> {
        self.walls.iter().find(|w| w.id == id)
    }

    pub fn wall_mut(&mut self, id: WallId) -> Option<&mut Wall> {
        self.walls.iter_mut().find(|w| w.id == id)
    }

    /// Wall ids whose spatial-index cells overlap the given rectangle.
    pub fn walls_near_rect(&self, rect: &Rect) -> Vec<WallId> {
        let (min_col, min_row) = tile_coords_for_point(Vec2::new(rect.left(), rect.top()));
        let (max_col, max_row) = tile_coords_for_point(Vec2::new(rect.right() - 0.001, rect.bottom() - 0.001));
        let mut ids = Vec::new();
        for row in min_row.max(0)..=max_row.max(0) {
            for col in min_col.max(0)..=max_col.max(0) {
                if col < 0 || row < 0 || col as usize >= GRID_COLS || row as usize >= GRID_ROWS {
                    continue;
                }
                if let Some(wall_ids) = self.spatial_index.get(&tile_index(col as usize, row as usize)) {
                    for &id in wall_ids {
                        if !ids.contains(&id) {
                            ids.push(id);
                        }
                    }
                }
            }
        }
        ids
    }

    /// Wall ids in the tile containing `point`, expanded by `radius_tiles`
    /// in every direction — used by vision to enumerate nearby corners.
    pub fn walls_near_point(&self, point: Vec2, radius_px: f32) -> Vec<WallId> {
        let rect = Rect::new(point.x - radius_px, point.y - radius_px, radius_px * 2.0, radius_px * 2.0);
        self.walls_near_rect(&rect)
    }

    pub fn renderable_walls(&self) -> impl Iterator<Item = &Wall> {
        self.walls.iter().filter(|w| w.renderable)
    }

    pub fn allocate_wall_id(&mut self) -> WallId {
        let id = self.next_wall_id;
        self.next_wall_id += 1;
        id
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MapLoadError {
    #[error("map has no spawn points for one or both teams")]
    MissingSpawnPoints,
    #[error("wall geometry must have positive width and height")]
    InvalidWallGeometry,
}

/// A minimal built-in map used when no external map file is supplied.
/// Mirrors the shape of a small arena: a handful of interior walls of
/// each material plus symmetric team spawns.
pub fn default_map() -> MapModel {
    let wall_specs = vec![
        WallSpec {
            rect: Rect::new(150.0, 40.0, 180.0, 16.0),
            material: Material::Concrete,
            max_slice_health: 120,
            pre_destroyed_slices: vec![],
        },
        WallSpec {
            rect: Rect::new(150.0, 214.0, 180.0, 16.0),
            material: Material::Concrete,
            max_slice_health: 120,
            pre_destroyed_slices: vec![],
        },
        WallSpec {
            rect: Rect::new(100.0, 80.0, 16.0, 110.0),
            material: Material::Wood,
            max_slice_health: 60,
            pre_destroyed_slices: vec![],
        },
        WallSpec {
            rect: Rect::new(364.0, 80.0, 16.0, 110.0),
            material: Material::Wood,
            max_slice_health: 60,
            pre_destroyed_slices: vec![],
        },
        WallSpec {
            rect: Rect::new(220.0, 110.0, 40.0, 50.0),
            material: Material::Glass,
            max_slice_health: 30,
            pre_destroyed_slices: vec![],
        },
        WallSpec {
            rect: Rect::new(40.0, 120.0, 60.0, 16.0),
            material: Material::Metal,
            max_slice_health: 200,
            pre_destroyed_slices: vec![4],
        },
    ];

    let red_spawns = vec![
        Vec2::new(50.0, 135.0),
        Vec2::new(40.0, 100.0),
        Vec2::new(40.0, 170.0),
        Vec2::new(30.0, 135.0),
    ];
    let blue_spawns = vec![
        Vec2::new(430.0, 135.0),
        Vec2::new(440.0, 100.0),
        Vec2::new(440.0, 170.0),
        Vec2::new(450.0, 135.0),
    ];

    MapModel::load(wall_specs, red_spawns, blue_spawns).expect("built-in map is valid")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_geometry_is_uniform_along_long_axis() {
        let wall = Wall::new(0, Rect::new(0.0, 0.0, 100.0, 10.0), Material::Concrete, 100);
        assert_eq!(wall.slice_long_dim(), 20.0);
        for i in 0..SLICES_PER_WALL {
            let rect = wall.slice_rect(i);
            assert_eq!(rect.width, 20.0);
            assert_eq!(rect.height, 10.0);
        }
    }

    #[test]
    fn destruction_mask_matches_slice_health() {
        let mut wall = Wall::new(0, Rect::new(0.0, 0.0, 100.0, 10.0), Material::Concrete, 100);
        wall.slice_health[2] = 0;
        wall.slice_health[4] = -5;
        let mask = wall.destruction_mask();
        assert_eq!(mask, [false, false, true, false, true]);
    }

    #[test]
    fn slice_at_clamps_within_bounds() {
        let wall = Wall::new(0, Rect::new(0.0, 0.0, 100.0, 10.0), Material::Concrete, 100);
        assert_eq!(wall.slice_at(Vec2::new(-50.0, 5.0)), 0);
        assert_eq!(wall.slice_at(Vec2::new(1000.0, 5.0)), SLICES_PER_WALL - 1);
        assert_eq!(wall.slice_at(Vec2::new(45.0, 5.0)), 2);
    }

    #[test]
    fn boundary_walls_are_not_renderable() {
        let map = default_map();
        let boundary_count = map.walls.iter().filter(|w| !w.renderable).count();
        assert_eq!(boundary_count, 4);
        assert!(map.renderable_walls().count() < map.walls.len());
    }

    #[test]
    fn aabb_union_excludes_destroyed_slices() {
        let mut wall = Wall::new(0, Rect::new(0.0, 0.0, 100.0, 10.0), Material::Concrete, 100);
        wall.slice_health[0] = 0;
        let rects: Vec<Rect> = wall.intact_slice_rects().collect();
        assert_eq!(rects.len(), 4);
        assert!(rects.iter().all(|r| r.left() >= 20.0));
    }

    #[test]
    fn map_load_rejects_missing_spawns() {
        let err = MapModel::load(vec![], vec![], vec![Vec2::ZERO]).unwrap_err();
        assert!(matches!(err, MapLoadError::MissingSpawnPoints));
    }
}
