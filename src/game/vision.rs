//! VisionEngine: per-player tile-grid field of view, slice-aware ray
//! casting through destructible walls, and smoke occlusion.
//!
//! No direct teacher precedent — built in the teacher's "stateless
//! system struct with pure functions over borrowed state" idiom
//! (mirrors `PhysicsSystem`/`CombatSystem`).

use crate::game::map::{MapModel, Rect, GRID_COLS, GRID_ROWS, GRID_TILE_COUNT, TILE_SIZE};
use crate::game::physics::segment_vs_rect;
use crate::ws::protocol::Vec2;

/// Packed tile-visibility bitmap: one bit per tile, `GRID_TILE_COUNT`
/// bits exactly fill this many bytes (2040 / 8 = 255).
pub const TILE_BITMAP_BYTES: usize = GRID_TILE_COUNT.div_ceil(8);

const FORWARD_CONE_HALF_ANGLE_RADIANS: f32 = std::f32::consts::FRAC_PI_3; // 60 deg half-angle
const FORWARD_CONE_RADIUS: f32 = 100.0;
const PERIPHERAL_RADIUS: f32 = 30.0;
const REAR_EXCLUSION_HALF_ANGLE_RADIANS: f32 = std::f32::consts::FRAC_PI_4; // 90 deg rear arc, centered behind
const FORWARD_EXTENSION_RADIUS: f32 = 130.0;
const FORWARD_EXTENSION_HALF_ANGLE_RADIANS: f32 = 0.26; // narrow sector along aim direction

const SMOKE_SAMPLE_STEP: f32 = 5.0;
const SMOKE_OPACITY_PER_SAMPLE: f32 = 0.3;
const SMOKE_OCCLUSION_THRESHOLD: f32 = 0.5;

pub const CACHE_MAX_AGE_MS: u64 = 100;
const CACHE_MOVE_THRESHOLD_PX: f32 = 2.0;
const CACHE_ROTATE_THRESHOLD_RADIANS: f32 = 5.0 * std::f32::consts::PI / 180.0;

fn normalize_angle(angle: f32) -> f32 {
    let tau = std::f32::consts::TAU;
    ((angle % tau) + tau) % tau
}

fn angle_diff(a: f32, b: f32) -> f32 {
    let diff = normalize_angle(a - b);
    if diff > std::f32::consts::PI {
        std::f32::consts::TAU - diff
    } else {
        diff
    }
}

fn tile_center(col: usize, row: usize) -> Vec2 {
    Vec2::new(
        col as f32 * TILE_SIZE + TILE_SIZE / 2.0,
        row as f32 * TILE_SIZE + TILE_SIZE / 2.0,
    )
}

fn set_bit(bitmap: &mut [u8; TILE_BITMAP_BYTES], tile_index: usize) {
    bitmap[tile_index / 8] |= 1 << (tile_index % 8);
}

pub fn is_tile_visible(bitmap: &[u8; TILE_BITMAP_BYTES], tile_index: usize) -> bool {
    (bitmap[tile_index / 8] >> (tile_index % 8)) & 1 == 1
}

/// A transient smoke volume obstructing vision.
pub struct SmokeZone {
    pub center: Vec2,
    pub radius: f32,
    pub density: f32,
}

/// Whether `point` lies within the player's FOV shape: a forward cone,
/// a peripheral disc excluding the rear arc, or a narrow forward
/// extension sector — per spec.md §4.4.
pub fn in_fov_shape(player_pos: Vec2, aim_direction: Vec2, point: Vec2) -> bool {
    let to_point = point - player_pos;
    let dist = to_point.length();
    if dist < 1e-4 {
        return true;
    }
    let aim_angle = aim_direction.angle();
    let point_angle = to_point.angle();
    let delta = angle_diff(point_angle, aim_angle);

    if dist <= FORWARD_CONE_RADIUS && delta <= FORWARD_CONE_HALF_ANGLE_RADIANS {
        return true;
    }
    if dist <= FORWARD_EXTENSION_RADIUS && delta <= FORWARD_EXTENSION_HALF_ANGLE_RADIANS {
        return true;
    }
    if dist <= PERIPHERAL_RADIUS {
        // Excludes the rear arc: the 90-degree wedge directly behind the
        // player (centered on aim_angle + PI).
        let rear_delta = angle_diff(point_angle, aim_angle + std::f32::consts::PI);
        if rear_delta > REAR_EXCLUSION_HALF_ANGLE_RADIANS {
            return true;
        }
    }
    false
}

/// Accumulated smoke opacity along the segment from `from` to `to`,
/// sampled every `SMOKE_SAMPLE_STEP` pixels.
fn smoke_opacity_along(from: Vec2, to: Vec2, smoke_zones: &[SmokeZone]) -> f32 {
    if smoke_zones.is_empty() {
        return 0.0;
    }
    let seg = to - from;
    let len = seg.length();
    if len < 1e-4 {
        return 0.0;
    }
    let steps = (len / SMOKE_SAMPLE_STEP).ceil().max(1.0) as usize;
    let mut opacity = 0.0f32;
    for i in 0..=steps {
        let t = i as f32 / steps as f32;
        let sample = from + seg * t;
        for zone in smoke_zones {
            if sample.distance(zone.center) <= zone.radius {
                opacity += SMOKE_OPACITY_PER_SAMPLE * zone.density;
            }
        }
        if opacity >= SMOKE_OCCLUSION_THRESHOLD {
            break;
        }
    }
    opacity
}

/// Parametric-segment ray test from `from` to `to` against every intact
/// wall slice near the path; returns the nearest intersection `t`
/// (0..1) if the ray is blocked before reaching `to`.
fn nearest_wall_block(map: &MapModel, from: Vec2, to: Vec2) -> Option<f32> {
    let path_rect = Rect::new(
        from.x.min(to.x) - 1.0,
        from.y.min(to.y) - 1.0,
        (from.x - to.x).abs() + 2.0,
        (from.y - to.y).abs() + 2.0,
    );
    let mut best: Option<f32> = None;
    for id in map.walls_near_rect(&path_rect) {
        let Some(wall) = map.wall(id) else { continue };
        for slice_index in 0..crate::game::map::SLICES_PER_WALL {
            if !wall.is_slice_intact(slice_index) {
                continue;
            }
            let slice_rect = wall.slice_rect(slice_index);
            if let Some((t, _)) = segment_vs_rect(from, to, &slice_rect) {
                if best.map_or(true, |bt| t < bt) {
                    best = Some(t);
                }
            }
        }
    }
    best
}

/// Whether `point` is visible from `origin`: unobstructed by any intact
/// wall slice (slice-aware — a destroyed slice is free passage) and
/// not occluded by accumulated smoke density past the threshold.
pub fn has_line_of_sight(map: &MapModel, origin: Vec2, point: Vec2, smoke_zones: &[SmokeZone]) -> bool {
    if nearest_wall_block(map, origin, point).is_some() {
        return false;
    }
    smoke_opacity_along(origin, point, smoke_zones) < SMOKE_OCCLUSION_THRESHOLD
}

/// Computes the packed tile-visibility bitmap for a single player.
/// Each tile is visible if its center lies within the player's FOV
/// shape and has unobstructed, unsmoked line of sight from the
/// player's position.
pub fn compute_visible_tiles(
    map: &MapModel,
    player_pos: Vec2,
    aim_direction: Vec2,
    smoke_zones: &[SmokeZone],
) -> [u8; TILE_BITMAP_BYTES] {
    let mut bitmap = [0u8; TILE_BITMAP_BYTES];
    let max_radius = FORWARD_CONE_RADIUS.max(FORWARD_EXTENSION_RADIUS).max(PERIPHERAL_RADIUS);

    let min_col = ((player_pos.x - max_radius) / TILE_SIZE).floor().max(0.0) as usize;
    let max_col = (((player_pos.x + max_radius) / TILE_SIZE).ceil() as usize).min(GRID_COLS - 1);
    let min_row = ((player_pos.y - max_radius) / TILE_SIZE).floor().max(0.0) as usize;
    let max_row = (((player_pos.y + max_radius) / TILE_SIZE).ceil() as usize).min(GRID_ROWS - 1);

    for row in min_row..=max_row {
        for col in min_col..=max_col {
            let center = tile_center(col, row);
            if !in_fov_shape(player_pos, aim_direction, center) {
                continue;
            }
            if !has_line_of_sight(map, player_pos, center, smoke_zones) {
                continue;
            }
            let tile_index = row * GRID_COLS + col;
            set_bit(&mut bitmap, tile_index);
        }
    }

    bitmap
}

/// Whether a world point's tile is marked visible in a packed bitmap.
pub fn point_tile_visible(bitmap: &[u8; TILE_BITMAP_BYTES], point: Vec2) -> bool {
    if point.x < 0.0 || point.y < 0.0 {
        return false;
    }
    let col = (point.x / TILE_SIZE) as usize;
    let row = (point.y / TILE_SIZE) as usize;
    if col >= GRID_COLS || row >= GRID_ROWS {
        return false;
    }
    is_tile_visible(bitmap, row * GRID_COLS + col)
}

/// Per-player cached FOV result, invalidated by movement, rotation, or
/// wall damage (spec.md §9's explicit dirty-bit guidance).
pub struct VisionCache {
    pub bitmap: [u8; TILE_BITMAP_BYTES],
    last_position: Vec2,
    last_aim_angle: f32,
    computed_at_ms: u64,
    dirty: bool,
}

impl VisionCache {
    pub fn new() -> Self {
        Self {
            bitmap: [0u8; TILE_BITMAP_BYTES],
            last_position: Vec2::ZERO,
            last_aim_angle: 0.0,
            computed_at_ms: 0,
            dirty: true,
        }
    }

    /// Marks this cache stale. Called on any wall-damage event for
    /// every player in the lobby, not just the one causing the damage.
    pub fn invalidate(&mut self) {
        self.dirty = true;
    }

    fn needs_recompute(&self, position: Vec2, aim_angle: f32, now_ms: u64) -> bool {
        if self.dirty {
            return true;
        }
        if now_ms.saturating_sub(self.computed_at_ms) >= CACHE_MAX_AGE_MS {
            return true;
        }
        if position.distance(self.last_position) >= CACHE_MOVE_THRESHOLD_PX {
            return true;
        }
        angle_diff(aim_angle, self.last_aim_angle) >= CACHE_ROTATE_THRESHOLD_RADIANS
    }

    /// Returns the current bitmap, recomputing only if the cache is
    /// dirty, stale, or the player has moved/rotated past threshold.
    pub fn get_or_recompute(
        &mut self,
        map: &MapModel,
        player_pos: Vec2,
        aim_direction: Vec2,
        smoke_zones: &[SmokeZone],
        now_ms: u64,
    ) -> &[u8; TILE_BITMAP_BYTES] {
        let aim_angle = aim_direction.angle();
        if self.needs_recompute(player_pos, aim_angle, now_ms) {
            self.bitmap = compute_visible_tiles(map, player_pos, aim_direction, smoke_zones);
            self.last_position = player_pos;
            self.last_aim_angle = aim_angle;
            self.computed_at_ms = now_ms;
            self.dirty = false;
        }
        &self.bitmap
    }
}

impl Default for VisionCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::map::{MapModel, Rect as MapRect, WallSpec};
    use crate::ws::protocol::Material;

    fn open_map() -> MapModel {
        MapModel::load(
            vec![],
            vec![Vec2::new(50.0, 135.0)],
            vec![Vec2::new(430.0, 135.0)],
        )
        .unwrap()
    }

    #[test]
    fn point_directly_ahead_within_cone_is_visible() {
        let map = open_map();
        let bitmap = compute_visible_tiles(&map, Vec2::new(100.0, 135.0), Vec2::new(1.0, 0.0), &[]);
        assert!(point_tile_visible(&bitmap, Vec2::new(150.0, 135.0)));
    }

    #[test]
    fn point_far_behind_outside_peripheral_is_not_visible() {
        let map = open_map();
        let bitmap = compute_visible_tiles(&map, Vec2::new(240.0, 135.0), Vec2::new(1.0, 0.0), &[]);
        assert!(!point_tile_visible(&bitmap, Vec2::new(100.0, 135.0)));
    }

    #[test]
    fn wall_blocks_line_of_sight_behind_it() {
        let map = MapModel::load(
            vec![WallSpec {
                rect: MapRect::new(150.0, 100.0, 16.0, 100.0),
                material: Material::Concrete,
                max_slice_health: 100,
                pre_destroyed_slices: vec![],
            }],
            vec![Vec2::new(50.0, 135.0)],
            vec![Vec2::new(430.0, 135.0)],
        )
        .unwrap();
        assert!(!has_line_of_sight(&map, Vec2::new(100.0, 135.0), Vec2::new(200.0, 135.0), &[]));
    }

    #[test]
    fn destroyed_slice_restores_partial_visibility_only_through_that_slice() {
        let mut map = MapModel::load(
            vec![WallSpec {
                rect: MapRect::new(150.0, 100.0, 100.0, 10.0),
                material: Material::Concrete,
                max_slice_health: 100,
                pre_destroyed_slices: vec![2],
            }],
            vec![Vec2::new(50.0, 135.0)],
            vec![Vec2::new(430.0, 135.0)],
        )
        .unwrap();
        let wall = map.wall_mut(0).unwrap();
        let gap_rect = wall.slice_rect(2);
        let gap_center = Vec2::new(gap_rect.x + gap_rect.width / 2.0, gap_rect.y + gap_rect.height / 2.0);
        assert!(has_line_of_sight(&map, Vec2::new(gap_center.x, 135.0), gap_center, &[]));
    }

    #[test]
    fn dense_smoke_occludes_line_of_sight() {
        let map = open_map();
        let smoke = vec![SmokeZone {
            center: Vec2::new(150.0, 135.0),
            radius: 60.0,
            density: 1.0,
        }];
        assert!(!has_line_of_sight(&map, Vec2::new(80.0, 135.0), Vec2::new(220.0, 135.0), &smoke));
    }

    #[test]
    fn cache_recomputes_after_move_past_threshold() {
        let map = open_map();
        let mut cache = VisionCache::new();
        cache.get_or_recompute(&map, Vec2::new(100.0, 135.0), Vec2::new(1.0, 0.0), &[], 0);
        assert!(!cache.dirty);
        let moved = cache.needs_recompute(Vec2::new(103.0, 135.0), 0.0, 0);
        assert!(moved);
    }

    #[test]
    fn wall_damage_invalidates_cache() {
        let mut cache = VisionCache::new();
        cache.dirty = false;
        cache.invalidate();
        assert!(cache.dirty);
    }

    #[test]
    fn bitmap_byte_size_exactly_fits_tile_grid() {
        assert_eq!(TILE_BITMAP_BYTES * 8, GRID_TILE_COUNT);
    }
}
