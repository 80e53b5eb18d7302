//! DestructionEngine: per-slice wall health bookkeeping and explosion
//! falloff damage.

use crate::game::map::{MapModel, Rect, Wall, WallId, SLICES_PER_WALL};
use crate::ws::protocol::Vec2;

/// Outcome of applying damage to a single slice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SliceDamageResult {
    pub wall_id: WallId,
    pub slice_index: usize,
    pub new_health: i32,
    pub destroyed: bool,
}

/// Applies direct damage to a single wall slice, clamping at zero.
/// Zero damage and damage to an already-destroyed slice are both no-ops
/// that still report the current (unchanged) health.
pub fn apply_damage(wall: &mut Wall, slice_index: usize, amount: i32) -> SliceDamageResult {
    debug_assert!(slice_index < SLICES_PER_WALL);
    let was_destroyed = wall.slice_health[slice_index] <= 0;
    if amount <= 0 || was_destroyed {
        return SliceDamageResult {
            wall_id: wall.id,
            slice_index,
            new_health: wall.slice_health[slice_index].max(0),
            destroyed: was_destroyed,
        };
    }
    let new_health = (wall.slice_health[slice_index] - amount).max(0);
    wall.slice_health[slice_index] = new_health;
    SliceDamageResult {
        wall_id: wall.id,
        slice_index,
        new_health,
        destroyed: new_health <= 0,
    }
}

/// Slice index within `wall` that contains the given point, clamped to
/// the wall's bounding rectangle.
pub fn slice_at(wall: &Wall, point: Vec2) -> usize {
    wall.slice_at(point)
}

/// Applies a radial explosion centered at `center` with linear falloff
/// from `max_damage` at the center to 0 at `radius`, against every slice
/// of every wall whose rect intersects the blast circle.
///
/// Only slices actually within the circle take damage; a wall whose
/// bounding rect intersects the circle but whose specific slice rect
/// does not is skipped.
pub fn apply_explosion_at(
    map: &mut MapModel,
    center: Vec2,
    radius: f32,
    max_damage: f32,
) -> Vec<SliceDamageResult> {
    if radius <= 0.0 || max_damage <= 0.0 {
        return Vec::new();
    }
    let blast_rect = Rect::new(center.x - radius, center.y - radius, radius * 2.0, radius * 2.0);
    let candidate_ids = map.walls_near_rect(&blast_rect);
    let mut results = Vec::new();

    for id in candidate_ids {
        let Some(wall) = map.wall_mut(id) else {
            continue;
        };
        for slice_index in 0..SLICES_PER_WALL {
            let slice_rect = wall.slice_rect(slice_index);
            let dist = slice_rect.distance_to_point(center);
            if dist >= radius {
                continue;
            }
            let falloff = 1.0 - (dist / radius);
            let damage = (max_damage * falloff).round() as i32;
            if damage <= 0 || wall.slice_health[slice_index] <= 0 {
                continue;
            }
            let before = wall.slice_health[slice_index];
            let result = apply_damage(wall, slice_index, damage);
            if result.new_health != before {
                results.push(result);
            }
        }
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::map::{MapLoadError, MapModel, WallSpec};
    use crate::ws::protocol::Material;

    fn one_wall_map() -> MapModel {
        MapModel::load(
            vec![WallSpec {
                rect: Rect::new(0.0, 0.0, 100.0, 10.0),
                material: Material::Wood,
                max_slice_health: 60,
                pre_destroyed_slices: vec![],
            }],
            vec![Vec2::new(10.0, 5.0)],
            vec![Vec2::new(90.0, 5.0)],
        )
        .unwrap()
    }

    #[test]
    fn zero_damage_is_a_no_op() {
        let mut wall = Wall::new(0, Rect::new(0.0, 0.0, 100.0, 10.0), Material::Concrete, 100);
        let result = apply_damage(&mut wall, 0, 0);
        assert_eq!(result.new_health, 100);
        assert!(!result.destroyed);
    }

    #[test]
    fn damage_clamps_at_zero_and_marks_destroyed() {
        let mut wall = Wall::new(0, Rect::new(0.0, 0.0, 100.0, 10.0), Material::Concrete, 20);
        let result = apply_damage(&mut wall, 1, 35);
        assert_eq!(result.new_health, 0);
        assert!(result.destroyed);
    }

    #[test]
    fn already_destroyed_slice_is_a_no_op() {
        let mut wall = Wall::new(0, Rect::new(0.0, 0.0, 100.0, 10.0), Material::Concrete, 20);
        wall.slice_health[2] = 0;
        let result = apply_damage(&mut wall, 2, 50);
        assert_eq!(result.new_health, 0);
        assert!(result.destroyed);
        assert_eq!(wall.slice_health[2], 0);
    }

    #[test]
    fn slice_health_never_increases() {
        let mut wall = Wall::new(0, Rect::new(0.0, 0.0, 100.0, 10.0), Material::Concrete, 50);
        apply_damage(&mut wall, 0, 10);
        let before = wall.slice_health[0];
        apply_damage(&mut wall, 0, 0);
        assert!(wall.slice_health[0] <= before);
    }

    #[test]
    fn explosion_falloff_damages_closest_slice_most() {
        let mut map = one_wall_map();
        let results = apply_explosion_at(&mut map, Vec2::new(10.0, 5.0), 40.0, 100.0);
        let slice0 = results.iter().find(|r| r.slice_index == 0).unwrap();
        let slice4 = results.iter().find(|r| r.slice_index == 4);
        assert!(slice0.new_health < 60);
        if let Some(slice4) = slice4 {
            assert!(slice4.new_health >= slice0.new_health);
        }
    }

    #[test]
    fn explosion_outside_radius_does_nothing() {
        let mut map = one_wall_map();
        let results = apply_explosion_at(&mut map, Vec2::new(-1000.0, -1000.0), 5.0, 100.0);
        assert!(results.is_empty());
    }

    #[allow(dead_code)]
    fn _ensure_maploaderror_used(_e: MapLoadError) {}
}
