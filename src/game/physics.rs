//! PhysicsEngine: player movement against destructible wall slices, and
//! projectile kinematics (grenade bounce, rocket raycast, lobbed arcs).

use crate::game::map::{MapModel, Rect, FIELD_HEIGHT, FIELD_WIDTH};
use crate::util::time::tick_delta;
use crate::ws::protocol::{MovementMode, ProjectileKind, Team, Vec2};

/// Player hitbox is a fixed 10x10 axis-aligned box centered on position.
pub const PLAYER_HALF_EXTENT: f32 = 5.0;

/// Movement speed in px/s per movement mode.
pub fn move_speed(mode: MovementMode) -> f32 {
    match mode {
        MovementMode::Sneak => 40.0,
        MovementMode::Walk => 90.0,
        MovementMode::Run => 150.0,
    }
}

/// Fallback spawn points used when the map's own spawn list is somehow
/// empty or a candidate point resolves to the forbidden origin.
pub fn fallback_spawn(team: Team) -> Vec2 {
    match team {
        Team::Red => Vec2::new(50.0, 135.0),
        Team::Blue => Vec2::new(430.0, 135.0),
    }
}

/// Out-of-bounds projectile cleanup region: anything outside this rect
/// is removed at the start of the next physics tick.
pub const PROJECTILE_BOUNDS: Rect = Rect {
    x: -50.0,
    y: -50.0,
    width: 580.0,
    height: 370.0,
};

fn player_rect(position: Vec2) -> Rect {
    Rect::new(
        position.x - PLAYER_HALF_EXTENT,
        position.y - PLAYER_HALF_EXTENT,
        PLAYER_HALF_EXTENT * 2.0,
        PLAYER_HALF_EXTENT * 2.0,
    )
}

/// Picks a spawn point for `team`, falling back to the team's canonical
/// spawn if the map has no candidates or the only candidate is the
/// forbidden origin (0,0).
pub fn spawn_position(map: &MapModel, team: Team, index: usize) -> Vec2 {
    let candidates = match team {
        Team::Red => &map.red_spawns,
        Team::Blue => &map.blue_spawns,
    };
    if candidates.is_empty() {
        return fallback_spawn(team);
    }
    let candidate = candidates[index % candidates.len()];
    if candidate.x == 0.0 && candidate.y == 0.0 {
        fallback_spawn(team)
    } else {
        candidate
    }
}

/// Moves a player's 10x10 AABB by `desired_delta`, resolving collision
/// against intact wall slices independently on each axis so that
/// sliding along a wall face works without it, and returns the
/// resulting position.
pub fn move_player(map: &MapModel, position: Vec2, desired_delta: Vec2) -> Vec2 {
    let mut pos = position;

    // X axis first.
    let candidate_x = Vec2::new(pos.x + desired_delta.x, pos.y);
    if !collides_with_any_wall(map, candidate_x) {
        pos.x = candidate_x.x;
    }

    // Y axis independently, from the (possibly already adjusted) x.
    let candidate_y = Vec2::new(pos.x, pos.y + desired_delta.y);
    if !collides_with_any_wall(map, candidate_y) {
        pos.y = candidate_y.y;
    }

    pos.x = pos.x.clamp(0.0, FIELD_WIDTH);
    pos.y = pos.y.clamp(0.0, FIELD_HEIGHT);
    pos
}

fn collides_with_any_wall(map: &MapModel, position: Vec2) -> bool {
    let rect = player_rect(position);
    for id in map.walls_near_rect(&rect) {
        let Some(wall) = map.wall(id) else { continue };
        for slice_rect in wall.intact_slice_rects() {
            if rect.intersects(&slice_rect) {
                return true;
            }
        }
    }
    false
}

/// A physics-simulated thrown/fired projectile.
#[derive(Debug, Clone)]
pub struct ProjectileBody {
    pub kind: ProjectileKind,
    pub position: Vec2,
    pub velocity: Vec2,
    pub radius: f32,
    /// Per-wall timestamp (ms) of the last bounce, to enforce the 100ms
    /// per-wall collision cooldown on bouncing projectiles.
    pub recent_wall_collisions: Vec<(u32, u64)>,
}

const BOUNCE_COLLISION_COOLDOWN_MS: u64 = 100;
const BOUNCE_RESTITUTION: f32 = 0.6;
const GRENADE_AIR_DRAG_PER_SEC: f32 = 0.3;

/// Result of advancing a projectile by one physics tick.
pub enum ProjectileStep {
    Moved,
    /// Rocket/grenade-launcher shell hit something and should detonate
    /// at `impact_point` before any out-of-bounds check runs.
    DetonateAt(Vec2),
    OutOfBounds,
}

/// Advances a bouncing (grenade-family) projectile: integrates
/// position, applies light air drag, and reflects velocity with
/// restitution off any intact wall slice it would otherwise tunnel
/// through, honoring a 100ms-per-wall bounce cooldown.
pub fn step_bouncing_projectile(map: &MapModel, body: &mut ProjectileBody, now_ms: u64) -> ProjectileStep {
    let dt = tick_delta();
    let drag = (1.0 - GRENADE_AIR_DRAG_PER_SEC * dt).max(0.0);

    let next_pos = body.position + body.velocity * dt;
    let blocking_wall = find_blocking_wall(map, body.position, next_pos, body.radius);

    if let Some(wall_id) = blocking_wall {
        let on_cooldown = body
            .recent_wall_collisions
            .iter()
            .any(|&(id, ts)| id == wall_id && now_ms.saturating_sub(ts) < BOUNCE_COLLISION_COOLDOWN_MS);

        if !on_cooldown {
            reflect_velocity(map, wall_id, body);
            body.recent_wall_collisions.retain(|&(_, ts)| now_ms.saturating_sub(ts) < BOUNCE_COLLISION_COOLDOWN_MS);
            body.recent_wall_collisions.push((wall_id, now_ms));
            body.velocity = body.velocity * drag;
            return ProjectileStep::Moved;
        }
    }

    body.position = next_pos;
    body.velocity = body.velocity * drag;

    if !PROJECTILE_BOUNDS.contains_point(body.position) {
        return ProjectileStep::OutOfBounds;
    }
    ProjectileStep::Moved
}

/// Advances a rocket: a straight raycast that detonates at the first
/// wall or bounds intersection, checked *before* the generic
/// out-of-bounds cleanup so a rocket fired at the boundary detonates
/// on impact rather than being silently despawned.
pub fn step_rocket(map: &MapModel, body: &mut ProjectileBody) -> ProjectileStep {
    let dt = tick_delta();
    let next_pos = body.position + body.velocity * dt;

    if let Some(hit_point) = raycast_wall_hit(map, body.position, next_pos) {
        return ProjectileStep::DetonateAt(hit_point);
    }

    body.position = next_pos;
    if !PROJECTILE_BOUNDS.contains_point(body.position) {
        return ProjectileStep::OutOfBounds;
    }
    ProjectileStep::Moved
}

/// Advances a lobbed grenade-launcher shell: a flat (no-gravity) arc
/// that explodes on first impact with any intact wall slice.
pub fn step_arc_shell(map: &MapModel, body: &mut ProjectileBody) -> ProjectileStep {
    step_rocket(map, body)
}

fn find_blocking_wall(map: &MapModel, from: Vec2, to: Vec2, radius: f32) -> Option<u32> {
    let path_rect = Rect::new(
        from.x.min(to.x) - radius,
        from.y.min(to.y) - radius,
        (from.x - to.x).abs() + radius * 2.0,
        (from.y - to.y).abs() + radius * 2.0,
    );
    for id in map.walls_near_rect(&path_rect) {
        let wall = map.wall(id)?;
        for slice_rect in wall.intact_slice_rects() {
            if slice_rect.intersects_circle(to, radius) {
                return Some(id);
            }
        }
    }
    None
}

fn raycast_wall_hit(map: &MapModel, from: Vec2, to: Vec2) -> Option<Vec2> {
    let path_rect = Rect::new(
        from.x.min(to.x),
        from.y.min(to.y),
        (from.x - to.x).abs().max(1.0),
        (from.y - to.y).abs().max(1.0),
    );
    let mut closest: Option<(f32, Vec2)> = None;
    for id in map.walls_near_rect(&path_rect) {
        let Some(wall) = map.wall(id) else { continue };
        for slice_rect in wall.intact_slice_rects() {
            if let Some((t, point)) = segment_vs_rect(from, to, &slice_rect) {
                if closest.map_or(true, |(best_t, _)| t < best_t) {
                    closest = Some((t, point));
                }
            }
        }
    }
    closest.map(|(_, point)| point)
}

/// Parametric segment-vs-AABB intersection (slab method). Returns the
/// smallest `t` in `[0,1]` at which the segment enters the rect, plus
/// the entry point.
pub fn segment_vs_rect(from: Vec2, to: Vec2, rect: &Rect) -> Option<(f32, Vec2)> {
    let dx = to.x - from.x;
    let dy = to.y - from.y;

    let (mut t_min, mut t_max) = (0.0f32, 1.0f32);

    for (origin, delta, lo, hi) in [
        (from.x, dx, rect.left(), rect.right()),
        (from.y, dy, rect.top(), rect.bottom()),
    ] {
        if delta.abs() < 1e-6 {
            if origin < lo || origin > hi {
                return None;
            }
            continue;
        }
        let inv = 1.0 / delta;
        let mut t1 = (lo - origin) * inv;
        let mut t2 = (hi - origin) * inv;
        if t1 > t2 {
            std::mem::swap(&mut t1, &mut t2);
        }
        t_min = t_min.max(t1);
        t_max = t_max.min(t2);
        if t_min > t_max {
            return None;
        }
    }

    if t_min < 0.0 || t_min > 1.0 {
        return None;
    }
    Some((t_min, Vec2::new(from.x + dx * t_min, from.y + dy * t_min)))
}

fn reflect_velocity(map: &MapModel, wall_id: u32, body: &mut ProjectileBody) {
    let Some(wall) = map.wall(wall_id) else { return };
    use crate::ws::protocol::Orientation;
    let normal = match wall.orientation {
        Orientation::Horizontal => Vec2::new(0.0, if body.velocity.y >= 0.0 { -1.0 } else { 1.0 }),
        Orientation::Vertical => Vec2::new(if body.velocity.x >= 0.0 { -1.0 } else { 1.0 }, 0.0),
    };
    let dot = body.velocity.dot(normal);
    let reflected = body.velocity - normal * (2.0 * dot);
    body.velocity = reflected * BOUNCE_RESTITUTION;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::map::{MapModel, WallSpec};
    use crate::ws::protocol::Material;

    fn corridor_map() -> MapModel {
        MapModel::load(
            vec![WallSpec {
                rect: Rect::new(100.0, 100.0, 100.0, 10.0),
                material: Material::Concrete,
                max_slice_health: 100,
                pre_destroyed_slices: vec![],
            }],
            vec![Vec2::new(50.0, 135.0)],
            vec![Vec2::new(430.0, 135.0)],
        )
        .unwrap()
    }

    #[test]
    fn spawn_falls_back_when_candidate_is_origin() {
        let mut map = corridor_map();
        map.red_spawns = vec![Vec2::ZERO];
        let spawn = spawn_position(&map, Team::Red, 0);
        assert_ne!(spawn, Vec2::ZERO);
    }

    #[test]
    fn player_cannot_move_through_intact_wall() {
        let map = corridor_map();
        let start = Vec2::new(140.0, 90.0);
        let moved = move_player(&map, start, Vec2::new(0.0, 20.0));
        assert!(moved.y < 100.0 - PLAYER_HALF_EXTENT + 1.0);
    }

    #[test]
    fn movement_slides_along_wall_on_independent_axis() {
        let map = corridor_map();
        let start = Vec2::new(140.0, 90.0);
        let moved = move_player(&map, start, Vec2::new(15.0, 20.0));
        assert!(moved.x > start.x);
    }

    #[test]
    fn segment_vs_rect_finds_entry_point() {
        let rect = Rect::new(50.0, 0.0, 10.0, 10.0);
        let hit = segment_vs_rect(Vec2::new(0.0, 5.0), Vec2::new(100.0, 5.0), &rect);
        assert!(hit.is_some());
        let (t, point) = hit.unwrap();
        assert!((0.0..=1.0).contains(&t));
        assert!((point.x - 50.0).abs() < 1e-3);
    }

    #[test]
    fn out_of_bounds_cleanup_triggers_past_field_margin() {
        assert!(!PROJECTILE_BOUNDS.contains_point(Vec2::new(-100.0, 0.0)));
        assert!(PROJECTILE_BOUNDS.contains_point(Vec2::new(-40.0, 0.0)));
    }

    #[test]
    fn grenade_bounce_respects_collision_cooldown() {
        let map = corridor_map();
        let mut body = ProjectileBody {
            kind: ProjectileKind::Grenade,
            position: Vec2::new(140.0, 95.0),
            velocity: Vec2::new(0.0, 100.0),
            radius: 4.0,
            recent_wall_collisions: vec![(0, 1_000)],
        };
        // Still within cooldown window relative to `now_ms` just after.
        let step = step_bouncing_projectile(&map, &mut body, 1_050);
        match step {
            ProjectileStep::Moved => {}
            _ => panic!("expected in-flight step while on cooldown"),
        }
    }
}
