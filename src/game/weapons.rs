//! WeaponEngine: fire-rate gating, hitscan penetration, shotgun pellets,
//! reload/heat timers, and projectile-weapon spawning.

use crate::game::map::MapModel;
use crate::game::physics::segment_vs_rect;
use crate::ws::protocol::{ProjectileKind, Vec2, WeaponType};

/// Flat damage tax a hitscan ray pays to continue through an intact
/// soft-wall slice. Per spec.md §9's open-question tie-break.
pub const SOFT_WALL_PENETRATION_TAX: f32 = 15.0;

pub const MACHINE_GUN_HEAT_THRESHOLD: f32 = 100.0;
pub const MACHINE_GUN_OVERHEAT_DURATION_MS: u64 = 3_000;
/// Tunable — only the threshold and overheat duration above are fixed.
pub const HEAT_PER_SHOT: f32 = 14.0;
pub const HEAT_COOLDOWN_PER_SEC: f32 = 25.0;

const SHOTGUN_PELLET_COUNT: u8 = 8;

/// Static per-weapon-type stats from the spec's weapon/material
/// reference table (spec.md §6).
#[derive(Debug, Clone, Copy)]
pub struct WeaponStats {
    pub damage: f32,
    pub rpm: f32,
    pub magazine_size: u32,
    pub reload_ms: u64,
    pub spread_radians: f32,
    pub max_penetrations: u32,
    pub penetrates_soft_walls: bool,
}

impl WeaponStats {
    pub fn for_type(weapon_type: WeaponType) -> Self {
        match weapon_type {
            WeaponType::Rifle => Self {
                damage: 25.0,
                rpm: 600.0,
                magazine_size: 30,
                reload_ms: 2200,
                spread_radians: 0.02,
                max_penetrations: 1,
                penetrates_soft_walls: true,
            },
            WeaponType::Smg => Self {
                damage: 18.0,
                rpm: 900.0,
                magazine_size: 35,
                reload_ms: 1800,
                spread_radians: 0.035,
                max_penetrations: 1,
                penetrates_soft_walls: true,
            },
            WeaponType::Shotgun => Self {
                damage: 25.0 / SHOTGUN_PELLET_COUNT as f32,
                rpm: 80.0,
                magazine_size: 6,
                reload_ms: 2600,
                spread_radians: 0.12,
                max_penetrations: 1,
                penetrates_soft_walls: false,
            },
            WeaponType::BattleRifle => Self {
                damage: 32.0,
                rpm: 450.0,
                magazine_size: 20,
                reload_ms: 2400,
                spread_radians: 0.015,
                max_penetrations: 1,
                penetrates_soft_walls: true,
            },
            WeaponType::Sniper => Self {
                damage: 80.0,
                rpm: 45.0,
                magazine_size: 5,
                reload_ms: 3000,
                spread_radians: 0.0,
                max_penetrations: 1,
                penetrates_soft_walls: true,
            },
            WeaponType::Pistol => Self {
                damage: 35.0,
                rpm: 350.0,
                magazine_size: 12,
                reload_ms: 1500,
                spread_radians: 0.03,
                max_penetrations: 1,
                penetrates_soft_walls: true,
            },
            WeaponType::Revolver => Self {
                damage: 45.0,
                rpm: 150.0,
                magazine_size: 6,
                reload_ms: 2000,
                spread_radians: 0.025,
                max_penetrations: 1,
                penetrates_soft_walls: true,
            },
            WeaponType::SuppressedPistol => Self {
                damage: 22.0,
                rpm: 400.0,
                magazine_size: 15,
                reload_ms: 1500,
                spread_radians: 0.03,
                max_penetrations: 1,
                penetrates_soft_walls: true,
            },
            WeaponType::MachineGun => Self {
                damage: 20.0,
                rpm: 750.0,
                magazine_size: 100,
                reload_ms: 4500,
                spread_radians: 0.04,
                max_penetrations: 1,
                penetrates_soft_walls: true,
            },
            WeaponType::AntiMaterialRifle => Self {
                damage: 95.0,
                rpm: 40.0,
                magazine_size: 5,
                reload_ms: 3400,
                spread_radians: 0.0,
                max_penetrations: 3,
                penetrates_soft_walls: true,
            },
            WeaponType::GrenadeLauncher => Self {
                damage: 70.0,
                rpm: 60.0,
                magazine_size: 1,
                reload_ms: 2800,
                spread_radians: 0.0,
                max_penetrations: 0,
                penetrates_soft_walls: false,
            },
            WeaponType::RocketLauncher => Self {
                damage: 110.0,
                rpm: 30.0,
                magazine_size: 1,
                reload_ms: 3200,
                spread_radians: 0.0,
                max_penetrations: 0,
                penetrates_soft_walls: false,
            },
            WeaponType::Grenade => Self {
                damage: 90.0,
                rpm: 0.0,
                magazine_size: 1,
                reload_ms: 0,
                spread_radians: 0.0,
                max_penetrations: 0,
                penetrates_soft_walls: false,
            },
            WeaponType::SmokeGrenade => Self {
                damage: 0.0,
                rpm: 0.0,
                magazine_size: 1,
                reload_ms: 0,
                spread_radians: 0.0,
                max_penetrations: 0,
                penetrates_soft_walls: false,
            },
            WeaponType::Flashbang => Self {
                damage: 0.0,
                rpm: 0.0,
                magazine_size: 1,
                reload_ms: 0,
                spread_radians: 0.0,
                max_penetrations: 0,
                penetrates_soft_walls: false,
            },
        }
    }

    /// Minimum milliseconds between two shots, per spec.md §4.5's
    /// `minInterval = 60000 / rpm` gating rule.
    pub fn min_fire_interval_ms(&self) -> u64 {
        if self.rpm <= 0.0 {
            0
        } else {
            (60_000.0 / self.rpm) as u64
        }
    }

    pub fn projectile_kind(&self, weapon_type: WeaponType) -> Option<ProjectileKind> {
        match weapon_type {
            WeaponType::Grenade => Some(ProjectileKind::Grenade),
            WeaponType::SmokeGrenade => Some(ProjectileKind::Smoke),
            WeaponType::Flashbang => Some(ProjectileKind::Flash),
            WeaponType::RocketLauncher => Some(ProjectileKind::Rocket),
            WeaponType::GrenadeLauncher => Some(ProjectileKind::GrenadeLauncherShell),
            _ => None,
        }
    }
}

/// Per-weapon mutable firing state, one per loadout slot a player owns.
#[derive(Debug, Clone)]
pub struct WeaponState {
    pub weapon_type: WeaponType,
    pub ammo_in_magazine: u32,
    pub ammo_reserve: u32,
    pub reloading: bool,
    pub reload_end_time: u64,
    pub last_fire_time: u64,
    pub heat: f32,
    pub overheated_until: u64,
}

impl WeaponState {
    pub fn new(weapon_type: WeaponType) -> Self {
        let stats = WeaponStats::for_type(weapon_type);
        Self {
            weapon_type,
            ammo_in_magazine: stats.magazine_size,
            ammo_reserve: stats.magazine_size * 3,
            reloading: false,
            reload_end_time: 0,
            last_fire_time: 0,
            heat: 0.0,
            overheated_until: 0,
        }
    }

    pub fn is_overheated(&self, now_ms: u64) -> bool {
        now_ms < self.overheated_until
    }

    /// Whether a fire request at `now_ms` is rate-gated, reloading, out
    /// of ammo, or overheated. Firing while reloading or while
    /// overheated are both no-ops — the caller must silently drop the
    /// request (spec.md §7 FireRejected, no `weapon:fired` event).
    pub fn can_fire(&self, stats: &WeaponStats, now_ms: u64) -> bool {
        if self.reloading || self.is_overheated(now_ms) || self.ammo_in_magazine == 0 {
            return false;
        }
        now_ms.saturating_sub(self.last_fire_time) >= stats.min_fire_interval_ms()
    }

    /// Records a successful fire: decrements the magazine, updates the
    /// fire-rate gate, and applies machine-gun heat.
    pub fn record_fire(&mut self, stats: &WeaponStats, now_ms: u64) {
        self.last_fire_time = now_ms;
        if self.ammo_in_magazine > 0 {
            self.ammo_in_magazine -= 1;
        }
        if self.weapon_type.is_machine_gun() {
            self.heat += HEAT_PER_SHOT;
            if self.heat >= MACHINE_GUN_HEAT_THRESHOLD {
                self.overheated_until = now_ms + MACHINE_GUN_OVERHEAT_DURATION_MS;
            }
        }
    }

    /// Cools the weapon's heat by one tick's worth, given elapsed
    /// seconds. A no-op for non-machine-gun weapons.
    pub fn cool_down(&mut self, dt_secs: f32) {
        if self.heat > 0.0 {
            self.heat = (self.heat - HEAT_COOLDOWN_PER_SEC * dt_secs).max(0.0);
        }
    }

    /// Reload is a no-op while already reloading or while the magazine
    /// is already full — both must be silently ignored (idempotence).
    pub fn start_reload(&mut self, stats: &WeaponStats, now_ms: u64) -> bool {
        if self.reloading || self.ammo_in_magazine >= stats.magazine_size || self.ammo_reserve == 0 {
            return false;
        }
        self.reloading = true;
        self.reload_end_time = now_ms + stats.reload_ms;
        true
    }

    /// Completes a reload whose deadline has passed: refills the
    /// magazine to capacity from reserve ammo (full-mag reload, not
    /// incremental).
    pub fn finish_reload_if_due(&mut self, stats: &WeaponStats, now_ms: u64) -> bool {
        if !self.reloading || now_ms < self.reload_end_time {
            return false;
        }
        let needed = stats.magazine_size - self.ammo_in_magazine;
        let taken = needed.min(self.ammo_reserve);
        self.ammo_in_magazine += taken;
        self.ammo_reserve -= taken;
        self.reloading = false;
        true
    }
}

/// Outcome of resolving a single hitscan ray (one pellet for shotguns,
/// the whole shot otherwise) against walls and players along its path.
#[derive(Debug, Clone, PartialEq)]
pub enum RayHit {
    Player { target_index: usize, position: Vec2, damage: f32 },
    Wall { wall_id: u32, slice_index: usize, position: Vec2, damage: f32 },
    Miss,
}

/// A candidate player target: index into the caller's player list,
/// position, and hitbox radius (matches the 10x10 player AABB via an
/// equivalent circle for ray purposes).
pub struct RayTarget {
    pub index: usize,
    pub position: Vec2,
    pub radius: f32,
}

/// Resolves a single hitscan ray from `origin` along `direction` out to
/// `max_range`, applying the spec's single penetration rule: hard
/// walls stop the ray outright; intact soft-wall slices subtract
/// `min(remaining_budget, SOFT_WALL_PENETRATION_TAX)` and the ray
/// continues if any budget remains; destroyed slices are free passage;
/// a player always terminates the ray. Returns every hit/miss event
/// along the path in travel order.
pub fn resolve_hitscan(
    map: &MapModel,
    origin: Vec2,
    direction: Vec2,
    max_range: f32,
    damage_budget: f32,
    targets: &[RayTarget],
    max_penetrations: u32,
) -> Vec<RayHit> {
    let dir = direction.normalized();
    let end = origin + dir * max_range;
    let mut events = Vec::new();
    let mut remaining_damage = damage_budget;
    let mut penetrations_used = 0u32;
    let mut segment_start = origin;

    loop {
        let wall_hit = nearest_wall_hit(map, segment_start, end);
        let player_hit = nearest_player_hit(segment_start, end, dir, targets);

        let (use_wall, t) = match (wall_hit, player_hit) {
            (None, None) => {
                if events.is_empty() {
                    events.push(RayHit::Miss);
                }
                break;
            }
            (Some((wt, _, _)), None) => (true, wt),
            (None, Some((pt, _))) => (false, pt),
            (Some((wt, _, _)), Some((pt, _))) => (wt <= pt, wt.min(pt)),
        };
        let _ = t;

        if use_wall {
            let (_, wall_id, slice_index) = wall_hit.unwrap();
            let wall = map.wall(wall_id).expect("wall exists");
            let hit_point = wall_hit_point(map, segment_start, end, wall_id);
            if wall.material.is_hard() {
                events.push(RayHit::Wall {
                    wall_id,
                    slice_index,
                    position: hit_point,
                    damage: remaining_damage,
                });
                break;
            }
            let tax = remaining_damage.min(SOFT_WALL_PENETRATION_TAX);
            events.push(RayHit::Wall {
                wall_id,
                slice_index,
                position: hit_point,
                damage: tax,
            });
            remaining_damage -= tax;
            if remaining_damage <= 0.0 {
                break;
            }
            segment_start = slice_exit_point(map, segment_start, end, wall_id, slice_index) + dir * 0.5;
            continue;
        } else {
            let (_, target_index) = player_hit.unwrap();
            let target = &targets[target_index];
            events.push(RayHit::Player {
                target_index: target.index,
                position: target.position,
                damage: remaining_damage,
            });
            penetrations_used += 1;
            if penetrations_used >= max_penetrations {
                break;
            }
            segment_start = target.position + dir * (target.radius + 0.5);
            continue;
        }
    }

    events
}

fn nearest_wall_hit(map: &MapModel, from: Vec2, to: Vec2) -> Option<(f32, u32, usize)> {
    use crate::game::map::Rect;
    let path_rect = Rect::new(
        from.x.min(to.x) - 1.0,
        from.y.min(to.y) - 1.0,
        (from.x - to.x).abs() + 2.0,
        (from.y - to.y).abs() + 2.0,
    );
    let mut best: Option<(f32, u32, usize)> = None;
    for id in map.walls_near_rect(&path_rect) {
        let Some(wall) = map.wall(id) else { continue };
        for (slice_index, slice_rect) in (0..5).map(|i| (i, wall.slice_rect(i))) {
            if !wall.is_slice_intact(slice_index) {
                continue;
            }
            if let Some((t, _)) = segment_vs_rect(from, to, &slice_rect) {
                if best.map_or(true, |(bt, _, _)| t < bt) {
                    best = Some((t, id, slice_index));
                }
            }
        }
    }
    best
}

fn wall_hit_point(map: &MapModel, from: Vec2, to: Vec2, wall_id: u32) -> Vec2 {
    let wall = map.wall(wall_id).expect("wall exists");
    for i in 0..5 {
        if let Some((_, point)) = segment_vs_rect(from, to, &wall.slice_rect(i)) {
            return point;
        }
    }
    to
}

/// Where the ray leaves the given slice's rect, as opposed to
/// `segment_vs_rect`'s entry point. Resuming the ray from here (instead
/// of the entry point) keeps a penetrating shot from re-detecting the
/// same slice on the next loop iteration.
fn slice_exit_point(map: &MapModel, from: Vec2, to: Vec2, wall_id: u32, slice_index: usize) -> Vec2 {
    let wall = map.wall(wall_id).expect("wall exists");
    let rect = wall.slice_rect(slice_index);
    let dx = to.x - from.x;
    let dy = to.y - from.y;
    let mut t_max = 1.0f32;
    for (origin, delta, lo, hi) in [
        (from.x, dx, rect.left(), rect.right()),
        (from.y, dy, rect.top(), rect.bottom()),
    ] {
        if delta.abs() < 1e-6 {
            continue;
        }
        let inv = 1.0 / delta;
        let (t1, t2) = ((lo - origin) * inv, (hi - origin) * inv);
        t_max = t_max.min(t1.max(t2));
    }
    Vec2::new(from.x + dx * t_max, from.y + dy * t_max)
}

fn nearest_player_hit(from: Vec2, to: Vec2, dir: Vec2, targets: &[RayTarget]) -> Option<(f32, usize)> {
    let seg = to - from;
    let seg_len = seg.length();
    if seg_len < 1e-6 {
        return None;
    }
    let mut best: Option<(f32, usize)> = None;
    for (idx, target) in targets.iter().enumerate() {
        let to_target = target.position - from;
        let proj = to_target.dot(dir);
        if proj < 0.0 || proj > seg_len {
            continue;
        }
        let closest_point = from + dir * proj;
        if closest_point.distance(target.position) <= target.radius {
            let t = proj / seg_len;
            if best.map_or(true, |(bt, _)| t < bt) {
                best = Some((t, idx));
            }
        }
    }
    best
}

/// Generates the `SHOTGUN_PELLET_COUNT` independent pellet directions
/// for a shotgun fire event, each with its own deterministic spread
/// offset derived from `pellet_index` so pellet fan-out is stable for
/// a given base direction (callers supplying randomness should jitter
/// `base_direction` themselves before calling, if desired).
pub fn shotgun_pellet_directions(base_direction: Vec2, spread_radians: f32) -> Vec<(u8, Vec2)> {
    let base_angle = base_direction.angle();
    (0..SHOTGUN_PELLET_COUNT)
        .map(|i| {
            let t = i as f32 / (SHOTGUN_PELLET_COUNT - 1) as f32 - 0.5;
            let angle = base_angle + t * spread_radians;
            (i, Vec2::from_angle(angle))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::map::{MapModel, Rect as MapRect, WallSpec};
    use crate::ws::protocol::Material;

    fn map_with_wood_wall() -> MapModel {
        MapModel::load(
            vec![WallSpec {
                rect: MapRect::new(100.0, 90.0, 20.0, 100.0),
                material: Material::Wood,
                max_slice_health: 60,
                pre_destroyed_slices: vec![],
            }],
            vec![Vec2::new(50.0, 135.0)],
            vec![Vec2::new(430.0, 135.0)],
        )
        .unwrap()
    }

    #[test]
    fn rifle_min_fire_interval_matches_spec_formula() {
        let stats = WeaponStats::for_type(WeaponType::Rifle);
        assert_eq!(stats.min_fire_interval_ms(), 100); // 60000/600
    }

    #[test]
    fn fire_while_reloading_is_rejected() {
        let stats = WeaponStats::for_type(WeaponType::Rifle);
        let mut state = WeaponState::new(WeaponType::Rifle);
        state.start_reload(&stats, 0);
        assert!(!state.can_fire(&stats, 50));
    }

    #[test]
    fn reload_while_reloading_is_a_no_op() {
        let stats = WeaponStats::for_type(WeaponType::Rifle);
        let mut state = WeaponState::new(WeaponType::Rifle);
        assert!(state.start_reload(&stats, 0));
        assert!(!state.start_reload(&stats, 10));
    }

    #[test]
    fn machine_gun_overheats_at_threshold() {
        let stats = WeaponStats::for_type(WeaponType::MachineGun);
        let mut state = WeaponState::new(WeaponType::MachineGun);
        let mut now = 0u64;
        while !state.is_overheated(now) && state.ammo_in_magazine > 0 {
            state.record_fire(&stats, now);
            now += stats.min_fire_interval_ms();
        }
        assert!(state.is_overheated(now));
        assert!(!state.can_fire(&stats, now));
    }

    #[test]
    fn hitscan_through_wood_wall_then_player_splits_damage() {
        let map = map_with_wood_wall();
        let targets = vec![RayTarget {
            index: 0,
            position: Vec2::new(200.0, 135.0),
            radius: 5.0,
        }];
        let hits = resolve_hitscan(&map, Vec2::new(50.0, 135.0), Vec2::new(1.0, 0.0), 400.0, 25.0, &targets, 1);
        assert_eq!(hits.len(), 2);
        match &hits[0] {
            RayHit::Wall { damage, .. } => assert_eq!(*damage, 15.0),
            _ => panic!("expected wall hit first"),
        }
        match &hits[1] {
            RayHit::Player { damage, .. } => assert_eq!(*damage, 10.0),
            _ => panic!("expected player hit second"),
        }
    }

    #[test]
    fn shotgun_generates_eight_independent_pellets() {
        let pellets = shotgun_pellet_directions(Vec2::new(1.0, 0.0), 0.2);
        assert_eq!(pellets.len(), 8);
        let indices: Vec<u8> = pellets.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn concrete_wall_stops_ray_with_zero_penetration() {
        let map = MapModel::load(
            vec![WallSpec {
                rect: MapRect::new(100.0, 90.0, 20.0, 100.0),
                material: Material::Concrete,
                max_slice_health: 200,
                pre_destroyed_slices: vec![],
            }],
            vec![Vec2::new(50.0, 135.0)],
            vec![Vec2::new(430.0, 135.0)],
        )
        .unwrap();
        let targets = vec![RayTarget {
            index: 0,
            position: Vec2::new(200.0, 135.0),
            radius: 5.0,
        }];
        let hits = resolve_hitscan(&map, Vec2::new(50.0, 135.0), Vec2::new(1.0, 0.0), 400.0, 25.0, &targets, 1);
        assert_eq!(hits.len(), 1);
        assert!(matches!(hits[0], RayHit::Wall { .. }));
    }

    #[test]
    fn hitscan_penetrates_one_soft_wall_and_reaches_a_second() {
        let map = MapModel::load(
            vec![
                WallSpec {
                    rect: MapRect::new(100.0, 90.0, 20.0, 100.0),
                    material: Material::Wood,
                    max_slice_health: 60,
                    pre_destroyed_slices: vec![],
                },
                WallSpec {
                    rect: MapRect::new(160.0, 90.0, 20.0, 100.0),
                    material: Material::Wood,
                    max_slice_health: 60,
                    pre_destroyed_slices: vec![],
                },
            ],
            vec![Vec2::new(50.0, 135.0)],
            vec![Vec2::new(430.0, 135.0)],
        )
        .unwrap();
        let hits = resolve_hitscan(&map, Vec2::new(50.0, 135.0), Vec2::new(1.0, 0.0), 400.0, 40.0, &[], 2);
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| matches!(h, RayHit::Wall { .. })));
        match (&hits[0], &hits[1]) {
            (RayHit::Wall { wall_id: a, .. }, RayHit::Wall { wall_id: b, .. }) => assert_ne!(a, b),
            _ => panic!("expected two distinct wall hits"),
        }
    }
}
