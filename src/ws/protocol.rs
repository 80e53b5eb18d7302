//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A 2D point or direction in game-space pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn length(self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn length_squared(self) -> f32 {
        self.x * self.x + self.y * self.y
    }

    pub fn normalized(self) -> Vec2 {
        let len = self.length();
        if len > 1e-6 {
            Vec2::new(self.x / len, self.y / len)
        } else {
            Vec2::ZERO
        }
    }

    pub fn dot(self, other: Vec2) -> f32 {
        self.x * other.x + self.y * other.y
    }

    pub fn distance(self, other: Vec2) -> f32 {
        (self - other).length()
    }

    pub fn from_angle(radians: f32) -> Vec2 {
        Vec2::new(radians.cos(), radians.sin())
    }

    pub fn angle(self) -> f32 {
        self.y.atan2(self.x)
    }
}

impl std::ops::Add for Vec2 {
    type Output = Vec2;
    fn add(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl std::ops::Sub for Vec2 {
    type Output = Vec2;
    fn sub(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl std::ops::Mul<f32> for Vec2 {
    type Output = Vec2;
    fn mul(self, rhs: f32) -> Vec2 {
        Vec2::new(self.x * rhs, self.y * rhs)
    }
}

/// Team affiliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Team {
    Red,
    Blue,
}

impl Team {
    pub fn opposite(self) -> Team {
        match self {
            Team::Red => Team::Blue,
            Team::Blue => Team::Red,
        }
    }
}

/// Derived from held movement modifiers each tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementMode {
    Sneak,
    Walk,
    Run,
}

/// Wall material. Governs which hitscan damage categories apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Material {
    Concrete,
    Wood,
    Glass,
    Metal,
}

impl Material {
    /// Hard walls stop hitscan rays outright; soft walls can be penetrated
    /// at a fixed damage tax per spec.md §4.5.
    pub fn is_hard(self) -> bool {
        matches!(self, Material::Concrete | Material::Metal)
    }
}

/// Wall orientation, derived from its wider dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    Horizontal,
    Vertical,
}

/// Weapon identifiers from the spec's weapon/material reference table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeaponType {
    Rifle,
    Smg,
    Shotgun,
    BattleRifle,
    Sniper,
    Pistol,
    Revolver,
    SuppressedPistol,
    GrenadeLauncher,
    MachineGun,
    AntiMaterialRifle,
    RocketLauncher,
    Grenade,
    SmokeGrenade,
    Flashbang,
}

impl WeaponType {
    /// Instantaneous ray-based resolution, no projectile.
    pub fn is_hitscan(self) -> bool {
        !matches!(
            self,
            WeaponType::GrenadeLauncher
                | WeaponType::RocketLauncher
                | WeaponType::Grenade
                | WeaponType::SmokeGrenade
                | WeaponType::Flashbang
        )
    }

    pub fn is_shotgun(self) -> bool {
        matches!(self, WeaponType::Shotgun)
    }

    pub fn is_machine_gun(self) -> bool {
        matches!(self, WeaponType::MachineGun)
    }
}

/// Loadout slot: primary, secondary, or one of the three support slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadoutSlot {
    Primary,
    Secondary,
    Support,
}

/// A player's chosen loadout at `player:join` time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Loadout {
    pub primary: WeaponType,
    pub secondary: WeaponType,
    pub support: Vec<WeaponType>,
    pub team: Team,
}

/// Movement + aim input for a single tick.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct InputKeys {
    pub forward: bool,
    pub back: bool,
    pub left: bool,
    pub right: bool,
    /// Hold to move at reduced speed/noise.
    pub sneak: bool,
    /// Hold to move at increased speed/noise.
    pub run: bool,
    pub reload: bool,
    /// Toggle for the grenade-throw arm state (distinct from mouse fire).
    pub grenade_toggle: bool,
}

/// Edge-triggered and held mouse button state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct MouseState {
    pub x: f32,
    pub y: f32,
    /// Bitfield of currently-held buttons (bit 0 = left, bit 1 = right).
    pub buttons: u8,
    /// Bitfield of buttons that transitioned pressed this frame.
    pub pressed: u8,
    /// Bitfield of buttons that transitioned released this frame.
    pub released: u8,
}

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    FindMatch {
        mode: MatchMode,
    },
    CreatePrivateLobby {
        mode: MatchMode,
        max_players: Option<u32>,
        password: Option<String>,
    },
    JoinLobby {
        lobby_id: Uuid,
        password: Option<String>,
    },
    GetLobbyList {
        #[serde(default)]
        show_private: bool,
        #[serde(default)]
        show_full: bool,
        #[serde(default)]
        show_in_progress: bool,
        mode: Option<MatchMode>,
    },
    LeaveLobby,
    PlayerJoin {
        loadout: Loadout,
    },
    PlayerInput {
        sequence: u32,
        timestamp: u64,
        keys: InputKeys,
        mouse: MouseState,
    },
    PlayerRespawn,
    WeaponFire {
        weapon_type: WeaponType,
        position: Vec2,
        direction: Vec2,
        is_ads: bool,
        charge_level: Option<u8>,
        sequence: u32,
        timestamp: u64,
    },
    WeaponReload,
    WeaponSwitch {
        to_weapon: WeaponType,
        from_weapon: WeaponType,
    },
    RequestGameState,
}

/// Match mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    Deathmatch,
    TeamDeathmatch,
}

/// Lobby status, mirrors `LobbyState.status` in spec.md §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LobbyStatus {
    Waiting,
    Starting,
    Playing,
    Finished,
}

/// Messages sent from server to client. Every instance is scoped to
/// exactly one lobby's subscribers — the Transport makes a global
/// broadcast unrepresentable (see lobby::manager).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    LobbyJoined {
        lobby_id: Uuid,
        player_count: u32,
        max_players: u32,
        mode: MatchMode,
        status: LobbyStatus,
        is_in_progress: bool,
    },
    LobbyList {
        lobbies: Vec<LobbyListEntry>,
        total_count: u32,
    },
    PlayerJoinedLobby {
        lobby_id: Uuid,
        player_count: u32,
        player_id: Uuid,
        timestamp: u64,
    },
    PlayerLeftLobby {
        lobby_id: Uuid,
        player_count: u32,
        player_id: Uuid,
        timestamp: u64,
    },
    MatchStarting {
        lobby_id: Uuid,
        countdown_seconds: u32,
    },
    MatchStartCancelled {
        lobby_id: Uuid,
        reason: String,
    },
    MatchStarted {
        lobby_id: Uuid,
        kill_target: u32,
        is_late_join: Option<bool>,
    },
    MatchEnded {
        winner_team: Option<Team>,
        red_kills: u32,
        blue_kills: u32,
        duration_secs: u32,
        player_stats: Vec<PlayerMatchStats>,
    },
    GameState {
        tick: u64,
        players: Vec<PlayerSnapshot>,
        walls: Vec<WallSnapshot>,
        projectiles: Vec<ProjectileSnapshot>,
        smoke_zones: Vec<SmokeZoneSnapshot>,
        vision: VisionSnapshot,
        last_processed_input_sequence: u32,
    },
    WeaponFired {
        shooter_id: Uuid,
        weapon_type: WeaponType,
        position: Vec2,
        direction: Vec2,
        pellet_index: Option<u8>,
    },
    WeaponHit {
        shooter_id: Uuid,
        weapon_type: WeaponType,
        target_id: Option<Uuid>,
        wall_id: Option<u32>,
        slice_index: Option<u8>,
        position: Vec2,
        damage: f32,
        pellet_index: Option<u8>,
    },
    WeaponMiss {
        shooter_id: Uuid,
        weapon_type: WeaponType,
        pellet_index: Option<u8>,
    },
    WeaponReloaded {
        player_id: Uuid,
        weapon_type: WeaponType,
    },
    WeaponSwitched {
        player_id: Uuid,
        to_weapon: WeaponType,
    },
    WeaponHeatUpdate {
        player_id: Uuid,
        heat: f32,
        overheated: bool,
    },
    ProjectileCreated {
        projectile_id: Uuid,
        projectile_type: ProjectileKind,
        owner_id: Uuid,
        position: Vec2,
        velocity: Vec2,
    },
    ProjectileUpdated {
        projectile_id: Uuid,
        position: Vec2,
        velocity: Vec2,
    },
    ProjectileExploded {
        projectile_id: Uuid,
        position: Vec2,
        explosion_radius: f32,
    },
    WallDamaged {
        wall_id: u32,
        slice_index: u8,
        health: i32,
    },
    WallDestroyed {
        wall_id: u32,
        slice_index: u8,
        health: i32,
    },
    BackendPlayerDied {
        player_id: Uuid,
        killer_id: Option<Uuid>,
        killer_team: Option<Team>,
        victim_team: Team,
        weapon_type: Option<WeaponType>,
        is_team_kill: bool,
        position: Vec2,
        damage_type: String,
        timestamp: u64,
    },
    BackendPlayerRespawned {
        player_id: Uuid,
        position: Vec2,
        health: f32,
        team: Team,
        invulnerable_until: u64,
        timestamp: u64,
    },
    BackendRespawnDenied {
        remaining_time_ms: u64,
    },
    FlashbangEffect {
        position: Vec2,
        affected_players: Vec<FlashAffected>,
    },
    LobbyJoinFailed {
        reason: String,
    },
    LobbyCreationFailed {
        reason: String,
    },
    MatchmakingFailed {
        reason: String,
    },
    Error {
        code: String,
        message: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlashAffected {
    pub player_id: Uuid,
    pub intensity: f32,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LobbyListEntry {
    pub id: Uuid,
    pub player_count: u32,
    pub max_players: u32,
    pub mode: MatchMode,
    pub status: LobbyStatus,
    pub is_private: bool,
    pub password_required: bool,
}

/// Projectile archetype, wire-facing (distinct from internal weapon type).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectileKind {
    Grenade,
    Smoke,
    Flash,
    Rocket,
    GrenadeLauncherShell,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub id: Uuid,
    pub team: Team,
    pub position: Vec2,
    pub velocity: Vec2,
    pub rotation: f32,
    pub aim_direction: Vec2,
    pub alive: bool,
    pub health: f32,
    pub armor: f32,
    pub kills: u32,
    pub deaths: u32,
    pub movement_mode: MovementMode,
    pub current_weapon: WeaponType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WallSnapshot {
    pub id: u32,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub orientation: Orientation,
    pub material: Material,
    pub slice_health: [i32; 5],
    pub max_slice_health: i32,
    pub destruction_mask: [bool; 5],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectileSnapshot {
    pub id: Uuid,
    pub projectile_type: ProjectileKind,
    pub owner_id: Uuid,
    pub position: Vec2,
    pub velocity: Vec2,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmokeZoneSnapshot {
    pub id: Uuid,
    pub center: Vec2,
    pub current_radius: f32,
    pub current_density: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct VisionSnapshot {
    pub polygon: Vec<Vec2>,
    pub visible_tiles: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchStats {
    pub winner_team: Option<Team>,
    pub red_kills: u32,
    pub blue_kills: u32,
    pub duration_secs: u32,
    pub player_stats: Vec<PlayerMatchStats>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerMatchStats {
    pub id: Uuid,
    pub team: Team,
    pub kills: u32,
    pub deaths: u32,
    pub damage_dealt: f32,
    pub damage_taken: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec2_normalized_is_unit_length() {
        let v = Vec2::new(3.0, 4.0).normalized();
        assert!((v.length() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn vec2_zero_normalizes_to_zero() {
        assert_eq!(Vec2::ZERO.normalized(), Vec2::ZERO);
    }

    #[test]
    fn client_msg_round_trips_through_json() {
        let msg = ClientMsg::PlayerInput {
            sequence: 5,
            timestamp: 1234,
            keys: InputKeys::default(),
            mouse: MouseState::default(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: ClientMsg = serde_json::from_str(&json).unwrap();
        match back {
            ClientMsg::PlayerInput { sequence, .. } => assert_eq!(sequence, 5),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn hard_materials_are_concrete_and_metal_only() {
        assert!(Material::Concrete.is_hard());
        assert!(Material::Metal.is_hard());
        assert!(!Material::Wood.is_hard());
        assert!(!Material::Glass.is_hard());
    }
}
