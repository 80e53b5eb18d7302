//! MatchController: waiting -> starting -> playing -> finished lifecycle,
//! countdown reset/force rules, and victory detection.
//!
//! Extracted from the teacher's inline `MatchPhase` handling in
//! `MatchState::phase` because the countdown rules here (reset on join,
//! force-1s-at-8) are richer than the teacher's fixed countdown.

use crate::ws::protocol::{LobbyStatus, Team};

pub const MIN_PLAYERS_TO_START: usize = 2;
pub const MAX_PLAYERS: usize = 8;
pub const STANDARD_COUNTDOWN_SECS: u32 = 10;
pub const FULL_LOBBY_COUNTDOWN_SECS: u32 = 1;
pub const DEFAULT_KILL_TARGET: u32 = 50;
/// Grace period after a match ends before the controller resets to waiting.
pub const FINISHED_GRACE_MS: u64 = 8_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Waiting,
    Starting,
    Playing,
    Finished,
}

impl From<Phase> for LobbyStatus {
    fn from(phase: Phase) -> Self {
        match phase {
            Phase::Waiting => LobbyStatus::Waiting,
            Phase::Starting => LobbyStatus::Starting,
            Phase::Playing => LobbyStatus::Playing,
            Phase::Finished => LobbyStatus::Finished,
        }
    }
}

/// Events the controller emits as a side effect of a state transition,
/// for the caller to translate into `ServerMsg` broadcasts.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    CountdownStarted { seconds: u32 },
    CountdownReset { seconds: u32 },
    CountdownCancelled { reason: String },
    MatchStarted { kill_target: u32 },
    MatchEnded { winner: Option<Team> },
    ResetToWaiting,
}

/// Match lifecycle state machine. Owns no gameplay state directly —
/// callers drive it with player-count changes and score updates.
pub struct MatchController {
    pub phase: Phase,
    pub countdown_deadline_ms: Option<u64>,
    pub kill_target: u32,
    finished_at_ms: Option<u64>,
    started_at_ms: Option<u64>,
}

impl MatchController {
    pub fn new() -> Self {
        Self {
            phase: Phase::Waiting,
            countdown_deadline_ms: None,
            kill_target: DEFAULT_KILL_TARGET,
            finished_at_ms: None,
            started_at_ms: None,
        }
    }

    /// When the current match transitioned into `Playing`, if it has.
    /// Used to compute `match_ended`'s duration.
    pub fn started_at_ms(&self) -> Option<u64> {
        self.started_at_ms
    }

    fn countdown_duration_secs(player_count: usize) -> u32 {
        if player_count >= MAX_PLAYERS {
            FULL_LOBBY_COUNTDOWN_SECS
        } else {
            STANDARD_COUNTDOWN_SECS
        }
    }

    /// A player joined; advances or resets the countdown per spec.md
    /// §4.8: starts at 2 players, resets to 10s on a new joiner while
    /// below 8, force-transitions to the 1s countdown at exactly 8.
    pub fn on_player_joined(&mut self, player_count: usize, now_ms: u64) -> Option<ControllerEvent> {
        match self.phase {
            Phase::Waiting if player_count >= MIN_PLAYERS_TO_START => {
                let secs = Self::countdown_duration_secs(player_count);
                self.phase = Phase::Starting;
                self.countdown_deadline_ms = Some(now_ms + secs as u64 * 1000);
                Some(ControllerEvent::CountdownStarted { seconds: secs })
            }
            Phase::Starting => {
                let secs = Self::countdown_duration_secs(player_count);
                self.countdown_deadline_ms = Some(now_ms + secs as u64 * 1000);
                Some(ControllerEvent::CountdownReset { seconds: secs })
            }
            _ => None,
        }
    }

    /// A player left; cancels the countdown if the count drops below
    /// the minimum to start.
    pub fn on_player_left(&mut self, player_count: usize) -> Option<ControllerEvent> {
        if self.phase == Phase::Starting && player_count < MIN_PLAYERS_TO_START {
            self.phase = Phase::Waiting;
            self.countdown_deadline_ms = None;
            return Some(ControllerEvent::CountdownCancelled {
                reason: "not_enough_players".to_string(),
            });
        }
        None
    }

    /// Called once per network tick. Transitions Starting -> Playing
    /// when the countdown deadline passes, and Finished -> Waiting
    /// after the grace period.
    pub fn tick(&mut self, now_ms: u64) -> Option<ControllerEvent> {
        match self.phase {
            Phase::Starting => {
                if let Some(deadline) = self.countdown_deadline_ms {
                    if now_ms >= deadline {
                        self.phase = Phase::Playing;
                        self.countdown_deadline_ms = None;
                        self.started_at_ms = Some(now_ms);
                        return Some(ControllerEvent::MatchStarted {
                            kill_target: self.kill_target,
                        });
                    }
                }
                None
            }
            Phase::Finished => {
                if let Some(finished_at) = self.finished_at_ms {
                    if now_ms.saturating_sub(finished_at) >= FINISHED_GRACE_MS {
                        self.phase = Phase::Waiting;
                        self.finished_at_ms = None;
                        self.started_at_ms = None;
                        return Some(ControllerEvent::ResetToWaiting);
                    }
                }
                None
            }
            _ => None,
        }
    }

    /// Checks victory: a team reaching `kill_target` ends the match.
    pub fn check_victory(&mut self, red_kills: u32, blue_kills: u32, now_ms: u64) -> Option<ControllerEvent> {
        if self.phase != Phase::Playing {
            return None;
        }
        let winner = if red_kills >= self.kill_target {
            Some(Team::Red)
        } else if blue_kills >= self.kill_target {
            Some(Team::Blue)
        } else {
            None
        };
        winner.map(|team| {
            self.phase = Phase::Finished;
            self.finished_at_ms = Some(now_ms);
            ControllerEvent::MatchEnded { winner: Some(team) }
        })
    }

    pub fn status(&self) -> LobbyStatus {
        self.phase.into()
    }
}

impl Default for MatchController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn countdown_starts_at_two_players() {
        let mut controller = MatchController::new();
        let event = controller.on_player_joined(2, 0);
        assert_eq!(event, Some(ControllerEvent::CountdownStarted { seconds: 10 }));
        assert_eq!(controller.phase, Phase::Starting);
    }

    #[test]
    fn countdown_resets_on_third_joiner_then_forces_one_second_at_eighth() {
        let mut controller = MatchController::new();
        controller.on_player_joined(2, 0);
        let reset = controller.on_player_joined(3, 1000);
        assert_eq!(reset, Some(ControllerEvent::CountdownReset { seconds: 10 }));

        let forced = controller.on_player_joined(8, 2000);
        assert_eq!(forced, Some(ControllerEvent::CountdownReset { seconds: 1 }));
    }

    #[test]
    fn countdown_cancels_when_count_drops_below_minimum() {
        let mut controller = MatchController::new();
        controller.on_player_joined(2, 0);
        let cancelled = controller.on_player_left(1);
        assert!(matches!(cancelled, Some(ControllerEvent::CountdownCancelled { .. })));
        assert_eq!(controller.phase, Phase::Waiting);
    }

    #[test]
    fn tick_transitions_to_playing_after_deadline() {
        let mut controller = MatchController::new();
        controller.on_player_joined(2, 0);
        assert!(controller.tick(5_000).is_none());
        let started = controller.tick(10_000);
        assert_eq!(
            started,
            Some(ControllerEvent::MatchStarted {
                kill_target: DEFAULT_KILL_TARGET
            })
        );
        assert_eq!(controller.phase, Phase::Playing);
        assert_eq!(controller.started_at_ms(), Some(10_000));
    }

    #[test]
    fn victory_detected_at_kill_target() {
        let mut controller = MatchController::new();
        controller.phase = Phase::Playing;
        let event = controller.check_victory(50, 12, 0);
        assert_eq!(event, Some(ControllerEvent::MatchEnded { winner: Some(Team::Red) }));
        assert_eq!(controller.phase, Phase::Finished);
    }

    #[test]
    fn finished_resets_to_waiting_after_grace_period() {
        let mut controller = MatchController::new();
        controller.phase = Phase::Playing;
        controller.check_victory(50, 0, 1_000);
        assert!(controller.tick(5_000).is_none());
        let reset = controller.tick(1_000 + FINISHED_GRACE_MS);
        assert_eq!(reset, Some(ControllerEvent::ResetToWaiting));
        assert_eq!(controller.phase, Phase::Waiting);
    }
}
