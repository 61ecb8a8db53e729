use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::core::{DeviceIdentity, Error, GameConfig, Result, RoleKind};
use crate::device::Color;
use crate::radio::{RadioMode, Sighting, Thresholds, Zone};
use crate::time::{Cadence, Deadline, Instant};
use super::advertisement::{encode_name, Advertisement, MANUFACTURER_TYPE};
use super::message::{GameSignal, Message};

/// Runner sub-state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerPhase {
    Free,
    Caught,
}

/// Beacon sub-state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeaconPhase {
    /// Offering saves and watching for Taggers
    Idle,
    /// Resting after a save until the deadline
    Cooldown(Deadline),
    /// Tagged; stays here until the game ends
    Caught,
    /// Out of saves; inert until the game ends
    Depleted,
}

/// The role a device currently plays, with its role specific state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Unassigned,
    Runner {
        phase: RunnerPhase,
        /// Spacing between save requests while caught
        save_requests: Cadence,
    },
    Tagger,
    Beacon {
        phase: BeaconPhase,
        save_count: u32,
    },
}

impl Role {
    /// A role in its starting sub-state
    pub fn fresh(kind: RoleKind, config: &GameConfig) -> Self {
        match kind {
            RoleKind::Runner => Role::Runner {
                phase: RunnerPhase::Free,
                save_requests: Cadence::new(config.save_retry),
            },
            RoleKind::Tagger => Role::Tagger,
            RoleKind::Beacon => Role::Beacon {
                phase: BeaconPhase::Idle,
                save_count: 0,
            },
        }
    }

    pub fn kind(&self) -> Option<RoleKind> {
        match self {
            Role::Unassigned => None,
            Role::Runner { .. } => Some(RoleKind::Runner),
            Role::Tagger => Some(RoleKind::Tagger),
            Role::Beacon { .. } => Some(RoleKind::Beacon),
        }
    }
}

/// Game state owned by one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleState {
    pub role: Role,
    pub active: bool,
}

impl Default for RoleState {
    fn default() -> Self {
        RoleState {
            role: Role::Unassigned,
            active: false,
        }
    }
}

impl RoleState {
    pub fn kind(&self) -> Option<RoleKind> {
        self.role.kind()
    }

    pub fn is_caught(&self) -> bool {
        matches!(
            self.role,
            Role::Runner { phase: RunnerPhase::Caught, .. }
                | Role::Beacon { phase: BeaconPhase::Caught, .. }
        )
    }

    /// End of the current Beacon cooldown, if one is running
    pub fn cooldown_until(&self) -> Option<Instant> {
        match self.role {
            Role::Beacon {
                phase: BeaconPhase::Cooldown(deadline),
                ..
            } => Some(deadline.at()),
            _ => None,
        }
    }

    /// Saves granted this game; zero for anything but a Beacon
    pub fn save_count(&self) -> u32 {
        match self.role {
            Role::Beacon { save_count, .. } => save_count,
            _ => 0,
        }
    }
}

/// Per-device role state machine.
///
/// Bus messages and radio sightings are applied synchronously; anything the
/// device has to publish in response is queued on the outbox channel for the
/// loop to send.
pub struct RoleMachine {
    identity: DeviceIdentity,
    config: GameConfig,
    thresholds: Thresholds,
    state: RoleState,
    tagger_payload: Bytes,
    beacon_payload: Bytes,
    outbox: mpsc::UnboundedSender<Message>,
}

impl RoleMachine {
    /// Creates a machine in the Unassigned, inactive state
    pub fn new(
        identity: DeviceIdentity,
        config: GameConfig,
        outbox: mpsc::UnboundedSender<Message>,
    ) -> Self {
        let beacon_payload = Advertisement::new()
            .with_name(RoleKind::Beacon.as_str())
            .with_structure(MANUFACTURER_TYPE, Bytes::copy_from_slice(identity.id.as_bytes()))
            .encode()
            .unwrap_or_else(|e| {
                warn!("device id does not fit a Beacon advertisement ({}), advertising name only", e);
                encode_name(RoleKind::Beacon.as_str())
            });

        RoleMachine {
            thresholds: Thresholds {
                caught: config.caught_threshold,
                safe: config.safe_threshold,
            },
            identity,
            config,
            state: RoleState::default(),
            tagger_payload: encode_name(RoleKind::Tagger.as_str()),
            beacon_payload,
            outbox,
        }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn state(&self) -> &RoleState {
        &self.state
    }

    /// Applies one bus message
    pub fn handle_message(&mut self, message: &Message, now: Instant) -> Result<()> {
        let me = self.identity.id.as_str();
        match message {
            Message::Assign { device, role } if device == me => self.assign(*role),
            Message::Game(GameSignal::Start) => self.start(),
            Message::Game(GameSignal::End) => self.end(),
            Message::Save { runner, beacon } if beacon == me => {
                let runner = runner.clone();
                self.grant_save(runner, now)
            }
            Message::Saved { runner, beacon } if runner == me => {
                let beacon = beacon.clone();
                self.accept_save(&beacon);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Applies one radio sighting
    pub fn observe(&mut self, sighting: &Sighting, now: Instant) -> Result<()> {
        if !self.state.active {
            return Ok(());
        }

        let zone = self.thresholds.classify(sighting.rssi);
        let peer = sighting.role();
        let me = self.identity.id.clone();

        let outgoing = match (&mut self.state.role, peer, zone) {
            (
                Role::Runner {
                    phase: phase @ RunnerPhase::Free,
                    save_requests,
                },
                Some(RoleKind::Tagger),
                Zone::Caught,
            ) => {
                *phase = RunnerPhase::Caught;
                save_requests.reset();
                info!("Runner {} caught (rssi {})", me, sighting.rssi);
                Some(Message::Caught { device: me })
            }

            (
                Role::Runner {
                    phase: RunnerPhase::Caught,
                    save_requests,
                },
                Some(RoleKind::Beacon),
                Zone::Safe | Zone::Caught,
            ) => match &sighting.device {
                Some(beacon) => {
                    if save_requests.ready(now) {
                        debug!("Runner {} asking Beacon {} for a save", me, beacon);
                        Some(Message::Save {
                            runner: me,
                            beacon: beacon.clone(),
                        })
                    } else {
                        None
                    }
                }
                None => None,
            },

            (
                Role::Beacon {
                    phase: phase @ BeaconPhase::Idle,
                    ..
                },
                Some(RoleKind::Tagger),
                Zone::Caught,
            ) => {
                *phase = BeaconPhase::Caught;
                info!("Beacon {} caught (rssi {})", me, sighting.rssi);
                Some(Message::Caught { device: me })
            }

            _ => None,
        };

        match outgoing {
            Some(message) => self.emit(message),
            None => Ok(()),
        }
    }

    /// Advances timers: Beacon cooldown expiry and depletion
    pub fn expire_timers(&mut self, now: Instant) {
        let limit = self.config.save_limit;
        if let Role::Beacon { phase, save_count } = &mut self.state.role {
            let rested = match phase {
                BeaconPhase::Cooldown(deadline) => deadline.is_expired(now),
                BeaconPhase::Idle => true,
                _ => false,
            };
            if rested {
                let next = if *save_count >= limit {
                    BeaconPhase::Depleted
                } else {
                    BeaconPhase::Idle
                };
                if *phase != next {
                    debug!("Beacon {} {:?} -> {:?}", self.identity.id, phase, next);
                    *phase = next;
                }
            }
        }
    }

    /// The single radio use for this tick
    pub fn radio_mode(&self, tick: u64) -> RadioMode {
        if !self.state.active {
            return RadioMode::Off;
        }
        match &self.state.role {
            Role::Unassigned => RadioMode::Off,
            Role::Runner { .. } => RadioMode::Scan,
            Role::Tagger => RadioMode::Advertise(self.tagger_payload.clone()),
            Role::Beacon {
                phase: BeaconPhase::Idle,
                ..
            } => {
                if tick % 2 == 0 {
                    RadioMode::Advertise(self.beacon_payload.clone())
                } else {
                    RadioMode::Scan
                }
            }
            Role::Beacon { .. } => RadioMode::Off,
        }
    }

    /// Status light colour for the current state
    pub fn color(&self) -> Color {
        if !self.state.active {
            return Color::OFF;
        }
        match &self.state.role {
            Role::Unassigned => Color::OFF,
            Role::Runner {
                phase: RunnerPhase::Free,
                ..
            } => Color::GREEN,
            Role::Runner {
                phase: RunnerPhase::Caught,
                ..
            } => Color::BLUE,
            Role::Tagger => Color::RED,
            Role::Beacon { phase, .. } => match phase {
                BeaconPhase::Idle => Color::YELLOW,
                BeaconPhase::Cooldown(_) => Color::OFF,
                BeaconPhase::Caught => Color::BLUE,
                BeaconPhase::Depleted => Color::DIM_WHITE,
            },
        }
    }

    fn assign(&mut self, kind: RoleKind) -> Result<()> {
        if self.state.kind() == Some(kind) {
            self.state.active = true;
            debug!("Device {} already holds role {}", self.identity.id, kind);
            return Ok(());
        }
        self.state.role = Role::fresh(kind, &self.config);
        self.state.active = true;
        info!("Device {} assigned {}", self.identity.id, kind);
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        match self.state.kind() {
            Some(kind) if !self.state.active => {
                self.state.active = true;
                info!("Game started, device {} playing {}", self.identity.id, kind);
            }
            Some(_) => {}
            None => debug!("Game started, device {} has no role", self.identity.id),
        }
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        if self.state != RoleState::default() {
            info!("Game ended, device {} back to unassigned", self.identity.id);
        }
        self.state = RoleState::default();
        // the coordinator clears its roster on end; announce again for the next game
        self.emit(Message::Recognize {
            device: self.identity.id.clone(),
        })
    }

    fn grant_save(&mut self, runner: String, now: Instant) -> Result<()> {
        let limit = self.config.save_limit;
        let cooldown = self.config.cooldown;
        let active = self.state.active;

        let granted = match &mut self.state.role {
            Role::Beacon {
                phase: phase @ BeaconPhase::Idle,
                save_count,
            } if active && *save_count < limit => {
                *save_count += 1;
                *phase = BeaconPhase::Cooldown(Deadline::after(now, cooldown));
                info!(
                    "Beacon {} saved Runner {} ({}/{})",
                    self.identity.id, runner, save_count, limit
                );
                true
            }
            other => {
                debug!(
                    "Beacon {} rejected save for {} in state {:?}",
                    self.identity.id, runner, other
                );
                false
            }
        };

        if granted {
            let beacon = self.identity.id.clone();
            self.emit(Message::Saved { runner, beacon })
        } else {
            Ok(())
        }
    }

    fn accept_save(&mut self, beacon: &str) {
        if !self.state.active {
            return;
        }
        if let Role::Runner { phase, .. } = &mut self.state.role {
            if *phase == RunnerPhase::Caught {
                *phase = RunnerPhase::Free;
                info!("Runner {} saved by Beacon {}", self.identity.id, beacon);
            }
        }
    }

    fn emit(&self, message: Message) -> Result<()> {
        self.outbox
            .send(message)
            .map_err(|e| Error::invalid_state(format!("outbox closed, dropped {}", e.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::advertisement::decode_device;
    use std::time::Duration;
    use tokio::sync::mpsc::error::TryRecvError;

    fn machine(id: &str) -> (RoleMachine, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let identity = DeviceIdentity::from_id(id).unwrap();
        (RoleMachine::new(identity, GameConfig::default(), tx), rx)
    }

    fn assigned(id: &str, role: RoleKind) -> (RoleMachine, mpsc::UnboundedReceiver<Message>) {
        let (mut m, rx) = machine(id);
        let now = Instant::now();
        m.handle_message(
            &Message::Assign {
                device: id.into(),
                role,
            },
            now,
        )
        .unwrap();
        m.handle_message(&Message::Game(GameSignal::Start), now).unwrap();
        (m, rx)
    }

    fn tagger_at(rssi: i16) -> Sighting {
        Sighting {
            rssi,
            name: Some("Tagger".into()),
            device: None,
        }
    }

    fn beacon_at(rssi: i16, id: &str) -> Sighting {
        Sighting {
            rssi,
            name: Some("Beacon".into()),
            device: Some(id.into()),
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<Message> {
        let mut out = Vec::new();
        while let Ok(m) = rx.try_recv() {
            out.push(m);
        }
        out
    }

    #[test]
    fn test_assign_only_for_self() {
        let (mut m, mut rx) = machine("aa");
        let now = Instant::now();

        m.handle_message(
            &Message::Assign {
                device: "bb".into(),
                role: RoleKind::Tagger,
            },
            now,
        )
        .unwrap();
        assert_eq!(m.state().kind(), None);
        assert!(!m.state().active);

        m.handle_message(
            &Message::Assign {
                device: "aa".into(),
                role: RoleKind::Tagger,
            },
            now,
        )
        .unwrap();
        assert_eq!(m.state().kind(), Some(RoleKind::Tagger));
        assert!(m.state().active);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn test_runner_caught_exactly_once() {
        let (mut m, mut rx) = assigned("r1", RoleKind::Runner);
        let start = Instant::now();

        for tick in 0..10 {
            m.observe(&tagger_at(-30), start + Duration::from_millis(100 * tick))
                .unwrap();
        }

        assert!(m.state().is_caught());
        assert_eq!(drain(&mut rx), vec![Message::Caught { device: "r1".into() }]);
    }

    #[test]
    fn test_runner_ignores_tagger_outside_caught_zone() {
        let (mut m, mut rx) = assigned("r1", RoleKind::Runner);
        m.observe(&tagger_at(-45), Instant::now()).unwrap();
        m.observe(&tagger_at(-40), Instant::now()).unwrap();
        assert!(!m.state().is_caught());
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_inactive_device_ignores_sightings() {
        let (mut m, mut rx) = machine("r1");
        m.observe(&tagger_at(-20), Instant::now()).unwrap();
        assert!(!m.state().is_caught());
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_caught_runner_requests_save_with_spacing() {
        let (mut m, mut rx) = assigned("r1", RoleKind::Runner);
        let start = Instant::now();
        m.observe(&tagger_at(-30), start).unwrap();
        drain(&mut rx);

        // too far away to ask
        m.observe(&beacon_at(-70, "b1"), start).unwrap();
        assert!(drain(&mut rx).is_empty());

        m.observe(&beacon_at(-45, "b1"), start).unwrap();
        m.observe(&beacon_at(-45, "b1"), start + Duration::from_secs(1)).unwrap();
        assert_eq!(
            drain(&mut rx),
            vec![Message::Save {
                runner: "r1".into(),
                beacon: "b1".into()
            }]
        );

        m.observe(&beacon_at(-45, "b1"), start + Duration::from_secs(5)).unwrap();
        assert_eq!(drain(&mut rx).len(), 1);

        // a Beacon that did not advertise its id cannot be asked
        let anonymous = Sighting {
            rssi: -45,
            name: Some("Beacon".into()),
            device: None,
        };
        m.observe(&anonymous, start + Duration::from_secs(20)).unwrap();
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_runner_freed_by_save_for_self_only() {
        let (mut m, mut rx) = assigned("r1", RoleKind::Runner);
        let now = Instant::now();
        m.observe(&tagger_at(-30), now).unwrap();

        let other = Message::Saved {
            runner: "r2".into(),
            beacon: "b1".into(),
        };
        m.handle_message(&other, now).unwrap();
        assert!(m.state().is_caught());

        let mine = Message::Saved {
            runner: "r1".into(),
            beacon: "b1".into(),
        };
        m.handle_message(&mine, now).unwrap();
        assert!(!m.state().is_caught());

        // duplicate delivery changes nothing
        m.handle_message(&mine, now).unwrap();
        assert!(!m.state().is_caught());
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[test]
    fn test_beacon_last_save_and_simultaneous_request() {
        let (mut m, mut rx) = assigned("b1", RoleKind::Beacon);
        let now = Instant::now();
        m.state.role = Role::Beacon {
            phase: BeaconPhase::Idle,
            save_count: 2,
        };

        let request = |runner: &str| Message::Save {
            runner: runner.into(),
            beacon: "b1".into(),
        };
        m.handle_message(&request("r1"), now).unwrap();
        m.handle_message(&request("r2"), now).unwrap();

        assert_eq!(m.state().save_count(), 3);
        assert_eq!(m.state().cooldown_until(), Some(now + Duration::from_secs(5)));
        assert_eq!(
            drain(&mut rx),
            vec![Message::Saved {
                runner: "r1".into(),
                beacon: "b1".into()
            }]
        );

        // cooldown ends at the limit, so the Beacon is spent
        m.expire_timers(now + Duration::from_secs(5));
        assert_eq!(
            m.state().role,
            Role::Beacon {
                phase: BeaconPhase::Depleted,
                save_count: 3
            }
        );
        assert_eq!(m.radio_mode(0), RadioMode::Off);
        m.handle_message(&request("r3"), now + Duration::from_secs(6)).unwrap();
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_beacon_cooldown_returns_to_idle() {
        let (mut m, mut rx) = assigned("b1", RoleKind::Beacon);
        let now = Instant::now();
        let request = Message::Save {
            runner: "r1".into(),
            beacon: "b1".into(),
        };

        m.handle_message(&request, now).unwrap();
        assert_eq!(drain(&mut rx).len(), 1);
        assert_eq!(m.color(), Color::OFF);

        m.expire_timers(now + Duration::from_millis(4999));
        assert!(m.state().cooldown_until().is_some());
        m.handle_message(&request, now + Duration::from_secs(1)).unwrap();
        assert!(drain(&mut rx).is_empty());

        m.expire_timers(now + Duration::from_secs(5));
        assert_eq!(m.state().cooldown_until(), None);
        assert_eq!(m.color(), Color::YELLOW);

        m.handle_message(&request, now + Duration::from_secs(6)).unwrap();
        assert_eq!(drain(&mut rx).len(), 1);
        assert_eq!(m.state().save_count(), 2);
    }

    #[test]
    fn test_save_request_for_other_beacon_ignored() {
        let (mut m, mut rx) = assigned("b1", RoleKind::Beacon);
        let request = Message::Save {
            runner: "r1".into(),
            beacon: "b2".into(),
        };
        m.handle_message(&request, Instant::now()).unwrap();
        assert_eq!(m.state().save_count(), 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_caught_beacon_is_terminal() {
        let (mut m, mut rx) = assigned("b1", RoleKind::Beacon);
        let now = Instant::now();

        m.observe(&tagger_at(-35), now).unwrap();
        assert!(m.state().is_caught());
        assert_eq!(drain(&mut rx), vec![Message::Caught { device: "b1".into() }]);

        let request = Message::Save {
            runner: "r1".into(),
            beacon: "b1".into(),
        };
        m.handle_message(&request, now).unwrap();
        m.expire_timers(now + Duration::from_secs(60));
        assert!(m.state().is_caught());
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_duplicate_start_keeps_progress() {
        let (mut m, mut rx) = assigned("b1", RoleKind::Beacon);
        let now = Instant::now();
        m.handle_message(
            &Message::Save {
                runner: "r1".into(),
                beacon: "b1".into(),
            },
            now,
        )
        .unwrap();
        drain(&mut rx);

        m.handle_message(&Message::Game(GameSignal::Start), now).unwrap();
        m.handle_message(
            &Message::Assign {
                device: "b1".into(),
                role: RoleKind::Beacon,
            },
            now,
        )
        .unwrap();
        assert_eq!(m.state().save_count(), 1);
    }

    #[test]
    fn test_start_reactivates_without_reset() {
        let (mut m, _rx) = machine("b1");
        let now = Instant::now();
        m.handle_message(
            &Message::Assign {
                device: "b1".into(),
                role: RoleKind::Beacon,
            },
            now,
        )
        .unwrap();
        m.state.role = Role::Beacon {
            phase: BeaconPhase::Cooldown(Deadline::after(now, Duration::from_secs(5))),
            save_count: 2,
        };
        m.state.active = false;

        m.handle_message(&Message::Game(GameSignal::Start), now).unwrap();
        assert!(m.state().active);
        assert_eq!(m.state().save_count(), 2);
        assert!(m.state().cooldown_until().is_some());
    }

    #[test]
    fn test_start_without_role_stays_inactive() {
        let (mut m, mut rx) = machine("x1");
        m.handle_message(&Message::Game(GameSignal::Start), Instant::now())
            .unwrap();
        assert!(!m.state().active);
        assert_eq!(m.color(), Color::OFF);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_reassign_installs_fresh_role() {
        let (mut m, _rx) = assigned("r1", RoleKind::Runner);
        let now = Instant::now();
        m.observe(&tagger_at(-30), now).unwrap();

        m.handle_message(
            &Message::Assign {
                device: "r1".into(),
                role: RoleKind::Beacon,
            },
            now,
        )
        .unwrap();
        assert_eq!(
            m.state().role,
            Role::Beacon {
                phase: BeaconPhase::Idle,
                save_count: 0
            }
        );
    }

    #[test]
    fn test_end_resets_and_reannounces() {
        let (mut m, mut rx) = assigned("r1", RoleKind::Runner);
        let now = Instant::now();
        m.observe(&tagger_at(-30), now).unwrap();
        drain(&mut rx);

        m.handle_message(&Message::Game(GameSignal::End), now).unwrap();
        assert_eq!(m.state(), &RoleState::default());
        assert_eq!(m.radio_mode(0), RadioMode::Off);
        assert_eq!(m.color(), Color::OFF);
        assert_eq!(drain(&mut rx), vec![Message::Recognize { device: "r1".into() }]);

        // a new game can be joined afterwards
        m.handle_message(
            &Message::Assign {
                device: "r1".into(),
                role: RoleKind::Tagger,
            },
            now,
        )
        .unwrap();
        m.handle_message(&Message::Game(GameSignal::Start), now).unwrap();
        assert_eq!(m.state().kind(), Some(RoleKind::Tagger));
    }

    #[test]
    fn test_radio_modes() {
        let (runner, _) = assigned("r1", RoleKind::Runner);
        assert_eq!(runner.radio_mode(0), RadioMode::Scan);
        assert_eq!(runner.radio_mode(1), RadioMode::Scan);

        let (tagger, _) = assigned("t1", RoleKind::Tagger);
        assert_eq!(tagger.radio_mode(0), RadioMode::Advertise(encode_name("Tagger")));

        let (beacon, _) = assigned("b1", RoleKind::Beacon);
        match beacon.radio_mode(0) {
            RadioMode::Advertise(payload) => {
                assert_eq!(decode_device(&payload).as_deref(), Some("b1"));
            }
            other => panic!("Expected Beacon advertisement, got {:?}", other),
        }
        assert_eq!(beacon.radio_mode(1), RadioMode::Scan);

        let (idle, _) = machine("x1");
        assert_eq!(idle.radio_mode(0), RadioMode::Off);
    }

    #[test]
    fn test_closed_outbox_is_reported() {
        let (mut m, rx) = assigned("r1", RoleKind::Runner);
        drop(rx);
        let result = m.observe(&tagger_at(-30), Instant::now());
        assert!(matches!(result, Err(Error::InvalidState(_))));
        // the state change itself still happened
        assert!(m.state().is_caught());
    }
}
