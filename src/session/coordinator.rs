use std::collections::BTreeSet;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::core::{Error, Result, RoleKind, RuleField, Rules};
use crate::protocol::{GameSignal, Message};
use crate::time::{Deadline, Instant, Stopwatch};

/// A running game
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveGame {
    pub clock: Stopwatch,
    pub deadline: Deadline,
    /// Roles handed out at start, in roster order
    pub assignments: Vec<(String, RoleKind)>,
}

/// Coordinator side game state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    /// Devices in the order they first announced themselves
    pub roster: Vec<String>,
    /// Devices currently reported caught
    pub caught: BTreeSet<String>,
    pub game: Option<ActiveGame>,
}

impl SessionState {
    pub fn is_active(&self) -> bool {
        self.game.is_some()
    }

    /// Adds a device once, keeping first-registered order
    pub fn recognize(&mut self, device: &str) -> bool {
        if self.roster.iter().any(|d| d == device) {
            return false;
        }
        self.roster.push(device.to_string());
        true
    }
}

/// Pairs roster entries with the rule roles in order, truncated to the shorter list
pub fn pair_roles(roster: &[String], rules: &Rules) -> Vec<(String, RoleKind)> {
    roster
        .iter()
        .cloned()
        .zip(rules.roles())
        .collect()
}

/// Central game authority.
///
/// Keeps the roster, hands out roles and starts and ends games. Messages
/// to publish go to the outbox like the device side state machine.
pub struct Coordinator {
    rules: Rules,
    state: SessionState,
    outbox: mpsc::UnboundedSender<Message>,
}

impl Coordinator {
    pub fn new(rules: Rules, outbox: mpsc::UnboundedSender<Message>) -> Self {
        Coordinator {
            rules,
            state: SessionState::default(),
            outbox,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn rules(&self) -> &Rules {
        &self.rules
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// Replaces the rules for the next game
    pub fn set_rules(&mut self, rules: Rules) -> Result<()> {
        if self.is_active() {
            return Err(Error::invalid_state("cannot change rules during a game"));
        }
        rules.validate()?;
        self.rules = rules;
        Ok(())
    }

    /// Steps one rule between games
    pub fn cycle_rule(&mut self, field: RuleField) -> Result<()> {
        let mut rules = self.rules.clone();
        rules.cycle(field);
        self.set_rules(rules)?;
        info!("Rules now {:?}", self.rules);
        Ok(())
    }

    /// Applies one bus message
    pub fn handle_message(&mut self, message: &Message) -> Result<()> {
        match message {
            Message::Recognize { device } => {
                if self.state.recognize(device) {
                    info!(
                        "Recognized device {} ({} total)",
                        device,
                        self.state.roster.len()
                    );
                }
            }
            Message::Caught { device } if self.is_active() => {
                if self.state.caught.insert(device.clone()) {
                    info!("{} caught ({} caught)", device, self.state.caught.len());
                }
            }
            Message::Saved { runner, beacon } if self.is_active() => {
                if self.state.caught.remove(runner) {
                    info!("{} saved by {}", runner, beacon);
                }
            }
            other => debug!("Coordinator ignoring {}", other),
        }
        Ok(())
    }

    /// Assigns roles to the roster and starts a game
    pub fn start(&mut self, now: Instant) -> Result<()> {
        if self.is_active() {
            return Err(Error::invalid_state("game already in progress"));
        }
        self.rules.validate()?;

        let assignments = pair_roles(&self.state.roster, &self.rules);
        if assignments.len() < self.rules.role_count() {
            warn!(
                "Only {} devices for {} roles, extra roles left out",
                assignments.len(),
                self.rules.role_count()
            );
        }
        if self.state.roster.len() > assignments.len() {
            info!(
                "{} devices sit this game out",
                self.state.roster.len() - assignments.len()
            );
        }

        for (device, role) in &assignments {
            self.emit(Message::Assign {
                device: device.clone(),
                role: *role,
            })?;
        }
        self.emit(Message::Game(GameSignal::Start))?;

        info!(
            "Game started: {} players for {:?}",
            assignments.len(),
            self.rules.duration()
        );
        self.state.caught.clear();
        self.state.game = Some(ActiveGame {
            clock: Stopwatch::start(now),
            deadline: Deadline::after(now, self.rules.duration()),
            assignments,
        });
        Ok(())
    }

    /// Ends the game, if any, and clears the roster for the next one
    pub fn end(&mut self) -> Result<()> {
        self.emit(Message::Game(GameSignal::End))?;
        if let Some(game) = self.state.game.take() {
            info!(
                "Game ended with {} of {} players caught",
                self.state.caught.len(),
                game.assignments.len()
            );
        }
        self.state.roster.clear();
        self.state.caught.clear();
        Ok(())
    }

    /// Starts when idle, ends when a game is running
    pub fn toggle(&mut self, now: Instant) -> Result<()> {
        if self.is_active() {
            self.end()
        } else {
            self.start(now)
        }
    }

    /// Ends the game once its duration has elapsed; true if it ended
    pub fn tick(&mut self, now: Instant) -> Result<bool> {
        let expired = self
            .state
            .game
            .as_ref()
            .map_or(false, |g| g.deadline.is_expired(now));
        if expired {
            info!("Game time is up");
            self.end()?;
        }
        Ok(expired)
    }

    /// Time left in the running game
    pub fn time_remaining(&self, now: Instant) -> Option<Duration> {
        self.state.game.as_ref().map(|g| g.deadline.remaining(now))
    }

    /// One line summary for the operator log
    pub fn status(&self, now: Instant) -> String {
        match &self.state.game {
            Some(game) => format!(
                "Game in progress: {}s left, {} caught of {} ({:?} elapsed)",
                game.deadline.remaining(now).as_secs(),
                self.state.caught.len(),
                game.assignments.len(),
                game.clock.elapsed(now),
            ),
            None => format!("Waiting for devices: {} recognized", self.state.roster.len()),
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

    fn coordinator(rules: Rules) -> (Coordinator, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Coordinator::new(rules, tx), rx)
    }

    fn rules(runners: u32, taggers: u32, beacons: u32) -> Rules {
        Rules {
            runners,
            taggers,
            beacons,
            duration_secs: 60,
        }
    }

    fn recognize(c: &mut Coordinator, ids: &[&str]) {
        for id in ids {
            c.handle_message(&Message::Recognize {
                device: id.to_string(),
            })
            .unwrap();
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<Message> {
        let mut out = Vec::new();
        while let Ok(m) = rx.try_recv() {
            out.push(m);
        }
        out
    }

    fn assign(device: &str, role: RoleKind) -> Message {
        Message::Assign {
            device: device.into(),
            role,
        }
    }

    #[test]
    fn test_roster_merge_is_idempotent() {
        let (mut c, _rx) = coordinator(Rules::default());
        recognize(&mut c, &["b", "a", "b", "c", "a"]);
        assert_eq!(c.state().roster, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_start_pairs_roles_in_order() {
        let (mut c, mut rx) = coordinator(rules(1, 1, 1));
        recognize(&mut c, &["A", "B", "C"]);
        c.start(Instant::now()).unwrap();

        assert_eq!(
            drain(&mut rx),
            vec![
                assign("A", RoleKind::Runner),
                assign("B", RoleKind::Tagger),
                assign("C", RoleKind::Beacon),
                Message::Game(GameSignal::Start),
            ]
        );

        c.end().unwrap();
        assert!(c.state().roster.is_empty());
        assert_eq!(drain(&mut rx), vec![Message::Game(GameSignal::End)]);
    }

    #[test]
    fn test_start_truncates_to_shorter_list() {
        let (mut c, mut rx) = coordinator(rules(2, 1, 0));
        recognize(&mut c, &["A", "B"]);
        c.start(Instant::now()).unwrap();
        assert_eq!(
            drain(&mut rx),
            vec![
                assign("A", RoleKind::Runner),
                assign("B", RoleKind::Runner),
                Message::Game(GameSignal::Start),
            ]
        );

        c.end().unwrap();
        drain(&mut rx);
        recognize(&mut c, &["A", "B", "C", "D", "E"]);
        c.start(Instant::now()).unwrap();
        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 4);
        assert_eq!(c.state().game.as_ref().unwrap().assignments.len(), 3);
    }

    #[test]
    fn test_start_with_empty_roster_still_signals() {
        let (mut c, mut rx) = coordinator(Rules::default());
        c.start(Instant::now()).unwrap();
        assert_eq!(drain(&mut rx), vec![Message::Game(GameSignal::Start)]);
    }

    #[test]
    fn test_start_rejected_while_active() {
        let (mut c, mut rx) = coordinator(Rules::default());
        recognize(&mut c, &["A"]);
        c.start(Instant::now()).unwrap();
        drain(&mut rx);

        assert!(matches!(c.start(Instant::now()), Err(Error::InvalidState(_))));
        assert!(drain(&mut rx).is_empty());
        assert!(c.set_rules(rules(2, 2, 2)).is_err());
    }

    #[test]
    fn test_cycle_rule_between_games() {
        let (mut c, mut rx) = coordinator(rules(8, 1, 8));
        c.cycle_rule(RuleField::Runners).unwrap();
        c.cycle_rule(RuleField::Beacons).unwrap();
        c.cycle_rule(RuleField::DurationMinutes).unwrap();
        assert_eq!(
            c.rules(),
            &Rules {
                runners: 1,
                taggers: 1,
                beacons: 0,
                duration_secs: 120,
            }
        );

        recognize(&mut c, &["A", "B"]);
        c.start(Instant::now()).unwrap();
        drain(&mut rx);
        assert!(matches!(
            c.cycle_rule(RuleField::Taggers),
            Err(Error::InvalidState(_))
        ));
        assert_eq!(c.rules().taggers, 1);
    }

    #[test]
    fn test_duration_expiry_ends_game() {
        let (mut c, mut rx) = coordinator(rules(1, 1, 0));
        recognize(&mut c, &["A", "B"]);
        let start = Instant::now();
        c.start(start).unwrap();
        drain(&mut rx);

        assert_eq!(
            c.time_remaining(start + Duration::from_secs(15)),
            Some(Duration::from_secs(45))
        );
        assert!(!c.tick(start + Duration::from_secs(59)).unwrap());
        assert!(c.tick(start + Duration::from_secs(60)).unwrap());
        assert_eq!(drain(&mut rx), vec![Message::Game(GameSignal::End)]);
        assert!(!c.is_active());
        assert_eq!(c.time_remaining(start + Duration::from_secs(61)), None);
        assert!(!c.tick(start + Duration::from_secs(120)).unwrap());
    }

    #[test]
    fn test_caught_set_tracks_traffic() {
        let (mut c, _rx) = coordinator(rules(2, 1, 1));
        recognize(&mut c, &["r1", "r2", "t", "b"]);

        // ignored outside a game
        c.handle_message(&Message::Caught { device: "r1".into() }).unwrap();
        assert!(c.state().caught.is_empty());

        c.start(Instant::now()).unwrap();
        c.handle_message(&Message::Caught { device: "r1".into() }).unwrap();
        c.handle_message(&Message::Caught { device: "r2".into() }).unwrap();
        c.handle_message(&Message::Caught { device: "r1".into() }).unwrap();
        assert_eq!(c.state().caught.len(), 2);

        c.handle_message(&Message::Saved {
            runner: "r1".into(),
            beacon: "b".into(),
        })
        .unwrap();
        assert_eq!(c.state().caught.iter().collect::<Vec<_>>(), vec!["r2"]);
        assert!(c.status(Instant::now()).contains("1 caught of 4"));
    }

    #[test]
    fn test_toggle_and_late_join() {
        let (mut c, mut rx) = coordinator(rules(1, 1, 0));
        recognize(&mut c, &["A"]);
        let now = Instant::now();
        c.toggle(now).unwrap();
        assert!(c.is_active());

        // late arrivals join the roster for the next game only
        recognize(&mut c, &["B"]);
        assert_eq!(c.state().game.as_ref().unwrap().assignments.len(), 1);

        c.toggle(now).unwrap();
        assert!(!c.is_active());
        assert!(c.status(now).contains("0 recognized"));
        assert_eq!(drain(&mut rx).last(), Some(&Message::Game(GameSignal::End)));
    }
}
