mod draw;

pub use draw::{draw, Assignments, DrawStrategy, DEFAULT_MAX_ATTEMPTS};

use rand::Rng;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use thiserror::Error;

pub type ParticipantId = String;

/// Minimum number of participants before a draw may happen.
pub const QUORUM: usize = 3;
pub const DEFAULT_ADMIN_PIN: &str = "1234";
pub const MIN_PIN_LEN: usize = 4;
pub const MAX_PIN_LEN: usize = 6;
pub const MAX_NAME_LEN: usize = 30;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Participant {
    pub id: ParticipantId,
    pub name: String,
    pub pin: String,
    pub assigned_to: Option<ParticipantId>,
    pub joined_at: u64,
}

/// Public projection of a participant. Never carries the pin or assignment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParticipantSummary {
    pub id: ParticipantId,
    pub name: String,
}

impl From<&Participant> for ParticipantSummary {
    fn from(p: &Participant) -> Self {
        Self {
            id: p.id.clone(),
            name: p.name.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DrawState {
    pub id: String,
    pub admin_pin: String,
    pub is_drawn: bool,
    pub drawn_at: Option<u64>,
}

impl DrawState {
    pub fn new(id: impl Into<String>, admin_pin: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            admin_pin: admin_pin.into(),
            is_drawn: false,
            drawn_at: None,
        }
    }

    pub fn phase(&self) -> DrawPhase {
        if self.is_drawn {
            DrawPhase::Drawn
        } else {
            DrawPhase::Open
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DrawPhase {
    Open,
    Drawn,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DrawStatus {
    pub phase: DrawPhase,
    pub is_drawn: bool,
    pub drawn_at: Option<u64>,
    pub participant_count: usize,
    pub quorum: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Assignment {
    pub giver: String,
    pub receiver: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Auth,
    State,
    NotFound,
    Integrity,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RosterError {
    #[error("name must not be empty")]
    EmptyName,
    #[error("name must be at most 30 characters")]
    NameTooLong,
    #[error("pin must be 4-6 digits")]
    InvalidPin,
    #[error("new admin pin must be 4-6 digits")]
    WeakNewPin,
    #[error("name already taken")]
    DuplicateName,
    #[error("invalid admin pin")]
    InvalidAdminPin,
    #[error("invalid name or pin")]
    NotFoundOrBadCredentials,
    #[error("draw has already been done")]
    DrawAlreadyDone,
    #[error("draw has not happened yet")]
    DrawNotYetDone,
    #[error("need at least {required} participants, have {actual}")]
    InsufficientParticipants { required: usize, actual: usize },
    #[error("participant not found")]
    NotFound,
    #[error("no assignment found for participant")]
    AssignmentMissing,
    #[error("participant id {0} appears more than once")]
    DuplicateParticipantId(ParticipantId),
}

impl RosterError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RosterError::EmptyName
            | RosterError::NameTooLong
            | RosterError::InvalidPin
            | RosterError::WeakNewPin
            | RosterError::DuplicateName => ErrorKind::Validation,
            RosterError::InvalidAdminPin | RosterError::NotFoundOrBadCredentials => ErrorKind::Auth,
            RosterError::DrawAlreadyDone
            | RosterError::DrawNotYetDone
            | RosterError::InsufficientParticipants { .. } => ErrorKind::State,
            RosterError::NotFound => ErrorKind::NotFound,
            RosterError::AssignmentMissing | RosterError::DuplicateParticipantId(_) => {
                ErrorKind::Integrity
            }
        }
    }
}

/// The participant list together with the singleton draw state.
///
/// Every operation validates first and only mutates once all checks pass, so
/// a returned error always means the roster is unchanged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Roster {
    pub state: DrawState,
    pub participants: Vec<Participant>,
}

impl Roster {
    pub fn new(state: DrawState) -> Self {
        Self {
            state,
            participants: Vec::new(),
        }
    }

    pub fn status(&self) -> DrawStatus {
        DrawStatus {
            phase: self.state.phase(),
            is_drawn: self.state.is_drawn,
            drawn_at: self.state.drawn_at,
            participant_count: self.participants.len(),
            quorum: QUORUM,
        }
    }

    pub fn list_participants(&self) -> Vec<ParticipantSummary> {
        self.participants.iter().map(ParticipantSummary::from).collect()
    }

    pub fn join(
        &mut self,
        id: ParticipantId,
        name: &str,
        pin: &str,
        joined_at: u64,
    ) -> Result<&Participant, RosterError> {
        let name = validate_name(name)?;
        if !valid_pin(pin) {
            return Err(RosterError::InvalidPin);
        }
        if self.state.is_drawn {
            return Err(RosterError::DrawAlreadyDone);
        }
        if self.find_by_name(name).is_some() {
            return Err(RosterError::DuplicateName);
        }
        if self.participants.iter().any(|p| p.id == id) {
            return Err(RosterError::DuplicateParticipantId(id));
        }

        self.participants.push(Participant {
            id,
            name: name.to_string(),
            pin: pin.to_string(),
            assigned_to: None,
            joined_at,
        });
        let index = self.participants.len() - 1;
        Ok(&self.participants[index])
    }

    pub fn remove_participant(&mut self, id: &str, admin_pin: &str) -> Result<Participant, RosterError> {
        self.authorize(admin_pin)?;
        if self.state.is_drawn {
            return Err(RosterError::DrawAlreadyDone);
        }
        let index = self
            .participants
            .iter()
            .position(|p| p.id == id)
            .ok_or(RosterError::NotFound)?;
        Ok(self.participants.remove(index))
    }

    /// Removes everyone. Allowed in either phase; a completed draw is reset.
    pub fn wipe_all(&mut self, admin_pin: &str) -> Result<usize, RosterError> {
        self.authorize(admin_pin)?;
        let removed = self.participants.len();
        self.participants.clear();
        if self.state.is_drawn {
            self.state.is_drawn = false;
            self.state.drawn_at = None;
        }
        Ok(removed)
    }

    pub fn perform_draw<R: Rng + ?Sized>(
        &mut self,
        admin_pin: &str,
        strategy: DrawStrategy,
        rng: &mut R,
        now: u64,
    ) -> Result<(), RosterError> {
        self.authorize(admin_pin)?;
        if self.state.is_drawn {
            return Err(RosterError::DrawAlreadyDone);
        }

        let ids = self.participants.iter().map(|p| p.id.clone()).collect::<Vec<_>>();
        let assignments = draw(&ids, strategy, rng)?;

        // Resolve every recipient before touching the roster.
        let recipients = self
            .participants
            .iter()
            .map(|p| assignments.get(&p.id).cloned().ok_or(RosterError::AssignmentMissing))
            .collect::<Result<Vec<_>, _>>()?;

        for (participant, recipient) in self.participants.iter_mut().zip(recipients) {
            participant.assigned_to = Some(recipient);
        }
        self.state.is_drawn = true;
        self.state.drawn_at = Some(now);
        Ok(())
    }

    pub fn reset_draw(&mut self, admin_pin: &str) -> Result<(), RosterError> {
        self.authorize(admin_pin)?;
        for participant in self.participants.iter_mut() {
            participant.assigned_to = None;
        }
        self.state.is_drawn = false;
        self.state.drawn_at = None;
        Ok(())
    }

    pub fn update_admin_pin(&mut self, old_pin: &str, new_pin: &str) -> Result<(), RosterError> {
        self.authorize(old_pin)?;
        if !valid_pin(new_pin) {
            return Err(RosterError::WeakNewPin);
        }
        self.state.admin_pin = new_pin.to_string();
        Ok(())
    }

    /// Reveals the recipient name for the participant owning `name` + `pin`.
    pub fn check_assignment(&self, name: &str, pin: &str) -> Result<&str, RosterError> {
        let participant = self
            .find_by_name(name.trim())
            .filter(|p| pins_match(&p.pin, pin))
            .ok_or(RosterError::NotFoundOrBadCredentials)?;

        if !self.state.is_drawn {
            return Err(RosterError::DrawNotYetDone);
        }

        self.recipient_of(participant).map(|r| r.name.as_str())
    }

    /// Full giver/receiver listing, admin only.
    pub fn list_assignments(&self, admin_pin: &str) -> Result<Vec<Assignment>, RosterError> {
        self.authorize(admin_pin)?;
        if !self.state.is_drawn {
            return Err(RosterError::DrawNotYetDone);
        }
        self.participants
            .iter()
            .map(|giver| {
                let receiver = self.recipient_of(giver)?;
                Ok(Assignment {
                    giver: giver.name.clone(),
                    receiver: receiver.name.clone(),
                })
            })
            .collect()
    }

    fn authorize(&self, admin_pin: &str) -> Result<(), RosterError> {
        if pins_match(&self.state.admin_pin, admin_pin) {
            Ok(())
        } else {
            Err(RosterError::InvalidAdminPin)
        }
    }

    fn find_by_name(&self, name: &str) -> Option<&Participant> {
        let wanted = name.to_lowercase();
        self.participants.iter().find(|p| p.name.to_lowercase() == wanted)
    }

    fn recipient_of(&self, giver: &Participant) -> Result<&Participant, RosterError> {
        let target = giver.assigned_to.as_ref().ok_or(RosterError::AssignmentMissing)?;
        if *target == giver.id {
            return Err(RosterError::AssignmentMissing);
        }
        self.participants
            .iter()
            .find(|p| &p.id == target)
            .ok_or(RosterError::AssignmentMissing)
    }
}

fn validate_name(name: &str) -> Result<&str, RosterError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(RosterError::EmptyName);
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(RosterError::NameTooLong);
    }
    Ok(name)
}

pub fn valid_pin(pin: &str) -> bool {
    (MIN_PIN_LEN..=MAX_PIN_LEN).contains(&pin.len()) && pin.bytes().all(|b| b.is_ascii_digit())
}

/// Exact, constant-time comparison.
pub fn pins_match(stored: &str, provided: &str) -> bool {
    stored.as_bytes().ct_eq(provided.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_chacha::ChaCha8Rng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    const ADMIN: &str = DEFAULT_ADMIN_PIN;

    fn roster() -> Roster {
        Roster::new(DrawState::new("state", ADMIN))
    }

    fn roster_with(names: &[&str]) -> Roster {
        let mut roster = roster();
        for (i, name) in names.iter().enumerate() {
            roster
                .join(format!("id-{name}"), name, &format!("{:04}", i + 1000), i as u64)
                .unwrap();
        }
        roster
    }

    fn rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(99)
    }

    fn drawn(names: &[&str]) -> Roster {
        let mut roster = roster_with(names);
        roster
            .perform_draw(ADMIN, DrawStrategy::Cycle, &mut rng(), 500)
            .unwrap();
        roster
    }

    #[test]
    fn join_trims_and_rejects_case_insensitive_duplicates() {
        let mut roster = roster();
        let joined = roster.join("a".into(), "  Ana ", "1234", 1).unwrap();
        assert_eq!(joined.name, "Ana");
        assert_eq!(joined.assigned_to, None);

        let err = roster.join("b".into(), "aNA", "9999", 2).unwrap_err();
        assert_eq!(err, RosterError::DuplicateName);
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(roster.participants.len(), 1);
    }

    #[test]
    fn join_validates_name_and_pin() {
        let mut roster = roster();
        assert_eq!(roster.join("a".into(), "   ", "1234", 0).unwrap_err(), RosterError::EmptyName);
        assert_eq!(
            roster.join("a".into(), &"x".repeat(MAX_NAME_LEN + 1), "1234", 0).unwrap_err(),
            RosterError::NameTooLong
        );
        for pin in ["123", "1234567", "12a4", ""] {
            assert_eq!(roster.join("a".into(), "Ana", pin, 0).unwrap_err(), RosterError::InvalidPin);
        }
        assert!(roster.join("a".into(), "Ana", "123456", 0).is_ok());
    }

    #[test]
    fn join_rejected_after_draw() {
        let mut roster = drawn(&["Ana", "Luis", "Marta"]);
        let err = roster.join("d".into(), "Dora", "1234", 9).unwrap_err();
        assert_eq!(err, RosterError::DrawAlreadyDone);
        assert_eq!(err.kind(), ErrorKind::State);
        assert_eq!(roster.participants.len(), 3);
    }

    #[test]
    fn list_participants_keeps_join_order() {
        let roster = roster_with(&["Ana", "Luis", "Marta"]);
        let names: Vec<_> = roster.list_participants().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["Ana", "Luis", "Marta"]);
    }

    #[test]
    fn draw_requires_quorum_and_leaves_state_untouched() {
        let mut roster = roster_with(&["Ana", "Luis"]);
        let before = roster.clone();
        let err = roster
            .perform_draw(ADMIN, DrawStrategy::Cycle, &mut rng(), 1)
            .unwrap_err();
        assert_eq!(
            err,
            RosterError::InsufficientParticipants {
                required: QUORUM,
                actual: 2
            }
        );
        assert_eq!(roster, before);
    }

    #[test]
    fn draw_assigns_everyone_and_marks_drawn() {
        let roster = drawn(&["Ana", "Luis", "Marta", "Nico"]);
        assert!(roster.state.is_drawn);
        assert_eq!(roster.state.drawn_at, Some(500));
        assert_eq!(roster.status().phase, DrawPhase::Drawn);

        let ids: HashSet<_> = roster.participants.iter().map(|p| p.id.clone()).collect();
        let mut receivers = HashSet::new();
        for p in &roster.participants {
            let to = p.assigned_to.clone().unwrap();
            assert_ne!(to, p.id);
            assert!(ids.contains(&to));
            receivers.insert(to);
        }
        assert_eq!(receivers, ids);
    }

    #[test]
    fn second_draw_rejected_until_reset() {
        let mut roster = drawn(&["Ana", "Luis", "Marta"]);
        let err = roster
            .perform_draw(ADMIN, DrawStrategy::Cycle, &mut rng(), 2)
            .unwrap_err();
        assert_eq!(err, RosterError::DrawAlreadyDone);

        roster.reset_draw(ADMIN).unwrap();
        assert!(!roster.state.is_drawn);
        assert_eq!(roster.state.drawn_at, None);
        assert!(roster.participants.iter().all(|p| p.assigned_to.is_none()));

        roster
            .perform_draw(ADMIN, DrawStrategy::Rejection { max_attempts: DEFAULT_MAX_ATTEMPTS }, &mut rng(), 3)
            .unwrap();
        assert!(roster.participants.iter().all(|p| p.assigned_to.is_some()));
    }

    #[test]
    fn wrong_admin_pin_changes_nothing() {
        let mut roster = drawn(&["Ana", "Luis", "Marta"]);
        let before = roster.clone();
        let id = roster.participants[0].id.clone();

        let errors = vec![
            roster.remove_participant(&id, "0000").unwrap_err(),
            roster.wipe_all("0000").unwrap_err(),
            roster.reset_draw("12345").unwrap_err(),
            roster.update_admin_pin("123", "5678").unwrap_err(),
            roster.list_assignments("0000").unwrap_err(),
        ];
        for err in errors {
            assert_eq!(err, RosterError::InvalidAdminPin);
            assert_eq!(err.kind(), ErrorKind::Auth);
        }
        assert_eq!(roster, before);

        let mut open = roster_with(&["Ana", "Luis", "Marta"]);
        let before = open.clone();
        let err = open
            .perform_draw("4321", DrawStrategy::Cycle, &mut rng(), 1)
            .unwrap_err();
        assert_eq!(err, RosterError::InvalidAdminPin);
        assert_eq!(open, before);
    }

    #[test]
    fn remove_participant_only_while_open() {
        let mut roster = roster_with(&["Ana", "Luis", "Marta"]);
        let removed = roster.remove_participant("id-Luis", ADMIN).unwrap();
        assert_eq!(removed.name, "Luis");
        assert_eq!(roster.participants.len(), 2);
        assert_eq!(
            roster.remove_participant("id-Luis", ADMIN).unwrap_err(),
            RosterError::NotFound
        );

        let mut roster = drawn(&["Ana", "Luis", "Marta"]);
        assert_eq!(
            roster.remove_participant("id-Ana", ADMIN).unwrap_err(),
            RosterError::DrawAlreadyDone
        );
    }

    #[test]
    fn wipe_clears_everyone_and_reopens() {
        let mut roster = drawn(&["Ana", "Luis", "Marta"]);
        assert_eq!(roster.wipe_all(ADMIN).unwrap(), 3);
        assert!(roster.participants.is_empty());
        assert!(!roster.state.is_drawn);
        assert_eq!(roster.state.drawn_at, None);
        assert_eq!(roster.state.admin_pin, ADMIN);
        assert!(roster.join("n".into(), "Nico", "2222", 1).is_ok());
    }

    #[test]
    fn update_admin_pin_checks_old_and_strength() {
        let mut roster = roster();
        assert_eq!(roster.update_admin_pin(ADMIN, "12").unwrap_err(), RosterError::WeakNewPin);
        assert_eq!(roster.update_admin_pin(ADMIN, "abcd").unwrap_err(), RosterError::WeakNewPin);
        roster.update_admin_pin(ADMIN, "9876").unwrap();
        assert_eq!(roster.wipe_all(ADMIN).unwrap_err(), RosterError::InvalidAdminPin);
        assert!(roster.wipe_all("9876").is_ok());
    }

    #[test]
    fn admin_pin_is_exact_match() {
        let mut roster = roster();
        roster.update_admin_pin(ADMIN, "123456").unwrap();
        for attempt in ["1234", "12345", "1234567", " 123456", ""] {
            assert_eq!(roster.reset_draw(attempt).unwrap_err(), RosterError::InvalidAdminPin);
        }
        assert!(roster.reset_draw("123456").is_ok());
    }

    #[test]
    fn check_assignment_before_draw() {
        let roster = roster_with(&["Ana", "Luis", "Marta"]);
        assert_eq!(
            roster.check_assignment("ana", "1000").unwrap_err(),
            RosterError::DrawNotYetDone
        );
        assert_eq!(
            roster.check_assignment("Ana", "9999").unwrap_err(),
            RosterError::NotFoundOrBadCredentials
        );
        assert_eq!(
            roster.check_assignment("Nobody", "1000").unwrap_err(),
            RosterError::NotFoundOrBadCredentials
        );
    }

    #[test]
    fn check_assignment_returns_recipient_name() {
        let roster = drawn(&["Ana", "Luis", "Marta"]);
        let mut seen = HashSet::new();
        for (i, p) in roster.participants.iter().enumerate() {
            let pin = format!("{:04}", i + 1000);
            let recipient = roster.check_assignment(&p.name.to_uppercase(), &pin).unwrap();
            let expected = roster
                .participants
                .iter()
                .find(|r| Some(&r.id) == p.assigned_to.as_ref())
                .unwrap();
            assert_eq!(recipient, expected.name);
            assert_ne!(recipient, p.name);
            seen.insert(recipient.to_string());
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn missing_assignment_is_an_integrity_error() {
        let mut roster = drawn(&["Ana", "Luis", "Marta"]);
        roster.participants[1].assigned_to = None;
        let err = roster.check_assignment("Luis", "1001").unwrap_err();
        assert_eq!(err, RosterError::AssignmentMissing);
        assert_eq!(err.kind(), ErrorKind::Integrity);
        assert_eq!(roster.list_assignments(ADMIN).unwrap_err(), RosterError::AssignmentMissing);
    }

    #[test]
    fn list_assignments_for_admin() {
        let roster = roster_with(&["Ana", "Luis", "Marta"]);
        assert_eq!(roster.list_assignments(ADMIN).unwrap_err(), RosterError::DrawNotYetDone);

        let roster = drawn(&["Ana", "Luis", "Marta"]);
        let listing = roster.list_assignments(ADMIN).unwrap();
        assert_eq!(listing.len(), 3);
        for a in &listing {
            assert_ne!(a.giver, a.receiver);
        }
        let receivers: HashSet<_> = listing.iter().map(|a| a.receiver.as_str()).collect();
        assert_eq!(receivers.len(), 3);
    }

    #[test]
    fn scenario_draw_reset_and_rejoin() {
        let mut roster = roster_with(&["Ana", "Luis", "Marta"]);
        roster
            .perform_draw(ADMIN, DrawStrategy::Cycle, &mut rng(), 10)
            .unwrap();
        assert!(roster.status().is_drawn);

        let mut recipients = HashSet::new();
        for (i, name) in ["Ana", "Luis", "Marta"].iter().enumerate() {
            let to = roster.check_assignment(name, &format!("{:04}", i + 1000)).unwrap();
            assert_ne!(to, *name);
            recipients.insert(to.to_string());
        }
        assert_eq!(recipients.len(), 3);

        roster.reset_draw(ADMIN).unwrap();
        assert_eq!(roster.status().phase, DrawPhase::Open);
        assert!(roster.join("d".into(), "Dora", "4444", 11).is_ok());
        assert_eq!(roster.status().participant_count, 4);
    }
}
