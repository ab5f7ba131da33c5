//! Derangement generation for the gift draw.
//!
//! Both strategies are total: they always return a mapping in which nobody
//! gives to themselves, as long as the input has at least [`QUORUM`] distinct
//! ids.

use std::collections::{BTreeMap, HashSet};

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{ParticipantId, RosterError, QUORUM};

/// Giver id -> recipient id.
pub type Assignments = BTreeMap<ParticipantId, ParticipantId>;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 1000;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum DrawStrategy {
    /// Shuffle once and chain every participant to the next one, wrapping.
    /// Always yields a single cycle through the whole group.
    #[default]
    Cycle,
    /// Shuffle until no position is fixed, rotating by one if the bound is hit.
    /// Any fixed-point-free permutation is reachable, including several
    /// disjoint cycles.
    Rejection { max_attempts: u32 },
}

pub fn draw<R: Rng + ?Sized>(
    ids: &[ParticipantId],
    strategy: DrawStrategy,
    rng: &mut R,
) -> Result<Assignments, RosterError> {
    if ids.len() < QUORUM {
        return Err(RosterError::InsufficientParticipants {
            required: QUORUM,
            actual: ids.len(),
        });
    }

    let mut seen = HashSet::with_capacity(ids.len());
    for id in ids {
        if !seen.insert(id) {
            return Err(RosterError::DuplicateParticipantId(id.clone()));
        }
    }

    let assignments = match strategy {
        DrawStrategy::Cycle => cycle(ids, rng),
        DrawStrategy::Rejection { max_attempts } => rejection(ids, max_attempts, rng),
    };
    Ok(assignments)
}

fn cycle<R: Rng + ?Sized>(ids: &[ParticipantId], rng: &mut R) -> Assignments {
    let mut order = ids.to_vec();
    order.shuffle(rng);
    rotate(&order)
}

fn rejection<R: Rng + ?Sized>(ids: &[ParticipantId], max_attempts: u32, rng: &mut R) -> Assignments {
    let mut receivers = ids.to_vec();
    for _ in 0..max_attempts {
        receivers.shuffle(rng);
        if ids.iter().zip(&receivers).all(|(giver, receiver)| giver != receiver) {
            return ids.iter().cloned().zip(receivers).collect();
        }
    }
    rotate(ids)
}

/// Each element gives to its successor; the last gives to the first.
fn rotate(order: &[ParticipantId]) -> Assignments {
    order
        .iter()
        .zip(order.iter().cycle().skip(1))
        .map(|(giver, receiver)| (giver.clone(), receiver.clone()))
        .collect()
}
