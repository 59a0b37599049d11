//! Transition decisions.

use serde::{Deserialize, Serialize};

use crate::geofence::{Geofence, Polarity};
use crate::location::Location;

/// Direction of a containment change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// outside → inside
    Enter,
    /// inside → outside
    Exit,
}

impl Direction {
    /// Past-tense verb used in alert text.
    #[must_use]
    pub const fn verb(self) -> &'static str {
        match self {
            Self::Enter => "Entered",
            Self::Exit => "Exited",
        }
    }

    /// The direction a region of this polarity alerts on.
    #[must_use]
    pub const fn alerting_for(polarity: Polarity) -> Self {
        match polarity {
            Polarity::Positive => Self::Enter,
            Polarity::Negative => Self::Exit,
        }
    }
}

/// What one evaluation of a pair means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// No prior state for this pair (or the region changed): record only.
    Baseline,
    /// Containment unchanged.
    Unchanged,
    /// Containment changed in the direction the region ignores.
    Silent(Direction),
    /// Containment changed in the direction the region alerts on.
    Alert(Direction),
}

/// Decides the outcome for one pair given its previous and current containment.
#[must_use]
pub const fn decide(polarity: Polarity, previous: Option<bool>, inside: bool) -> Decision {
    let Some(was_inside) = previous else {
        return Decision::Baseline;
    };
    if was_inside == inside {
        return Decision::Unchanged;
    }

    let direction = if inside { Direction::Enter } else { Direction::Exit };
    match (polarity, direction) {
        (Polarity::Positive, Direction::Enter) | (Polarity::Negative, Direction::Exit) => {
            Decision::Alert(direction)
        }
        _ => Decision::Silent(direction),
    }
}

/// An alert-worthy transition raised by the detector.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    /// Device record that produced the transition.
    pub location: Location,
    /// Region version the transition was evaluated against.
    pub geofence: Geofence,
    /// Entry or exit.
    pub direction: Direction,
}
