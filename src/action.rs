use std::time::Instant;

use serde::Deserialize;

use crate::{
    gesture,
    types::{Action, Decision, GestureSymbol, HandObservation, Handedness},
};

const IDLE_NO_HANDS: f32 = 0.0;
const IDLE_WITH_HANDS: f32 = 0.3;
const UNCLASSIFIED_HANDS: f32 = 0.5;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ConfidencePolicy {
    /// Literal constants for every row of the table.
    #[default]
    Fixed,
    /// Idle confidence follows the share of hands that produced a gesture.
    HandAgreement,
}

#[derive(Clone, Copy, Debug)]
enum Pattern {
    Any,
    Is(GestureSymbol),
}

impl Pattern {
    fn matches(self, symbol: GestureSymbol) -> bool {
        match self {
            Pattern::Any => true,
            Pattern::Is(expected) => expected == symbol,
        }
    }
}

struct Rule {
    left: Pattern,
    right: Pattern,
    action: Action,
    confidence: f32,
}

// Order matters: the first matching row wins, so both-hand rows come first.
const RULES: &[Rule] = &[
    Rule {
        left: Pattern::Is(GestureSymbol::Fist),
        right: Pattern::Is(GestureSymbol::Fist),
        action: Action::Boxing,
        confidence: 1.0,
    },
    Rule {
        left: Pattern::Is(GestureSymbol::Open),
        right: Pattern::Is(GestureSymbol::Open),
        action: Action::Dance,
        confidence: 1.0,
    },
    Rule {
        left: Pattern::Is(GestureSymbol::Fist),
        right: Pattern::Any,
        action: Action::PunchLeft,
        confidence: 0.85,
    },
    Rule {
        left: Pattern::Any,
        right: Pattern::Is(GestureSymbol::Fist),
        action: Action::PunchRight,
        confidence: 0.85,
    },
    Rule {
        left: Pattern::Is(GestureSymbol::Open),
        right: Pattern::Any,
        action: Action::KickLeft,
        confidence: 0.85,
    },
    Rule {
        left: Pattern::Any,
        right: Pattern::Is(GestureSymbol::Open),
        action: Action::KickRight,
        confidence: 0.85,
    },
];

fn match_rule(left: GestureSymbol, right: GestureSymbol) -> Option<(Action, f32)> {
    RULES
        .iter()
        .find(|rule| rule.left.matches(left) && rule.right.matches(right))
        .map(|rule| (rule.action, rule.confidence))
}

/// Canonical table lookup with the fixed idle constants.
pub fn resolve(left: GestureSymbol, right: GestureSymbol, hands_present: usize) -> (Action, f32) {
    match_rule(left, right).unwrap_or_else(|| {
        let confidence = if hands_present == 0 {
            IDLE_NO_HANDS
        } else {
            IDLE_WITH_HANDS
        };
        (Action::Idle, confidence)
    })
}

/// Fraction of detected hands that produced a gesture; 0.5 when hands are
/// present but none was classified.
pub fn hand_agreement(classified: usize, hands_present: usize) -> f32 {
    if hands_present == 0 {
        0.0
    } else if classified == 0 {
        UNCLASSIFIED_HANDS
    } else {
        (classified as f32 / hands_present as f32).clamp(0.0, 1.0)
    }
}

#[derive(Clone, Debug, Default)]
pub struct ActionResolver {
    policy: ConfidencePolicy,
}

impl ActionResolver {
    pub fn new(policy: ConfidencePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> ConfidencePolicy {
        self.policy
    }

    pub fn resolve(
        &self,
        left: GestureSymbol,
        right: GestureSymbol,
        hands_present: usize,
        classified: usize,
    ) -> (Action, f32) {
        match self.policy {
            ConfidencePolicy::Fixed => resolve(left, right, hands_present),
            ConfidencePolicy::HandAgreement => match_rule(left, right)
                .unwrap_or((Action::Idle, hand_agreement(classified, hands_present))),
        }
    }

    /// Classifies every observed hand and folds them into one decision.
    /// Unlabelled hands count towards `hands_present` only; a repeated side
    /// keeps the last hand seen.
    pub fn decide(&self, hands: &[HandObservation], timestamp: Instant) -> Decision {
        let mut left = GestureSymbol::None;
        let mut right = GestureSymbol::None;
        let mut classified = 0;

        for hand in hands {
            let slot = match hand.side {
                Handedness::Left => &mut left,
                Handedness::Right => &mut right,
                Handedness::Unknown => continue,
            };
            let symbol = gesture::classify(hand);
            if !symbol.is_none() {
                classified += 1;
            }
            *slot = symbol;
        }

        let (action, confidence) = self.resolve(left, right, hands.len(), classified);

        Decision {
            action,
            left_gesture: left,
            right_gesture: right,
            confidence,
            hands_present: hands.len(),
            timestamp,
        }
    }
}
