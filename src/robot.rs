use crate::types::{Action, Decision};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

impl ConfidenceLevel {
    pub fn from_confidence(confidence: f32) -> Self {
        if confidence > 0.8 {
            ConfidenceLevel::High
        } else if confidence > 0.5 {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::Low
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConfidenceLevel::High => "high",
            ConfidenceLevel::Medium => "medium",
            ConfidenceLevel::Low => "low",
        }
    }
}

/// Consumer-side view of the robot: the animation currently playing and the
/// decision that selected it.
#[derive(Debug)]
pub struct RobotState {
    animation: Action,
    last: Decision,
}

impl Default for RobotState {
    fn default() -> Self {
        Self::new()
    }
}

impl RobotState {
    pub fn new() -> Self {
        Self {
            animation: Action::Idle,
            last: Decision::idle(),
        }
    }

    /// Records `decision`; returns the action only when the animation has to
    /// switch.
    pub fn apply(&mut self, decision: Decision) -> Option<Action> {
        let action = decision.action;
        self.last = decision;
        if action == self.animation {
            return None;
        }
        self.animation = action;
        Some(action)
    }

    pub fn current(&self) -> Action {
        self.animation
    }

    pub fn confidence_level(&self) -> ConfidenceLevel {
        ConfidenceLevel::from_confidence(self.last.confidence)
    }

    pub fn gesture_summary(&self) -> String {
        let sides: Vec<String> = [
            ("L", self.last.left_gesture),
            ("R", self.last.right_gesture),
        ]
        .into_iter()
        .filter(|(_, gesture)| !gesture.is_none())
        .map(|(side, gesture)| format!("{side}: {}", gesture.label()))
        .collect();

        if sides.is_empty() {
            "No hands detected".to_string()
        } else {
            sides.join(" | ")
        }
    }

    pub fn status_line(&self) -> String {
        format!(
            "{} | {} ({}) | confidence {:.0}% ({})",
            self.gesture_summary(),
            self.last.action.display_name(),
            self.last.action.gesture_hint(),
            self.last.confidence * 100.0,
            self.confidence_level().label()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GestureSymbol;

    fn decision(action: Action, left: GestureSymbol, right: GestureSymbol, confidence: f32) -> Decision {
        Decision {
            action,
            left_gesture: left,
            right_gesture: right,
            confidence,
            hands_present: 2,
            ..Decision::idle()
        }
    }

    #[test]
    fn animation_switches_only_on_change() {
        let mut robot = RobotState::new();
        assert_eq!(robot.apply(Decision::idle()), None);

        let boxing = decision(Action::Boxing, GestureSymbol::Fist, GestureSymbol::Fist, 1.0);
        assert_eq!(robot.apply(boxing.clone()), Some(Action::Boxing));
        assert_eq!(robot.apply(boxing), None);
        assert_eq!(robot.current(), Action::Boxing);

        assert_eq!(robot.apply(Decision::idle()), Some(Action::Idle));
    }

    #[test]
    fn status_line_without_hands() {
        let robot = RobotState::new();
        assert_eq!(robot.gesture_summary(), "No hands detected");
        assert_eq!(
            robot.status_line(),
            "No hands detected | Idle (No clear gesture) | confidence 0% (low)"
        );
    }

    #[test]
    fn status_line_lists_classified_sides() {
        let mut robot = RobotState::new();
        robot.apply(decision(Action::PunchLeft, GestureSymbol::Fist, GestureSymbol::None, 0.85));
        assert_eq!(robot.gesture_summary(), "L: Fist");
        assert_eq!(robot.confidence_level(), ConfidenceLevel::High);

        robot.apply(decision(Action::Idle, GestureSymbol::Fist, GestureSymbol::Open, 0.6));
        assert_eq!(robot.gesture_summary(), "L: Fist | R: Open");
        assert_eq!(robot.confidence_level(), ConfidenceLevel::Medium);
    }

    #[test]
    fn confidence_level_boundaries() {
        assert_eq!(ConfidenceLevel::from_confidence(0.8), ConfidenceLevel::Medium);
        assert_eq!(ConfidenceLevel::from_confidence(0.5), ConfidenceLevel::Low);
        assert_eq!(ConfidenceLevel::from_confidence(0.81), ConfidenceLevel::High);
    }
}
