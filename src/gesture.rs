use crate::types::{GestureSymbol, HandObservation, Landmark, NUM_LANDMARKS};

/// (tip, pip) landmark indices for index, middle, ring and pinky.
/// The thumb never takes part in the fist/open test.
const FINGERS: [(usize, usize); 4] = [(8, 6), (12, 10), (16, 14), (20, 18)];

pub fn classify(hand: &HandObservation) -> GestureSymbol {
    classify_landmarks(&hand.landmarks)
}

pub fn classify_landmarks(points: &[Landmark]) -> GestureSymbol {
    if points.len() < NUM_LANDMARKS {
        return GestureSymbol::None;
    }

    // Image y grows downwards: a curled finger has its tip below the PIP joint.
    if FINGERS.iter().all(|&(tip, pip)| points[tip].y > points[pip].y) {
        GestureSymbol::Fist
    } else if FINGERS.iter().all(|&(tip, pip)| points[tip].y < points[pip].y) {
        GestureSymbol::Open
    } else {
        GestureSymbol::None
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::Handedness;

    /// Synthetic hand with every landmark at y=0.5 except the four non-thumb tips.
    pub(crate) fn hand_with_tips(tips_y: [f32; 4], side: Handedness) -> HandObservation {
        let mut landmarks = vec![Landmark::new(0.5, 0.5, 0.0); NUM_LANDMARKS];
        for (&(tip, _), y) in FINGERS.iter().zip(tips_y) {
            landmarks[tip].y = y;
        }
        HandObservation { landmarks, side }
    }

    pub(crate) fn fist(side: Handedness) -> HandObservation {
        hand_with_tips([0.9; 4], side)
    }

    pub(crate) fn open(side: Handedness) -> HandObservation {
        hand_with_tips([0.1; 4], side)
    }

    #[test]
    fn too_few_landmarks_is_none() {
        for len in [0, 1, 5, 20] {
            let hand = HandObservation {
                landmarks: vec![Landmark::new(0.5, 0.9, 0.0); len],
                side: Handedness::Left,
            };
            assert_eq!(classify(&hand), GestureSymbol::None, "len {len}");
        }
    }

    #[test]
    fn curled_fingers_make_a_fist() {
        assert_eq!(classify(&fist(Handedness::Right)), GestureSymbol::Fist);
    }

    #[test]
    fn extended_fingers_make_an_open_palm() {
        assert_eq!(classify(&open(Handedness::Left)), GestureSymbol::Open);
    }

    #[test]
    fn mixed_fingers_are_none() {
        let hand = hand_with_tips([0.9, 0.9, 0.1, 0.1], Handedness::Right);
        assert_eq!(classify(&hand), GestureSymbol::None);
    }

    #[test]
    fn thumb_is_ignored() {
        let mut hand = fist(Handedness::Left);
        hand.landmarks[4].y = 0.0;
        assert_eq!(classify(&hand), GestureSymbol::Fist);
    }

    #[test]
    fn tip_level_with_pip_is_neither() {
        let hand = hand_with_tips([0.9, 0.9, 0.9, 0.5], Handedness::Left);
        assert_eq!(classify(&hand), GestureSymbol::None);
    }

    #[test]
    fn extra_landmarks_are_tolerated() {
        let mut hand = open(Handedness::Right);
        hand.landmarks.push(Landmark::new(0.0, 0.0, 0.0));
        assert_eq!(classify(&hand), GestureSymbol::Open);
    }
}
