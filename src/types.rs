use std::time::Instant;

/// Number of landmarks the handpose model produces per hand.
pub const NUM_LANDMARKS: usize = 21;

#[derive(Clone, Debug)]
pub struct Frame {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: Instant,
}

impl Frame {
    pub fn new(rgba: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            rgba,
            width,
            height,
            timestamp: Instant::now(),
        }
    }

    /// Opaque black frame for fake cameras.
    #[cfg(test)]
    pub fn blank(width: u32, height: u32) -> Self {
        let mut rgba = vec![0u8; width as usize * height as usize * 4];
        for px in rgba.chunks_exact_mut(4) {
            px[3] = 255;
        }
        Self::new(rgba, width, height)
    }

    #[cfg(test)]
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * 4;
        self.rgba
            .get(idx..idx + 4)
            .map(|px| [px[0], px[1], px[2], px[3]])
    }
}

/// A tracked point in normalized image coordinates. `z` is a depth proxy.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Landmark {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Handedness {
    Left,
    Right,
    Unknown,
}

impl Handedness {
    pub fn label(&self) -> &'static str {
        match self {
            Handedness::Left => "Left",
            Handedness::Right => "Right",
            Handedness::Unknown => "Unknown",
        }
    }
}

#[derive(Clone, Debug)]
pub struct HandObservation {
    pub landmarks: Vec<Landmark>,
    pub side: Handedness,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GestureSymbol {
    Fist,
    Open,
    None,
}

impl GestureSymbol {
    pub fn label(&self) -> &'static str {
        match self {
            GestureSymbol::Fist => "Fist",
            GestureSymbol::Open => "Open",
            GestureSymbol::None => "None",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, GestureSymbol::None)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Action {
    Idle,
    Dance,
    PunchLeft,
    PunchRight,
    KickLeft,
    KickRight,
    Boxing,
}

impl Action {
    /// Stable identifier, also the animation name.
    pub fn id(&self) -> &'static str {
        match self {
            Action::Idle => "idle",
            Action::Dance => "dance",
            Action::PunchLeft => "punch_left",
            Action::PunchRight => "punch_right",
            Action::KickLeft => "kick_left",
            Action::KickRight => "kick_right",
            Action::Boxing => "boxing",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Action::Idle => "Idle",
            Action::Dance => "Dance",
            Action::PunchLeft => "Left Punch",
            Action::PunchRight => "Right Punch",
            Action::KickLeft => "Left Kick",
            Action::KickRight => "Right Kick",
            Action::Boxing => "Boxing",
        }
    }

    pub fn gesture_hint(&self) -> &'static str {
        match self {
            Action::Idle => "No clear gesture",
            Action::Dance => "Both palms open",
            Action::PunchLeft => "Left fist only",
            Action::PunchRight => "Right fist only",
            Action::KickLeft => "Left palm only",
            Action::KickRight => "Right palm only",
            Action::Boxing => "Both fists",
        }
    }

    pub fn accent(&self) -> [u8; 4] {
        match self {
            Action::Idle => [80, 140, 255, 255],
            Action::Dance => [180, 120, 255, 255],
            Action::PunchLeft | Action::PunchRight => [255, 180, 80, 255],
            Action::KickLeft | Action::KickRight => [80, 220, 230, 255],
            Action::Boxing => [255, 100, 100, 255],
        }
    }
}

#[derive(Clone, Debug)]
pub struct Decision {
    pub action: Action,
    pub left_gesture: GestureSymbol,
    pub right_gesture: GestureSymbol,
    pub confidence: f32,
    pub hands_present: usize,
    pub timestamp: Instant,
}

impl Decision {
    pub fn idle() -> Self {
        Self {
            action: Action::Idle,
            left_gesture: GestureSymbol::None,
            right_gesture: GestureSymbol::None,
            confidence: 0.0,
            hands_present: 0,
            timestamp: Instant::now(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AnnotatedFrame {
    pub frame: Frame,
    pub hands_drawn: usize,
}
