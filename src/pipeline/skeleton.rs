use crate::types::{Action, Frame, HandObservation, Handedness};

pub const CONNECTIONS: &[(usize, usize)] = &[
    (0, 1),
    (1, 2),
    (2, 3),
    (3, 4),
    (0, 5),
    (5, 6),
    (6, 7),
    (7, 8),
    (0, 9),
    (9, 10),
    (10, 11),
    (11, 12),
    (0, 13),
    (13, 14),
    (14, 15),
    (15, 16),
    (0, 17),
    (17, 18),
    (18, 19),
    (19, 20),
    (5, 9),
    (9, 13),
    (13, 17),
];

pub const FINGERTIPS: [usize; 5] = [4, 8, 12, 16, 20];

pub const SKELETON_LINE_THICKNESS: i32 = 2;
const JOINT_RADIUS: i32 = 5;
const TIP_RADIUS: i32 = 8;
const LABEL_OFFSET: (i32, i32) = (-30, 30);
const LABEL_SCALE: i32 = 2;
const BADGE_ORIGIN: (i32, i32) = (8, 8);
const BADGE_SIZE: i32 = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HandPalette {
    pub line: [u8; 4],
    pub joint: [u8; 4],
    pub tip: [u8; 4],
}

const LEFT_PALETTE: HandPalette = HandPalette {
    line: [0, 255, 0, 255],
    joint: [0, 200, 0, 255],
    tip: [255, 255, 0, 255],
};

const RIGHT_PALETTE: HandPalette = HandPalette {
    line: [0, 0, 255, 255],
    joint: [0, 0, 200, 255],
    tip: [255, 0, 255, 255],
};

pub fn palette(side: Handedness) -> HandPalette {
    match side {
        Handedness::Left => LEFT_PALETTE,
        // Unlabelled hands are drawn like right hands.
        Handedness::Right | Handedness::Unknown => RIGHT_PALETTE,
    }
}

/// Draws every hand onto the frame in place and returns how many were drawn.
pub fn annotate(frame: &mut Frame, hands: &[HandObservation]) -> usize {
    let (width, height) = (frame.width, frame.height);
    let mut drawn = 0;
    for hand in hands {
        if hand.landmarks.is_empty() {
            continue;
        }
        let points: Vec<(f32, f32)> = hand
            .landmarks
            .iter()
            .map(|lm| (lm.x * width as f32, lm.y * height as f32))
            .collect();
        draw_hand(&mut frame.rgba, width, height, &points, hand.side);
        drawn += 1;
    }
    drawn
}

/// Square swatch in the action's accent colour, top-left of the frame.
pub fn draw_action_badge(frame: &mut Frame, action: Action) {
    let (width, height) = (frame.width, frame.height);
    let color = action.accent();
    for y in BADGE_ORIGIN.1..BADGE_ORIGIN.1 + BADGE_SIZE {
        for x in BADGE_ORIGIN.0..BADGE_ORIGIN.0 + BADGE_SIZE {
            put_pixel_safe(&mut frame.rgba, width, height, x, y, color);
        }
    }
}

pub fn draw_hand(
    buffer: &mut [u8],
    width: u32,
    height: u32,
    points: &[(f32, f32)],
    side: Handedness,
) {
    let colors = palette(side);

    for &(a, b) in CONNECTIONS {
        if let (Some(pa), Some(pb)) = (points.get(a), points.get(b)) {
            draw_line(
                buffer,
                width,
                height,
                pa,
                pb,
                colors.line,
                SKELETON_LINE_THICKNESS,
            );
        }
    }

    for (idx, &(x, y)) in points.iter().enumerate() {
        let (color, radius) = if FINGERTIPS.contains(&idx) {
            (colors.tip, TIP_RADIUS)
        } else {
            (colors.joint, JOINT_RADIUS)
        };
        draw_circle(buffer, width, height, (x as i32, y as i32), radius, color);
    }

    if let Some(&(wx, wy)) = points.first() {
        draw_text(
            buffer,
            width,
            height,
            (wx as i32 + LABEL_OFFSET.0, wy as i32 + LABEL_OFFSET.1),
            side.label(),
            colors.line,
            LABEL_SCALE,
        );
    }
}

fn draw_line(
    buffer: &mut [u8],
    width: u32,
    height: u32,
    p0: &(f32, f32),
    p1: &(f32, f32),
    color: [u8; 4],
    thickness: i32,
) {
    let (mut x0, mut y0) = (p0.0 as i32, p0.1 as i32);
    let (x1, y1) = (p1.0 as i32, p1.1 as i32);
    let dx = (x1 - x0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let dy = -(y1 - y0).abs();
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    let radius = thickness.max(1) / 2;

    loop {
        for ox in -radius..=radius {
            for oy in -radius..=radius {
                if ox.abs() + oy.abs() <= radius {
                    put_pixel_safe(buffer, width, height, x0 + ox, y0 + oy, color);
                }
            }
        }
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

fn draw_circle(
    buffer: &mut [u8],
    width: u32,
    height: u32,
    center: (i32, i32),
    radius: i32,
    color: [u8; 4],
) {
    let (cx, cy) = center;
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy <= radius * radius {
                put_pixel_safe(buffer, width, height, cx + dx, cy + dy, color);
            }
        }
    }
}

const GLYPH_WIDTH: i32 = 5;
const GLYPH_HEIGHT: i32 = 7;

/// 5x7 rows, most significant of the low five bits is the leftmost column.
fn glyph(c: char) -> Option<[u8; GLYPH_HEIGHT as usize]> {
    let rows = match c.to_ascii_uppercase() {
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'N' => [0x11, 0x19, 0x15, 0x13, 0x11, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        _ => return None,
    };
    Some(rows)
}

fn draw_text(
    buffer: &mut [u8],
    width: u32,
    height: u32,
    origin: (i32, i32),
    text: &str,
    color: [u8; 4],
    scale: i32,
) {
    let advance = (GLYPH_WIDTH + 1) * scale;
    for (i, c) in text.chars().enumerate() {
        let Some(rows) = glyph(c) else {
            continue;
        };
        let left = origin.0 + i as i32 * advance;
        for (row, bits) in rows.iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if bits & (1 << (GLYPH_WIDTH - 1 - col)) == 0 {
                    continue;
                }
                for sy in 0..scale {
                    for sx in 0..scale {
                        put_pixel_safe(
                            buffer,
                            width,
                            height,
                            left + col * scale + sx,
                            origin.1 + row as i32 * scale + sy,
                            color,
                        );
                    }
                }
            }
        }
    }
}

fn put_pixel_safe(buffer: &mut [u8], width: u32, height: u32, x: i32, y: i32, color: [u8; 4]) {
    if x < 0 || y < 0 {
        return;
    }
    let (ux, uy) = (x as u32, y as u32);
    if ux >= width || uy >= height {
        return;
    }
    let idx = ((uy * width + ux) as usize) * 4;
    if idx + 3 < buffer.len() {
        buffer[idx..idx + 4].copy_from_slice(&color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gesture::tests::open;
    use crate::types::{Landmark, NUM_LANDMARKS};

    #[test]
    fn every_label_has_glyphs() {
        for side in [Handedness::Left, Handedness::Right, Handedness::Unknown] {
            assert!(side.label().chars().all(|c| glyph(c).is_some()), "{side:?}");
        }
    }

    #[test]
    fn draws_tip_and_line_colours_for_left_hand() {
        let mut frame = Frame::blank(100, 100);
        let mut hand = open(Handedness::Left);
        // Spread the points so tips do not overlap the wrist.
        for (i, lm) in hand.landmarks.iter_mut().enumerate() {
            lm.x = 0.1 + i as f32 * 0.04;
        }
        let drawn = annotate(&mut frame, &[hand.clone()]);
        assert_eq!(drawn, 1);

        let tip = hand.landmarks[8];
        let (tx, ty) = ((tip.x * 100.0) as u32, (tip.y * 100.0) as u32);
        assert_eq!(frame.pixel(tx, ty), Some(LEFT_PALETTE.tip));
    }

    #[test]
    fn badge_uses_action_accent_and_clips() {
        let mut frame = Frame::blank(40, 30);
        draw_action_badge(&mut frame, Action::Boxing);
        assert_eq!(frame.pixel(8, 8), Some(Action::Boxing.accent()));
        assert_eq!(frame.pixel(23, 23), Some(Action::Boxing.accent()));
        assert_eq!(frame.pixel(24, 24), Some([0, 0, 0, 255]));

        let mut tiny = Frame::blank(10, 10);
        draw_action_badge(&mut tiny, Action::Idle);
        assert_eq!(tiny.rgba.len(), 10 * 10 * 4);
        assert_eq!(tiny.pixel(9, 9), Some(Action::Idle.accent()));
    }

    #[test]
    fn right_and_unknown_share_palette() {
        assert_eq!(palette(Handedness::Unknown), palette(Handedness::Right));
        assert_ne!(palette(Handedness::Left), palette(Handedness::Right));
    }

    #[test]
    fn drawing_near_edges_is_clipped() {
        let mut frame = Frame::blank(16, 12);
        let hand = HandObservation {
            landmarks: vec![Landmark::new(1.2, -0.3, 0.0); NUM_LANDMARKS],
            side: Handedness::Right,
        };
        annotate(&mut frame, &[hand]);
        assert_eq!(frame.rgba.len(), 16 * 12 * 4);
    }

    #[test]
    fn empty_hands_leave_frame_untouched() {
        let mut frame = Frame::blank(8, 8);
        let before = frame.rgba.clone();
        let hand = HandObservation {
            landmarks: Vec::new(),
            side: Handedness::Left,
        };
        assert_eq!(annotate(&mut frame, &[hand]), 0);
        assert_eq!(frame.rgba, before);
    }
}
