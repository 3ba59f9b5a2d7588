//! Melee hit geometry shared by the authoritative server and any client preview.
//!
//! Every function here is pure. A client that draws an attack must use these
//! exact functions, otherwise the swing it shows will disagree with the hits
//! the server applies.

use crate::geometry::Vector2;
use crate::Direction;
use serde::{Deserialize, Serialize};
use std::f32::consts::{FRAC_PI_2, TAU};

/// Side length of the square sprite every combatant occupies.
pub const SPRITE_SIZE: f32 = 32.0;

/// Axis-aligned rectangle with inclusive edges.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Rect {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

/// Attack reach of a sprite centred on `(cx, cy)` facing `direction`.
///
/// The near edge always sits on the sprite centre line. `expand` moves only
/// the far edge outward, which is how enemies get a longer melee reach than
/// the base sprite.
pub fn hitbox(cx: f32, cy: f32, direction: Direction, expand: f32) -> Rect {
    let half = SPRITE_SIZE / 2.0;
    let reach = SPRITE_SIZE + expand;
    match direction {
        Direction::Up => Rect {
            x1: cx - half,
            y1: cy - reach,
            x2: cx + half,
            y2: cy,
        },
        Direction::Down => Rect {
            x1: cx - half,
            y1: cy,
            x2: cx + half,
            y2: cy + reach,
        },
        Direction::Left => Rect {
            x1: cx - reach,
            y1: cy - half,
            x2: cx,
            y2: cy + half,
        },
        Direction::Right => Rect {
            x1: cx,
            y1: cy - half,
            x2: cx + reach,
            y2: cy + half,
        },
    }
}

pub fn point_in_hitbox(px: f32, py: f32, rect: &Rect) -> bool {
    px >= rect.x1 && px <= rect.x2 && py >= rect.y1 && py <= rect.y2
}

/// Position of a swung weapon `elapsed_ms` into an attack lasting `duration_ms`.
///
/// The weapon starts straight above the attacker and sweeps one full clockwise
/// turn (on a y-down screen) at constant angular velocity.
pub fn weapon_orbit_position(
    center: Vector2,
    radius: f32,
    elapsed_ms: u64,
    duration_ms: u64,
) -> Vector2 {
    let progress = if duration_ms == 0 {
        1.0
    } else {
        (elapsed_ms as f32 / duration_ms as f32).min(1.0)
    };
    let angle = -FRAC_PI_2 + progress * TAU;
    Vector2 {
        x: center.x + radius * angle.cos(),
        y: center.y + radius * angle.sin(),
    }
}

/// Dominant-axis direction of a movement delta. Ties go to the horizontal axis.
pub fn facing_for(delta: Vector2) -> Option<Direction> {
    if delta.x == 0.0 && delta.y == 0.0 {
        return None;
    }
    if delta.x.abs() >= delta.y.abs() {
        Some(if delta.x > 0.0 {
            Direction::Right
        } else {
            Direction::Left
        })
    } else {
        Some(if delta.y > 0.0 {
            Direction::Down
        } else {
            Direction::Up
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    const ALL: [Direction; 4] = [
        Direction::Up,
        Direction::Down,
        Direction::Left,
        Direction::Right,
    ];

    #[test]
    fn test_near_edge_invariant_to_expand() {
        for direction in ALL {
            let base = hitbox(200.0, 200.0, direction, 0.0);
            let grown = hitbox(200.0, 200.0, direction, 16.0);
            match direction {
                Direction::Up => {
                    assert_eq!(base.y2, grown.y2);
                    assert_approx_eq!(base.y1 - grown.y1, 16.0, 1e-6);
                }
                Direction::Down => {
                    assert_eq!(base.y1, grown.y1);
                    assert_approx_eq!(grown.y2 - base.y2, 16.0, 1e-6);
                }
                Direction::Left => {
                    assert_eq!(base.x2, grown.x2);
                    assert_approx_eq!(base.x1 - grown.x1, 16.0, 1e-6);
                }
                Direction::Right => {
                    assert_eq!(base.x1, grown.x1);
                    assert_approx_eq!(grown.x2 - base.x2, 16.0, 1e-6);
                }
            }
        }
    }

    #[test]
    fn test_cross_axis_unchanged_by_expand() {
        let base = hitbox(50.0, 60.0, Direction::Right, 0.0);
        let grown = hitbox(50.0, 60.0, Direction::Right, 40.0);
        assert_eq!(base.y1, grown.y1);
        assert_eq!(base.y2, grown.y2);
    }

    #[test]
    fn test_inclusive_boundaries() {
        let rect = hitbox(100.0, 100.0, Direction::Right, 0.0);
        assert!(point_in_hitbox(rect.x1, 100.0, &rect));
        assert!(point_in_hitbox(rect.x2, 100.0, &rect));
        assert!(!point_in_hitbox(rect.x2 + 1.0, 100.0, &rect));
        assert!(!point_in_hitbox(rect.x1 - 1.0, 100.0, &rect));
        assert!(point_in_hitbox(120.0, rect.y1, &rect));
        assert!(!point_in_hitbox(120.0, rect.y2 + 1.0, &rect));
    }

    #[test]
    fn test_orbit_starts_up_and_turns_clockwise() {
        let center = Vector2::new(0.0, 0.0);
        let start = weapon_orbit_position(center, 40.0, 0, 400);
        assert_approx_eq!(start.x, 0.0, 1e-4);
        assert_approx_eq!(start.y, -40.0, 1e-4);

        let quarter = weapon_orbit_position(center, 40.0, 100, 400);
        assert_approx_eq!(quarter.x, 40.0, 1e-4);
        assert_approx_eq!(quarter.y, 0.0, 1e-4);

        let half = weapon_orbit_position(center, 40.0, 200, 400);
        assert_approx_eq!(half.x, 0.0, 1e-4);
        assert_approx_eq!(half.y, 40.0, 1e-4);
    }

    #[test]
    fn test_orbit_clamps_past_duration() {
        let center = Vector2::new(10.0, 10.0);
        let end = weapon_orbit_position(center, 40.0, 900, 400);
        assert_approx_eq!(end.x, 10.0, 1e-3);
        assert_approx_eq!(end.y, -30.0, 1e-3);
    }

    #[test]
    fn test_facing_for() {
        assert_eq!(facing_for(Vector2::new(5.0, 1.0)), Some(Direction::Right));
        assert_eq!(facing_for(Vector2::new(-5.0, 1.0)), Some(Direction::Left));
        assert_eq!(facing_for(Vector2::new(1.0, -5.0)), Some(Direction::Up));
        assert_eq!(facing_for(Vector2::new(0.0, 3.0)), Some(Direction::Down));
        assert_eq!(facing_for(Vector2::default()), None);
    }
}
