//! Arena geometry, movement constraints, and interpolation math

use std::f32::consts::{PI, TAU};

pub use glam::Vec2;

/// Side length of the square arena; collidable entities stay in [0, ARENA_SIZE]^2
pub const ARENA_SIZE: f32 = 2000.0;

/// Combatant collision radius
pub const UNIT_RADIUS: f32 = 20.0;

/// Units closer than this are softly pushed apart every tick
pub const MIN_SEPARATION: f32 = 44.0;

/// Per-tick blend factor toward the latest network target
pub const INTERPOLATION_FACTOR: f32 = 0.2;

/// Axis-aligned wall rectangle (top-left origin)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Wall {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl Wall {
    pub const fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    pub fn center(&self) -> Vec2 {
        Vec2::new(self.x + self.w * 0.5, self.y + self.h * 0.5)
    }

    pub fn half_diagonal(&self) -> f32 {
        Vec2::new(self.w, self.h).length() * 0.5
    }

    /// Point inside the rectangle grown by `pad` on every side
    pub fn contains(&self, p: Vec2, pad: f32) -> bool {
        p.x >= self.x - pad
            && p.x <= self.x + self.w + pad
            && p.y >= self.y - pad
            && p.y <= self.y + self.h + pad
    }
}

/// Wall layout and team spawn points for one map id
#[derive(Debug, Clone)]
pub struct ArenaMap {
    pub id: String,
    pub walls: Vec<Wall>,
    pub alpha_spawns: Vec<Vec2>,
    pub bravo_spawns: Vec<Vec2>,
}

impl ArenaMap {
    /// Resolve a map id; unknown ids fall back to `outpost`
    pub fn for_id(id: &str) -> Self {
        let walls = match id {
            "open" => Vec::new(),
            "crossfire" => vec![
                Wall::new(900.0, 300.0, 200.0, 500.0),
                Wall::new(900.0, 1200.0, 200.0, 500.0),
                Wall::new(400.0, 950.0, 350.0, 100.0),
                Wall::new(1250.0, 950.0, 350.0, 100.0),
            ],
            _ => vec![
                Wall::new(500.0, 500.0, 300.0, 60.0),
                Wall::new(1200.0, 1440.0, 300.0, 60.0),
                Wall::new(950.0, 850.0, 100.0, 300.0),
                Wall::new(300.0, 1300.0, 60.0, 300.0),
                Wall::new(1640.0, 400.0, 60.0, 300.0),
            ],
        };
        let id = match id {
            "open" | "crossfire" => id.to_string(),
            _ => "outpost".to_string(),
        };

        Self {
            id,
            walls,
            alpha_spawns: vec![
                Vec2::new(150.0, 150.0),
                Vec2::new(150.0, 400.0),
                Vec2::new(400.0, 150.0),
            ],
            bravo_spawns: vec![
                Vec2::new(1850.0, 1850.0),
                Vec2::new(1850.0, 1600.0),
                Vec2::new(1600.0, 1850.0),
            ],
        }
    }

    pub fn blocked(&self, p: Vec2, pad: f32) -> bool {
        self.walls.iter().any(|w| w.contains(p, pad))
    }
}

/// Physics helpers for movement, collisions, and sight lines
pub struct PhysicsSystem;

impl PhysicsSystem {
    /// Clamp a position into the arena, keeping `radius` clear of the edge
    pub fn clamp_to_arena(p: Vec2, radius: f32) -> Vec2 {
        p.clamp(Vec2::splat(radius), Vec2::splat(ARENA_SIZE - radius))
    }

    pub fn in_arena(p: Vec2) -> bool {
        (0.0..=ARENA_SIZE).contains(&p.x) && (0.0..=ARENA_SIZE).contains(&p.y)
    }

    /// Move by `delta`, sliding along walls one axis at a time, then clamp to bounds
    pub fn move_with_walls(pos: Vec2, delta: Vec2, radius: f32, walls: &[Wall]) -> Vec2 {
        let mut next = pos;

        let try_x = Vec2::new(pos.x + delta.x, pos.y);
        if !walls.iter().any(|w| w.contains(try_x, radius)) {
            next.x = try_x.x;
        }

        let try_y = Vec2::new(next.x, pos.y + delta.y);
        if !walls.iter().any(|w| w.contains(try_y, radius)) {
            next.y = try_y.y;
        }

        Self::clamp_to_arena(next, radius)
    }

    /// Check overlap between two circles
    pub fn check_overlap(a: Vec2, radius_a: f32, b: Vec2, radius_b: f32) -> bool {
        let combined = radius_a + radius_b;
        a.distance_squared(b) <= combined * combined
    }

    /// Swept circle test: does a point moving `from -> to` pass within `radius` of `center`
    pub fn segment_hits_circle(from: Vec2, to: Vec2, center: Vec2, radius: f32) -> bool {
        let d = to - from;
        let len_sq = d.length_squared();
        let t = if len_sq < 1e-9 {
            0.0
        } else {
            ((center - from).dot(d) / len_sq).clamp(0.0, 1.0)
        };
        let closest = from + d * t;
        center.distance_squared(closest) <= radius * radius
    }

    /// Slab test of the segment `from -> to` against a wall rectangle
    pub fn segment_hits_wall(from: Vec2, to: Vec2, wall: &Wall) -> bool {
        let d = to - from;
        let mut t_min = 0.0_f32;
        let mut t_max = 1.0_f32;

        for (origin, dir, lo, hi) in [
            (from.x, d.x, wall.x, wall.x + wall.w),
            (from.y, d.y, wall.y, wall.y + wall.h),
        ] {
            if dir.abs() < 1e-9 {
                if origin < lo || origin > hi {
                    return false;
                }
            } else {
                let inv = 1.0 / dir;
                let mut t1 = (lo - origin) * inv;
                let mut t2 = (hi - origin) * inv;
                if t1 > t2 {
                    std::mem::swap(&mut t1, &mut t2);
                }
                t_min = t_min.max(t1);
                t_max = t_max.min(t2);
                if t_min > t_max {
                    return false;
                }
            }
        }

        true
    }

    /// Clear line of sight when no wall intersects the segment
    pub fn has_line_of_sight(from: Vec2, to: Vec2, walls: &[Wall]) -> bool {
        !walls.iter().any(|w| Self::segment_hits_wall(from, to, w))
    }

    /// Soft separation push for two units closer than `min_distance`.
    /// Returns the displacement to apply to (a, b); zero when far enough apart.
    pub fn separation_push(a: Vec2, b: Vec2, min_distance: f32) -> (Vec2, Vec2) {
        let delta = b - a;
        let dist = delta.length();

        if dist >= min_distance {
            return (Vec2::ZERO, Vec2::ZERO);
        }

        if dist < 0.001 {
            // Same spot, push apart along x
            let half = min_distance * 0.5;
            return (Vec2::new(-half, 0.0), Vec2::new(half, 0.0));
        }

        let normal = delta / dist;
        let push = (min_distance - dist) * 0.5;
        (-normal * push, normal * push)
    }

    /// Linear step from `current` toward `target`
    pub fn lerp(current: Vec2, target: Vec2, factor: f32) -> Vec2 {
        current.lerp(target, factor)
    }

    /// Wrap an angle into (-PI, PI]
    pub fn wrap_angle(angle: f32) -> f32 {
        let wrapped = (angle + PI).rem_euclid(TAU) - PI;
        if wrapped <= -PI {
            wrapped + TAU
        } else {
            wrapped
        }
    }

    /// Angle step toward `target` along the shortest arc
    pub fn lerp_angle(current: f32, target: f32, factor: f32) -> f32 {
        let diff = Self::wrap_angle(target - current);
        Self::wrap_angle(current + diff * factor)
    }
}
