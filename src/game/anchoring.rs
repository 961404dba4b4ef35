//! Swept-segment collision against world bounds, platforms and entity boxes
//!
//! Everything here is pure geometry over a single step `start -> end`. The
//! earliest valid intersection along the step (smallest parametric `t`) wins,
//! and the reported point lies exactly on the surface that was crossed.

use glam::Vec2;

use crate::config::{Floor, WorldConfig};

use super::math::Rect;

/// Below this an axis delta is treated as stationary
const DEGENERATE_DELTA: f32 = 1e-7;

/// What a swept step ran into
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HitSurface {
    LeftWall,
    RightWall,
    /// Index into the configured floor list
    Platform(usize),
    Ground,
    /// Index into the entity box slice passed by the caller
    Entity(usize),
}

/// Earliest intersection along a step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepHit {
    /// Parametric position along the step, 0..=1
    pub t: f32,
    pub point: Vec2,
    pub surface: HitSurface,
}

/// Which axis produced the entry time, with the face coordinate crossed
#[derive(Clone, Copy)]
enum Entry {
    Inside,
    X(f32),
    Y(f32),
}

/// Slab test of the segment `start -> end` against `rect`.
///
/// Returns the entry `t` and point, or `None` when the segment misses or only
/// touches the rectangle outside `0..=1`. An axis with a near-zero delta is
/// checked by static containment instead of division. A segment starting
/// inside the rectangle hits at `t = 0`.
pub fn sweep_rect(start: Vec2, end: Vec2, rect: &Rect) -> Option<(f32, Vec2)> {
    if !start.is_finite() || !end.is_finite() || !rect.is_finite() {
        return None;
    }

    let delta = end - start;
    let mut t_min = 0.0_f32;
    let mut t_max = 1.0_f32;
    let mut entry = Entry::Inside;

    let axes = [
        (start.x, delta.x, rect.left, rect.right, true),
        (start.y, delta.y, rect.top, rect.bottom, false),
    ];
    for (origin, d, min_v, max_v, is_x) in axes {
        if d.abs() <= DEGENERATE_DELTA {
            if origin < min_v || origin > max_v {
                return None;
            }
            continue;
        }
        let (near_face, far_face) = if d > 0.0 { (min_v, max_v) } else { (max_v, min_v) };
        let t_near = (near_face - origin) / d;
        let t_far = (far_face - origin) / d;
        if t_near > t_min {
            t_min = t_near;
            entry = if is_x { Entry::X(near_face) } else { Entry::Y(near_face) };
        }
        t_max = t_max.min(t_far);
        if t_min > t_max {
            return None;
        }
    }

    if !(0.0..=1.0).contains(&t_min) {
        return None;
    }

    let point = match entry {
        Entry::Inside => start,
        Entry::X(face) => Vec2::new(face, start.y + delta.y * t_min),
        Entry::Y(face) => Vec2::new(start.x + delta.x * t_min, face),
    };
    Some((t_min, point))
}

/// Crossing of the vertical line `x = wall_x`, only when the step ends past it
fn sweep_wall(start: Vec2, end: Vec2, wall_x: f32, past: impl Fn(f32) -> bool) -> Option<(f32, Vec2)> {
    if !past(end.x) {
        return None;
    }
    let dx = end.x - start.x;
    let t = if dx.abs() > DEGENERATE_DELTA { (wall_x - start.x) / dx } else { 0.0 };
    let t = t.clamp(0.0, 1.0);
    Some((t, Vec2::new(wall_x, start.y + (end.y - start.y) * t)))
}

/// Downward crossing of the horizontal line `y = line_y`
fn sweep_line_down(start: Vec2, end: Vec2, line_y: f32) -> Option<(f32, Vec2)> {
    let dy = end.y - start.y;
    if dy.abs() <= DEGENERATE_DELTA {
        return None;
    }
    if !(start.y <= line_y && end.y >= line_y) {
        return None;
    }
    let t = ((line_y - start.y) / dy).clamp(0.0, 1.0);
    Some((t, Vec2::new(start.x + (end.x - start.x) * t, line_y)))
}

/// Thickened box of a platform span
pub fn platform_rect(floor: &Floor) -> Rect {
    Rect::from_edges(floor.min_x(), floor.max_x(), floor.y, floor.y + floor.height.max(1.0))
}

/// Test one step against, in order: world walls, platforms, ground, then
/// entity boxes (expanded by `margin`). Earliest `t` wins; ties keep the
/// earlier surface in that order.
pub fn sweep_world(
    start: Vec2,
    end: Vec2,
    world: &WorldConfig,
    entities: &[Rect],
    margin: f32,
) -> Option<SweepHit> {
    if !start.is_finite() || !end.is_finite() {
        return None;
    }

    let mut best: Option<SweepHit> = None;
    let mut consider = |candidate: Option<(f32, Vec2)>, surface: HitSurface| {
        if let Some((t, point)) = candidate {
            if best.map_or(true, |b| t < b.t) {
                best = Some(SweepHit { t, point, surface });
            }
        }
    };

    let max_x = world.width.max(0.0);
    consider(sweep_wall(start, end, 0.0, |x| x <= 0.0), HitSurface::LeftWall);
    consider(sweep_wall(start, end, max_x, |x| x >= max_x), HitSurface::RightWall);

    for (idx, floor) in world.floors.iter().enumerate() {
        if !(floor.y.is_finite() && floor.x1.is_finite() && floor.x2.is_finite()) {
            continue;
        }
        consider(sweep_rect(start, end, &platform_rect(floor)), HitSurface::Platform(idx));
    }

    if world.ground_y.is_finite() {
        consider(sweep_line_down(start, end, world.ground_y), HitSurface::Ground);
    }

    for (idx, rect) in entities.iter().enumerate() {
        consider(sweep_rect(start, end, &rect.expand(margin)), HitSurface::Entity(idx));
    }

    best
}

/// Highest floor whose top line a falling point crosses between `prev_bottom`
/// and `next_bottom` at horizontal position `x`. The ground plane counts as an
/// infinitely wide floor.
pub fn landing_floor(world: &WorldConfig, prev_bottom: f32, next_bottom: f32, x: f32) -> Option<f32> {
    let crosses = |line: f32| prev_bottom <= line && next_bottom >= line;

    let mut landing: Option<f32> = None;
    for floor in &world.floors {
        if x < floor.min_x() || x > floor.max_x() || !crosses(floor.y) {
            continue;
        }
        if landing.map_or(true, |y| floor.y < y) {
            landing = Some(floor.y);
        }
    }
    if world.ground_y.is_finite() && crosses(world.ground_y) && landing.map_or(true, |y| world.ground_y < y) {
        landing = Some(world.ground_y);
    }
    landing
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_world() -> WorldConfig {
        WorldConfig {
            width: 6000.0,
            height: 900.0,
            ground_y: 700.0,
            floors: Vec::new(),
        }
    }

    #[test]
    fn fast_segment_does_not_tunnel_through_thin_box() {
        // 120px step against a 40px wide box
        let rect = Rect::from_xywh(100.0, 200.0, 40.0, 80.0);
        let (t, point) = sweep_rect(Vec2::new(40.0, 240.0), Vec2::new(160.0, 240.0), &rect).unwrap();
        assert_eq!(t, 0.5);
        assert_eq!(point, Vec2::new(100.0, 240.0));
    }

    #[test]
    fn miss_and_out_of_range_return_none() {
        let rect = Rect::from_xywh(100.0, 200.0, 40.0, 80.0);
        assert!(sweep_rect(Vec2::new(40.0, 100.0), Vec2::new(160.0, 100.0), &rect).is_none());
        // Box lies beyond the end of the step
        assert!(sweep_rect(Vec2::new(0.0, 240.0), Vec2::new(50.0, 240.0), &rect).is_none());
        // Moving away
        assert!(sweep_rect(Vec2::new(90.0, 240.0), Vec2::new(0.0, 240.0), &rect).is_none());
    }

    #[test]
    fn stationary_segment_uses_containment() {
        let rect = Rect::from_xywh(0.0, 0.0, 10.0, 10.0);
        let inside = Vec2::new(5.0, 5.0);
        assert_eq!(sweep_rect(inside, inside, &rect), Some((0.0, inside)));
        let outside = Vec2::new(50.0, 5.0);
        assert_eq!(sweep_rect(outside, outside, &rect), None);
    }

    #[test]
    fn vertical_drop_onto_platform_lands_exactly_on_top() {
        let rect = Rect::from_edges(0.0, 100.0, 500.0, 522.0);
        let start = Vec2::new(30.0, 480.3);
        let end = Vec2::new(41.7, 530.9);
        let (t, point) = sweep_rect(start, end, &rect).unwrap();
        assert_eq!(point.y, 500.0);
        let expected_t = (500.0 - start.y) / (end.y - start.y);
        assert_eq!(t, expected_t);
        assert_eq!(point.x, start.x + (end.x - start.x) * expected_t);
    }

    #[test]
    fn earliest_surface_wins() {
        let mut world = open_world();
        world.floors.push(Floor::new(650.0, 20.0, 0.0, 200.0));
        let entity = Rect::from_xywh(90.0, 600.0, 40.0, 80.0);
        // Diagonal step crossing the entity box before the platform
        let hit = sweep_world(Vec2::new(50.0, 600.0), Vec2::new(150.0, 700.0), &world, &[entity], 3.0).unwrap();
        assert_eq!(hit.surface, HitSurface::Entity(0));
        assert_eq!(hit.point.x, 87.0);

        // Without the entity the platform is next
        let hit = sweep_world(Vec2::new(50.0, 600.0), Vec2::new(150.0, 700.0), &world, &[], 3.0).unwrap();
        assert_eq!(hit.surface, HitSurface::Platform(0));
        assert_eq!(hit.point.y, 650.0);
    }

    #[test]
    fn ground_and_walls_anchor() {
        let world = open_world();
        let hit = sweep_world(Vec2::new(3000.0, 690.0), Vec2::new(3010.0, 710.0), &world, &[], 3.0).unwrap();
        assert_eq!(hit.surface, HitSurface::Ground);
        assert_eq!(hit.point, Vec2::new(3005.0, 700.0));

        let hit = sweep_world(Vec2::new(20.0, 300.0), Vec2::new(-20.0, 310.0), &world, &[], 3.0).unwrap();
        assert_eq!(hit.surface, HitSurface::LeftWall);
        assert_eq!(hit.point, Vec2::new(0.0, 305.0));

        assert!(sweep_world(Vec2::new(100.0, 100.0), Vec2::new(110.0, 110.0), &world, &[], 3.0).is_none());
    }

    #[test]
    fn landing_floor_prefers_highest_crossed_line() {
        let mut world = open_world();
        world.floors.push(Floor::new(520.0, 22.0, 100.0, 300.0));
        assert_eq!(landing_floor(&world, 510.0, 530.0, 150.0), Some(520.0));
        assert_eq!(landing_floor(&world, 510.0, 530.0, 50.0), None);
        assert_eq!(landing_floor(&world, 690.0, 705.0, 50.0), Some(700.0));
        // Moving upward never lands
        assert_eq!(landing_floor(&world, 530.0, 510.0, 150.0), None);
    }
}
