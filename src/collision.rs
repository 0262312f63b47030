//! Collision Oracle (C4) – segment vs. oriented-unit-AABB line-of-sight test.
//!
//! Colliders are purely a culling device: nothing here simulates physics
//! beyond this single query.

use crate::scene::BoxCollider;
use glam::Vec3;

/// Vertical offset applied to both endpoints before testing, so bots may
/// stand directly on top of a collider that only grazes ground level.
const EYE_HEIGHT_OFFSET: f32 = 0.2;
pub const DEFAULT_EPS: f32 = 0.1;

/// `true` if a straight line from `from` to `to` is unobstructed by any
/// collider in `colliders`, within `eps` metres of either endpoint.
pub fn is_path_clear(from: Vec3, to: Vec3, colliders: &[BoxCollider], eps: f32) -> bool {
    let raised_from = from + Vec3::new(0.0, EYE_HEIGHT_OFFSET, 0.0);
    let raised_to = to + Vec3::new(0.0, EYE_HEIGHT_OFFSET, 0.0);

    let length = (raised_to - raised_from).length();
    if length <= 2.0 * eps {
        return true;
    }

    for collider in colliders {
        let local_origin = collider.inverse_world_transform.transform_point3(raised_from);
        let local_dir = collider
            .inverse_world_transform
            .transform_vector3(raised_to - raised_from);

        if let Some(t_enter) = segment_entry_param(local_origin, local_dir) {
            let arclen = t_enter * length;
            if arclen > eps && arclen < length - eps {
                return false;
            }
        }
    }

    true
}

/// Slab test of the segment `origin + t*dir, t in [0,1]` against the unit
/// AABB `[-0.5, 0.5]^3`. Returns the clipped entry parameter (>= 0) if the
/// segment intersects the box at all within its own domain.
fn segment_entry_param(origin: Vec3, dir: Vec3) -> Option<f32> {
    let mut tmin = f32::NEG_INFINITY;
    let mut tmax = f32::INFINITY;

    for axis in 0..3 {
        let o = origin[axis];
        let d = dir[axis];
        if d.abs() < 1e-8 {
            if o < -0.5 || o > 0.5 {
                return None;
            }
            continue;
        }
        let inv_d = 1.0 / d;
        let mut t1 = (-0.5 - o) * inv_d;
        let mut t2 = (0.5 - o) * inv_d;
        if t1 > t2 {
            std::mem::swap(&mut t1, &mut t2);
        }
        tmin = tmin.max(t1);
        tmax = tmax.min(t2);
        if tmin > tmax {
            return None;
        }
    }

    let seg_tmin = tmin.max(0.0);
    let seg_tmax = tmax.min(1.0);
    if seg_tmin > seg_tmax {
        return None;
    }
    Some(seg_tmin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Mat4;

    fn collider_at(center: Vec3) -> BoxCollider {
        let world = Mat4::from_translation(center);
        BoxCollider {
            name: "c".into(),
            world_transform: world,
            inverse_world_transform: world.inverse(),
        }
    }

    #[test]
    fn clear_when_no_collider_in_the_way() {
        let colliders = vec![collider_at(Vec3::new(50.0, 0.0, 50.0))];
        assert!(is_path_clear(
            Vec3::ZERO,
            Vec3::new(5.0, 0.0, 0.0),
            &colliders,
            DEFAULT_EPS
        ));
    }

    #[test]
    fn blocked_when_collider_sits_between_endpoints() {
        let colliders = vec![collider_at(Vec3::new(5.0, 0.0, 0.0))];
        assert!(!is_path_clear(
            Vec3::ZERO,
            Vec3::new(10.0, 0.0, 0.0),
            &colliders,
            DEFAULT_EPS
        ));
    }

    #[test]
    fn not_blocked_when_collider_grazes_only_the_terminus() {
        // Collider sits right on top of the destination waypoint.
        let colliders = vec![collider_at(Vec3::new(10.0, 0.0, 0.0))];
        assert!(is_path_clear(
            Vec3::ZERO,
            Vec3::new(10.0, 0.0, 0.0),
            &colliders,
            DEFAULT_EPS
        ));
    }

    #[test]
    fn very_short_segment_is_always_clear() {
        let colliders = vec![collider_at(Vec3::ZERO)];
        assert!(is_path_clear(
            Vec3::ZERO,
            Vec3::new(0.01, 0.0, 0.0),
            &colliders,
            DEFAULT_EPS
        ));
    }

    #[test]
    fn symmetric_in_endpoints() {
        let colliders = vec![collider_at(Vec3::new(5.0, 0.0, 0.0))];
        let forward = is_path_clear(Vec3::ZERO, Vec3::new(10.0, 0.0, 0.0), &colliders, DEFAULT_EPS);
        let backward = is_path_clear(Vec3::new(10.0, 0.0, 0.0), Vec3::ZERO, &colliders, DEFAULT_EPS);
        assert_eq!(forward, backward);
    }

    #[test]
    fn degenerate_axis_requires_origin_already_in_slab() {
        // Segment runs purely along X with the collider offset on Z so the
        // local Z direction is ~0; the origin's Z must already lie in the
        // slab for a hit to register.
        let world = Mat4::from_translation(Vec3::new(5.0, 0.0, 10.0));
        let colliders = vec![BoxCollider {
            name: "c".into(),
            world_transform: world,
            inverse_world_transform: world.inverse(),
        }];
        assert!(is_path_clear(
            Vec3::ZERO,
            Vec3::new(10.0, 0.0, 0.0),
            &colliders,
            DEFAULT_EPS
        ));
    }
}
