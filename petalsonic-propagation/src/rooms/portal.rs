use crate::config::PortalParams;
use crate::id::SceneEntityId;
use crate::math::{Plane, Vec3};

/// An oriented rectangular opening between a front room and a back room.
///
/// The opening rectangle lies in the plane through the portal centre spanned by its right
/// and up vectors; the front vector points into the front room. The portal volume is the
/// box of all three half-extents around the centre.
#[derive(Debug, Clone, PartialEq)]
pub struct Portal {
    pub id: SceneEntityId,
    pub params: PortalParams,
    pub name: Option<String>,
}

impl Portal {
    pub fn new(id: SceneEntityId, params: PortalParams, name: Option<String>) -> Self {
        Self { id, params, name }
    }

    pub fn is_enabled(&self) -> bool {
        self.params.enabled
    }

    pub fn center(&self) -> Vec3 {
        self.params.transform.position
    }

    /// Unit normal pointing into the front room.
    pub fn front(&self) -> Vec3 {
        self.params.transform.front
    }

    pub fn front_room(&self) -> SceneEntityId {
        self.params.front_room
    }

    pub fn back_room(&self) -> SceneEntityId {
        self.params.back_room
    }

    pub fn connects(&self, room: SceneEntityId) -> bool {
        self.params.front_room == room || self.params.back_room == room
    }

    /// The room on the other side from `room`, if the portal touches `room`.
    pub fn other_room(&self, room: SceneEntityId) -> Option<SceneEntityId> {
        if room == self.params.front_room {
            Some(self.params.back_room)
        } else if room == self.params.back_room {
            Some(self.params.front_room)
        } else {
            None
        }
    }

    /// Room on the side of the opening plane where `point` lies.
    pub fn room_on_side(&self, point: Vec3) -> SceneEntityId {
        if self.plane().signed_distance(point) >= 0.0 {
            self.params.front_room
        } else {
            self.params.back_room
        }
    }

    /// The portal normal oriented toward `point`.
    pub fn normal_facing(&self, point: Vec3) -> Vec3 {
        if self.plane().signed_distance(point) >= 0.0 {
            self.front()
        } else {
            -self.front()
        }
    }

    pub fn plane(&self) -> Plane {
        Plane::from_point_normal(self.center(), self.front())
    }

    fn local(&self, point: Vec3) -> Vec3 {
        self.params.transform.inverse_transform_point(point)
    }

    /// Whether `point` lies inside the portal's box volume.
    pub fn volume_contains(&self, point: Vec3) -> bool {
        let local = self.local(point).abs();
        local.cmple(self.params.extent).all()
    }

    /// Clamps `point` onto the opening rectangle.
    pub fn clamp_to_opening(&self, point: Vec3) -> Vec3 {
        let local = self.local(point);
        let extent = self.params.extent;
        let t = &self.params.transform;
        t.position
            + t.right() * local.x.clamp(-extent.x, extent.x)
            + t.up * local.y.clamp(-extent.y, extent.y)
    }

    /// Where the segment `a → b` crosses the opening rectangle, if it does.
    pub fn crossing(&self, a: Vec3, b: Vec3) -> Option<Vec3> {
        let t = self.plane().intersect_segment(a, b)?;
        let point = a + (b - a) * t;
        let local = self.local(point);
        let extent = self.params.extent;
        if local.x.abs() <= extent.x + 1e-4 && local.y.abs() <= extent.y + 1e-4 {
            Some(point)
        } else {
            None
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::math::Transform;

    /// Door in the plane x = 5, front facing +X, 2 m wide and 3 m high.
    pub(crate) fn door() -> Portal {
        Portal::new(
            SceneEntityId(100),
            PortalParams {
                transform: Transform::new(Vec3::new(5.0, 0.0, 0.0), Vec3::X, Vec3::Y),
                extent: Vec3::new(1.0, 1.5, 0.5),
                enabled: true,
                front_room: SceneEntityId(2),
                back_room: SceneEntityId(1),
                adjacent_room_bleed: 1.0,
            },
            None,
        )
    }

    #[test]
    fn test_sides() {
        let portal = door();
        assert_eq!(portal.room_on_side(Vec3::new(8.0, 0.0, 0.0)), SceneEntityId(2));
        assert_eq!(portal.room_on_side(Vec3::new(1.0, 0.0, 0.0)), SceneEntityId(1));
        assert_eq!(portal.other_room(SceneEntityId(1)), Some(SceneEntityId(2)));
        assert_eq!(portal.other_room(SceneEntityId(3)), None);
        assert_eq!(portal.normal_facing(Vec3::ZERO), -Vec3::X);
    }

    #[test]
    fn test_volume_and_opening() {
        let portal = door();
        assert!(portal.volume_contains(Vec3::new(5.2, 1.0, 0.5)));
        assert!(!portal.volume_contains(Vec3::new(5.8, 0.0, 0.0)));
        assert!(!portal.volume_contains(Vec3::new(5.0, 0.0, 1.5)));

        let clamped = portal.clamp_to_opening(Vec3::new(2.0, 4.0, -3.0));
        assert!(clamped.abs_diff_eq(Vec3::new(5.0, 1.5, -1.0), 1e-5));
    }

    #[test]
    fn test_crossing() {
        let portal = door();
        let through = portal.crossing(Vec3::ZERO, Vec3::new(10.0, 0.0, 0.0));
        assert!(through.unwrap().abs_diff_eq(Vec3::new(5.0, 0.0, 0.0), 1e-5));
        // Passes the plane beside the opening
        assert!(portal.crossing(Vec3::new(0.0, 0.0, 3.0), Vec3::new(10.0, 0.0, 3.0)).is_none());
        // Never reaches the plane
        assert!(portal.crossing(Vec3::ZERO, Vec3::new(4.0, 0.0, 0.0)).is_none());
    }
}
