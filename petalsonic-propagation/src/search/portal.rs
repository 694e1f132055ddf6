use crate::math::Vec3;
use crate::output::{DiffractionNode, PathFeature};
use crate::rooms::{Portal, PortalRoute};
use crate::scene::Scene;

/// Relaxation passes that pull node positions toward the shortest route.
const SMOOTHING_PASSES: usize = 8;

/// Places one node in every portal of `route` (ordered emitter first) so the path through
/// the openings is as straight as the openings allow.
///
/// Each pass moves every node to where the line between its neighbours crosses the portal
/// plane, clamped into the opening rectangle.
pub(crate) fn route_nodes(
    scene: &Scene,
    route: &PortalRoute,
    emitter: Vec3,
    listener: Vec3,
) -> Option<Vec<DiffractionNode>> {
    let portals: Vec<&Portal> = route
        .portals
        .iter()
        .map(|id| scene.rooms().portal(*id))
        .collect::<Option<_>>()?;
    let mut positions: Vec<Vec3> = portals.iter().map(|p| p.center()).collect();

    for _ in 0..SMOOTHING_PASSES {
        for i in 0..positions.len() {
            let previous = if i == 0 { emitter } else { positions[i - 1] };
            let next = positions.get(i + 1).copied().unwrap_or(listener);
            let portal = portals[i];
            let target = match portal.plane().intersect_segment(previous, next) {
                Some(t) => previous + (next - previous) * t,
                None => (previous + next) * 0.5,
            };
            positions[i] = portal.clamp_to_opening(target);
        }
    }

    Some(
        portals
            .iter()
            .zip(positions)
            .zip(&route.sides)
            .map(|((portal, position), &(near, far))| DiffractionNode {
                position,
                feature: PathFeature::Portal(portal.id),
                angle: 0.0,
                emitter_side_room: near,
                listener_side_room: far,
            })
            .collect(),
    )
}
