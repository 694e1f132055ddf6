use crate::config::TransmissionOperation;
use crate::geometry::{RayHit, RayTracer};
use crate::id::SceneEntityId;
use crate::math::{SURFACE_EPSILON, Vec3};

/// Combines individual transmission losses with `operation`. The result is in [0, 1].
///
/// No losses means nothing is in the way: 0.
pub fn combine_transmission<I>(operation: TransmissionOperation, losses: I) -> f32
where
    I: IntoIterator<Item = f32>,
{
    let losses = losses.into_iter().map(|l| l.clamp(0.0, 1.0));
    let combined = match operation {
        TransmissionOperation::Add => losses.sum::<f32>(),
        TransmissionOperation::Multiply => 1.0 - losses.map(|l| 1.0 - l).product::<f32>(),
        TransmissionOperation::Max => losses.fold(0.0, f32::max),
    };
    combined.clamp(0.0, 1.0)
}

/// Loss contributed by each surface along a segment, in hit order.
///
/// Hits on a solid instance pair up as entry and exit and contribute once, with the larger
/// of the two losses. An unpaired solid hit (segment ending inside) counts alone.
pub fn surface_losses(hits: &[RayHit]) -> Vec<f32> {
    let mut losses: Vec<f32> = Vec::with_capacity(hits.len());
    let mut open: Vec<(SceneEntityId, usize)> = Vec::new();
    for hit in hits.iter().filter(|h| h.hit) {
        let loss = hit.surface.transmission_loss;
        if !hit.surface.solid {
            losses.push(loss);
            continue;
        }
        match open.iter().position(|(id, _)| *id == hit.surface.instance) {
            Some(slot) => {
                let (_, index) = open.swap_remove(slot);
                losses[index] = losses[index].max(loss);
            }
            None => {
                open.push((hit.surface.instance, losses.len()));
                losses.push(loss);
            }
        }
    }
    losses
}

/// Appends the losses of every surface strictly between `from` and `to` to `losses`.
///
/// Path points sit on edges and reflectors, so surfaces touching either end are skipped.
pub fn segment_losses<T>(tracer: &T, from: Vec3, to: Vec3, losses: &mut Vec<f32>)
where
    T: RayTracer + ?Sized,
{
    let length = from.distance(to);
    if length <= 2.0 * SURFACE_EPSILON {
        return;
    }
    let inset = (to - from) / length * SURFACE_EPSILON;
    let mut hits = Vec::new();
    tracer.segment_hits(from + inset, to - inset, &mut hits);
    losses.extend(surface_losses(&hits));
}

/// Losses of every surface crossed by the polyline through `points`.
pub fn polyline_losses<T>(tracer: &T, points: &[Vec3]) -> Vec<f32>
where
    T: RayTracer + ?Sized,
{
    let mut losses = Vec::new();
    for pair in points.windows(2) {
        segment_losses(tracer, pair[0], pair[1], &mut losses);
    }
    losses
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::HitSurface;

    fn hit(instance: u64, distance: f32, loss: f32, solid: bool) -> RayHit {
        RayHit::new(
            distance,
            Vec3::new(distance, 0.0, 0.0),
            -Vec3::X,
            HitSurface {
                instance: SceneEntityId(instance),
                transmission_loss: loss,
                solid,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_operations() {
        let losses = [0.3, 0.5];
        let add = combine_transmission(TransmissionOperation::Add, losses);
        let multiply = combine_transmission(TransmissionOperation::Multiply, losses);
        let max = combine_transmission(TransmissionOperation::Max, losses);
        assert!((add - 0.8).abs() < 1e-6);
        assert!((multiply - 0.65).abs() < 1e-6);
        assert!((max - 0.5).abs() < 1e-6);
        assert_eq!(combine_transmission(TransmissionOperation::Add, [0.7, 0.9]), 1.0);
        assert_eq!(combine_transmission(TransmissionOperation::Max, []), 0.0);
    }

    #[test]
    fn test_operation_ordering() {
        // Add caps at 1, Multiply compounds complements, Max keeps only the worst
        let sets: [&[f32]; 4] = [&[0.1, 0.2], &[0.5, 0.5, 0.5], &[0.9, 0.05], &[0.0, 0.99]];
        for losses in sets {
            let add = combine_transmission(TransmissionOperation::Add, losses.iter().copied());
            let multiply =
                combine_transmission(TransmissionOperation::Multiply, losses.iter().copied());
            let max = combine_transmission(TransmissionOperation::Max, losses.iter().copied());
            assert!(add >= multiply - 1e-6, "{losses:?}");
            assert!(multiply >= max - 1e-6, "{losses:?}");
        }
    }

    #[test]
    fn test_solid_pairs_once() {
        let hits = [hit(1, 1.0, 0.5, true), hit(1, 2.0, 0.5, true)];
        assert_eq!(surface_losses(&hits), vec![0.5]);

        // Entry and exit with different surfaces keep the worse one
        let hits = [hit(1, 1.0, 0.2, true), hit(1, 2.0, 0.6, true)];
        assert_eq!(surface_losses(&hits), vec![0.6]);

        // Thin walls count every crossing
        let hits = [hit(2, 1.0, 0.5, false), hit(2, 2.0, 0.5, false)];
        assert_eq!(surface_losses(&hits), vec![0.5, 0.5]);
    }

    #[test]
    fn test_interleaved_solids() {
        let hits = [
            hit(1, 1.0, 0.3, true),
            hit(2, 1.5, 0.4, false),
            hit(1, 2.0, 0.1, true),
            hit(3, 3.0, 0.7, true),
        ];
        assert_eq!(surface_losses(&hits), vec![0.3, 0.4, 0.7]);
    }
}
