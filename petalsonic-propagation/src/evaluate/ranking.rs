//! Prominence ranking and path-count limits.
//!
//! Lower score is more prominent: `diffraction + transmission loss + 0.25 · length / max length`.
//! Ties go to the shorter path, then the one with fewer nodes, then the smaller path key.

use crate::output::{DiffractionPath, ReflectionPath};
use std::cmp::Ordering;

/// Weight of the normalized length in the prominence score.
pub const LENGTH_WEIGHT: f32 = 0.25;

pub fn prominence(diffraction: f32, transmission_loss: f32, length: f32, max_length: f32) -> f32 {
    let normalized = if max_length > 0.0 {
        length / max_length
    } else {
        0.0
    };
    diffraction + transmission_loss + LENGTH_WEIGHT * normalized
}

fn diffraction_score(path: &DiffractionPath, max_length: f32) -> f32 {
    prominence(path.diffraction, path.transmission_loss, path.length, max_length)
}

fn reflection_score(path: &ReflectionPath, max_length: f32) -> f32 {
    prominence(
        path.emitter_diffraction + path.listener_diffraction,
        path.transmission_loss,
        path.length,
        max_length,
    )
}

pub fn compare_diffraction(a: &DiffractionPath, b: &DiffractionPath, max_length: f32) -> Ordering {
    diffraction_score(a, max_length)
        .total_cmp(&diffraction_score(b, max_length))
        .then(a.length.total_cmp(&b.length))
        .then(a.nodes.len().cmp(&b.nodes.len()))
        .then_with(|| a.key().cmp(&b.key()))
}

pub fn compare_reflection(a: &ReflectionPath, b: &ReflectionPath, max_length: f32) -> Ordering {
    reflection_score(a, max_length)
        .total_cmp(&reflection_score(b, max_length))
        .then(a.length.total_cmp(&b.length))
        .then(a.points.len().cmp(&b.points.len()))
        .then_with(|| a.key().cmp(&b.key()))
}

/// Sorts most prominent first and keeps at most `limit`.
pub fn keep_most_prominent_diffraction(
    paths: &mut Vec<DiffractionPath>,
    limit: usize,
    max_length: f32,
) {
    paths.sort_by(|a, b| compare_diffraction(a, b, max_length));
    if paths.len() > limit {
        log::debug!("Dropping {} diffraction paths over the limit", paths.len() - limit);
        paths.truncate(limit);
    }
}

pub fn keep_most_prominent_reflections(
    paths: &mut Vec<ReflectionPath>,
    limit: usize,
    max_length: f32,
) {
    paths.sort_by(|a, b| compare_reflection(a, b, max_length));
    if paths.len() > limit {
        log::debug!("Dropping {} reflection paths over the limit", paths.len() - limit);
        paths.truncate(limit);
    }
}

/// Enforces a reflection-path ceiling across many path sets, keeping the globally most
/// prominent paths. Each set stays sorted.
pub fn limit_global_reflections(sets: &mut [&mut Vec<ReflectionPath>], limit: usize, max_length: f32) {
    let total: usize = sets.iter().map(|s| s.len()).sum();
    if total <= limit {
        return;
    }
    let mut all: Vec<(usize, usize)> = sets
        .iter()
        .enumerate()
        .flat_map(|(set, paths)| (0..paths.len()).map(move |index| (set, index)))
        .collect();
    all.sort_by(|&(sa, ia), &(sb, ib)| {
        compare_reflection(&sets[sa][ia], &sets[sb][ib], max_length).then((sa, ia).cmp(&(sb, ib)))
    });
    let mut keep: Vec<Vec<bool>> = sets.iter().map(|s| vec![false; s.len()]).collect();
    for &(set, index) in all.iter().take(limit) {
        keep[set][index] = true;
    }
    for (paths, keep) in sets.iter_mut().zip(keep) {
        let mut flags = keep.into_iter();
        paths.retain(|_| flags.next().unwrap_or(false));
    }
    log::debug!(
        "Global reflection limit {} reached; dropped {} paths",
        limit,
        total - limit
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::SurfaceKey;
    use crate::id::SceneEntityId;
    use crate::math::Vec3;
    use crate::output::{PathFeature, PathPoint};

    fn diffraction(diffraction: f32, length: f32) -> DiffractionPath {
        let mut path = DiffractionPath::new(Vec3::ZERO, Vec3::X, Vec::new());
        path.diffraction = diffraction;
        path.length = length;
        path
    }

    fn reflection(face_group: u32, length: f32) -> ReflectionPath {
        let mut path = ReflectionPath::new(
            Vec3::ZERO,
            Vec3::X,
            vec![PathPoint {
                position: Vec3::Y,
                feature: PathFeature::Reflector(SurfaceKey {
                    instance: SceneEntityId(1),
                    face_group,
                }),
                texture: None,
            }],
        );
        path.length = length;
        path
    }

    #[test]
    fn test_prefers_less_diffraction_then_shorter() {
        let mut paths = vec![diffraction(0.5, 10.0), diffraction(0.1, 30.0), diffraction(0.1, 20.0)];
        keep_most_prominent_diffraction(&mut paths, 2, 100.0);
        assert_eq!(paths.len(), 2);
        assert_eq!(paths[0].length, 20.0);
        assert_eq!(paths[1].length, 30.0);
    }

    #[test]
    fn test_global_limit() {
        let mut a = vec![reflection(0, 5.0), reflection(1, 50.0)];
        let mut b = vec![reflection(2, 10.0), reflection(3, 60.0), reflection(4, 70.0)];
        limit_global_reflections(&mut [&mut a, &mut b], 3, 100.0);
        assert_eq!(a.len() + b.len(), 3);
        assert_eq!(a.iter().map(|p| p.length).collect::<Vec<_>>(), vec![5.0, 50.0]);
        assert_eq!(b.iter().map(|p| p.length).collect::<Vec<_>>(), vec![10.0]);
    }

    #[test]
    fn test_under_limit_untouched() {
        let mut a = vec![reflection(0, 5.0)];
        limit_global_reflections(&mut [&mut a], 4, 100.0);
        assert_eq!(a.len(), 1);
    }
}
