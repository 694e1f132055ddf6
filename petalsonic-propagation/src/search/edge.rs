use crate::geometry::RayTracer;
use crate::math::{SURFACE_EPSILON, Vec3};
use crate::raycast::EdgeRef;
use crate::scene::Scene;

/// Golden-section coordinate-descent sweeps that seed the Newton iterations.
const DESCENT_SWEEPS: usize = 2;

/// Golden-section iterations per node and sweep.
const GOLDEN_ITERATIONS: usize = 24;

/// Upper bound on projected Newton steps.
const NEWTON_ITERATIONS: usize = 24;

/// Length improvement below which the optimisation stops.
const CONVERGED: f32 = 1e-6;

/// Keeps the Hessian positive definite when a leg runs along its edge.
const HESSIAN_DAMPING: f32 = 1e-6;

const INV_PHI: f32 = 0.618_034;

/// Positions the nodes of an edge chain for the shortest route from `emitter` to `listener`
/// and checks that every leg is clear.
///
/// `chain` is ordered from the listener outward, as scans produce it; the returned nodes are
/// ordered from the emitter. `None` if an edge is gone or a leg is blocked.
pub(crate) fn chain_nodes(
    scene: &Scene,
    chain: &[EdgeRef],
    emitter: Vec3,
    listener: Vec3,
) -> Option<Vec<(EdgeRef, Vec3)>> {
    let geometry = scene.geometry();
    let mut edges: Vec<EdgeRef> = Vec::with_capacity(chain.len());
    let mut segments: Vec<[Vec3; 2]> = Vec::with_capacity(chain.len());
    for edge in chain.iter().rev() {
        let instance = geometry.instance(edge.instance)?;
        if instance.is_degraded() || edge.edge as usize >= instance.edge_count() {
            return None;
        }
        edges.push(*edge);
        segments.push(instance.edge(edge.edge));
    }

    let params = shortest_params(&segments, emitter, listener);
    let nodes: Vec<(EdgeRef, Vec3)> = edges
        .into_iter()
        .zip(segments.iter().zip(&params))
        .map(|(edge, (segment, t))| (edge, point_on(segment, *t)))
        .collect();

    let mut previous = emitter;
    for position in nodes.iter().map(|(_, p)| *p).chain(std::iter::once(listener)) {
        if previous.distance(position) <= SURFACE_EPSILON || scene.is_occluded(previous, position) {
            return None;
        }
        previous = position;
    }
    Some(nodes)
}

fn point_on(segment: &[Vec3; 2], t: f32) -> Vec3 {
    segment[0].lerp(segment[1], t)
}

fn route_length(segments: &[[Vec3; 2]], params: &[f32], emitter: Vec3, listener: Vec3) -> f32 {
    let mut previous = emitter;
    let mut length = 0.0;
    for (segment, t) in segments.iter().zip(params) {
        let p = point_on(segment, *t);
        length += previous.distance(p);
        previous = p;
    }
    length + previous.distance(listener)
}

/// Edge parameters in [0, 1] minimising the route length through `segments`.
///
/// The length is convex in the parameters, so a couple of per-node golden-section sweeps
/// followed by projected Newton steps on its tridiagonal Hessian reach the optimum even when
/// neighbouring edges are close together.
fn shortest_params(segments: &[[Vec3; 2]], emitter: Vec3, listener: Vec3) -> Vec<f32> {
    let n = segments.len();
    let mut params = vec![0.5f32; n];
    if n == 0 {
        return params;
    }

    for _ in 0..DESCENT_SWEEPS {
        for i in 0..n {
            let previous = if i == 0 {
                emitter
            } else {
                point_on(&segments[i - 1], params[i - 1])
            };
            let next = if i + 1 == n {
                listener
            } else {
                point_on(&segments[i + 1], params[i + 1])
            };
            let segment = segments[i];
            params[i] = golden_section(|t| {
                let p = point_on(&segment, t);
                previous.distance(p) + p.distance(next)
            });
        }
    }

    let directions: Vec<Vec3> = segments.iter().map(|s| s[1] - s[0]).collect();
    let mut length = route_length(segments, &params, emitter, listener);
    for _ in 0..NEWTON_ITERATIONS {
        let mut gradient = vec![0.0f32; n];
        let mut diagonal = vec![HESSIAN_DAMPING; n];
        let mut off_diagonal = vec![0.0f32; n.saturating_sub(1)];

        // Leg j runs from point j to point j + 1 of [emitter, nodes.., listener]
        let mut from = emitter;
        for j in 0..=n {
            let to = if j < n {
                point_on(&segments[j], params[j])
            } else {
                listener
            };
            let leg = to - from;
            from = to;
            let leg_length = leg.length();
            if leg_length <= f32::EPSILON {
                continue;
            }
            let unit = leg / leg_length;
            let curvature = |v: Vec3| (v - unit * unit.dot(v)) / leg_length;
            if j < n {
                let d = directions[j];
                gradient[j] += unit.dot(d);
                diagonal[j] += d.dot(curvature(d));
            }
            if j > 0 {
                let d = directions[j - 1];
                gradient[j - 1] -= unit.dot(d);
                diagonal[j - 1] += d.dot(curvature(d));
                if j < n {
                    off_diagonal[j - 1] -= d.dot(curvature(directions[j]));
                }
            }
        }

        let Some(step) = solve_tridiagonal(&diagonal, &off_diagonal, &gradient) else {
            break;
        };
        let mut scale = 1.0;
        let mut accepted = None;
        while scale > 1e-3 {
            let candidate: Vec<f32> = params
                .iter()
                .zip(&step)
                .map(|(t, s)| (t - s * scale).clamp(0.0, 1.0))
                .collect();
            let candidate_length = route_length(segments, &candidate, emitter, listener);
            if candidate_length < length {
                accepted = Some((candidate, candidate_length));
                break;
            }
            scale *= 0.5;
        }
        let Some((candidate, candidate_length)) = accepted else {
            break;
        };
        let improvement = length - candidate_length;
        params = candidate;
        length = candidate_length;
        if improvement < CONVERGED {
            break;
        }
    }
    params
}

/// Solves a symmetric tridiagonal system with the Thomas algorithm.
fn solve_tridiagonal(diagonal: &[f32], off_diagonal: &[f32], rhs: &[f32]) -> Option<Vec<f32>> {
    let n = diagonal.len();
    let mut upper = vec![0.0f32; n];
    let mut solution = vec![0.0f32; n];
    let mut pivot = diagonal[0];
    if pivot.abs() <= f32::EPSILON {
        return None;
    }
    upper[0] = off_diagonal.first().copied().unwrap_or(0.0) / pivot;
    solution[0] = rhs[0] / pivot;
    for i in 1..n {
        pivot = diagonal[i] - off_diagonal[i - 1] * upper[i - 1];
        if pivot.abs() <= f32::EPSILON {
            return None;
        }
        upper[i] = off_diagonal.get(i).copied().unwrap_or(0.0) / pivot;
        solution[i] = (rhs[i] - off_diagonal[i - 1] * solution[i - 1]) / pivot;
    }
    for i in (0..n.saturating_sub(1)).rev() {
        solution[i] -= upper[i] * solution[i + 1];
    }
    Some(solution)
}

/// Minimum of a unimodal function on [0, 1].
fn golden_section<F>(f: F) -> f32
where
    F: Fn(f32) -> f32,
{
    let (mut a, mut b) = (0.0f32, 1.0f32);
    let mut c = b - (b - a) * INV_PHI;
    let mut d = a + (b - a) * INV_PHI;
    let (mut fc, mut fd) = (f(c), f(d));
    for _ in 0..GOLDEN_ITERATIONS {
        if fc < fd {
            b = d;
            d = c;
            fd = fc;
            c = b - (b - a) * INV_PHI;
            fc = f(c);
        } else {
            a = c;
            c = d;
            fc = fd;
            d = a + (b - a) * INV_PHI;
            fd = f(d);
        }
    }
    // The interval ends are candidates too: the optimum is often an edge end point
    [a, (a + b) * 0.5, b]
        .into_iter()
        .min_by(|x, y| f(*x).total_cmp(&f(*y)))
        .unwrap_or(0.5)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::SceneCommand;
    use crate::config::GeometryInstanceParams;
    use crate::geometry::{AcousticSurface, box_params};
    use crate::id::{GeometrySetId, SceneEntityId};

    #[test]
    fn test_golden_section() {
        let t = golden_section(|t| (t - 0.3).abs());
        assert!((t - 0.3).abs() < 1e-3);
        // Monotonic: optimum at the boundary
        assert!(golden_section(|t| t).abs() < 1e-3);
        assert!((golden_section(|t| -t) - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_solve_tridiagonal() {
        // [2 1 0; 1 2 1; 0 1 2] x = [4 8 8] has x = [1 2 3]
        let x = solve_tridiagonal(&[2.0, 2.0, 2.0], &[1.0, 1.0], &[4.0, 8.0, 8.0]).unwrap();
        for (value, expected) in x.iter().zip([1.0, 2.0, 3.0]) {
            assert!((value - expected).abs() < 1e-4);
        }
        assert!(solve_tridiagonal(&[0.0], &[], &[1.0]).is_none());
    }

    #[test]
    fn test_close_edges_converge() {
        // Two parallel edges 0.2 apart, far from both ends; the optimum is level with them
        let segments = [
            [Vec3::new(-0.1, 1.0, -2.0), Vec3::new(-0.1, 1.0, 2.0)],
            [Vec3::new(0.1, 1.0, -2.0), Vec3::new(0.1, 1.0, 2.0)],
        ];
        let params = shortest_params(&segments, Vec3::new(-3.0, 0.0, 1.0), Vec3::new(3.0, 0.0, 1.0));
        assert!((params[0] - 0.75).abs() < 1e-3);
        assert!((params[1] - 0.75).abs() < 1e-3);
    }

    fn wall_scene() -> Scene {
        // A thin wall in the plane x = 0 spanning y in [-1, 1] and z in [-2, 2]
        let mut scene = Scene::new(None);
        scene.apply(SceneCommand::SetGeometry {
            id: GeometrySetId(1),
            params: Box::new(box_params(
                Vec3::new(-0.1, -1.0, -2.0),
                Vec3::new(0.1, 1.0, 2.0),
                AcousticSurface::CONCRETE,
            )),
        });
        scene.apply(SceneCommand::SetGeometryInstance {
            id: SceneEntityId(10),
            params: GeometryInstanceParams::new(GeometrySetId(1)),
        });
        scene.commit();
        scene
    }

    fn edge_between(scene: &Scene, a: Vec3, b: Vec3) -> EdgeRef {
        let instance = scene.geometry().instance(SceneEntityId(10)).unwrap();
        let edge = (0..instance.edge_count() as u32)
            .find(|e| {
                let [p, q] = instance.edge(*e);
                (p.abs_diff_eq(a, 1e-5) && q.abs_diff_eq(b, 1e-5))
                    || (p.abs_diff_eq(b, 1e-5) && q.abs_diff_eq(a, 1e-5))
            })
            .unwrap();
        EdgeRef {
            instance: SceneEntityId(10),
            edge,
        }
    }

    #[test]
    fn test_path_over_wall() {
        let scene = wall_scene();
        // Top edges of the wall's two faces
        let near_listener = edge_between(
            &scene,
            Vec3::new(0.1, 1.0, -2.0),
            Vec3::new(0.1, 1.0, 2.0),
        );
        let near_emitter = edge_between(
            &scene,
            Vec3::new(-0.1, 1.0, -2.0),
            Vec3::new(-0.1, 1.0, 2.0),
        );
        let emitter = Vec3::new(-3.0, 0.0, 0.5);
        let listener = Vec3::new(3.0, 0.0, 0.5);
        let nodes = chain_nodes(&scene, &[near_listener, near_emitter], emitter, listener).unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].0, near_emitter);
        assert!(nodes[0].1.abs_diff_eq(Vec3::new(-0.1, 1.0, 0.5), 1e-2));
        assert!(nodes[1].1.abs_diff_eq(Vec3::new(0.1, 1.0, 0.5), 1e-2));

        // One edge alone cannot clear the wall's thickness
        assert!(chain_nodes(&scene, &[near_listener], emitter, listener).is_none());
    }
}
