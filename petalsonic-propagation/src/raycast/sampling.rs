use crate::math::{Quat, Vec3};

/// Golden angle in radians.
const GOLDEN_ANGLE: f32 = 2.399_963_2;

/// Axis the per-frame rotation turns about; tilted so successive frames cover new directions.
const ROTATION_AXIS: Vec3 = Vec3::new(0.267_261_24, 0.534_522_5, 0.801_783_7);

/// `count` near-uniform directions on the unit sphere (Fibonacci lattice), rotated by an
/// amount that changes every frame.
///
/// The lattice keeps the directions stratified so the coverage of one frame does not depend
/// on luck; the rotation makes consecutive frames probe between the previous directions.
pub fn fibonacci_directions(count: u32, frame: u64) -> Vec<Vec3> {
    let rotation = frame_rotation(frame);
    let n = count as f32;
    (0..count)
        .map(|i| {
            let y = 1.0 - 2.0 * (i as f32 + 0.5) / n;
            let radius = (1.0 - y * y).max(0.0).sqrt();
            let theta = GOLDEN_ANGLE * i as f32;
            rotation * Vec3::new(radius * theta.cos(), y, radius * theta.sin())
        })
        .collect()
}

fn frame_rotation(frame: u64) -> Quat {
    // Wrap to keep the angle precise in f32
    let turns = (frame % 1024) as f32;
    Quat::from_axis_angle(ROTATION_AXIS.normalize(), turns * GOLDEN_ANGLE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_and_count() {
        let directions = fibonacci_directions(35, 0);
        assert_eq!(directions.len(), 35);
        for d in &directions {
            assert!((d.length() - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_covers_sphere() {
        let directions = fibonacci_directions(64, 3);
        let mean: Vec3 = directions.iter().copied().sum::<Vec3>() / directions.len() as f32;
        assert!(mean.length() < 0.1);
        for axis in [Vec3::X, -Vec3::X, Vec3::Y, -Vec3::Y, Vec3::Z, -Vec3::Z] {
            let best = directions.iter().map(|d| d.dot(axis)).fold(-1.0, f32::max);
            assert!(best > 0.8, "no ray near {axis}");
        }
    }

    #[test]
    fn test_rotates_per_frame() {
        let a = fibonacci_directions(8, 0);
        let b = fibonacci_directions(8, 1);
        assert!(a.iter().zip(&b).any(|(a, b)| !a.abs_diff_eq(*b, 1e-3)));
        assert_eq!(fibonacci_directions(8, 5), fibonacci_directions(8, 5));
    }
}
