use std::f32::consts::FRAC_PI_2;

use glam::Quat;

/// Aircraft (ZYX) angles in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EulerAngles {
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
}

impl EulerAngles {
    /// Each angle times `factor`, truncated toward zero.
    pub fn scaled_ints(&self, factor: f32) -> [i32; 3] {
        [
            (self.roll * factor) as i32,
            (self.pitch * factor) as i32,
            (self.yaw * factor) as i32,
        ]
    }
}

/// Converts a unit quaternion to roll/pitch/yaw.
///
/// Pitch is clamped to +-90 degrees once the sine reaches 1 in magnitude, so
/// gimbal lock never hands asin an out of domain value.
pub fn to_euler(q: Quat) -> EulerAngles {
    let (w, x, y, z) = (q.w, q.x, q.y, q.z);

    let sinr = 2.0 * (w * x + y * z);
    let cosr = 1.0 - 2.0 * (x * x + y * y);
    let roll = sinr.atan2(cosr);

    let sinp = 2.0 * (w * y - z * x);
    let pitch = if sinp.abs() >= 1.0 {
        FRAC_PI_2.copysign(sinp)
    } else {
        sinp.asin()
    };

    let siny = 2.0 * (w * z + x * y);
    let cosy = 1.0 - 2.0 * (y * y + z * z);
    let yaw = siny.atan2(cosy);

    EulerAngles {
        roll: roll.to_degrees(),
        pitch: pitch.to_degrees(),
        yaw: yaw.to_degrees(),
    }
}

#[cfg(test)]
mod tests {
    use glam::EulerRot;

    use super::*;

    fn assert_close(actual: f32, expected: f32) {
        assert!(
            (actual - expected).abs() < 1e-3,
            "{} != {}",
            actual,
            expected
        );
    }

    #[test]
    fn identity_is_level() {
        let angles = to_euler(Quat::IDENTITY);
        assert_eq!(angles, EulerAngles::default());
        assert_eq!(angles.scaled_ints(100.0), [0, 0, 0]);
    }

    #[test]
    fn pitch_clamps_at_gimbal_lock() {
        // sinp = 2 * (w*y - z*x) is exactly +-1 for these
        let up = to_euler(Quat::from_xyzw(0.0, 1.0, 0.0, 0.5));
        assert_close(up.pitch, 90.0);
        assert!(up.roll.is_finite() && up.yaw.is_finite());

        let down = to_euler(Quat::from_xyzw(0.0, -1.0, 0.0, 0.5));
        assert_close(down.pitch, -90.0);

        // sinp from the z*x term alone
        let flipped = to_euler(Quat::from_xyzw(0.5, 0.0, 1.0, 0.0));
        assert_close(flipped.pitch, -90.0);
    }

    #[test]
    fn pitch_sine_past_one_still_clamps() {
        // not normalized, sinp = 2 * 0.8 * 0.8 = 1.28
        let angles = to_euler(Quat::from_xyzw(0.0, 0.8, 0.0, 0.8));
        assert_close(angles.pitch, 90.0);
    }

    #[test]
    fn single_axis_rotations() {
        let roll = to_euler(Quat::from_rotation_x(30f32.to_radians()));
        assert_close(roll.roll, 30.0);
        assert_close(roll.pitch, 0.0);
        assert_close(roll.yaw, 0.0);

        let pitch = to_euler(Quat::from_rotation_y(-45f32.to_radians()));
        assert_close(pitch.pitch, -45.0);

        let yaw = to_euler(Quat::from_rotation_z(170f32.to_radians()));
        assert_close(yaw.yaw, 170.0);
    }

    #[test]
    fn matches_glam_zyx() {
        let q = Quat::from_euler(
            EulerRot::ZYX,
            50f32.to_radians(),
            20f32.to_radians(),
            -10f32.to_radians(),
        );
        let angles = to_euler(q);

        assert_close(angles.yaw, 50.0);
        assert_close(angles.pitch, 20.0);
        assert_close(angles.roll, -10.0);
    }

    #[test]
    fn scaled_ints_truncate_toward_zero() {
        let angles = EulerAngles {
            roll: 1.239,
            pitch: -0.019,
            yaw: -179.999,
        };
        assert_eq!(angles.scaled_ints(100.0), [123, -1, -17999]);
    }
}
