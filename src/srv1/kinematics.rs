// Differential-drive motion model for the SRV-1
// Converts body-frame velocities (linear, angular) to signed 8-bit wheel codes.
//
// The platform only accepts wheel codes. Their effect on ground speed was fit
// empirically with a cubic that has no convenient closed-form inverse, so the
// inverse is a linear scan over codes.

/// Platform geometry
pub const MAX_VEL_X: f64 = 0.315; // m/s
pub const MAX_VEL_W: f64 = 2.69; // rad/s
pub const AXLE_LENGTH: f64 = 0.258; // meters
pub const DIAMETER: f64 = 0.10; // meters

/// Effective wheel separation used for angular velocity
pub const WHEEL_BASIS: f64 = 0.234; // meters

/// Codes below this magnitude do not move the wheel
pub const DEAD_ZONE_CODE: i8 = 20;
pub const MAX_CODE: i8 = 127;

/// Requests below this magnitude (m/s or rad/s) snap to zero
const MIN_COMMAND: f64 = 0.05;

/// Rotation error tolerated at saturation before reporting it (rad/s)
const ROTATION_TOLERANCE: f64 = 0.01;

/// Cubic fit of wheel code magnitude to ground speed, 0th..3rd order
const VELOCITY_FIT: [f64; 4] = [-0.26129, 0.01628, -0.00016261, 5.5277e-7];

/// Wheel codes for the two drive motors
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WheelCodes {
    pub left: i8,
    pub right: i8,
}

impl WheelCodes {
    pub fn new(left: i8, right: i8) -> Self {
        Self { left, right }
    }

    pub fn zero() -> Self {
        Self::default()
    }
}

/// A request the platform could not honour exactly. Never fatal: a best-effort
/// command is still produced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MotionLimit {
    /// Linear speed beyond the rated maximum, clamped to the extreme code
    OutOfRange { requested: f64, clamped: i8 },
    /// Rotation not reachable before a wheel saturated
    Unattainable { requested: f64, achieved: f64 },
}

/// Wheel codes chosen for a velocity request, and what they actually achieve
#[derive(Debug, Clone, PartialEq)]
pub struct MotionPlan {
    pub wheels: WheelCodes,
    pub linear: f64,
    pub angular: f64,
    pub limits: Vec<MotionLimit>,
}

/// Ground speed (m/s) produced by a wheel code. Symmetric in sign.
pub fn forward(code: i8) -> f64 {
    let magnitude = f64::from(code.unsigned_abs());
    if magnitude < f64::from(DEAD_ZONE_CODE) {
        return 0.0;
    }

    let [c0, c1, c2, c3] = VELOCITY_FIT;
    let speed = c0 + c1 * magnitude + c2 * magnitude * magnitude
        + c3 * magnitude * magnitude * magnitude;

    if code > 0 { speed } else { -speed }
}

/// Largest wheel code whose ground speed does not exceed `velocity`.
///
/// Saturates to +/-127 beyond [`MAX_VEL_X`] and snaps to 0 below 0.05 m/s.
pub fn inverse(velocity: f64) -> i8 {
    if velocity.abs() > MAX_VEL_X {
        return if velocity > 0.0 { MAX_CODE } else { -MAX_CODE };
    }
    if velocity.abs() < MIN_COMMAND {
        return 0;
    }

    let target = velocity.abs();
    let mut code = DEAD_ZONE_CODE;
    while code < MAX_CODE && forward(code + 1) <= target {
        code += 1;
    }

    if velocity < 0.0 { -code } else { code }
}

/// Angular velocity (rad/s, counter-clockwise positive) of a wheel pair
pub fn angular(left: i8, right: i8) -> f64 {
    (forward(right) - forward(left)) / WHEEL_BASIS
}

/// Linear velocity (m/s) of a wheel pair
pub fn linear(left: i8, right: i8) -> f64 {
    (forward(left) + forward(right)) / 2.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Turn {
    /// Raising angular velocity
    Ccw,
    /// Lowering angular velocity
    Cw,
}

/// Perturb the wheel codes chosen for linear motion until `target` angular
/// velocity (rad/s) is met.
///
/// Walks one code at a time in the direction that closes the gap and stops
/// as soon as the direction would reverse, keeping the pair reached at that
/// moment. Stationary wheels diverge symmetrically (snapping to the dead-zone
/// edge first); a forward-moving base only speeds up a wheel, a backward-moving
/// base only speeds up a wheel in reverse.
pub fn rotate(target: f64, wheels: WheelCodes) -> (WheelCodes, Option<MotionLimit>) {
    if target.abs() < MIN_COMMAND {
        return (wheels, None);
    }

    let max = i32::from(MAX_CODE);
    let dead = i32::from(DEAD_ZONE_CODE);
    let mut l = i32::from(wheels.left).clamp(-max, max);
    let mut r = i32::from(wheels.right).clamp(-max, max);
    let mut turning: Option<Turn> = None;
    let achieved = |l: i32, r: i32| angular(l as i8, r as i8);

    if l == 0 && r == 0 {
        while l > -max && l < max && r > -max && r < max {
            let current = achieved(l, r);
            if current < target {
                if turning == Some(Turn::Cw) {
                    break;
                }
                if r < dead {
                    r = dead;
                    l = -r;
                }
                l -= 1;
                r += 1;
                turning = Some(Turn::Ccw);
            } else if current > target {
                if turning == Some(Turn::Ccw) {
                    break;
                }
                if l < dead {
                    l = dead;
                    r = -l;
                }
                l += 1;
                r -= 1;
                turning = Some(Turn::Cw);
            } else {
                break;
            }
        }
    } else if l > 0 || (l == 0 && r > 0) {
        while l < max && r < max {
            let current = achieved(l, r);
            if current < target {
                if turning == Some(Turn::Cw) {
                    break;
                }
                r += 1;
                turning = Some(Turn::Ccw);
            } else if current > target {
                if turning == Some(Turn::Ccw) {
                    break;
                }
                l += 1;
                turning = Some(Turn::Cw);
            } else {
                break;
            }
        }
    } else {
        while l > -max && r > -max {
            let current = achieved(l, r);
            if current < target {
                if turning == Some(Turn::Cw) {
                    break;
                }
                l -= 1;
                turning = Some(Turn::Ccw);
            } else if current > target {
                if turning == Some(Turn::Ccw) {
                    break;
                }
                r -= 1;
                turning = Some(Turn::Cw);
            } else {
                break;
            }
        }
    }

    let result = WheelCodes::new(l as i8, r as i8);
    let saturated = l.abs() == max || r.abs() == max;
    let got = angular(result.left, result.right);
    let limit = (saturated && (target - got).abs() > ROTATION_TOLERANCE).then_some(
        MotionLimit::Unattainable {
            requested: target,
            achieved: got,
        },
    );

    (result, limit)
}

/// Choose wheel codes for a (linear m/s, angular rad/s) request.
///
/// Forward velocity takes precedence: rotation only perturbs the codes
/// already chosen for `linear`. The reported velocities come from the final
/// codes, not from the request.
pub fn plan(linear_request: f64, angular_request: f64) -> MotionPlan {
    let mut limits = Vec::new();

    let code = inverse(linear_request);
    if linear_request.abs() > MAX_VEL_X {
        limits.push(MotionLimit::OutOfRange {
            requested: linear_request,
            clamped: code,
        });
    }

    let (wheels, rotation_limit) = rotate(angular_request, WheelCodes::new(code, code));
    limits.extend(rotation_limit);

    MotionPlan {
        wheels,
        linear: linear(wheels.left, wheels.right),
        angular: angular(wheels.left, wheels.right),
        limits,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_dead_zone() {
        for code in -19..=19 {
            assert_eq!(forward(code), 0.0, "code {} should not move", code);
        }
        assert!(forward(20) > 0.0);
        assert!(forward(-20) < 0.0);
    }

    #[test]
    fn test_forward_full_scale_near_rated_max() {
        let top = forward(MAX_CODE);
        assert!((top - MAX_VEL_X).abs() < 0.005, "forward(127) = {}", top);
    }

    #[test]
    fn test_inverse_snaps_and_saturates() {
        assert_eq!(inverse(0.0), 0);
        assert_eq!(inverse(0.049), 0);
        assert_eq!(inverse(-0.049), 0);
        assert_eq!(inverse(0.4), 127);
        assert_eq!(inverse(-1.0), -127);
    }

    #[test]
    fn test_inverse_known_codes() {
        assert_eq!(inverse(0.1), 30);
        assert_eq!(inverse(0.2), 46);
        assert_eq!(inverse(-0.2), -46);
    }

    #[test]
    fn test_rotate_small_target_is_noop() {
        let wheels = WheelCodes::new(46, 46);
        assert_eq!(rotate(0.04, wheels), (wheels, None));
        assert_eq!(rotate(-0.04, WheelCodes::zero()), (WheelCodes::zero(), None));
    }

    #[test]
    fn test_rotate_in_place_is_symmetric() {
        let (ccw, limit) = rotate(0.5, WheelCodes::zero());
        assert!(ccw.left < 0 && ccw.right > 0, "{:?}", ccw);
        assert_eq!(ccw.left, -ccw.right);
        assert!(ccw.right.abs() > DEAD_ZONE_CODE);
        assert!(limit.is_none());

        let (cw, _) = rotate(-0.5, WheelCodes::zero());
        assert_eq!(cw, WheelCodes::new(ccw.right, ccw.left));
    }

    #[test]
    fn test_rotate_keeps_pair_at_reversal() {
        // The first step from rest already overshoots a small target; the
        // search stops there rather than stepping back.
        let (wheels, _) = rotate(0.06, WheelCodes::zero());
        assert_eq!(wheels, WheelCodes::new(-21, 21));
        assert!(angular(wheels.left, wheels.right) > 0.06);
    }

    #[test]
    fn test_rotate_forward_only_speeds_up_one_wheel() {
        let start = WheelCodes::new(46, 46);

        let (ccw, _) = rotate(0.3, start);
        assert_eq!(ccw.left, 46);
        assert!(ccw.right > 46);

        let (cw, _) = rotate(-0.3, start);
        assert_eq!(cw.right, 46);
        assert!(cw.left > 46);
    }

    #[test]
    fn test_rotate_backward_only_speeds_up_reverse() {
        let start = WheelCodes::new(-46, -46);

        let (ccw, _) = rotate(0.3, start);
        assert_eq!(ccw.right, -46);
        assert!(ccw.left < -46);
        assert!(angular(ccw.left, ccw.right) > 0.0);

        let (cw, _) = rotate(-0.3, start);
        assert_eq!(cw.left, -46);
        assert!(cw.right < -46);
    }

    #[test]
    fn test_rotate_reports_unattainable() {
        let (wheels, limit) = rotate(3.0, WheelCodes::zero());
        assert_eq!(wheels, WheelCodes::new(-127, 127));
        assert!(matches!(
            limit,
            Some(MotionLimit::Unattainable { requested, .. }) if requested == 3.0
        ));

        // Saturated but within tolerance of the target is fine
        let (wheels, limit) = rotate(0.5, WheelCodes::new(46, 46));
        assert_eq!(wheels.right, 127);
        assert!(limit.is_none());
    }

    #[test]
    fn test_plan_pure_forward() {
        let plan = plan(0.2, 0.0);
        assert_eq!(plan.wheels, WheelCodes::new(46, 46));
        assert_eq!(plan.linear, forward(46));
        assert_eq!(plan.angular, 0.0);
        assert!(plan.limits.is_empty());
    }

    #[test]
    fn test_plan_reports_velocities_from_final_codes() {
        let plan = plan(0.0, 0.5);
        assert!(plan.linear.abs() < 1e-12);
        assert!((plan.angular - angular(plan.wheels.left, plan.wheels.right)).abs() < 1e-12);
        assert!(plan.angular >= 0.5);
    }

    #[test]
    fn test_plan_out_of_range() {
        let plan = plan(0.5, 0.0);
        assert_eq!(plan.wheels, WheelCodes::new(127, 127));
        assert_eq!(
            plan.limits,
            vec![MotionLimit::OutOfRange {
                requested: 0.5,
                clamped: 127
            }]
        );
    }

    proptest! {
        #[test]
        fn prop_forward_is_odd_and_monotonic(code in 20i8..=126) {
            prop_assert_eq!(forward(code), -forward(-code));
            prop_assert!(forward(code + 1) > forward(code));
        }

        #[test]
        fn prop_inverse_is_closest_from_below(v in 0.05f64..=0.315, negative in any::<bool>()) {
            let request = if negative { -v } else { v };
            let code = inverse(request);

            prop_assert_eq!(code.signum(), if negative { -1 } else { 1 });
            prop_assert!(forward(code).abs() <= v);
            if code.unsigned_abs() < 127 {
                prop_assert!(forward(code.abs() + 1) > v);
            }
        }

        #[test]
        fn prop_inverse_saturates_beyond_rating(v in 0.3151f64..10.0) {
            prop_assert_eq!(inverse(v), 127);
            prop_assert_eq!(inverse(-v), -127);
        }

        #[test]
        fn prop_rotation_from_rest_turns_the_right_way(dw in 0.05f64..3.0) {
            let (wheels, _) = rotate(dw, WheelCodes::zero());
            prop_assert!(wheels.left < 0 && wheels.right > 0);
            prop_assert_eq!(wheels.left, -wheels.right);
        }
    }
}
