//! Attitude/position allocator.
//!
//! Turns remote intent plus the balance loop's PID output into the two
//! wheel commands. Three additive terms, clamped to the profile's
//! maximum velocity:
//!
//! 1. yaw: `axis_x` scaled to the maximum rotation rate, opposite sign
//!    per wheel;
//! 2. a set-point offset: manual pitch intent, or the Position channel
//!    while position hold is engaged (never both);
//! 3. balance: the Angle channel output scaled to the maximum velocity,
//!    same sign on both wheels.

#[allow(unused_imports)]
use micromath::F32Ext;

use crate::config::Profile;
use crate::control::pid::{ChannelId, PidEngine};
use crate::log_info;
use crate::state::{DirectControl, MotorCommand, RobotStatus};

pub struct Allocator {
    position_hold: bool,
}

impl Allocator {
    pub const fn new() -> Self {
        Self {
            position_hold: false,
        }
    }

    pub fn position_hold_active(&self) -> bool {
        self.position_hold
    }

    /// One allocation cycle. `status` and `motors_enabled` come from
    /// the safety machine's previous evaluation, so the channel enables
    /// this cycle observes are the ones set there.
    ///
    /// Returns the wheel command and the Angle set-point applied.
    pub fn allocate(
        &mut self,
        engine: &mut PidEngine,
        profile: &Profile,
        center_angle: f32,
        direct: &DirectControl,
        status: RobotStatus,
        pitch: f32,
        distance_m: f32,
        motors_enabled: bool,
    ) -> (MotorCommand, f32) {
        let offset = self.set_point_offset(engine, profile, direct, status, distance_m);

        let set_point = center_angle + offset;
        engine.set_set_point(ChannelId::Angle, set_point);

        let balance = engine.calculate(ChannelId::Angle, pitch) * profile.max_velocity;

        if !motors_enabled {
            // Keep tracking the set-point while disarmed, but never
            // command the wheels.
            return (MotorCommand::STOP, set_point);
        }

        let yaw = direct.axis_x * profile.max_rotation_rate;
        let cmd = MotorCommand {
            left: (balance + yaw).clamp(-profile.max_velocity, profile.max_velocity),
            right: (balance - yaw).clamp(-profile.max_velocity, profile.max_velocity),
            enabled: true,
        };
        (cmd, set_point)
    }

    /// Pick the single active set-point offset source. Manual pitch
    /// intent wins; position hold engages only with both sticks neutral
    /// on a stabilized platform, and captures the current distance as
    /// its set-point on entry.
    fn set_point_offset(
        &mut self,
        engine: &mut PidEngine,
        profile: &Profile,
        direct: &DirectControl,
        status: RobotStatus,
        distance_m: f32,
    ) -> f32 {
        let x_neutral = direct.axis_x.abs() <= profile.stick_deadband;
        let y_neutral = direct.axis_y.abs() <= profile.stick_deadband;

        if !y_neutral {
            self.leave_position_hold(engine);
            return direct.axis_y.clamp(-1.0, 1.0) * profile.max_tilt_angle_deg;
        }

        let hold_possible =
            profile.position_hold && x_neutral && status == RobotStatus::Stabilized;
        if !hold_possible {
            self.leave_position_hold(engine);
            return 0.0;
        }

        if !self.position_hold {
            engine.set_set_point(ChannelId::Position, distance_m);
            engine.set_enabled(ChannelId::Position, true);
            self.position_hold = true;
            log_info!("mixer: position hold at {} m", distance_m);
        }
        engine.calculate(ChannelId::Position, distance_m) * profile.max_tilt_angle_deg
    }

    fn leave_position_hold(&mut self, engine: &mut PidEngine) {
        if self.position_hold {
            engine.set_enabled(ChannelId::Position, false);
            self.position_hold = false;
            log_info!("mixer: position hold released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::pid::PidGains;

    const PROFILE: Profile = Profile::STANDARD;

    fn engine() -> PidEngine {
        let mut e = PidEngine::new(0.1);
        e.set_constants(ChannelId::Angle, PidGains::new(0.5, 0.0, 0.0));
        e.set_constants(ChannelId::Position, PidGains::new(1.0, 0.0, 0.0));
        e.set_enabled(ChannelId::Angle, true);
        e
    }

    fn neutral() -> DirectControl {
        DirectControl::default()
    }

    #[test]
    fn balance_term_drives_both_wheels_alike() {
        let mut a = Allocator::new();
        let mut e = engine();
        // Pitch 1 degree past center: error -1, kp 0.5 -> -0.5 -> -500.
        let (cmd, sp) = a.allocate(
            &mut e,
            &PROFILE,
            0.0,
            &neutral(),
            RobotStatus::Stabilized,
            1.0,
            0.0,
            true,
        );
        assert_eq!(sp, 0.0);
        assert_eq!(cmd.left, -500.0);
        assert_eq!(cmd.right, -500.0);
        assert!(cmd.enabled);
    }

    #[test]
    fn yaw_term_is_differential() {
        let mut a = Allocator::new();
        let mut e = engine();
        let direct = DirectControl {
            axis_x: 0.5,
            axis_y: 0.0,
            compass_yaw: 0.0,
        };
        let (cmd, _) = a.allocate(
            &mut e,
            &PROFILE,
            0.0,
            &direct,
            RobotStatus::Stabilized,
            0.0,
            0.0,
            true,
        );
        assert_eq!(cmd.left, 150.0);
        assert_eq!(cmd.right, -150.0);
    }

    #[test]
    fn output_clamps_when_terms_stack() {
        let mut a = Allocator::new();
        let mut e = engine();
        let direct = DirectControl {
            axis_x: 1.0,
            axis_y: 0.0,
            compass_yaw: 0.0,
        };
        // Balance saturates at -1000 on its own; adding yaw must not
        // push either wheel past the bound.
        let (cmd, _) = a.allocate(
            &mut e,
            &PROFILE,
            0.0,
            &direct,
            RobotStatus::Stabilized,
            20.0,
            0.0,
            true,
        );
        assert!(cmd.left.abs() <= PROFILE.max_velocity);
        assert!(cmd.right.abs() <= PROFILE.max_velocity);
        assert_eq!(cmd.right, -PROFILE.max_velocity);
    }

    #[test]
    fn manual_pitch_offsets_the_set_point() {
        let mut a = Allocator::new();
        let mut e = engine();
        let direct = DirectControl {
            axis_x: 0.0,
            axis_y: 0.5,
            compass_yaw: 0.0,
        };
        let (_, sp) = a.allocate(
            &mut e,
            &PROFILE,
            1.0,
            &direct,
            RobotStatus::Stabilized,
            0.0,
            0.0,
            true,
        );
        assert_eq!(sp, 1.0 + 0.5 * PROFILE.max_tilt_angle_deg);
        assert!(!a.position_hold_active());
    }

    #[test]
    fn position_hold_engages_on_neutral_sticks_and_captures_distance() {
        let mut a = Allocator::new();
        let mut e = engine();
        let (_, sp) = a.allocate(
            &mut e,
            &PROFILE,
            0.0,
            &neutral(),
            RobotStatus::Stabilized,
            0.0,
            3.0,
            true,
        );
        assert!(a.position_hold_active());
        assert!(e.is_enabled(ChannelId::Position));
        assert_eq!(e.set_point(ChannelId::Position), 3.0);
        // At the captured distance the offset is zero.
        assert_eq!(sp, 0.0);

        // Drift forward by one meter: offset leans the robot back.
        let (_, sp) = a.allocate(
            &mut e,
            &PROFILE,
            0.0,
            &neutral(),
            RobotStatus::Stabilized,
            0.0,
            4.0,
            true,
        );
        assert!(sp < 0.0);
    }

    #[test]
    fn stick_input_releases_position_hold() {
        let mut a = Allocator::new();
        let mut e = engine();
        a.allocate(
            &mut e,
            &PROFILE,
            0.0,
            &neutral(),
            RobotStatus::Stabilized,
            0.0,
            3.0,
            true,
        );
        assert!(a.position_hold_active());

        let direct = DirectControl {
            axis_x: 0.0,
            axis_y: 0.8,
            compass_yaw: 0.0,
        };
        let (_, sp) = a.allocate(
            &mut e,
            &PROFILE,
            0.0,
            &direct,
            RobotStatus::Stabilized,
            0.0,
            3.0,
            true,
        );
        assert!(!a.position_hold_active());
        assert!(!e.is_enabled(ChannelId::Position));
        // Only the manual source is active now.
        assert_eq!(sp, 0.8 * PROFILE.max_tilt_angle_deg);
    }

    #[test]
    fn yaw_stick_alone_blocks_position_hold() {
        let mut a = Allocator::new();
        let mut e = engine();
        let direct = DirectControl {
            axis_x: 0.6,
            axis_y: 0.0,
            compass_yaw: 0.0,
        };
        let (_, sp) = a.allocate(
            &mut e,
            &PROFILE,
            0.0,
            &direct,
            RobotStatus::Stabilized,
            0.0,
            2.0,
            true,
        );
        assert!(!a.position_hold_active());
        assert_eq!(sp, 0.0);
    }

    #[test]
    fn no_position_hold_off_profile() {
        let mut a = Allocator::new();
        let mut e = engine();
        a.allocate(
            &mut e,
            &Profile::BENCH,
            0.0,
            &neutral(),
            RobotStatus::Stabilized,
            0.0,
            3.0,
            true,
        );
        assert!(!a.position_hold_active());
    }

    #[test]
    fn disarmed_output_is_stopped_but_set_point_tracks() {
        let mut a = Allocator::new();
        let mut e = engine();
        let direct = DirectControl {
            axis_x: 1.0,
            axis_y: 1.0,
            compass_yaw: 0.0,
        };
        let (cmd, sp) = a.allocate(
            &mut e,
            &PROFILE,
            0.0,
            &direct,
            RobotStatus::Armed,
            5.0,
            0.0,
            false,
        );
        assert_eq!(cmd, MotorCommand::STOP);
        assert_eq!(sp, PROFILE.max_tilt_angle_deg);
    }
}
