//! Robot lifecycle state machine.
//!
//! Evaluated once per orientation sample, after the allocator has
//! produced the cycle's motor command. The entry check (Armed to
//! Stabilized) uses the raw pitch so the robot is genuinely near
//! equilibrium before actuation re-enables; the exit check uses a
//! 3-sample moving average so one noisy sample cannot drop the robot.
//! The asymmetry is intentional and load-bearing: tight window in, wide
//! filtered band out.

#[allow(unused_imports)]
use micromath::F32Ext;

use crate::control::filter::MovingAverage;
use crate::control::pid::{ChannelId, PidEngine};
use crate::state::{MotorCommand, RobotStatus};
use crate::{log_info, log_warn};

/// Half-width of the re-entry window around the center angle.
pub const ARM_WINDOW_DEG: f32 = 1.0;

/// Consecutive saturated cycles tolerated before the Error trip. The
/// trip fires on the cycle after this count is exceeded.
pub const SATURATION_LIMIT_CYCLES: u8 = 10;

/// Samples averaged for the safety exit check.
pub const PITCH_AVG_WINDOW: usize = 3;

pub struct SafetyMonitor {
    status: RobotStatus,
    pitch_avg: MovingAverage<PITCH_AVG_WINDOW>,
    saturation_count: u8,
}

impl SafetyMonitor {
    pub const fn new() -> Self {
        Self {
            status: RobotStatus::Init,
            pitch_avg: MovingAverage::new(),
            saturation_count: 0,
        }
    }

    pub fn status(&self) -> RobotStatus {
        self.status
    }

    /// Whether the motor output stage may drive.
    pub fn motors_enabled(&self) -> bool {
        self.status == RobotStatus::Stabilized
    }

    /// One evaluation. Mutates the Angle channel's enable (this is the
    /// only place that touches it) and zeroes `cmd` on any disabling
    /// transition. Returns the status after the evaluation.
    ///
    /// At most one transition happens per sample. Arming out of Init
    /// additionally waits for the average window to fill, so the exit
    /// band is meaningful from the first stabilized cycle.
    pub fn on_sample(
        &mut self,
        engine: &mut PidEngine,
        raw_pitch: f32,
        center_angle: f32,
        safety_limit_deg: f32,
        max_velocity: f32,
        cmd: &mut MotorCommand,
    ) -> RobotStatus {
        self.pitch_avg.push(raw_pitch);

        match self.status {
            RobotStatus::Init => {
                self.status = RobotStatus::Armed;
                log_info!("safety: armed");
            }
            RobotStatus::Armed => {
                let in_window = (raw_pitch - center_angle).abs() <= ARM_WINDOW_DEG;
                if self.pitch_avg.is_full() && in_window {
                    engine.set_enabled(ChannelId::Angle, true);
                    cmd.enabled = true;
                    self.saturation_count = 0;
                    self.status = RobotStatus::Stabilized;
                    log_info!("safety: stabilized at pitch {}", raw_pitch);
                }
            }
            RobotStatus::Stabilized => {
                let avg = self.pitch_avg.average();
                if (avg - center_angle).abs() > safety_limit_deg {
                    self.disarm(engine, cmd);
                    self.status = RobotStatus::Armed;
                    log_warn!("safety: excursion, avg pitch {}", avg);
                } else if self.check_saturation(cmd, max_velocity) {
                    self.disarm(engine, cmd);
                    self.saturation_count = 0;
                    self.status = RobotStatus::Error;
                    log_warn!("safety: actuator saturation, error latched");
                }
            }
            // Terminal; only rearm() leaves it.
            RobotStatus::Error => {}
        }

        if self.status == RobotStatus::Error {
            *cmd = MotorCommand::STOP;
        }
        self.status
    }

    /// External re-arm (operator reset). Leaves Error; any other state
    /// is untouched.
    pub fn rearm(&mut self) {
        if self.status == RobotStatus::Error {
            self.saturation_count = 0;
            self.status = RobotStatus::Armed;
            log_info!("safety: error cleared, re-armed");
        }
    }

    fn disarm(&mut self, engine: &mut PidEngine, cmd: &mut MotorCommand) {
        engine.set_enabled(ChannelId::Angle, false);
        *cmd = MotorCommand::STOP;
    }

    fn check_saturation(&mut self, cmd: &MotorCommand, max_velocity: f32) -> bool {
        if cmd.left.abs() >= max_velocity || cmd.right.abs() >= max_velocity {
            self.saturation_count = self.saturation_count.saturating_add(1);
        } else {
            self.saturation_count = 0;
        }
        self.saturation_count > SATURATION_LIMIT_CYCLES
    }
}
