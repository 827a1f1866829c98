//! Orientation sampling task: the control kernel's hot loop.
//!
//! Clocked by the orientation queue. Each consumed sample runs the
//! allocator, the PID engine and the safety machine in that order, so
//! the engine always observes the channel enables the safety machine
//! set on the previous cycle. The per-sample logic lives in
//! `BalanceLoop` and runs on the host in tests; the embassy task is a
//! thin wrapper around it.

use crate::config::Profile;
use crate::control::mixer::Allocator;
use crate::control::safety::SafetyMonitor;
use crate::state::{MotorCommand, OrientationSample, RobotStatus, SharedPid, SharedState};

pub struct BalanceLoop {
    profile: Profile,
    safety: SafetyMonitor,
    allocator: Allocator,
}

impl BalanceLoop {
    pub const fn new(profile: Profile) -> Self {
        Self {
            profile,
            safety: SafetyMonitor::new(),
            allocator: Allocator::new(),
        }
    }

    pub fn status(&self) -> RobotStatus {
        self.safety.status()
    }

    /// One control cycle. Reads the aggregator-owned field groups,
    /// produces the wheel command, and publishes the kernel-owned
    /// fields back into the shared record.
    pub fn on_sample(
        &mut self,
        sample: OrientationSample,
        state: &SharedState,
        pid: &SharedPid,
    ) -> MotorCommand {
        let (config, direct, distance_m, rearm) = state.lock(|c| {
            let mut s = c.borrow_mut();
            let rearm = s.rearm_requested;
            s.rearm_requested = false;
            (
                s.config,
                s.direct_control,
                s.board_telemetry.distance_m(),
                rearm,
            )
        });
        if rearm {
            self.safety.rearm();
        }

        let (cmd, set_point, status) = pid.lock(|p| {
            let mut engine = p.borrow_mut();
            let (mut cmd, set_point) = self.allocator.allocate(
                &mut engine,
                &self.profile,
                config.center_angle,
                &direct,
                self.safety.status(),
                sample.pitch,
                distance_m,
                self.safety.motors_enabled(),
            );
            let status = self.safety.on_sample(
                &mut engine,
                sample.pitch,
                config.center_angle,
                config.safety_limit_deg,
                self.profile.max_velocity,
                &mut cmd,
            );
            (cmd, set_point, status)
        });

        state.lock(|c| {
            let mut s = c.borrow_mut();
            s.orientation = sample;
            s.motor_command = cmd;
            s.status = status;
            s.angle_set_point = set_point;
        });
        cmd
    }
}

// ── Embassy task ──────────────────────────────────────────────────────────────

#[cfg(feature = "stm32f4")]
#[embassy_executor::task]
pub async fn balance_loop_task(
    orientation_rx: embassy_sync::channel::Receiver<
        'static,
        embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex,
        OrientationSample,
        1,
    >,
    profile: Profile,
) {
    use embassy_time::{with_timeout, Duration};

    use crate::config::SAMPLE_WAIT_MS;
    use crate::log_info;
    use crate::state::{PID_ENGINE, ROBOT_STATE};

    let mut kernel = BalanceLoop::new(profile);
    log_info!("balance loop started");

    loop {
        // Short bounded wait: a missing sample is a skipped cycle, the
        // loop never stalls on the sensor.
        match with_timeout(
            Duration::from_millis(SAMPLE_WAIT_MS),
            orientation_rx.receive(),
        )
        .await
        {
            Ok(sample) => {
                kernel.on_sample(sample, &ROBOT_STATE, &PID_ENGINE);
            }
            Err(_) => continue,
        }
    }
}
