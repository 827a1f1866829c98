//! Comms manager: the one place asynchronous inputs meet the shared
//! robot state.
//!
//! Runs on its own fixed cycle, independent of the orientation sample
//! rate. Every input is drained with a zero-wait check, at most one
//! message per source per cycle; an empty queue is "nothing to do".
//! Outbound work (motor queue, status and config frames, flash writes,
//! the IMU calibrate signal) is returned from `poll` as data so the
//! cycle logic stays host-testable; the embassy wrapper performs the
//! actual I/O.

use crate::config::{RobotConfig, METERS_PER_STEP, TELEMETRY_DIVIDER};
use crate::control::pid::{ChannelId, PidGains};
use crate::state::{
    BoardStatus, BoardTelemetry, DirectControl, MotorCommand, OperatorCommand, SharedPid,
    SharedState, StatusSnapshot, TuningUpdate,
};
use crate::{log_info, log_warn};

/// Everything drained from the input queues this cycle.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommsInputs {
    pub direct: Option<DirectControl>,
    pub tuning: Option<TuningUpdate>,
    pub command: Option<u8>,
    pub board: Option<BoardStatus>,
    pub connected: bool,
}

/// Side effects the wrapper must carry out after `poll`.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommsCycle {
    /// Latest wheel command for the motor-board queue.
    pub motor: Option<MotorCommand>,
    /// Rate-limited dynamic telemetry, only while connected.
    pub telemetry: Option<StatusSnapshot>,
    /// Full configuration snapshot (connected edge or after a save).
    pub config: Option<RobotConfig>,
    /// Configuration to persist (operator save command).
    pub save_config: Option<RobotConfig>,
    /// Forward a recalibration request to the IMU task.
    pub calibrate_imu: bool,
}

pub struct CommsManager {
    tick: u32,
    was_connected: bool,
}

impl CommsManager {
    pub const fn new() -> Self {
        Self {
            tick: 0,
            was_connected: false,
        }
    }

    pub fn poll(
        &mut self,
        inputs: CommsInputs,
        state: &SharedState,
        pid: &SharedPid,
    ) -> CommsCycle {
        let mut out = CommsCycle::default();

        if let Some(direct) = inputs.direct {
            state.lock(|c| c.borrow_mut().direct_control = direct);
        }

        if let Some(tuning) = inputs.tuning {
            apply_tuning(&tuning, state, pid);
        }

        if let Some(code) = inputs.command {
            match OperatorCommand::from_code(code) {
                Some(OperatorCommand::CalibrateImu) => {
                    log_info!("comms: imu calibration requested");
                    out.calibrate_imu = true;
                }
                Some(OperatorCommand::SaveConfig) => {
                    let cfg = state.lock(|c| c.borrow().config);
                    out.save_config = Some(cfg);
                    out.config = Some(cfg);
                    log_info!("comms: saving configuration");
                }
                Some(OperatorCommand::ResetError) => {
                    state.lock(|c| c.borrow_mut().rearm_requested = true);
                    log_info!("comms: error reset requested");
                }
                None => log_warn!("comms: unknown command code {}", code),
            }
        }

        if let Some(board) = inputs.board {
            let telemetry = BoardTelemetry {
                battery_mv: board.battery_mv,
                board_temp_c: board.board_temp_c,
                speed_l: board.speed_l,
                speed_r: board.speed_r,
                position_l_m: board.position_l_steps as f32 * METERS_PER_STEP,
                position_r_m: board.position_r_steps as f32 * METERS_PER_STEP,
                distance_cm: board.distance_cm,
            };
            state.lock(|c| c.borrow_mut().board_telemetry = telemetry);
        }

        // The motor board always gets the latest command, even when no
        // inputs arrived this cycle.
        out.motor = Some(state.lock(|c| c.borrow().motor_command));

        if inputs.connected && !self.was_connected {
            out.config = Some(state.lock(|c| c.borrow().config));
            log_info!("comms: link up, configuration republished");
        }
        if inputs.connected && self.tick % TELEMETRY_DIVIDER == 0 {
            out.telemetry = Some(snapshot(state));
        }

        self.was_connected = inputs.connected;
        self.tick = self.tick.wrapping_add(1);
        out
    }
}

/// Tuning lands in the engine and the shared config together. The
/// center angle and safety limit ride only on Angle frames.
fn apply_tuning(t: &TuningUpdate, state: &SharedState, pid: &SharedPid) {
    let gains = PidGains::new(t.kp, t.ki, t.kd);
    pid.lock(|p| {
        let mut engine = p.borrow_mut();
        engine.set_constants(t.channel, gains);
        if t.channel == ChannelId::Angle {
            engine.set_set_point(ChannelId::Angle, t.center_angle);
        }
    });
    state.lock(|c| {
        let mut s = c.borrow_mut();
        s.config.pid[t.channel as usize] = gains;
        if t.channel == ChannelId::Angle {
            s.config.center_angle = t.center_angle;
            s.config.safety_limit_deg = t.safety_limit_deg;
        }
    });
    log_info!(
        "comms: tuning ch {} kp {} ki {} kd {}",
        t.channel.as_u8(),
        t.kp,
        t.ki,
        t.kd
    );
}

fn snapshot(state: &SharedState) -> StatusSnapshot {
    state.lock(|c| {
        let s = c.borrow();
        StatusSnapshot {
            pitch: s.orientation.pitch,
            roll: s.orientation.roll,
            yaw: s.orientation.yaw,
            set_point: s.angle_set_point,
            center_angle: s.config.center_angle,
            battery_mv: s.board_telemetry.battery_mv,
            board_temp_c: s.board_telemetry.board_temp_c,
            speed_l: s.board_telemetry.speed_l,
            speed_r: s.board_telemetry.speed_r,
            distance_cm: s.board_telemetry.distance_cm,
            status: s.status.as_u8(),
        }
    })
}

// ── Embassy task ──────────────────────────────────────────────────────────────

#[cfg(feature = "stm32f4")]
#[embassy_executor::task]
pub async fn comms_task(
    mut link_tx: embassy_stm32::usart::UartTx<
        'static,
        embassy_stm32::peripherals::USART1,
        embassy_stm32::peripherals::DMA2_CH7,
    >,
    link_state: embassy_stm32::gpio::Input<'static, embassy_stm32::gpio::AnyPin>,
    mut flash: crate::drivers::flash::ConfigFlash,
    direct_rx: Rx<DirectControl, 1>,
    tuning_rx: Rx<TuningUpdate, 1>,
    command_rx: Rx<u8, 1>,
    board_rx: Rx<BoardStatus, 1>,
    motor_tx: embassy_sync::channel::Sender<
        'static,
        embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex,
        MotorCommand,
        5,
    >,
    calibrate: &'static embassy_sync::signal::Signal<
        embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex,
        (),
    >,
) {
    use embassy_time::{Duration, Ticker};

    use crate::config::COMMS_CYCLE_MS;
    use crate::drivers::link::{encode_config, encode_status};
    use crate::state::{PID_ENGINE, ROBOT_STATE};

    let mut manager = CommsManager::new();
    let mut ticker = Ticker::every(Duration::from_millis(COMMS_CYCLE_MS));
    log_info!("comms manager started");

    loop {
        ticker.next().await;

        let inputs = CommsInputs {
            direct: direct_rx.try_receive().ok(),
            tuning: tuning_rx.try_receive().ok(),
            command: command_rx.try_receive().ok(),
            board: board_rx.try_receive().ok(),
            connected: link_state.is_high(),
        };
        let cycle = manager.poll(inputs, &ROBOT_STATE, &PID_ENGINE);

        if cycle.calibrate_imu {
            calibrate.signal(());
        }
        if let Some(cfg) = cycle.save_config {
            if flash.write_config(&cfg).await.is_err() {
                log_warn!("comms: configuration save failed");
            }
        }
        if let Some(cmd) = cycle.motor {
            // Zero-wait publication; a full queue drops this cycle's
            // command in favor of the ones already queued.
            let _ = motor_tx.try_send(cmd);
        }

        let mut buf = [0u8; 64];
        if let Some(cfg) = cycle.config {
            let n = encode_config(&mut buf, &cfg);
            let _ = link_tx.write(&buf[..n]).await;
        }
        if let Some(snap) = cycle.telemetry {
            let n = encode_status(&mut buf, &snap);
            let _ = link_tx.write(&buf[..n]).await;
        }
    }
}

#[cfg(feature = "stm32f4")]
type Rx<T, const N: usize> = embassy_sync::channel::Receiver<
    'static,
    embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex,
    T,
    N,
>;

#[cfg(test)]
mod tests {
    use core::cell::RefCell;

    use embassy_sync::blocking_mutex::Mutex;

    use super::*;
    use crate::control::pid::PidEngine;
    use crate::state::{RobotState, RobotStatus};

    fn shared() -> (SharedState, SharedPid) {
        let state: SharedState = Mutex::new(RefCell::new(RobotState::new(RobotConfig::DEFAULT)));
        let pid: SharedPid = Mutex::new(RefCell::new(PidEngine::new(0.1)));
        pid.lock(|p| p.borrow_mut().apply_gains(&RobotConfig::DEFAULT.pid));
        (state, pid)
    }

    fn quiet() -> CommsInputs {
        CommsInputs::default()
    }

    #[test]
    fn empty_cycle_still_publishes_the_motor_command() {
        let (state, pid) = shared();
        state.lock(|c| {
            c.borrow_mut().motor_command = MotorCommand {
                left: 120.0,
                right: -120.0,
                enabled: true,
            }
        });

        let mut m = CommsManager::new();
        let out = m.poll(quiet(), &state, &pid);
        assert_eq!(
            out.motor,
            Some(MotorCommand {
                left: 120.0,
                right: -120.0,
                enabled: true,
            })
        );
        assert!(out.telemetry.is_none());
        assert!(out.config.is_none());
        assert!(out.save_config.is_none());
        assert!(!out.calibrate_imu);
    }

    #[test]
    fn direct_control_lands_in_the_shared_record() {
        let (state, pid) = shared();
        let mut m = CommsManager::new();
        let mut inputs = quiet();
        inputs.direct = Some(DirectControl {
            axis_x: 0.3,
            axis_y: -0.4,
            compass_yaw: 180.0,
        });
        m.poll(inputs, &state, &pid);
        state.lock(|c| {
            let d = c.borrow().direct_control;
            assert_eq!(d.axis_x, 0.3);
            assert_eq!(d.axis_y, -0.4);
        });
    }

    #[test]
    fn angle_tuning_updates_engine_and_config() {
        let (state, pid) = shared();
        let mut m = CommsManager::new();
        let mut inputs = quiet();
        inputs.tuning = Some(TuningUpdate {
            channel: ChannelId::Angle,
            kp: 0.6,
            ki: 0.1,
            kd: 1.0,
            center_angle: 2.5,
            safety_limit_deg: 40.0,
        });
        m.poll(inputs, &state, &pid);

        state.lock(|c| {
            let cfg = c.borrow().config;
            assert_eq!(cfg.pid[0], PidGains::new(0.6, 0.1, 1.0));
            assert_eq!(cfg.center_angle, 2.5);
            assert_eq!(cfg.safety_limit_deg, 40.0);
        });
        pid.lock(|p| {
            let e = p.borrow();
            assert_eq!(e.gains(ChannelId::Angle), PidGains::new(0.6, 0.1, 1.0));
            assert_eq!(e.set_point(ChannelId::Angle), 2.5);
        });

        // Applying the identical frame again changes nothing.
        let before = state.lock(|c| c.borrow().config);
        m.poll(inputs, &state, &pid);
        let after = state.lock(|c| c.borrow().config);
        assert_eq!(before, after);
    }

    #[test]
    fn position_tuning_leaves_center_angle_alone() {
        let (state, pid) = shared();
        let mut m = CommsManager::new();
        let mut inputs = quiet();
        inputs.tuning = Some(TuningUpdate {
            channel: ChannelId::Position,
            kp: 1.5,
            ki: 0.0,
            kd: 0.3,
            center_angle: 9.0,
            safety_limit_deg: 9.0,
        });
        m.poll(inputs, &state, &pid);
        state.lock(|c| {
            let cfg = c.borrow().config;
            assert_eq!(cfg.pid[1], PidGains::new(1.5, 0.0, 0.3));
            assert_eq!(cfg.center_angle, RobotConfig::DEFAULT.center_angle);
            assert_eq!(cfg.safety_limit_deg, RobotConfig::DEFAULT.safety_limit_deg);
        });
    }

    #[test]
    fn board_positions_convert_to_meters() {
        let (state, pid) = shared();
        let mut m = CommsManager::new();
        let mut inputs = quiet();
        inputs.board = Some(BoardStatus {
            battery_mv: 7400,
            board_temp_c: 31.0,
            speed_l: 10.0,
            speed_r: 12.0,
            position_l_steps: 10000,
            position_r_steps: 20000,
            distance_cm: 80,
        });
        m.poll(inputs, &state, &pid);
        state.lock(|c| {
            let t = c.borrow().board_telemetry;
            assert_eq!(t.position_l_m, 10000.0 * METERS_PER_STEP);
            assert_eq!(t.position_r_m, 20000.0 * METERS_PER_STEP);
            assert_eq!(t.distance_m(), 15000.0 * METERS_PER_STEP);
        });
    }

    #[test]
    fn operator_commands_map_to_effects() {
        let (state, pid) = shared();
        let mut m = CommsManager::new();

        let mut inputs = quiet();
        inputs.command = Some(0x01);
        assert!(m.poll(inputs, &state, &pid).calibrate_imu);

        inputs.command = Some(0x02);
        let out = m.poll(inputs, &state, &pid);
        assert_eq!(out.save_config, Some(RobotConfig::DEFAULT));
        // Saving also republishes the configuration.
        assert_eq!(out.config, Some(RobotConfig::DEFAULT));

        inputs.command = Some(0x03);
        m.poll(inputs, &state, &pid);
        state.lock(|c| assert!(c.borrow().rearm_requested));
    }

    #[test]
    fn unknown_command_has_no_effect() {
        let (state, pid) = shared();
        let mut m = CommsManager::new();
        let mut inputs = quiet();
        inputs.command = Some(0x77);
        let out = m.poll(inputs, &state, &pid);
        assert!(out.save_config.is_none());
        assert!(!out.calibrate_imu);
        state.lock(|c| assert!(!c.borrow().rearm_requested));
    }

    #[test]
    fn config_republishes_on_connect_edge_only() {
        let (state, pid) = shared();
        let mut m = CommsManager::new();

        let mut inputs = quiet();
        inputs.connected = true;
        assert!(m.poll(inputs, &state, &pid).config.is_some());
        assert!(m.poll(inputs, &state, &pid).config.is_none());

        // Drop and re-establish the link: republished once more.
        assert!(m.poll(quiet(), &state, &pid).config.is_none());
        assert!(m.poll(inputs, &state, &pid).config.is_some());
    }

    #[test]
    fn telemetry_is_rate_limited_and_gated_on_connection() {
        let (state, pid) = shared();
        state.lock(|c| c.borrow_mut().status = RobotStatus::Stabilized);
        let mut m = CommsManager::new();

        let mut inputs = quiet();
        inputs.connected = true;
        let mut sent = 0;
        for _ in 0..(2 * TELEMETRY_DIVIDER) {
            if let Some(snap) = m.poll(inputs, &state, &pid).telemetry {
                assert_eq!(snap.status, RobotStatus::Stabilized.as_u8());
                sent += 1;
            }
        }
        assert_eq!(sent, 2);

        // Disconnected: no telemetry at all.
        for _ in 0..(2 * TELEMETRY_DIVIDER) {
            assert!(m.poll(quiet(), &state, &pid).telemetry.is_none());
        }
    }

    #[test]
    fn snapshot_carries_the_kernel_fields() {
        let (state, pid) = shared();
        state.lock(|c| {
            let mut s = c.borrow_mut();
            s.orientation.pitch = 1.25;
            s.angle_set_point = 2.5;
            s.board_telemetry.battery_mv = 7900;
        });
        let mut m = CommsManager::new();
        let mut inputs = quiet();
        inputs.connected = true;
        let snap = m.poll(inputs, &state, &pid).telemetry.unwrap();
        assert_eq!(snap.pitch, 1.25);
        assert_eq!(snap.set_point, 2.5);
        assert_eq!(snap.battery_mv, 7900);
    }
}
