//! Shared robot state and inter-task message types.
//!
//! `RobotState` is the single shared record every task works against.
//! It lives behind a blocking mutex with short critical sections; the
//! locking is cheap because writers follow a single-writer-per-field-
//! group discipline:
//!
//! - `orientation`, `motor_command`, `status`, `angle_set_point`:
//!   written only by the balance loop.
//! - `direct_control`, `board_telemetry`, `config`: written only by the
//!   comms manager.
//! - `rearm_requested`: set by the comms manager on an operator reset,
//!   cleared by the balance loop when consumed (the one flag handshake).
//!
//! Readers of another task's fields see at worst one-cycle-stale values,
//! which is fine — control cycles are far faster than the mechanics.
//!
//! Message types are `Copy` and travel over bounded embassy channels,
//! capacity 1 for latest-value inputs and 5 for the motor queue.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

use crate::config::{RobotConfig, CONTROL_SAMPLE_PERIOD_S};
use crate::control::pid::{ChannelId, PidEngine};

// ── Message types ─────────────────────────────────────────────────────────────

/// One fused orientation sample from the IMU collaborator, degrees.
#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OrientationSample {
    pub pitch: f32,
    pub roll: f32,
    pub yaw: f32,
    pub temp_c: f32,
}

/// Wheel velocity command for the motor board, magnitude-bounded by the
/// profile's `max_velocity`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MotorCommand {
    pub left: f32,
    pub right: f32,
    pub enabled: bool,
}

impl MotorCommand {
    pub const STOP: Self = Self {
        left: 0.0,
        right: 0.0,
        enabled: false,
    };
}

/// Manual-control intent from the remote, axes normalized to [-1, 1].
#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DirectControl {
    pub axis_x: f32,
    pub axis_y: f32,
    pub compass_yaw: f32,
}

/// One tuning frame from the app. Center angle and safety limit are
/// applied only when the frame targets the Angle channel.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TuningUpdate {
    pub channel: ChannelId,
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
    pub center_angle: f32,
    pub safety_limit_deg: f32,
}

/// Operator commands carried as a one-byte code on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OperatorCommand {
    CalibrateImu,
    SaveConfig,
    ResetError,
}

impl OperatorCommand {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::CalibrateImu),
            0x02 => Some(Self::SaveConfig),
            0x03 => Some(Self::ResetError),
            _ => None,
        }
    }
}

/// Raw telemetry frame from the secondary motor board. Positions are in
/// steps; the comms manager converts them to meters.
#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BoardStatus {
    pub battery_mv: u16,
    pub board_temp_c: f32,
    pub speed_l: f32,
    pub speed_r: f32,
    pub position_l_steps: i32,
    pub position_r_steps: i32,
    pub distance_cm: u16,
}

/// Secondary-board feedback as stored in `RobotState`, positions in
/// meters.
#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BoardTelemetry {
    pub battery_mv: u16,
    pub board_temp_c: f32,
    pub speed_l: f32,
    pub speed_r: f32,
    pub position_l_m: f32,
    pub position_r_m: f32,
    pub distance_cm: u16,
}

impl BoardTelemetry {
    /// Mean travelled distance of both wheels; the Position channel's
    /// measurement.
    pub fn distance_m(&self) -> f32 {
        (self.position_l_m + self.position_r_m) * 0.5
    }
}

/// Everything the app sees in one dynamic telemetry frame.
#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StatusSnapshot {
    pub pitch: f32,
    pub roll: f32,
    pub yaw: f32,
    pub set_point: f32,
    pub center_angle: f32,
    pub battery_mv: u16,
    pub board_temp_c: f32,
    pub speed_l: f32,
    pub speed_r: f32,
    pub distance_cm: u16,
    pub status: u8,
}

// ── Robot status ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RobotStatus {
    /// Startup, before the first enable.
    Init,
    /// Motors disabled, waiting near the balance point.
    Armed,
    /// Angle loop closed, motors driven.
    Stabilized,
    /// Terminal until an operator reset re-arms.
    Error,
}

impl RobotStatus {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Init => 0,
            Self::Armed => 1,
            Self::Stabilized => 2,
            Self::Error => 3,
        }
    }
}

// ── The shared record ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct RobotState {
    pub orientation: OrientationSample,
    pub motor_command: MotorCommand,
    pub status: RobotStatus,
    pub config: RobotConfig,
    pub direct_control: DirectControl,
    pub board_telemetry: BoardTelemetry,
    /// Angle set-point currently applied (center + active offset).
    pub angle_set_point: f32,
    /// Operator reset pending; consumed by the balance loop.
    pub rearm_requested: bool,
}

impl RobotState {
    pub const fn new(config: RobotConfig) -> Self {
        Self {
            orientation: OrientationSample {
                pitch: 0.0,
                roll: 0.0,
                yaw: 0.0,
                temp_c: 0.0,
            },
            motor_command: MotorCommand::STOP,
            status: RobotStatus::Init,
            config,
            direct_control: DirectControl {
                axis_x: 0.0,
                axis_y: 0.0,
                compass_yaw: 0.0,
            },
            board_telemetry: BoardTelemetry {
                battery_mv: 0,
                board_temp_c: 0.0,
                speed_l: 0.0,
                speed_r: 0.0,
                position_l_m: 0.0,
                position_r_m: 0.0,
                distance_cm: 0,
            },
            angle_set_point: config.center_angle,
            rearm_requested: false,
        }
    }
}

pub type SharedState = Mutex<CriticalSectionRawMutex, RefCell<RobotState>>;
pub type SharedPid = Mutex<CriticalSectionRawMutex, RefCell<PidEngine>>;

/// The one shared record (see the writer discipline above).
pub static ROBOT_STATE: SharedState =
    Mutex::new(RefCell::new(RobotState::new(RobotConfig::DEFAULT)));

/// The PID engine, shared between the balance loop (`calculate`) and
/// the comms manager (tuning writes) — it is the one resource both
/// tasks mutate and the reason for the explicit lock.
pub static PID_ENGINE: SharedPid =
    Mutex::new(RefCell::new(PidEngine::new(CONTROL_SAMPLE_PERIOD_S)));
