//! Robot configuration.
//!
//! Two layers: `RobotConfig` holds the operator-tunable parameters that
//! are persisted to flash and patched over the link at runtime, while
//! `Profile` fixes the hardware variant at startup (maximum velocities,
//! presence of position hold and of the secondary motor board). All
//! variants share one code path parameterized by the profile — there is
//! no source-level branching per robot build.

use crate::control::pid::{PidGains, N_CHANNELS};
use crate::drivers::link::crc8;

// ── Timing ────────────────────────────────────────────────────────────────────

/// Orientation sample rate delivered by the IMU collaborator.
pub const IMU_SAMPLE_HZ: u64 = 10;

/// Fixed control period the PID engine is tuned for. Derived from
/// `IMU_SAMPLE_HZ`; changing one without the other invalidates ki/kd.
pub const CONTROL_SAMPLE_PERIOD_S: f32 = 0.1;

/// Bounded wait for one orientation sample before the balance loop
/// gives the cycle up. A timeout is a missed sample, not an error.
pub const SAMPLE_WAIT_MS: u64 = 5;

/// Comms manager cycle, independent of the orientation sample rate.
pub const COMMS_CYCLE_MS: u64 = 50;

/// Dynamic telemetry goes out every Nth comms cycle while connected.
pub const TELEMETRY_DIVIDER: u32 = 5;

// ── Scaling ───────────────────────────────────────────────────────────────────

/// Angles are sent over the link as integers scaled by this factor.
pub const TELEMETRY_ANGLE_SCALE: f32 = 100.0;

/// Travelled distance per motor step: 100 mm wheel, 2000 steps/rev.
pub const METERS_PER_STEP: f32 = 0.000157;

// ── Tunable configuration (persisted) ─────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RobotConfig {
    /// Pitch at which the robot balances; the Angle set-point is always
    /// this plus at most one active offset.
    pub center_angle: f32,
    /// Half-width of the band around `center_angle` outside which the
    /// safety machine disables actuation.
    pub safety_limit_deg: f32,
    pub pid: [PidGains; N_CHANNELS],
}

impl RobotConfig {
    pub const DEFAULT: Self = Self {
        center_angle: 0.0,
        safety_limit_deg: 45.0,
        pid: [
            PidGains::new(0.55, 0.05, 0.85), // Angle
            PidGains::new(0.80, 0.00, 0.20), // Position
        ],
    };
}

// ── Persisted block format ────────────────────────────────────────────────────
// [magic u32][version u8][center f32][limit f32][gains 2 × 3 × f32][crc8]
// All little-endian. The crc covers everything before it.

const CONFIG_MAGIC: u32 = 0x424C_4346; // "BLCF"
const CONFIG_VERSION: u8 = 1;
pub const CONFIG_BLOCK_LEN: usize = 4 + 1 + 4 + 4 + N_CHANNELS * 12 + 1;

impl RobotConfig {
    pub fn to_bytes(&self) -> [u8; CONFIG_BLOCK_LEN] {
        let mut buf = [0u8; CONFIG_BLOCK_LEN];
        buf[0..4].copy_from_slice(&CONFIG_MAGIC.to_le_bytes());
        buf[4] = CONFIG_VERSION;
        buf[5..9].copy_from_slice(&self.center_angle.to_le_bytes());
        buf[9..13].copy_from_slice(&self.safety_limit_deg.to_le_bytes());
        let mut at = 13;
        for g in &self.pid {
            buf[at..at + 4].copy_from_slice(&g.kp.to_le_bytes());
            buf[at + 4..at + 8].copy_from_slice(&g.ki.to_le_bytes());
            buf[at + 8..at + 12].copy_from_slice(&g.kd.to_le_bytes());
            at += 12;
        }
        buf[CONFIG_BLOCK_LEN - 1] = crc8(&buf[..CONFIG_BLOCK_LEN - 1]);
        buf
    }

    /// Decode a persisted block. `None` on any mismatch — the caller
    /// falls back to `RobotConfig::DEFAULT`.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < CONFIG_BLOCK_LEN {
            return None;
        }
        let bytes = &bytes[..CONFIG_BLOCK_LEN];
        if u32::from_le_bytes(bytes[0..4].try_into().ok()?) != CONFIG_MAGIC {
            return None;
        }
        if bytes[4] != CONFIG_VERSION {
            return None;
        }
        if crc8(&bytes[..CONFIG_BLOCK_LEN - 1]) != bytes[CONFIG_BLOCK_LEN - 1] {
            return None;
        }

        let f = |at: usize| f32::from_le_bytes(bytes[at..at + 4].try_into().unwrap());
        let mut pid = [PidGains::default(); N_CHANNELS];
        for (i, g) in pid.iter_mut().enumerate() {
            let at = 13 + i * 12;
            *g = PidGains::new(f(at), f(at + 4), f(at + 8));
        }

        let cfg = Self {
            center_angle: f(5),
            safety_limit_deg: f(9),
            pid,
        };
        if !cfg.safety_limit_deg.is_finite() || cfg.safety_limit_deg <= 0.0 {
            return None;
        }
        Some(cfg)
    }
}

// ── Hardware profile (fixed at startup) ───────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct Profile {
    /// Wheel command magnitude bound, in motor-board velocity units.
    pub max_velocity: f32,
    /// Yaw term magnitude at full stick deflection.
    pub max_rotation_rate: f32,
    /// Set-point offset in degrees at full pitch stick deflection.
    pub max_tilt_angle_deg: f32,
    /// Stick magnitude below which an axis counts as neutral.
    pub stick_deadband: f32,
    /// Whether the platform supports position hold (needs odometry
    /// feedback from the motor board).
    pub position_hold: bool,
    /// Whether a secondary motor-control board is attached.
    pub has_motor_board: bool,
    /// Documented control period; must match `CONTROL_SAMPLE_PERIOD_S`.
    pub sample_period_s: f32,
}

impl Profile {
    /// Full robot: motor board with odometry, position hold available.
    pub const STANDARD: Self = Self {
        max_velocity: 1000.0,
        max_rotation_rate: 300.0,
        max_tilt_angle_deg: 6.0,
        stick_deadband: 0.05,
        position_hold: true,
        has_motor_board: true,
        sample_period_s: CONTROL_SAMPLE_PERIOD_S,
    };

    /// Bench variant without the secondary board: balance only.
    pub const BENCH: Self = Self {
        position_hold: false,
        has_motor_board: false,
        ..Self::STANDARD
    };
}
