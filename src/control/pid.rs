//! Multi-channel discrete PID engine.
//!
//! One channel per control loop (balance angle, linear position). The
//! engine runs at a fixed sample period decided at construction — no dt
//! is passed to `calculate`, so `ki`/`kd` are implicitly scaled for that
//! period and changing the sample rate requires re-tuning.
//!
//! The engine is the one genuinely shared mutable resource in the
//! kernel: tuning writes arrive from the comms task while `calculate`
//! runs on the balance loop. It therefore always lives behind
//! `state::PID_ENGINE` (a blocking mutex) outside of tests.

/// Number of PID channels the engine carries.
pub const N_CHANNELS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChannelId {
    /// Primary balance loop on robot pitch.
    Angle = 0,
    /// Secondary position-hold loop on travelled distance.
    Position = 1,
}

impl ChannelId {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Angle),
            1 => Some(Self::Position),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Proportional/integral/derivative constants for one channel.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PidGains {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
}

impl PidGains {
    pub const fn new(kp: f32, ki: f32, kd: f32) -> Self {
        Self { kp, ki, kd }
    }
}

#[derive(Clone, Copy)]
struct PidChannel {
    gains: PidGains,
    set_point: f32,
    integral: f32,
    prev_measurement: f32,
    enabled: bool,
}

impl PidChannel {
    const IDLE: Self = Self {
        gains: PidGains::new(0.0, 0.0, 0.0),
        set_point: 0.0,
        integral: 0.0,
        prev_measurement: 0.0,
        enabled: false,
    };
}

/// Fixed-period PID engine with normalized output in [-1.0, 1.0].
pub struct PidEngine {
    channels: [PidChannel; N_CHANNELS],
    out_limit: f32,
    sample_period_s: f32,
}

impl PidEngine {
    /// `sample_period_s` is the period the balance loop consumes
    /// orientation samples at. It is recorded here to make the
    /// fixed-timestep assumption part of the engine's contract.
    pub const fn new(sample_period_s: f32) -> Self {
        Self {
            channels: [PidChannel::IDLE; N_CHANNELS],
            out_limit: 1.0,
            sample_period_s,
        }
    }

    pub fn sample_period_s(&self) -> f32 {
        self.sample_period_s
    }

    /// One control step for `id`. Returns 0.0 without touching channel
    /// state while the channel is disabled.
    ///
    /// The integral accumulator is clamped to the output range before
    /// the output itself is clamped, so a saturated loop unwinds as soon
    /// as the error changes sign. Derivative acts on the measurement to
    /// avoid set-point kick.
    pub fn calculate(&mut self, id: ChannelId, measurement: f32) -> f32 {
        let ch = &mut self.channels[id as usize];
        if !ch.enabled {
            return 0.0;
        }

        let error = ch.set_point - measurement;

        ch.integral = (ch.integral + ch.gains.ki * error).clamp(-self.out_limit, self.out_limit);

        let derivative = measurement - ch.prev_measurement;
        ch.prev_measurement = measurement;

        (ch.gains.kp * error + ch.integral - ch.gains.kd * derivative)
            .clamp(-self.out_limit, self.out_limit)
    }

    pub fn set_constants(&mut self, id: ChannelId, gains: PidGains) {
        self.channels[id as usize].gains = gains;
    }

    pub fn set_set_point(&mut self, id: ChannelId, value: f32) {
        self.channels[id as usize].set_point = value;
    }

    /// Enabling a disabled channel clears its accumulator and derivative
    /// history so no windup carries over from the disabled period.
    pub fn set_enabled(&mut self, id: ChannelId, enabled: bool) {
        let ch = &mut self.channels[id as usize];
        if enabled && !ch.enabled {
            ch.integral = 0.0;
            ch.prev_measurement = 0.0;
        }
        ch.enabled = enabled;
    }

    pub fn is_enabled(&self, id: ChannelId) -> bool {
        self.channels[id as usize].enabled
    }

    pub fn set_point(&self, id: ChannelId) -> f32 {
        self.channels[id as usize].set_point
    }

    pub fn gains(&self, id: ChannelId) -> PidGains {
        self.channels[id as usize].gains
    }

    pub fn apply_gains(&mut self, gains: &[PidGains; N_CHANNELS]) {
        for (ch, g) in self.channels.iter_mut().zip(gains.iter()) {
            ch.gains = *g;
        }
    }
}
