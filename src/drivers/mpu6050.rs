//! MPU6050 IMU glue: register driver plus the minimal pitch/roll blend
//! feeding the orientation queue. The control kernel only ever sees the
//! fused `OrientationSample`s this module produces.

use embassy_stm32::i2c::{Error, I2c, Instance, RxDma, TxDma};
use embassy_time::{Duration, Timer};
use micromath::F32Ext;

use crate::state::OrientationSample;

const ADDR: u8 = 0x68;

const REG_SMPLRT_DIV: u8 = 0x19;
const REG_CONFIG: u8 = 0x1A;
const REG_GYRO_CONFIG: u8 = 0x1B;
const REG_ACCEL_CONFIG: u8 = 0x1C;
const REG_ACCEL_XOUT_H: u8 = 0x3B;
const REG_PWR_MGMT_1: u8 = 0x6B;
#[allow(dead_code)]
const REG_WHO_AM_I: u8 = 0x75;

// ±4 g and ±500 dps full scale
const ACCEL_LSB_PER_G: f32 = 8192.0;
const GYRO_LSB_PER_DPS: f32 = 65.5;

#[derive(Debug, Default, Clone, Copy)]
pub struct MotionSample {
    /// Accelerations in g.
    pub accel: [f32; 3],
    /// Angular rates in deg/s, bias-corrected.
    pub gyro: [f32; 3],
    pub temp_c: f32,
}

pub struct Mpu6050 {
    gyro_bias: [f32; 3],
}

impl Mpu6050 {
    pub fn new() -> Self {
        Self {
            gyro_bias: [0.0; 3],
        }
    }

    pub async fn init<T: Instance, Tx: TxDma<T>, Rx: RxDma<T>>(
        &mut self,
        i2c: &mut I2c<'_, T, Tx, Rx>,
    ) -> Result<(), Error> {
        // Wake from sleep, clock from the X gyro PLL
        self.write_reg(i2c, REG_PWR_MGMT_1, 0x01)?;
        Timer::after(Duration::from_millis(100)).await;

        // DLPF 44 Hz, internal rate 1 kHz, divider for 100 Hz output
        self.write_reg(i2c, REG_CONFIG, 0x03)?;
        self.write_reg(i2c, REG_SMPLRT_DIV, 9)?;

        // ±500 dps, ±4 g
        self.write_reg(i2c, REG_GYRO_CONFIG, 0x08)?;
        self.write_reg(i2c, REG_ACCEL_CONFIG, 0x08)?;
        Timer::after(Duration::from_millis(50)).await;

        Ok(())
    }

    /// Average `n` still samples into the gyro bias. The robot must not
    /// move while this runs; the comms manager exposes it as the
    /// calibrate command.
    pub async fn calibrate_gyro<T: Instance, Tx: TxDma<T>, Rx: RxDma<T>>(
        &mut self,
        i2c: &mut I2c<'_, T, Tx, Rx>,
        n: usize,
    ) -> Result<(), Error> {
        let mut sum = [0.0f32; 3];
        let old_bias = self.gyro_bias;
        self.gyro_bias = [0.0; 3];
        for _ in 0..n {
            match self.read_motion(i2c) {
                Ok(m) => {
                    for (s, g) in sum.iter_mut().zip(m.gyro.iter()) {
                        *s += *g;
                    }
                }
                Err(e) => {
                    self.gyro_bias = old_bias;
                    return Err(e);
                }
            }
            Timer::after(Duration::from_millis(10)).await;
        }
        for (b, s) in self.gyro_bias.iter_mut().zip(sum.iter()) {
            *b = *s / n as f32;
        }
        Ok(())
    }

    pub fn read_motion<T: Instance, Tx: TxDma<T>, Rx: RxDma<T>>(
        &mut self,
        i2c: &mut I2c<'_, T, Tx, Rx>,
    ) -> Result<MotionSample, Error> {
        // Burst read: accel xyz, temp, gyro xyz
        let mut buf = [0u8; 14];
        i2c.blocking_write_read(ADDR, &[REG_ACCEL_XOUT_H], &mut buf)?;

        let word = |i: usize| i16::from_be_bytes([buf[i], buf[i + 1]]) as f32;

        let mut sample = MotionSample {
            accel: [
                word(0) / ACCEL_LSB_PER_G,
                word(2) / ACCEL_LSB_PER_G,
                word(4) / ACCEL_LSB_PER_G,
            ],
            temp_c: word(6) / 340.0 + 36.53,
            gyro: [
                word(8) / GYRO_LSB_PER_DPS,
                word(10) / GYRO_LSB_PER_DPS,
                word(12) / GYRO_LSB_PER_DPS,
            ],
        };
        for (g, b) in sample.gyro.iter_mut().zip(self.gyro_bias.iter()) {
            *g -= *b;
        }
        Ok(sample)
    }

    fn write_reg<T: Instance, Tx: TxDma<T>, Rx: RxDma<T>>(
        &mut self,
        i2c: &mut I2c<'_, T, Tx, Rx>,
        reg: u8,
        value: u8,
    ) -> Result<(), Error> {
        i2c.blocking_write(ADDR, &[reg, value])
    }
}

/// Complementary pitch/roll blend at the fixed sample period. Yaw is
/// gyro integration only (no magnetometer on this board).
pub struct ComplementaryFilter {
    dt: f32,
    alpha: f32,
    pitch: f32,
    roll: f32,
    yaw: f32,
}

impl ComplementaryFilter {
    pub fn new(dt: f32) -> Self {
        Self {
            dt,
            alpha: 0.98,
            pitch: 0.0,
            roll: 0.0,
            yaw: 0.0,
        }
    }

    pub fn update(&mut self, m: &MotionSample) -> OrientationSample {
        let [ax, ay, az] = m.accel;
        let accel_pitch = ax.atan2((ay * ay + az * az).sqrt()).to_degrees();
        let accel_roll = ay.atan2(az).to_degrees();

        self.pitch = self.alpha * (self.pitch + m.gyro[1] * self.dt) + (1.0 - self.alpha) * accel_pitch;
        self.roll = self.alpha * (self.roll + m.gyro[0] * self.dt) + (1.0 - self.alpha) * accel_roll;
        self.yaw += m.gyro[2] * self.dt;

        OrientationSample {
            pitch: self.pitch,
            roll: self.roll,
            yaw: self.yaw,
            temp_c: m.temp_c,
        }
    }
}
