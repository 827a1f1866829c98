//! IMU task: reads the MPU6050 at the fixed sample rate and feeds the
//! orientation queue. Recalibrates the gyro bias when the comms manager
//! signals an operator calibrate command.

use embassy_executor::task;
use embassy_stm32::i2c::I2c;
use embassy_stm32::peripherals::{DMA1_CH0, DMA1_CH7, I2C1};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Sender;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Ticker};

use crate::config::{CONTROL_SAMPLE_PERIOD_S, IMU_SAMPLE_HZ};
use crate::drivers::mpu6050::{ComplementaryFilter, Mpu6050};
use crate::state::OrientationSample;
use crate::{log_info, log_warn};

const CALIB_SAMPLES: usize = 100;

#[task]
pub async fn imu_task(
    mut i2c: I2c<'static, I2C1, DMA1_CH7, DMA1_CH0>,
    orientation_tx: Sender<'static, CriticalSectionRawMutex, OrientationSample, 1>,
    calibrate: &'static Signal<CriticalSectionRawMutex, ()>,
) {
    let mut imu = Mpu6050::new();
    if imu.init(&mut i2c).await.is_err() {
        // Keep looping; reads will keep failing and the kernel simply
        // sees missed samples.
        log_warn!("imu: init failed");
    }
    if imu.calibrate_gyro(&mut i2c, CALIB_SAMPLES).await.is_ok() {
        log_info!("imu: gyro bias calibrated");
    }

    let mut fusion = ComplementaryFilter::new(CONTROL_SAMPLE_PERIOD_S);
    let mut ticker = Ticker::every(Duration::from_hz(IMU_SAMPLE_HZ));

    loop {
        ticker.next().await;

        if calibrate.try_take().is_some() {
            log_info!("imu: recalibrating");
            let _ = imu.calibrate_gyro(&mut i2c, CALIB_SAMPLES).await;
        }

        if let Ok(motion) = imu.read_motion(&mut i2c) {
            let sample = fusion.update(&motion);
            // Latest-value queue: an unread sample stays, a fresh one is
            // dropped. The balance loop is faster than 10 Hz so this is
            // the rare case.
            let _ = orientation_tx.try_send(sample);
        }
    }
}
