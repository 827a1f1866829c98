pub mod link;

#[cfg(feature = "stm32f4")]
pub mod flash;
#[cfg(feature = "stm32f4")]
pub mod mpu6050;
