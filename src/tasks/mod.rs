pub mod balance_loop;
pub mod comms_task;

#[cfg(feature = "stm32f4")]
pub mod board_task;
#[cfg(feature = "stm32f4")]
pub mod imu_task;
#[cfg(feature = "stm32f4")]
pub mod link_task;
#[cfg(feature = "stm32f4")]
pub mod motor_task;
