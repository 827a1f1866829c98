#![cfg_attr(not(test), no_std)]

//! Control kernel for a self-balancing two-wheel robot.
//!
//! The kernel itself (PID engine, safety state machine, motor allocator,
//! comms aggregation) is hardware-independent and builds on the host for
//! testing. Everything that touches an STM32 peripheral sits behind the
//! `stm32f4` feature, which the firmware binary requires.

pub mod logging;

pub mod config;
pub mod control;
pub mod drivers;
pub mod state;
pub mod tasks;

#[cfg(feature = "stm32f4")]
pub mod board;
