//! Motor output task: drains the command queue and writes velocity
//! frames to the secondary board. The board itself turns them into
//! step pulses.

use embassy_executor::task;
use embassy_stm32::peripherals::{DMA1_CH6, USART2};
use embassy_stm32::usart::UartTx;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Receiver;

use crate::drivers::link::encode_motor_command;
use crate::state::MotorCommand;

#[task]
pub async fn motor_task(
    mut uart_tx: UartTx<'static, USART2, DMA1_CH6>,
    motor_rx: Receiver<'static, CriticalSectionRawMutex, MotorCommand, 5>,
) {
    let mut buf = [0u8; 16];
    loop {
        let cmd = motor_rx.receive().await;
        let n = encode_motor_command(&mut buf, &cmd);
        let _ = uart_tx.write(&buf[..n]).await;
    }
}
