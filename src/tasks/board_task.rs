//! Motor-board RX task: parses telemetry frames from the secondary
//! board into the comms manager's input queue.

use embassy_executor::task;
use embassy_stm32::peripherals::{DMA1_CH5, USART2};
use embassy_stm32::usart::UartRx;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Sender;

use crate::drivers::link::{LinkFrame, LinkParser};
use crate::state::BoardStatus;

#[task]
pub async fn board_task(
    mut uart_rx: UartRx<'static, USART2, DMA1_CH5>,
    board_tx: Sender<'static, CriticalSectionRawMutex, BoardStatus, 1>,
) {
    let mut parser = LinkParser::new();
    let mut buf = [0u8; 64];

    loop {
        let Ok(n) = uart_rx.read_until_idle(&mut buf).await else {
            continue;
        };
        for &b in &buf[..n] {
            if let Some(LinkFrame::Board(status)) = parser.push_byte(b) {
                let _ = board_tx.try_send(status);
            }
        }
    }
}
