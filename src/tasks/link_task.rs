//! App link RX task: parses the Bluetooth UART byte stream into typed
//! frames and fans them out to the comms manager's input queues.

use embassy_executor::task;
use embassy_stm32::peripherals::{DMA2_CH2, USART1};
use embassy_stm32::usart::UartRx;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Sender;

use crate::drivers::link::{LinkFrame, LinkParser};
use crate::state::{DirectControl, TuningUpdate};

#[task]
pub async fn link_task(
    mut uart_rx: UartRx<'static, USART1, DMA2_CH2>,
    direct_tx: Sender<'static, CriticalSectionRawMutex, DirectControl, 1>,
    tuning_tx: Sender<'static, CriticalSectionRawMutex, TuningUpdate, 1>,
    command_tx: Sender<'static, CriticalSectionRawMutex, u8, 1>,
) {
    let mut parser = LinkParser::new();
    let mut buf = [0u8; 64];

    loop {
        let Ok(n) = uart_rx.read_until_idle(&mut buf).await else {
            continue;
        };
        for &b in &buf[..n] {
            let Some(frame) = parser.push_byte(b) else {
                continue;
            };
            // Latest-value queues: if the comms manager has not drained
            // the previous frame yet, the newer one is dropped.
            match frame {
                LinkFrame::Direct(d) => {
                    let _ = direct_tx.try_send(d);
                }
                LinkFrame::Tuning(t) => {
                    let _ = tuning_tx.try_send(t);
                }
                LinkFrame::Command(c) => {
                    let _ = command_tx.try_send(c);
                }
                // Board frames do not arrive on the app link.
                LinkFrame::Board(_) => {}
            }
        }
    }
}
