//! W25Qxx SPI flash as the configuration store.
//!
//! One sector holds the serialized `RobotConfig` block. Read once at
//! startup, written only on the operator's save command.

use embassy_stm32::dma::NoDma;
use embassy_stm32::gpio::{AnyPin, Output};
use embassy_stm32::peripherals::SPI1;
use embassy_stm32::spi::{Error, Instance, Spi};
use embassy_time::{Duration, Timer};

use crate::config::{RobotConfig, CONFIG_BLOCK_LEN};

const CMD_JEDEC_ID: u8 = 0x9F;
const CMD_READ_DATA: u8 = 0x03;
const CMD_WRITE_ENABLE: u8 = 0x06;
const CMD_PAGE_PROGRAM: u8 = 0x02;
const CMD_SECTOR_ERASE: u8 = 0x20;
const CMD_READ_STATUS: u8 = 0x05;

const STATUS_BUSY: u8 = 0x01;

/// First sector is reserved for the configuration block.
const CONFIG_ADDR: u32 = 0x0000_0000;

pub struct W25qxx<'d, T: Instance, Tx, Rx> {
    spi: Spi<'d, T, Tx, Rx>,
    cs: Output<'d, AnyPin>,
}

/// Concrete wiring used by the firmware.
pub type ConfigFlash = W25qxx<'static, SPI1, NoDma, NoDma>;

impl<'d, T: Instance, Tx, Rx> W25qxx<'d, T, Tx, Rx> {
    pub fn new(spi: Spi<'d, T, Tx, Rx>, cs: Output<'d, AnyPin>) -> Self {
        Self { spi, cs }
    }

    pub async fn read_id(&mut self) -> Result<[u8; 3], Error> {
        let mut id = [0u8; 3];
        self.cs.set_low();
        let res = self
            .spi
            .blocking_write(&[CMD_JEDEC_ID])
            .and_then(|_| self.spi.blocking_read(&mut id));
        self.cs.set_high();
        res?;
        Ok(id)
    }

    pub async fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), Error> {
        self.cs.set_low();
        let res = self
            .spi
            .blocking_write(&cmd_addr(CMD_READ_DATA, addr))
            .and_then(|_| self.spi.blocking_read(buf));
        self.cs.set_high();
        res
    }

    /// Erase the sector at `addr` and program `data` into it. `data`
    /// must fit one page (256 bytes), which the config block does.
    pub async fn erase_and_program(&mut self, addr: u32, data: &[u8]) -> Result<(), Error> {
        self.write_enable()?;
        self.command(&cmd_addr(CMD_SECTOR_ERASE, addr))?;
        self.wait_idle().await?;

        self.write_enable()?;
        self.cs.set_low();
        let res = self
            .spi
            .blocking_write(&cmd_addr(CMD_PAGE_PROGRAM, addr))
            .and_then(|_| self.spi.blocking_write(data));
        self.cs.set_high();
        res?;
        self.wait_idle().await
    }

    pub async fn read_config(&mut self) -> Result<Option<RobotConfig>, Error> {
        let mut buf = [0u8; CONFIG_BLOCK_LEN];
        self.read(CONFIG_ADDR, &mut buf).await?;
        Ok(RobotConfig::from_bytes(&buf))
    }

    pub async fn write_config(&mut self, cfg: &RobotConfig) -> Result<(), Error> {
        self.erase_and_program(CONFIG_ADDR, &cfg.to_bytes()).await
    }

    fn write_enable(&mut self) -> Result<(), Error> {
        self.command(&[CMD_WRITE_ENABLE])
    }

    fn command(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.cs.set_low();
        let res = self.spi.blocking_write(bytes);
        self.cs.set_high();
        res
    }

    async fn wait_idle(&mut self) -> Result<(), Error> {
        loop {
            let mut status = [0u8; 1];
            self.cs.set_low();
            let res = self
                .spi
                .blocking_write(&[CMD_READ_STATUS])
                .and_then(|_| self.spi.blocking_read(&mut status));
            self.cs.set_high();
            res?;
            if status[0] & STATUS_BUSY == 0 {
                return Ok(());
            }
            Timer::after(Duration::from_millis(1)).await;
        }
    }
}

fn cmd_addr(cmd: u8, addr: u32) -> [u8; 4] {
    [cmd, (addr >> 16) as u8, (addr >> 8) as u8, addr as u8]
}
