#![no_std]
#![no_main]

use embassy_executor::Spawner;
use embassy_stm32::dma::NoDma;
use embassy_stm32::gpio::{Input, Level, Output, Pin, Pull, Speed};
use embassy_stm32::i2c::I2c;
use embassy_stm32::spi::{Config as SpiConfig, Spi};
use embassy_stm32::time::Hertz as TimeHertz;
use embassy_stm32::usart::{Config as UsartConfig, Uart};
use embassy_stm32::{bind_interrupts, peripherals};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Timer};
use {defmt_rtt as _, panic_probe as _};

use balance_controller::board::Board;
use balance_controller::config::{Profile, RobotConfig};
use balance_controller::control::pid::ChannelId;
use balance_controller::drivers::flash::W25qxx;
use balance_controller::state::{
    BoardStatus, DirectControl, MotorCommand, OrientationSample, TuningUpdate, PID_ENGINE,
    ROBOT_STATE,
};
use balance_controller::tasks;
use balance_controller::{log_info, log_warn};

// ── Inter-task channels ───────────────────────────────────────────────────────
//  Cap=1: latest-value inputs; an undrained message simply goes stale.
//  Cap=5: the motor queue, matching the board link's burst tolerance.
static ORIENTATION_CHAN: Channel<CriticalSectionRawMutex, OrientationSample, 1> = Channel::new();
static DIRECT_CHAN: Channel<CriticalSectionRawMutex, DirectControl, 1> = Channel::new();
static TUNING_CHAN: Channel<CriticalSectionRawMutex, TuningUpdate, 1> = Channel::new();
static COMMAND_CHAN: Channel<CriticalSectionRawMutex, u8, 1> = Channel::new();
static BOARD_CHAN: Channel<CriticalSectionRawMutex, BoardStatus, 1> = Channel::new();
static MOTOR_CHAN: Channel<CriticalSectionRawMutex, MotorCommand, 5> = Channel::new();

static CALIBRATE_SIGNAL: Signal<CriticalSectionRawMutex, ()> = Signal::new();

// ── Interrupt bindings ────────────────────────────────────────────────────────
bind_interrupts!(struct Irqs {
    I2C1_EV  => embassy_stm32::i2c::EventInterruptHandler<peripherals::I2C1>;
    I2C1_ER  => embassy_stm32::i2c::ErrorInterruptHandler<peripherals::I2C1>;
    USART1   => embassy_stm32::usart::InterruptHandler<peripherals::USART1>;
    USART2   => embassy_stm32::usart::InterruptHandler<peripherals::USART2>;
});

// ── Main ──────────────────────────────────────────────────────────────────────
#[embassy_executor::main]
async fn main(spawner: Spawner) {
    // 1. Board init (168 MHz PLL)
    let board = Board::init();
    let p = board.p;

    // 2. Hardware profile. Both variants share the same code path; the
    //    bench build just skips the motor-board tasks.
    let profile = Profile::STANDARD;

    // 3. I2C1 @ 400 kHz — MPU6050 IMU (SCL=PB8, SDA=PB9)
    let i2c = I2c::new(
        p.I2C1,
        p.PB8,
        p.PB9,
        Irqs,
        p.DMA1_CH7,
        p.DMA1_CH0,
        TimeHertz(400_000),
        Default::default(),
    );

    // 4. SPI1 @ 8 MHz — W25Qxx config flash (SCK=PA5, MOSI=PA7, MISO=PA6, CS=PA4)
    let mut spi_config = SpiConfig::default();
    spi_config.frequency = TimeHertz(8_000_000);
    let spi = Spi::new(p.SPI1, p.PA5, p.PA7, p.PA6, NoDma, NoDma, spi_config);
    let cs_flash = Output::new(p.PA4.degrade(), Level::High, Speed::VeryHigh);
    let mut flash = W25qxx::new(spi, cs_flash);

    // 5. USART1 @ 115200 — HC-05 app link (TX=PA9, RX=PA10, STATE=PA8)
    let mut link_config = UsartConfig::default();
    link_config.baudrate = 115_200;
    let link_uart = Uart::new(
        p.USART1, p.PA10, p.PA9,
        Irqs,
        p.DMA2_CH7, p.DMA2_CH2,
        link_config,
    ).unwrap();
    let (link_uart_tx, link_uart_rx) = link_uart.split();
    let link_state = Input::new(p.PA8.degrade(), Pull::Down);

    // 6. USART2 @ 115200 — secondary motor board (TX=PA2, RX=PA3)
    let mut motor_config = UsartConfig::default();
    motor_config.baudrate = 115_200;
    let motor_uart = Uart::new(
        p.USART2, p.PA3, p.PA2,
        Irqs,
        p.DMA1_CH6, p.DMA1_CH5,
        motor_config,
    ).unwrap();
    let (motor_uart_tx, motor_uart_rx) = motor_uart.split();

    // 7. Heartbeat LED (PC13)
    let mut led = Output::new(p.PC13, Level::High, Speed::Low);

    // 8. Load the persisted configuration; defaults on absent/corrupt.
    Timer::after(Duration::from_millis(50)).await;
    let config = match flash.read_config().await {
        Ok(Some(cfg)) => cfg,
        Ok(None) => {
            log_warn!("no stored configuration, using defaults");
            RobotConfig::DEFAULT
        }
        Err(_) => {
            log_warn!("configuration read failed, using defaults");
            RobotConfig::DEFAULT
        }
    };
    log_info!(
        "config: center {} limit {} kp {}",
        config.center_angle,
        config.safety_limit_deg,
        config.pid[0].kp
    );

    ROBOT_STATE.lock(|c| {
        let mut s = c.borrow_mut();
        s.config = config;
        s.angle_set_point = config.center_angle;
    });
    PID_ENGINE.lock(|e| {
        let mut engine = e.borrow_mut();
        engine.apply_gains(&config.pid);
        engine.set_set_point(ChannelId::Angle, config.center_angle);
    });

    // 9. Spawn the kernel and glue tasks
    spawner.spawn(tasks::imu_task::imu_task(
        i2c,
        ORIENTATION_CHAN.sender(),
        &CALIBRATE_SIGNAL,
    )).unwrap();

    spawner.spawn(tasks::balance_loop::balance_loop_task(
        ORIENTATION_CHAN.receiver(),
        profile,
    )).unwrap();

    spawner.spawn(tasks::link_task::link_task(
        link_uart_rx,
        DIRECT_CHAN.sender(),
        TUNING_CHAN.sender(),
        COMMAND_CHAN.sender(),
    )).unwrap();

    if profile.has_motor_board {
        spawner.spawn(tasks::board_task::board_task(
            motor_uart_rx,
            BOARD_CHAN.sender(),
        )).unwrap();

        spawner.spawn(tasks::motor_task::motor_task(
            motor_uart_tx,
            MOTOR_CHAN.receiver(),
        )).unwrap();
    }

    spawner.spawn(tasks::comms_task::comms_task(
        link_uart_tx,
        link_state,
        flash,
        DIRECT_CHAN.receiver(),
        TUNING_CHAN.receiver(),
        COMMAND_CHAN.receiver(),
        BOARD_CHAN.receiver(),
        MOTOR_CHAN.sender(),
        &CALIBRATE_SIGNAL,
    )).unwrap();

    // 10. Main task: LED heartbeat @ 1 Hz
    loop {
        led.toggle();
        Timer::after(Duration::from_millis(500)).await;
    }
}
