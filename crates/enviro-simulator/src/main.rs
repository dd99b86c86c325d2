//! Desktop simulator for the Elora environmental sensor panel.
//!
//! Drives the real enviro-core drivers and polling aggregator against
//! register-level sensor models on a simulated I2C bus, with a simulated
//! millisecond clock, and prints the OLED panel as text.
//!
//! # Usage
//!
//! ```text
//! enviro-simulator [SECONDS] [FLAKY_ADDRESS]
//! ```
//!
//! `SECONDS` is the simulated run time (default 30). `FLAKY_ADDRESS` (hex,
//! e.g. `40`) makes that device NACK every seventh second to exercise the
//! recovery path. Set `RUST_LOG=debug` to watch the state machines.

use std::cell::{Cell, RefCell};

use embassy_time::Instant;
use embedded_graphics::pixelcolor::BinaryColor;
use embedded_graphics::prelude::*;
use embedded_graphics_simulator::SimulatorDisplay;
use log::{info, warn};

use enviro_core::config::SensorsConfig;
use enviro_core::display::SensorPanel;
use enviro_core::sensors::Monotonic;
use enviro_core::sensors_state::SensorsState;
use enviro_core::sim::{Bme68xModel, Ccs811Model, Htu21dModel, NoDelay, SimBus, SimField};
use enviro_core::storage::{BASELINE_RECORD_MAX_LEN, BaselineRecord};

// ---------------------------------------------------------------------------
// Timing constants
// ---------------------------------------------------------------------------

/// Simulated scheduler tick.
const TICK_MS: u64 = 10;

/// How often the environment models change.
const ENVIRONMENT_STEP_MS: u64 = 1000;

/// How often the panel is printed.
const RENDER_EVERY_MS: u64 = 5000;

const DEFAULT_RUN_SECS: u64 = 30;

const PANEL_WIDTH: u32 = 128;
const PANEL_HEIGHT: u32 = 64;

// ---------------------------------------------------------------------------
// Simulated clock
// ---------------------------------------------------------------------------

/// Millisecond clock advanced by the main loop.
struct SimClock {
    now_ms: Cell<u64>,
}

impl SimClock {
    fn new() -> Self {
        Self { now_ms: Cell::new(0) }
    }

    fn advance(&self, ms: u64) {
        self.now_ms.set(self.now_ms.get() + ms);
    }

    fn millis(&self) -> u64 {
        self.now_ms.get()
    }
}

impl Monotonic for SimClock {
    fn now(&self) -> Instant {
        Instant::from_millis(self.now_ms.get())
    }
}

// ---------------------------------------------------------------------------
// Synthetic environment
// ---------------------------------------------------------------------------

/// Pushes slowly varying conditions into the sensor models.
struct MockEnvironment {
    elapsed_secs: f64,
}

impl MockEnvironment {
    fn new() -> Self {
        Self { elapsed_secs: 0.0 }
    }

    fn step(&mut self, bus: &mut SimBus, dt_secs: f64) {
        self.elapsed_secs += dt_secs;
        let t = self.elapsed_secs;

        // Temperature: 20–26 °C, humidity: 35–55 %
        let temperature = 23.0 + 3.0 * (t / 60.0).sin();
        let humidity = 45.0 + 10.0 * (t / 90.0).sin();
        // eCO2 400–800 ppm, TVOC follows it loosely
        let eco2 = 600.0 + 200.0 * (t / 45.0).sin();
        let tvoc = 30.0 + 25.0 * (t / 45.0).sin();

        if let Some(htu) = bus.htu21d_mut() {
            htu.set_temperature(temperature as f32);
            htu.set_humidity(humidity as f32);
        }
        if let Some(ccs) = bus.ccs811_mut() {
            ccs.publish(eco2 as u16, tvoc as u16);
        }
        if let Some(bme) = bus.bme68x_mut() {
            // Range 8 spans roughly 50 kΩ (clean) down to 23 kΩ (stale air)
            let gas_adc = 512.0 + 400.0 * (t / 30.0).sin();
            bme.stage_fields(&[SimField {
                temperature_adc: (500_000.0 + 15_000.0 * (t / 60.0).sin()) as u32,
                humidity_adc: (20_000.0 + 2_000.0 * (t / 90.0).sin()) as u16,
                pressure_adc: (350_000.0 + 3_000.0 * (t / 120.0).cos()) as u32,
                gas_adc: gas_adc as u16,
                gas_range: 8,
                ..SimField::valid()
            }]);
        }
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// Print the framebuffer two pixel rows per character row.
fn print_display(display: &SimulatorDisplay<BinaryColor>) {
    let mut out = String::new();
    for y in (0..PANEL_HEIGHT as i32).step_by(2) {
        for x in 0..PANEL_WIDTH as i32 {
            let top = display.get_pixel(Point::new(x, y)).is_on();
            let bottom = display.get_pixel(Point::new(x, y + 1)).is_on();
            out.push(match (top, bottom) {
                (true, true) => '█',
                (true, false) => '▀',
                (false, true) => '▄',
                (false, false) => ' ',
            });
        }
        out.push('\n');
    }
    println!("{out}");
}

fn render(state: &SensorsState<impl embedded_hal::i2c::I2c>) {
    let panel = SensorPanel::from_snapshot(&state.snapshot(), Point::zero());
    let mut display = SimulatorDisplay::<BinaryColor>::new(Size::new(PANEL_WIDTH, PANEL_HEIGHT));

    let Ok(()) = panel.draw(&mut display);
    for line in panel.lines() {
        info!("  {}", line);
    }
    print_display(&display);
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let run_secs = args
        .next()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(DEFAULT_RUN_SECS);
    let flaky_address = args.next().and_then(|s| u8::from_str_radix(&s, 16).ok());

    let bus = RefCell::new(
        SimBus::new()
            .with_htu21d(Htu21dModel::default())
            .with_ccs811(Ccs811Model::default())
            .with_bme68x(Bme68xModel::default()),
    );

    let config = SensorsConfig::default();
    let mut state = SensorsState::on_shared_bus(&bus, &config);
    let clock = SimClock::new();
    let mut environment = MockEnvironment::new();

    environment.step(&mut bus.borrow_mut(), 0.0);
    if let Err(e) = state.init(&mut NoDelay, clock.now()) {
        warn!("Continuing without a sensor: {}", e);
    }

    // Restore a previously saved baseline the way the firmware does at boot
    let mut saved = [0u8; BASELINE_RECORD_MAX_LEN];
    if let Ok(bytes) = BaselineRecord::new(0x847B).encode(&mut saved) {
        match BaselineRecord::decode(bytes) {
            Ok(record) => {
                if let Err(e) = state.restore_ccs811_baseline(&record) {
                    warn!("Baseline restore failed: {}", e);
                }
            }
            Err(e) => warn!("Ignoring saved baseline: {}", e),
        }
    }

    info!(
        "Simulating {} s in {} ms ticks{}",
        run_secs,
        TICK_MS,
        flaky_address
            .map(|a| format!(", device 0x{a:02X} flaky"))
            .unwrap_or_default()
    );

    let end_ms = run_secs * 1000;
    while clock.millis() <= end_ms {
        let now_ms = clock.millis();

        if now_ms % ENVIRONMENT_STEP_MS == 0 {
            let mut bus = bus.borrow_mut();
            environment.step(&mut bus, ENVIRONMENT_STEP_MS as f64 / 1000.0);
            if let Some(address) = flaky_address {
                bus.set_offline(address, (now_ms / 1000) % 7 == 6);
            }
        }

        state.tick(&clock);

        if now_ms > 0 && now_ms % RENDER_EVERY_MS == 0 {
            info!("t = {} s, values {:?}", now_ms / 1000, state.values());
            render(&state);
        }

        clock.advance(TICK_MS);
    }

    match state.ccs811_baseline() {
        Ok(Some(record)) => {
            let mut buffer = [0u8; BASELINE_RECORD_MAX_LEN];
            match record.encode(&mut buffer) {
                Ok(bytes) => info!("Baseline to persist: {:02X?}", bytes),
                Err(e) => warn!("Baseline encode failed: {}", e),
            }
        }
        Ok(None) => {}
        Err(e) => warn!("Baseline read failed: {}", e),
    }
    info!("{} I2C transactions", bus.borrow().transactions());
}
