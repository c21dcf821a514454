use std::{sync::Arc, time::Duration};

use anyhow::{Context, Error};
use common::sensor::{MANUFACTURER_NAME, MODEL_IDENTIFIER};
use log::{info, warn};
use zigbee_sensor::{
    prelude::*,
    sensor::SensorController,
    sequencer,
    sim::{AttributeTable, SimulatedSensor, SimulatedStack},
    ui,
};

const SIMULATED_RADIO_LATENCY: Duration = Duration::from_millis(300);

#[tokio::main]
async fn main() -> Result<(), Error> {
    #[cfg(feature = "tokio-console")]
    console_subscriber::init();
    #[cfg(not(feature = "tokio-console"))]
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("{} {} v{}", MANUFACTURER_NAME, MODEL_IDENTIFIER, env!("CARGO_PKG_VERSION"));

    // Load the config file
    info!("Starting config...");
    let config = Config::load()?;

    info!("Starting store...");
    let store = Arc::new(
        FileStore::open(&config.store.path)
            .with_context(|| format!("opening state store {}", config.store.path))?,
    );

    // LEDs and the tick driver
    info!("Starting LEDs...");
    let sequencer = sequencer::shared(output_sink(&config)?);
    let _tick_driver = spawn_tick_driver(sequencer.clone(), config.led.tick_period());
    let leds = LedController::init(&config.led, sequencer);

    // UI queue
    let (ui_queue, inbox) = ui::channel(config.ui.queue_capacity);

    // Network
    info!("Starting network...");
    let stack = Arc::new(SimulatedStack::new(SIMULATED_RADIO_LATENCY));
    let network = NetworkCoordinator::new(config.network.clone(), store, stack.clone());
    stack.attach(network.signals());

    let status_queue = ui_queue.clone();
    let state = network
        .initialize(Box::new(move |state| {
            if let Err(e) = status_queue.try_post(UiEvent::NetworkStatus(state)) {
                warn!("network: status {} not delivered: {}", state, e);
            }
        }))
        .context("initializing network coordinator")?;
    info!("Network state at boot: {}", state);

    let identify_queue = ui_queue.clone();
    network.on_identify(Box::new(move |on| {
        let event = if on {
            UiEvent::StartIdentify
        } else {
            UiEvent::StopIdentify
        };
        if let Err(e) = identify_queue.try_post(event) {
            warn!("network: identify {:?} not delivered: {}", event, e);
        }
    }));

    info!("Starting UI...");
    let router = UiRouter::new(&config.ui, inbox, network.clone(), leds.clone());
    let router_handle = tokio::spawn(router.run());
    ui_queue.post(UiEvent::Boot, Duration::ZERO).await?;

    info!("Starting sensor...");
    let attributes = Arc::new(AttributeTable::new());
    let sensor = SensorController::new(&config.sensor, SimulatedSensor::new(), attributes);
    let sensor_handle = tokio::spawn(sensor.run());

    let button_handle = start_button(&config, ui_queue, stack)?;

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    button_handle.abort();
    sensor_handle.abort();
    router_handle.abort();
    leds.shutdown();

    Ok(())
}

#[cfg(feature = "pi")]
fn output_sink(config: &Config) -> Result<Box<dyn OutputSink>, Error> {
    Ok(Box::new(sequencer::GpioOutput::new(&config.led)?))
}

#[cfg(not(feature = "pi"))]
fn output_sink(_config: &Config) -> Result<Box<dyn OutputSink>, Error> {
    Ok(Box::new(LogOutput::new()))
}

#[cfg(feature = "pi")]
fn start_button(
    config: &Config,
    ui: UiHandle,
    _stack: Arc<SimulatedStack>,
) -> Result<tokio::task::JoinHandle<()>, Error> {
    let pin = config
        .ui
        .button_pin
        .context("no button pin configured")?;
    let button = zigbee_sensor::button::GpioButton::new(&pin, config.ui.button_active_level)?;
    Ok(spawn_button_monitor(button, &config.ui, ui))
}

/// Without a button, read single letter commands from stdin instead. Identify
/// commands go through the simulated network like a coordinator's would.
#[cfg(not(feature = "pi"))]
fn start_button(
    _config: &Config,
    ui: UiHandle,
    stack: Arc<SimulatedStack>,
) -> Result<tokio::task::JoinHandle<()>, Error> {
    use tokio::io::{AsyncBufReadExt, BufReader};

    info!("Console: s = short press, l = long press, i/o = identify on/off");
    Ok(tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let event = match line.trim() {
                "s" => UiEvent::ButtonShortPress,
                "l" => UiEvent::ButtonLongPress,
                "i" | "o" => {
                    if let Err(e) = stack.identify(line.trim() == "i") {
                        warn!("Console: {}", e);
                    }
                    continue;
                }
                "" => continue,
                other => {
                    warn!("Console: unknown command {:?}", other);
                    continue;
                }
            };
            if let Err(e) = ui.try_post(event) {
                warn!("Console: {}", e);
            }
        }
    }))
}
