use std::time::Duration;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};

use crate::{
    config::UiConfig,
    ui::{UiEvent, UiHandle},
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum ActiveLevel {
    #[default]
    Low,
    High,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ButtonEvent {
    ShortPress,
    LongPress,
}

impl From<ButtonEvent> for UiEvent {
    fn from(event: ButtonEvent) -> Self {
        match event {
            ButtonEvent::ShortPress => UiEvent::ButtonShortPress,
            ButtonEvent::LongPress => UiEvent::ButtonLongPress,
        }
    }
}

#[derive(Debug, Error)]
pub enum ButtonError {
    #[error("button input unavailable")]
    Unavailable,
    #[cfg(feature = "pi")]
    #[error("gpio: {0}")]
    Gpio(#[from] rppal::gpio::Error),
}

/// Turns polled button levels into short and long presses.
///
/// A long press fires as soon as the hold time is reached; the release that
/// follows it produces nothing.
#[derive(Debug)]
pub struct PressClassifier {
    active_level: ActiveLevel,
    long_press_polls: u32,
    held_polls: u32,
    long_sent: bool,
}

impl PressClassifier {
    pub fn new(active_level: ActiveLevel, poll: Duration, long_press: Duration) -> Self {
        let poll = poll.as_millis().max(1);
        let long_press_polls = (long_press.as_millis() / poll).clamp(1, u32::MAX as u128) as u32;
        Self {
            active_level,
            long_press_polls,
            held_polls: 0,
            long_sent: false,
        }
    }

    pub fn sample(&mut self, level_high: bool) -> Option<ButtonEvent> {
        let pressed = match self.active_level {
            ActiveLevel::Low => !level_high,
            ActiveLevel::High => level_high,
        };

        if pressed {
            self.held_polls = self.held_polls.saturating_add(1);
            if !self.long_sent && self.held_polls >= self.long_press_polls {
                self.long_sent = true;
                return Some(ButtonEvent::LongPress);
            }
            return None;
        }

        let released = self.held_polls > 0 && !self.long_sent;
        self.held_polls = 0;
        self.long_sent = false;
        released.then_some(ButtonEvent::ShortPress)
    }
}

pub trait ButtonInput: Send {
    /// Raw electrical level of the button pin.
    fn is_high(&mut self) -> Result<bool, ButtonError>;
}

/// Poll `input` every `button_poll` and post presses to the UI queue.
pub fn spawn_button_monitor<B>(mut input: B, config: &UiConfig, ui: UiHandle) -> JoinHandle<()>
where
    B: ButtonInput + 'static,
{
    let poll = config.button_poll();
    let mut classifier =
        PressClassifier::new(config.button_active_level, poll, config.long_press());

    tokio::spawn(async move {
        let mut interval = time::interval(poll);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            let level = match input.is_high() {
                Ok(level) => level,
                Err(e) => {
                    warn!("button: read failed: {}", e);
                    continue;
                }
            };

            if let Some(event) = classifier.sample(level) {
                debug!("button: {:?}", event);
                if let Err(e) = ui.try_post(event.into()) {
                    warn!("button: dropped {:?}: {}", event, e);
                }
            }
        }
    })
}

#[cfg(feature = "pi")]
pub struct GpioButton {
    pin: rppal::gpio::InputPin,
}

#[cfg(feature = "pi")]
impl GpioButton {
    pub fn new(pin: &crate::config::Pin, active_level: ActiveLevel) -> Result<Self, ButtonError> {
        let number = pin.gpio();
        log::info!("button: on gpio {}", number);
        let pin = rppal::gpio::Gpio::new()?.get(number)?;
        let pin = match active_level {
            ActiveLevel::Low => pin.into_input_pullup(),
            ActiveLevel::High => pin.into_input_pulldown(),
        };
        Ok(Self { pin })
    }
}

#[cfg(feature = "pi")]
impl ButtonInput for GpioButton {
    fn is_high(&mut self) -> Result<bool, ButtonError> {
        Ok(self.pin.is_high())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    use super::*;
    use crate::ui;

    fn classifier() -> PressClassifier {
        PressClassifier::new(
            ActiveLevel::Low,
            Duration::from_millis(10),
            Duration::from_millis(5000),
        )
    }

    #[test]
    fn test_short_press() {
        let mut button = classifier();
        assert_eq!(button.sample(true), None);
        for _ in 0..20 {
            assert_eq!(button.sample(false), None);
        }
        assert_eq!(button.sample(true), Some(ButtonEvent::ShortPress));
        assert_eq!(button.sample(true), None);
    }

    #[test]
    fn test_long_press_fires_once() {
        let mut button = classifier();
        let events: Vec<_> = (0..600).filter_map(|_| button.sample(false)).collect();
        assert_eq!(events, vec![ButtonEvent::LongPress]);

        // Releasing after a long press is silent
        assert_eq!(button.sample(true), None);
    }

    #[test]
    fn test_active_high() {
        let mut button = PressClassifier::new(
            ActiveLevel::High,
            Duration::from_millis(10),
            Duration::from_millis(100),
        );
        assert_eq!(button.sample(false), None);
        assert_eq!(button.sample(true), None);
        assert_eq!(button.sample(false), Some(ButtonEvent::ShortPress));

        let events: Vec<_> = (0..10).filter_map(|_| button.sample(true)).collect();
        assert_eq!(events, vec![ButtonEvent::LongPress]);
    }

    struct SharedLevel(Arc<AtomicBool>);

    impl ButtonInput for SharedLevel {
        fn is_high(&mut self) -> Result<bool, ButtonError> {
            Ok(self.0.load(Ordering::SeqCst))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_posts_presses() {
        let level = Arc::new(AtomicBool::new(true));
        let (handle, mut inbox) = ui::channel(8);
        let monitor = spawn_button_monitor(
            SharedLevel(level.clone()),
            &UiConfig::default(),
            handle,
        );

        level.store(false, Ordering::SeqCst);
        time::sleep(Duration::from_millis(200)).await;
        level.store(true, Ordering::SeqCst);
        time::sleep(Duration::from_millis(50)).await;
        assert_eq!(inbox.try_recv(), Some(UiEvent::ButtonShortPress));

        level.store(false, Ordering::SeqCst);
        time::sleep(Duration::from_millis(5100)).await;
        assert_eq!(inbox.try_recv(), Some(UiEvent::ButtonLongPress));
        level.store(true, Ordering::SeqCst);
        time::sleep(Duration::from_millis(50)).await;
        assert_eq!(inbox.try_recv(), None);

        monitor.abort();
    }
}
