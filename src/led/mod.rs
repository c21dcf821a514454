//! Turns status intents into blink patterns on the red and green LEDs.
//!
//! `Boot` and `FactoryReset` take an output over for a fixed time. Everything
//! else is a flag; while no exclusive pattern runs, the highest priority flag
//! set on an output picks its sequence:
//!
//! | output | priority                               |
//! |--------|----------------------------------------|
//! | red    | Identify > NoCoordinator > off         |
//! | green  | Identify > Scanning > Connected > off  |

use std::{
    ops::{BitOr, Sub},
    sync::{Arc, Mutex},
    time::Duration,
};

use common::{
    led::{InvalidPattern, LedPattern, OutputId},
    sequence::SequenceDescriptor,
};
use log::{debug, info};
use thiserror::Error;
use tokio::{sync::Notify, task::JoinHandle};

use crate::{config::LedConfig, lock, sequencer::SharedSequencer};

#[derive(Debug, Error)]
pub enum LedError {
    #[error(transparent)]
    InvalidPattern(#[from] InvalidPattern),
    #[error("{0:?} runs to completion and cannot be stopped")]
    NotStoppable(LedPattern),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Intent {
    Identify,
    NoCoordinator,
    Scanning,
    Connected,
}

impl Intent {
    const fn bit(self) -> u8 {
        match self {
            Intent::Identify => 1 << 0,
            Intent::NoCoordinator => 1 << 1,
            Intent::Scanning => 1 << 2,
            Intent::Connected => 1 << 3,
        }
    }

    fn descriptor(self) -> SequenceDescriptor {
        match self {
            Intent::Identify => SequenceDescriptor::IDENTIFY,
            Intent::Scanning => SequenceDescriptor::SCANNING,
            Intent::NoCoordinator | Intent::Connected => SequenceDescriptor::ALWAYS_ON,
        }
    }
}

/// Set of intents currently requested on one output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IntentSet(u8);

impl IntentSet {
    pub const EMPTY: IntentSet = IntentSet(0);

    pub const fn contains(self, intent: Intent) -> bool {
        self.0 & intent.bit() != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn insert(&mut self, intent: Intent) {
        self.0 |= intent.bit();
    }

    pub fn remove(&mut self, intent: Intent) {
        self.0 &= !intent.bit();
    }
}

impl From<Intent> for IntentSet {
    fn from(intent: Intent) -> Self {
        IntentSet(intent.bit())
    }
}

impl BitOr<Intent> for IntentSet {
    type Output = IntentSet;

    fn bitor(self, intent: Intent) -> IntentSet {
        IntentSet(self.0 | intent.bit())
    }
}

impl BitOr for Intent {
    type Output = IntentSet;

    fn bitor(self, other: Intent) -> IntentSet {
        IntentSet::from(self) | other
    }
}

impl Sub<Intent> for IntentSet {
    type Output = IntentSet;

    fn sub(self, intent: Intent) -> IntentSet {
        IntentSet(self.0 & !intent.bit())
    }
}

const RED_PRIORITY: &[Intent] = &[Intent::Identify, Intent::NoCoordinator];
const GREEN_PRIORITY: &[Intent] = &[Intent::Identify, Intent::Scanning, Intent::Connected];

fn resolve(output: OutputId, flags: IntentSet) -> Shown {
    let priority = match output {
        OutputId::Red => RED_PRIORITY,
        OutputId::Green => GREEN_PRIORITY,
    };
    priority
        .iter()
        .copied()
        .find(|intent| flags.contains(*intent))
        .map_or(Shown::Off, Shown::Intent)
}

/// What the sequencer was last told to play on an output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Shown {
    Nothing,
    Exclusive(LedPattern),
    Intent(Intent),
    Off,
}

impl Shown {
    fn descriptor(self) -> Option<SequenceDescriptor> {
        match self {
            Shown::Nothing => None,
            Shown::Exclusive(LedPattern::FactoryReset) => Some(SequenceDescriptor::FACTORY_RESET),
            Shown::Exclusive(_) => Some(SequenceDescriptor::BOOT),
            Shown::Intent(intent) => Some(intent.descriptor()),
            Shown::Off => Some(SequenceDescriptor::ALWAYS_OFF),
        }
    }
}

struct OutputFields {
    flags: IntentSet,
    // Exclusive pattern owning the output right now
    current: Option<LedPattern>,
    // Exclusive pattern waiting for the evaluator to pick it up
    buffered: Option<LedPattern>,
    generation: u64,
    revert: Option<JoinHandle<()>>,
    shown: Shown,
}

impl Default for OutputFields {
    fn default() -> Self {
        Self {
            flags: IntentSet::EMPTY,
            current: None,
            buffered: None,
            generation: 0,
            revert: None,
            shown: Shown::Nothing,
        }
    }
}

struct Inner {
    fields: Mutex<[OutputFields; OutputId::COUNT]>,
    signals: [Notify; OutputId::COUNT],
    sequencer: SharedSequencer,
    exclusive_duration: Duration,
}

#[derive(Clone)]
pub struct LedController {
    inner: Arc<Inner>,
    evaluator: Arc<JoinHandle<()>>,
}

impl LedController {
    /// Start the evaluation task and settle both outputs on their idle
    /// pattern. Must be called from within a tokio runtime.
    pub fn init(config: &LedConfig, sequencer: SharedSequencer) -> Self {
        let inner = Arc::new(Inner {
            fields: Mutex::new(Default::default()),
            signals: [Notify::new(), Notify::new()],
            sequencer,
            exclusive_duration: config.exclusive_duration(),
        });

        let evaluator = tokio::spawn(evaluate_loop(inner.clone()));
        for output in OutputId::ALL {
            inner.signal(output);
        }

        Self {
            inner,
            evaluator: Arc::new(evaluator),
        }
    }

    pub fn start_pattern(&self, pattern: LedPattern) -> Result<(), LedError> {
        info!("led: start {:?}", pattern);
        match pattern {
            LedPattern::Boot => {
                for output in OutputId::ALL {
                    self.inner.run_exclusive(output, pattern);
                }
            }
            LedPattern::FactoryReset => self.inner.run_exclusive(OutputId::Red, pattern),
            LedPattern::Identify => {
                for output in OutputId::ALL {
                    self.inner.update_flags(output, |flags| flags.insert(Intent::Identify));
                }
            }
            LedPattern::Connected => {
                self.inner
                    .update_flags(OutputId::Green, |flags| flags.insert(Intent::Connected));
            }
            LedPattern::Scanning => {
                self.inner
                    .update_flags(OutputId::Green, |flags| flags.insert(Intent::Scanning));
            }
            LedPattern::NoCoordinator => {
                self.inner
                    .update_flags(OutputId::Red, |flags| flags.insert(Intent::NoCoordinator));
            }
            LedPattern::NotConnected => {
                self.inner
                    .update_flags(OutputId::Red, |flags| flags.remove(Intent::NoCoordinator));
                self.inner.update_flags(OutputId::Green, |flags| {
                    flags.remove(Intent::Scanning);
                    flags.remove(Intent::Connected);
                });
            }
        }
        Ok(())
    }

    pub fn stop_pattern(&self, pattern: LedPattern) -> Result<(), LedError> {
        info!("led: stop {:?}", pattern);
        match pattern {
            LedPattern::Boot | LedPattern::FactoryReset => {
                return Err(LedError::NotStoppable(pattern))
            }
            LedPattern::Identify => {
                for output in OutputId::ALL {
                    self.inner.update_flags(output, |flags| flags.remove(Intent::Identify));
                }
            }
            LedPattern::Connected => {
                self.inner
                    .update_flags(OutputId::Green, |flags| flags.remove(Intent::Connected));
            }
            LedPattern::Scanning => {
                self.inner
                    .update_flags(OutputId::Green, |flags| flags.remove(Intent::Scanning));
            }
            LedPattern::NoCoordinator => {
                self.inner
                    .update_flags(OutputId::Red, |flags| flags.remove(Intent::NoCoordinator));
            }
            LedPattern::NotConnected => {}
        }
        Ok(())
    }

    /// `start_pattern` for a pattern number received from outside.
    pub fn start_raw(&self, raw: u8) -> Result<(), LedError> {
        self.start_pattern(LedPattern::try_from(raw)?)
    }

    pub fn stop_raw(&self, raw: u8) -> Result<(), LedError> {
        self.stop_pattern(LedPattern::try_from(raw)?)
    }

    pub fn flags(&self, output: OutputId) -> IntentSet {
        lock(&self.inner.fields)[output.index()].flags
    }

    pub fn exclusive_pattern(&self, output: OutputId) -> Option<LedPattern> {
        let fields = lock(&self.inner.fields);
        let fields = &fields[output.index()];
        fields.buffered.or(fields.current)
    }

    pub fn active_descriptor(&self, output: OutputId) -> Option<SequenceDescriptor> {
        lock(&self.inner.sequencer).descriptor(output).copied()
    }

    /// Stop the evaluation task. Pending reverts are dropped.
    pub fn shutdown(&self) {
        self.evaluator.abort();
        for fields in lock(&self.inner.fields).iter_mut() {
            if let Some(revert) = fields.revert.take() {
                revert.abort();
            }
        }
    }
}

impl Inner {
    fn signal(&self, output: OutputId) {
        self.signals[output.index()].notify_one();
    }

    fn run_exclusive(&self, output: OutputId, pattern: LedPattern) {
        lock(&self.fields)[output.index()].buffered = Some(pattern);
        self.signal(output);
    }

    fn update_flags(&self, output: OutputId, update: impl FnOnce(&mut IntentSet)) {
        let idle = {
            let mut fields = lock(&self.fields);
            let fields = &mut fields[output.index()];
            update(&mut fields.flags);
            fields.current.is_none() && fields.buffered.is_none()
        };

        if idle {
            self.signal(output);
        } else {
            debug!("led: {} busy, flags applied later", output);
        }
    }

    fn evaluate(self: &Arc<Self>, output: OutputId) {
        let shown = {
            let mut fields = lock(&self.fields);
            let fields = &mut fields[output.index()];

            if let Some(pattern) = fields.buffered.take() {
                fields.current = Some(pattern);
                fields.generation += 1;
                if let Some(revert) = fields.revert.take() {
                    revert.abort();
                }
                fields.revert = Some(self.schedule_revert(output, fields.generation));
                fields.shown = Shown::Exclusive(pattern);
                fields.shown
            } else if fields.current.is_some() {
                return;
            } else {
                let target = resolve(output, fields.flags);
                if target == fields.shown {
                    return;
                }
                fields.shown = target;
                target
            }
        };

        if let Some(descriptor) = shown.descriptor() {
            debug!("led: {} now showing {:?}", output, shown);
            lock(&self.sequencer).apply(output, descriptor);
        }
    }

    fn schedule_revert(self: &Arc<Self>, output: OutputId, generation: u64) -> JoinHandle<()> {
        let inner = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(inner.exclusive_duration).await;
            let expired = {
                let mut fields = lock(&inner.fields);
                let fields = &mut fields[output.index()];
                if fields.generation == generation {
                    fields.current = None;
                    fields.revert = None;
                    true
                } else {
                    false
                }
            };
            if expired {
                debug!("led: {} exclusive pattern finished", output);
                inner.signal(output);
            }
        })
    }
}

async fn evaluate_loop(inner: Arc<Inner>) {
    loop {
        let output = tokio::select! {
            _ = inner.signals[OutputId::Red.index()].notified() => OutputId::Red,
            _ = inner.signals[OutputId::Green.index()].notified() => OutputId::Green,
        };
        inner.evaluate(output);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::{self, LogOutput, RunState};

    fn controller() -> (LedController, SharedSequencer) {
        let sequencer = sequencer::shared(Box::new(LogOutput::new()));
        let leds = LedController::init(&LedConfig::default(), sequencer.clone());
        (leds, sequencer)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[test]
    fn test_intent_set() {
        let mut set = Intent::Identify | Intent::Scanning;
        assert!(set.contains(Intent::Identify));
        assert!(!set.contains(Intent::Connected));

        set.insert(Intent::Connected);
        set.remove(Intent::Identify);
        assert_eq!(set, IntentSet::from(Intent::Scanning) | Intent::Connected);
        assert!((set - Intent::Scanning - Intent::Connected).is_empty());
    }

    #[test]
    fn test_resolution_order() {
        let all = Intent::Identify | Intent::NoCoordinator | Intent::Scanning | Intent::Connected;
        assert_eq!(resolve(OutputId::Red, all), Shown::Intent(Intent::Identify));
        assert_eq!(resolve(OutputId::Green, all), Shown::Intent(Intent::Identify));

        let rest = all - Intent::Identify;
        assert_eq!(resolve(OutputId::Red, rest), Shown::Intent(Intent::NoCoordinator));
        assert_eq!(resolve(OutputId::Green, rest), Shown::Intent(Intent::Scanning));
        assert_eq!(
            resolve(OutputId::Green, rest - Intent::Scanning),
            Shown::Intent(Intent::Connected)
        );
        // Green ignores the red-only intent
        assert_eq!(
            resolve(OutputId::Green, Intent::NoCoordinator.into()),
            Shown::Off
        );
        assert_eq!(resolve(OutputId::Red, IntentSet::EMPTY), Shown::Off);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_outputs_are_off() {
        let (leds, _) = controller();
        settle().await;
        for output in OutputId::ALL {
            assert_eq!(
                leds.active_descriptor(output),
                Some(SequenceDescriptor::ALWAYS_OFF)
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_priority_switch_restarts_sequence() {
        let (leds, sequencer) = controller();
        let driver = sequencer::spawn_tick_driver(sequencer.clone(), Duration::from_millis(10));

        leds.start_pattern(LedPattern::NoCoordinator).unwrap();
        settle().await;
        assert_eq!(
            leds.active_descriptor(OutputId::Red),
            Some(SequenceDescriptor::ALWAYS_ON)
        );

        tokio::time::sleep(Duration::from_secs(1)).await;
        // Past the initial off phase, LED stays on
        assert_eq!(lock(&sequencer).state(OutputId::Red), RunState::Idle);

        leds.start_pattern(LedPattern::Identify).unwrap();
        settle().await;
        assert_eq!(
            leds.active_descriptor(OutputId::Red),
            Some(SequenceDescriptor::IDENTIFY)
        );
        assert_eq!(lock(&sequencer).state(OutputId::Red), RunState::Start);

        tokio::time::sleep(Duration::from_secs(1)).await;
        leds.stop_pattern(LedPattern::Identify).unwrap();
        settle().await;
        assert_eq!(
            leds.active_descriptor(OutputId::Red),
            Some(SequenceDescriptor::ALWAYS_ON)
        );
        assert_eq!(lock(&sequencer).state(OutputId::Red), RunState::Start);
        assert_eq!(leds.flags(OutputId::Red), IntentSet::from(Intent::NoCoordinator));

        driver.abort();
        leds.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_boot_defers_flag_changes() {
        let (leds, _) = controller();
        leds.start_pattern(LedPattern::Boot).unwrap();
        leds.start_pattern(LedPattern::Identify).unwrap();
        settle().await;

        for output in OutputId::ALL {
            assert_eq!(leds.active_descriptor(output), Some(SequenceDescriptor::BOOT));
            assert_eq!(leds.exclusive_pattern(output), Some(LedPattern::Boot));
            assert!(leds.flags(output).contains(Intent::Identify));
        }

        tokio::time::sleep(Duration::from_millis(5000)).await;
        assert_eq!(
            leds.active_descriptor(OutputId::Green),
            Some(SequenceDescriptor::BOOT)
        );

        tokio::time::sleep(Duration::from_millis(500)).await;
        for output in OutputId::ALL {
            assert_eq!(
                leds.active_descriptor(output),
                Some(SequenceDescriptor::IDENTIFY)
            );
            assert_eq!(leds.exclusive_pattern(output), None);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_factory_reset_only_takes_red() {
        let (leds, _) = controller();
        leds.start_pattern(LedPattern::Connected).unwrap();
        settle().await;

        leds.start_pattern(LedPattern::FactoryReset).unwrap();
        settle().await;
        assert_eq!(
            leds.active_descriptor(OutputId::Red),
            Some(SequenceDescriptor::FACTORY_RESET)
        );
        assert_eq!(
            leds.active_descriptor(OutputId::Green),
            Some(SequenceDescriptor::ALWAYS_ON)
        );

        // Restarting extends the exclusive window
        tokio::time::sleep(Duration::from_millis(4000)).await;
        leds.start_pattern(LedPattern::FactoryReset).unwrap();
        tokio::time::sleep(Duration::from_millis(4000)).await;
        assert_eq!(leds.exclusive_pattern(OutputId::Red), Some(LedPattern::FactoryReset));

        tokio::time::sleep(Duration::from_millis(1600)).await;
        assert_eq!(
            leds.active_descriptor(OutputId::Red),
            Some(SequenceDescriptor::ALWAYS_OFF)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_connected_clears_network_intents() {
        let (leds, _) = controller();
        leds.start_pattern(LedPattern::NoCoordinator).unwrap();
        leds.start_pattern(LedPattern::Scanning).unwrap();
        leds.start_pattern(LedPattern::Identify).unwrap();

        leds.start_pattern(LedPattern::NotConnected).unwrap();
        assert_eq!(leds.flags(OutputId::Red), IntentSet::from(Intent::Identify));
        assert_eq!(leds.flags(OutputId::Green), IntentSet::from(Intent::Identify));

        leds.stop_pattern(LedPattern::NotConnected).unwrap();
        assert_eq!(leds.flags(OutputId::Green), IntentSet::from(Intent::Identify));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_requests_have_no_effect() {
        let (leds, _) = controller();
        settle().await;

        assert!(matches!(
            leds.stop_pattern(LedPattern::Boot),
            Err(LedError::NotStoppable(LedPattern::Boot))
        ));
        assert!(matches!(
            leds.start_raw(42),
            Err(LedError::InvalidPattern(InvalidPattern(42)))
        ));
        assert!(leds.stop_raw(7).is_err());

        leds.start_raw(LedPattern::Scanning as u8).unwrap();
        settle().await;
        assert_eq!(
            leds.active_descriptor(OutputId::Green),
            Some(SequenceDescriptor::SCANNING)
        );
        for output in OutputId::ALL {
            assert_eq!(leds.exclusive_pattern(output), None);
        }
        assert!(leds.flags(OutputId::Red).is_empty());
    }
}
