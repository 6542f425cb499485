//! The monitor engine: a restartable periodic tick loop over a `Sampler`.
//!
//! One tick is collect, append to history, evaluate alerts, publish. Ticks
//! never overlap: the loop awaits each tick before polling the timer again,
//! and the sampler lock serializes the immediate tick run by `start`.

use crate::alerts::{self, AlertRule};
use crate::collectors::MetricSource;
use crate::config::{validate_rules, ConfigError};
use crate::history::{HistoryBuffer, DEFAULT_HISTORY_CAPACITY};
use crate::hub::{Hub, MonitorEvent, SubscriberId, Subscription};
use crate::sample::Sample;
use crate::sampler::Sampler;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    pub interval: Duration,
    pub alert_rules: Vec<AlertRule>,
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval.is_zero() {
            return Err(ConfigError::Validation(
                "интервал опроса должен быть > 0".to_string(),
            ));
        }
        validate_rules(&self.alert_rules)
    }

    fn merged(&self, patch: ConfigPatch) -> Self {
        Self {
            interval: patch.interval.unwrap_or(self.interval),
            alert_rules: patch.alert_rules.unwrap_or_else(|| self.alert_rules.clone()),
        }
    }
}

/// Partial update for `Monitor::update_config`; `None` keeps the current value.
#[derive(Debug, Clone, Default)]
pub struct ConfigPatch {
    pub interval: Option<Duration>,
    pub alert_rules: Option<Vec<AlertRule>>,
}

#[derive(Debug, Clone)]
pub struct MonitorOptions {
    pub history_capacity: usize,
    pub subscriber_buffer: usize,
    pub read_timeout: Duration,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            subscriber_buffer: 64,
            read_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Running,
}

struct TickLoop {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

struct Inner {
    config: RwLock<Arc<MonitorConfig>>,
    sampler: Mutex<Sampler>,
    history: Mutex<HistoryBuffer>,
    hub: Hub,
    running: AtomicBool,
    lifecycle: Mutex<Option<TickLoop>>,
}

/// Handle to the engine. Clones share one engine; dropping the last handle
/// ends the tick loop without publishing `stopped`.
#[derive(Clone)]
pub struct Monitor {
    inner: Arc<Inner>,
}

impl Monitor {
    pub fn new(source: Arc<dyn MetricSource>, config: MonitorConfig, options: MonitorOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                config: RwLock::new(Arc::new(config)),
                sampler: Mutex::new(Sampler::new(source, options.read_timeout)),
                history: Mutex::new(HistoryBuffer::new(options.history_capacity)),
                hub: Hub::new(options.subscriber_buffer),
                running: AtomicBool::new(false),
                lifecycle: Mutex::new(None),
            }),
        }
    }

    /// Runs one tick right away, publishes `started`, then ticks every
    /// interval. A second call while running does nothing.
    pub async fn start(&self) -> Result<(), ConfigError> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if lifecycle.is_some() {
            debug!("мониторинг уже запущен");
            return Ok(());
        }
        arm(&self.inner, &mut lifecycle).await
    }

    /// Cancels the schedule and publishes `stopped` once any tick in flight
    /// has delivered its results. Does nothing when idle.
    pub async fn stop(&self) {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        disarm(&self.inner, &mut lifecycle).await;
    }

    /// Merges `patch` into the current config. Rule changes apply from the
    /// next tick; an interval change while running restarts the loop.
    pub async fn update_config(&self, patch: ConfigPatch) -> Result<(), ConfigError> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        let current = Arc::clone(&*self.inner.config.read().await);
        let next = current.merged(patch);
        next.validate()?;

        let interval_changed = next.interval != current.interval;
        *self.inner.config.write().await = Arc::new(next);
        info!(interval_changed, "конфигурация мониторинга обновлена");

        if interval_changed && lifecycle.is_some() {
            disarm(&self.inner, &mut lifecycle).await;
            arm(&self.inner, &mut lifecycle).await?;
        }
        Ok(())
    }

    pub fn state(&self) -> MonitorState {
        if self.inner.running.load(Ordering::SeqCst) {
            MonitorState::Running
        } else {
            MonitorState::Idle
        }
    }

    pub async fn config(&self) -> Arc<MonitorConfig> {
        Arc::clone(&*self.inner.config.read().await)
    }

    pub async fn history(&self) -> Vec<Arc<Sample>> {
        self.inner.history.lock().await.snapshot()
    }

    pub async fn history_capacity(&self) -> usize {
        self.inner.history.lock().await.capacity()
    }

    pub async fn latest(&self) -> Option<Arc<Sample>> {
        self.inner.hub.latest().await
    }

    pub async fn subscribe(&self) -> Subscription {
        self.inner.hub.subscribe().await
    }

    /// Subscription plus the latest sample it does not already contain.
    pub async fn subscribe_with_latest(&self) -> (Subscription, Option<Arc<Sample>>) {
        self.inner.hub.subscribe_with_latest().await
    }

    pub async fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.inner.hub.unsubscribe(id).await
    }

    pub async fn subscriber_count(&self) -> usize {
        self.inner.hub.subscriber_count().await
    }

    /// Ends every subscription so consumers draining them can exit.
    pub async fn disconnect_all(&self) {
        self.inner.hub.close_all().await;
    }
}

impl Inner {
    async fn tick(&self) {
        let config = Arc::clone(&*self.config.read().await);
        let mut sampler = self.sampler.lock().await;

        match sampler.collect().await {
            Ok(sample) => {
                let sample = Arc::new(sample);
                self.history.lock().await.append(Arc::clone(&sample));
                let fired = alerts::evaluate(&sample, &config.alert_rules);
                self.hub.publish(MonitorEvent::Sample(sample)).await;
                for alert in fired {
                    debug!(metric = %alert.metric, value = alert.value, threshold = alert.threshold, "сработало правило");
                    self.hub.publish(MonitorEvent::Alert(alert)).await;
                }
            }
            Err(err) => {
                warn!(error = %err, "тик завершился ошибкой, продолжаем по расписанию");
                self.hub.publish(MonitorEvent::Error(err)).await;
            }
        }
    }
}

async fn arm(inner: &Arc<Inner>, slot: &mut Option<TickLoop>) -> Result<(), ConfigError> {
    let config = Arc::clone(&*inner.config.read().await);
    config.validate()?;

    inner.running.store(true, Ordering::SeqCst);
    inner.tick().await;
    inner.hub.publish(MonitorEvent::Started).await;

    let period = config.interval;
    let (stop_tx, mut stop_rx) = watch::channel(false);
    // Weak so the loop ends once the last `Monitor` handle is dropped:
    // `stop_tx` goes with `Inner` and `changed()` then returns.
    let loop_inner = Arc::downgrade(inner);
    let task = tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                biased;
                _ = stop_rx.changed() => break,
                _ = ticker.tick() => {
                    let Some(inner) = loop_inner.upgrade() else { break };
                    inner.tick().await;
                }
            }
        }
    });

    *slot = Some(TickLoop { stop_tx, task });
    info!(interval = ?period, "мониторинг запущен");
    Ok(())
}

async fn disarm(inner: &Arc<Inner>, slot: &mut Option<TickLoop>) {
    let Some(tick_loop) = slot.take() else {
        debug!("мониторинг уже остановлен");
        return;
    };
    let _ = tick_loop.stop_tx.send(true);
    if let Err(err) = tick_loop.task.await {
        warn!(error = %err, "цикл опроса завершился аварийно");
    }
    inner.running.store(false, Ordering::SeqCst);
    inner.hub.publish(MonitorEvent::Stopped).await;
    info!("мониторинг остановлен");
}
