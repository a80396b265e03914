//! Animated reconciliation of continuous controls
//!
//! A new target for a continuous numeric key (throttle, flap position) is
//! not snapped into place; it is decomposed into a short sequence of
//! intermediate writes so the control moves plausibly. Each intermediate
//! write flows through the ordinary apply/diff/broadcast path — an
//! animation is not a protocol concept, just many small ordinary changes.
//!
//! One worker thread per active key; the registry maps key to a
//! cancellable task handle, and inserting a new task cancels and replaces
//! the previous one. Cancellation is cooperative: the flag is checked
//! immediately before each write, and already-applied intermediate values
//! are never rolled back.

use crate::config::AnimationSettings;
use crate::error::{Error, Result};
use indexmap::IndexMap;
use skysync_core::{StateStore, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::debug;

/// Receiver of animation writes
///
/// In production this is the sync engine, which applies the value and
/// lets the normal diff/broadcast path pick it up. Called from the
/// animation worker thread.
pub trait WriteSink: Send + Sync {
    /// Apply one intermediate (or final) value
    fn write(&self, path: &str, value: Value);
}

struct TaskHandle {
    cancel: Arc<AtomicBool>,
    join: thread::JoinHandle<()>,
}

/// Per-key interpolation state machine
pub struct AnimatedReconciler {
    /// lowercase key -> settings
    settings: IndexMap<String, AnimationSettings>,
    store: Arc<StateStore>,
    sink: Arc<dyn WriteSink>,
    tasks: Mutex<HashMap<String, TaskHandle>>,
}

impl AnimatedReconciler {
    /// Create a reconciler for the configured animated keys
    pub fn new(
        animations: &IndexMap<String, AnimationSettings>,
        store: Arc<StateStore>,
        sink: Arc<dyn WriteSink>,
    ) -> Self {
        let settings = animations
            .iter()
            .map(|(k, s)| (k.to_ascii_lowercase(), *s))
            .collect();
        Self {
            settings,
            store,
            sink,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a key is configured for animation
    pub fn handles(&self, path: &str) -> bool {
        self.settings.contains_key(&path.to_ascii_lowercase())
    }

    /// Request that `path` move to `target`
    ///
    /// Within tolerance of the current value the target is written
    /// immediately. Otherwise any in-flight task for the key is cancelled
    /// (the newest request always wins) and a new task is scheduled that
    /// writes `current + delta * i/steps` per tick, landing exactly on
    /// the target at the final tick.
    pub fn request_target(&self, path: &str, target: f64) -> Result<()> {
        let key = path.to_ascii_lowercase();
        let settings = *self
            .settings
            .get(&key)
            .ok_or_else(|| Error::NotAnimated(path.to_string()))?;

        // Cancel and drain the superseded task before reading the current
        // value, so the plan starts from wherever the old task stopped.
        if let Some(prev) = self.take_task(&key) {
            prev.cancel.store(true, Ordering::SeqCst);
            let _ = prev.join.join();
        }

        let current = self.store.get_f64(path).unwrap_or(0.0);
        if (target - current).abs() <= settings.tolerance {
            self.sink.write(path, Value::Float(target));
            return Ok(());
        }

        let plan = plan_steps(current, target, settings.step_size);
        debug!(path, current, target, steps = plan.len(), "animation scheduled");

        let cancel = Arc::new(AtomicBool::new(false));
        let task_cancel = Arc::clone(&cancel);
        let sink = Arc::clone(&self.sink);
        let task_path = path.to_string();
        let interval = Duration::from_millis(settings.step_ms);

        let join = thread::spawn(move || {
            let last = plan.len() - 1;
            for (i, value) in plan.into_iter().enumerate() {
                if task_cancel.load(Ordering::SeqCst) {
                    return;
                }
                sink.write(&task_path, Value::Float(value));
                if i < last {
                    thread::sleep(interval);
                }
            }
        });

        let mut tasks = self.lock();
        if let Some(old) = tasks.insert(key, TaskHandle { cancel, join }) {
            old.cancel.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Whether a task for the key is currently running
    pub fn is_animating(&self, path: &str) -> bool {
        let tasks = self.lock();
        tasks
            .get(&path.to_ascii_lowercase())
            .map(|t| !t.join.is_finished())
            .unwrap_or(false)
    }

    /// Block until the key's task (if any) has finished
    pub fn wait_for(&self, path: &str) {
        if let Some(task) = self.take_task(&path.to_ascii_lowercase()) {
            let _ = task.join.join();
        }
    }

    /// Cancel every task and wait for the workers to stop
    ///
    /// Each worker observes its flag within one step interval, so the
    /// wait is bounded.
    pub fn cancel_all(&self) {
        let drained: Vec<TaskHandle> = {
            let mut tasks = self.lock();
            tasks.drain().map(|(_, t)| t).collect()
        };
        for task in &drained {
            task.cancel.store(true, Ordering::SeqCst);
        }
        for task in drained {
            let _ = task.join.join();
        }
    }

    fn take_task(&self, key: &str) -> Option<TaskHandle> {
        self.lock().remove(key)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, TaskHandle>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Intermediate values for one animation
///
/// Step count is `max(3, ceil(|delta| / step_size))`; the i-th write is
/// `current + delta * i/steps`, and the final write is forced to the
/// exact target so discretization never overshoots.
pub fn plan_steps(current: f64, target: f64, step_size: f64) -> Vec<f64> {
    let delta = target - current;
    let steps = if step_size > 0.0 {
        ((delta.abs() / step_size).ceil() as usize).max(3)
    } else {
        3
    };

    let mut values = Vec::with_capacity(steps);
    for i in 1..=steps {
        values.push(current + delta * i as f64 / steps as f64);
    }
    if let Some(last) = values.last_mut() {
        *last = target;
    }
    values
}
