//! Simulator access boundary
//!
//! The engine never links a simulator SDK. Everything it needs from the
//! data-acquisition layer is behind [`SimAccess`]: read a variable, write
//! a variable, fire a discrete trigger. [`MockSim`] records calls for
//! tests and for running without a simulator attached.

use crate::error::Result;
use skysync_core::{EventDescriptor, Value, ValueMap, VarDescriptor};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Abstract simulator read/write/trigger surface
pub trait SimAccess: Send + Sync {
    /// Read the current value of a variable
    fn read_var(&self, descriptor: &VarDescriptor) -> Result<Value>;

    /// Write a value to a variable; false when the simulator rejected it
    fn write_var(&self, descriptor: &VarDescriptor, value: &Value) -> Result<bool>;

    /// Fire a discrete trigger; false when the simulator rejected it
    fn trigger_event(&self, descriptor: &EventDescriptor, value: &Value) -> Result<bool>;
}

/// Recording in-memory simulator for tests
#[derive(Debug, Default)]
pub struct MockSim {
    vars: Mutex<ValueMap>,
    writes: Mutex<Vec<(String, Value)>>,
    events: Mutex<Vec<(String, Value)>>,
    reject_writes: AtomicBool,
}

impl MockSim {
    /// Create an empty mock
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-set a variable value
    pub fn set_var(&self, path: &str, value: Value) {
        lock(&self.vars).insert(path.to_string(), value);
    }

    /// Make subsequent writes report rejection
    pub fn reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    /// Recorded variable writes in order
    pub fn writes(&self) -> Vec<(String, Value)> {
        lock(&self.writes).clone()
    }

    /// Recorded trigger firings in order
    pub fn events(&self) -> Vec<(String, Value)> {
        lock(&self.events).clone()
    }
}

impl SimAccess for MockSim {
    fn read_var(&self, descriptor: &VarDescriptor) -> Result<Value> {
        Ok(lock(&self.vars)
            .get(&descriptor.path)
            .cloned()
            .unwrap_or(Value::Null))
    }

    fn write_var(&self, descriptor: &VarDescriptor, value: &Value) -> Result<bool> {
        if self.reject_writes.load(Ordering::SeqCst) {
            return Ok(false);
        }
        lock(&self.vars).insert(descriptor.path.clone(), value.clone());
        lock(&self.writes).push((descriptor.path.clone(), value.clone()));
        Ok(true)
    }

    fn trigger_event(&self, descriptor: &EventDescriptor, value: &Value) -> Result<bool> {
        if self.reject_writes.load(Ordering::SeqCst) {
            return Ok(false);
        }
        lock(&self.events).push((descriptor.event.clone(), value.clone()));
        Ok(true)
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}
