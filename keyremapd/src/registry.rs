//! Per-device injection lifecycle arbitration.
//!
//! The registry is the single owner of every live injector. It enforces
//! at-most-one-active-injector-per-device by always stopping a device's
//! previous injector, and waiting for its confirmation, before installing a
//! replacement. Two injectors must never race on one device's input stream.

use crate::injector::{Injector, InjectorFactory};
use crate::preset::ResolvedMapping;
use crate::ServiceError;
use keyremap_common::InjectorState;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct InjectionRegistry {
    factory: Arc<dyn InjectorFactory>,
    injectors: HashMap<String, Box<dyn Injector>>,
}

impl InjectionRegistry {
    pub fn new(factory: Arc<dyn InjectorFactory>) -> Self {
        Self {
            factory,
            injectors: HashMap::new(),
        }
    }

    /// Start injecting `mapping` for `device`, replacing any prior session.
    ///
    /// A prior injector is stopped synchronously first; only after it
    /// confirms termination is the new one constructed, started, and
    /// registered. A start failure is propagated, not retried, and leaves
    /// the registry unchanged (the prior session, if any, stays in its
    /// terminal state).
    pub async fn start(
        &mut self,
        device: &str,
        source: Option<PathBuf>,
        mapping: ResolvedMapping,
    ) -> Result<(), ServiceError> {
        if let Some(existing) = self.injectors.get_mut(device) {
            info!("Replacing existing injection for \"{}\"", device);
            if let Err(e) = existing.stop().await {
                warn!("Stopping previous injector for \"{}\" failed: {}", device, e);
            }
        }

        let mut injector = self.factory.create(device, source, mapping);
        injector
            .start()
            .await
            .map_err(|e| ServiceError::EngineStartFailure(e.to_string()))?;

        self.injectors.insert(device.to_string(), injector);
        info!("Injection started for \"{}\"", device);
        Ok(())
    }

    /// Stop the session for `device`. Not an error if none exists.
    pub async fn stop(&mut self, device: &str) {
        match self.injectors.get_mut(device) {
            Some(injector) => {
                if let Err(e) = injector.stop().await {
                    warn!("Stopping injector for \"{}\" failed: {}", device, e);
                }
            }
            None => {
                debug!(
                    "Tried to stop injector, but none is running for device \"{}\"",
                    device
                );
            }
        }
    }

    /// Stop every registered session. Best-effort: a failing stop is logged
    /// and the remaining sessions still receive theirs. Returns the number
    /// of failures so shutdown paths can report a degraded stop.
    pub async fn stop_all(&mut self) -> usize {
        info!("Stopping all injections");
        let mut failures = 0;
        for (device, injector) in self.injectors.iter_mut() {
            if let Err(e) = injector.stop().await {
                warn!("Stopping injector for \"{}\" failed: {}", device, e);
                failures += 1;
            }
        }
        failures
    }

    /// Live state for `device`; `Unknown` when no session is registered.
    /// Always read from the injector, never cached.
    pub fn state(&self, device: &str) -> InjectorState {
        self.injectors
            .get(device)
            .map(|injector| injector.state())
            .unwrap_or(InjectorState::Unknown)
    }

    /// Number of registered sessions, live or terminal.
    pub fn len(&self) -> usize {
        self.injectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.injectors.is_empty()
    }
}
