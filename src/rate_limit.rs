//! Per-client admission control.
//!
//! Fixed-window request counters keyed by `(identity, endpoint class)`.
//! Informational and orchestration endpoints are limited independently.

use std::time::{Duration, Instant};

use dashmap::DashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointClass {
    Info,
    Chat,
}

#[derive(Debug, Clone, Copy)]
pub struct GateConfig {
    pub info_limit: u32,
    pub chat_limit: u32,
    pub window: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        GateConfig {
            info_limit: 60,
            chat_limit: 10,
            window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Denied { retry_after_secs: u64 },
}

#[derive(Debug)]
struct Window {
    started: Instant,
    count: u32,
}

pub struct AdmissionGate {
    config: GateConfig,
    windows: DashMap<(String, EndpointClass), Window>,
}

impl AdmissionGate {
    pub fn new(config: GateConfig) -> Self {
        AdmissionGate {
            config,
            windows: DashMap::new(),
        }
    }

    pub fn admit(&self, identity: &str, class: EndpointClass) -> Admission {
        self.admit_at(identity, class, Instant::now())
    }

    // The entry guard holds the shard lock for the whole read-modify-write,
    // so concurrent admits on the same identity cannot lose counts.
    fn admit_at(&self, identity: &str, class: EndpointClass, now: Instant) -> Admission {
        let limit = match class {
            EndpointClass::Info => self.config.info_limit,
            EndpointClass::Chat => self.config.chat_limit,
        };
        let mut window = self
            .windows
            .entry((identity.to_string(), class))
            .or_insert_with(|| Window {
                started: now,
                count: 0,
            });
        if now.duration_since(window.started) >= self.config.window {
            window.started = now;
            window.count = 0;
        }
        if window.count < limit {
            window.count += 1;
            Admission::Allowed
        } else {
            let remaining = self
                .config
                .window
                .saturating_sub(now.duration_since(window.started));
            Admission::Denied {
                retry_after_secs: remaining.as_secs().max(1),
            }
        }
    }

    pub fn sweep(&self) {
        self.sweep_at(Instant::now());
    }

    // Windows idle for two full periods can no longer influence an admit.
    fn sweep_at(&self, now: Instant) {
        let horizon = self.config.window * 2;
        self.windows
            .retain(|_, window| now.duration_since(window.started) < horizon);
    }

    pub fn tracked_windows(&self) -> usize {
        self.windows.len()
    }
}
