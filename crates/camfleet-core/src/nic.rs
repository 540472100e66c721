// ── Network interface watcher ──
//
// One discovery loop per local interface. Rescans are requested through a
// capacity-1 trigger: a request made while one is already pending is
// dropped, so a slow sweep never builds up a backlog.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use regex::Regex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::collab::{DeviceDescriptor, DeviceDiscovery};
use crate::config::UnmatchedInterfacePolicy;
use crate::registry::Keyed;

#[derive(Debug)]
pub struct NetworkInterface {
    name: String,
    trigger: mpsc::Sender<u32>,
    pending: Mutex<Option<mpsc::Receiver<u32>>>,
}

impl Keyed for NetworkInterface {
    fn key(&self) -> &str {
        &self.name
    }
}

impl NetworkInterface {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        let (trigger, pending) = mpsc::channel(1);
        Arc::new(Self {
            name: name.into(),
            trigger,
            pending: Mutex::new(Some(pending)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Request a sweep for round `generation`. Never blocks. Returns
    /// `false` when the request was coalesced into a pending one or the
    /// watcher has stopped.
    pub fn trigger_rescan(&self, generation: u32) -> bool {
        match self.trigger.try_send(generation) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!(itf = %self.name, gen = generation, "rescan already pending");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Sweep on every trigger until cancelled, handing each successful
    /// batch to `learn`. Returns immediately if a loop already ran.
    pub async fn run_rescan_loop<F, Fut>(
        &self,
        discovery: Arc<dyn DeviceDiscovery>,
        learn: F,
        cancel: CancellationToken,
    ) where
        F: Fn(u32, Vec<DeviceDescriptor>) -> Fut + Send,
        Fut: Future<Output = ()> + Send,
    {
        let taken = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut pending) = taken else {
            warn!(itf = %self.name, "rescan loop already consumed");
            return;
        };

        loop {
            let generation = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                generation = pending.recv() => generation,
            };
            let Some(generation) = generation else { break };

            match discovery.discover(&self.name).await {
                Ok(devices) => {
                    debug!(itf = %self.name, gen = generation, found = devices.len(), "discovery");
                    learn(generation, devices).await;
                }
                Err(e) => warn!(itf = %self.name, gen = generation, error = %e, "discovery failed"),
            }
        }

        // Dropping the receiver makes later triggers fail fast.
        drop(pending);
        info!(itf = %self.name, "watcher stopped");
    }
}

// ── Interface selection ──────────────────────────────────────────

/// Why an interface was kept or skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterfaceDecision {
    Include { pattern: String },
    Exclude { pattern: String },
    Unmatched(UnmatchedInterfacePolicy),
}

impl InterfaceDecision {
    pub fn is_included(&self) -> bool {
        match self {
            Self::Include { .. } => true,
            Self::Exclude { .. } => false,
            Self::Unmatched(policy) => *policy == UnmatchedInterfacePolicy::Include,
        }
    }
}

struct Rule {
    source: String,
    exclude: bool,
    regex: Regex,
}

/// Ordered include/exclude patterns. A leading `!` excludes; the first
/// pattern that matches decides. Patterns are unanchored regular
/// expressions.
pub struct InterfaceFilter {
    rules: Vec<Rule>,
    unmatched: UnmatchedInterfacePolicy,
}

impl InterfaceFilter {
    /// Patterns shorter than two characters are ignored; invalid ones are
    /// logged and ignored.
    pub fn new(patterns: &[String], unmatched: UnmatchedInterfacePolicy) -> Self {
        let rules = patterns
            .iter()
            .filter(|p| p.chars().count() >= 2)
            .filter_map(|source| {
                let (exclude, body) = match source.strip_prefix('!') {
                    Some(body) => (true, body),
                    None => (false, source.as_str()),
                };
                match Regex::new(body) {
                    Ok(regex) => Some(Rule {
                        source: source.clone(),
                        exclude,
                        regex,
                    }),
                    Err(e) => {
                        warn!(pattern = %source, error = %e, "invalid interface pattern");
                        None
                    }
                }
            })
            .collect();
        Self { rules, unmatched }
    }

    pub fn decide(&self, interface: &str) -> InterfaceDecision {
        self.rules
            .iter()
            .find(|rule| rule.regex.is_match(interface))
            .map_or(InterfaceDecision::Unmatched(self.unmatched), |rule| {
                let pattern = rule.source.clone();
                if rule.exclude {
                    InterfaceDecision::Exclude { pattern }
                } else {
                    InterfaceDecision::Include { pattern }
                }
            })
    }
}
