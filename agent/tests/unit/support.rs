//! Shared test fixtures

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use servicesync::app::state::AppState;
use servicesync::deploy::dispatcher::DispatchOptions;
use servicesync::deploy::notifier::CallbackNotifier;
use servicesync::deploy::orchestrator::OrchestratorSettings;
use servicesync::errors::RedeployError;
use servicesync::runtime::memory::MemoryRuntime;
use servicesync::targets::{DeploymentTarget, TargetRegistry};

/// Notifier that remembers every callback URL it was asked to hit
#[derive(Default)]
pub struct RecordingNotifier {
    urls: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CallbackNotifier for RecordingNotifier {
    async fn notify(&self, callback_url: &str) -> Result<(), RedeployError> {
        self.urls.lock().unwrap().push(callback_url.to_string());
        Ok(())
    }
}

/// Notifier whose every callback fails
#[derive(Default)]
pub struct FailingNotifier {
    attempts: AtomicUsize,
}

impl FailingNotifier {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CallbackNotifier for FailingNotifier {
    async fn notify(&self, callback_url: &str) -> Result<(), RedeployError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(RedeployError::Notify(format!("{} returned 503", callback_url)))
    }
}

/// App state over an in-memory runtime with default settings
pub fn app(
    runtime: Arc<MemoryRuntime>,
    targets: Vec<DeploymentTarget>,
) -> (AppState, Arc<RecordingNotifier>) {
    let notifier = Arc::new(RecordingNotifier::default());
    let state = app_with_notifier(runtime, targets, DispatchOptions::default(), notifier.clone());
    (state, notifier)
}

pub fn app_with_notifier(
    runtime: Arc<MemoryRuntime>,
    targets: Vec<DeploymentTarget>,
    options: DispatchOptions,
    notifier: Arc<dyn CallbackNotifier>,
) -> AppState {
    AppState::with_parts(
        TargetRegistry::new(targets).unwrap(),
        runtime,
        None,
        OrchestratorSettings::default(),
        options,
        notifier,
    )
}
