//! Dispatch coordinator
//!
//! Fans a push event out to every matching target. Each match gets its own
//! task; runs never wait on or cancel each other, except that runs for the
//! same target, or for containers publishing the same host port, queue behind
//! one another so two replacements never race for the port.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::deploy::matcher::match_targets;
use crate::deploy::notifier::{CallbackNotifier, NotifyOn};
use crate::deploy::orchestrator::Orchestrator;
use crate::models::event::PushEvent;
use crate::models::run::{RedeployRun, RunReport};
use crate::targets::{DeployAction, DeploymentTarget, TargetKey, TargetRegistry};
use crate::utils::{calc_exp_backoff, CooldownOptions};

/// Retry policy wrapped around a whole run
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, 1 disables retrying
    pub max_attempts: u32,
    pub cooldown: CooldownOptions,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            cooldown: CooldownOptions::default(),
        }
    }
}

/// Dispatcher options
#[derive(Debug, Clone, Default)]
pub struct DispatchOptions {
    pub notify_on: NotifyOn,
    pub retry: RetryPolicy,
}

/// Handle on the runs started for one event
///
/// Dropping it does not cancel anything.
pub struct Dispatch {
    matched: usize,
    reports: mpsc::UnboundedReceiver<RunReport>,
}

impl Dispatch {
    /// Number of targets the event matched
    pub fn matched(&self) -> usize {
        self.matched
    }

    /// Wait for every run to finish and collect the reports
    pub async fn wait(mut self) -> Vec<RunReport> {
        let mut reports = Vec::with_capacity(self.matched);
        while let Some(report) = self.reports.recv().await {
            reports.push(report);
        }
        reports
    }
}

/// Resource a run holds exclusively while it executes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum RunLock {
    /// Container targets sharing a host port replace the same container
    HostPort(u16),
    Target(TargetKey),
}

impl RunLock {
    fn for_target(target: &DeploymentTarget) -> Self {
        match target.action {
            DeployAction::RecreateContainer { host_port, .. } => RunLock::HostPort(host_port),
            DeployAction::UpdateClusterService { .. } => RunLock::Target(target.key()),
        }
    }
}

/// Starts and supervises redeploy runs
pub struct Dispatcher {
    registry: Arc<TargetRegistry>,
    orchestrator: Arc<Orchestrator>,
    notifier: Arc<dyn CallbackNotifier>,
    options: DispatchOptions,
    run_locks: HashMap<RunLock, Arc<tokio::sync::Mutex<()>>>,
    tasks: Mutex<JoinSet<()>>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<TargetRegistry>,
        orchestrator: Arc<Orchestrator>,
        notifier: Arc<dyn CallbackNotifier>,
        options: DispatchOptions,
    ) -> Self {
        let run_locks = registry
            .all()
            .iter()
            .map(|target| (RunLock::for_target(target), Arc::new(tokio::sync::Mutex::new(()))))
            .collect();

        Self {
            registry,
            orchestrator,
            notifier,
            options,
            run_locks,
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    pub fn registry(&self) -> &TargetRegistry {
        &self.registry
    }

    /// Start one run per matching target and return immediately
    ///
    /// Must be called from within a tokio runtime.
    pub fn dispatch(&self, event: PushEvent) -> Dispatch {
        let matched: Vec<DeploymentTarget> = match_targets(&event, &self.registry)
            .into_iter()
            .cloned()
            .collect();

        let (report_tx, reports) = mpsc::unbounded_channel();
        let dispatch = Dispatch {
            matched: matched.len(),
            reports,
        };

        if matched.is_empty() {
            info!(
                "No deployment target for {}:{}, ignoring",
                event.repository_name, event.tag
            );
            return dispatch;
        }

        info!(
            "Push of {}:{} matched {} target(s)",
            event.repository_name,
            event.tag,
            matched.len()
        );

        let event = Arc::new(event);
        let mut tasks = self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // Reap finished runs so the set does not grow without bound
        reap_finished(&mut tasks);

        for target in matched {
            let lock = self
                .run_locks
                .get(&RunLock::for_target(&target))
                .cloned()
                .unwrap_or_default();
            let task = RunTask {
                event: event.clone(),
                target,
                orchestrator: self.orchestrator.clone(),
                notifier: self.notifier.clone(),
                options: self.options.clone(),
            };
            let report_tx = report_tx.clone();

            tasks.spawn(async move {
                let _guard = lock.lock().await;
                let report = task.run().await;
                // Nobody may be listening, which is fine
                let _ = report_tx.send(report);
            });
        }

        dispatch
    }

    /// Number of runs started and not yet reaped
    pub fn in_flight(&self) -> usize {
        let mut tasks = self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        reap_finished(&mut tasks);
        tasks.len()
    }

    /// Wait for every in-flight run to finish
    pub async fn shutdown(&self) {
        let mut tasks = {
            let mut guard = self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::take(&mut *guard)
        };

        if !tasks.is_empty() {
            info!("Waiting for {} redeploy run(s) to finish...", tasks.len());
        }
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!("Redeploy task panicked: {}", e);
            }
        }
    }
}

fn reap_finished(tasks: &mut JoinSet<()>) {
    while let Some(result) = tasks.try_join_next() {
        if let Err(e) = result {
            error!("Redeploy task panicked: {}", e);
        }
    }
}

/// Everything one spawned run needs
struct RunTask {
    event: Arc<PushEvent>,
    target: DeploymentTarget,
    orchestrator: Arc<Orchestrator>,
    notifier: Arc<dyn CallbackNotifier>,
    options: DispatchOptions,
}

impl RunTask {
    async fn run(self) -> RunReport {
        let image_ref = self.event.image_ref(&self.target.repository);
        let max_attempts = self.options.retry.max_attempts.max(1);

        let mut attempt = 1;
        let report = loop {
            let mut run = RedeployRun::new(self.target.clone(), image_ref.clone());
            let result = self.orchestrator.execute(&mut run).await;

            match result {
                Err(e) if attempt < max_attempts => {
                    let delay = calc_exp_backoff(&self.options.retry.cooldown, attempt - 1);
                    warn!(
                        "Attempt {}/{} for {} failed ({}), retrying in {:?}",
                        attempt, max_attempts, self.target, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                _ => break run.report(attempt),
            }
        };

        if !report.succeeded() {
            if let Some(e) = &report.error {
                error!(
                    run_id = %report.run_id,
                    kind = e.kind(),
                    "Redeploy of {} for {} failed: {}",
                    report.image_ref, report.target, e
                );
            }
        }

        self.notify(&report).await;
        report
    }

    async fn notify(&self, report: &RunReport) {
        let Some(callback_url) = self.event.callback_url.as_deref() else {
            return;
        };

        let wanted = match self.options.notify_on {
            NotifyOn::Success => report.succeeded(),
            NotifyOn::Failure => !report.succeeded(),
        };
        if !wanted {
            debug!("Skipping callback for run {} ({:?})", report.run_id, report.state);
            return;
        }

        match self.notifier.notify(callback_url).await {
            Ok(()) => info!("Notified {} for run {}", callback_url, report.run_id),
            Err(e) => warn!("Callback for run {} failed: {}", report.run_id, e),
        }
    }
}
