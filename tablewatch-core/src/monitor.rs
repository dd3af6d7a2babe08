//! Monitor runtime
//!
//! One task owns every component and is the only place their state is
//! mutated. Timers, collaborator notifications and caller commands are
//! multiplexed with `tokio::select!`, so no two handlers ever run at once.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::causal::{CausalAnalyzer, CausalConfig};
use crate::collab::{DependencyGraph, IssueEvent, IssueRegistry, StateStore};
use crate::config::{MonitorConfig, WatchConfig};
use crate::decision::{AvoidList, DecisionAction, DecisionEngine};
use crate::error::{Result, WatchError};
use crate::events::{EventBus, WatchEvent};
use crate::knowledge::{AttemptRequest, FixTracker, SuggestedFixes};
use crate::learning::{ConfidenceReport, LearningEngine, Mistake};
use crate::store::KnowledgeStore;
use crate::types::{FixAttempt, IssueId, StateChange};

/// External collaborators the monitor observes and annotates
#[derive(Clone)]
pub struct Collaborators {
    pub state: Arc<dyn StateStore>,
    pub registry: Arc<dyn IssueRegistry>,
    pub dependencies: Option<Arc<dyn DependencyGraph>>,
}

/// All four components plus their collaborators
pub struct Monitor {
    config: MonitorConfig,
    store: Arc<dyn KnowledgeStore>,
    state: Arc<dyn StateStore>,
    registry: Arc<dyn IssueRegistry>,
    events: EventBus,

    fixes: FixTracker,
    causal: CausalAnalyzer,
    learning: LearningEngine,
    decisions: DecisionEngine,
}

impl Monitor {
    /// Build every component and load persisted state. Any persistence
    /// fault aborts initialization.
    pub async fn init(
        config: &WatchConfig,
        store: Arc<dyn KnowledgeStore>,
        collaborators: Collaborators,
    ) -> Result<Self> {
        let events = EventBus::new(config.monitor.event_capacity);
        let Collaborators {
            state,
            registry,
            dependencies,
        } = collaborators;

        let mut fixes = FixTracker::new(config.knowledge.clone(), registry.clone(), events.clone())
            .with_state_store(state.clone());
        fixes.load(store.as_ref()).await?;

        let mut causal = causal_analyzer(config.causal.clone(), registry.clone(), events.clone(), dependencies);
        causal.load(store.as_ref()).await?;

        let mut learning = LearningEngine::new(config.learning.clone(), events.clone());
        learning.load(store.as_ref()).await?;

        let mut decisions = DecisionEngine::new(
            config.decision.clone(),
            state.clone(),
            registry.clone(),
            events.clone(),
        );
        decisions.load(store.as_ref()).await?;

        info!(
            attempts = fixes.attempt_count(),
            patterns = learning.patterns().len(),
            chains = causal.chain_count(),
            "Monitor initialized"
        );

        Ok(Self {
            config: config.monitor.clone(),
            store,
            state,
            registry,
            events,
            fixes,
            causal,
            learning,
            decisions,
        })
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn fixes(&self) -> &FixTracker {
        &self.fixes
    }

    pub fn causal(&self) -> &CausalAnalyzer {
        &self.causal
    }

    pub fn learning(&self) -> &LearningEngine {
        &self.learning
    }

    pub fn decisions(&self) -> &DecisionEngine {
        &self.decisions
    }

    /// Record an attempt in the knowledge base and learn from it
    pub fn record_attempt(&mut self, request: AttemptRequest) -> FixAttempt {
        let attempt = self.fixes.record_attempt(request, Utc::now());
        self.learning.learn_from_attempt(&attempt);
        attempt
    }

    pub fn learn_from_mistake(&mut self, mistake: Mistake) -> f64 {
        self.learning.learn_from_mistake(mistake, Utc::now())
    }

    /// Suggestions for an issue, `None` if the registry does not know it
    pub fn suggest(&self, issue_id: &IssueId) -> Option<SuggestedFixes> {
        self.registry
            .get_issue(issue_id)
            .map(|issue| self.fixes.suggested_fixes(&issue))
    }

    /// Failed methods to avoid, per active issue
    pub fn avoid(&self) -> Vec<AvoidList> {
        self.decisions.what_to_avoid(&self.fixes)
    }

    pub fn confidence(&mut self) -> ConfidenceReport {
        let summaries = self.causal.causal_summaries();
        self.learning.get_learning_confidence(&summaries, Utc::now())
    }

    pub fn handle_state_change(&mut self, change: StateChange) {
        let watched = self.decisions.note_state_change(&change);
        self.causal.record_change(change);
        if watched {
            self.recompute();
        }
    }

    pub fn handle_issue_event(&mut self, event: IssueEvent) {
        match event {
            IssueEvent::Detected(issue) => {
                self.causal.analyze_issue(&issue);
            }
            IssueEvent::Resolved(id) => {
                debug!(issue_id = %id, "Issue resolved");
            }
        }
        self.decisions.note_issue_change();
        self.recompute();
    }

    pub fn decision_tick(&mut self) {
        let actions = self.decisions.tick(Utc::now(), &self.fixes);
        self.apply_actions(actions);
    }

    fn recompute(&mut self) {
        if !self.decisions.recompute_pending() {
            return;
        }
        let actions = self.decisions.recompute(Utc::now(), &self.fixes);
        self.apply_actions(actions);
    }

    fn activate(&mut self) {
        if self.decisions.activate(Utc::now()) {
            self.apply_actions(vec![DecisionAction::InvestigationActivated]);
        }
    }

    /// Top suggestions become predictions the learning engine checks later
    fn apply_actions(&mut self, actions: Vec<DecisionAction>) {
        for action in actions {
            if let DecisionAction::FixesSuggested(plans) = action {
                let now = Utc::now();
                for plan in &plans {
                    if let Some(top) = plan.suggestions.should_try.first() {
                        self.learning.record_prediction(&plan.issue_id, &top.method, now);
                    }
                }
            }
        }
    }

    /// Time until the pending `starting -> active` step, if any
    fn activation_delay(&self) -> Option<Duration> {
        self.decisions
            .pending_activation()
            .map(|due| (due - Utc::now()).to_std().unwrap_or(Duration::ZERO))
    }

    /// Persist every component
    pub async fn save(&self) -> Result<()> {
        let store = self.store.as_ref();
        self.fixes.save(store).await?;
        self.causal.save(store).await?;
        self.learning.save(store).await?;
        self.decisions.save(store).await?;
        debug!("Monitor state saved");
        Ok(())
    }
}

fn causal_analyzer(
    config: CausalConfig,
    registry: Arc<dyn IssueRegistry>,
    events: EventBus,
    dependencies: Option<Arc<dyn DependencyGraph>>,
) -> CausalAnalyzer {
    let analyzer = CausalAnalyzer::new(config, registry, events);
    match dependencies {
        Some(graph) => analyzer.with_dependency_graph(graph),
        None => analyzer,
    }
}

/// Requests sent to the running monitor
pub enum MonitorCommand {
    RecordAttempt {
        request: AttemptRequest,
        reply: oneshot::Sender<FixAttempt>,
    },
    LearnFromMistake {
        mistake: Mistake,
        reply: oneshot::Sender<f64>,
    },
    Suggest {
        issue_id: IssueId,
        reply: oneshot::Sender<Option<SuggestedFixes>>,
    },
    Avoid {
        reply: oneshot::Sender<Vec<AvoidList>>,
    },
    Confidence {
        reply: oneshot::Sender<ConfidenceReport>,
    },
    Save {
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Result of running the monitor loop.
#[derive(Debug, PartialEq)]
pub enum MonitorLoopResult {
    /// Stopped on the shutdown signal after saving.
    Shutdown,
    /// Stopped because the final save failed.
    Error(String),
}

/// Cheap, cloneable access to a running monitor
#[derive(Clone)]
pub struct MonitorHandle {
    tx: mpsc::Sender<MonitorCommand>,
    shutdown: CancellationToken,
    events: EventBus,
}

impl MonitorHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }

    pub async fn record_attempt(&self, request: AttemptRequest) -> Result<FixAttempt> {
        self.request(|reply| MonitorCommand::RecordAttempt { request, reply }).await
    }

    pub async fn learn_from_mistake(&self, mistake: Mistake) -> Result<f64> {
        self.request(|reply| MonitorCommand::LearnFromMistake { mistake, reply })
            .await
    }

    pub async fn suggest(&self, issue_id: impl Into<IssueId>) -> Result<Option<SuggestedFixes>> {
        let issue_id = issue_id.into();
        self.request(|reply| MonitorCommand::Suggest { issue_id, reply }).await
    }

    pub async fn avoid(&self) -> Result<Vec<AvoidList>> {
        self.request(|reply| MonitorCommand::Avoid { reply }).await
    }

    pub async fn confidence(&self) -> Result<ConfidenceReport> {
        self.request(|reply| MonitorCommand::Confidence { reply }).await
    }

    pub async fn save(&self) -> Result<()> {
        self.request(|reply| MonitorCommand::Save { reply }).await?
    }

    /// Signal the monitor to save and stop. Safe to call any number of times.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> MonitorCommand) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| WatchError::MonitorStopped)?;
        rx.await.map_err(|_| WatchError::MonitorStopped)
    }
}

/// Start the monitor task.
///
/// Returns a handle for commands and the task's `JoinHandle`, which
/// resolves once the loop has saved and stopped.
pub fn start_monitor(
    monitor: Monitor,
    shutdown: CancellationToken,
) -> (MonitorHandle, JoinHandle<MonitorLoopResult>) {
    let (tx, commands) = mpsc::channel(monitor.config.command_capacity.max(1));
    let handle = MonitorHandle {
        tx,
        shutdown: shutdown.clone(),
        events: monitor.events.clone(),
    };

    // Subscribe before spawning so nothing published after this returns is missed
    let inputs = MonitorInputs {
        commands,
        state_rx: monitor.state.subscribe(),
        issue_rx: monitor.registry.subscribe(),
    };

    info!("Starting monitor");
    let task = tokio::spawn(async move { monitor_loop(monitor, inputs, shutdown).await });
    (handle, task)
}

struct MonitorInputs {
    commands: mpsc::Receiver<MonitorCommand>,
    state_rx: broadcast::Receiver<StateChange>,
    issue_rx: broadcast::Receiver<IssueEvent>,
}

/// Run the monitor until the shutdown token is cancelled.
async fn monitor_loop(
    mut monitor: Monitor,
    inputs: MonitorInputs,
    shutdown: CancellationToken,
) -> MonitorLoopResult {
    let MonitorInputs {
        mut commands,
        mut state_rx,
        mut issue_rx,
    } = inputs;
    let (mut state_open, mut issues_open, mut commands_open) = (true, true, true);

    let decision_period = Duration::from_millis(monitor.config.decision_tick_ms.max(1));
    let confidence_period = Duration::from_millis(monitor.config.confidence_tick_ms.max(1));
    let mut decision_tick = interval(decision_period);
    decision_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut confidence_tick = interval_at(Instant::now() + confidence_period, confidence_period);
    confidence_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("Monitor loop starting");

    loop {
        let activation = monitor.activation_delay();

        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!("Monitor received shutdown signal");
                return match monitor.save().await {
                    Ok(()) => MonitorLoopResult::Shutdown,
                    Err(e) => {
                        error!(error = %e, "Final save failed");
                        MonitorLoopResult::Error(format!("Save failed: {e}"))
                    }
                };
            }

            change = state_rx.recv(), if state_open => {
                match change {
                    Ok(change) => monitor.handle_state_change(change),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "State notifications lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!("State store closed its notification channel");
                        state_open = false;
                    }
                }
            }

            event = issue_rx.recv(), if issues_open => {
                match event {
                    Ok(event) => monitor.handle_issue_event(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Issue notifications lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!("Issue registry closed its notification channel");
                        issues_open = false;
                    }
                }
            }

            cmd = commands.recv(), if commands_open => {
                match cmd {
                    Some(cmd) => handle_command(&mut monitor, cmd).await,
                    None => {
                        debug!("All monitor handles dropped");
                        commands_open = false;
                    }
                }
            }

            _ = tokio::time::sleep(activation.unwrap_or_default()), if activation.is_some() => {
                monitor.activate();
            }

            _ = decision_tick.tick() => {
                monitor.decision_tick();
            }

            _ = confidence_tick.tick() => {
                let report = monitor.confidence();
                debug!(confidence = report.confidence, "Periodic confidence check");
                if let Err(e) = monitor.learning.save(monitor.store.as_ref()).await {
                    error!(error = %e, "Failed to persist learning state");
                }
            }
        }
    }
}

async fn handle_command(monitor: &mut Monitor, cmd: MonitorCommand) {
    match cmd {
        MonitorCommand::RecordAttempt { request, reply } => {
            let _ = reply.send(monitor.record_attempt(request));
        }
        MonitorCommand::LearnFromMistake { mistake, reply } => {
            let _ = reply.send(monitor.learn_from_mistake(mistake));
        }
        MonitorCommand::Suggest { issue_id, reply } => {
            let _ = reply.send(monitor.suggest(&issue_id));
        }
        MonitorCommand::Avoid { reply } => {
            let _ = reply.send(monitor.avoid());
        }
        MonitorCommand::Confidence { reply } => {
            let _ = reply.send(monitor.confidence());
        }
        MonitorCommand::Save { reply } => {
            let _ = reply.send(monitor.save().await);
        }
    }
}
