//! Front-end side of a context switch.
//!
//! A switch persists the outgoing view, loads the incoming context's
//! snapshot and asks the daemon to switch, all concurrently. A cached
//! snapshot is shown at once; authoritative listings are fetched in the
//! background and reconciled with [`validate`]. Background results are
//! tagged with the switch generation that started them and dropped if a
//! newer switch happened meanwhile.

use crate::backend::Backend;
use crate::error::Result;
use crate::store::ClientSnapshotStore;
use crate::validate::{validate, FreshLists};
use crate::view::ViewState;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use vantage_ipc::PushEvent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchPhase {
    Idle,
    Switching { target: String },
}

impl SwitchPhase {
    pub fn is_switching(&self) -> bool {
        matches!(self, SwitchPhase::Switching { .. })
    }
}

/// Result of a switch that actually ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchOutcome {
    pub context_id: String,
    pub previous_context_id: String,
    /// A cached view was applied before the background refresh
    pub had_snapshot: bool,
}

struct State {
    active_context_id: String,
    view: ViewState,
    phase: SwitchPhase,
    generation: u64,
    /// Context the daemon announced while a switch was in flight
    pending_change: Option<String>,
}

/// Returns the phase to idle however the switch ends.
struct SwitchGuard<'a> {
    state: &'a Mutex<State>,
    generation: u64,
}

impl Drop for SwitchGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        if state.generation == self.generation && state.phase.is_switching() {
            state.phase = SwitchPhase::Idle;
        }
    }
}

pub struct ContextSwitchOrchestrator {
    backend: Arc<dyn Backend>,
    store: Arc<ClientSnapshotStore>,
    state: Arc<Mutex<State>>,
    refresh: Mutex<Option<JoinHandle<()>>>,
}

impl ContextSwitchOrchestrator {
    /// Start with `active_context_id` and an empty view.
    pub fn new(
        backend: Arc<dyn Backend>,
        store: Arc<ClientSnapshotStore>,
        active_context_id: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            store,
            state: Arc::new(Mutex::new(State {
                active_context_id: active_context_id.into(),
                view: ViewState::empty(),
                phase: SwitchPhase::Idle,
                generation: 0,
                pending_change: None,
            })),
            refresh: Mutex::new(None),
        }
    }

    /// Adopt whatever context the daemon has active, restoring its snapshot
    /// and kicking off a refresh.
    pub async fn attach(
        backend: Arc<dyn Backend>,
        store: Arc<ClientSnapshotStore>,
    ) -> Result<Self> {
        let active = backend.active_context().await?;
        let snapshot = match store.load(&active).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(context_id = %active, error = %e, "Failed to load snapshot");
                None
            }
        };

        let orchestrator = Self::new(backend, store, active.clone());
        let had_snapshot = snapshot.is_some();
        {
            let mut state = orchestrator.state.lock();
            state.view = initial_view(snapshot.as_ref().map(|s| s.restore()));
        }
        orchestrator.spawn_refresh(0, active, had_snapshot);
        Ok(orchestrator)
    }

    pub fn active_context_id(&self) -> String {
        self.state.lock().active_context_id.clone()
    }

    pub fn phase(&self) -> SwitchPhase {
        self.state.lock().phase.clone()
    }

    pub fn is_switching(&self) -> bool {
        self.state.lock().phase.is_switching()
    }

    pub fn view(&self) -> ViewState {
        self.state.lock().view.clone()
    }

    /// Mutate the current view, e.g. on user selection.
    pub fn update_view<R>(&self, f: impl FnOnce(&mut ViewState) -> R) -> R {
        f(&mut self.state.lock().view)
    }

    /// Switch to `target`.
    ///
    /// Returns `Ok(None)` when `target` is already active or another switch
    /// is in flight. A rejected switch leaves the previous context and view
    /// in place with the error message shown in the view. A context change
    /// the daemon pushed meanwhile is followed once this switch ends.
    pub async fn switch(&self, target: &str) -> Result<Option<SwitchOutcome>> {
        self.transition(target, true).await
    }

    /// React to a push event from the daemon's subscription stream.
    ///
    /// A `ContextChanged` arriving mid-switch is queued and applied by the
    /// switch in flight, so it returns `None` here.
    pub async fn handle_push_event(&self, event: &PushEvent) -> Option<SwitchOutcome> {
        match event {
            PushEvent::ContextChanged { context_id, .. } => {
                // The daemon already switched; only the view follows
                match self.transition(context_id, false).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        tracing::warn!(context_id = %context_id, error = %e, "Failed to follow context change");
                        None
                    }
                }
            }
            PushEvent::FileChange { context_id, .. } | PushEvent::TodoChange { context_id, .. } => {
                let (active, switching) = {
                    let state = self.state.lock();
                    (state.active_context_id.clone(), state.phase.is_switching())
                };
                if *context_id == active && !switching {
                    self.refresh();
                }
                None
            }
        }
    }

    /// Refetch listings for the active context in the background.
    pub fn refresh(&self) {
        let (generation, active) = {
            let state = self.state.lock();
            (state.generation, state.active_context_id.clone())
        };
        self.spawn_refresh(generation, active, true);
    }

    /// Wait for the most recent background refresh to finish.
    pub async fn settle(&self) {
        let handle = self.refresh.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Background refresh task failed");
            }
        }
    }

    /// Save a snapshot of the current view, e.g. before exit.
    pub async fn persist(&self) -> Result<()> {
        let snapshot = {
            let state = self.state.lock();
            self.store.capture(&state.active_context_id, &state.view)
        };
        self.store.save(&snapshot).await
    }

    async fn transition(&self, target: &str, call_backend: bool) -> Result<Option<SwitchOutcome>> {
        let result = self.run_transition(target, call_backend).await;
        self.follow_pending().await;
        result
    }

    /// Catch up with context changes the daemon announced during a switch.
    ///
    /// The announcement may predate the daemon applying our own switch, so
    /// the daemon's current active id wins over the queued one.
    async fn follow_pending(&self) {
        loop {
            let announced = {
                let mut state = self.state.lock();
                // A switch still running picks it up when it ends
                if state.phase.is_switching() {
                    return;
                }
                match state.pending_change.take() {
                    Some(id) => id,
                    None => return,
                }
            };

            let target = match self.backend.active_context().await {
                Ok(id) => id,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to query active context");
                    announced
                }
            };
            tracing::debug!(context_id = %target, "Following queued context change");

            if let Err(e) = self.run_transition(&target, false).await {
                tracing::warn!(context_id = %target, error = %e, "Failed to follow context change");
            }
        }
    }

    async fn run_transition(
        &self,
        target: &str,
        call_backend: bool,
    ) -> Result<Option<SwitchOutcome>> {
        let (previous, outgoing, generation) = {
            let mut state = self.state.lock();
            if let SwitchPhase::Switching { target: in_flight } = &state.phase {
                tracing::debug!(
                    in_flight = %in_flight,
                    requested = %target,
                    "Switch already in progress"
                );
                if !call_backend {
                    state.pending_change = Some(target.to_string());
                }
                return Ok(None);
            }
            if state.active_context_id == target {
                tracing::debug!(context_id = %target, "Already active");
                return Ok(None);
            }

            state.phase = SwitchPhase::Switching {
                target: target.to_string(),
            };
            state.generation += 1;
            (
                state.active_context_id.clone(),
                self.store.capture(&state.active_context_id, &state.view),
                state.generation,
            )
        };
        let _guard = SwitchGuard {
            state: &self.state,
            generation,
        };

        tracing::debug!(from = %previous, to = %target, generation, "Switching context");

        let backend_switch = async {
            if call_backend {
                self.backend.switch_context(target).await
            } else {
                Ok(())
            }
        };
        let (saved, loaded, switched) = tokio::join!(
            self.store.save(&outgoing),
            self.store.load(target),
            backend_switch
        );

        if let Err(e) = saved {
            tracing::warn!(context_id = %previous, error = %e, "Failed to save snapshot");
        }
        let snapshot = match loaded {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(context_id = %target, error = %e, "Failed to load snapshot");
                None
            }
        };

        if let Err(e) = switched {
            tracing::warn!(context_id = %target, error = %e, "Switch rejected");
            let mut state = self.state.lock();
            state.view.error = Some(e.user_message());
            state.view.loading = false;
            return Err(e);
        }

        let had_snapshot = snapshot.is_some();
        {
            let mut state = self.state.lock();
            state.active_context_id = target.to_string();
            state.view = initial_view(snapshot.as_ref().map(|s| s.restore()));
            state.phase = SwitchPhase::Idle;
        }

        self.spawn_refresh(generation, target.to_string(), had_snapshot);

        tracing::info!(from = %previous, to = %target, had_snapshot, "Context switched");

        Ok(Some(SwitchOutcome {
            context_id: target.to_string(),
            previous_context_id: previous,
            had_snapshot,
        }))
    }

    fn spawn_refresh(&self, generation: u64, context_id: String, keep_on_failure: bool) {
        let backend = Arc::clone(&self.backend);
        let state = Arc::clone(&self.state);
        let selected = self.state.lock().view.selected_project_id.clone();

        let handle = tokio::spawn(async move {
            let fetched = fetch_lists(backend.as_ref(), selected.as_deref()).await;

            let mut state = state.lock();
            if state.generation != generation || state.active_context_id != context_id {
                tracing::debug!(
                    context_id = %context_id,
                    generation,
                    current = state.generation,
                    "Discarding stale refresh"
                );
                return;
            }
            apply_refresh(&mut state.view, fetched, keep_on_failure, &context_id);
        });

        *self.refresh.lock() = Some(handle);
    }
}

fn initial_view(restored: Option<ViewState>) -> ViewState {
    match restored {
        Some(view) => view,
        None => {
            let mut view = ViewState::empty();
            view.loading = true;
            view
        }
    }
}

async fn fetch_lists(backend: &dyn Backend, selected: Option<&str>) -> Result<FreshLists> {
    let projects = backend.list_projects().await?;
    let sessions = match selected {
        Some(project_id) if projects.iter().any(|p| p.id == project_id) => Some((
            project_id.to_string(),
            backend.list_sessions(project_id).await?,
        )),
        _ => None,
    };
    Ok(FreshLists { projects, sessions })
}

fn apply_refresh(
    view: &mut ViewState,
    fetched: Result<FreshLists>,
    keep_on_failure: bool,
    context_id: &str,
) {
    match fetched {
        Ok(fresh) if fresh.is_empty() && view.has_data() => {
            tracing::warn!(context_id = %context_id, "Refresh returned no data, keeping cached view");
            view.loading = false;
        }
        Ok(fresh) => {
            *view = validate(view, &fresh);
        }
        Err(e) if keep_on_failure => {
            tracing::warn!(context_id = %context_id, error = %e, "Refresh failed, keeping current view");
            view.loading = false;
        }
        Err(e) => {
            tracing::warn!(context_id = %context_id, error = %e, "Refresh failed with nothing cached");
            *view = ViewState::empty();
            view.error = Some(e.user_message());
        }
    }
}
