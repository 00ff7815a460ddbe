//! Update coordinator.
//!
//! Owns the subscription collection and is the only writer of its mutable
//! fields. Every update call that starts or joins a download opens a new
//! generation and stamps its id onto the subscriptions involved. When a
//! download finishes, its stamp is compared with the live generation:
//!
//! - live: the completion counts towards the generation's merge, reload
//!   and failure report
//! - stale: a newer generation superseded it; the completion is recorded
//!   on the subscription and persisted, and never reloads or reports. New
//!   content it brought is merged when the next generation settles.
//!
//! A superseding generation takes over the in-flight members of the one
//! it replaces that the user asked for, so their failures still reach a
//! user-triggered report. Background leftovers finish stale.
//!
//! When no subscription stamped with the live id is still `updating` the
//! generation settles: merge once if anything changed, reload once, and
//! raise at most one failure report (only for user-triggered generations).
//! Background reloads are skipped while the attached activation check
//! reports the extension as not activated.
//!
//! Only subscriptions active under the [`ListSelection`] are updated by
//! `update_active_subscriptions` and merged into the ruleset.
//!
//! All state sits behind one mutex. Network and reload awaits happen with
//! the lock released.

mod download;
mod generation;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lw_core::types::RULESET_FILE_NAME;
use lw_core::{
    ActivationState, AllowList, ContentBlockerHost, FailureKind, GroupId, HostError, ListCache,
    ListSelection, Settings, Subscription, TaskId, Transport,
};
use lw_merger::{content_digest, merge, Ruleset};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use self::download::{fetch_payload, DownloadOutcome};
use self::generation::Generation;
use crate::config::UpdaterConfig;
use crate::error::SyncError;
use crate::events::{CoordinatorStatus, FailureReport, UpdateEvent};
use crate::probe::{ActivationProbe, ProbePhase};

const EVENT_CAPACITY: usize = 64;

/// What an update call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateRequest {
    /// A generation was opened. `joined` lists subscriptions that were
    /// already downloading and now count for this generation.
    Started {
        generation: GroupId,
        started: Vec<String>,
        joined: Vec<String>,
    },
    /// None of the requested subscriptions needed an update.
    NothingToDo,
}

/// A download the coordinator has handed to the runtime.
struct Job {
    name: String,
    url: String,
    task: TaskId,
}

/// A generation that just settled, waiting for its reload.
struct Settlement {
    generation: GroupId,
    user_triggered: bool,
    changed: bool,
    failed: usize,
    reload: bool,
}

struct State {
    subscriptions: BTreeMap<String, Subscription>,
    allow_list: AllowList,
    selection: ListSelection,
    /// Last generation id handed out.
    last_group: GroupId,
    /// The live generation, until it settles.
    generation: Option<Generation>,
    next_task: u64,
    last_update: Option<DateTime<Utc>>,
    failure: Option<FailureReport>,
    reloads_running: usize,
    /// A stale completion changed content the ruleset does not hold yet.
    pending_merge: bool,
}

impl State {
    fn live_group(&self) -> Option<GroupId> {
        self.generation.as_ref().map(|g| g.id)
    }

    fn is_updating(&self) -> bool {
        match self.live_group() {
            Some(id) => self
                .subscriptions
                .values()
                .any(|s| s.updating && s.updating_group_identifier == Some(id)),
            None => false,
        }
    }

    fn is_active(&self, sub: &Subscription) -> bool {
        self.selection.is_active(sub.role)
    }
}

/// What the coordinator watches on the attached activation check.
struct ActivationWatch {
    phase: watch::Receiver<ProbePhase>,
    activation: watch::Receiver<ActivationState>,
}

struct Inner {
    config: UpdaterConfig,
    settings: Settings,
    cache: Arc<dyn ListCache>,
    transport: Arc<dyn Transport>,
    host: Arc<dyn ContentBlockerHost>,
    runtime: Handle,
    state: Mutex<State>,
    status: watch::Sender<CoordinatorStatus>,
    events: broadcast::Sender<UpdateEvent>,
    activation_watch: Mutex<Option<ActivationWatch>>,
}

/// Schedules subscription downloads and turns their outcomes into rulesets.
#[derive(Clone)]
pub struct UpdateCoordinator {
    inner: Arc<Inner>,
}

impl UpdateCoordinator {
    /// Load persisted subscriptions and the allow-list.
    ///
    /// Must be called from within a tokio runtime; downloads are spawned on
    /// it. Subscriptions persisted as `updating` belonged to a process that
    /// is gone, so they are reset. Default subscriptions are seeded when the
    /// store holds none.
    pub fn new(
        config: UpdaterConfig,
        settings: Settings,
        cache: Arc<dyn ListCache>,
        transport: Arc<dyn Transport>,
        host: Arc<dyn ContentBlockerHost>,
    ) -> Result<Self, SyncError> {
        let runtime = Handle::try_current().map_err(|_| SyncError::NoRuntime)?;

        let mut subscriptions = settings.load_subscriptions()?;
        let mut dirty = false;
        for sub in subscriptions.iter_mut() {
            if sub.updating || sub.updating_group_identifier.is_some() {
                if sub.updating {
                    log::info!("Resetting interrupted download of '{}'", sub.name);
                }
                sub.clear_in_flight();
                dirty = true;
            }
        }

        if subscriptions.is_empty() && !config.default_subscriptions.is_empty() {
            for default in &config.default_subscriptions {
                let file_name = file_name_for(&default.name)?;
                subscriptions.push(
                    Subscription::new(&default.name, &default.url, file_name, default.expires)
                        .with_role(default.role),
                );
            }
            log::info!("Seeded {} default subscriptions", subscriptions.len());
            dirty = true;
        }

        if dirty {
            settings.save_subscriptions(&subscriptions)?;
        }

        let allow_list = settings.load_allow_list()?;
        let selection = settings.load_list_selection()?;
        let last_update = settings.last_ruleset_update()?;

        let state = State {
            subscriptions: subscriptions
                .into_iter()
                .map(|sub| (sub.name.clone(), sub))
                .collect(),
            allow_list,
            selection,
            last_group: GroupId(0),
            generation: None,
            next_task: 0,
            last_update,
            failure: None,
            reloads_running: 0,
            pending_merge: false,
        };

        let (status, _) = watch::channel(CoordinatorStatus {
            last_update,
            ..CoordinatorStatus::default()
        });
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                settings,
                cache,
                transport,
                host,
                runtime,
                state: Mutex::new(state),
                status,
                events,
                activation_watch: Mutex::new(None),
            }),
        })
    }

    /// Defer reloads while `probe` has an activity test outstanding, so the
    /// extension never answers a coordinator reload as if it were the probe.
    /// Background reloads are skipped while it reports the extension as not
    /// activated; user-triggered ones always run.
    pub fn attach_probe(&self, probe: &ActivationProbe) {
        *self.inner.activation_watch.lock() = Some(ActivationWatch {
            phase: probe.watch_phase(),
            activation: probe.watch_state(),
        });
    }

    // =========================================================================
    // Updates
    // =========================================================================

    /// Update every expired active subscription, or every active one when
    /// the user asked. Returns immediately.
    pub fn update_active_subscriptions(&self, user_triggered: bool) -> UpdateRequest {
        let now = Utc::now();
        let names: Vec<String> = {
            let state = self.inner.state.lock();
            state
                .subscriptions
                .values()
                .filter(|sub| state.is_active(sub))
                .filter(|sub| user_triggered || sub.is_expired(now))
                .map(|sub| sub.name.clone())
                .collect()
        };
        self.inner.begin(&names, user_triggered)
    }

    /// Update the named subscriptions. Unknown names are skipped.
    pub fn update_subscriptions<S: AsRef<str>>(&self, names: &[S], user_triggered: bool) -> UpdateRequest {
        let names: Vec<String> = names.iter().map(|n| n.as_ref().to_string()).collect();
        self.inner.begin(&names, user_triggered)
    }

    /// Run `update_active_subscriptions(false)` every `every`, starting now.
    pub fn spawn_periodic_updates(&self, every: Duration) -> JoinHandle<()> {
        let coordinator = self.clone();
        self.inner.runtime.spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if let UpdateRequest::Started { generation, started, .. } =
                    coordinator.update_active_subscriptions(false)
                {
                    log::info!("Periodic update {} started {} downloads", generation, started.len());
                }
            }
        })
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Names of active subscriptions whose `last_update + expires` has passed.
    pub fn outdated_subscription_names(&self) -> BTreeSet<String> {
        self.outdated_subscription_names_at(Utc::now())
    }

    pub fn outdated_subscription_names_at(&self, now: DateTime<Utc>) -> BTreeSet<String> {
        let state = self.inner.state.lock();
        state
            .subscriptions
            .values()
            .filter(|sub| state.is_active(sub) && sub.is_expired(now))
            .map(|sub| sub.name.clone())
            .collect()
    }

    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.inner.state.lock().subscriptions.values().cloned().collect()
    }

    pub fn subscription(&self, name: &str) -> Option<Subscription> {
        self.inner.state.lock().subscriptions.get(name).cloned()
    }

    pub fn allow_list(&self) -> AllowList {
        self.inner.state.lock().allow_list.clone()
    }

    pub fn list_selection(&self) -> ListSelection {
        self.inner.state.lock().selection
    }

    pub fn is_updating(&self) -> bool {
        self.inner.state.lock().is_updating()
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.inner.state.lock().last_update
    }

    pub fn status(&self) -> CoordinatorStatus {
        self.inner.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<CoordinatorStatus> {
        self.inner.status.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<UpdateEvent> {
        self.inner.events.subscribe()
    }

    /// Clear the pending failure report once the user has seen it.
    pub fn dismiss_failure(&self) {
        let mut state = self.inner.state.lock();
        state.failure = None;
        self.inner.publish(&state);
    }

    // =========================================================================
    // Subscription Management
    // =========================================================================

    /// Add a subscription. It is not downloaded until the next update.
    pub fn subscribe(&self, name: &str, url: &str, expires: Duration) -> Result<(), SyncError> {
        let file_name = file_name_for(name)?;
        let mut state = self.inner.state.lock();
        if state.subscriptions.contains_key(name) {
            return Err(SyncError::AlreadySubscribed(name.to_string()));
        }

        let sub = Subscription::new(name, url, file_name, expires);
        self.inner
            .settings
            .save_subscriptions(state.subscriptions.values().chain(std::iter::once(&sub)))?;
        state.subscriptions.insert(sub.name.clone(), sub);
        log::info!("Subscribed to '{}' ({})", name, url);
        self.inner.publish(&state);
        Ok(())
    }

    /// Remove a subscription and its cached payload. A download still in
    /// flight for it is ignored when it lands. If its content was part of
    /// the ruleset, the ruleset is rebuilt and reloaded.
    pub async fn unsubscribe(&self, name: &str) -> Result<(), SyncError> {
        let inner = &self.inner;
        let (removed, settlement) = {
            let mut state = inner.state.lock();
            let Some(removed) = state.subscriptions.remove(name) else {
                return Err(SyncError::UnknownSubscription(name.to_string()));
            };
            if let Err(e) = inner.settings.save_subscriptions(state.subscriptions.values()) {
                state.subscriptions.insert(removed.name.clone(), removed);
                return Err(e.into());
            }
            if let Err(e) = inner.cache.remove(removed.file_name()) {
                log::warn!("Failed to remove cached payload for '{}': {}", name, e);
            }
            log::info!("Unsubscribed from '{}'", name);

            if removed.downloaded {
                if let Some(generation) = state.generation.as_mut() {
                    generation.changed = true;
                }
            }
            // It may have been the last member the live generation waited on.
            let settlement = inner.try_settle(&mut state);
            inner.publish(&state);
            (removed, settlement)
        };

        match settlement {
            Some(settlement) => inner.finish_settlement(settlement).await,
            None if removed.downloaded => inner.rebuild(true).await?,
            None => {}
        }
        Ok(())
    }

    /// Allow-list a host and rebuild the ruleset. Returns false if the host
    /// was already allowed.
    pub async fn allow_host(&self, host: &str) -> Result<bool, SyncError> {
        let added = {
            let mut state = self.inner.state.lock();
            let mut list = state.allow_list.clone();
            let added = list.add(host)?;
            if added {
                self.inner.settings.save_allow_list(&list)?;
                state.allow_list = list;
            }
            added
        };
        if added {
            self.inner.rebuild(true).await?;
        }
        Ok(added)
    }

    /// Remove a host from the allow-list and rebuild the ruleset. Returns
    /// false if it was not allowed.
    pub async fn disallow_host(&self, host: &str) -> Result<bool, SyncError> {
        let removed = {
            let mut state = self.inner.state.lock();
            let mut list = state.allow_list.clone();
            let removed = list.remove(host);
            if removed {
                self.inner.settings.save_allow_list(&list)?;
                state.allow_list = list;
            }
            removed
        };
        if removed {
            self.inner.rebuild(true).await?;
        }
        Ok(removed)
    }

    // =========================================================================
    // List Selection
    // =========================================================================

    /// Show or hide acceptable ads by switching the default-list variant.
    /// See [`UpdateCoordinator::set_default_list_enabled`].
    pub async fn set_acceptable_ads(&self, enabled: bool) -> Result<UpdateRequest, SyncError> {
        self.change_selection(|selection| selection.acceptable_ads = enabled)
            .await
    }

    /// Turn the plain default list on or off.
    ///
    /// A change rebuilds and reloads from the content already downloaded,
    /// then starts background updates of the outdated active lists. The
    /// updates start even if the rebuild failed; its error is returned.
    pub async fn set_default_list_enabled(&self, enabled: bool) -> Result<UpdateRequest, SyncError> {
        self.change_selection(|selection| selection.default_list_enabled = enabled)
            .await
    }

    async fn change_selection<F>(&self, change: F) -> Result<UpdateRequest, SyncError>
    where
        F: FnOnce(&mut ListSelection),
    {
        {
            let mut state = self.inner.state.lock();
            let mut selection = state.selection;
            change(&mut selection);
            if selection == state.selection {
                return Ok(UpdateRequest::NothingToDo);
            }
            self.inner.settings.save_list_selection(&selection)?;
            state.selection = selection;
            log::info!(
                "List selection changed: acceptable ads {}, default list {}",
                selection.acceptable_ads,
                selection.default_list_enabled
            );
        }

        let rebuilt = self.inner.rebuild(true).await;
        let request = self.update_active_subscriptions(false);
        rebuilt.map(|()| request)
    }
}

impl Inner {
    fn begin(self: &Arc<Self>, names: &[String], user_triggered: bool) -> UpdateRequest {
        let mut jobs = Vec::new();
        let request = {
            let mut state = self.state.lock();

            let mut started = Vec::new();
            let mut joined = Vec::new();
            for name in names {
                match state.subscriptions.get(name) {
                    Some(sub) if sub.updating => joined.push(name.clone()),
                    Some(_) => started.push(name.clone()),
                    None => log::warn!("Ignoring update of unknown subscription '{}'", name),
                }
            }
            if started.is_empty() && joined.is_empty() {
                return UpdateRequest::NothingToDo;
            }

            let id = state.last_group.next();
            state.last_group = id;
            let previous = state.generation.take();
            let previous_id = previous.as_ref().map(|p| p.id);
            if let Some(previous_id) = previous_id {
                log::debug!("{} supersedes unsettled {}", id, previous_id);
            }
            let mut generation = Generation::supersede(previous, id, user_triggered);

            for name in &joined {
                if let Some(sub) = state.subscriptions.get_mut(name) {
                    sub.join_generation(id, user_triggered);
                    generation.user_triggered |= sub.user_triggered;
                }
            }

            // The user still waits on these; the new generation answers for them.
            for sub in state.subscriptions.values_mut() {
                let leftover = sub.updating
                    && sub.user_triggered
                    && previous_id.is_some()
                    && sub.updating_group_identifier == previous_id;
                if leftover {
                    log::debug!("{} takes over user-requested '{}'", id, sub.name);
                    sub.join_generation(id, false);
                    generation.user_triggered = true;
                }
            }
            for name in &started {
                state.next_task += 1;
                let task = TaskId(state.next_task);
                if let Some(sub) = state.subscriptions.get_mut(name) {
                    sub.begin_download(task, id, user_triggered);
                    jobs.push(Job {
                        name: name.clone(),
                        url: sub.url().to_string(),
                        task,
                    });
                }
            }
            state.generation = Some(generation);

            log::info!(
                "Update {} ({}): {} started, {} joined",
                id,
                if user_triggered { "user" } else { "background" },
                started.len(),
                joined.len()
            );
            self.persist(&state);
            self.publish(&state);
            UpdateRequest::Started {
                generation: id,
                started,
                joined,
            }
        };

        for job in jobs {
            let inner = Arc::clone(self);
            self.runtime.spawn(async move {
                inner.run_download(job).await;
            });
        }
        request
    }

    async fn run_download(self: Arc<Self>, job: Job) {
        let outcome = fetch_payload(self.transport.as_ref(), &job.url, self.config.download_timeout).await;
        if let Some(settlement) = self.complete(&job, outcome) {
            self.finish_settlement(settlement).await;
        }
    }

    /// Apply a finished download. Returns the settlement if this completion
    /// was the last one the live generation waited on.
    fn complete(&self, job: &Job, mut outcome: DownloadOutcome) -> Option<Settlement> {
        let now = Utc::now();
        let mut state = self.state.lock();
        let live_group = state.live_group();

        let (changed, live) = {
            let Some(sub) = state.subscriptions.get_mut(&job.name) else {
                log::debug!("Dropping completion for removed subscription '{}'", job.name);
                return None;
            };
            if sub.task_identifier != Some(job.task) {
                log::debug!("Dropping completion of {} for '{}'", job.task, job.name);
                return None;
            }

            let cache_error = match &outcome {
                DownloadOutcome::Fetched { body, .. } => self.cache.write(sub.file_name(), body).err(),
                DownloadOutcome::Failed { .. } => None,
            };
            if let Some(e) = cache_error {
                log::warn!("Failed to cache payload for '{}': {}", job.name, e);
                outcome = DownloadOutcome::Failed {
                    kind: FailureKind::Transport,
                    detail: e.to_string(),
                };
            }

            let stamped = sub.updating_group_identifier;
            let changed = sub.finish_download(&outcome.attempt(), now);
            (changed, stamped.is_some() && stamped == live_group)
        };
        self.persist(&state);

        if !live {
            log::info!("Recorded stale completion for '{}'", job.name);
            if changed {
                state.pending_merge = true;
            }
            self.publish(&state);
            return None;
        }

        if let Some(generation) = state.generation.as_mut() {
            generation.record(&job.name, changed, &outcome);
        }
        let settlement = self.try_settle(&mut state);
        self.publish(&state);
        settlement
    }

    /// Settle the live generation if none of its members is still updating.
    /// Merges under the lock so the merge sees the same snapshot that
    /// settled the generation.
    fn try_settle(&self, state: &mut State) -> Option<Settlement> {
        let id = state.live_group()?;
        if state.is_updating() {
            return None;
        }
        let generation = state.generation.take()?;

        let mut reload = true;
        let merge = generation.changed || state.pending_merge;
        if merge {
            match self.build_ruleset(state) {
                Ok(ruleset) => {
                    state.pending_merge = false;
                    let now = Utc::now();
                    state.last_update = Some(now);
                    if let Err(e) = self.settings.set_last_ruleset_update(now) {
                        log::warn!("Failed to persist ruleset update time: {}", e);
                    }
                    log::info!("{} merged {} rules", id, ruleset.rule_count);
                }
                Err(e) => {
                    self.report_merge_failure(Some(id), &e);
                    reload = false;
                }
            }
        }

        if let Some(report) = generation.report() {
            log::warn!("{} failed for {} subscriptions", id, report.failures.len());
            state.failure = Some(report.clone());
            self.emit(UpdateEvent::UpdateFailed(report));
        } else if !generation.failures.is_empty() {
            log::info!(
                "Background {} failed for {} subscriptions, retrying later",
                id,
                generation.failures.len()
            );
        }

        Some(Settlement {
            generation: id,
            user_triggered: generation.user_triggered,
            changed: merge,
            failed: generation.failures.len(),
            reload,
        })
    }

    async fn finish_settlement(&self, settlement: Settlement) {
        if settlement.reload {
            // Failures are reported inside reload().
            let _ = self.reload(settlement.user_triggered).await;
        }
        self.emit(UpdateEvent::Settled {
            generation: settlement.generation,
            changed: settlement.changed,
            failed: settlement.failed,
        });
    }

    /// Merge every downloaded active payload with the allow-list and store
    /// the result where the extension reads it.
    fn build_ruleset(&self, state: &State) -> Result<Ruleset, SyncError> {
        let mut payloads = Vec::new();
        for sub in state
            .subscriptions
            .values()
            .filter(|s| s.downloaded && state.is_active(s))
        {
            match self.cache.read(sub.file_name())? {
                Some(payload) => payloads.push(payload),
                None => log::warn!("Cached payload for '{}' is missing", sub.name),
            }
        }

        let ruleset = merge(&payloads, state.allow_list.hosts(), &self.config.merge_limits)?;
        self.cache.write(RULESET_FILE_NAME, &ruleset.json)?;
        log::debug!(
            "Stored ruleset {:016x} ({} rules, {} bytes)",
            ruleset.digest,
            ruleset.rule_count,
            ruleset.json.len()
        );
        Ok(ruleset)
    }

    /// Rebuild from current content and reload, outside any generation.
    async fn rebuild(&self, user_triggered: bool) -> Result<(), SyncError> {
        {
            let mut state = self.state.lock();
            if let Err(e) = self.build_ruleset(&state) {
                self.report_merge_failure(None, &e);
                return Err(e);
            }
            state.pending_merge = false;
        }
        self.reload(user_triggered).await?;
        Ok(())
    }

    /// Reload the content blocker, retrying ordinary failures. Waits for an
    /// outstanding activity test to finish first.
    async fn reload(&self, user_triggered: bool) -> Result<(), HostError> {
        self.wait_for_probe().await;
        if !user_triggered && !self.extension_activated() {
            log::info!("Skipping background reload: extension is not activated");
            return Ok(());
        }
        self.set_reloading(true);

        let attempts = self.config.reload_retry_count.max(1);
        let identifier = self.config.content_blocker_identifier.as_str();
        let mut attempt = 1;
        let result = loop {
            match self.host.reload(identifier).await {
                Ok(()) => break Ok(()),
                Err(e) => {
                    log::warn!("Reload attempt {}/{} failed: {}", attempt, attempts, e);
                    if attempt >= attempts {
                        break Err(e);
                    }
                    attempt += 1;
                }
            }
        };

        self.set_reloading(false);
        match &result {
            Ok(()) => log::info!("Reloaded content blocker '{}'", identifier),
            Err(e) if user_triggered => self.emit(UpdateEvent::ReloadFailed {
                message: e.to_string(),
            }),
            Err(_) => {}
        }
        result
    }

    async fn wait_for_probe(&self) {
        let receiver = self.activation_watch.lock().as_ref().map(|watch| watch.phase.clone());
        let Some(mut phase) = receiver else {
            return;
        };
        if !phase.borrow().is_idle() {
            log::debug!("Deferring reload until the activity test finishes");
        }
        // A dropped probe can no longer block anything.
        let _ = phase.wait_for(ProbePhase::is_idle).await;
    }

    /// Unknown without an attached activation check; reloads go ahead.
    fn extension_activated(&self) -> bool {
        match self.activation_watch.lock().as_ref() {
            Some(watch) => watch.activation.borrow().activated,
            None => true,
        }
    }

    fn set_reloading(&self, running: bool) {
        let mut state = self.state.lock();
        if running {
            state.reloads_running += 1;
        } else {
            state.reloads_running = state.reloads_running.saturating_sub(1);
        }
        self.publish(&state);
    }

    fn report_merge_failure(&self, generation: Option<GroupId>, error: &SyncError) {
        log::error!("Failed to build ruleset: {}", error);
        let capacity = matches!(error, SyncError::Merge(e) if e.is_capacity());
        self.emit(UpdateEvent::MergeFailed {
            generation,
            message: error.to_string(),
            capacity,
        });
    }

    fn persist(&self, state: &State) {
        if let Err(e) = self.settings.save_subscriptions(state.subscriptions.values()) {
            log::warn!("Failed to persist subscriptions: {}", e);
        }
    }

    fn publish(&self, state: &State) {
        self.status.send_replace(CoordinatorStatus {
            updating: state.is_updating(),
            reloading: state.reloads_running > 0,
            last_update: state.last_update,
            generation: (state.last_group > GroupId(0)).then_some(state.last_group),
            failure: state.failure.clone(),
        });
    }

    fn emit(&self, event: UpdateEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }
}

/// Cache file name for a subscription. The digest suffix keeps names that
/// slug to the same text apart.
fn file_name_for(name: &str) -> Result<String, SyncError> {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed != name {
        return Err(SyncError::InvalidName(name.to_string()));
    }
    let slug: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    Ok(format!("list-{}-{:08x}.json", slug, content_digest(name) as u32))
}

#[cfg(test)]
mod tests;
