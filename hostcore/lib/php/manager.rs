use std::{
    collections::BTreeMap,
    path::Path,
    sync::{Arc, Mutex as StdMutex, MutexGuard},
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use hostutils::socket_accepts;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    config::HostcoreConfig,
    models::{DeclaredState, UserLimits},
    report::StepReport,
    HostcoreError, HostcoreResult,
};

use super::{
    read_pid_file, remove_if_exists, BackoffDecision, BackoffState, CgroupLimiter, InstanceAdmin,
    InstanceInfo, InstanceKey, InstanceLauncher, InstanceProcess, InstanceSpec, InstanceStatus,
    RestartPolicy,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const SOCKET_POLL_INTERVAL: Duration = Duration::from_millis(100);

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

type Entry = Arc<Mutex<InstanceEntry>>;

/// Keeps exactly one runtime process per (user, enabled version) with at least one active site.
///
/// Every operation on one instance holds that instance's lock, so reconciliation and direct
/// control never race on the same key while different keys proceed independently.
pub struct InstanceManager {
    config: HostcoreConfig,
    launcher: Arc<dyn InstanceLauncher>,
    admin: Arc<dyn InstanceAdmin>,
    limiter: Option<CgroupLimiter>,
    entries: StdMutex<BTreeMap<InstanceKey, Entry>>,
}

struct InstanceEntry {
    spec: InstanceSpec,
    limits: UserLimits,
    site_count: usize,
    process: Option<Box<dyn InstanceProcess>>,
    started_at: Option<DateTime<Utc>>,
    backoff: BackoffState,
    last_error: Option<String>,
    retired: bool,
}

/// An instance that could not be brought to its required state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceFailure {
    /// The instance.
    pub key: InstanceKey,

    /// Why.
    pub error: String,
}

/// What one reconciliation pass did to the instances.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileOutcome {
    /// Started on this pass.
    pub started: Vec<InstanceKey>,

    /// Stopped on this pass because no active site needs them.
    pub stopped: Vec<InstanceKey>,

    /// Required and already running.
    pub running: Vec<InstanceKey>,

    /// Required but waiting out a restart delay.
    pub deferred: Vec<InstanceKey>,

    /// Failed to start on this pass, or marked failed earlier.
    pub failed: Vec<InstanceFailure>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl InstanceManager {
    /// Creates a manager. Nothing is started until [`InstanceManager::reconcile`] or
    /// [`InstanceManager::start`].
    pub fn new(
        config: &HostcoreConfig,
        launcher: Arc<dyn InstanceLauncher>,
        admin: Arc<dyn InstanceAdmin>,
    ) -> Self {
        let limiter = config
            .get_enforce_limits()
            .then(|| CgroupLimiter::new(config.get_cgroup_root()));

        Self {
            config: config.clone(),
            launcher,
            admin,
            limiter,
            entries: StdMutex::new(BTreeMap::new()),
        }
    }

    /// The instances `state` requires, with the number of active sites each serves.
    ///
    /// A site counts if it is active, its version is declared and enabled, and its owner is
    /// declared.
    pub fn required_instances(state: &DeclaredState) -> BTreeMap<InstanceKey, usize> {
        let mut required = BTreeMap::new();
        for site in state.get_sites().iter().filter(|s| s.is_active()) {
            let enabled = state
                .version(site.get_php_version())
                .is_some_and(|v| v.is_enabled());
            if !enabled || state.user(site.get_owner()).is_none() {
                continue;
            }

            *required
                .entry(InstanceKey::new(site.get_owner(), site.get_php_version()))
                .or_insert(0) += 1;
        }

        required
    }

    /// Launch parameters for `key` under `state`.
    pub fn spec(&self, key: &InstanceKey, state: &DeclaredState) -> HostcoreResult<InstanceSpec> {
        self.spec_and_limits(key, state).map(|(spec, _)| spec)
    }

    /// Starts every required instance that is not running and stops every running instance that
    /// is no longer required.
    ///
    /// Per-instance failures are collected in the outcome rather than aborting the pass. An
    /// instance whose retries are exhausted is left alone until an explicit start.
    pub async fn reconcile(&self, state: &DeclaredState) -> HostcoreResult<ReconcileOutcome> {
        let required = Self::required_instances(state);
        let mut outcome = ReconcileOutcome::default();

        for (key, entry) in self.tracked() {
            if required.contains_key(&key) {
                continue;
            }

            let mut entry = entry.lock().await;
            if entry.retired {
                continue;
            }

            let had_process = entry.process.is_some();
            if let Err(e) = self.stop_locked(&mut entry).await {
                outcome.failed.push(InstanceFailure::new(&key, &e));
            }
            self.retire(&key, &mut entry);

            if had_process {
                tracing::info!(instance = %key, "stopped instance with no active sites");
                outcome.stopped.push(key);
            }
        }

        for (key, site_count) in required {
            let (spec, limits) = match self.spec_and_limits(&key, state) {
                Ok(found) => found,
                Err(e) => {
                    outcome.failed.push(InstanceFailure::new(&key, &e));
                    continue;
                }
            };

            let mut entry = self.lock_current(&spec, limits).await;
            entry.refresh(spec, limits, site_count);

            if entry.is_running() {
                outcome.running.push(key);
                continue;
            }

            if entry.reap() {
                self.record_failure(&mut entry, "process exited unexpectedly");
            }

            if entry.backoff.gave_up() {
                let error = entry
                    .last_error
                    .clone()
                    .unwrap_or_else(|| "retries exhausted".to_string());
                outcome.failed.push(InstanceFailure { key, error });
                continue;
            }

            if !entry.backoff.ready(Instant::now()) {
                tracing::debug!(instance = %key, "waiting out restart delay");
                outcome.deferred.push(key);
                continue;
            }

            match self.start_locked(&mut entry).await {
                Ok(()) => outcome.started.push(key),
                Err(e) => {
                    self.record_failure(&mut entry, &e);
                    outcome.failed.push(InstanceFailure::new(&key, &e));
                }
            }
        }

        tracing::info!(
            started = outcome.started.len(),
            stopped = outcome.stopped.len(),
            running = outcome.running.len(),
            deferred = outcome.deferred.len(),
            failed = outcome.failed.len(),
            "reconciled instances"
        );

        Ok(outcome)
    }

    /// Starts `key` if it is not running. Clears any failed state.
    pub async fn start(
        &self,
        key: &InstanceKey,
        state: &DeclaredState,
    ) -> HostcoreResult<InstanceInfo> {
        self.start_inner(key, state, false).await
    }

    /// Stops `key`, removing its sockets and pid file.
    pub async fn stop(&self, key: &InstanceKey) -> HostcoreResult<()> {
        let entry = self
            .entry(key)
            .ok_or_else(|| HostcoreError::InstanceNotRunning(key.to_string()))?;
        let mut entry = entry.lock().await;

        if entry.process.is_none() {
            return Err(HostcoreError::InstanceNotRunning(key.to_string()));
        }

        self.stop_locked(&mut entry).await
    }

    /// Stops `key` if running and starts it again with a fresh socket.
    pub async fn restart(
        &self,
        key: &InstanceKey,
        state: &DeclaredState,
    ) -> HostcoreResult<InstanceInfo> {
        self.start_inner(key, state, true).await
    }

    /// Restarts the persistent workers of `key` while its socket stays bound.
    pub async fn restart_workers(&self, key: &InstanceKey) -> HostcoreResult<()> {
        let entry = self.running_entry(key)?;
        let mut entry = entry.lock().await;
        if !entry.is_running() {
            return Err(HostcoreError::InstanceNotRunning(key.to_string()));
        }

        self.admin.restart_workers(&entry.spec).await
    }

    /// Hands a freshly rendered routing document to the running instance `key`.
    pub async fn reload_config(&self, key: &InstanceKey, document: &str) -> HostcoreResult<()> {
        let entry = self.running_entry(key)?;
        let mut entry = entry.lock().await;
        if !entry.is_running() {
            return Err(HostcoreError::InstanceNotRunning(key.to_string()));
        }

        self.admin.load_config(&entry.spec, document).await
    }

    /// Detects instances whose process died since the last look. Returns their keys.
    ///
    /// Each death counts as a failed attempt, so the next reconciliation restarts the instance
    /// after the backoff delay.
    pub async fn check_health(&self) -> Vec<InstanceKey> {
        let mut crashed = Vec::new();
        for (key, entry) in self.tracked() {
            let mut entry = entry.lock().await;
            if !entry.is_running() && entry.reap() {
                tracing::warn!(instance = %key, "instance process died");
                self.record_failure(&mut entry, "process exited unexpectedly");
                crashed.push(key);
            }
        }

        crashed
    }

    /// Re-attaches to instances a previous daemon left running, using their pid files.
    ///
    /// Every declared user and version is probed. Stale pid files are removed. Adopted instances
    /// that are no longer required are stopped by the next reconciliation.
    pub async fn recover(&self, state: &DeclaredState) -> Vec<InstanceKey> {
        let mut adopted = Vec::new();
        for user in state.get_users() {
            for version in state.get_php_versions() {
                let spec = InstanceSpec::new(user, version, &self.config);
                let pid = match read_pid_file(&spec.pid_file).await {
                    Ok(Some(pid)) => pid,
                    Ok(None) => continue,
                    Err(e) => {
                        tracing::warn!(instance = %spec.key, "cannot read pid file: {e}");
                        continue;
                    }
                };

                match self.launcher.adopt(&spec, pid).await {
                    Ok(Some(process)) => {
                        let mut entry = self.lock_current(&spec, *user.get_limits()).await;
                        entry.process = Some(process);
                        entry.started_at = Some(Utc::now());
                        adopted.push(spec.key.clone());
                    }
                    Ok(None) => {
                        if let Err(e) = remove_if_exists(&spec.pid_file).await {
                            tracing::warn!(instance = %spec.key, "cannot remove stale pid file: {e}");
                        }
                    }
                    Err(e) => tracing::warn!(instance = %spec.key, pid, "cannot adopt: {e}"),
                }
            }
        }

        tracing::info!(count = adopted.len(), "recovered instances");
        adopted
    }

    /// Status of every tracked instance, ordered by key.
    pub async fn status(&self) -> Vec<InstanceInfo> {
        let mut infos = Vec::new();
        for (_, entry) in self.tracked() {
            let mut entry = entry.lock().await;
            infos.push(self.info(&mut entry).await);
        }

        infos
    }

    /// Status of one instance.
    pub async fn instance(&self, key: &InstanceKey) -> HostcoreResult<InstanceInfo> {
        let entry = self
            .entry(key)
            .ok_or_else(|| HostcoreError::InstanceNotRunning(key.to_string()))?;
        let mut entry = entry.lock().await;
        Ok(self.info(&mut entry).await)
    }

    /// Stops every instance. Used at shutdown.
    pub async fn stop_all(&self) -> StepReport {
        let mut report = StepReport::new("all instances");
        for (key, entry) in self.tracked() {
            let mut entry = entry.lock().await;
            if entry.retired {
                continue;
            }

            if entry.process.is_some() {
                report.record(format!("stop {key}"), self.stop_locked(&mut entry).await);
            }
            self.retire(&key, &mut entry);
        }

        report
    }

    async fn start_inner(
        &self,
        key: &InstanceKey,
        state: &DeclaredState,
        restart: bool,
    ) -> HostcoreResult<InstanceInfo> {
        let (spec, limits) = self.spec_and_limits(key, state)?;
        let site_count = Self::required_instances(state)
            .get(key)
            .copied()
            .unwrap_or_default();

        let mut entry = self.lock_current(&spec, limits).await;
        entry.refresh(spec, limits, site_count);

        if restart {
            self.stop_locked(&mut entry).await?;
        }

        if !entry.is_running() {
            entry.reap();
            entry.backoff.reset();
            if let Err(e) = self.start_locked(&mut entry).await {
                self.record_failure(&mut entry, &e);
                return Err(e);
            }
        }

        Ok(self.info(&mut entry).await)
    }

    async fn start_locked(&self, entry: &mut InstanceEntry) -> HostcoreResult<()> {
        let spec = entry.spec.clone();
        clear_stale_socket(&spec.socket).await?;
        clear_stale_socket(&spec.admin_socket).await?;

        let mut process = self.launcher.launch(&spec).await?;
        if !self.wait_for_socket(&spec, process.as_mut()).await {
            if !process.is_running() {
                if let Err(e) = remove_if_exists(&spec.pid_file).await {
                    tracing::warn!(path = %spec.pid_file.display(), "cannot remove: {e}");
                }
                return Err(HostcoreError::custom(anyhow::anyhow!(
                    "instance {} exited during startup",
                    spec.key
                )));
            }

            tracing::warn!(
                instance = %spec.key,
                socket = %spec.socket.display(),
                "socket not accepting connections after {:?}",
                self.config.socket_wait()
            );
        }

        if let Some(limiter) = &self.limiter {
            limiter
                .apply(&spec.key.username, &entry.limits, process.pid())
                .await;
        }

        tracing::info!(
            instance = %spec.key,
            pid = process.pid(),
            socket = %spec.socket.display(),
            "started instance"
        );

        entry.process = Some(process);
        entry.started_at = Some(Utc::now());
        entry.backoff.reset();
        entry.last_error = None;
        Ok(())
    }

    async fn stop_locked(&self, entry: &mut InstanceEntry) -> HostcoreResult<()> {
        let result = match entry.process.take() {
            Some(mut process) => {
                tracing::info!(instance = %entry.spec.key, pid = process.pid(), "stopping instance");
                process.terminate(self.config.stop_grace()).await
            }
            None => Ok(()),
        };

        entry.started_at = None;
        for path in [
            &entry.spec.socket,
            &entry.spec.admin_socket,
            &entry.spec.pid_file,
        ] {
            if let Err(e) = remove_if_exists(path).await {
                tracing::warn!(path = %path.display(), "cannot remove: {e}");
            }
        }

        result
    }

    async fn wait_for_socket(&self, spec: &InstanceSpec, process: &mut dyn InstanceProcess) -> bool {
        let deadline = Instant::now() + self.config.socket_wait();
        loop {
            if socket_accepts(&spec.socket).await {
                return true;
            }

            if !process.is_running() || Instant::now() >= deadline {
                return false;
            }

            tokio::time::sleep(SOCKET_POLL_INTERVAL).await;
        }
    }

    async fn info(&self, entry: &mut InstanceEntry) -> InstanceInfo {
        let running = entry.is_running();
        let status = if running {
            InstanceStatus::Running
        } else if entry.backoff.gave_up() {
            InstanceStatus::Failed
        } else {
            InstanceStatus::Stopped
        };

        let thread_count = if running {
            match self.admin.thread_count(&entry.spec).await {
                Ok(count) => Some(count),
                Err(e) => {
                    tracing::debug!(instance = %entry.spec.key, "thread count unavailable: {e}");
                    None
                }
            }
        } else {
            None
        };

        let started_at = entry.started_at.filter(|_| running);
        let uptime_secs = started_at
            .map(|at| (Utc::now() - at).num_seconds().max(0) as u64)
            .unwrap_or_default();

        InstanceInfo {
            username: entry.spec.key.username.clone(),
            version: entry.spec.key.version.clone(),
            socket_path: entry.spec.socket.clone(),
            status,
            pid: entry.process.as_ref().filter(|_| running).map(|p| p.pid()),
            started_at,
            uptime_secs,
            thread_count,
            site_count: entry.site_count,
            restart_attempts: entry.backoff.attempts(),
            last_error: entry.last_error.clone(),
        }
    }

    fn record_failure(&self, entry: &mut InstanceEntry, error: impl ToString) {
        let error = error.to_string();
        let policy: &RestartPolicy = self.config.get_restart_policy();

        match entry.backoff.record_failure(policy, Instant::now()) {
            BackoffDecision::RetryAt(at) => tracing::warn!(
                instance = %entry.spec.key,
                attempt = entry.backoff.attempts(),
                retry_in = ?at.saturating_duration_since(Instant::now()),
                "instance failed: {error}"
            ),
            BackoffDecision::GiveUp => tracing::error!(
                instance = %entry.spec.key,
                attempts = entry.backoff.attempts(),
                "instance failed, giving up until started explicitly: {error}"
            ),
        }

        entry.last_error = Some(error);
    }

    fn spec_and_limits(
        &self,
        key: &InstanceKey,
        state: &DeclaredState,
    ) -> HostcoreResult<(InstanceSpec, UserLimits)> {
        let user = state
            .user(&key.username)
            .ok_or_else(|| HostcoreError::UnknownUser(key.username.clone()))?;
        let version = state.enabled_version(&key.version)?;
        Ok((
            InstanceSpec::new(user, version, &self.config),
            *user.get_limits(),
        ))
    }

    fn running_entry(&self, key: &InstanceKey) -> HostcoreResult<Entry> {
        self.entry(key)
            .ok_or_else(|| HostcoreError::InstanceNotRunning(key.to_string()))
    }

    fn entry(&self, key: &InstanceKey) -> Option<Entry> {
        self.lock_entries().get(key).cloned()
    }

    fn entry_or_insert(&self, spec: &InstanceSpec, limits: UserLimits) -> Entry {
        let mut entries = self.lock_entries();
        Arc::clone(
            entries
                .entry(spec.key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(InstanceEntry::new(spec.clone(), limits)))),
        )
    }

    /// Locks the tracked entry of `spec.key`, creating it if needed.
    ///
    /// An entry retired while this call waited for its lock is no longer in the map, so the
    /// lookup is repeated until the locked entry is the tracked one.
    async fn lock_current(
        &self,
        spec: &InstanceSpec,
        limits: UserLimits,
    ) -> OwnedMutexGuard<InstanceEntry> {
        loop {
            let entry = self.entry_or_insert(spec, limits).lock_owned().await;
            if !entry.retired {
                return entry;
            }
        }
    }

    /// Drops `key` from the map. Must be called while holding the entry's lock.
    fn retire(&self, key: &InstanceKey, entry: &mut InstanceEntry) {
        entry.retired = true;
        self.lock_entries().remove(key);
    }

    fn tracked(&self) -> Vec<(InstanceKey, Entry)> {
        self.lock_entries()
            .iter()
            .map(|(key, entry)| (key.clone(), Arc::clone(entry)))
            .collect()
    }

    fn lock_entries(&self) -> MutexGuard<'_, BTreeMap<InstanceKey, Entry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl InstanceEntry {
    fn new(spec: InstanceSpec, limits: UserLimits) -> Self {
        Self {
            spec,
            limits,
            site_count: 0,
            process: None,
            started_at: None,
            backoff: BackoffState::default(),
            last_error: None,
            retired: false,
        }
    }

    fn refresh(&mut self, spec: InstanceSpec, limits: UserLimits, site_count: usize) {
        self.spec = spec;
        self.limits = limits;
        self.site_count = site_count;
    }

    fn is_running(&mut self) -> bool {
        self.process.as_mut().is_some_and(|p| p.is_running())
    }

    /// Drops a dead process. Returns true if there was one.
    fn reap(&mut self) -> bool {
        if self.process.take().is_some() {
            self.started_at = None;
            return true;
        }

        false
    }
}

impl InstanceFailure {
    fn new(key: &InstanceKey, error: &HostcoreError) -> Self {
        Self {
            key: key.clone(),
            error: error.to_string(),
        }
    }
}

impl ReconcileOutcome {
    /// Returns true if nothing was started or stopped.
    pub fn is_unchanged(&self) -> bool {
        self.started.is_empty() && self.stopped.is_empty()
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Removes a socket file nobody answers on. A socket that still accepts connections belongs to
/// a process we do not track.
async fn clear_stale_socket(path: &Path) -> HostcoreResult<()> {
    match tokio::fs::symlink_metadata(path).await {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
        Ok(_) => {
            if socket_accepts(path).await {
                return Err(HostcoreError::SocketInUse(path.to_path_buf()));
            }

            tracing::info!(socket = %path.display(), "removing stale socket");
            remove_if_exists(path).await
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
