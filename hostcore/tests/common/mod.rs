//! Doubles for the process, admin and proxy seams, and a harness wiring them to a reconciler.

#![allow(dead_code)]

use std::{
    collections::HashSet,
    os::unix::net::UnixListener,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use hostcore::{
    config::HostcoreConfig,
    jail::JailManager,
    models::{DeclaredState, PhpVersionConfig, Role, Site, SiteStatus, User},
    os::InMemoryOs,
    php::{
        InstanceAdmin, InstanceKey, InstanceLauncher, InstanceManager, InstanceProcess,
        InstanceSpec, RestartPolicy,
    },
    proxy::ProxyReloader,
    reconcile::Reconciler,
    HostcoreError, HostcoreResult,
};
use tempfile::TempDir;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Launches fake runtimes that bind the instance socket and write a pid file.
#[derive(Default)]
pub struct FakeLauncher {
    next_pid: AtomicU32,
    attempts: Mutex<Vec<InstanceKey>>,
    failing: Mutex<HashSet<InstanceKey>>,
    exiting: Mutex<HashSet<InstanceKey>>,
    adoptable: Mutex<HashSet<u32>>,
    processes: Mutex<Vec<(InstanceKey, u32, Arc<AtomicBool>)>>,
    terminate_delay_ms: Arc<AtomicU64>,
}

pub struct FakeProcess {
    pid: u32,
    alive: Arc<AtomicBool>,
    listener: Option<UnixListener>,
    terminate_delay_ms: Arc<AtomicU64>,
}

/// Records admin API calls.
#[derive(Default)]
pub struct FakeAdmin {
    pub loads: Mutex<Vec<(InstanceKey, String)>>,
    pub worker_restarts: Mutex<Vec<InstanceKey>>,
    pub fail_loads: AtomicBool,
}

/// Records every document handed to the main proxy.
#[derive(Default)]
pub struct RecordingReloader {
    pub documents: Mutex<Vec<String>>,
    pub fail: AtomicBool,
}

/// A reconciler over doubles, rooted in a temporary directory.
pub struct Harness {
    pub dir: TempDir,
    pub config: HostcoreConfig,
    pub os: Arc<InMemoryOs>,
    pub launcher: Arc<FakeLauncher>,
    pub admin: Arc<FakeAdmin>,
    pub reloader: Arc<RecordingReloader>,
    pub instances: Arc<InstanceManager>,
    pub reconciler: Arc<Reconciler>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl FakeLauncher {
    pub fn new() -> Self {
        Self {
            next_pid: AtomicU32::new(1000),
            ..Default::default()
        }
    }

    /// Every launch attempt, successful or not.
    pub fn attempts(&self) -> Vec<InstanceKey> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn attempts_for(&self, key: &InstanceKey) -> usize {
        self.attempts().iter().filter(|k| *k == key).count()
    }

    pub fn fail_launches(&self, key: &InstanceKey) {
        self.failing.lock().unwrap().insert(key.clone());
    }

    pub fn allow_launches(&self, key: &InstanceKey) {
        self.failing.lock().unwrap().remove(key);
    }

    /// Makes processes of `key` exit right after they are launched.
    pub fn exit_on_launch(&self, key: &InstanceKey) {
        self.exiting.lock().unwrap().insert(key.clone());
    }

    /// Makes every process, running or future, take `delay` to exit.
    pub fn slow_terminate(&self, delay: Duration) {
        self.terminate_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn mark_adoptable(&self, pid: u32) {
        self.adoptable.lock().unwrap().insert(pid);
    }

    /// Kills the most recent process of `key` without telling the manager.
    pub fn crash(&self, key: &InstanceKey) {
        let processes = self.processes.lock().unwrap();
        if let Some((_, _, alive)) = processes.iter().rev().find(|(k, _, _)| k == key) {
            alive.store(false, Ordering::SeqCst);
        }
    }

    pub fn live_count(&self) -> usize {
        self.processes
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, _, alive)| alive.load(Ordering::SeqCst))
            .count()
    }
}

impl FakeProcess {
    fn alive(&mut self) -> bool {
        if !self.alive.load(Ordering::SeqCst) {
            self.listener = None;
            return false;
        }

        true
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::with_policy(
            RestartPolicy::builder()
                .initial_delay_ms(0)
                .max_attempts(3)
                .build(),
        )
    }

    pub fn with_policy(policy: RestartPolicy) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), policy);
        let os = Arc::new(
            InMemoryOs::new()
                .with_user("alice", &[])
                .with_user("bob", &[])
                .with_user("ops", &["sudo"]),
        );
        let launcher = Arc::new(FakeLauncher::new());
        let admin = Arc::new(FakeAdmin::default());
        let reloader = Arc::new(RecordingReloader::default());

        let jail = Arc::new(JailManager::new(os.clone(), &config));
        let instances = Arc::new(InstanceManager::new(
            &config,
            launcher.clone(),
            admin.clone(),
        ));
        let reconciler = Arc::new(Reconciler::new(
            &config,
            jail,
            instances.clone(),
            reloader.clone(),
        ));

        Self {
            dir,
            config,
            os,
            launcher,
            admin,
            reloader,
            instances,
            reconciler,
        }
    }

    pub fn home_root(&self) -> PathBuf {
        self.config.get_home_root().clone()
    }

    pub fn main_document(&self) -> String {
        std::fs::read_to_string(self.config.main_config_path()).unwrap_or_default()
    }

    /// alice owns `alice.test` on 8.4.
    pub fn alice_state(&self, status: SiteStatus) -> DeclaredState {
        self.state(vec![site("alice-test", "alice.test", "alice", status)])
    }

    pub fn state(&self, sites: Vec<Site>) -> DeclaredState {
        DeclaredState::builder()
            .users(vec![
                user("alice", 1001, Role::User),
                user("bob", 1002, Role::User),
                user("ops", 1003, Role::Admin),
            ])
            .sites(sites)
            .php_versions(vec![version("8.3", true), version("8.4", true)])
            .build()
            .normalized(&self.config.layout())
            .unwrap()
    }

    pub fn reloads(&self) -> usize {
        self.reloader.documents.lock().unwrap().len()
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

pub fn test_config(root: &Path, policy: RestartPolicy) -> HostcoreConfig {
    HostcoreConfig::builder()
        .dev_mode(true)
        .home_root(root.join("home"))
        .output_dir(root.join("caddy"))
        .log_dir(root.join("log"))
        .state_file(root.join("state.json"))
        .control_socket(root.join("control.sock"))
        .socket_wait_secs(1)
        .stop_grace_secs(1)
        .restart_policy(policy)
        .build()
}

pub fn user(username: &str, id: u32, role: Role) -> User {
    User::builder().username(username).uid(id).gid(id).role(role).build()
}

pub fn version(version: &str, enabled: bool) -> PhpVersionConfig {
    PhpVersionConfig::builder()
        .version(version)
        .binary_path("/usr/local/bin/frankenphp")
        .enabled(enabled)
        .build()
}

pub fn site(id: &str, domain: &str, owner: &str, status: SiteStatus) -> Site {
    Site::builder()
        .id(id)
        .domain(domain)
        .owner(owner)
        .php_version("8.4")
        .status(status)
        .build()
}

pub fn key(username: &str, version: &str) -> InstanceKey {
    InstanceKey::new(username, version)
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl InstanceLauncher for FakeLauncher {
    async fn launch(&self, spec: &InstanceSpec) -> HostcoreResult<Box<dyn InstanceProcess>> {
        self.attempts.lock().unwrap().push(spec.key.clone());

        if self.failing.lock().unwrap().contains(&spec.key) {
            return Err(HostcoreError::CommandFailed {
                command: format!("{} run", spec.binary.display()),
                code: Some(1),
                stderr: "Error: loading initial config: bad document".to_string(),
            });
        }

        if let Some(run_dir) = spec.socket.parent() {
            std::fs::create_dir_all(run_dir)?;
        }
        let listener = UnixListener::bind(&spec.socket)?;

        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        std::fs::write(&spec.pid_file, pid.to_string())?;

        let exits = self.exiting.lock().unwrap().contains(&spec.key);
        let alive = Arc::new(AtomicBool::new(!exits));
        self.processes
            .lock()
            .unwrap()
            .push((spec.key.clone(), pid, alive.clone()));

        Ok(Box::new(FakeProcess {
            pid,
            alive,
            listener: (!exits).then_some(listener),
            terminate_delay_ms: self.terminate_delay_ms.clone(),
        }))
    }

    async fn adopt(
        &self,
        spec: &InstanceSpec,
        pid: u32,
    ) -> HostcoreResult<Option<Box<dyn InstanceProcess>>> {
        if !self.adoptable.lock().unwrap().contains(&pid) {
            return Ok(None);
        }

        let alive = Arc::new(AtomicBool::new(true));
        self.processes
            .lock()
            .unwrap()
            .push((spec.key.clone(), pid, alive.clone()));

        Ok(Some(Box::new(FakeProcess {
            pid,
            alive,
            listener: None,
            terminate_delay_ms: self.terminate_delay_ms.clone(),
        })))
    }
}

#[async_trait]
impl InstanceProcess for FakeProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn is_running(&mut self) -> bool {
        self.alive()
    }

    async fn terminate(&mut self, _grace: Duration) -> HostcoreResult<()> {
        let delay = self.terminate_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        self.alive.store(false, Ordering::SeqCst);
        self.listener = None;
        Ok(())
    }
}

#[async_trait]
impl InstanceAdmin for FakeAdmin {
    async fn load_config(&self, spec: &InstanceSpec, document: &str) -> HostcoreResult<()> {
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(HostcoreError::AdminApi {
                socket: spec.admin_socket.clone(),
                status: 400,
                body: "adapting config: bad document".to_string(),
            });
        }

        self.loads
            .lock()
            .unwrap()
            .push((spec.key.clone(), document.to_string()));
        Ok(())
    }

    async fn restart_workers(&self, spec: &InstanceSpec) -> HostcoreResult<()> {
        self.worker_restarts.lock().unwrap().push(spec.key.clone());
        Ok(())
    }

    async fn thread_count(&self, _spec: &InstanceSpec) -> HostcoreResult<u32> {
        Ok(4)
    }
}

#[async_trait]
impl ProxyReloader for RecordingReloader {
    async fn reload(&self, document: &str) -> HostcoreResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(HostcoreError::ProxyReload(
                "503 Service Unavailable: proxy is restarting".to_string(),
            ));
        }

        self.documents.lock().unwrap().push(document.to_string());
        Ok(())
    }
}
