//! One pass from declared state to host state: jails, then instances, then proxy routing.

use std::{
    collections::{BTreeMap, BTreeSet},
    path::PathBuf,
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{
    config::HostcoreConfig,
    jail::JailManager,
    models::DeclaredState,
    php::{InstanceKey, InstanceManager, ReconcileOutcome},
    proxy::{ConfigWriter, ProxyGenerator, ProxyReloader},
    report::StepReport,
    HostcoreResult,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const INSTANCE_DOCUMENT_EXTENSION: &str = "Caddyfile";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Runs reconciliation passes.
///
/// Reloads that fail are remembered and retried on the next pass even if the rendered document
/// did not change again.
pub struct Reconciler {
    config: HostcoreConfig,
    jail: Arc<JailManager>,
    instances: Arc<InstanceManager>,
    generator: ProxyGenerator,
    writer: ConfigWriter,
    reloader: Arc<dyn ProxyReloader>,
    pending: Mutex<PendingReloads>,
}

struct PendingReloads {
    proxy: bool,
    instances: BTreeSet<InstanceKey>,
}

/// What a reconciliation pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Jail group and sshd configuration.
    pub host: StepReport,

    /// One report per site owner.
    pub jail: Vec<StepReport>,

    /// Instance starts and stops.
    pub instances: ReconcileOutcome,

    /// Documents written or removed on this pass.
    pub changed_documents: Vec<PathBuf>,

    /// Running instances that were handed a new routing document.
    pub reloaded_instances: Vec<InstanceKey>,

    /// Whether the main proxy was reloaded.
    pub proxy_reloaded: bool,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Reconciler {
    /// Creates a reconciler over the given components.
    pub fn new(
        config: &HostcoreConfig,
        jail: Arc<JailManager>,
        instances: Arc<InstanceManager>,
        reloader: Arc<dyn ProxyReloader>,
    ) -> Self {
        Self {
            config: config.clone(),
            jail,
            instances,
            generator: ProxyGenerator::new(config),
            writer: ConfigWriter::new(),
            reloader,
            pending: Mutex::new(PendingReloads {
                proxy: true,
                instances: BTreeSet::new(),
            }),
        }
    }

    /// The instance manager this reconciler drives.
    pub fn instances(&self) -> &Arc<InstanceManager> {
        &self.instances
    }

    /// The jail manager this reconciler drives.
    pub fn jail(&self) -> &Arc<JailManager> {
        &self.jail
    }

    /// Brings the host in line with `state`.
    ///
    /// Jail and instance problems are collected in the report. A failed reload of an instance
    /// or of the main proxy is returned as an error once the rest of the pass has run.
    pub async fn reconcile(&self, state: &DeclaredState) -> HostcoreResult<ReconcileReport> {
        let mut report = ReconcileReport {
            host: StepReport::new("host"),
            ..ReconcileReport::default()
        };

        report
            .host
            .record("ensure jail group", self.jail.ensure_jail_group().await);
        report.host.record(
            "ensure sshd configuration",
            self.jail.ensure_sshd_configuration().await,
        );

        for user in state.site_owners() {
            match self.jail.ensure_user(user).await {
                Ok(user_report) => report.jail.push(user_report),
                Err(e) => {
                    let mut failed = StepReport::new(user.get_username());
                    failed.record("ensure jail", Err::<(), _>(e));
                    report.jail.push(failed);
                }
            }
        }

        let documents = self.write_instance_documents(state, &mut report).await?;
        report.instances = self.instances.reconcile(state).await?;

        let mut pending = self.pending.lock().await;
        let mut first_error = None;

        for key in &report.instances.running {
            if !pending.instances.contains(key) {
                continue;
            }
            let Some(document) = documents.get(key) else {
                continue;
            };

            match self.instances.reload_config(key, document).await {
                Ok(()) => {
                    pending.instances.remove(key);
                    report.reloaded_instances.push(key.clone());
                }
                Err(e) => {
                    tracing::error!(instance = %key, "instance reload failed: {e}");
                    first_error.get_or_insert(e);
                }
            }
        }

        // Started or stopped instances read their document at launch, or no longer exist.
        let running: BTreeSet<&InstanceKey> = report.instances.running.iter().collect();
        pending.instances.retain(|key| running.contains(key));

        let main = self.generator.render_main_routing(
            state.get_sites(),
            state.get_php_versions(),
            *self.config.get_http_port(),
            *self.config.get_https_port(),
        );
        let main_path = self.config.main_config_path();
        if self.writer.write(&main_path, &main).await? {
            report.changed_documents.push(main_path);
            pending.proxy = true;
        }

        if pending.proxy {
            match self.reloader.reload(&main).await {
                Ok(()) => {
                    pending.proxy = false;
                    report.proxy_reloaded = true;
                }
                Err(e) => {
                    tracing::error!("proxy reload failed, previous configuration stays live: {e}");
                    first_error.get_or_insert(e);
                }
            }
        }

        tracing::info!(
            changed = report.changed_documents.len(),
            started = report.instances.started.len(),
            stopped = report.instances.stopped.len(),
            proxy_reloaded = report.proxy_reloaded,
            "reconciliation pass finished"
        );

        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    /// Renders and writes the document of every required instance, and removes documents of
    /// instances no longer required.
    async fn write_instance_documents(
        &self,
        state: &DeclaredState,
        report: &mut ReconcileReport,
    ) -> HostcoreResult<BTreeMap<InstanceKey, String>> {
        let required = InstanceManager::required_instances(state);
        let mut documents = BTreeMap::new();

        for key in required.keys() {
            let version = state.enabled_version(&key.version)?;
            let document =
                self.generator
                    .render_instance_routing(key, version, state.get_sites());
            let path = self
                .config
                .instance_config_path(&key.username, &key.version);

            if self.writer.write(&path, &document).await? {
                report.changed_documents.push(path);
                self.pending.lock().await.instances.insert(key.clone());
            }

            documents.insert(key.clone(), document);
        }

        for path in self.stale_instance_documents(&documents).await {
            match self.writer.remove(&path).await {
                Ok(true) => report.changed_documents.push(path),
                Ok(false) => {}
                Err(e) => tracing::warn!(path = %path.display(), "cannot remove document: {e}"),
            }
        }

        Ok(documents)
    }

    /// Instance documents in the output directory that belong to no required instance.
    async fn stale_instance_documents(
        &self,
        required: &BTreeMap<InstanceKey, String>,
    ) -> Vec<PathBuf> {
        let mut stale = Vec::new();
        let output_dir = self.config.get_output_dir();

        let Ok(mut versions) = tokio::fs::read_dir(output_dir).await else {
            return stale;
        };

        while let Ok(Some(version_dir)) = versions.next_entry().await {
            let name = version_dir.file_name().to_string_lossy().into_owned();
            let Some(version) = name.strip_prefix("php-") else {
                continue;
            };

            let Ok(mut files) = tokio::fs::read_dir(version_dir.path()).await else {
                continue;
            };

            while let Ok(Some(file)) = files.next_entry().await {
                let path = file.path();
                if path.extension().and_then(|e| e.to_str()) != Some(INSTANCE_DOCUMENT_EXTENSION) {
                    continue;
                }

                let Some(username) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };

                if !required.contains_key(&InstanceKey::new(username, version)) {
                    stale.push(path);
                }
            }
        }

        stale.sort();
        stale
    }
}
