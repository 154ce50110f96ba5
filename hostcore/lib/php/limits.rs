use std::path::{Path, PathBuf};

use crate::{models::UserLimits, report::StepReport};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const CGROUP_PREFIX: &str = "hostcore-";
const CPU_PERIOD_USEC: u64 = 100_000;
const CONTROLLERS: &str = "+cpu +memory +pids";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Places instances in a per-user cgroup v2 group carrying the user's resource limits.
#[derive(Debug, Clone)]
pub struct CgroupLimiter {
    root: PathBuf,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl CgroupLimiter {
    /// Creates a limiter for the hierarchy mounted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The cgroup of `username`.
    pub fn group_path(&self, username: &str) -> PathBuf {
        self.root.join(format!("{CGROUP_PREFIX}{username}"))
    }

    /// Writes `limits` into the user's cgroup and moves `pid` into it.
    ///
    /// Does nothing for unlimited users. Each write is a separate best-effort step.
    pub async fn apply(&self, username: &str, limits: &UserLimits, pid: u32) -> StepReport {
        let mut report = StepReport::new(username);
        if limits.is_unlimited() {
            return report;
        }

        let group = self.group_path(username);
        let created = report.record(
            format!("mkdir {}", group.display()),
            tokio::fs::create_dir_all(&group).await,
        );
        if created.is_none() {
            return report;
        }

        self.write(
            &mut report,
            &self.root.join("cgroup.subtree_control"),
            CONTROLLERS.to_string(),
        )
        .await;

        let ram_mb = *limits.get_max_ram_mb();
        if ram_mb > 0 {
            let bytes = ram_mb.saturating_mul(1024 * 1024);
            self.write(&mut report, &group.join("memory.max"), bytes.to_string())
                .await;
        }

        let cpu_percent = u64::from(*limits.get_max_cpu_percent());
        if cpu_percent > 0 {
            let quota = cpu_percent * CPU_PERIOD_USEC / 100;
            self.write(
                &mut report,
                &group.join("cpu.max"),
                format!("{quota} {CPU_PERIOD_USEC}"),
            )
            .await;
        }

        let processes = *limits.get_max_processes();
        if processes > 0 {
            self.write(&mut report, &group.join("pids.max"), processes.to_string())
                .await;
        }

        self.write(&mut report, &group.join("cgroup.procs"), pid.to_string())
            .await;

        tracing::info!(
            username,
            ram_mb,
            cpu_percent,
            processes,
            pid,
            "applied resource limits"
        );
        report
    }

    async fn write(&self, report: &mut StepReport, path: &Path, value: String) {
        report.record(
            format!("write {value:?} to {}", path.display()),
            tokio::fs::write(path, value.as_bytes()).await,
        );
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
