//! Process memory probes for the watchdog.

use async_trait::async_trait;

/// Resident-set-size probe for a supervised pid. Errors are treated as a
/// skipped sample by the watchdog, never as a restart trigger.
#[async_trait]
pub trait ProcessMetrics: Send + Sync {
    async fn rss_bytes(&self, pid: u32) -> anyhow::Result<u64>;
}

/// `ps -o rss= -p <pid>` probe. RSS is reported in kilobytes.
pub struct PsProcessMetrics;

#[async_trait]
impl ProcessMetrics for PsProcessMetrics {
    async fn rss_bytes(&self, pid: u32) -> anyhow::Result<u64> {
        let output = tokio::process::Command::new("ps")
            .args(["-o", "rss=", "-p", &pid.to_string()])
            .output()
            .await?;
        if !output.status.success() {
            anyhow::bail!("ps exited with {} for pid {pid}", output.status);
        }
        let kilobytes: u64 = String::from_utf8_lossy(&output.stdout).trim().parse()?;
        Ok(kilobytes * 1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[tokio::test]
    async fn probes_own_process() {
        let rss = PsProcessMetrics.rss_bytes(std::process::id()).await.unwrap();
        assert!(rss > 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unknown_pid_is_an_error() {
        // Pid 0 is never a supervised child.
        assert!(PsProcessMetrics.rss_bytes(0).await.is_err());
    }
}
