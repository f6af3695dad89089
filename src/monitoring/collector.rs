//! C7 MetricsCollector. Generalizes the teacher's CPU-snapshot/meminfo/df
//! parsing (`monitoring/collector.rs`'s original `STATS_COMMAND`/
//! `CPU_COMMAND` pair) to the exact command set named by the control
//! plane's component design, and wraps it with a TTL cache keyed by hostId
//! using the same `HashMap` + timestamp idiom the teacher used for its
//! monitoring task table.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::credential_resolver::{AuthMode, CredentialResolver, ResolveError, ResolveVariant};
use crate::error::{ControlPlaneError, ErrorKind};
use crate::queue::RequestQueue;
use crate::ssh::client::AuthParams;
use crate::ssh::pool::{PoolError, PoolTarget, SshPool};

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error("metrics collection exceeded its overall timeout")]
    Timeout,
}

impl From<MetricsError> for ControlPlaneError {
    fn from(e: MetricsError) -> Self {
        let kind = match &e {
            MetricsError::Resolve(_) => ErrorKind::CredentialResolution,
            MetricsError::Pool(_) => ErrorKind::NetworkTransient,
            MetricsError::Timeout => ErrorKind::Timeout,
        };
        ControlPlaneError::new(kind, e.to_string())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Liveness {
    Online,
    Offline,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CpuMetrics {
    pub percent: Option<u8>,
    pub load_avg_1m: Option<f64>,
    pub cores: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryMetrics {
    pub total_gib: Option<f64>,
    pub used_gib: Option<f64>,
    pub percent: Option<u8>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiskMetrics {
    pub percent: Option<u8>,
    pub human_size: Option<String>,
    pub human_used: Option<String>,
    pub human_avail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub host_id: String,
    pub cpu: CpuMetrics,
    pub memory: MemoryMetrics,
    pub disk: DiskMetrics,
    pub collected_at_ms: i64,
}

struct CacheEntry {
    snapshot: MetricsSnapshot,
    cached_at: Instant,
}

pub struct MetricsCollector {
    resolver: Arc<CredentialResolver>,
    pool: Arc<SshPool>,
    queue: Arc<RequestQueue>,
    cache: Mutex<HashMap<String, CacheEntry>>,
    cache_ttl: Duration,
    liveness_timeout: Duration,
    collect_timeout: Duration,
}

impl MetricsCollector {
    pub fn new(
        resolver: Arc<CredentialResolver>,
        pool: Arc<SshPool>,
        queue: Arc<RequestQueue>,
        cache_ttl: Duration,
        liveness_timeout: Duration,
        collect_timeout: Duration,
    ) -> Self {
        Self {
            resolver,
            pool,
            queue,
            cache: Mutex::new(HashMap::new()),
            cache_ttl,
            liveness_timeout,
            collect_timeout,
        }
    }

    /// Open a raw TCP socket to `ip:port`; success means online, any
    /// connect error or timeout means offline. No SSH handshake performed.
    pub async fn probe_liveness(&self, ip: &str, port: u16) -> Liveness {
        match tokio::time::timeout(self.liveness_timeout, TcpStream::connect((ip, port))).await {
            Ok(Ok(_)) => Liveness::Online,
            _ => Liveness::Offline,
        }
    }

    /// Cache hit (TTL) returns the cached snapshot byte-identically; a
    /// miss enqueues through the per-host [`RequestQueue`] so no two
    /// collections run against the same host concurrently, then runs the
    /// `/proc` + `df` command set over a pooled client.
    pub async fn collect(&self, user_id: &str, host_id: &str) -> Result<MetricsSnapshot, MetricsError> {
        if let Some(entry) = self.cache.lock().await.get(host_id) {
            if entry.cached_at.elapsed() < self.cache_ttl {
                return Ok(entry.snapshot.clone());
            }
        }

        let config = self.resolver.resolve(user_id, host_id, ResolveVariant::Normal).await?;
        let target = PoolTarget {
            ip: config.host.clone(),
            port: config.port,
            username: config.username.clone(),
            auth: AuthParams::from(config.auth.clone()),
        };
        let pool = self.pool.clone();
        let host_id_owned = host_id.to_string();
        let collect_timeout = self.collect_timeout;

        let queue = self.queue.clone();
        let result = queue
            .enqueue(host_id, async move {
                tokio::time::timeout(collect_timeout, collect_from_pooled(pool, target, host_id_owned)).await
            })
            .await
            .map_err(|_| MetricsError::Timeout)??;

        self.cache
            .lock()
            .await
            .insert(host_id.to_string(), CacheEntry { snapshot: result.clone(), cached_at: Instant::now() });

        Ok(result)
    }
}

async fn collect_from_pooled(
    pool: Arc<SshPool>,
    target: PoolTarget,
    host_id: String,
) -> Result<MetricsSnapshot, MetricsError> {
    let pooled = pool.acquire(&target).await?;
    let client = pooled.client.clone();

    let sample_a = client.exec("cat /proc/stat | head -1").await.ok();
    let loadavg = client.exec("cat /proc/loadavg").await.ok();
    let nproc = client.exec("nproc 2>/dev/null || grep -c ^processor /proc/cpuinfo").await.ok();
    let meminfo = client.exec("cat /proc/meminfo").await.ok();
    let df_human = client.exec("df -h -P /").await.ok();
    let df_bytes = client.exec("df -B1 -P /").await.ok();

    tokio::time::sleep(Duration::from_millis(500)).await;
    let sample_b = client.exec("cat /proc/stat | head -1").await.ok();

    pool.release(pooled).await;

    let cpu_percent = match (&sample_a, &sample_b) {
        (Some(a), Some(b)) => parse_cpu_delta(&a.stdout_string(), &b.stdout_string()),
        _ => None,
    };
    let load_avg_1m = loadavg.as_ref().and_then(|o| parse_loadavg(&o.stdout_string()));
    let cores = nproc.as_ref().and_then(|o| o.stdout_string().trim().parse::<u32>().ok());

    let (mem_total, mem_used, mem_percent) =
        meminfo.as_ref().map(|o| parse_meminfo(&o.stdout_string())).unwrap_or((None, None, None));

    let (disk_percent, human_size, human_used, human_avail) = parse_disk(
        df_human.as_ref().map(|o| o.stdout_string()).as_deref(),
        df_bytes.as_ref().map(|o| o.stdout_string()).as_deref(),
    );

    Ok(MetricsSnapshot {
        host_id,
        cpu: CpuMetrics { percent: cpu_percent, load_avg_1m, cores },
        memory: MemoryMetrics { total_gib: mem_total, used_gib: mem_used, percent: mem_percent },
        disk: DiskMetrics { percent: disk_percent, human_size, human_used, human_avail },
        collected_at_ms: now_ms(),
    })
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Parses `cpu  user nice system idle iowait irq softirq steal ...` and
/// clamps the result to `[0, 100]`, rounded to an integer.
fn parse_cpu_fields(line: &str) -> Option<[u64; 8]> {
    let mut fields = [0u64; 8];
    let mut parts = line.trim().split_whitespace();
    if parts.next()? != "cpu" {
        return None;
    }
    for slot in fields.iter_mut() {
        *slot = parts.next()?.parse().ok()?;
    }
    Some(fields)
}

fn parse_cpu_delta(sample_a: &str, sample_b: &str) -> Option<u8> {
    let a = parse_cpu_fields(sample_a)?;
    let b = parse_cpu_fields(sample_b)?;
    let total_a: u64 = a.iter().sum();
    let total_b: u64 = b.iter().sum();
    let idle_a = a[3] + a[4];
    let idle_b = b[3] + b[4];

    let total_delta = total_b.saturating_sub(total_a);
    let idle_delta = idle_b.saturating_sub(idle_a);
    if total_delta == 0 {
        return None;
    }
    let busy_delta = total_delta.saturating_sub(idle_delta);
    let percent = (busy_delta as f64 / total_delta as f64) * 100.0;
    Some(percent.clamp(0.0, 100.0).round() as u8)
}

fn parse_loadavg(text: &str) -> Option<f64> {
    text.trim().split_whitespace().next()?.parse().ok()
}

fn parse_meminfo(text: &str) -> (Option<f64>, Option<f64>, Option<u8>) {
    let mut total_kib = None;
    let mut available_kib = None;
    for line in text.lines() {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("MemTotal:") => total_kib = parts.next().and_then(|v| v.parse::<f64>().ok()),
            Some("MemAvailable:") => available_kib = parts.next().and_then(|v| v.parse::<f64>().ok()),
            _ => {}
        }
    }
    match (total_kib, available_kib) {
        (Some(total), Some(available)) => {
            let used = (total - available).max(0.0);
            let percent = if total > 0.0 { ((used / total) * 100.0).clamp(0.0, 100.0).round() as u8 } else { 0 };
            let to_gib = |kib: f64| (kib / (1024.0 * 1024.0) * 100.0).round() / 100.0;
            (Some(to_gib(total)), Some(to_gib(used)), Some(percent))
        }
        _ => (None, None, None),
    }
}

/// `df -h` gives the human-readable strings; `df -B1` gives raw bytes for
/// an exact percentage instead of `df`'s own rounded `Use%` column.
fn parse_disk(human: Option<&str>, bytes: Option<&str>) -> (Option<u8>, Option<String>, Option<String>, Option<String>) {
    let human_row = human.and_then(df_data_row);
    let (human_size, human_used, human_avail) = match &human_row {
        Some(cols) if cols.len() >= 4 => (Some(cols[1].to_string()), Some(cols[2].to_string()), Some(cols[3].to_string())),
        _ => (None, None, None),
    };

    let percent = bytes
        .and_then(df_data_row)
        .and_then(|cols| {
            if cols.len() < 3 {
                return None;
            }
            let total: f64 = cols[1].parse().ok()?;
            let used: f64 = cols[2].parse().ok()?;
            if total <= 0.0 {
                return None;
            }
            Some(((used / total) * 100.0).clamp(0.0, 100.0).round() as u8)
        });

    (percent, human_size, human_used, human_avail)
}

fn df_data_row(text: &str) -> Option<Vec<String>> {
    text.lines().nth(1).map(|line| line.split_whitespace().map(str::to_string).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cpu_delta_computes_busy_percentage() {
        let a = "cpu  100 0 100 800 0 0 0 0";
        let b = "cpu  150 0 150 850 0 0 0 0";
        // total_a=1000 total_b=1150 delta=150; idle_a=800 idle_b=850 delta=50
        // busy=100/150 = 66.67% -> rounds to 67
        assert_eq!(parse_cpu_delta(a, b), Some(67));
    }

    #[test]
    fn test_parse_cpu_delta_clamps_and_handles_zero_delta() {
        assert_eq!(parse_cpu_delta("cpu  1 1 1 1 1 1 1 1", "cpu  1 1 1 1 1 1 1 1"), None);
    }

    #[test]
    fn test_parse_meminfo_percent() {
        let text = "MemTotal:       16000000 kB\nMemAvailable:    4000000 kB\n";
        let (total, used, percent) = parse_meminfo(text);
        assert!(total.unwrap() > 15.0);
        assert!(used.unwrap() > 11.0);
        assert_eq!(percent, Some(75));
    }

    #[test]
    fn test_parse_disk_combines_human_and_raw() {
        let human = "Filesystem      Size  Used Avail Use% Mounted on\n/dev/sda1        50G   25G   25G  50% /\n";
        let bytes = "Filesystem      1B-blocks        Used   Available Use% Mounted on\n/dev/sda1      53687091200 26843545600 26843545600  50% /\n";
        let (percent, size, used, avail) = parse_disk(Some(human), Some(bytes));
        assert_eq!(percent, Some(50));
        assert_eq!(size.as_deref(), Some("50G"));
        assert_eq!(used.as_deref(), Some("25G"));
        assert_eq!(avail.as_deref(), Some("25G"));
    }

    #[test]
    fn test_parse_loadavg_takes_first_field() {
        assert_eq!(parse_loadavg("0.52 0.58 0.59 2/933 12345"), Some(0.52));
    }
}
