//! Marker-file gate: `<resource>.mutex` created with exclusive-create semantics.

use super::Gate;
use crate::config::GateConfig;
use crate::error::{Error, Result};
use crate::model::{iso, now_ms};
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use std::ffi::OsString;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Advisory gate built on a sibling marker file.
///
/// Only processes that follow the same protocol are excluded; nothing is
/// enforced by the kernel.
#[derive(Debug, Clone)]
pub struct FileGate {
    config: GateConfig,
}

impl FileGate {
    pub fn new(config: GateConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Marker path guarding `resource`: the resource path with `.mutex` appended.
    pub fn marker_path(resource: &Path) -> PathBuf {
        let mut name = OsString::from(resource.as_os_str());
        name.push(".mutex");
        PathBuf::from(name)
    }

    async fn acquire(&self, resource: &Path) -> Result<MarkerGuard> {
        let marker = Self::marker_path(resource);
        if let Some(parent) = marker.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let started = Instant::now();
        loop {
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&marker)
                .await
            {
                Ok(mut file) => {
                    let guard = MarkerGuard {
                        path: marker.clone(),
                    };
                    let now = now_ms();
                    let holder = serde_json::json!({
                        "pid": std::process::id(),
                        "host": hostname::get().ok().and_then(|h| h.into_string().ok()),
                        "createdAtMs": now,
                        "createdAt": iso(now),
                    });
                    file.write_all(format!("{holder}\n").as_bytes()).await?;
                    file.flush().await?;
                    return Ok(guard);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e.into()),
            }

            match marker_age(&marker).await {
                Ok(age) if age > self.config.stale => {
                    match tokio::fs::remove_file(&marker).await {
                        Ok(()) => {
                            warn!(
                                marker = %marker.display(),
                                age_ms = duration_ms(age),
                                "took over stale state lock"
                            );
                            continue;
                        }
                        // Someone else cleared it between stat and unlink.
                        Err(e) if e.kind() == ErrorKind::NotFound => continue,
                        Err(e) => return Err(e.into()),
                    }
                }
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }

            let waited = started.elapsed();
            if waited > self.config.wait {
                return Err(Error::LockTimeout {
                    resource: resource.to_path_buf(),
                    marker,
                    waited,
                });
            }
            tokio::time::sleep(self.config.poll).await;
        }
    }
}

impl Gate for FileGate {
    async fn with_exclusive_access<T, F, Fut>(&self, resource: &Path, body: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let guard = match self.acquire(resource).await {
            Ok(guard) => guard,
            Err(e) => {
                metrics::gate_wait_ms().record(
                    started.elapsed().as_secs_f64() * 1000.0,
                    &[KeyValue::new("result", "timeout")],
                );
                return Err(e);
            }
        };
        metrics::gate_wait_ms().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new("result", "acquired")],
        );
        debug!(
            marker = %guard.path.display(),
            wait_ms = duration_ms(started.elapsed()),
            "state lock acquired"
        );

        let result = body().await;
        drop(guard);
        result
    }
}

/// Removes the marker when dropped, so release also happens on panic or
/// when the enclosing future is cancelled.
struct MarkerGuard {
    path: PathBuf,
}

impl Drop for MarkerGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!(marker = %self.path.display(), "failed to release state lock: {e}");
            }
        }
    }
}

async fn marker_age(marker: &Path) -> std::io::Result<Duration> {
    let modified = tokio::fs::metadata(marker).await?.modified()?;
    Ok(SystemTime::now()
        .duration_since(modified)
        .unwrap_or(Duration::ZERO))
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
