// src/engine/gate.rs
//! Compute gate: at most `G` concurrent inference calls, plus a thermal
//! guard that delays acquisition while the accelerator is hot. Temperature is
//! read after the slot is won, right before the call is submitted.

use async_trait::async_trait;
use metrics::gauge;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{AcquireError, Semaphore, SemaphorePermit};
use tracing::{info, warn};

use crate::config::{PipelineConfig, ThermalProbeKind};

/// Hardware-health indicator. `None` means "unknown", which never blocks.
#[async_trait]
pub trait ThermalProbe: Send + Sync {
    async fn temperature_c(&self) -> Option<f32>;
}

pub struct NoThermalProbe;

#[async_trait]
impl ThermalProbe for NoThermalProbe {
    async fn temperature_c(&self) -> Option<f32> {
        None
    }
}

/// Hottest GPU reported by `nvidia-smi`.
pub struct NvidiaSmiProbe;

#[async_trait]
impl ThermalProbe for NvidiaSmiProbe {
    async fn temperature_c(&self) -> Option<f32> {
        let out = tokio::time::timeout(
            Duration::from_secs(5),
            tokio::process::Command::new("nvidia-smi")
                .args(["--query-gpu=temperature.gpu", "--format=csv,noheader,nounits"])
                .output(),
        )
        .await
        .ok()?
        .ok()?;
        if !out.status.success() {
            return None;
        }
        parse_smi_temperatures(&String::from_utf8_lossy(&out.stdout))
    }
}

fn parse_smi_temperatures(s: &str) -> Option<f32> {
    s.lines()
        .filter_map(|l| l.trim().parse::<f32>().ok())
        .fold(None, |acc: Option<f32>, t| Some(acc.map_or(t, |a| a.max(t))))
}

pub fn build_probe(kind: ThermalProbeKind) -> Arc<dyn ThermalProbe> {
    match kind {
        ThermalProbeKind::None => Arc::new(NoThermalProbe),
        ThermalProbeKind::NvidiaSmi => Arc::new(NvidiaSmiProbe),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ThermalPolicy {
    /// Stop admitting calls at or above this temperature.
    pub limit: f32,
    /// Admit again once at or below this temperature.
    pub resume: f32,
    pub check_interval: Duration,
}

impl ThermalPolicy {
    pub fn from_config(cfg: &PipelineConfig) -> Self {
        Self {
            limit: cfg.gpu_temp_limit,
            resume: cfg.gpu_temp_resume,
            check_interval: cfg.gpu_temp_check_interval(),
        }
    }
}

pub struct ComputeGate {
    permits: Semaphore,
    capacity: usize,
    probe: Arc<dyn ThermalProbe>,
    policy: ThermalPolicy,
    thermal_waits: AtomicU64,
}

impl ComputeGate {
    pub fn new(capacity: usize, probe: Arc<dyn ThermalProbe>, policy: ThermalPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            permits: Semaphore::new(capacity),
            capacity,
            probe,
            policy,
            thermal_waits: AtomicU64::new(0),
        }
    }

    pub fn from_config(cfg: &PipelineConfig) -> Self {
        Self::new(
            cfg.gpu_concurrency,
            build_probe(cfg.thermal_probe),
            ThermalPolicy::from_config(cfg),
        )
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// How many acquisitions were delayed by heat.
    pub fn thermal_waits(&self) -> u64 {
        self.thermal_waits.load(Ordering::Relaxed)
    }

    /// Wait for a free slot, then for a cool accelerator. Drop the permit
    /// as soon as the inference call returns.
    pub async fn acquire(&self) -> Result<SemaphorePermit<'_>, AcquireError> {
        let permit = self.permits.acquire().await?;
        self.wait_until_cool().await;
        Ok(permit)
    }

    async fn wait_until_cool(&self) {
        let Some(t) = self.probe.temperature_c().await else {
            return;
        };
        if t < self.policy.limit {
            return;
        }
        self.thermal_waits.fetch_add(1, Ordering::Relaxed);
        gauge!("finnews_thermal_wait").set(1.0);
        warn!(
            target: "gate",
            temp_c = t, limit_c = self.policy.limit, resume_c = self.policy.resume,
            "accelerator hot; holding inference until it cools"
        );
        loop {
            tokio::time::sleep(self.policy.check_interval).await;
            match self.probe.temperature_c().await {
                Some(t) if t > self.policy.resume => continue,
                _ => break,
            }
        }
        gauge!("finnews_thermal_wait").set(0.0);
        info!(target: "gate", "accelerator cooled; resuming inference");
    }
}
