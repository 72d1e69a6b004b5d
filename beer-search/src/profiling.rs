use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context, Error, Result};
use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, System};

/// The time between two CPU usage samples.
pub const SAMPLE_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CpuReport {
    pub started_at: String,
    pub duration_secs: f64,
    pub interval_ms: u64,

    /// Process CPU usage per sample, 100.0 being one full core.
    pub samples: Vec<f32>,
    pub mean: f32,
    pub peak: f32,
}

impl CpuReport {
    fn from_samples(started_at: String, duration: Duration, samples: Vec<f32>) -> Self {
        let peak = samples.iter().copied().fold(0.0f32, f32::max);
        let mean = if samples.is_empty() {
            0.0
        } else {
            samples.iter().sum::<f32>() / samples.len() as f32
        };

        Self {
            started_at,
            duration_secs: duration.as_secs_f64(),
            interval_ms: SAMPLE_INTERVAL.as_millis() as u64,
            samples,
            mean,
            peak,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryReport {
    pub taken_at: String,

    /// Resident memory of the process in bytes.
    pub resident: u64,

    /// Virtual memory of the process in bytes.
    pub virtual_memory: u64,
    pub system_total: u64,
    pub system_used: u64,
    pub system_available: u64,
}

fn current_pid() -> Result<Pid> {
    sysinfo::get_current_pid().map_err(Error::msg)
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let data = serde_json::to_vec_pretty(value)?;
    std::fs::write(path, data).with_context(|| format!("failed to write {}", path.display()))
}

/// Samples the CPU usage of this process on a background thread.
pub struct CpuProfiler {
    path: PathBuf,
    stop: Arc<AtomicBool>,
    handle: JoinHandle<CpuReport>,
}

impl CpuProfiler {
    pub fn start(path: PathBuf) -> Result<Self> {
        let pid = current_pid()?;
        let stop = Arc::new(AtomicBool::new(false));

        let handle = {
            let stop = stop.clone();
            std::thread::Builder::new()
                .name("cpu-profiler".to_string())
                .spawn(move || sample(pid, stop))?
        };

        Ok(Self { path, stop, handle })
    }

    /// Stops sampling and writes the report.
    pub fn stop(self) -> Result<CpuReport> {
        self.stop.store(true, Ordering::Relaxed);
        self.handle.thread().unpark();

        let report = self
            .handle
            .join()
            .map_err(|_| Error::msg("cpu profiler thread panicked"))?;
        write_json(&self.path, &report)?;

        Ok(report)
    }
}

fn sample(pid: Pid, stop: Arc<AtomicBool>) -> CpuReport {
    let started_at = now();
    let start = Instant::now();
    let mut system = System::new();
    let mut samples = vec![];

    // The first refresh only sets the baseline usage is measured from.
    system.refresh_process(pid);

    while !stop.load(Ordering::Relaxed) {
        std::thread::park_timeout(SAMPLE_INTERVAL);
        if stop.load(Ordering::Relaxed) {
            break;
        }

        if !system.refresh_process(pid) {
            warn!("profiled process {} is no longer visible", pid);
            break;
        }

        if let Some(process) = system.process(pid) {
            samples.push(process.cpu_usage());
        }
    }

    CpuReport::from_samples(started_at, start.elapsed(), samples)
}

/// Takes a snapshot of the process and system memory and writes it to `path`.
pub fn write_memory_profile(path: &Path) -> Result<MemoryReport> {
    let pid = current_pid()?;
    let mut system = System::new();
    system.refresh_memory();
    system.refresh_process(pid);

    let (resident, virtual_memory) = system
        .process(pid)
        .map(|p| (p.memory(), p.virtual_memory()))
        .unwrap_or_default();

    let report = MemoryReport {
        taken_at: now(),
        resident,
        virtual_memory,
        system_total: system.total_memory(),
        system_used: system.used_memory(),
        system_available: system.available_memory(),
    };
    write_json(path, &report)?;

    Ok(report)
}

/// The profiles requested at startup, each written at most once.
#[derive(Default)]
pub struct Profiles {
    cpu: Mutex<Option<CpuProfiler>>,
    memory: Mutex<Option<PathBuf>>,
}

impl Profiles {
    pub fn start(cpu: Option<PathBuf>, memory: Option<PathBuf>) -> Self {
        let cpu = cpu.and_then(|path| {
            let target = path.display().to_string();
            match CpuProfiler::start(path) {
                Ok(profiler) => {
                    info!("cpu profiling started, writing to {}", target);
                    Some(profiler)
                },
                Err(e) => {
                    error!("failed to start cpu profiler: {:?}", e);
                    None
                },
            }
        });

        Self {
            cpu: Mutex::new(cpu),
            memory: Mutex::new(memory),
        }
    }

    /// Writes any profile not yet written, failures are logged.
    pub fn finish(&self) {
        if let Some(profiler) = self.cpu.lock().take() {
            let path = profiler.path.display().to_string();
            match profiler.stop() {
                Ok(report) => info!(
                    "cpu profile written to {} ({} samples, mean {:.1}%, peak {:.1}%)",
                    path,
                    report.samples.len(),
                    report.mean,
                    report.peak,
                ),
                Err(e) => error!("failed to write cpu profile: {:?}", e),
            }
        }

        if let Some(path) = self.memory.lock().take() {
            match write_memory_profile(&path) {
                Ok(report) => info!(
                    "memory profile written to {} (resident {} bytes)",
                    path.display(),
                    report.resident,
                ),
                Err(e) => error!("failed to write memory profile: {:?}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_report_stats() {
        let report = CpuReport::from_samples(
            now(),
            Duration::from_secs(1),
            vec![10.0, 30.0, 20.0],
        );
        assert_eq!(report.peak, 30.0);
        assert!((report.mean - 20.0).abs() < f32::EPSILON);

        let empty = CpuReport::from_samples(now(), Duration::ZERO, vec![]);
        assert_eq!(empty.mean, 0.0);
        assert_eq!(empty.peak, 0.0);
    }

    #[test]
    fn test_profiles_written_once() -> Result<()> {
        let dir = TempDir::new()?;
        let cpu = dir.path().join("cpu.json");
        let mem = dir.path().join("mem.json");

        let profiles = Profiles::start(Some(cpu.clone()), Some(mem.clone()));
        std::thread::sleep(SAMPLE_INTERVAL * 2);
        profiles.finish();

        let report: CpuReport = serde_json::from_slice(&std::fs::read(&cpu)?)?;
        assert_eq!(report.interval_ms, 250);

        let memory: MemoryReport = serde_json::from_slice(&std::fs::read(&mem)?)?;
        assert!(memory.system_total > 0);

        std::fs::remove_file(&cpu)?;
        std::fs::remove_file(&mem)?;
        profiles.finish();
        assert!(!cpu.exists());
        assert!(!mem.exists());

        Ok(())
    }
}
