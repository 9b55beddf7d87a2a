use crate::error::{TrackerError, TrackerResult, UnknownSeries};
use thiserror::Error;
use crate::frame::{DeviceClass, NodeStatsFrame, StatObject, StatValue};
use crate::metrics::{instant_from_nanos, TimeSeriesPoint};
use crate::node::Node;
use crate::storage::RollingBuffer;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, trace};

pub const DEFAULT_BUFFER_SIZE: usize = 500;

pub const GPU_MEMORY_ATTRIBUTE: &str = "Memory state";
pub const GPU_UTILIZATION_ATTRIBUTE: &str = "GPU utilization";
pub const GPU_TEMPERATURE_ATTRIBUTE: &str = "Temperature";

const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

/// `numerator / denominator`, or 0 when either side is missing or zero.
///
/// NaN operands are not treated as missing.
pub fn ratio(numerator: Option<f64>, denominator: Option<f64>) -> f64 {
    match (numerator, denominator) {
        (Some(n), Some(d)) if n != 0.0 && d != 0.0 => n / d,
        _ => 0.0,
    }
}

/// Missing operands count as NaN.
fn unguarded(value: Option<f64>) -> f64 {
    value.unwrap_or(f64::NAN)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Series {
    Cpu,
    Memory,
    GpuMemory,
    GpuUtilization,
    GpuTemperature,
}

impl Series {
    pub const ALL: [Series; 5] = [
        Series::Cpu,
        Series::Memory,
        Series::GpuMemory,
        Series::GpuUtilization,
        Series::GpuTemperature,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Series::Cpu => "cpu",
            Series::Memory => "memory",
            Series::GpuMemory => "gpu_memory",
            Series::GpuUtilization => "gpu_utilization",
            Series::GpuTemperature => "gpu_temperature",
        }
    }
}

impl fmt::Display for Series {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Series {
    type Err = UnknownSeries;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Series::ALL
            .into_iter()
            .find(|series| series.as_str() == s)
            .ok_or_else(|| UnknownSeries(s.to_string()))
    }
}

/// Points produced by one GPU device within a frame.
///
/// `utilization` and `temperature` are only `None` in a partial outcome.
#[derive(Clone, Debug, Serialize)]
pub struct GpuReading {
    pub device_id: String,
    pub memory: TimeSeriesPoint,
    pub utilization: Option<TimeSeriesPoint>,
    pub temperature: Option<TimeSeriesPoint>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoStats,
    NotGpu,
    NoInstances,
}

#[derive(Clone, Debug, Serialize)]
pub struct SkippedDevice {
    pub device_id: Option<String>,
    pub reason: SkipReason,
}

/// Everything a single `append` pushed.
#[derive(Clone, Debug, Serialize)]
pub struct AppendOutcome {
    pub timestamp: DateTime<Utc>,
    pub cpu: TimeSeriesPoint,
    pub memory: TimeSeriesPoint,
    pub gpu: Vec<GpuReading>,
    pub skipped: Vec<SkippedDevice>,
}

/// A frame that faulted part-way through; `partial` holds what was pushed.
#[derive(Debug, Error)]
#[error("stats frame applied partially: {source}")]
pub struct PartialAppend {
    pub partial: AppendOutcome,
    #[source]
    pub source: TrackerError,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Reserved {
    pub cpu: Option<f64>,
    pub memory: Option<f64>,
    pub gpu_memory: Option<f64>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
    pub since_ms: Option<i64>,
    pub until_ms: Option<i64>,
}

impl HistoryQuery {
    pub fn apply(&self, buffer: &RollingBuffer<TimeSeriesPoint>) -> Vec<TimeSeriesPoint> {
        let points: Vec<TimeSeriesPoint> = buffer
            .iter()
            .filter(|p| self.since_ms.map(|ts| p.timestamp_ms() >= ts).unwrap_or(true))
            .filter(|p| self.until_ms.map(|ts| p.timestamp_ms() <= ts).unwrap_or(true))
            .cloned()
            .collect();

        match self.limit {
            Some(limit) => {
                let len = points.len();
                let take = limit.min(len);
                points.into_iter().skip(len - take).collect()
            }
            None => points,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct SeriesSnapshot {
    pub node_id: String,
    pub buffer_size: usize,
    pub reserved: Reserved,
    pub cpu: Vec<TimeSeriesPoint>,
    pub memory: Vec<TimeSeriesPoint>,
    pub gpu_memory: Vec<TimeSeriesPoint>,
    pub gpu_utilization: Vec<TimeSeriesPoint>,
    pub gpu_temperature: Vec<TimeSeriesPoint>,
}

#[derive(Clone, Debug, Serialize)]
pub struct LatestPoints {
    pub cpu: Option<TimeSeriesPoint>,
    pub memory: Option<TimeSeriesPoint>,
    pub gpu_memory: Option<TimeSeriesPoint>,
    pub gpu_utilization: Option<TimeSeriesPoint>,
    pub gpu_temperature: Option<TimeSeriesPoint>,
}

/// Rolling resource-usage history of one node.
#[derive(Clone, Debug)]
pub struct NodeStatsTracker {
    node: Node,
    buffer_size: usize,
    reserved_gpu_memory: Option<f64>,
    cpu: RollingBuffer<TimeSeriesPoint>,
    memory: RollingBuffer<TimeSeriesPoint>,
    gpu_memory: RollingBuffer<TimeSeriesPoint>,
    gpu_utilization: RollingBuffer<TimeSeriesPoint>,
    gpu_temperature: RollingBuffer<TimeSeriesPoint>,
}

impl NodeStatsTracker {
    /// A `buffer_size` of zero is raised to one.
    pub fn new(node: Node, buffer_size: usize) -> Self {
        let buffer_size = buffer_size.max(1);
        let reserved_gpu_memory = node.resources.gpu_memory;
        Self {
            node,
            buffer_size,
            reserved_gpu_memory,
            cpu: RollingBuffer::new(buffer_size),
            memory: RollingBuffer::new(buffer_size),
            gpu_memory: RollingBuffer::new(buffer_size),
            gpu_utilization: RollingBuffer::new(buffer_size),
            gpu_temperature: RollingBuffer::new(buffer_size),
        }
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn url(&self) -> String {
        self.node.stats_url()
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Rebuilds all series empty when the size actually changes.
    pub fn set_buffer_size(&mut self, buffer_size: usize) {
        let buffer_size = buffer_size.max(1);
        if buffer_size == self.buffer_size {
            return;
        }
        debug!(
            node_id = %self.node.id,
            from = self.buffer_size,
            to = buffer_size,
            "Resizing stats buffers"
        );
        self.buffer_size = buffer_size;
        for series in Series::ALL {
            *self.series_mut(series) = RollingBuffer::new(buffer_size);
        }
    }

    pub fn reserved_cpu(&self) -> Option<f64> {
        self.node.resources.cpu
    }

    pub fn reserved_memory(&self) -> Option<f64> {
        self.node.resources.memory
    }

    /// Last denominator reported by a GPU, or the node's configured value.
    pub fn reserved_gpu_memory(&self) -> Option<f64> {
        self.reserved_gpu_memory
    }

    pub fn reserved(&self) -> Reserved {
        Reserved {
            cpu: self.reserved_cpu(),
            memory: self.reserved_memory(),
            gpu_memory: self.reserved_gpu_memory(),
        }
    }

    pub fn cpu(&self) -> &RollingBuffer<TimeSeriesPoint> {
        &self.cpu
    }

    pub fn memory(&self) -> &RollingBuffer<TimeSeriesPoint> {
        &self.memory
    }

    pub fn gpu_memory(&self) -> &RollingBuffer<TimeSeriesPoint> {
        &self.gpu_memory
    }

    pub fn gpu_utilization(&self) -> &RollingBuffer<TimeSeriesPoint> {
        &self.gpu_utilization
    }

    pub fn gpu_temperature(&self) -> &RollingBuffer<TimeSeriesPoint> {
        &self.gpu_temperature
    }

    pub fn series(&self, series: Series) -> &RollingBuffer<TimeSeriesPoint> {
        match series {
            Series::Cpu => &self.cpu,
            Series::Memory => &self.memory,
            Series::GpuMemory => &self.gpu_memory,
            Series::GpuUtilization => &self.gpu_utilization,
            Series::GpuTemperature => &self.gpu_temperature,
        }
    }

    fn series_mut(&mut self, series: Series) -> &mut RollingBuffer<TimeSeriesPoint> {
        match series {
            Series::Cpu => &mut self.cpu,
            Series::Memory => &mut self.memory,
            Series::GpuMemory => &mut self.gpu_memory,
            Series::GpuUtilization => &mut self.gpu_utilization,
            Series::GpuTemperature => &mut self.gpu_temperature,
        }
    }

    pub fn snapshot(&self, query: &HistoryQuery) -> SeriesSnapshot {
        SeriesSnapshot {
            node_id: self.node.id.clone(),
            buffer_size: self.buffer_size,
            reserved: self.reserved(),
            cpu: query.apply(&self.cpu),
            memory: query.apply(&self.memory),
            gpu_memory: query.apply(&self.gpu_memory),
            gpu_utilization: query.apply(&self.gpu_utilization),
            gpu_temperature: query.apply(&self.gpu_temperature),
        }
    }

    pub fn latest(&self) -> LatestPoints {
        LatestPoints {
            cpu: self.cpu.latest().cloned(),
            memory: self.memory.latest().cloned(),
            gpu_memory: self.gpu_memory.latest().cloned(),
            gpu_utilization: self.gpu_utilization.latest().cloned(),
            gpu_temperature: self.gpu_temperature.latest().cloned(),
        }
    }

    /// Decodes one frame into the series.
    ///
    /// CPU and memory always gain one point. Each GPU device carrying stats
    /// adds one point to every GPU series. A GPU device missing one of the
    /// expected attributes aborts the call; points pushed before that stay
    /// and come back in [`PartialAppend::partial`].
    pub fn append(&mut self, frame: &NodeStatsFrame) -> Result<AppendOutcome, PartialAppend> {
        let timestamp = instant_from_nanos(frame.timestamp);
        trace!(node_id = %self.node.id, ?frame, "Received stats frame");

        let cpu_used = frame
            .cpu_ticks_consumed
            .map(f64::floor)
            .filter(|ticks| !ticks.is_nan())
            .unwrap_or(0.0);
        let cpu = TimeSeriesPoint::new(
            timestamp,
            Some(cpu_used),
            Some(ratio(Some(cpu_used), self.reserved_cpu())),
        );
        self.cpu.push(cpu.clone());

        let memory_used = frame.memory.used.map(|bytes| bytes as f64);
        let memory = TimeSeriesPoint::new(
            timestamp,
            memory_used,
            Some(ratio(
                memory_used.map(|bytes| bytes / BYTES_PER_MIB),
                self.reserved_memory(),
            )),
        );
        self.memory.push(memory.clone());

        let mut outcome = AppendOutcome {
            timestamp,
            cpu,
            memory,
            gpu: Vec::new(),
            skipped: Vec::new(),
        };

        for device in &frame.device_stats {
            let (device_id, reason) = match device.classify() {
                DeviceClass::Gpu { id, stats } => {
                    let mut reading = match self.append_gpu_memory(id, stats, timestamp) {
                        Ok(reading) => reading,
                        Err(source) => {
                            return Err(PartialAppend {
                                partial: outcome,
                                source,
                            })
                        }
                    };
                    let load = self.append_gpu_load(&mut reading, stats, timestamp);
                    outcome.gpu.push(reading);
                    if let Err(source) = load {
                        return Err(PartialAppend {
                            partial: outcome,
                            source,
                        });
                    }
                    continue;
                }
                DeviceClass::GpuWithoutStats { id } => {
                    debug!(
                        node_id = %self.node.id,
                        device_id = id,
                        vendor = device.vendor.as_deref(),
                        name = device.name.as_deref(),
                        "No stats found for GPU"
                    );
                    (Some(id.to_string()), SkipReason::NoStats)
                }
                DeviceClass::Other { id } => (Some(id.to_string()), SkipReason::NotGpu),
                DeviceClass::NoInstances => (None, SkipReason::NoInstances),
            };
            outcome.skipped.push(SkippedDevice { device_id, reason });
        }

        debug!(
            node_id = %self.node.id,
            timestamp_ms = timestamp.timestamp_millis(),
            cpu_used,
            memory_used,
            gpus = outcome.gpu.len(),
            skipped = outcome.skipped.len(),
            "Applied stats frame"
        );
        Ok(outcome)
    }

    fn append_gpu_memory(
        &mut self,
        device_id: &str,
        stats: &StatObject,
        timestamp: DateTime<Utc>,
    ) -> TrackerResult<GpuReading> {
        let memory_state = require(stats, device_id, GPU_MEMORY_ATTRIBUTE)?;
        let used = memory_state.numerator();
        let capacity = memory_state.denominator();
        let memory = TimeSeriesPoint::new(
            timestamp,
            used,
            Some(unguarded(used) / unguarded(capacity)),
        );
        self.gpu_memory.push(memory.clone());
        self.reserved_gpu_memory = capacity;

        Ok(GpuReading {
            device_id: device_id.to_string(),
            memory,
            utilization: None,
            temperature: None,
        })
    }

    // `reading` gains each point as soon as it is pushed.
    fn append_gpu_load(
        &mut self,
        reading: &mut GpuReading,
        stats: &StatObject,
        timestamp: DateTime<Utc>,
    ) -> TrackerResult<()> {
        let utilization = require(stats, &reading.device_id, GPU_UTILIZATION_ATTRIBUTE)?;
        let utilization = TimeSeriesPoint::new(
            timestamp,
            None,
            Some(unguarded(utilization.numerator()) / 100.0),
        );
        self.gpu_utilization.push(utilization.clone());
        reading.utilization = Some(utilization);

        let temperature = require(stats, &reading.device_id, GPU_TEMPERATURE_ATTRIBUTE)?;
        let temperature = TimeSeriesPoint::new(
            timestamp,
            None,
            Some(unguarded(temperature.numerator()) / 100.0),
        );
        self.gpu_temperature.push(temperature.clone());
        reading.temperature = Some(temperature);

        Ok(())
    }

    /// Marks a polling gap on the cpu and memory series.
    pub fn pause(&mut self) -> TimeSeriesPoint {
        self.pause_at(Utc::now())
    }

    pub fn pause_at(&mut self, timestamp: DateTime<Utc>) -> TimeSeriesPoint {
        let marker = TimeSeriesPoint::gap(timestamp);
        self.memory.push(marker.clone());
        self.cpu.push(marker.clone());
        debug!(node_id = %self.node.id, "Inserted pause marker");
        marker
    }
}

fn require<'a>(
    stats: &'a StatObject,
    device_id: &str,
    attribute: &'static str,
) -> TrackerResult<&'a StatValue> {
    stats
        .attribute(attribute)
        .ok_or_else(|| TrackerError::MissingAttribute {
            device: device_id.to_string(),
            attribute,
        })
}

/// Shared access to a tracker for the poller and the read API.
#[derive(Clone)]
pub struct TrackerHandle {
    inner: Arc<RwLock<NodeStatsTracker>>,
}

impl TrackerHandle {
    pub fn new(tracker: NodeStatsTracker) -> Self {
        Self {
            inner: Arc::new(RwLock::new(tracker)),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, NodeStatsTracker> {
        match self.inner.read() {
            Ok(g) => g,
            // Continue with the inner value even if poisoned.
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, NodeStatsTracker> {
        match self.inner.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
