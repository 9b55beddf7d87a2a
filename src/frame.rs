//! Schema of the raw per-node stats frame.
//!
//! Only the fields the tracker reads are modelled; everything else in the
//! payload is ignored.

use crate::error::FrameError;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct NodeStatsFrame {
    /// Nanoseconds since the Unix epoch.
    pub timestamp: u64,
    #[serde(rename = "CPUTicksConsumed")]
    pub cpu_ticks_consumed: Option<f64>,
    pub memory: HostMemoryStats,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub device_stats: Vec<DeviceGroupStats>,
}

impl NodeStatsFrame {
    pub fn from_json(input: &str) -> Result<Self, FrameError> {
        Ok(serde_json::from_str(input)?)
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct HostMemoryStats {
    /// Bytes.
    pub used: Option<u64>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceGroupStats {
    pub vendor: Option<String>,
    pub name: Option<String>,
    pub instance_stats: InstanceStats,
}

/// Per-instance stats keyed by instance id, in payload order.
#[derive(Clone, Debug, Default)]
pub struct InstanceStats(Vec<(String, DeviceInstanceStats)>);

impl InstanceStats {
    pub fn new(entries: Vec<(String, DeviceInstanceStats)>) -> Self {
        Self(entries)
    }

    pub fn first(&self) -> Option<(&str, &DeviceInstanceStats)> {
        self.0.first().map(|(id, stats)| (id.as_str(), stats))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de> Deserialize<'de> for InstanceStats {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedVisitor;

        impl<'de> Visitor<'de> for OrderedVisitor {
            type Value = InstanceStats;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of instance id to device stats")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((id, stats)) = map.next_entry::<String, DeviceInstanceStats>()? {
                    entries.push((id, stats));
                }
                Ok(InstanceStats(entries))
            }
        }

        deserializer.deserialize_map(OrderedVisitor)
    }
}

impl Serialize for InstanceStats {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (id, stats) in &self.0 {
            map.serialize_entry(id, stats)?;
        }
        map.end()
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceInstanceStats {
    pub stats: Option<StatObject>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StatObject {
    #[serde(default)]
    pub attributes: HashMap<String, StatValue>,
}

impl StatObject {
    pub fn attribute(&self, name: &str) -> Option<&StatValue> {
        self.attributes.get(name)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StatValue {
    pub int_numerator_val: Option<i64>,
    pub int_denominator_val: Option<i64>,
}

impl StatValue {
    pub fn numerator(&self) -> Option<f64> {
        self.int_numerator_val.map(|v| v as f64)
    }

    pub fn denominator(&self) -> Option<f64> {
        self.int_denominator_val.map(|v| v as f64)
    }
}

/// How a device entry contributes to the GPU series.
#[derive(Clone, Copy, Debug)]
pub enum DeviceClass<'a> {
    Gpu { id: &'a str, stats: &'a StatObject },
    GpuWithoutStats { id: &'a str },
    Other { id: &'a str },
    NoInstances,
}

impl DeviceGroupStats {
    /// Classifies the device by its first instance id.
    pub fn classify(&self) -> DeviceClass<'_> {
        let Some((id, instance)) = self.instance_stats.first() else {
            return DeviceClass::NoInstances;
        };
        if !id.to_lowercase().contains("gpu") {
            return DeviceClass::Other { id };
        }
        match &instance.stats {
            Some(stats) => DeviceClass::Gpu { id, stats },
            None => DeviceClass::GpuWithoutStats { id },
        }
    }
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_stats_frame() {
        let frame = NodeStatsFrame::from_json(
            r#"{
                "Timestamp": 1700000000000000000,
                "CPUTicksConsumed": 1234.7,
                "Memory": {"Used": 2097152, "Total": 8388608},
                "Uptime": 42,
                "DeviceStats": [{
                    "Vendor": "nvidia",
                    "Type": "gpu",
                    "Name": "T4",
                    "InstanceStats": {
                        "GPU-1234": {
                            "Summary": {"Unit": "MiB"},
                            "Stats": {"Attributes": {
                                "Memory state": {"IntNumeratorVal": 512, "IntDenominatorVal": 1024, "Unit": "MiB"}
                            }}
                        }
                    }
                }]
            }"#,
        )
        .unwrap();
        assert_eq!(frame.timestamp, 1_700_000_000_000_000_000);
        assert_eq!(frame.cpu_ticks_consumed, Some(1234.7));
        assert_eq!(frame.memory.used, Some(2_097_152));
        assert_eq!(frame.device_stats.len(), 1);
        let Some((id, instance)) = frame.device_stats[0].instance_stats.first() else {
            panic!("expected an instance");
        };
        assert_eq!(id, "GPU-1234");
        let value = instance.stats.as_ref().unwrap().attribute("Memory state").unwrap();
        assert_eq!(value.numerator(), Some(512.0));
        assert_eq!(value.denominator(), Some(1024.0));
    }

    #[test]
    fn null_device_stats_is_empty() {
        let frame =
            NodeStatsFrame::from_json(r#"{"Timestamp": 1, "Memory": {}, "DeviceStats": null}"#)
                .unwrap();
        assert!(frame.device_stats.is_empty());
        assert_eq!(frame.cpu_ticks_consumed, None);
        assert_eq!(frame.memory.used, None);
    }

    #[test]
    fn missing_memory_is_rejected() {
        let err = NodeStatsFrame::from_json(r#"{"Timestamp": 1, "DeviceStats": []}"#).unwrap_err();
        assert!(err.to_string().contains("Memory"));
    }

    #[test]
    fn instance_order_is_preserved() {
        let device: DeviceGroupStats = serde_json::from_str(
            r#"{"InstanceStats": {"nic0": {"Stats": null}, "gpu0": {"Stats": null}}}"#,
        )
        .unwrap();
        assert_eq!(device.instance_stats.len(), 2);
        assert!(matches!(device.classify(), DeviceClass::Other { id: "nic0" }));
    }

    #[test]
    fn classifies_devices() {
        let parse = |json: &str| -> DeviceGroupStats { serde_json::from_str(json).unwrap() };

        let gpu = parse(r#"{"InstanceStats": {"GPU-abc": {"Stats": {"Attributes": {}}}}}"#);
        assert!(matches!(gpu.classify(), DeviceClass::Gpu { id: "GPU-abc", .. }));

        let no_stats = parse(r#"{"InstanceStats": {"gpu0": {"Stats": null}}}"#);
        assert!(matches!(no_stats.classify(), DeviceClass::GpuWithoutStats { id: "gpu0" }));

        let fpga = parse(r#"{"InstanceStats": {"fpga0": {"Stats": {"Attributes": {}}}}}"#);
        assert!(matches!(fpga.classify(), DeviceClass::Other { id: "fpga0" }));

        let empty = parse(r#"{"InstanceStats": {}}"#);
        assert!(matches!(empty.classify(), DeviceClass::NoInstances));
    }
}
