use crate::node::{Node, NodeResources};
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone, Debug, Parser)]
#[command(
    name = "node-stats",
    about = "Rolling resource-usage history for a single cluster node"
)]
pub struct Config {
    /// Identifier of the tracked node
    #[arg(long)]
    pub node_id: String,

    /// Newline-delimited JSON stats frames to replay
    #[arg(long)]
    pub frames: PathBuf,

    /// Polling interval in milliseconds
    #[arg(long, default_value_t = 1000, value_parser = clap::value_parser!(u64).range(1..))]
    pub interval_ms: u64,

    /// Points kept per series
    #[arg(long, default_value = "500")]
    pub buffer_size: NonZeroUsize,

    /// Reserved CPU, in the unit of the reported ticks
    #[arg(long)]
    pub reserved_cpu: Option<f64>,

    /// Reserved memory in MiB
    #[arg(long)]
    pub reserved_memory: Option<f64>,

    /// GPU memory capacity until a device reports its own
    #[arg(long)]
    pub reserved_gpu_memory: Option<f64>,

    /// Bind address for HTTP server
    #[arg(long, default_value = "127.0.0.1")]
    pub bind: IpAddr,

    /// HTTP server port
    #[arg(long, default_value_t = 8080)]
    pub port: u16,
}

impl Config {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::from((self.bind, self.port))
    }

    pub fn node(&self) -> Node {
        Node::new(
            self.node_id.clone(),
            NodeResources {
                cpu: self.reserved_cpu,
                memory: self.reserved_memory,
                gpu_memory: self.reserved_gpu_memory,
            },
        )
    }
}
