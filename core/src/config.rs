//! Engine configuration.

use heapless::Vec;

use ringnet_abi::StatusMask;
use ringnet_route::model::{MAX_NODES, MAX_ROUTES, Node, Route};

/// Platform-level settings.
#[derive(Clone, Copy, Debug)]
pub struct GeneralConfig {
    /// Keep the controller watchdog exchange alive. Carried for the
    /// controller command surface; the engine core does not act on it.
    pub watchdog_enabled: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            watchdog_enabled: true,
        }
    }
}

/// Network startup and status-report settings.
#[derive(Clone, Copy, Debug)]
pub struct NetworkConfig {
    /// Packet bandwidth requested at network start.
    pub packet_bw: u16,
    /// Grace period before startup declares the ring unavailable.
    pub forced_na_timeout_ms: u16,
    /// Which status fields the application wants reported.
    pub status_mask: StatusMask,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            packet_bw: 0,
            forced_na_timeout_ms: 5000,
            status_mask: StatusMask::all(),
        }
    }
}

/// Manager mode: the engine auto-drives discovery and welcomes nodes
/// against the configured node table.
#[derive(Clone, Copy, Debug, Default)]
pub struct MgrConfig {
    pub enabled: bool,
}

/// Optional feature surfaces. Disabled features never call their host
/// report methods.
#[derive(Clone, Copy, Debug, Default)]
pub struct FeatureConfig {
    pub ams_enabled: bool,
    pub i2c_enabled: bool,
    pub gpio_enabled: bool,
}

/// Everything the engine needs at init.
#[derive(Default)]
pub struct Config {
    pub general: GeneralConfig,
    pub network: NetworkConfig,
    pub mgr: MgrConfig,
    pub features: FeatureConfig,
    /// Managed nodes, copied into the route manager.
    pub nodes: Vec<Node, MAX_NODES>,
    /// Supervised routes, copied into the route manager.
    pub routes: Vec<Route, MAX_ROUTES>,
}
