pub mod error;
pub mod kernel_file;
pub mod load;
pub mod routing_settings;

pub use error::ConfigError;
pub use kernel_file::{
    EdgeConfig, EdgeGuard, FlowConfig, KernelConfig, NodeConfig, PathPattern, SidequestConfig,
    SidequestTargetConfig, TerminalKind, Trigger,
};
pub use load::load_kernel_config;
pub use routing_settings::{PenaltyWeights, RoutingConfig, MAX_CONFIGURED_PRIORITY};
