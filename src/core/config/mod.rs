// logflux_rust/src/core/config/mod.rs

pub mod context;
pub mod diff;
pub mod pipeline_config;
pub mod settings;
pub mod watcher;

pub use context::AgentContext;
pub use diff::{PipelineConfigDiff, TaskConfigDiff};
pub use pipeline_config::{ConfigType, GlobalConfig, PipelineConfig, TaskConfig};
pub use settings::Settings;
pub use watcher::ConfigWatcher;
