// logflux_rust/src/core/processor/mod.rs

pub mod k8s_metadata;
pub mod prom_parse;
pub mod prom_relabel;
pub mod relabel;
pub mod text_parser;

pub use k8s_metadata::{PodMetadata, PodMetadataProvider, ProcessorK8sMetadata};
pub use prom_parse::ProcessorPromParse;
pub use prom_relabel::ProcessorPromRelabel;
pub use relabel::{RelabelAction, RelabelConfigList, RelabelRule};
pub use text_parser::TextParser;

/// Metric label key carrying the sample name through relabeling.
pub const NAME_LABEL: &str = "__name__";
