pub mod build;
pub mod config;
pub mod labels;
pub mod splits;

pub use build::{build_datasets, load_image, BuildSummary};
pub use config::PipelineConfig;
pub use labels::{index_images, label_from_path, LabelEncoder};
pub use splits::{stratified_split, Split};

use tracing_subscriber::EnvFilter;

/// Install the fmt subscriber with `RUST_LOG` filtering (default `info`).
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
