use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::ProgressFactory;

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub progress: ProgressFactory,
}

impl AppContext {
    pub fn new(config: AppConfig) -> Self {
        let progress = ProgressFactory::new(config.progress);
        Self::with_progress(config, progress)
    }

    /// Use a factory created earlier, e.g. one whose bars logging already knows about.
    pub fn with_progress(config: AppConfig, progress: ProgressFactory) -> Self {
        Self {
            config: Arc::new(config),
            progress,
        }
    }
}
