use tracing::level_filters::LevelFilter;

const HEALTH_TRENDS_CONFIG: &str = "HEALTH_TRENDS_CONFIG";

pub fn get_config_path() -> Option<String> {
    std::env::var(HEALTH_TRENDS_CONFIG).ok()
}

const HEALTH_TRENDS_LOG: &str = "HEALTH_TRENDS_LOG";

const DEFAULT_LOG_LEVEL: LevelFilter = LevelFilter::INFO;

pub fn get_log_level() -> LevelFilter {
    let level_from_env = std::env::var(HEALTH_TRENDS_LOG);
    level_from_env.map_or(DEFAULT_LOG_LEVEL, |res| {
        res.parse().unwrap_or(DEFAULT_LOG_LEVEL)
    })
}

