//! Environment fallbacks for the hub binary

const UPWATCH_CONFIG: &str = "UPWATCH_CONFIG";

const DEFAULT_CONFIG_PATH: &str = "./upwatch.json";

/// Config file from the command line, the environment, or the default path
pub fn get_config_path(from_args: Option<String>) -> String {
    from_args
        .or_else(|| std::env::var(UPWATCH_CONFIG).ok())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
}

const UPWATCH_API_TOKEN: &str = "UPWATCH_API_TOKEN";

/// API token from the config file, falling back to the environment
pub fn get_api_token(from_config: Option<String>) -> Option<String> {
    from_config
        .or_else(|| std::env::var(UPWATCH_API_TOKEN).ok())
        .filter(|token| !token.is_empty())
}
