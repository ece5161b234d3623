//! Environment variable source: ZYGOTE_* prefix with __ separator

use config::builder::DefaultState;
use config::ConfigBuilder;
use config::ConfigError;
use config::Environment;

/// `ZYGOTE_HUB__PORT` maps to `hub.port`; list keys split on commas.
pub fn source() -> Environment {
    Environment::with_prefix("ZYGOTE")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("hub.default_spaces")
        .with_list_parse_key("hub.agents")
}

/// Add environment variable overlay to builder.
pub fn add_to_builder(
    builder: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Ok(builder.add_source(source()))
}
