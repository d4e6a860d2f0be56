use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{config_rejected, EngineError};

pub fn init_tracing(filter: &str) -> Result<(), EngineError> {
    if filter.trim().is_empty() {
        return Err(config_rejected("logging filter cannot be empty"));
    }

    let env_filter = EnvFilter::try_new(filter)
        .map_err(|err| config_rejected(format!("failed to parse logging filter '{filter}': {err}")))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(env_filter)
        .try_init()
        .map_err(|err| config_rejected(format!("failed to initialize tracing subscriber: {err}")))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::init_tracing;

    #[test]
    fn empty_filter_is_rejected() {
        let err = init_tracing("  ").expect_err("filter must fail");
        assert!(err.message.contains("logging filter"));
    }

    #[test]
    fn invalid_filter_is_rejected() {
        let err = init_tracing("info,core==debug").expect_err("filter must fail");
        assert!(err.message.contains("logging filter"));
    }
}
