//! Log output for the smoke runner.
//!
//! Events from the feed crates are the point of a smoke run, so they are
//! shown at `debug` by default while dependencies (reqwest, tungstenite,
//! hyper) stay at `warn`.

use std::env;

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "warn,feed_smoke=info,feed_client=debug,feed_core=debug";
const LOG_ENV: &str = "NOTIFEED_LOG";

/// Install the global subscriber. `RUST_LOG` wins over `NOTIFEED_LOG`; an
/// unset, blank or unparsable value falls through to the next source.
pub fn init() {
    let directives = resolve_directives(|key| env::var(key).ok());
    let _ = tracing_subscriber::fmt()
        .compact()
        .with_target(true)
        .with_env_filter(EnvFilter::new(directives))
        .try_init();
}

fn resolve_directives<F>(mut lookup: F) -> String
where
    F: FnMut(&str) -> Option<String>,
{
    [EnvFilter::DEFAULT_ENV, LOG_ENV]
        .into_iter()
        .filter_map(|key| lookup(key))
        .map(|value| value.trim().to_owned())
        .find(|value| !value.is_empty() && EnvFilter::try_new(value).is_ok())
        .unwrap_or_else(|| DEFAULT_FILTER.to_owned())
}
