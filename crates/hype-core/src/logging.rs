//! Logging setup for the hype monitor.
//!
//! Every subsystem prefixes its lines so one stream or edge can be grepped
//! out of the combined output:
//!
//! | Prefix       | Level | Example                                                          |
//! |--------------|-------|------------------------------------------------------------------|
//! | `[<stream>]` | debug | `[buddha] n=000000042 activity=03.10 hype=false threshold=...`   |
//! | `[<stream>]` | info  | `[buddha] flushed 1200 samples into 47 percentiles`              |
//! | `[<stream>]` | error | `[buddha] flush failed, samples kept: ...`                       |
//! | `[store]`    | debug | `[store] committed revision 12 to baseline.json`                 |
//! | `[chat]`     | info  | connection state, joins and reconnect backoff                    |
//! | `[poller]`   | info  | `[poller] buddha went live`                                      |
//! | `[helix]`    | warn  | entries skipped at the status API boundary                       |
//!
//! Hype summaries (`Hype Detected-...`, `Hype Ended-...`) are logged at info
//! whatever notification sink is configured. The per-tick `[stream]` line is
//! debug only; run with `RUST_LOG=hype_core=debug` to watch the rate and
//! threshold move.
//!
//! The console gets human-readable lines. With a log directory, a daily
//! rolling file receives the same events as JSON lines (`fields.message`
//! holds the text above).

use tracing::Subscriber;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the global tracing subscriber. Call once at startup.
///
/// - `log_level`: filter used when `RUST_LOG` is unset (e.g. `"info"`)
/// - `log_dir`: directory for the daily JSON log, if any
/// - `module_name`: log file prefix (e.g. `"hype-monitor"`)
pub fn init_logging(log_level: &str, log_dir: Option<&str>, module_name: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let console_layer = fmt::layer().with_target(true).with_thread_ids(true).with_ansi(true);

    let registry = tracing_subscriber::registry().with(env_filter).with(console_layer);
    match log_dir {
        Some(dir) => registry.with(file_layer(dir, module_name)).init(),
        None => registry.init(),
    }
}

/// JSON lines into `<dir>/<module_name>.<date>`, rotated daily.
fn file_layer<S>(dir: &str, module_name: &str) -> impl Layer<S> + use<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fmt::layer()
        .json()
        .with_writer(tracing_appender::rolling::daily(dir, module_name))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
}
