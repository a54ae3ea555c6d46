use std::fs::OpenOptions;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const LOG_DIR: &str = "server/log";

/// Console output plus an ANSI-free copy in `server/log/<file_name>`.
/// `RUST_LOG` overrides the default of tracing everything in `crate_name`
/// and the tracker library.
pub fn init(crate_name: &str, file_name: &str) -> anyhow::Result<()> {
    std::fs::create_dir_all(LOG_DIR)?;

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(format!("{LOG_DIR}/{file_name}"))?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| format!("{crate_name}=trace,live_tracker_lib=trace,tower_http=debug").into())
        )
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(file))
        .init();

    Ok(())
}
