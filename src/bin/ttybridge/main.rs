//! ttybridge entrypoint: run a command behind a pty (or pipes), forward its
//! I/O to the invoking terminal, mirror output under the session directory,
//! and keep the `in` FIFO open for injected input.

use anyhow::Result;
use ttybridge::config::AppConfig;
use ttybridge::session::Session;
use ttybridge::telemetry::init_tracing;

fn main() -> Result<()> {
    let config = AppConfig::parse_args()?;
    init_tracing(&config);

    let mut session = Session::start(&config)?;
    session.run()
}
