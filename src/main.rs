// src/main.rs
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use etude::config::Config;
use etude::server::Server;
use etude::syscalls;

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = Config::from_args();

    // Writes to peer-closed sockets must surface as EPIPE, not kill us.
    if let Err(e) = syscalls::ignore_sigpipe() {
        error!(error = %e, "failed to ignore SIGPIPE");
        std::process::exit(1);
    }

    let mut server = match Server::bind(cfg) {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "startup failed");
            std::process::exit(1);
        }
    };

    if let Err(e) = server.run() {
        error!(error = %e, "reactor loop failed");
        std::process::exit(1);
    }
}
