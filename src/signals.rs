//! Terminates the platform once the process is asked to shut down.
//!
//! Waits for **CTRL+C**, **SIGHUP** or **SIGTERM** and then invokes
//! [Platform::terminate](crate::platform::Platform::terminate). This stops the session
//! revalidation loop and the config monitor, so that the owner can drain the pending refresh
//! tasks via [InfoService::shutdown](crate::info::InfoService::shutdown).
use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};

use crate::platform::Platform;

/// Installs a signal handler for the given platform.
///
/// Note that this is automatically called by the [Builder](crate::builder::Builder) if
/// signals are enabled.
pub fn install(platform: Arc<Platform>) {
    crate::spawn!(async move {
        let (mut sig_hup, mut sig_term) =
            match (signal(SignalKind::hangup()), signal(SignalKind::terminate())) {
                (Ok(sig_hup), Ok(sig_term)) => (sig_hup, sig_term),
                (Err(error), _) | (_, Err(error)) => {
                    log::error!("Failed to install the signal handlers: {}", error);
                    return;
                }
            };

        let reason = tokio::select! {
            _ = tokio::signal::ctrl_c() => "CTRL-C",
            _ = sig_hup.recv() => "SIGHUP",
            _ = sig_term.recv() => "SIGTERM",
            _ = platform.terminated() => return,
        };

        log::info!("Received {}. Shutting down...", reason);
        platform.terminate();
    });
}
