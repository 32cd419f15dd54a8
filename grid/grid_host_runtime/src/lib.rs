pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod interpolate;
pub mod protocol;
pub mod reconcile;
pub mod rows;
pub mod schema;
pub mod table;
pub mod transport;
pub mod view;

use std::io;
use std::sync::mpsc::RecvTimeoutError;
use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use crate::transport::{TcpTransport, TransportEvent};

pub use crate::config::HostConfig;
pub use crate::connection::{Backoff, ConnectionManager, Phase, Shutdown, StatusIcon};
pub use crate::error::{GridError, Result};
pub use crate::protocol::{Addressing, OutboundFrame, RefreshReason};
pub use crate::view::{MemoryView, TableView};
pub use serde_json;

const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// What a host provides to the runtime: the table views frames are applied
/// to, and the connection indicator.
pub trait HostBindings {
    type View: TableView;

    /// The view bound to `address`. Frames for addresses without a view are
    /// ignored.
    fn view_mut(&mut self, address: &str) -> Option<&mut Self::View>;

    fn set_status(&mut self, _icon: StatusIcon) {}

    fn on_shutdown(&mut self) {}
}

/// Installs a `tracing` subscriber filtered by `RUST_LOG`, defaulting to
/// `info`. Log lines go to stderr.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .try_init();
}

/// Connects, applies frames and reconnects with backoff until `shutdown` is
/// triggered. Returns the bindings so the host can inspect final state.
pub fn run<B: HostBindings>(bindings: B, config: &HostConfig, shutdown: &Shutdown) -> B {
    let mut manager = ConnectionManager::new(bindings, config);
    let target = config.handshake_target();

    while !shutdown.is_triggered() {
        manager.begin_connect();

        match TcpTransport::connect(
            &config.endpoint,
            config.connect_timeout,
            config.inbound_queue_cap,
            config.outbound_queue_cap,
        ) {
            Ok(mut transport) => {
                let handshake = OutboundFrame::Connect {
                    target: target.clone(),
                };
                match transport.send(handshake) {
                    Ok(()) => {
                        manager.on_open();
                        pump(&mut manager, &mut transport, shutdown);
                    }
                    Err(err) => manager.on_error(&err.to_string()),
                }
                transport.close();
            }
            Err(err) => manager.on_error(&err.to_string()),
        }

        let delay = manager.on_close();
        let unsent = manager.drain_outbox();
        debug!(unsent = unsent.len(), "discarding frames queued after close");

        if shutdown.wait(delay) {
            break;
        }
    }

    info!("grid runtime stopped");
    manager.into_bindings()
}

/// Runs with configuration from the environment until stdin closes, then
/// hands the bindings their shutdown hook.
pub fn run_from_env<B: HostBindings>(bindings: B) -> Result<B> {
    let config = HostConfig::from_env()?;
    info!(
        endpoint = %config.endpoint,
        target = %config.handshake_target(),
        "starting grid runtime"
    );

    let shutdown = Shutdown::new();
    let watcher = shutdown.clone();
    thread::spawn(move || {
        let _ = io::copy(&mut io::stdin().lock(), &mut io::sink());
        watcher.trigger();
    });

    let mut bindings = run(bindings, &config, &shutdown);
    bindings.on_shutdown();
    Ok(bindings)
}

fn pump<B: HostBindings>(
    manager: &mut ConnectionManager<B>,
    transport: &mut TcpTransport,
    shutdown: &Shutdown,
) {
    loop {
        for frame in manager.drain_outbox() {
            if let Err(err) = transport.send(frame) {
                manager.on_error(&err.to_string());
                return;
            }
        }

        if shutdown.is_triggered() {
            return;
        }

        match transport.recv_timeout(EVENT_POLL_INTERVAL) {
            Ok(TransportEvent::Message(text)) => manager.on_message(&text),
            Ok(TransportEvent::Error(reason)) => manager.on_error(&reason),
            Ok(TransportEvent::Closed) | Err(RecvTimeoutError::Disconnected) => return,
            Err(RecvTimeoutError::Timeout) => {}
        }
    }
}

/// Generates `fn main()` running the runtime for a `Default` bindings type.
#[macro_export]
macro_rules! app_main {
    ($bindings:ty) => {
        fn main() {
            $crate::init_tracing();

            let bindings = <$bindings as ::std::default::Default>::default();
            if let Err(err) = $crate::run_from_env(bindings) {
                eprintln!("grid_host fatal error: {err}");
                std::process::exit(1);
            }
        }
    };
}
