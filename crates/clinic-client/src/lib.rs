pub mod api;
pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod http;
pub mod replay;
pub mod session;
pub mod state;

pub use api::{ApiError, PortalApi};
pub use config::ClientConfig;
pub use error::SessionError;
pub use events::{channel_observer, LogObserver, NoopObserver, UiEvent, UiObserver};
pub use http::HttpPortalApi;
pub use session::Session;
pub use state::SessionState;

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("clinic_client=debug,clinic_net=debug,clinic_store=info,warn")
    });

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
