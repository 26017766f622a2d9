use anyhow::Context;
use petpal_functions::config::{config_path, load_settings};
use petpal_functions::functions::BookingKind;
use petpal_functions::{logging, runtime, server, PetpalApp};
use tokio::task::JoinSet;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = load_settings(None).context("Critical: Configuration is malformed")?;
    logging::init(&settings.logging).context("Failed to initialize logging")?;
    match config_path(None) {
        Some(path) => tracing::info!("Loaded config from {}", path.display()),
        None => tracing::info!("Loaded default config"),
    }

    let app = PetpalApp::from_settings(settings)
        .await
        .context("Failed to initialize Firebase clients")?;

    let mut tasks = JoinSet::new();

    if app.settings.watch.enabled {
        for kind in BookingKind::ALL {
            tasks.spawn(runtime::watch_bookings(app.clone(), kind));
        }
        tasks.spawn(runtime::watch_messages(app.clone()));
    } else {
        tracing::info!("Firestore triggers disabled");
    }

    if app.settings.reminders.enabled {
        tasks.spawn(runtime::run_reminders(app.clone()));
    }

    let address = app.settings.server.socket_addr();
    let served = server::serve(app.server_state(), address)
        .await
        .context("HTTP server failed");

    tasks.shutdown().await;
    served
}
