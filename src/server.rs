//! Wires together the bus connection, the persisted object graph, and the
//! background task that keeps the on-disk database up to date.
use std::time;

use crate::bus::DbusObject;
use crate::error;
use crate::persistence;
use crate::service;

const REQUEST_NAME_ATTEMPTS: u32 = 5;
const REQUEST_NAME_RETRY_DELAY: time::Duration = time::Duration::from_secs(2);
const REQUEST_NAME_EXIT_CODE: i32 = 5;

#[derive(Debug)]
pub struct SecretServiceServer {
    connection: zbus::Connection,
    dbus_name: String,
    start_event: event_listener::Event,
    persistence_config: persistence::Config,
}

impl SecretServiceServer {
    pub async fn new(
        dbus_name: &str,
        start_event: event_listener::Event,
        persistence_config: persistence::Config,
    ) -> Result<Self, error::Error> {
        let connection = zbus::Connection::session().await?;

        Ok(Self {
            connection,
            dbus_name: dbus_name.to_owned(),
            start_event,
            persistence_config,
        })
    }

    /// Request our well-known bus name, retrying a bounded number of times
    /// spaced `REQUEST_NAME_RETRY_DELAY` apart. Exhausting retries exits the
    /// process with `REQUEST_NAME_EXIT_CODE`, since a secrets daemon no one
    /// can reach is worse than a daemon that refuses to start.
    async fn request_name_with_retry(&self) -> Result<(), error::Error> {
        let mut attempt = 0;

        loop {
            match self.connection.request_name(self.dbus_name.as_str()).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    attempt += 1;

                    if attempt >= REQUEST_NAME_ATTEMPTS {
                        log::error!(
                            "Giving up acquiring bus name '{}' after {} attempts: {}",
                            self.dbus_name,
                            attempt,
                            e
                        );
                        std::process::exit(REQUEST_NAME_EXIT_CODE);
                    }

                    log::warn!(
                        "Attempt {} to acquire bus name '{}' failed: {}; retrying in {:?}",
                        attempt,
                        self.dbus_name,
                        e,
                        REQUEST_NAME_RETRY_DELAY
                    );
                    tokio::time::sleep(REQUEST_NAME_RETRY_DELAY).await;
                }
            }
        }
    }

    async fn shutdown_signal() {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to install SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {},
                _ = sigterm.recv() => {},
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
    }

    pub async fn run(self) -> Result<(), error::Error> {
        let object_server = self.connection.object_server();
        let (save_tx, mut save_rx) = tokio::sync::mpsc::unbounded_channel();
        let mut service = service::Service::new(save_tx);

        let restored =
            persistence::load(&self.persistence_config, &mut service, object_server).await?;

        let (service_path, _) = service.serve_at(object_server).await?;

        if !restored {
            let service_ref =
                service::Service::get_interface_from_object_path(&service_path.as_ref(), object_server)
                    .await?;
            service_ref
                .get_mut()
                .await
                .create_default_collection(object_server)
                .await?;
            log::info!("Created default collection.");
        } else {
            log::info!("Restored collections from '{}'.", self.persistence_config.db_path().display());
        }

        log::info!("Serving Secret Service interface.");

        let cancellation_token = tokio_util::sync::CancellationToken::new();

        let persistence_cancellation = cancellation_token.clone();
        let persistence_connection = self.connection.clone();
        let persistence_config = self.persistence_config.clone();
        let persistence_service_path = service_path.clone();

        let persistence_task = tokio::spawn(async move {
            let object_server = persistence_connection.object_server();

            loop {
                tokio::select! {
                    _ = persistence_cancellation.cancelled() => break,
                    signal = save_rx.recv() => {
                        if signal.is_none() {
                            break;
                        }
                        // Coalesce any save requests queued up while we were busy.
                        while save_rx.try_recv().is_ok() {}

                        if let Ok(service_ref) = service::Service::get_interface_from_object_path(
                            &persistence_service_path.as_ref(),
                            object_server,
                        )
                        .await
                        {
                            let service_guard = service_ref.get().await;
                            if let Err(e) =
                                persistence::save(&persistence_config, &service_guard, object_server).await
                            {
                                // Matches the reference daemon: a save that can't be
                                // written is not something the daemon can keep running
                                // past, since every client holds a now-stale belief
                                // that their change has been persisted.
                                log::error!("Failed to persist database, exiting: {}", e);
                                std::process::exit(1);
                            }
                        }
                    }
                }
            }
        });

        self.request_name_with_retry().await?;
        log::info!(
            "Dbus assigned name '{}' to secret service server",
            self.dbus_name
        );
        self.start_event.notify(usize::MAX);

        let shutdown_token = cancellation_token.clone();
        tokio::spawn(async move {
            Self::shutdown_signal().await;
            log::info!("Received shutdown signal, saving and exiting.");
            shutdown_token.cancel();
        });

        cancellation_token.cancelled().await;

        if let Ok(service_ref) = service::Service::get_interface_from_object_path(
            &service_path.as_ref(),
            object_server,
        )
        .await
        {
            let service_guard = service_ref.get().await;
            if let Err(e) =
                persistence::save(&self.persistence_config, &service_guard, object_server).await
            {
                log::error!("Failed to persist database on shutdown: {}", e);
                std::process::exit(1);
            }
        }

        let _ = persistence_task.await;

        Ok(())
    }
}
