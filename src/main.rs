use std::env;
use std::path;

mod bus;
mod collection;
mod crypto;
mod error;
mod item;
mod persistence;
mod secret;
mod server;
mod service;
mod session;

#[tokio::main]
async fn main() -> Result<(), error::Error> {
    let config_folder = env::var("XDG_CONFIG_HOME").unwrap_or_else(|_| "$HOME/.config".to_string());
    let mut config_path = path::PathBuf::new();
    config_path.push(&config_folder);
    config_path.push("secret-service-server");

    let mut builder = config::Config::builder()
        .set_default("log_level", "INFO")?
        .set_default("dbus_name", "org.freedesktop.secrets")?
        .set_default("home", ".")?
        .set_default("encrypt", false)?
        .add_source(config::Environment::with_prefix("sss"));

    builder = if config_path.exists() {
        builder.add_source(config::File::from(config_path))
    } else {
        builder
    };
    let settings = builder.build()?;

    structured_logger::Builder::with_level(
        &settings
            .get_string("log_level")
            .expect("log_level defaults to 'INFO'"),
    )
    .with_target_writer(
        "*",
        structured_logger::async_json::new_writer(tokio::io::stdout()),
    )
    .init();

    let dbus_name: String = settings
        .get("dbus_name")
        .expect("dbus_name defaults to 'org.freedesktop.secrets'");

    let home: String = settings
        .get("home")
        .expect("home defaults to '.'");
    let home = shellexpand_home(&home);

    let encrypt: bool = settings.get("encrypt").expect("encrypt defaults to false");

    let persistence_config = persistence::Config::new(path::PathBuf::from(home), encrypt);

    let server = server::SecretServiceServer::new(
        &dbus_name,
        event_listener::Event::new(),
        persistence_config,
    )
    .await?;
    server.run().await?;

    Ok(())
}

/// Expand a leading `$HOME` or `~` in configured paths; the `config` crate
/// does not do this for us, and hard-coding a user's home directory in a
/// shipped config file would be wrong.
fn shellexpand_home(path: &str) -> String {
    let Ok(home) = env::var("HOME") else {
        return path.to_owned();
    };

    if let Some(rest) = path.strip_prefix("$HOME") {
        format!("{home}{rest}")
    } else if let Some(rest) = path.strip_prefix('~') {
        format!("{home}{rest}")
    } else {
        path.to_owned()
    }
}
