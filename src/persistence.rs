//! Loads and saves the service's object graph to a JSON file on disk, so
//! that collections and items outlive a restart of the daemon.
use std::collections;
use std::path;

use crate::bus::DbusObject;
use crate::collection;
use crate::crypto;
use crate::error;
use crate::item;
use crate::service;

const DB_VERSION: &str = "0.1.0";
const MASTERPASSWORD_VAR: &str = "MASTERPASSWORD";

/// Where the database lives and whether its secrets are encrypted at rest.
#[derive(Debug, Clone)]
pub struct Config {
    pub home: path::PathBuf,
    pub encrypted: bool,
}

impl Config {
    pub fn new(home: path::PathBuf, encrypted: bool) -> Self {
        Self { home, encrypted }
    }

    /// A throwaway, unencrypted database under a fresh temporary directory.
    /// Used by integration tests that don't care about persistence.
    pub fn ephemeral() -> Self {
        let mut dir = std::env::temp_dir();
        dir.push(format!(
            "secret-service-server-test-{}",
            uuid::Uuid::new_v4()
                .as_simple()
                .encode_lower(&mut uuid::Uuid::encode_buffer())
        ));
        Self {
            home: dir,
            encrypted: false,
        }
    }

    pub fn db_path(&self) -> path::PathBuf {
        self.home.join("db.json")
    }

    /// `$MASTERPASSWORD` is used verbatim as the AES-256-GCM key, not hashed
    /// into one: it must be exactly 32 ASCII bytes, and a mismatched length
    /// is fatal whenever `encrypted=true`.
    fn master_key(&self) -> Result<[u8; 32], error::Error> {
        let password = std::env::var(MASTERPASSWORD_VAR).map_err(|_| {
            error::Error::Persistence(format!(
                "{} must be set to encrypt the database at rest",
                MASTERPASSWORD_VAR
            ))
        })?;
        let bytes = password.into_bytes();
        bytes.try_into().map_err(|bytes: Vec<u8>| {
            error::Error::Persistence(format!(
                "{} must be exactly 32 bytes, got {}",
                MASTERPASSWORD_VAR,
                bytes.len()
            ))
        })
    }
}

/// `ENV=TEST` suppresses fatal load/decrypt errors, for test harnesses that
/// don't want a corrupt fixture database to abort the whole run.
fn test_mode() -> bool {
    std::env::var("ENV").map(|v| v == "TEST").unwrap_or(false)
}

#[derive(Debug, serde::Deserialize, serde::Serialize)]
struct DbSecret {
    parent: String,
    secret_text: String,
}

#[derive(Debug, serde::Deserialize, serde::Serialize)]
struct DbItem {
    parent: String,
    object_path: String,
    label: String,
    locked: bool,
    created: u64,
    modified: u64,
    properties: collections::HashMap<String, String>,
    lookup_attributes: collections::HashMap<String, String>,
    content_type: String,
    secret: DbSecret,
}

#[derive(Debug, serde::Deserialize, serde::Serialize)]
struct DbCollection {
    object_path: String,
    alias: Option<String>,
    label: String,
    locked: bool,
    created: u64,
    modified: u64,
    properties: collections::HashMap<String, String>,
    items: Vec<DbItem>,
}

#[derive(Debug, serde::Deserialize, serde::Serialize)]
struct DbModel {
    version: String,
    encrypted: bool,
    collections: Vec<DbCollection>,
}

fn encode_secret(config: &Config, plaintext: &[u8]) -> Result<String, error::Error> {
    use base64::Engine;

    if config.encrypted {
        crypto::aes_gcm_256_encrypt(&config.master_key()?, plaintext)
    } else {
        Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(plaintext))
    }
}

fn decode_secret(config: &Config, encoded: &str) -> Result<Vec<u8>, error::Error> {
    use base64::Engine;

    if config.encrypted {
        crypto::aes_gcm_256_decrypt(&config.master_key()?, encoded)
    } else {
        base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|e| error::Error::Persistence(format!("invalid base64 secret: {}", e)))
    }
}

/// Walk the live object graph and write it out atomically. Takes a read
/// snapshot of every collection and item reachable from `service`.
pub async fn save(
    config: &Config,
    service: &service::Service,
    object_server: &zbus::ObjectServer,
) -> Result<(), error::Error> {
    let mut db_collections = Vec::new();

    for collection_path in service.collections.iter() {
        let collection_ref = match collection::Collection::get_interface_from_object_path(
            &collection_path.as_ref(),
            object_server,
        )
        .await
        {
            Ok(interface_ref) => interface_ref,
            Err(_) => continue,
        };
        let collection = collection_ref.get().await;

        let mut db_items = Vec::new();
        for item_path in collection.items.iter() {
            let item_ref = match item::Item::get_interface_from_object_path(
                &item_path.as_ref(),
                object_server,
            )
            .await
            {
                Ok(interface_ref) => interface_ref,
                Err(_) => continue,
            };
            let item = item_ref.get().await;

            db_items.push(DbItem {
                parent: collection.object_path.as_str().to_owned(),
                object_path: item.get_object_path().as_str().to_owned(),
                label: item.label.clone(),
                locked: item.locked,
                created: item.created,
                modified: item.modified,
                properties: item.properties.clone(),
                lookup_attributes: item.attributes.clone(),
                content_type: item.content_type.clone(),
                secret: DbSecret {
                    parent: item.get_object_path().as_str().to_owned(),
                    secret_text: encode_secret(config, &item.secret)?,
                },
            });
        }

        db_collections.push(DbCollection {
            object_path: collection.object_path.as_str().to_owned(),
            alias: collection.alias.clone(),
            label: collection.label.clone(),
            locked: collection.locked,
            created: collection.created,
            modified: collection.modified,
            properties: collection.properties.clone(),
            items: db_items,
        });
    }

    let model = DbModel {
        version: DB_VERSION.to_owned(),
        encrypted: config.encrypted,
        collections: db_collections,
    };

    let json = serde_json::to_vec_pretty(&model)?;

    tokio::fs::create_dir_all(&config.home).await?;
    let tmp_path = config.db_path().with_extension("json.tmp");
    tokio::fs::write(&tmp_path, &json).await?;
    tokio::fs::rename(&tmp_path, config.db_path()).await?;

    log::info!("Persisted database to '{}'", config.db_path().display());

    Ok(())
}

/// Restore every collection and item from disk, serving each at its own
/// bus path, and populate `service`'s indices. Returns `false` (no restore
/// performed, the caller should create the default collection) if no
/// database file exists yet.
pub async fn load(
    config: &Config,
    service: &mut service::Service,
    object_server: &zbus::ObjectServer,
) -> Result<bool, error::Error> {
    let db_path = config.db_path();
    if !tokio::fs::try_exists(&db_path).await? {
        return Ok(false);
    }

    let bytes = match tokio::fs::read(&db_path).await {
        Ok(bytes) => bytes,
        Err(e) if test_mode() => {
            log::warn!("Ignoring unreadable database at '{}' under ENV=TEST: {e}", db_path.display());
            return Ok(false);
        }
        Err(e) => return Err(e.into()),
    };

    let model: DbModel = match serde_json::from_slice(&bytes) {
        Ok(model) => model,
        Err(e) if test_mode() => {
            log::warn!("Ignoring malformed database at '{}' under ENV=TEST: {e}", db_path.display());
            return Ok(false);
        }
        Err(e) => return Err(e.into()),
    };

    if model.encrypted != config.encrypted {
        let message = format!(
            "database at '{}' was saved with encrypted={} but service is configured with encrypted={}",
            db_path.display(),
            model.encrypted,
            config.encrypted
        );
        if test_mode() {
            log::warn!("{message} (ignored under ENV=TEST)");
            return Ok(false);
        }
        return Err(error::Error::Persistence(message));
    }

    for db_collection in model.collections {
        let object_path: zvariant::OwnedObjectPath =
            zvariant::ObjectPath::try_from(db_collection.object_path.as_str())?.into();
        let id = extract_uuid(&object_path).unwrap_or_else(uuid::Uuid::new_v4);

        let mut collection = collection::Collection::new(
            id,
            &db_collection.label,
            db_collection.alias.as_deref(),
            object_path.clone(),
            collections::HashMap::new(),
            service.get_object_path(),
            service.save_tx(),
        );
        collection.locked = db_collection.locked;
        collection.created = db_collection.created;
        collection.modified = db_collection.modified;
        collection.properties = db_collection.properties;

        for db_item in db_collection.items {
            let item_object_path: zvariant::OwnedObjectPath =
                zvariant::ObjectPath::try_from(db_item.object_path.as_str())?.into();
            let item_id = extract_uuid(&item_object_path).unwrap_or_else(uuid::Uuid::new_v4);

            let secret = match decode_secret(config, &db_item.secret.secret_text) {
                Ok(secret) => secret,
                Err(e) if test_mode() => {
                    log::warn!(
                        "Skipping undecodable secret at '{}' under ENV=TEST: {e}",
                        item_object_path.as_str()
                    );
                    continue;
                }
                Err(e) => return Err(e),
            };

            let item = item::Item {
                attributes: db_item.lookup_attributes.clone(),
                properties: db_item.properties,
                content_type: db_item.content_type,
                created: db_item.created,
                id: item_id,
                label: db_item.label,
                locked: db_item.locked,
                modified: db_item.modified,
                parent_path: object_path.clone(),
                secret,
                save_tx: collection.save_tx(),
            };

            collection.insert_item(
                item_object_path.clone(),
                db_item
                    .lookup_attributes
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_str())),
            );

            object_server.at(item_object_path, item).await?;
        }

        if let Some(alias) = &collection.alias {
            service.try_insert_collection_alias(object_path.clone(), alias)?;
        }
        service.collections.insert(object_path.clone());
        object_server.at(object_path, collection).await?;
    }

    log::info!("Restored database from '{}'", db_path.display());

    Ok(true)
}

fn extract_uuid(object_path: &zvariant::ObjectPath<'_>) -> Option<uuid::Uuid> {
    let segment = object_path.as_str().rsplit('/').next()?;
    uuid::Uuid::parse_str(segment).ok()
}
