//! Implementation of `org.freedesktop.Secret.Item` D-Bus interface: a single
//! stored credential, owned by its `Collection`.
use std::collections;
use std::time;

use crate::bus::{sanitize_property_bag, DbusObject};
use crate::collection;
use crate::error;
use crate::secret;
use crate::session;

#[derive(Debug)]
pub struct Item {
    pub attributes: collections::HashMap<String, String>,
    pub properties: collections::HashMap<String, String>,
    pub content_type: String,
    pub created: u64,
    pub id: uuid::Uuid,
    pub label: String,
    pub locked: bool,
    pub modified: u64,
    pub parent_path: zvariant::OwnedObjectPath,
    pub secret: Vec<u8>,
    pub save_tx: tokio::sync::mpsc::UnboundedSender<()>,
}

#[derive(zvariant::DeserializeDict, zvariant::SerializeDict, zvariant::Type)]
#[zvariant(signature = "dict")]
pub struct ItemReadWriteProperties {
    #[zvariant(rename = "org.freedesktop.Secret.Item.Attributes")]
    pub attributes: collections::HashMap<String, String>,
    #[zvariant(rename = "org.freedesktop.Secret.Item.Label")]
    pub label: String,
}

const RESERVED_ITEM_SUFFIXES: &[&str] = &[
    ".Locked",
    ".Created",
    ".Modified",
    ".Attributes",
    ".Label",
];

impl DbusObject for Item {
    fn get_object_path(&self) -> zvariant::OwnedObjectPath {
        let mut object_path = self.parent_path.as_str().to_owned();
        object_path.push('/');
        object_path.push_str(
            self.id
                .as_simple()
                .encode_lower(&mut uuid::Uuid::encode_buffer()),
        );
        zvariant::ObjectPath::from_str_unchecked(&object_path).into()
    }
}

fn now_seconds() -> u64 {
    time::SystemTime::now()
        .duration_since(time::SystemTime::UNIX_EPOCH)
        .expect("current SystemTime before UNIX EPOCH")
        .as_secs()
}

async fn resolve_session(
    session_path: &zvariant::ObjectPath<'_>,
    object_server: &zbus::ObjectServer,
) -> Result<zbus::object_server::InterfaceRef<session::Session>, error::Error> {
    session::Session::get_interface_from_object_path(session_path, object_server)
        .await
        .map_err(|_| error::Error::NoSession(session_path.as_str().to_owned()))
}

/// Resolve this item's owning collection through the object server. An item
/// holds no back-pointer, so its `parent_path` is re-resolved on demand
/// whenever a mutation needs to keep the collection's search index or
/// `Modified` timestamp in step (see the arena-style ownership note).
async fn resolve_collection(
    parent_path: &zvariant::ObjectPath<'_>,
    object_server: &zbus::ObjectServer,
) -> Result<zbus::object_server::InterfaceRef<collection::Collection>, error::Error> {
    collection::Collection::get_interface_from_object_path(parent_path, object_server)
        .await
        .map_err(|_| error::Error::NoSuchObject(parent_path.as_str().to_owned()))
}

impl Item {
    /// Decrypt a secret wire tuple under its referenced session, resolving
    /// an empty content-type to the plain-text default. Shared by `new` and
    /// by `Collection::create_item`'s replace-in-place path.
    pub async fn decrypt_wire(
        wire: secret::Secret,
        object_server: &zbus::ObjectServer,
    ) -> Result<(Vec<u8>, String), error::Error> {
        let session_ref = resolve_session(&wire.session.as_ref(), object_server).await?;
        let session = session_ref.get().await;

        let plaintext = session.decrypt(&wire.value, &wire.parameters)?;
        let content_type = if wire.content_type.is_empty() {
            secret::DEFAULT_CONTENT_TYPE.to_owned()
        } else {
            wire.content_type
        };

        Ok((plaintext, content_type))
    }

    /// Decrypt `wire` under the resolved session and build a fresh `Item`
    /// (not yet assigned an id or registered on the bus).
    #[allow(clippy::too_many_arguments)]
    pub async fn new(
        wire: secret::Secret,
        label: &str,
        attributes: collections::HashMap<String, String>,
        properties: collections::HashMap<String, String>,
        parent_path: zvariant::OwnedObjectPath,
        save_tx: tokio::sync::mpsc::UnboundedSender<()>,
        object_server: &zbus::ObjectServer,
    ) -> Result<Self, error::Error> {
        let (plaintext, content_type) = Self::decrypt_wire(wire, object_server).await?;
        let created = now_seconds();

        Ok(Self {
            attributes,
            properties: sanitize_property_bag(
                properties
                    .into_iter()
                    .map(|(k, v)| (k, zvariant::Value::new(v).try_to_owned().unwrap()))
                    .collect(),
                RESERVED_ITEM_SUFFIXES,
            ),
            content_type,
            created,
            id: uuid::Uuid::new_v4(),
            label: label.to_owned(),
            locked: false,
            modified: created,
            parent_path,
            secret: plaintext,
            save_tx,
        })
    }

    pub fn touch(&mut self) {
        self.modified = now_seconds();
    }

    pub fn notify_save(&self) {
        let _ = self.save_tx.send(());
    }
}

#[zbus::interface(name = "org.freedesktop.Secret.Item")]
impl Item {
    /// Delete method
    async fn delete(
        &mut self,
        #[zbus(object_server)] object_server: &zbus::ObjectServer,
    ) -> Result<zvariant::ObjectPath<'_>, error::Error> {
        let item_path = self.get_object_path();

        let collection_ref = resolve_collection(&self.parent_path.as_ref(), object_server)
            .await
            .ok();
        if let Some(collection_ref) = &collection_ref {
            let mut collection = collection_ref.get_mut().await;
            collection.remove_item_from_index(&item_path);
            collection.touch();
            collection.notify_save();
        }

        self.remove(object_server).await?;
        log::info!("Deleted item on '{item_path}'");
        if let Some(collection_ref) = &collection_ref {
            collection::Collection::item_deleted(collection_ref.signal_emitter()).await?;
        }

        Ok(zvariant::ObjectPath::from_str_unchecked("/"))
    }

    /// GetSecret method
    pub async fn get_secret(
        &self,
        session: zvariant::ObjectPath<'_>,
        #[zbus(object_server)] object_server: &zbus::ObjectServer,
    ) -> Result<secret::Secret, error::Error> {
        if self.locked {
            return Err(error::Error::IsLocked(
                self.get_object_path().as_str().to_owned(),
            ));
        }

        let session_ref = resolve_session(&session, object_server).await?;
        let session_guard = session_ref.get().await;

        let (value, parameters) = session_guard.encrypt(&self.secret);

        Ok(secret::Secret {
            session: session.into(),
            parameters,
            value,
            content_type: self.content_type.clone(),
        })
    }

    /// SetSecret method
    async fn set_secret(
        &mut self,
        secret: secret::Secret,
        #[zbus(object_server)] object_server: &zbus::ObjectServer,
    ) -> Result<(), error::Error> {
        if self.locked {
            return Err(error::Error::IsLocked(
                self.get_object_path().as_str().to_owned(),
            ));
        }

        let session_ref = resolve_session(&secret.session.as_ref(), object_server).await?;
        let session_guard = session_ref.get().await;

        let plaintext = session_guard.decrypt(&secret.value, &secret.parameters)?;
        self.secret = plaintext;
        if !secret.content_type.is_empty() {
            self.content_type = secret.content_type;
        }
        self.touch();
        self.notify_save();

        let collection_ref = resolve_collection(&self.parent_path.as_ref(), object_server)
            .await
            .ok();
        if let Some(collection_ref) = &collection_ref {
            collection_ref.get_mut().await.touch();
            collection::Collection::item_changed(collection_ref.signal_emitter()).await?;
        }

        Ok(())
    }

    /// Attributes property
    #[zbus(property)]
    fn attributes(&self) -> collections::HashMap<String, String> {
        self.attributes.clone()
    }

    #[zbus(property)]
    async fn set_attributes(
        &mut self,
        value: collections::HashMap<String, String>,
        #[zbus(object_server)] object_server: &zbus::ObjectServer,
    ) -> zbus::fdo::Result<()> {
        self.attributes = value.clone();
        self.touch();
        self.notify_save();

        let item_path = self.get_object_path();
        if let Ok(collection_ref) =
            resolve_collection(&self.parent_path.as_ref(), object_server).await
        {
            collection_ref
                .get_mut()
                .await
                .reindex_item_attributes(item_path, value);
        }

        Ok(())
    }

    /// Created property
    #[zbus(property)]
    fn created(&self) -> u64 {
        self.created
    }

    /// Label property
    #[zbus(property)]
    fn label(&self) -> &str {
        &self.label
    }

    #[zbus(property)]
    fn set_label(&mut self, value: &str) {
        let trimmed = value.trim();
        if trimmed == self.label {
            return;
        }
        self.label = trimmed.to_owned();
        self.touch();
        self.notify_save();
    }

    /// Locked property
    #[zbus(property)]
    fn locked(&self) -> bool {
        self.locked
    }

    /// Modified property
    #[zbus(property)]
    fn modified(&self) -> u64 {
        self.modified
    }
}
