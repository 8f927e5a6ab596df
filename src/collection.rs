//! Implementation of `org.freedesktop.Secret.Collection` D-Bus interface: a
//! named group of items, independently lockable and addressable on its own
//! object path.
use std::collections;
use std::time;

use crate::bus::{sanitize_property_bag, DbusObject};
use crate::error;
use crate::item;
use crate::service;

#[derive(Debug)]
pub struct Collection {
    pub alias: Option<String>,
    pub created: u64,
    pub id: uuid::Uuid,
    pub label: String,
    pub locked: bool,
    /// This collection's own items, addressable on their own object paths.
    pub items: collections::HashSet<zvariant::OwnedObjectPath>,
    /// Lookup-attribute cache kept in step with `items`, so search stays a
    /// plain in-memory scan instead of re-resolving every item through the
    /// bus on each query.
    pub items_with_attributes:
        collections::HashMap<zvariant::OwnedObjectPath, collections::HashMap<String, String>>,
    pub modified: u64,
    pub object_path: zvariant::OwnedObjectPath,
    pub parent_path: zvariant::OwnedObjectPath,
    pub properties: collections::HashMap<String, String>,
    save_tx: tokio::sync::mpsc::UnboundedSender<()>,
}

#[derive(zvariant::DeserializeDict, zvariant::SerializeDict, zvariant::Type)]
#[zvariant(signature = "dict")]
pub struct CollectionReadWriteProperties {
    #[zvariant(rename = "org.freedesktop.Secret.Collection.Label")]
    pub label: String,
}

const RESERVED_COLLECTION_SUFFIXES: &[&str] =
    &[".Items", ".Label", ".Locked", ".Created", ".Modified"];

impl DbusObject for Collection {
    fn get_object_path(&self) -> zvariant::OwnedObjectPath {
        self.object_path.clone()
    }
}

fn now_seconds() -> u64 {
    time::SystemTime::now()
        .duration_since(time::SystemTime::UNIX_EPOCH)
        .expect("current SystemTime before UNIX EPOCH")
        .as_secs()
}

/// Derive a collection object path from its label, falling back to the
/// collection's own uuid when the label slugifies to nothing or collides
/// with an existing sibling.
pub fn derive_object_path(
    id: &uuid::Uuid,
    label: &str,
    existing: &collections::HashSet<zvariant::OwnedObjectPath>,
) -> zvariant::OwnedObjectPath {
    let slug = crate::bus::label_slug(label);
    if !slug.is_empty() {
        let candidate = format!("/org/freedesktop/secrets/collection/{}", slug);
        if !existing.iter().any(|p| p.as_str() == candidate) {
            return zvariant::ObjectPath::from_str_unchecked(&candidate).into();
        }
    }

    let mut fallback = "/org/freedesktop/secrets/collection/".to_owned();
    fallback.push_str(
        id.as_simple()
            .encode_lower(&mut uuid::Uuid::encode_buffer()),
    );
    zvariant::ObjectPath::from_str_unchecked(&fallback).into()
}

impl Collection {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: uuid::Uuid,
        label: &str,
        alias: Option<&str>,
        object_path: zvariant::OwnedObjectPath,
        properties: collections::HashMap<String, zvariant::OwnedValue>,
        parent_path: zvariant::OwnedObjectPath,
        save_tx: tokio::sync::mpsc::UnboundedSender<()>,
    ) -> Self {
        let created = now_seconds();

        Self {
            id,
            alias: alias.map(|s| s.to_owned()),
            created,
            items: collections::HashSet::new(),
            label: label.to_owned(),
            locked: false,
            items_with_attributes: collections::HashMap::new(),
            modified: created,
            object_path,
            parent_path,
            properties: sanitize_property_bag(properties, RESERVED_COLLECTION_SUFFIXES),
            save_tx,
        }
    }

    pub fn new_default(
        parent_path: zvariant::OwnedObjectPath,
        save_tx: tokio::sync::mpsc::UnboundedSender<()>,
    ) -> Self {
        let created = now_seconds();

        Self {
            id: uuid::Uuid::new_v4(),
            alias: Some("default".to_owned()),
            created,
            items: collections::HashSet::new(),
            label: "default".to_owned(),
            locked: false,
            items_with_attributes: collections::HashMap::new(),
            modified: created,
            object_path: zvariant::ObjectPath::from_str_unchecked(
                "/org/freedesktop/secrets/aliases/default",
            )
            .into(),
            parent_path,
            properties: collections::HashMap::new(),
            save_tx,
        }
    }

    pub fn touch(&mut self) {
        self.modified = now_seconds();
    }

    pub fn notify_save(&self) {
        let _ = self.save_tx.send(());
    }

    pub fn save_tx(&self) -> tokio::sync::mpsc::UnboundedSender<()> {
        self.save_tx.clone()
    }

    /// Index a newly-created item under this collection. Callers that want
    /// replace-in-place semantics look up the matching sibling themselves
    /// (see `create_item`) and never reach this path for it.
    pub fn insert_item<'a, I>(&mut self, item_object_path: zvariant::OwnedObjectPath, attributes: I)
    where
        I: Iterator<Item = (&'a str, &'a str)>,
    {
        let attributes_map: collections::HashMap<String, String> = attributes
            .map(|(key, value)| (key.to_owned(), value.to_owned()))
            .collect();

        self.items.insert(item_object_path.clone());
        self.items_with_attributes
            .insert(item_object_path, attributes_map);
    }

    /// Drop `item_path` from this collection's indices. Called by
    /// `Item::delete` through an object-server lookup of its parent, since
    /// an item holds no back-pointer to its owning collection.
    pub fn remove_item_from_index(&mut self, item_path: &zvariant::OwnedObjectPath) {
        self.items.remove(item_path);
        self.items_with_attributes.remove(item_path);
    }

    /// Refresh the cached attributes for `item_path`. Called by
    /// `Item::set_attributes` so the collection's search index never
    /// drifts from the item's own `Attributes` property.
    pub fn reindex_item_attributes(
        &mut self,
        item_path: zvariant::OwnedObjectPath,
        attributes: collections::HashMap<String, String>,
    ) {
        self.items_with_attributes.insert(item_path, attributes);
    }

    /// Full subset match: an item is returned only if every key/value pair
    /// in `query` is present among the item's attributes. Used by
    /// `Service.SearchItems`, which is deliberately stricter than
    /// `Collection.SearchItems`.
    pub fn full_match_items(
        &self,
        query: &collections::HashMap<String, String>,
    ) -> Vec<zvariant::OwnedObjectPath> {
        self.items_with_attributes
            .iter()
            .filter_map(|(path, attrs)| {
                if query.iter().all(|(k, v)| attrs.get(k) == Some(v)) {
                    Some(path.clone())
                } else {
                    None
                }
            })
            .collect()
    }

    /// Single-match lookup: an item is returned if ANY of `query`'s
    /// key/value pairs is present among the item's attributes, or if
    /// `query` itself is empty. This is deliberately looser than the
    /// service-wide search, which requires a full subset match.
    pub fn matching_items(
        &self,
        query: &collections::HashMap<String, String>,
    ) -> Vec<zvariant::OwnedObjectPath> {
        self.items_with_attributes
            .iter()
            .filter_map(|(path, attrs)| {
                if query.is_empty() || query.iter().any(|(k, v)| attrs.get(k) == Some(v)) {
                    Some(path.clone())
                } else {
                    None
                }
            })
            .collect()
    }
}

#[zbus::interface(name = "org.freedesktop.Secret.Collection")]
impl Collection {
    /// CreateItem method
    ///
    /// When `replace` is true and another item in this collection already
    /// carries an identical attribute map, that item is overwritten in
    /// place and its object-path is retained rather than a new one minted.
    async fn create_item(
        &mut self,
        properties: item::ItemReadWriteProperties,
        secret: crate::secret::Secret,
        replace: bool,
        #[zbus(signal_emitter)] emitter: zbus::object_server::SignalEmitter<'_>,
        #[zbus(object_server)] object_server: &zbus::ObjectServer,
    ) -> Result<(zvariant::ObjectPath<'_>, zvariant::ObjectPath<'_>), error::Error> {
        let prompt = zvariant::ObjectPath::from_str_unchecked("/");

        let existing_path = if replace {
            self.items_with_attributes
                .iter()
                .find(|(_, attrs)| **attrs == properties.attributes)
                .map(|(path, _)| path.clone())
        } else {
            None
        };

        if let Some(existing_path) = existing_path {
            let (plaintext, content_type) = item::Item::decrypt_wire(secret, object_server).await?;
            let item_ref =
                item::Item::get_interface_from_object_path(&existing_path.as_ref(), object_server)
                    .await?;
            {
                let mut existing_item = item_ref.get_mut().await;
                existing_item.label = properties.label.clone();
                existing_item.secret = plaintext;
                existing_item.content_type = content_type;
                existing_item.touch();
                existing_item.notify_save();
            }

            emitter.item_changed().await?;
            self.touch();
            self.notify_save();

            log::info!("Replaced existing item in place at '{existing_path}'");

            return Ok((existing_path.into(), prompt));
        }

        let new_item = item::Item::new(
            secret,
            &properties.label,
            properties.attributes.clone(),
            collections::HashMap::new(),
            self.object_path.clone(),
            self.save_tx.clone(),
            object_server,
        )
        .await?;
        let (item_path, _) = new_item.serve_at(object_server).await?;

        self.insert_item(
            item_path.clone(),
            properties
                .attributes
                .iter()
                .map(|(key, value)| (key.as_str(), value.as_str())),
        );

        emitter.item_created().await?;
        self.touch();
        self.notify_save();

        log::info!("Created new item on '{item_path}'");

        Ok((item_path.into(), prompt))
    }

    /// Delete method
    pub async fn delete(
        &mut self,
        #[zbus(object_server)] object_server: &zbus::ObjectServer,
    ) -> Result<zvariant::ObjectPath<'_>, error::Error> {
        if self.alias.as_deref() == Some("default") {
            return Err(error::Error::CallFailed(
                "the default collection cannot be deleted".to_owned(),
            ));
        }

        let children: Vec<zvariant::OwnedObjectPath> = self.items.iter().cloned().collect();
        for item_path in children {
            object_server.remove::<item::Item, _>(item_path).await?;
        }
        self.items.clear();
        self.items_with_attributes.clear();

        let service_ref = service::Service::get_interface_from_object_path(
            &self.parent_path.as_ref(),
            object_server,
        )
        .await
        .ok();
        if let Some(service_ref) = &service_ref {
            let mut service_guard = service_ref.get_mut().await;
            service_guard.collections.remove(&self.object_path);
            service_guard
                .aliases
                .retain(|_, path| path != &self.object_path);
        }

        let collection_path = self.get_object_path();
        self.remove(object_server).await?;

        log::info!("Deleted collection on '{collection_path}'");
        if let Some(service_ref) = &service_ref {
            service::Service::collection_deleted(service_ref.signal_emitter()).await?;
        }
        self.notify_save();

        Ok(zvariant::ObjectPath::from_str_unchecked("/"))
    }

    /// SearchItems method
    ///
    /// Uses "single-match" semantics, deliberately looser than
    /// `Service.SearchItems`'s full subset match; see the module docs.
    fn search_items(
        &self,
        attributes: collections::HashMap<String, String>,
    ) -> Vec<zvariant::ObjectPath<'_>> {
        self.matching_items(&attributes)
            .into_iter()
            .map(|p| p.into_inner())
            .collect()
    }

    /// Created property
    #[zbus(property)]
    fn created(&self) -> u64 {
        self.created
    }

    /// Items property
    #[zbus(property)]
    fn items(&self) -> Vec<zvariant::OwnedObjectPath> {
        self.items.iter().cloned().collect()
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

    /// ItemChanged signal
    #[zbus(signal)]
    pub async fn item_changed(emitter: &zbus::object_server::SignalEmitter<'_>)
        -> zbus::Result<()>;

    /// ItemCreated signal
    #[zbus(signal)]
    async fn item_created(emitter: &zbus::object_server::SignalEmitter<'_>) -> zbus::Result<()>;

    /// ItemDeleted signal
    #[zbus(signal)]
    pub async fn item_deleted(emitter: &zbus::object_server::SignalEmitter<'_>)
        -> zbus::Result<()>;
}
