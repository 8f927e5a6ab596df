//! Implementation of `org.freedesktop.Secret.Service` D-Bus interface: the
//! single well-known entry point at `/org/freedesktop/secrets`, tracking only
//! lightweight indices over collections that live independently on the bus.
use std::collections;

use crate::bus::DbusObject;
use crate::collection;
use crate::error;
use crate::item;
use crate::secret;
use crate::session;

#[derive(Debug)]
pub struct Service {
    pub aliases: collections::HashMap<String, zvariant::OwnedObjectPath>,
    pub collections: collections::HashSet<zvariant::OwnedObjectPath>,
    pub object_path: zvariant::OwnedObjectPath,
    save_tx: tokio::sync::mpsc::UnboundedSender<()>,
}

impl DbusObject for Service {
    fn get_object_path(&self) -> zvariant::OwnedObjectPath {
        self.object_path.clone()
    }
}

impl Service {
    pub fn new(save_tx: tokio::sync::mpsc::UnboundedSender<()>) -> Self {
        let object_path = zvariant::OwnedObjectPath::try_from("/org/freedesktop/secrets")
            .expect("hard-coded object path value shouldn't fail conversion");

        Self {
            aliases: collections::HashMap::new(),
            collections: collections::HashSet::new(),
            object_path,
            save_tx,
        }
    }

    fn notify_save(&self) {
        let _ = self.save_tx.send(());
    }

    pub fn save_tx(&self) -> tokio::sync::mpsc::UnboundedSender<()> {
        self.save_tx.clone()
    }

    pub fn try_insert_collection_alias(
        &mut self,
        object_path: zvariant::OwnedObjectPath,
        alias: &str,
    ) -> Result<(), error::Error> {
        match self.aliases.entry(alias.to_owned()) {
            collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(object_path);
                Ok(())
            }
            collections::hash_map::Entry::Occupied(entry) => {
                Err(error::Error::CollectionAliasExists(entry.key().to_owned()))
            }
        }
    }

    pub fn collection_exists(&self, object_path: &zvariant::ObjectPath<'_>) -> bool {
        self.collections
            .iter()
            .any(|path| path.as_str() == object_path.as_str())
    }

    /// Register the fixed `default` collection. Only called on first boot;
    /// a restored database already has it indexed.
    pub async fn create_default_collection(
        &mut self,
        object_server: &zbus::ObjectServer,
    ) -> Result<zvariant::OwnedObjectPath, error::Error> {
        let collection =
            collection::Collection::new_default(self.object_path.clone(), self.save_tx.clone());
        let (path, _) = collection.serve_at(object_server).await?;

        self.collections.insert(path.clone());
        self.try_insert_collection_alias(path.clone(), "default")?;

        Ok(path)
    }
}

#[zbus::interface(name = "org.freedesktop.Secret.Service")]
impl Service {
    /// CreateCollection method
    async fn create_collection(
        &mut self,
        properties: collection::CollectionReadWriteProperties,
        alias: &str,
        #[zbus(signal_emitter)] emitter: zbus::object_server::SignalEmitter<'_>,
        #[zbus(object_server)] object_server: &zbus::ObjectServer,
    ) -> Result<(zvariant::OwnedObjectPath, zvariant::OwnedObjectPath), error::Error> {
        let prompt = zvariant::OwnedObjectPath::try_from("/")
            .expect("well-known path should not fail");

        if !alias.is_empty() {
            if let Some(existing) = self.aliases.get(alias) {
                return Ok((existing.clone(), prompt));
            }
        }

        let collection_id = uuid::Uuid::new_v4();
        let object_path =
            collection::derive_object_path(&collection_id, &properties.label, &self.collections);
        let new_collection = collection::Collection::new(
            collection_id,
            &properties.label,
            (!alias.is_empty()).then_some(alias),
            object_path,
            collections::HashMap::new(),
            self.object_path.clone(),
            self.save_tx.clone(),
        );

        let (collection_path, _) = new_collection.serve_at(object_server).await?;
        self.collections.insert(collection_path.clone());

        if !alias.is_empty() {
            self.try_insert_collection_alias(collection_path.clone(), alias)?;
        }

        emitter.collection_created().await?;
        self.notify_save();

        log::info!("Created collection at '{collection_path}'");

        Ok((collection_path, prompt))
    }

    /// GetSecrets method
    async fn get_secrets(
        &self,
        items: Vec<zvariant::ObjectPath<'_>>,
        session: zvariant::ObjectPath<'_>,
        #[zbus(object_server)] object_server: &zbus::ObjectServer,
    ) -> Result<collections::HashMap<zvariant::OwnedObjectPath, secret::Secret>, error::Error> {
        // The session itself must be known regardless of how many items
        // resolve; only unresolvable *items* are skipped silently.
        session::Session::get_interface_from_object_path(&session, object_server)
            .await
            .map_err(|_| error::Error::NoSession(session.as_str().to_owned()))?;

        let mut secrets_map = collections::HashMap::new();

        for item_path in items.iter() {
            let item_ref =
                match item::Item::get_interface_from_object_path(item_path, object_server).await {
                    Ok(item_ref) => item_ref,
                    Err(_) => continue,
                };
            let item = item_ref.get().await;
            if item.locked {
                continue;
            }

            let collection_locked = match collection::Collection::get_interface_from_object_path(
                &item.parent_path.as_ref(),
                object_server,
            )
            .await
            {
                Ok(collection_ref) => collection_ref.get().await.locked,
                Err(_) => true,
            };
            if collection_locked {
                continue;
            }

            let secret = item.get_secret(session.clone(), object_server).await?;
            secrets_map.insert(item_path.to_owned().into(), secret);
        }

        Ok(secrets_map)
    }

    /// Lock method
    async fn lock(
        &mut self,
        objects: Vec<zvariant::ObjectPath<'_>>,
        #[zbus(object_server)] object_server: &zbus::ObjectServer,
    ) -> Result<(Vec<zvariant::OwnedObjectPath>, zvariant::OwnedObjectPath), error::Error> {
        let mut locked = Vec::new();

        for object in objects.iter() {
            if let Ok(collection_ref) =
                collection::Collection::get_interface_from_object_path(object, object_server)
                    .await
            {
                let mut collection = collection_ref.get_mut().await;
                if !collection.locked {
                    collection.locked = true;
                    locked.push(object.to_owned().into());
                }
                continue;
            }

            if let Ok(item_ref) =
                item::Item::get_interface_from_object_path(object, object_server).await
            {
                let mut item = item_ref.get_mut().await;
                if !item.locked {
                    item.locked = true;
                    locked.push(object.to_owned().into());
                }
            }
        }

        if !locked.is_empty() {
            self.notify_save();
        }

        Ok((
            locked,
            zvariant::OwnedObjectPath::try_from("/").expect("well-known path should not fail"),
        ))
    }

    /// OpenSession method
    async fn open_session(
        &mut self,
        algorithm: &str,
        input: zvariant::Value<'_>,
        #[zbus(object_server)] object_server: &zbus::ObjectServer,
    ) -> Result<(zvariant::OwnedValue, zvariant::OwnedObjectPath), error::Error> {
        let session_id = uuid::Uuid::new_v4();

        let (new_session, output): (session::Session, zvariant::OwnedValue) = match algorithm {
            "plain" => {
                let input_str: String = input.try_into().map_err(|_| {
                    error::Error::InvalidSignature(
                        "OpenSession".to_owned(),
                        "expected a string for 'input' with the 'plain' algorithm".to_owned(),
                    )
                })?;
                if !input_str.is_empty() {
                    return Err(error::Error::InvalidArgs(
                        "OpenSession".to_owned(),
                        format!("expected empty string for 'input', got: {input_str}"),
                    ));
                }

                let session = session::Session::new(&session_id).plain();
                let output = zvariant::Value::new("")
                    .try_to_owned()
                    .expect("empty string always convertible");
                (session, output)
            }
            "dh-ietf1024-sha256-aes128-cbc-pkcs7" => {
                let client_public_key: Vec<u8> = input.try_into().map_err(|_| {
                    error::Error::InvalidSignature(
                        "OpenSession".to_owned(),
                        "expected a byte array public key for DH key exchange".to_owned(),
                    )
                })?;

                let (session, server_public_key) =
                    session::Session::new(&session_id).dh(&client_public_key)?;
                let output = zvariant::Value::new(server_public_key.to_vec())
                    .try_to_owned()
                    .expect("byte vector always convertible");
                (session, output)
            }
            other => return Err(error::Error::AlgorithmUnsupported(other.to_owned())),
        };

        let (session_path, _) = new_session.serve_at(object_server).await?;
        log::info!("Opened session on '{session_path}'");

        Ok((output, session_path))
    }

    /// ReadAlias method
    fn read_alias(&self, name: &str) -> zvariant::OwnedObjectPath {
        self.aliases.get(name).cloned().unwrap_or_else(|| {
            zvariant::OwnedObjectPath::try_from("/").expect("well-known path should not fail")
        })
    }

    /// SearchItems method
    ///
    /// Unlike `Collection.SearchItems`, this requires a full subset match:
    /// every key/value pair in `attributes` must be present on the item.
    async fn search_items(
        &self,
        attributes: collections::HashMap<String, String>,
        #[zbus(object_server)] object_server: &zbus::ObjectServer,
    ) -> Result<
        (Vec<zvariant::OwnedObjectPath>, Vec<zvariant::OwnedObjectPath>),
        error::Error,
    > {
        let mut unlocked = Vec::new();
        let mut locked = Vec::new();

        for collection_path in self.collections.iter() {
            let collection_ref = match collection::Collection::get_interface_from_object_path(
                &collection_path.as_ref(),
                object_server,
            )
            .await
            {
                Ok(collection_ref) => collection_ref,
                Err(_) => continue,
            };

            let matches = {
                let collection = collection_ref.get().await;
                collection.full_match_items(&attributes)
            };

            for item_path in matches {
                let item_locked = match item::Item::get_interface_from_object_path(
                    &item_path.as_ref(),
                    object_server,
                )
                .await
                {
                    Ok(item_ref) => item_ref.get().await.locked,
                    Err(_) => continue,
                };

                if item_locked {
                    locked.push(item_path);
                } else {
                    unlocked.push(item_path);
                }
            }
        }

        Ok((unlocked, locked))
    }

    /// SetAlias method
    ///
    /// `name == "/"` clears the collection's alias; any other `name` sets
    /// it, replacing whatever alias the collection previously held. The
    /// default collection's alias can never be reassigned.
    async fn set_alias(
        &mut self,
        name: &str,
        collection: zvariant::ObjectPath<'_>,
        #[zbus(object_server)] object_server: &zbus::ObjectServer,
        #[zbus(signal_emitter)] emitter: zbus::object_server::SignalEmitter<'_>,
    ) -> Result<(), error::Error> {
        if collection.as_str() == "/org/freedesktop/secrets/aliases/default" {
            return Err(error::Error::NotSupported(
                "the 'default' collection's alias cannot be reassigned".to_owned(),
            ));
        }

        if !self.collection_exists(&collection) {
            return Err(error::Error::NoSuchObject(collection.as_str().to_owned()));
        }

        let collection_ref =
            collection::Collection::get_interface_from_object_path(&collection, object_server)
                .await?;
        {
            let mut collection_guard = collection_ref.get_mut().await;

            if let Some(old_alias) = collection_guard.alias.take() {
                self.aliases.remove(&old_alias);
            }

            if name != "/" {
                self.aliases
                    .insert(name.to_owned(), collection.to_owned().into());
                collection_guard.alias = Some(name.to_owned());
            }

            collection_guard.touch();
        }

        emitter.collection_changed().await?;
        self.notify_save();

        Ok(())
    }

    /// Unlock method
    async fn unlock(
        &mut self,
        objects: Vec<zvariant::ObjectPath<'_>>,
        #[zbus(object_server)] object_server: &zbus::ObjectServer,
    ) -> Result<(Vec<zvariant::OwnedObjectPath>, zvariant::OwnedObjectPath), error::Error> {
        let mut unlocked = Vec::new();

        for object in objects.iter() {
            if let Ok(collection_ref) =
                collection::Collection::get_interface_from_object_path(object, object_server)
                    .await
            {
                let mut collection = collection_ref.get_mut().await;
                if collection.locked {
                    collection.locked = false;
                    collection.touch();
                    unlocked.push(object.to_owned().into());
                }
                continue;
            }

            if let Ok(item_ref) =
                item::Item::get_interface_from_object_path(object, object_server).await
            {
                let mut item = item_ref.get_mut().await;
                if item.locked {
                    item.locked = false;
                    item.touch();
                    unlocked.push(object.to_owned().into());
                }
            }
        }

        if !unlocked.is_empty() {
            self.notify_save();
        }

        Ok((
            unlocked,
            zvariant::OwnedObjectPath::try_from("/").expect("well-known path should not fail"),
        ))
    }

    /// CollectionChanged signal
    #[zbus(signal)]
    pub async fn collection_changed(
        emitter: &zbus::object_server::SignalEmitter<'_>,
    ) -> zbus::Result<()>;

    /// CollectionCreated signal
    #[zbus(signal)]
    async fn collection_created(
        emitter: &zbus::object_server::SignalEmitter<'_>,
    ) -> zbus::Result<()>;

    /// CollectionDeleted signal
    #[zbus(signal)]
    pub async fn collection_deleted(
        emitter: &zbus::object_server::SignalEmitter<'_>,
    ) -> zbus::Result<()>;

    /// Collections property
    #[zbus(property)]
    fn collections(&self) -> Vec<zvariant::ObjectPath<'_>> {
        self.collections.iter().map(|path| path.as_ref()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence;
    use crate::server;
    use std::time;

    /// Run a `org.freedesktop.Secret.Service` server.
    ///
    /// This coroutine is meant to be awaited at the beginning of each test
    /// function that will be making calls to test the server.
    /// It returns a handle that **must** be aborted once the test is done,
    /// as otherwise the task **runs forever**.
    async fn run_service_server() -> (String, tokio::task::JoinHandle<()>) {
        let start_event = event_listener::Event::new();
        let start_event_listener = start_event.listen();
        let mut dbus_name = "org.freedesktop.secrets-test-".to_owned();
        let dbus_id = uuid::Uuid::new_v4();
        dbus_name.push_str(
            dbus_id
                .as_simple()
                .encode_lower(&mut uuid::Uuid::encode_buffer()),
        );

        let cloned_dbus_name = dbus_name.clone();
        let run_server_handle = tokio::spawn(async move {
            let server = server::SecretServiceServer::new(
                &cloned_dbus_name,
                start_event,
                persistence::Config::ephemeral(),
            )
            .await
            .unwrap();
            server.run().await.unwrap();
        });

        if tokio::time::timeout(time::Duration::from_secs(10), start_event_listener)
            .await
            .is_err()
        {
            if run_server_handle.is_finished() {
                run_server_handle.await.unwrap();
                panic!("Server exited early without an error");
            } else {
                panic!("Took too long to start test dbus server");
            }
        }

        (dbus_name, run_server_handle)
    }

    #[tokio::test]
    async fn test_create_collection() -> Result<(), error::Error> {
        let (dbus_name, run_server_handle) = run_service_server().await;

        let connection = zbus::Connection::session().await?;
        let collection_properties = collections::HashMap::from([(
            "org.freedesktop.Secret.Collection.Label",
            zvariant::Value::new("test-label"),
        )]);

        let reply = connection
            .call_method(
                Some(dbus_name),
                "/org/freedesktop/secrets",
                Some("org.freedesktop.Secret.Service"),
                "CreateCollection",
                &(collection_properties, ""),
            )
            .await
            .unwrap();

        let body = reply.body();
        let (collection_object_path, prompt): (zvariant::ObjectPath<'_>, zvariant::ObjectPath<'_>) =
            body.deserialize().unwrap();

        run_server_handle.abort();
        assert!(run_server_handle.await.unwrap_err().is_cancelled());

        assert!(collection_object_path
            .as_str()
            .starts_with("/org/freedesktop/secrets/collection/"));
        assert_eq!(prompt.as_str(), "/");

        Ok(())
    }

    #[tokio::test]
    async fn test_create_collection_returns_existing_object_path() -> Result<(), error::Error> {
        let (dbus_name, run_server_handle) = run_service_server().await;

        let connection = zbus::Connection::session().await?;
        let collection_properties = collections::HashMap::from([(
            "org.freedesktop.Secret.Collection.Label",
            zvariant::Value::new("test-label"),
        )]);
        let connection_alias = "my-collection".to_owned();

        let reply = connection
            .call_method(
                Some(dbus_name.as_str()),
                "/org/freedesktop/secrets",
                Some("org.freedesktop.Secret.Service"),
                "CreateCollection",
                &(&collection_properties, &connection_alias),
            )
            .await
            .unwrap();

        let body = reply.body();
        let (collection_object_path, prompt): (zvariant::ObjectPath<'_>, zvariant::ObjectPath<'_>) =
            body.deserialize().unwrap();

        assert!(collection_object_path
            .as_str()
            .starts_with("/org/freedesktop/secrets/collection/"));
        assert_eq!(prompt.as_str(), "/");

        let reply = connection
            .call_method(
                Some(dbus_name.as_str()),
                "/org/freedesktop/secrets",
                Some("org.freedesktop.Secret.Service"),
                "CreateCollection",
                &(&collection_properties, &connection_alias),
            )
            .await
            .unwrap();

        let body = reply.body();
        let (new_collection_object_path, new_prompt): (
            zvariant::ObjectPath<'_>,
            zvariant::ObjectPath<'_>,
        ) = body.deserialize().unwrap();

        run_server_handle.abort();
        assert!(run_server_handle.await.unwrap_err().is_cancelled());

        assert_eq!(new_collection_object_path, collection_object_path);
        assert_eq!(new_prompt, prompt);

        Ok(())
    }

    #[tokio::test]
    async fn test_collections_property() -> Result<(), error::Error> {
        let (dbus_name, run_server_handle) = run_service_server().await;

        let connection = zbus::Connection::session().await?;
        let collection_properties = collections::HashMap::from([(
            "org.freedesktop.Secret.Collection.Label",
            zvariant::Value::new("test-label"),
        )]);

        let reply = connection
            .call_method(
                Some(dbus_name.as_str()),
                "/org/freedesktop/secrets",
                Some("org.freedesktop.Secret.Service"),
                "CreateCollection",
                &(collection_properties, ""),
            )
            .await
            .unwrap();

        let body = reply.body();
        let (collection_object_path, _): (zvariant::ObjectPath<'_>, zvariant::ObjectPath<'_>) =
            body.deserialize().unwrap();

        let reply = connection
            .call_method(
                Some(dbus_name.as_str()),
                "/org/freedesktop/secrets",
                Some("org.freedesktop.DBus.Properties"),
                "Get",
                &(
                    "org.freedesktop.Secret.Service".to_string(),
                    "Collections".to_string(),
                ),
            )
            .await
            .unwrap();

        let body = reply.body();
        let collections_value = body.deserialize::<zvariant::Value>().unwrap();
        let collections: Vec<zvariant::ObjectPath<'_>> = collections_value.downcast().unwrap();

        run_server_handle.abort();
        assert!(run_server_handle.await.unwrap_err().is_cancelled());

        // Includes default collection besides the one we have created.
        assert_eq!(collections.len(), 2);
        assert!(collections.contains(&collection_object_path));
        let default_collection_path =
            zvariant::ObjectPath::try_from("/org/freedesktop/secrets/aliases/default").unwrap();
        assert!(collections.contains(&default_collection_path));

        Ok(())
    }

    #[tokio::test]
    async fn test_read_alias() -> Result<(), error::Error> {
        let (dbus_name, run_server_handle) = run_service_server().await;

        let connection = zbus::Connection::session().await?;
        let collection_properties = collections::HashMap::from([(
            "org.freedesktop.Secret.Collection.Label",
            zvariant::Value::new("test-label"),
        )]);
        let collection_alias = "collection-alias".to_owned();

        let reply = connection
            .call_method(
                Some(dbus_name.as_str()),
                "/org/freedesktop/secrets",
                Some("org.freedesktop.Secret.Service"),
                "CreateCollection",
                &(collection_properties, &collection_alias),
            )
            .await
            .unwrap();

        let body = reply.body();
        let (collection_object_path, _): (zvariant::ObjectPath<'_>, zvariant::ObjectPath<'_>) =
            body.deserialize().unwrap();

        assert_ne!(
            collection_object_path,
            zvariant::ObjectPath::try_from("/").unwrap()
        );

        let reply = connection
            .call_method(
                Some(dbus_name.as_str()),
                "/org/freedesktop/secrets",
                Some("org.freedesktop.Secret.Service"),
                "ReadAlias",
                &(&collection_alias),
            )
            .await
            .unwrap();

        let body = reply.body();
        let new_collection_object_path: zvariant::ObjectPath<'_> = body.deserialize().unwrap();

        run_server_handle.abort();
        assert!(run_server_handle.await.unwrap_err().is_cancelled());

        assert_eq!(new_collection_object_path, collection_object_path);

        Ok(())
    }

    #[tokio::test]
    async fn test_set_alias_updates_collection_alias() -> Result<(), error::Error> {
        let (dbus_name, run_server_handle) = run_service_server().await;

        let connection = zbus::Connection::session().await?;
        let collection_properties = collections::HashMap::from([(
            "org.freedesktop.Secret.Collection.Label",
            zvariant::Value::new("test-label"),
        )]);

        let reply = connection
            .call_method(
                Some(dbus_name.as_str()),
                "/org/freedesktop/secrets",
                Some("org.freedesktop.Secret.Service"),
                "CreateCollection",
                &(collection_properties, ""),
            )
            .await
            .unwrap();

        let body = reply.body();
        let (collection_object_path, _): (zvariant::ObjectPath<'_>, zvariant::ObjectPath<'_>) =
            body.deserialize().unwrap();

        let collection_alias = "new-alias".to_owned();
        let reply = connection
            .call_method(
                Some(dbus_name.as_str()),
                "/org/freedesktop/secrets",
                Some("org.freedesktop.Secret.Service"),
                "SetAlias",
                &(&collection_alias, &collection_object_path),
            )
            .await
            .unwrap();

        let body = reply.body();
        let _: () = body.deserialize().unwrap();

        let reply = connection
            .call_method(
                Some(dbus_name.as_str()),
                "/org/freedesktop/secrets",
                Some("org.freedesktop.Secret.Service"),
                "ReadAlias",
                &(&collection_alias),
            )
            .await
            .unwrap();

        let body = reply.body();
        let new_collection_object_path: zvariant::ObjectPath<'_> = body.deserialize().unwrap();

        run_server_handle.abort();
        assert!(run_server_handle.await.unwrap_err().is_cancelled());

        assert_eq!(new_collection_object_path, collection_object_path);

        Ok(())
    }

    #[tokio::test]
    async fn test_set_alias_name_slash_clears_the_alias() -> Result<(), error::Error> {
        let (dbus_name, run_server_handle) = run_service_server().await;

        let connection = zbus::Connection::session().await?;
        let collection_properties = collections::HashMap::from([(
            "org.freedesktop.Secret.Collection.Label",
            zvariant::Value::new("test-label"),
        )]);

        let reply = connection
            .call_method(
                Some(dbus_name.as_str()),
                "/org/freedesktop/secrets",
                Some("org.freedesktop.Secret.Service"),
                "CreateCollection",
                &(collection_properties, ""),
            )
            .await
            .unwrap();

        let body = reply.body();
        let (collection_object_path, _): (zvariant::ObjectPath<'_>, zvariant::ObjectPath<'_>) =
            body.deserialize().unwrap();

        connection
            .call_method(
                Some(dbus_name.as_str()),
                "/org/freedesktop/secrets",
                Some("org.freedesktop.Secret.Service"),
                "SetAlias",
                &("before", &collection_object_path),
            )
            .await
            .unwrap();

        connection
            .call_method(
                Some(dbus_name.as_str()),
                "/org/freedesktop/secrets",
                Some("org.freedesktop.Secret.Service"),
                "SetAlias",
                &("after", &collection_object_path),
            )
            .await
            .unwrap();

        connection
            .call_method(
                Some(dbus_name.as_str()),
                "/org/freedesktop/secrets",
                Some("org.freedesktop.Secret.Service"),
                "SetAlias",
                &("/", &collection_object_path),
            )
            .await
            .unwrap();

        let read_alias = |name: &'static str| {
            let connection = connection.clone();
            let dbus_name = dbus_name.clone();
            async move {
                let reply = connection
                    .call_method(
                        Some(dbus_name.as_str()),
                        "/org/freedesktop/secrets",
                        Some("org.freedesktop.Secret.Service"),
                        "ReadAlias",
                        &(name),
                    )
                    .await
                    .unwrap();
                let body = reply.body();
                let path: zvariant::ObjectPath<'_> = body.deserialize().unwrap();
                path.as_str().to_owned()
            }
        };

        let before_path = read_alias("before").await;
        let after_path = read_alias("after").await;

        run_server_handle.abort();
        assert!(run_server_handle.await.unwrap_err().is_cancelled());

        assert_eq!(before_path, "/");
        assert_eq!(after_path, "/");

        Ok(())
    }

    #[tokio::test]
    async fn test_set_alias_rejects_default_reassignment() -> Result<(), error::Error> {
        let (dbus_name, run_server_handle) = run_service_server().await;

        let connection = zbus::Connection::session().await?;
        let default_collection_path =
            zvariant::ObjectPath::try_from("/org/freedesktop/secrets/aliases/default").unwrap();

        let result = connection
            .call_method(
                Some(dbus_name.as_str()),
                "/org/freedesktop/secrets",
                Some("org.freedesktop.Secret.Service"),
                "SetAlias",
                &("anything", &default_collection_path),
            )
            .await;

        run_server_handle.abort();
        assert!(run_server_handle.await.unwrap_err().is_cancelled());

        assert!(result.is_err());

        Ok(())
    }

    #[tokio::test]
    async fn test_get_secrets_rejects_unknown_session_with_no_resolvable_items(
    ) -> Result<(), error::Error> {
        let (dbus_name, run_server_handle) = run_service_server().await;

        let connection = zbus::Connection::session().await?;
        let bogus_session =
            zvariant::ObjectPath::try_from("/org/freedesktop/secrets/session/doesnotexist")
                .unwrap();
        let no_items: Vec<zvariant::ObjectPath<'_>> = Vec::new();

        let result = connection
            .call_method(
                Some(dbus_name.as_str()),
                "/org/freedesktop/secrets",
                Some("org.freedesktop.Secret.Service"),
                "GetSecrets",
                &(&no_items, &bogus_session),
            )
            .await;

        run_server_handle.abort();
        assert!(run_server_handle.await.unwrap_err().is_cancelled());

        assert!(result.is_err());

        Ok(())
    }

    #[tokio::test]
    async fn test_open_session_plain_rejects_non_empty_input() -> Result<(), error::Error> {
        let (dbus_name, run_server_handle) = run_service_server().await;

        let connection = zbus::Connection::session().await?;
        let result = connection
            .call_method(
                Some(dbus_name.as_str()),
                "/org/freedesktop/secrets",
                Some("org.freedesktop.Secret.Service"),
                "OpenSession",
                &("plain", zvariant::Value::new("not-empty")),
            )
            .await;

        run_server_handle.abort();
        assert!(run_server_handle.await.unwrap_err().is_cancelled());

        assert!(result.is_err());

        Ok(())
    }

    #[tokio::test]
    async fn test_open_session_plain_rejects_non_string_input() -> Result<(), error::Error> {
        let (dbus_name, run_server_handle) = run_service_server().await;

        let connection = zbus::Connection::session().await?;
        let result = connection
            .call_method(
                Some(dbus_name.as_str()),
                "/org/freedesktop/secrets",
                Some("org.freedesktop.Secret.Service"),
                "OpenSession",
                &("plain", zvariant::Value::new(42u32)),
            )
            .await;

        run_server_handle.abort();
        assert!(run_server_handle.await.unwrap_err().is_cancelled());

        assert!(result.is_err());

        Ok(())
    }
}
