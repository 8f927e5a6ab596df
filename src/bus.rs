//! Small helpers for exporting entities on the message bus as independent
//! objects, so that each `Collection`/`Item`/`Session` is addressable (and
//! lockable) on its own object path instead of living only inside its
//! parent's in-memory map.
//!
//! Parent/child bookkeeping (a collection's set of items, a service's set of
//! collections) holds no back-pointer between the two zbus interfaces.
//! Instead a child stores its parent's object path and re-resolves it
//! through the object server on demand. This avoids ever needing to hold
//! both a parent's and a child's zbus dispatch lock at once, which would
//! otherwise invert the parent-before-child locking order and risk a
//! deadlock against a concurrent call going the other way (e.g. the parent
//! being deleted while a child is being renamed).
use std::collections;

use crate::error;

pub trait DbusObject: zbus::object_server::Interface {
    fn get_object_path(&self) -> zvariant::OwnedObjectPath;

    /// Register `self` at its object path. Returns `(path, is_new)`, where
    /// `is_new` is `false` if an interface of this type was already
    /// registered at that path (the caller's data was not replaced).
    fn serve_at(
        self,
        object_server: &zbus::ObjectServer,
    ) -> impl std::future::Future<Output = Result<(zvariant::OwnedObjectPath, bool), error::Error>> + Send
    where
        Self: Sized,
    {
        async {
            let object_path = self.get_object_path();
            let is_new = object_server.at(object_path.clone(), self).await?;
            Ok((object_path, is_new))
        }
    }

    fn remove(
        &self,
        object_server: &zbus::ObjectServer,
    ) -> impl std::future::Future<Output = Result<bool, error::Error>> + Send
    where
        Self: Sized,
    {
        async {
            let object_path = self.get_object_path();
            Ok(object_server
                .remove::<Self, zvariant::OwnedObjectPath>(object_path)
                .await?)
        }
    }

    fn get_interface_from_object_path<'p>(
        object_path: &'p zvariant::ObjectPath<'_>,
        object_server: &'p zbus::ObjectServer,
    ) -> impl std::future::Future<
        Output = Result<zbus::object_server::InterfaceRef<Self>, error::Error>,
    > + Send
    where
        Self: Sized,
    {
        async move {
            let interface_ref = object_server.interface::<_, Self>(object_path).await?;
            Ok(interface_ref)
        }
    }
}

/// Build a filesystem/object-path-safe slug out of a user-supplied label:
/// lowercase ASCII alphanumerics and underscores only, everything else
/// collapsed to `_`. An empty result signals "fall back to a UUID".
pub fn label_slug(label: &str) -> String {
    let mut slug = String::with_capacity(label.len());
    for c in label.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('_') {
            slug.push('_');
        }
    }
    while slug.ends_with('_') {
        slug.pop();
    }
    slug
}

/// Only string-typed property values cross the property-bag boundary; keys
/// under the given interface's own reserved suffixes are discarded, per the
/// spec's property-key prefix rules.
pub fn sanitize_property_bag(
    bag: collections::HashMap<String, zvariant::OwnedValue>,
    reserved_suffixes: &[&str],
) -> collections::HashMap<String, String> {
    bag.into_iter()
        .filter_map(|(key, value)| {
            if reserved_suffixes.iter().any(|s| key.ends_with(s)) {
                return None;
            }
            let s: Result<zvariant::Str, _> = value.try_into();
            s.ok().map(|s| (key, s.as_str().to_owned()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_slug_lowercases_and_collapses_separators() {
        assert_eq!(label_slug("My Logins!!"), "my_logins");
        assert_eq!(label_slug("  leading"), "leading");
        assert_eq!(label_slug("trailing  "), "trailing");
        assert_eq!(label_slug("???"), "");
    }
}
