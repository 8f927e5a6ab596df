/// The `(session, parameters, value, content-type)` tuple carried on the wire
/// for every secret exchange, per the freedesktop.org Secret Service
/// transfer-secrets conventions.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize, zvariant::Type)]
pub struct Secret {
    pub session: zvariant::OwnedObjectPath,
    pub parameters: Vec<u8>,
    pub value: Vec<u8>,
    pub content_type: String,
}

/// Content type used for `Plain`-session secrets and as the default for items
/// that were never given an explicit content type.
pub const DEFAULT_CONTENT_TYPE: &str = "text/plain; charset=utf8";
