use aws_sdk_s3::primitives::DateTime as SdkDateTime;
use aws_sdk_s3::types;
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bucket {
    pub name: String,
    pub creation_date: Option<DateTime<Utc>>,
}

/// An object, or a common prefix when listing non-recursively
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
    pub is_prefix: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListObjectsOptions {
    pub prefix: Option<String>,
    /// Descend below `/`; otherwise deeper keys collapse into prefixes
    pub recursive: bool,
    /// Page size hint sent as `max-keys`
    pub max_keys: Option<u32>,
}

impl ListObjectsOptions {
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub(crate) fn delimiter(&self) -> Option<String> {
        (!self.recursive).then(|| "/".to_string())
    }
}

impl Bucket {
    /// `None` for entries the store listed without a name
    pub(crate) fn from_sdk(bucket: &types::Bucket) -> Option<Self> {
        Some(Self {
            name: bucket.name()?.to_string(),
            creation_date: bucket.creation_date().and_then(to_chrono),
        })
    }
}

impl ObjectInfo {
    pub(crate) fn from_object(object: &types::Object) -> Option<Self> {
        Some(Self {
            key: object.key()?.to_string(),
            size: object
                .size()
                .and_then(|size| u64::try_from(size).ok())
                .unwrap_or(0),
            last_modified: object.last_modified().and_then(to_chrono),
            etag: object.e_tag().map(|etag| etag.trim_matches('"').to_string()),
            is_prefix: false,
        })
    }

    pub(crate) fn from_prefix(prefix: &types::CommonPrefix) -> Option<Self> {
        Some(Self {
            key: prefix.prefix()?.to_string(),
            size: 0,
            last_modified: None,
            etag: None,
            is_prefix: true,
        })
    }
}

fn to_chrono(time: &SdkDateTime) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(time.secs(), time.subsec_nanos()).single()
}
