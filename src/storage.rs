use anyhow::Context;
use async_trait::async_trait;
use aws_config::{defaults, BehaviorVersion};
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    config::{Builder as S3ConfigBuilder, Region},
    Client,
};
use aws_smithy_types::byte_stream::ByteStream;
use bytes::Bytes;
use tracing::debug;
use uuid::Uuid;

use crate::config::MediaConfig;

/// Remote object store holding user media. Returns a URL clients can fetch directly.
#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn upload(&self, folder: &str, body: Bytes, content_type: &str)
        -> anyhow::Result<String>;
}

/// S3 / MinIO backed media store.
#[derive(Clone)]
pub struct Storage {
    client: Client,
    bucket: String,
    public_url: String,
}

impl Storage {
    pub async fn new(cfg: &MediaConfig) -> anyhow::Result<Self> {
        let shared = defaults(BehaviorVersion::latest())
            .region(Region::new(cfg.region.clone()))
            .credentials_provider(Credentials::new(
                &cfg.access_key,
                &cfg.secret_key,
                None,
                None,
                "static",
            ))
            .endpoint_url(&cfg.endpoint)
            .load()
            .await;

        let conf = S3ConfigBuilder::from(&shared)
            .endpoint_url(&cfg.endpoint)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: Client::from_conf(conf),
            bucket: cfg.bucket.clone(),
            public_url: cfg.public_url.clone(),
        })
    }
}

#[async_trait]
impl MediaStore for Storage {
    async fn upload(
        &self,
        folder: &str,
        body: Bytes,
        content_type: &str,
    ) -> anyhow::Result<String> {
        let key = object_key(folder, Uuid::new_v4(), content_type);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .with_context(|| format!("s3 put_object {key}"))?;
        debug!(key = %key, "object stored");
        Ok(public_url(&self.public_url, &self.bucket, &key))
    }
}

pub(crate) fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        "image/heic" => Some("heic"),
        _ => None,
    }
}

fn object_key(folder: &str, id: Uuid, content_type: &str) -> String {
    let ext = ext_from_mime(content_type).unwrap_or("bin");
    format!("{}/{}.{}", folder.trim_matches('/'), id, ext)
}

fn public_url(base: &str, bucket: &str, key: &str) -> String {
    format!("{}/{}/{}", base.trim_end_matches('/'), bucket, key)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ext_from_mime() {
        assert_eq!(ext_from_mime("image/jpeg"), Some("jpg"));
        assert_eq!(ext_from_mime("image/jpg"), Some("jpg"));
        assert_eq!(ext_from_mime("image/png"), Some("png"));
        assert_eq!(ext_from_mime("image/webp"), Some("webp"));
        assert_eq!(ext_from_mime("application/octet-stream"), None);
    }

    #[test]
    fn object_key_lives_under_folder() {
        let id = Uuid::nil();
        assert_eq!(
            object_key("avatars", id, "image/png"),
            format!("avatars/{id}.png")
        );
        assert_eq!(
            object_key("/avatars/", id, "image/x-unknown"),
            format!("avatars/{id}.bin")
        );
    }

    #[test]
    fn public_url_joins_without_double_slash() {
        assert_eq!(
            public_url("https://cdn.example.com/", "media", "avatars/a.png"),
            "https://cdn.example.com/media/avatars/a.png"
        );
    }
}
