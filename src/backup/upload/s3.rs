use crate::backup::function_path;
use crate::backup::redacted::RedactedString;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use crate::backup::upload::UploadTarget;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bon::Builder;
use function_name::named;
use getset::Getters;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::path::Path;
use validator::{Validate, ValidationError};

/// Configuration for an S3 (or S3 compatible) upload
///
/// Without explicit keys the usual AWS environment and profile lookup applies.
/// `endpoint` points the client at another S3 implementation such as MinIO.
#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[validate(schema(function = validate_key_pair))]
#[getset(get = "pub")]
pub struct S3Target {
    #[validate(length(min = 3, max = 63))]
    #[builder(into)]
    bucket: String,
    #[builder(into)]
    prefix: Option<String>,
    #[builder(into)]
    region: Option<String>,
    #[builder(into)]
    endpoint: Option<String>,
    #[serde(default)]
    #[builder(default)]
    force_path_style: bool,
    #[builder(into)]
    access_key_id: Option<String>,
    #[builder(into)]
    secret_access_key: Option<RedactedString>,
}

fn validate_key_pair(target: &S3Target) -> std::result::Result<(), ValidationError> {
    if target.access_key_id.is_some() != target.secret_access_key.is_some() {
        return Err(ValidationError::new("IncompleteCredentials").with_message(
            "access_key_id and secret_access_key must be given together".into(),
        ));
    }
    Ok(())
}

impl S3Target {
    fn object_key(&self, file_name: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), file_name),
            None => file_name.to_string(),
        }
    }

    async fn client(&self) -> Client {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &self.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let (Some(id), Some(secret)) = (&self.access_key_id, &self.secret_access_key) {
            loader = loader.credentials_provider(Credentials::new(
                id,
                secret.inner(),
                None,
                None,
                "k_zip_backup",
            ));
        }
        if let Some(endpoint) = &self.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(self.force_path_style)
            .build();
        Client::from_conf(s3_config)
    }

    async fn upload(&self, archive: &Path, key: String) -> Result<()> {
        let client = self.client().await;
        client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(aws_sdk_s3::Error::from)
            .map_err(Error::from)
            .add_msg(format!("Bucket {} is not reachable", self.bucket))?;

        let body = ByteStream::from_path(archive)
            .await
            .map_err(std::io::Error::other)?;
        let output = client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(body)
            .send()
            .await
            .map_err(aws_sdk_s3::Error::from)
            .map_err(Error::from)
            .add_msg(format!("Uploading {} failed", key))?;
        tracing::debug!("Stored s3://{}/{} etag {:?}", self.bucket, key, output.e_tag());
        Ok(())
    }
}

impl UploadTarget for S3Target {
    fn identity(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("s3://{}/{}", self.bucket, prefix),
            None => format!("s3://{}", self.bucket),
        }
    }

    #[named]
    fn push(&self, archive: &Path) -> Result<()> {
        let file_name = archive
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::invalid_config(format!("{:?} has no file name", archive)))?;
        let key = self.object_key(file_name);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(Error::from)
            .add_fn_name(function_path!())?;
        runtime
            .block_on(self.upload(archive, key))
            .add_fn_name(function_path!())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_s3_object_key() {
        let plain = S3Target::builder().bucket("my-backups").build();
        let nested = S3Target::builder()
            .bucket("my-backups")
            .prefix("home/")
            .build();

        assert_eq!(plain.object_key("b.zip"), "b.zip");
        assert_eq!(nested.object_key("b.zip"), "home/b.zip");
        assert_eq!(nested.identity(), "s3://my-backups/home/");
    }

    #[test]
    fn test_s3_validation() {
        assert!(S3Target::builder().bucket("my-backups").build().validate().is_ok());
        assert!(S3Target::builder().bucket("ab").build().validate().is_err());

        let half_keys = S3Target::builder()
            .bucket("my-backups")
            .access_key_id("AKIAEXAMPLE")
            .build();
        assert!(half_keys.validate().is_err());

        let full_keys = S3Target::builder()
            .bucket("my-backups")
            .access_key_id("AKIAEXAMPLE")
            .secret_access_key("wJalrXUtnFEMI")
            .build();
        assert!(full_keys.validate().is_ok());
        assert!(!format!("{:?}", full_keys).contains("wJalrXUtnFEMI"));
    }

    #[test]
    fn test_s3_push_unreachable_endpoint() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let temp_dir = tempfile::TempDir::new().unwrap();
        let archive = temp_dir.path().join("b.zip");
        std::fs::write(&archive, b"x").unwrap();

        let target = S3Target::builder()
            .bucket("my-backups")
            .region("us-east-1")
            .endpoint(format!("http://127.0.0.1:{port}"))
            .force_path_style(true)
            .access_key_id("AKIAEXAMPLE")
            .secret_access_key("wJalrXUtnFEMI")
            .build();
        let err = target.push(&archive).unwrap_err();

        assert!(err.to_string().contains("Bucket my-backups is not reachable"));
    }
}
