use std::future::Future;

use aws_config::BehaviorVersion;
use aws_sdk_glacier::config::{Credentials, Region};
use aws_sdk_glacier::error::DisplayErrorContext;
use aws_sdk_glacier::operation::complete_multipart_upload::builders::CompleteMultipartUploadFluentBuilder;
use aws_sdk_glacier::operation::initiate_multipart_upload::builders::InitiateMultipartUploadFluentBuilder;
use aws_sdk_glacier::operation::upload_multipart_part::builders::UploadMultipartPartFluentBuilder;
use aws_sdk_glacier::primitives::ByteStream;
use aws_sdk_glacier::Client;
use tokio::runtime::Runtime;

use crate::remote::{ArchiveLocation, ByteRange, MultipartUpload, RemoteError, Vault};

pub const DEFAULT_REGION: &str = "us-east-1";

// The account that owns the credentials
const ACCOUNT_ID: &str = "-";

/// Static credentials, otherwise the default AWS provider chain is used.
pub struct StaticCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

pub struct Glacier {
    client: Client,

    // Runtime for the tokio reactor, every call blocks on it
    rt: Runtime,
}

impl Glacier {
    pub fn new(
        region: Option<&str>,
        credentials: Option<StaticCredentials>,
        endpoint: Option<&str>,
    ) -> Result<Self, RemoteError> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(RemoteError::Runtime)?;

        let region = Region::new(region.unwrap_or(DEFAULT_REGION).to_string());
        let client = rt.block_on(connect(region, credentials, endpoint));

        Ok(Glacier { client, rt })
    }

    fn call<F, T, E>(&self, fut: F) -> Result<T, RemoteError>
    where
        F: Future<Output = Result<T, E>>,
        E: std::error::Error,
    {
        self.rt
            .block_on(fut)
            .map_err(|e| RemoteError::Service(DisplayErrorContext(&e).to_string()))
    }

    // The service takes sizes and ranges as strings
    fn initiate_request(
        &self,
        vault: &str,
        description: &str,
        part_size: u64,
    ) -> InitiateMultipartUploadFluentBuilder {
        self.client
            .initiate_multipart_upload()
            .account_id(ACCOUNT_ID)
            .vault_name(vault)
            .archive_description(description)
            .part_size(part_size.to_string())
    }

    fn part_request(
        &self,
        vault: &str,
        upload_id: &str,
        range: ByteRange,
        body: &[u8],
        checksum: &str,
    ) -> UploadMultipartPartFluentBuilder {
        // The SDK wants an owned body, a retried part is copied again
        self.client
            .upload_multipart_part()
            .account_id(ACCOUNT_ID)
            .vault_name(vault)
            .upload_id(upload_id)
            .range(range.to_string())
            .checksum(checksum)
            .body(ByteStream::from(body.to_vec()))
    }

    fn complete_request(
        &self,
        vault: &str,
        upload_id: &str,
        archive_size: u64,
        checksum: &str,
    ) -> CompleteMultipartUploadFluentBuilder {
        self.client
            .complete_multipart_upload()
            .account_id(ACCOUNT_ID)
            .vault_name(vault)
            .upload_id(upload_id)
            .archive_size(archive_size.to_string())
            .checksum(checksum)
    }
}

async fn connect(
    region: Region,
    credentials: Option<StaticCredentials>,
    endpoint: Option<&str>,
) -> Client {
    let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(region);
    if let Some(creds) = credentials {
        loader = loader.credentials_provider(Credentials::new(
            creds.access_key_id,
            creds.secret_access_key,
            None,
            None,
            "permafrost-config",
        ));
    }
    let conf = loader.load().await;

    let mut glacier_conf = aws_sdk_glacier::config::Builder::from(&conf);
    if let Some(url) = endpoint {
        glacier_conf = glacier_conf.endpoint_url(url);
    }
    Client::from_conf(glacier_conf.build())
}

impl Vault for Glacier {
    fn create_vault(&self, name: &str) -> Result<String, RemoteError> {
        let call = self
            .client
            .create_vault()
            .account_id(ACCOUNT_ID)
            .vault_name(name)
            .send();

        let res = self.call(call)?;
        Ok(res.location().unwrap_or_default().to_string())
    }

    fn initiate_multipart_upload(
        &self,
        vault: &str,
        description: &str,
        part_size: u64,
    ) -> Result<MultipartUpload, RemoteError> {
        let call = self
            .initiate_request(vault, description, part_size)
            .send();

        let res = self.call(call)?;
        Ok(MultipartUpload {
            upload_id: res
                .upload_id()
                .ok_or(RemoteError::MissingField("upload id"))?
                .to_string(),
            location: res.location().unwrap_or_default().to_string(),
        })
    }

    fn upload_multipart_part(
        &self,
        vault: &str,
        upload_id: &str,
        range: ByteRange,
        body: &[u8],
        checksum: &str,
    ) -> Result<(), RemoteError> {
        let call = self
            .part_request(vault, upload_id, range, body, checksum)
            .send();

        let res = self.call(call)?;
        match res.checksum() {
            Some(echo) if echo != checksum => Err(RemoteError::ChecksumMismatch {
                expected: checksum.to_string(),
                computed: echo.to_string(),
            }),
            _ => Ok(()),
        }
    }

    fn complete_multipart_upload(
        &self,
        vault: &str,
        upload_id: &str,
        archive_size: u64,
        checksum: &str,
    ) -> Result<ArchiveLocation, RemoteError> {
        let call = self
            .complete_request(vault, upload_id, archive_size, checksum)
            .send();

        let res = self.call(call)?;
        Ok(ArchiveLocation {
            archive_id: res
                .archive_id()
                .ok_or(RemoteError::MissingField("archive id"))?
                .to_string(),
            location: res.location().unwrap_or_default().to_string(),
            checksum: res.checksum().unwrap_or(checksum).to_string(),
        })
    }
}
