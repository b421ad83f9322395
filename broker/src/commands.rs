use anyhow::{Context, Result};
use clap::{Args, Parser};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use sts_broker::common::config::{
    ENV_BUCKET, ENV_CUSTOM_CA, ENV_POLICY_FILE, ENV_REGION, ENV_ROLE_ARN, ENV_SESSION_NAME,
    ENV_STORAGE_ENDPOINT, ENV_STS_ENDPOINT, ENV_TENANT_NAMESPACE, ENV_TOKEN_FILE,
};
use sts_broker::storage::ListObjectsOptions;
use sts_broker::{BrokerConfig, TlsVerification, WebIdentityBroker};

/// Connection settings shared by every subcommand
#[derive(Args, Debug, Clone)]
pub struct ConnectArgs {
    /// YAML configuration file; flags and environment override its values
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// STS base URL, the tenant namespace is appended
    #[arg(long, env = ENV_STS_ENDPOINT)]
    pub sts_endpoint: Option<String>,

    /// S3 endpoint of the tenant
    #[arg(long, env = ENV_STORAGE_ENDPOINT)]
    pub storage_endpoint: Option<String>,

    /// Namespace the tenant lives in
    #[arg(short = 'n', long, env = ENV_TENANT_NAMESPACE)]
    pub tenant_namespace: Option<String>,

    /// Projected service account token
    #[arg(long, env = ENV_TOKEN_FILE)]
    pub token_file: Option<PathBuf>,

    /// Session policy JSON document
    #[arg(long, env = ENV_POLICY_FILE)]
    pub policy_file: Option<PathBuf>,

    /// Extra CA certificate to trust, e.g. the cluster CA
    #[arg(long, env = ENV_CUSTOM_CA)]
    pub custom_ca: Option<PathBuf>,

    /// Replace the discovered system CA bundle
    #[arg(long)]
    pub system_ca_file: Option<PathBuf>,

    /// Signing region
    #[arg(long, env = ENV_REGION)]
    pub region: Option<String>,

    #[arg(long, env = ENV_ROLE_ARN)]
    pub role_arn: Option<String>,

    #[arg(long, env = ENV_SESSION_NAME)]
    pub session_name: Option<String>,

    /// Requested credential lifetime in seconds
    #[arg(long)]
    pub duration_seconds: Option<u32>,

    /// Request timeout in seconds
    #[arg(long)]
    pub request_timeout: Option<u64>,

    /// Skip TLS certificate verification (for development)
    #[arg(long, env = "STS_INSECURE_SKIP_VERIFY")]
    pub insecure_skip_verify: bool,
}

impl ConnectArgs {
    pub fn to_config(&self) -> Result<BrokerConfig> {
        let mut config = match &self.config {
            Some(path) => BrokerConfig::from_yaml_file(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
            None => BrokerConfig::default(),
        };

        if let Some(value) = &self.sts_endpoint {
            config.sts_endpoint = Some(value.clone());
        }
        if let Some(value) = &self.storage_endpoint {
            config.storage_endpoint = Some(value.clone());
        }
        if let Some(value) = &self.tenant_namespace {
            config.tenant_namespace = Some(value.clone());
        }
        if let Some(value) = &self.token_file {
            config.token_file = Some(value.clone());
        }
        if let Some(value) = &self.policy_file {
            config.policy_file = Some(value.clone());
        }
        if let Some(value) = &self.custom_ca {
            config.custom_ca_file = Some(value.clone());
        }
        if let Some(value) = &self.system_ca_file {
            config.system_ca_file = Some(value.clone());
        }
        if let Some(value) = &self.region {
            config.region = value.clone();
        }
        if let Some(value) = &self.role_arn {
            config.role_arn = value.clone();
        }
        if let Some(value) = &self.session_name {
            config.session_name = Some(value.clone());
        }
        if let Some(value) = self.duration_seconds {
            config.duration_seconds = value;
        }
        if let Some(value) = self.request_timeout {
            config.request_timeout_secs = value;
        }
        if self.insecure_skip_verify {
            config.tls.verification = TlsVerification::InsecureSkipVerify;
        }

        Ok(config)
    }

    fn broker(&self) -> Result<WebIdentityBroker> {
        WebIdentityBroker::new(self.to_config()?).context("Failed to initialize the credential broker")
    }
}

#[derive(Parser, Debug, Clone)]
pub struct CredentialsCommand {
    #[command(flatten)]
    pub connect: ConnectArgs,

    /// Print shell `export` lines including the secret key and session token
    #[arg(long)]
    pub export: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct BucketsCommand {
    #[command(flatten)]
    pub connect: ConnectArgs,

    /// Print JSON instead of one name per line
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct ObjectsCommand {
    #[command(flatten)]
    pub connect: ConnectArgs,

    /// Bucket to list; falls back to the configured bucket
    #[arg(short, long, env = ENV_BUCKET)]
    pub bucket: Option<String>,

    /// Only list keys below this prefix
    #[arg(short, long)]
    pub prefix: Option<String>,

    /// Descend into every prefix
    #[arg(short, long)]
    pub recursive: bool,

    /// Print JSON instead of one key per line
    #[arg(long)]
    pub json: bool,
}

impl CredentialsCommand {
    pub async fn run(self) -> Result<()> {
        let broker = self.connect.broker()?;
        let credential = broker.fetch_credential(&shutdown_token()).await?;

        if self.export {
            println!("export AWS_ACCESS_KEY_ID={}", credential.access_key_id());
            println!("export AWS_SECRET_ACCESS_KEY={}", credential.secret_access_key());
            println!("export AWS_SESSION_TOKEN={}", credential.session_token());
        } else {
            println!("Access key: {}", credential.access_key_id());
            println!("Expires:    {}", credential.expiration());
        }
        Ok(())
    }
}

impl BucketsCommand {
    pub async fn run(self) -> Result<()> {
        let broker = self.connect.broker()?;
        let cancel = shutdown_token();
        let credential = broker.credential_holder().get_with_cancel(&cancel).await?;
        let client = broker.storage_client(credential);

        let buckets = client.list_buckets(&cancel).await?;
        info!("📦 Found {} bucket(s)", buckets.len());

        if self.json {
            println!("{}", serde_json::to_string_pretty(&buckets)?);
        } else {
            for bucket in buckets {
                println!("{}", bucket.name);
            }
        }
        Ok(())
    }
}

impl ObjectsCommand {
    pub async fn run(self) -> Result<()> {
        let broker = self.connect.broker()?;
        let bucket = self
            .bucket
            .clone()
            .or_else(|| broker.config().bucket.clone())
            .context("No bucket given, pass --bucket or set BUCKET")?;

        let cancel = shutdown_token();
        let credential = broker.credential_holder().get_with_cancel(&cancel).await?;
        let client = broker.storage_client(credential);

        let mut options = ListObjectsOptions::default().recursive(self.recursive);
        if let Some(prefix) = &self.prefix {
            options = options.with_prefix(prefix.clone());
        }
        let objects = client.list_objects(&bucket, &options, &cancel).await?;
        info!("📄 Found {} object(s) in {}", objects.len(), bucket);

        if self.json {
            println!("{}", serde_json::to_string_pretty(&objects)?);
        } else {
            for object in objects {
                if object.is_prefix {
                    println!("{:>12}  {}", "PRE", object.key);
                } else {
                    println!("{:>12}  {}", object.size, object.key);
                }
            }
        }
        Ok(())
    }
}

/// Token cancelled on Ctrl-C
fn shutdown_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling in-flight requests");
            trigger.cancel();
        }
    });
    cancel
}
