use anyhow::{Context, Result};
use clap::Parser;
use std::env;

/// Presign expiry bounds shared with the handlers.
#[derive(Debug, Clone, Copy)]
pub struct PresignLimits {
    pub default_expiry_secs: u64,
    pub max_expiry_secs: u64,
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    /// Admin credentials; only needed for `--provision`.
    pub admin_access_key: Option<String>,
    pub admin_secret_key: Option<String>,
    /// Name of the canned policy attached to the application identity.
    pub policy_name: String,
    pub presign: PresignLimits,
    pub health_retries: u32,
    pub health_backoff_secs: u64,
    pub provision_retries: u32,
    /// Seconds between provisioning handshake probes; one per second.
    pub provision_interval_secs: u64,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "HTTP bridge over an S3-compatible object store")]
pub struct Args {
    /// Host to bind to (overrides APP_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides APP_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Object store endpoint URL (overrides S3_ENDPOINT)
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Bucket served by the bridge (overrides S3_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Provision the bucket, identity and policy, then exit
    #[arg(long)]
    pub provision: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and the
    /// provision flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = parse_env("APP_PORT", 8080u16)?;
        let env_endpoint = env::var("S3_ENDPOINT").unwrap_or_else(|_| "http://minio:9000".into());
        let region = env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".into());
        let env_bucket = args
            .bucket
            .clone()
            .or_else(|| env::var("S3_BUCKET").ok())
            .context("S3_BUCKET must be set")?;
        let access_key = env::var("S3_ACCESS_KEY").context("S3_ACCESS_KEY must be set")?;
        let secret_key = env::var("S3_SECRET_KEY").context("S3_SECRET_KEY must be set")?;
        let admin_access_key = env::var("S3_ADMIN_ACCESS_KEY").ok();
        let admin_secret_key = env::var("S3_ADMIN_SECRET_KEY").ok();
        let policy_name =
            env::var("S3_APP_POLICY").unwrap_or_else(|_| format!("{env_bucket}-rw"));

        let presign = PresignLimits {
            default_expiry_secs: parse_env("PRESIGN_DEFAULT_EXPIRY", 900u64)?,
            max_expiry_secs: parse_env("PRESIGN_MAX_EXPIRY", 604_800u64)?,
        };

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            endpoint: args.endpoint.unwrap_or(env_endpoint),
            region,
            bucket: env_bucket,
            access_key,
            secret_key,
            admin_access_key,
            admin_secret_key,
            policy_name,
            presign,
            health_retries: parse_env("S3_HEALTH_RETRIES", 10u32)?,
            health_backoff_secs: parse_env("S3_HEALTH_BACKOFF", 3u64)?,
            provision_retries: parse_env("PROVISION_RETRIES", 30u32)?,
            provision_interval_secs: parse_env("PROVISION_INTERVAL", 1u64)?,
        };

        Ok((cfg, args.provision))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_variables_fall_back_to_defaults() {
        let interval: u64 = parse_env("BUCKETBRIDGE_NEVER_SET_INTERVAL", 1u64).unwrap();
        assert_eq!(interval, 1);
        let retries: u32 = parse_env("BUCKETBRIDGE_NEVER_SET_RETRIES", 30u32).unwrap();
        assert_eq!(retries, 30);
    }
}
