use crate::{
    errors::StackError,
    models::{context::StackContext, publish::ResourceLimits},
    services::{
        retry::RetryPolicy,
        stack::{ContentSource, FrontendProps},
    },
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::{env, fmt::Display, str::FromStr};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub app: String,
    pub stage: String,
    pub region: String,
    pub resource_name: String,
    pub content_dir: String,
    pub storage_dir: String,
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub edge_domain: String,
    pub memory_limit_mib: u64,
    pub ephemeral_storage_gib: u64,
    pub retry_attempts: u32,
    pub outputs_file: Option<String>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Provision the stack, publish content and print its outputs
    Deploy,
    /// Tear the stack down, honouring bucket removal policies
    Destroy,
    /// Serve provisioned distributions through the local edge emulator
    Serve,
    /// Print the outputs of an already provisioned stack
    Outputs,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Static-site stack provisioner")]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Application name (overrides SITE_STACK_APP)
    #[arg(long, global = true)]
    pub app: Option<String>,

    /// Deployment stage (overrides SITE_STACK_STAGE)
    #[arg(long, global = true)]
    pub stage: Option<String>,

    /// Target region (overrides SITE_STACK_REGION)
    #[arg(long, global = true)]
    pub region: Option<String>,

    /// Logical name of the frontend stack (overrides SITE_STACK_RESOURCE_NAME)
    #[arg(long, global = true)]
    pub resource_name: Option<String>,

    /// Directory published into the bucket (overrides SITE_STACK_CONTENT_DIR)
    #[arg(long, global = true)]
    pub content_dir: Option<String>,

    /// Directory where object payloads are stored (overrides SITE_STACK_STORAGE_DIR)
    #[arg(long, global = true)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides SITE_STACK_DATABASE_URL)
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// Host the edge emulator binds to (overrides SITE_STACK_HOST)
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Port the edge emulator binds to (overrides SITE_STACK_PORT)
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Parent domain of distribution domain names (overrides SITE_STACK_EDGE_DOMAIN)
    #[arg(long, global = true)]
    pub edge_domain: Option<String>,

    /// Memory limit of the publish job in MiB (overrides SITE_STACK_MEMORY_LIMIT_MIB)
    #[arg(long, global = true)]
    pub memory_limit_mib: Option<u64>,

    /// Ephemeral storage of the publish job in GiB (overrides SITE_STACK_EPHEMERAL_STORAGE_GIB)
    #[arg(long, global = true)]
    pub ephemeral_storage_gib: Option<u64>,

    /// Attempts per backend call (overrides SITE_STACK_RETRY_ATTEMPTS)
    #[arg(long, global = true)]
    pub retry_attempts: Option<u32>,

    /// Write the outputs as JSON to this file after deploy (overrides SITE_STACK_OUTPUTS_FILE)
    #[arg(long, global = true)]
    pub outputs_file: Option<String>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and the command.
    pub fn from_env_and_args() -> Result<(Self, Command)> {
        let args = Args::parse();
        let command = args.command;
        Ok((Self::merge(args)?, command))
    }

    /// Flags win over `SITE_STACK_*` variables, which win over defaults.
    pub fn merge(args: Args) -> Result<Self> {
        Ok(Self {
            app: args.app.unwrap_or(env_or("SITE_STACK_APP", "my-app".to_string())?),
            stage: args
                .stage
                .unwrap_or(env_or("SITE_STACK_STAGE", "local".to_string())?),
            region: args
                .region
                .unwrap_or(env_or("SITE_STACK_REGION", "eu-west-1".to_string())?),
            resource_name: args.resource_name.unwrap_or(env_or(
                "SITE_STACK_RESOURCE_NAME",
                "Frontend".to_string(),
            )?),
            content_dir: args.content_dir.unwrap_or(env_or(
                "SITE_STACK_CONTENT_DIR",
                "./frontend".to_string(),
            )?),
            storage_dir: args.storage_dir.unwrap_or(env_or(
                "SITE_STACK_STORAGE_DIR",
                "./data/objects".to_string(),
            )?),
            database_url: args.database_url.unwrap_or(env_or(
                "SITE_STACK_DATABASE_URL",
                "sqlite://./data/meta/site_stack.db".to_string(),
            )?),
            host: args
                .host
                .unwrap_or(env_or("SITE_STACK_HOST", "0.0.0.0".to_string())?),
            port: args.port.unwrap_or(env_or("SITE_STACK_PORT", 3000)?),
            edge_domain: args.edge_domain.unwrap_or(env_or(
                "SITE_STACK_EDGE_DOMAIN",
                "edge.localhost".to_string(),
            )?),
            memory_limit_mib: args
                .memory_limit_mib
                .unwrap_or(env_or("SITE_STACK_MEMORY_LIMIT_MIB", 2048)?),
            ephemeral_storage_gib: args
                .ephemeral_storage_gib
                .unwrap_or(env_or("SITE_STACK_EPHEMERAL_STORAGE_GIB", 2)?),
            retry_attempts: args
                .retry_attempts
                .unwrap_or(env_or("SITE_STACK_RETRY_ATTEMPTS", 3)?),
            outputs_file: match args.outputs_file {
                Some(path) => Some(path),
                None => env_opt("SITE_STACK_OUTPUTS_FILE")?,
            },
        })
    }

    pub fn context(&self) -> Result<StackContext, StackError> {
        StackContext::new(&self.app, &self.stage, &self.region)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts,
            ..RetryPolicy::default()
        }
    }

    /// Frontend props with default bucket and distribution settings,
    /// publishing `content_dir`.
    pub fn frontend_props(&self) -> FrontendProps {
        let mut content = ContentSource::new(&self.content_dir);
        content.limits = ResourceLimits::from_units(self.memory_limit_mib, self.ephemeral_storage_gib);
        FrontendProps {
            content: Some(content),
            ..FrontendProps::default()
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_opt(key: &str) -> Result<Option<String>> {
    match env::var(key) {
        Ok(value) => Ok(Some(value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("reading {}", key)),
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match env_opt(key)? {
        Some(value) => value
            .parse::<T>()
            .map_err(|err| anyhow::anyhow!("{}", err))
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let args = Args::parse_from([
            "site-stack",
            "deploy",
            "--app",
            "shop",
            "--port",
            "8080",
            "--memory-limit-mib",
            "512",
        ]);
        assert_eq!(args.command, Command::Deploy);

        let cfg = AppConfig::merge(args).unwrap();
        assert_eq!(cfg.app, "shop");
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.addr(), format!("{}:8080", cfg.host));

        let content = cfg.frontend_props().content.unwrap();
        assert_eq!(content.limits, ResourceLimits::from_units(512, cfg.ephemeral_storage_gib));
        assert_eq!(cfg.retry_policy().max_attempts, cfg.retry_attempts);
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let args = Args::parse_from(["site-stack", "serve", "--edge-domain", "cdn.test"]);
        assert_eq!(args.command, Command::Serve);
        assert_eq!(args.edge_domain.as_deref(), Some("cdn.test"));
    }
}
