use std::fs::{File, OpenOptions};
use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use env_logger::{Env, Target};
use log::{debug, error, info};
use secrecy::{ExposeSecret, SecretString};

use permafrost::archive::RetryPolicy;
use permafrost::chunk::PartLayout;
use permafrost::remote::glacier::{Glacier, StaticCredentials};
use permafrost::remote::mem::MemoryVault;
use permafrost::remote::Vault;
use permafrost::stream::compress::Compression;
use permafrost::{Archiver, UploadConfig, UploadOptions};

mod cli;
use crate::cli::Cli;
use crate::cli::Commands;
use crate::cli::Config;
use crate::cli::RemoteConfig;

// ECANCELED, the backup was not carried out
const EXIT_FATAL: u8 = 125;
const EXIT_ABORTED: u8 = 1;

fn main() -> ExitCode {
    // Parse the cli
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::from(EXIT_FATAL);
        }
    };

    if let Err(e) = init_logger(&config) {
        eprintln!("unable to open log file: {}", e);
        return ExitCode::from(EXIT_FATAL);
    }
    debug!("CONFIG: {:?}", config);

    let result = match &config.remote {
        RemoteConfig::Glacier {
            region,
            access_key_id,
            secret_access_key,
            endpoint,
        } => {
            let credentials = match (access_key_id, secret_access_key) {
                (Some(id), Some(secret)) => Some(StaticCredentials {
                    access_key_id: id.clone(),
                    secret_access_key: secret.expose_secret().to_string(),
                }),
                _ => None,
            };
            Glacier::new(region.as_deref(), credentials, endpoint.as_deref())
                .map_err(permafrost::Error::from)
                .and_then(|glacier| run(glacier, &config, &cli.command))
        }
        RemoteConfig::Local { path } => MemoryVault::new(Some(&*path.to_string_lossy()))
            .map_err(permafrost::Error::from)
            .and_then(|vault| run(vault, &config, &cli.command)),
    };

    match result {
        Ok(true) => {
            info!("No errors occurred during backup.");
            ExitCode::SUCCESS
        }
        Ok(false) => ExitCode::from(EXIT_ABORTED),
        Err(e) => {
            error!("{}", e);
            ExitCode::from(EXIT_FATAL)
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config, String> {
    match path {
        None => Ok(Config::default()),
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| format!("unable to read config {}: {}", path.display(), e))?;
            toml::from_str(&raw).map_err(|e| format!("invalid config {}: {}", path.display(), e))
        }
    }
}

fn init_logger(config: &Config) -> std::io::Result<()> {
    let level = config.log_level.as_deref().unwrap_or("info");
    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or(level));

    if let Some(path) = &config.log_file {
        let file: File = OpenOptions::new().create(true).append(true).open(path)?;
        builder.target(Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

// Ok(false) when any upload was abandoned
fn run<V: Vault>(vault: V, config: &Config, command: &Commands) -> permafrost::Result<bool> {
    let upload_config = UploadConfig {
        layout: PartLayout::new(config.chunks_per_part)?,
        retry: RetryPolicy::new(config.attempts),
    };
    let archiver = Archiver::new(vault, upload_config);

    match command {
        Commands::CreateVault { name } => {
            let name = archiver.create_vault(name.as_deref())?;
            println!("{}", name);
            Ok(true)
        }
        Commands::Upload {
            vault,
            tag,
            compression_level,
            codec,
            paths,
        } => {
            let compression = config
                .compression_level(*compression_level)
                .map(|level| Compression::new(codec.unwrap_or(config.codec), level))
                .transpose()?;

            // Every image of one run goes into the same vault
            let vault = match vault.as_deref().filter(|v| !v.is_empty()) {
                Some(v) => v.to_string(),
                None => archiver.create_vault(None)?,
            };

            let passphrase: Option<&SecretString> = config.passphrase.as_ref();
            let opts = UploadOptions {
                vault: Some(vault.as_str()),
                tag: tag.as_deref(),
                passphrase: passphrase.map(|p| p.expose_secret().as_bytes()),
                compression,
            };

            let mut all_completed = true;
            for path in paths {
                match archiver.upload(path, &opts)? {
                    permafrost::UploadOutcome::Completed(archive) => {
                        info!("Upload of {} completed successfully.", path.display());
                        debug!("{:?}", archive);
                        println!("{}\t{}", path.display(), archive.archive_id);
                    }
                    permafrost::UploadOutcome::Aborted { .. } => {
                        error!("Upload of {} failed", path.display());
                        all_completed = false;
                    }
                }
            }
            Ok(all_completed)
        }
    }
}
