use std::path::PathBuf;

use clap::{Parser, Subcommand};
use secrecy::SecretString;
use serde::{Deserialize, Deserializer};

use permafrost::archive::DEFAULT_ATTEMPTS;
use permafrost::chunk::DEFAULT_CHUNKS_PER_PART;
use permafrost::stream::compress::Codec;

#[derive(Parser)]
#[command(name = "Permafrost")]
#[command(about = "Archive VM disk images to a tree hashed archival vault (AWS Glacier)")]
#[command(author, version, long_about = None)]
pub struct Cli {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Creates a vault
    CreateVault {
        /// Vault name, otherwise `<yesterday>_<hostname>`
        name: Option<String>,
    },

    /// Uploads each file as its own archive
    Upload {
        /// Vault to upload into, otherwise a dated vault is created
        #[arg(short, long)]
        vault: Option<String>,

        /// Label recorded in each archive description, such as the VM name
        #[arg(short, long)]
        tag: Option<String>,

        /// Compression level, overrides the config
        #[arg(short = 'l', long)]
        compression_level: Option<u32>,

        /// Compression codec, overrides the config
        #[arg(long)]
        codec: Option<Codec>,

        /// Disk images to upload
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
}

// Configuration
#[derive(Deserialize, Debug)]
#[serde(default)]
pub struct Config {
    pub log_file: Option<PathBuf>,
    pub log_level: Option<String>,

    #[serde(deserialize_with = "secret")]
    pub passphrase: Option<SecretString>,
    pub compression_level: Option<u32>,
    pub codec: Codec,

    pub chunks_per_part: u32,
    pub attempts: u32,

    pub remote: RemoteConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_file: None,
            log_level: None,
            passphrase: None,
            compression_level: None,
            codec: Codec::Bz2,
            chunks_per_part: DEFAULT_CHUNKS_PER_PART,
            attempts: DEFAULT_ATTEMPTS,
            remote: RemoteConfig::default(),
        }
    }
}

// An empty secret is the same as none
fn secret<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<SecretString>, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?
        .filter(|s| !s.is_empty())
        .map(SecretString::from))
}

impl Config {
    /// Compression level from the command line or the config, 0 disables it.
    pub fn compression_level(&self, flag: Option<u32>) -> Option<u32> {
        flag.or(self.compression_level).filter(|&level| level != 0)
    }
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RemoteConfig {
    Glacier {
        region: Option<String>,
        access_key_id: Option<String>,
        #[serde(default, deserialize_with = "secret")]
        secret_access_key: Option<SecretString>,
        endpoint: Option<String>,
    },
    Local {
        path: PathBuf,
    },
}

impl Default for RemoteConfig {
    fn default() -> Self {
        RemoteConfig::Glacier {
            region: None,
            access_key_id: None,
            secret_access_key: None,
            endpoint: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret;

    use super::*;

    #[test]
    fn empty_config_is_default() {
        let config: Config = toml::from_str("").unwrap();

        assert!(config.passphrase.is_none());
        assert_eq!(config.codec, Codec::Bz2);
        assert_eq!(config.chunks_per_part, 32);
        assert_eq!(config.attempts, 3);
        assert!(matches!(config.remote, RemoteConfig::Glacier { region: None, .. }));
    }

    #[test]
    fn full_config() {
        let config: Config = toml::from_str(
            r#"
            log_file = "/var/log/permafrost.log"
            passphrase = "correct horse"
            compression_level = 9
            codec = "zstd"
            chunks_per_part = 64

            [remote]
                type = "glacier"
                region = "eu-west-1"
                access_key_id = "AKIA"
                secret_access_key = "secret"
        "#,
        )
        .unwrap();

        assert_eq!(config.passphrase.unwrap().expose_secret(), "correct horse");
        assert_eq!(config.compression_level, Some(9));
        assert_eq!(config.codec, Codec::Zstd);
        assert_eq!(config.chunks_per_part, 64);
        assert_eq!(config.attempts, 3);
        match config.remote {
            RemoteConfig::Glacier {
                region,
                access_key_id,
                ..
            } => {
                assert_eq!(region.as_deref(), Some("eu-west-1"));
                assert_eq!(access_key_id.as_deref(), Some("AKIA"));
            }
            other => panic!("unexpected remote {:?}", other),
        }
    }

    #[test]
    fn empty_values_mean_unset() {
        let config: Config = toml::from_str(
            r#"
            passphrase = ""
            compression_level = 0
        "#,
        )
        .unwrap();

        assert!(config.passphrase.is_none());
        assert_eq!(config.compression_level(None), None);
        assert_eq!(config.compression_level(Some(0)), None);
        assert_eq!(config.compression_level(Some(5)), Some(5));
    }

    #[test]
    fn local_remote() {
        let config: Config = toml::from_str(
            r#"
            [remote]
                type = "local"
                path = "vault.sqlite"
        "#,
        )
        .unwrap();

        assert!(matches!(config.remote, RemoteConfig::Local { .. }));
    }

    #[test]
    fn upload_args() {
        let cli = Cli::try_parse_from([
            "permafrost",
            "upload",
            "--tag",
            "web01",
            "-l",
            "9",
            "a.img",
            "b.img",
        ])
        .unwrap();

        match cli.command {
            Commands::Upload {
                tag,
                compression_level,
                paths,
                vault,
                ..
            } => {
                assert_eq!(tag.as_deref(), Some("web01"));
                assert_eq!(compression_level, Some(9));
                assert_eq!(paths.len(), 2);
                assert!(vault.is_none());
            }
            _ => panic!("expected upload"),
        }

        assert!(Cli::try_parse_from(["permafrost", "upload"]).is_err());
    }
}
