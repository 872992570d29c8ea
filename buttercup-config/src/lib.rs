// Copyright 2024 The Buttercup Authors. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Loads `~/.buttercup/config.yaml` (§6) and generates a starter config for
//! the `init` subcommand. Kept deliberately close to the original's
//! `appconfig` package: a flat `ProviderConfig` carrying one populated
//! sub-config selected by `type`, rather than a Rust enum, so the YAML shape
//! in §6 round-trips unchanged.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use buttercup_error::{make_err, make_input_err, Code, Error, ResultExt};
use rand::RngCore;
use serde::{Deserialize, Serialize};

pub const TYPE_FS: &str = "filesystem";
pub const TYPE_EFS: &str = "encrypted-filesystem";
pub const TYPE_S3: &str = "s3";
pub const TYPE_IN_MEMORY: &str = "in-memory";

const CONFIG_FILE_NAME: &str = "config.yaml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(rename = "defaultFolder")]
    pub default_folder: String,
    #[serde(rename = "clientName")]
    pub client_name: String,
    pub folders: Vec<FolderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderConfig {
    pub name: String,
    pub local: ProviderConfig,
    pub remote: ProviderConfig,
}

/// A single store endpoint. Exactly one of `fs_config` / `efs_config` /
/// `s3_config` is populated, selected by `type`; `in-memory` populates
/// none. `client_name` is filled in from the owning [`AppConfig`] after
/// load -- it has no YAML representation of its own, mirroring the
/// original's `ClientName yaml:"-"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(rename = "type")]
    pub provider_type: String,
    #[serde(rename = "fsConfig", skip_serializing_if = "Option::is_none", default)]
    pub fs_config: Option<FsProviderConfig>,
    #[serde(rename = "efsConfig", skip_serializing_if = "Option::is_none", default)]
    pub efs_config: Option<EfsProviderConfig>,
    #[serde(rename = "s3Config", skip_serializing_if = "Option::is_none", default)]
    pub s3_config: Option<S3ProviderConfig>,
    #[serde(skip)]
    pub client_name: String,
}

impl ProviderConfig {
    /// A human readable path/bucket label used in startup log lines; empty
    /// for `in-memory`.
    pub fn folder_path(&self) -> String {
        if let Some(fs) = &self.fs_config {
            fs.path.clone()
        } else if let Some(efs) = &self.efs_config {
            efs.path.clone()
        } else if let Some(s3) = &self.s3_config {
            format!("s3://{}/{}", s3.bucket, s3.base_path)
        } else {
            String::new()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsProviderConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EfsProviderConfig {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub passphrase: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3ProviderConfig {
    #[serde(rename = "accessKey")]
    pub access_key: String,
    #[serde(rename = "secretKey")]
    pub secret_key: String,
    pub bucket: String,
    pub endpoint: String,
    pub region: String,
    #[serde(rename = "basePath")]
    pub base_path: String,
    #[serde(rename = "forcePathStyle", default)]
    pub force_path_style: bool,
    pub passphrase: String,
}

impl AppConfig {
    /// Resolves the configured default folder, filling in `client_name` on
    /// both endpoints.
    pub fn get_default(&self) -> Result<FolderConfig, Error> {
        if self.default_folder.is_empty() {
            return Err(make_input_err!("no default folder configured"));
        }
        self.get_folder(&self.default_folder)
    }

    /// Resolves a folder by name, filling in `client_name` on both
    /// endpoints so providers can identify themselves in the lock protocol
    /// (§4.3.1).
    pub fn get_folder(&self, name: &str) -> Result<FolderConfig, Error> {
        let mut folder = self
            .folders
            .iter()
            .find(|f| f.name == name)
            .cloned()
            .err_tip_with_code(|_| {
                (
                    Code::ConfigError,
                    format!("no configuration for folder: {name}"),
                )
            })?;
        folder.local.client_name = self.client_name.clone();
        folder.remote.client_name = self.client_name.clone();
        Ok(folder)
    }
}

/// Path to `~/.buttercup/config.yaml`.
pub fn user_config_path() -> Result<PathBuf, Error> {
    let home = shellexpand::tilde("~");
    if home == "~" {
        return Err(make_err!(Code::ConfigError, "cannot determine home directory"));
    }
    Ok(Path::new(home.as_ref()).join(".buttercup").join(CONFIG_FILE_NAME))
}

/// Loads and parses the config file at `path`.
pub fn load(path: &Path) -> Result<AppConfig, Error> {
    let data = std::fs::read_to_string(path)
        .map_err(Error::from)
        .err_tip_with_code(|_| {
            (
                Code::ConfigError,
                format!("cannot read config file at {}", path.display()),
            )
        })?;
    serde_yaml::from_str(&data)
        .map_err(|e| make_err!(Code::ConfigError, "cannot parse config file: {e}"))
}

/// Loads the config from `~/.buttercup/config.yaml`.
pub fn load_from_user() -> Result<AppConfig, Error> {
    load(&user_config_path()?)
}

/// Generates a 32 random byte passphrase, base64 encoded, for a freshly
/// initialized folder's encrypted provider.
pub fn generate_passphrase() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    STANDARD_NO_PAD.encode(bytes)
}

/// Builds the starter configuration written by the `init` subcommand: a
/// plaintext local folder paired with an encrypted S3 remote, mirroring
/// `cmd/initCmd/InitCmd.go`.
pub fn starter_config(client_name: &str, home_dir: &Path) -> AppConfig {
    AppConfig {
        default_folder: "default".to_string(),
        client_name: client_name.to_string(),
        folders: vec![FolderConfig {
            name: "default".to_string(),
            local: ProviderConfig {
                provider_type: TYPE_FS.to_string(),
                fs_config: Some(FsProviderConfig {
                    path: home_dir.join("Buttercup").display().to_string(),
                }),
                efs_config: None,
                s3_config: None,
                client_name: String::new(),
            },
            remote: ProviderConfig {
                provider_type: TYPE_S3.to_string(),
                fs_config: None,
                efs_config: None,
                s3_config: Some(S3ProviderConfig {
                    access_key: "youraccesskey".to_string(),
                    secret_key: "yoursecretkey".to_string(),
                    bucket: "yourbucket".to_string(),
                    endpoint: "yourendpoint".to_string(),
                    region: "yourregion".to_string(),
                    base_path: "Buttercup-files".to_string(),
                    force_path_style: false,
                    passphrase: generate_passphrase(),
                }),
                client_name: String::new(),
            },
        }],
    }
}

/// Writes `config` to `path` as YAML, refusing to overwrite an existing
/// file.
pub fn write_new(path: &Path, config: &AppConfig) -> Result<(), Error> {
    if path.exists() {
        return Err(make_err!(
            Code::ConfigError,
            "configuration file already exists at {}",
            path.display()
        ));
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(Error::from)
            .err_tip(|| "cannot create config directory")?;
    }
    let data = serde_yaml::to_string(config)
        .map_err(|e| make_err!(Code::ConfigError, "cannot serialize config: {e}"))?;
    std::fs::write(path, data)
        .map_err(Error::from)
        .err_tip(|| "cannot write config file")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq; // Must be declared in every module.

    #[test]
    fn parses_the_documented_yaml_shape() {
        let yaml = r#"
defaultFolder: default
clientName: laptop
folders:
  - name: default
    local:
      type: filesystem
      fsConfig:
        path: /home/me/Buttercup
    remote:
      type: encrypted-filesystem
      efsConfig:
        path: /mnt/backup
        passphrase: secret
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.default_folder, "default");
        let folder = config.get_folder("default").unwrap();
        assert_eq!(folder.local.provider_type, TYPE_FS);
        assert_eq!(folder.local.fs_config.unwrap().path, "/home/me/Buttercup");
        assert_eq!(folder.remote.provider_type, TYPE_EFS);
        assert_eq!(folder.local.client_name, "laptop");
    }

    #[test]
    fn unknown_folder_is_a_config_error() {
        let config = AppConfig {
            default_folder: "default".to_string(),
            client_name: "x".to_string(),
            folders: vec![],
        };
        let err = config.get_folder("missing").unwrap_err();
        assert_eq!(err.code, Code::ConfigError);
    }

    #[test]
    fn starter_config_round_trips_through_yaml() {
        let config = starter_config("my-host", Path::new("/home/me"));
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: AppConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.client_name, "my-host");
        assert_eq!(parsed.folders[0].remote.provider_type, TYPE_S3);
    }

    #[test]
    fn write_new_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let config = starter_config("host", dir.path());
        write_new(&path, &config).unwrap();
        let err = write_new(&path, &config).unwrap_err();
        assert_eq!(err.code, Code::ConfigError);
    }
}
