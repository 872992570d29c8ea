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

//! The CLI surface (§6): `init`/`pull`/`push`/`sync`/`version`, a global
//! repeatable `-v`, and exit codes (0 success, 1 on any fatal error).
//! Mirrors `cmd/root.go` and its four subcommand packages.

use std::path::Path;
use std::process::ExitCode;

use buttercup_config::{starter_config, user_config_path, write_new, AppConfig, FolderConfig};
use buttercup_error::Error;
use buttercup_provider::build_provider;
use buttercup_sync::Synchronizer;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "buttercup", about = "A tool for syncing folders securely over the internet.")]
struct Cli {
    /// Increase log verbosity. Repeatable, capped at 5 (§6).
    #[arg(short = 'v', long = "verbose", global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a starter configuration file if none exists.
    Init,
    /// Pull the latest changes from the remote.
    Pull { folder: Option<String> },
    /// Push local changes to the remote.
    Push { folder: Option<String> },
    /// Pull, then push.
    Sync { folder: Option<String> },
    /// Print the version number.
    #[command(alias = "v")]
    Version,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    buttercup_util::logging::init(cli.verbose);

    let result = match cli.command {
        Command::Init => run_init(),
        Command::Pull { folder } => run_pull(folder).await,
        Command::Push { folder } => run_push(folder).await,
        Command::Sync { folder } => run_sync(folder).await,
        Command::Version => {
            println!("buttercup {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run_init() -> Result<(), Error> {
    let path = user_config_path()?;
    if path.exists() {
        tracing::info!(path = %path.display(), "configuration file already exists");
        return Ok(());
    }

    let hostname = hostname();
    let home = dirs_home()?;
    let config = starter_config(&hostname, &home);
    write_new(&path, &config)?;

    tracing::info!(path = %path.display(), "configuration file written");
    tracing::info!(
        "to get started, edit the remote provider settings in the new configuration file"
    );
    Ok(())
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| hostname_from_uname())
        .unwrap_or_else(|| "unknown-device".to_string())
}

#[cfg(unix)]
fn hostname_from_uname() -> Option<String> {
    let output = std::process::Command::new("hostname").output().ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

#[cfg(not(unix))]
fn hostname_from_uname() -> Option<String> {
    None
}

fn dirs_home() -> Result<std::path::PathBuf, Error> {
    let home = shellexpand::tilde("~");
    if home == "~" {
        return Err(buttercup_error::make_err!(
            buttercup_error::Code::ConfigError,
            "cannot determine home directory"
        ));
    }
    Ok(Path::new(home.as_ref()).to_path_buf())
}

async fn resolve_folder(folder_name: Option<String>) -> Result<FolderConfig, Error> {
    let config: AppConfig = buttercup_config::load_from_user()?;
    match folder_name {
        Some(name) => config.get_folder(&name),
        None => config.get_default(),
    }
}

async fn run_pull(folder_name: Option<String>) -> Result<(), Error> {
    let folder = resolve_folder(folder_name).await?;
    tracing::info!(path = %folder.local.folder_path(), "pulling folder");

    let local = build_provider(&folder.local).await?;
    let remote = build_provider(&folder.remote).await?;
    Synchronizer::new(local, remote).pull().await
}

async fn run_push(folder_name: Option<String>) -> Result<(), Error> {
    let folder = resolve_folder(folder_name).await?;
    tracing::info!(path = %folder.local.folder_path(), "pushing folder");

    let local = build_provider(&folder.local).await?;
    let remote = build_provider(&folder.remote).await?;
    Synchronizer::new(local, remote).push().await
}

async fn run_sync(folder_name: Option<String>) -> Result<(), Error> {
    let folder = resolve_folder(folder_name).await?;
    tracing::info!(path = %folder.local.folder_path(), "syncing folder");

    let local = build_provider(&folder.local).await?;
    let remote = build_provider(&folder.remote).await?;
    Synchronizer::new(local, remote).sync().await
}
