// Copyright (c) Contributors to the polyfs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/polyfs-rs/polyfs

use clap::{Parser, Subcommand};

mod cmd_copy;
mod cmd_ls;
mod cmd_serve;

/// Serve and inspect polyfs virtual filesystems
#[derive(Debug, Parser)]
#[clap(name = "polyfs")]
pub struct Opt {
    /// Log filter, e.g. `info` or `polyfs=debug`
    #[clap(long, global = true, env = "POLYFS_LOG", default_value = "info")]
    log: String,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Serve(cmd_serve::CmdServe),
    Ls(cmd_ls::CmdLs),
    Copy(cmd_copy::CmdCopy),
}

fn configure_logging(spec: &str) {
    let filter = tracing_subscriber::EnvFilter::try_new(spec)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() {
    let opt = Opt::parse();
    configure_logging(&opt.log);

    let result = match &opt.command {
        Command::Serve(cmd) => cmd.run().await,
        Command::Ls(cmd) => cmd.run().await,
        Command::Copy(cmd) => cmd.run().await,
    };
    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    }
}
