// build.rs

use clap::{Arg, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn build_cli() -> Command {
    let db_arg = || {
        Arg::new("db_path")
            .short('d')
            .long("db-path")
            .value_name("PATH")
            .default_value("/var/lib/tributary/replica.db")
            .help("Database path")
    };

    Command::new("tributary")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Tributary Contributors")
        .about("Embedded bi-directional SQL replication engine")
        .subcommand_required(false)
        .subcommand(
            Command::new("init")
                .about("Initialize a replica store")
                .arg(db_arg()),
        )
        .subcommand(
            Command::new("status")
                .about("Show replication status")
                .arg(db_arg()),
        )
        .subcommand(
            Command::new("track")
                .about("Install change-capture triggers on a table")
                .arg(Arg::new("table").required(true).help("Table to replicate"))
                .arg(db_arg()),
        )
        .subcommand(
            Command::new("log")
                .about("Show pending change-log entries")
                .arg(db_arg()),
        )
        .subcommand(
            Command::new("clients")
                .about("List known peers and their watermarks")
                .arg(db_arg()),
        )
        .subcommand(
            Command::new("purge")
                .about("Purge log entries every known peer has already seen")
                .arg(db_arg()),
        )
        .subcommand(
            Command::new("hash")
                .about("Compute a snapshot hash over one or more tables")
                .arg(Arg::new("tables").required(true).num_args(1..))
                .arg(db_arg()),
        )
}

fn main() -> std::io::Result<()> {
    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR not set"));

    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer: Vec<u8> = Vec::new();
    man.render(&mut buffer)?;

    fs::write(out_dir.join("tributary.1"), buffer)?;

    println!("cargo:rerun-if-changed=build.rs");
    Ok(())
}
