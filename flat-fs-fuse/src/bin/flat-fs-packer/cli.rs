use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(version, about = "Build and inspect flat-fs images")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Pack every regular file of a host directory into a new image
    Pack {
        /// Host directory to pack
        #[arg(long, short)]
        source: PathBuf,

        /// Image file to create
        #[arg(long, short)]
        image: PathBuf,

        /// Volume size in 512-byte blocks
        #[arg(long, short, default_value_t = 4096)]
        blocks: u32,

        /// Number of inodes, including the root directory file
        #[arg(long, short = 'n', default_value_t = flat_fs::DEFAULT_INODE_COUNT)]
        inodes: u32,
    },

    /// List the files of an image
    Ls {
        #[arg(long, short)]
        image: PathBuf,
    },

    /// Print a file of an image to stdout
    Cat {
        #[arg(long, short)]
        image: PathBuf,

        /// File name inside the image
        #[arg(long, short)]
        name: String,
    },
}
