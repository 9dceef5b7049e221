use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use toyfat::DEFAULT_SECTOR_SIZE;

#[derive(Parser)]
#[command(about = "Build and inspect toyfat disk images")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Format a fresh image
    Mkfs {
        #[arg(long, short)]
        image: PathBuf,

        #[command(flatten)]
        geometry: Geometry,
    },

    /// Format a fresh image and copy every regular file of a host directory into it
    Pack {
        #[arg(long, short)]
        image: PathBuf,

        /// Host directory
        #[arg(long, short)]
        source: PathBuf,

        /// Directory inside the image
        #[arg(long, short, default_value = "/bin")]
        dest: String,

        #[command(flatten)]
        geometry: Geometry,
    },

    /// Copy a host file into an existing image
    Add {
        #[arg(long, short)]
        image: PathBuf,

        /// Host file
        #[arg(long)]
        src: PathBuf,

        /// Path inside the image
        #[arg(long, short)]
        dest: String,

        /// Mark the file executable
        #[arg(long, short)]
        exec: bool,
    },

    Mkdir {
        #[arg(long, short)]
        image: PathBuf,

        path: String,
    },

    /// List a directory
    Ls {
        #[arg(long, short)]
        image: PathBuf,

        #[arg(default_value = "/")]
        path: String,
    },

    /// Copy a file out of the image
    Extract {
        #[arg(long, short)]
        image: PathBuf,

        path: String,

        /// Host file to write
        #[arg(long, short)]
        out: PathBuf,
    },

    /// Remove a file or an empty directory
    Rm {
        #[arg(long, short)]
        image: PathBuf,

        path: String,
    },

    /// Show the superblock and run a consistency check
    Info {
        #[arg(long, short)]
        image: PathBuf,
    },
}

#[derive(Args)]
pub struct Geometry {
    /// Total number of sectors
    #[arg(long, default_value_t = 1024)]
    pub sectors: u32,

    /// Sector width in 32-bit words
    #[arg(long, default_value_t = DEFAULT_SECTOR_SIZE as u32)]
    pub sector_words: u32,
}
