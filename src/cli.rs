use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "testprune",
    about = "Test impact analysis for Python: import graphs and affected-test queries",
    version
)]
pub struct Cli {
    /// Project configuration file
    #[arg(long, global = true, default_value = "testprune.toml")]
    pub config: PathBuf,

    /// Serialized graph to reuse instead of re-parsing the sources
    #[arg(long, global = true)]
    pub graph: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Parse the project and build the import graph
    Build {
        /// Write the graph to this file
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Transitive dependencies of a module id or file path
    DependsOn {
        target: String,
        /// Local scope key for test-folder modules
        #[arg(long)]
        pkg: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Files affected by changes to the given files
    AffectedBy {
        paths: Vec<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Import references that did not resolve to any module
    Unresolved,
}
