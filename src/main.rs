use anyhow::{bail, Result};
use clap::Parser;
use std::collections::BTreeSet;
use std::path::Path;

use testprune::cli::{Cli, Command};
use testprune::config::FileConfig;
use testprune::graph::builder::load_or_build;
use testprune::graph::ModuleGraph;

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("error: {:#}", err);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let graph = load_graph(&cli)?;
    match cli.command {
        Command::Build { out } => {
            if let Some(out) = out {
                graph.to_file(&out)?;
                println!("graph written to {}", out.display());
            }
            let unresolved = graph.unresolved();
            if unresolved.is_empty() {
                println!("all imports resolved");
            } else {
                println!("{} unresolved imports", unresolved.len());
            }
        }
        Command::DependsOn { target, pkg, json } => {
            let deps = if target.contains('/') || target.ends_with(".py") {
                graph.file_depends_on(Path::new(&target))
            } else {
                graph.module_depends_on(&target, pkg.as_deref())
            };
            let Some(deps) = deps else {
                bail!("unknown module or file: {}", target);
            };
            let sorted: BTreeSet<String> = deps.into_iter().collect();
            if json {
                println!("{}", serde_json::to_string_pretty(&sorted)?);
            } else {
                for d in sorted {
                    println!("{}", d);
                }
            }
        }
        Command::AffectedBy { paths, json } => {
            let affected = graph.affected_by_files(paths.iter());
            let sorted: BTreeSet<String> = affected
                .into_iter()
                .map(|p| p.display().to_string())
                .collect();
            if json {
                println!("{}", serde_json::to_string_pretty(&sorted)?);
            } else {
                for p in sorted {
                    println!("{}", p);
                }
            }
        }
        Command::Unresolved => {
            for r in graph.unresolved() {
                println!("{}", r);
            }
        }
    }
    Ok(())
}

fn load_graph(cli: &Cli) -> Result<ModuleGraph> {
    if let Some(graph) = &cli.graph {
        if graph.exists() {
            return ModuleGraph::from_file(graph);
        }
    }
    let config = FileConfig::load(&cli.config)?;
    load_or_build(&config, cli.graph.as_deref())
}
