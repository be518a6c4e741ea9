use anyhow::Context;
use clap::{Parser, Subcommand};
use javelin::config::Config;
use javelin::debugger::{Debugger, DebuggerState};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(long, env = "JAVELIN_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Build the symbol table of a source tree and print it.
    Analyze {
        /// Source root, the configured one when omitted.
        #[arg(long)]
        root: Option<PathBuf>,
    },
    /// Print the declaration of the symbol under a cursor.
    Def {
        /// Source root, the configured one when omitted.
        #[arg(long)]
        root: Option<PathBuf>,
        /// Source path relative to the root.
        path: String,
        line: usize,
        column: usize,
    },
    /// Launch a class under the debug agent and relay its output.
    Run {
        main_class: String,
        #[arg(long, default_value = ".")]
        classpath: String,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load(path).context("load configuration")?,
        None => Config::default(),
    };
    let source_root = config.source_root.clone();
    let debugger = Debugger::new(config);

    match args.command {
        Cmd::Analyze { root } => {
            let analyzer = javelin::analyzer::Analyzer::default();
            let table = analyzer.analyze(&root.unwrap_or(source_root))?;
            println!("{}", serde_json::to_string_pretty(table.declarations())?);
        }
        Cmd::Def {
            root,
            path,
            line,
            column,
        } => {
            debugger.analyze(&root.unwrap_or(source_root))?;
            let symbol = debugger.declaration_symbol(&path, line, column)?;
            println!("{}", serde_json::to_string_pretty(&symbol)?);
        }
        Cmd::Run {
            main_class,
            classpath,
        } => {
            let launch_args = serde_json::json!({ "-classpath": classpath }).to_string();
            debugger.start(&main_class, &launch_args)?;
            while debugger.state() != DebuggerState::Idle {
                for line in debugger.take_console() {
                    println!("{line}");
                }
                std::thread::sleep(Duration::from_millis(200));
            }
            for line in debugger.take_console() {
                println!("{line}");
            }
        }
    }
    Ok(())
}
