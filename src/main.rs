//! Framehost CLI
//!
//! Runs a script program in a frame loop, or as a `--child` of another
//! framehost process.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use framehost::{
    HeadlessPlatform, HostConfig, HostDelegate, HostQueue, LinkOnlyEngine, MainLoop,
    ScriptError, ScriptHost, ThreadPoolQueue,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "framehost")]
#[command(author, version, about = "Runs a script program in a desktop frame loop", long_about = None)]
struct Cli {
    /// Module to run, or a reserved name such as --default or --console
    #[arg(value_name = "MODULE", allow_hyphen_values = true)]
    module: Option<String>,

    /// Run as a child process talking to its parent on descriptor 3
    #[arg(long)]
    child: bool,

    /// Run without a window
    #[arg(long)]
    headless: bool,

    /// Write no diagnostics
    #[arg(long)]
    no_log: bool,

    /// Load and link the module graph, then exit
    #[arg(long)]
    check: bool,

    /// Verbose output (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// JSON host configuration; flags override it
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Arguments to pass to the script (after --)
    #[arg(last = true)]
    script_args: Vec<String>,
}

impl Cli {
    fn host_config(&self) -> anyhow::Result<HostConfig> {
        let mut config = match &self.config {
            Some(path) => HostConfig::from_file(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => HostConfig::default(),
        };
        if let Some(module) = &self.module {
            config = config.with_module(module);
        }
        config.is_child_process |= self.child;
        config.headless |= self.headless;
        if self.no_log {
            config.log = false;
        }
        if !self.script_args.is_empty() {
            config.args = self.script_args.clone();
        }
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.host_config()?;

    if config.log {
        setup_logging(cli.verbose);
    }

    if cli.check {
        return check_module_graph(config);
    }

    tracing::debug!(module = %config.initial_module, base = %config.base_path.display(), "starting");
    // Only the headless platform ships with this binary.
    let platform = HeadlessPlatform::new();
    let mut main_loop =
        MainLoop::new(config, platform, LinkOnlyEngine::new).context("failed to start")?;
    let code = main_loop.run_until_closed().context("frame loop failed")?;
    drop(main_loop);
    std::process::exit(code);
}

fn setup_logging(verbose: u8) {
    let filter = EnvFilter::try_from_env("FRAMEHOST_LOG").unwrap_or_else(|_| {
        EnvFilter::new(match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Counts exceptions for `--check`
struct CheckDelegate {
    failures: Arc<std::sync::atomic::AtomicUsize>,
}

impl HostDelegate for CheckDelegate {
    fn on_main_module_loaded(&mut self) {}

    fn on_exception(&mut self, error: &ScriptError) {
        eprintln!("{}", error);
        self.failures
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }
}

fn check_module_graph(config: HostConfig) -> anyhow::Result<()> {
    let failures = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let background = Arc::new(ThreadPoolQueue::new(1).context("failed to start worker")?);
    let module = config.initial_module.clone();
    let mut host = ScriptHost::new(
        LinkOnlyEngine::new(),
        config,
        Arc::new(HostQueue::new()),
        background,
        Box::new(CheckDelegate {
            failures: Arc::clone(&failures),
        }),
    );
    host.load_main_module(&module);
    host.report_unhandled_rejections();
    let modules = host.module_count();
    drop(host);

    let failures = failures.load(std::sync::atomic::Ordering::Relaxed);
    if failures > 0 {
        bail!("{} failed to load", module);
    }
    println!("{}: {} module(s) linked", module, modules);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_child_invocation() {
        let cli = Cli::try_parse_from([
            "framehost", "--child", "--headless", "--no-log", "app/main.js", "--", "a", "--b",
        ])
        .unwrap();
        assert!(cli.child && cli.headless && cli.no_log);
        assert_eq!(cli.module.as_deref(), Some("app/main.js"));
        assert_eq!(cli.script_args, vec!["a", "--b"]);

        let config = cli.host_config().unwrap();
        assert!(config.is_child_process);
        assert!(!config.log);
        assert_eq!(config.initial_module, "main.js");
        assert_eq!(config.base_path, PathBuf::from("app"));
    }

    #[test]
    fn test_reserved_module_name() {
        let cli = Cli::try_parse_from(["framehost", "--console"]).unwrap();
        assert_eq!(cli.module.as_deref(), Some("--console"));
    }

    #[test]
    fn test_unknown_flag_rejected() {
        assert!(Cli::try_parse_from(["framehost", "main.js", "--bogus"]).is_err());
    }
}
