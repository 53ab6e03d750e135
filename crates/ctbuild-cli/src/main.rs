//! ctbuild - build anything inside a throwaway container
//!
//! Reads a build environment descriptor, creates a container from its base
//! image with the source, result and cache directories mounted, injects the
//! declared files, runs the build command with the given arguments, and
//! streams its output to stdout.
//!
//! ```text
//! ctbuild -c ctbuild.toml build.sh --release
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use ctbuild_core::{
    init_tracing, spawn_signal_listener, BuildEnvironmentSpec, BuildError, BuildRequest,
    CleanupPolicy, ContainerOrchestrator, DockerClient, ErrorKind, HostBindings,
};
use tracing::{debug, Level};

/// Exit status used when the build was interrupted by a signal.
const INTERRUPTED_EXIT: u8 = 130;

#[derive(Parser, Debug)]
#[command(name = "ctbuild")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Tool for building anything inside containers", long_about = None)]
struct Cli {
    /// Build arguments passed to the build command
    #[arg(required = true, num_args = 1..)]
    args: Vec<String>,

    /// Build environment descriptor
    #[arg(short, long, env = "CTBUILD_CONFIG", default_value = "ctbuild.toml")]
    config: PathBuf,

    /// Do not remove the container after the build (it is killed instead)
    #[arg(short = 'n', long)]
    no_cleanup: bool,

    /// Source directory, mounted at /source
    #[arg(short, long, env = "CTBUILD_SOURCE_DIR", default_value = ".")]
    source_dir: PathBuf,

    /// Results output directory, mounted at /result
    #[arg(short = 'd', long, env = "CTBUILD_RESULT_DIR", default_value = "./result")]
    result_dir: PathBuf,

    /// Host directory for cache, mounted at /cache
    #[arg(
        short = 'e',
        long,
        env = "CTBUILD_CACHE_DIR",
        default_value = "/tmp/ctbuild-cache"
    )]
    cache_dir: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn bindings(&self) -> HostBindings {
        HostBindings::new(&self.source_dir, &self.result_dir, &self.cache_dir)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::WARN };
    init_tracing(cli.json, level);

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("ctbuild: {}", describe(&err));
            ExitCode::from(exit_status(&err))
        }
    }
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    let cancel = spawn_signal_listener().context("failed to install signal handlers")?;

    let spec = BuildEnvironmentSpec::from_path(&cli.config).map_err(|source| {
        BuildError::ConfigParse {
            path: cli.config.clone(),
            source,
        }
    })?;
    debug!(
        image = spec.base_image(),
        command = spec.build_cmd(),
        files = spec.files().len(),
        "Loaded build environment"
    );

    let client = DockerClient::connect().context("failed to create docker client")?;
    let orchestrator = ContainerOrchestrator::new(Arc::new(client));

    let request = BuildRequest {
        spec,
        bindings: cli.bindings(),
        build_args: cli.args.clone(),
        cleanup: CleanupPolicy::from_preserve(cli.no_cleanup),
    };

    let mut stdout = tokio::io::stdout();
    orchestrator.run_build(&request, cancel, &mut stdout).await?;

    Ok(())
}

/// One-line description of a failure.
///
/// Build errors already embed their cause, so only the kind is prepended;
/// anything else prints its full context chain.
fn describe(err: &anyhow::Error) -> String {
    match err.downcast_ref::<BuildError>() {
        Some(build) => format!("{}: {}", build.kind(), build),
        None => format!("{:#}", err),
    }
}

/// Map a failure to the process exit status.
///
/// A failed build exits with the container's own code when it fits in a
/// process status.
fn exit_status(err: &anyhow::Error) -> u8 {
    let Some(build) = err.downcast_ref::<BuildError>() else {
        return 1;
    };

    match build.kind() {
        ErrorKind::NonZeroExit => build
            .exit_code()
            .and_then(|code| u8::try_from(code).ok())
            .filter(|code| *code != 0)
            .unwrap_or(1),
        ErrorKind::Interrupted => INTERRUPTED_EXIT,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cli = Cli::try_parse_from(["ctbuild", "build.sh"]).unwrap();

        assert_eq!(cli.args, vec!["build.sh".to_string()]);
        assert_eq!(cli.config, PathBuf::from("ctbuild.toml"));
        assert_eq!(cli.source_dir, PathBuf::from("."));
        assert_eq!(cli.result_dir, PathBuf::from("./result"));
        assert_eq!(cli.cache_dir, PathBuf::from("/tmp/ctbuild-cache"));
        assert!(!cli.no_cleanup);
    }

    #[test]
    fn short_flags_and_multiple_args() {
        let cli = Cli::try_parse_from([
            "ctbuild", "-c", "env.toml", "-n", "-s", "src", "-d", "out", "-e", "cache", "build.sh",
            "--", "--release",
        ])
        .unwrap();

        assert_eq!(cli.config, PathBuf::from("env.toml"));
        assert!(cli.no_cleanup);
        assert_eq!(cli.source_dir, PathBuf::from("src"));
        assert_eq!(cli.result_dir, PathBuf::from("out"));
        assert_eq!(cli.cache_dir, PathBuf::from("cache"));
        assert_eq!(
            cli.args,
            vec!["build.sh".to_string(), "--release".to_string()]
        );
    }

    #[test]
    fn build_args_are_required() {
        assert!(Cli::try_parse_from(["ctbuild"]).is_err());
    }

    fn wrap(err: BuildError) -> anyhow::Error {
        anyhow::Error::from(err)
    }

    #[test]
    fn exit_status_follows_container_code() {
        assert_eq!(exit_status(&wrap(BuildError::NonZeroExit { code: 2 })), 2);
        assert_eq!(exit_status(&wrap(BuildError::NonZeroExit { code: 300 })), 1);
        assert_eq!(exit_status(&wrap(BuildError::NonZeroExit { code: -1 })), 1);
    }

    #[test]
    fn exit_status_for_interrupt_and_other_failures() {
        assert_eq!(
            exit_status(&wrap(BuildError::Interrupted { unit: None })),
            INTERRUPTED_EXIT
        );
        assert_eq!(exit_status(&anyhow::anyhow!("no docker")), 1);
    }

    #[test]
    fn describe_prefixes_kind_once() {
        let line = describe(&wrap(BuildError::NonZeroExit { code: 2 }));
        assert_eq!(line, "build failed: container exited with code 2");

        let setup = anyhow::anyhow!("socket missing").context("failed to create docker client");
        assert_eq!(
            describe(&setup),
            "failed to create docker client: socket missing"
        );
    }

    #[test]
    fn malformed_descriptor_is_described_on_one_line() {
        let source =
            BuildEnvironmentSpec::from_toml_str("base_image = \"alpine\"\nbuild_cmd = \n")
                .unwrap_err();
        let err = wrap(BuildError::ConfigParse {
            path: PathBuf::from("ctbuild.toml"),
            source,
        });

        let line = describe(&err);
        assert_eq!(line.lines().count(), 1, "{line}");
        assert!(line.starts_with("config parse error: "), "{line}");
        assert!(line.contains("line 2, column 13"), "{line}");
        assert_eq!(exit_status(&err), 1);
    }
}
