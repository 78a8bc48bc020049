use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "dbship",
    about = "Roll database changes out from CI, stage by stage",
    version,
    propagate_version = true,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Release migration files and roll them out stage by stage.
    ///
    /// Files matching --file-pattern become a release (reused when an
    /// identical one exists), a plan is created for --targets, plan checks
    /// gate per --check-plan, and stages run in order up to
    /// --target-stage. Ctrl-C cancels the task runs started so far.
    Rollout(commands::rollout::RolloutArgs),

    /// Review migration files against --targets without creating anything.
    ///
    /// Every advice is logged; the command fails when any is an error.
    Check(commands::check::CheckArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("dbship=info".parse()?)
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Rollout(args) => commands::rollout::rollout(args).await,
        Commands::Check(args) => commands::check::check(args).await,
    }
}
