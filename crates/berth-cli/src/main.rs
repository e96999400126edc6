mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "berth", about = "Build and run Flask web apps as container images")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add berth.toml to an existing Flask project
    Init,
    /// Show the image layers, cache keys and predicted reuse
    Plan {
        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
        /// Also print the generated Dockerfile
        #[arg(long)]
        dockerfile: bool,
    },
    /// Eject Dockerfile for manual customization
    Eject,
    /// Build the container image
    Build {
        /// Image tag (default: <name>:latest)
        #[arg(long, short = 't')]
        tag: Option<String>,
        /// Allow building with uncommitted changes
        #[arg(long)]
        allow_dirty: bool,
    },
    /// Start a container from the built image
    Run {
        /// Image tag (default: <name>:latest)
        #[arg(long, short = 't')]
        tag: Option<String>,
        /// Host port to publish (default: the application port)
        #[arg(long, short = 'p')]
        publish: Option<u16>,
        /// Override a runtime variable (KEY=VALUE, repeatable)
        #[arg(long, short = 'e')]
        env: Vec<String>,
        /// Run in the background
        #[arg(long, short = 'd')]
        detach: bool,
        /// Container name
        #[arg(long)]
        name: Option<String>,
    },
    /// Launch the web process (used as the container's main process)
    Launch {
        /// Command to run instead of [runtime].command
        #[arg(last = true)]
        command: Vec<String>,
    },
    /// Show the process state of a container
    Status {
        /// Container name or id
        container: String,
        /// Print the state as JSON
        #[arg(long)]
        json: bool,
    },
    /// Stop a running container
    Stop {
        /// Container name or id
        container: String,
    },
    /// Check the container engine and project readiness
    Doctor,
    /// Delete the built image, local bundle and layer ledger
    Destroy {
        /// Skip confirmation prompt
        #[arg(long, short = 'y')]
        yes: bool,
        /// Image tag (default: <name>:latest)
        #[arg(long, short = 't')]
        tag: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init => commands::init_project().await?,
        Commands::Plan { json, dockerfile } => commands::plan(json, dockerfile).await?,
        Commands::Eject => commands::eject().await?,
        Commands::Build { tag, allow_dirty } => commands::build(tag, allow_dirty).await?,
        Commands::Run {
            tag,
            publish,
            env,
            detach,
            name,
        } => {
            commands::run(commands::RunArgs {
                tag,
                publish,
                env,
                detach,
                name,
            })
            .await?
        }
        Commands::Launch { command } => commands::launch(command).await?,
        Commands::Status { container, json } => commands::status(&container, json).await?,
        Commands::Stop { container } => commands::stop(&container).await?,
        Commands::Doctor => commands::doctor().await?,
        Commands::Destroy { yes, tag } => commands::destroy(yes, tag).await?,
    }

    Ok(())
}
