use berth_core::{BerthConfig, ProcessState, RuntimeEnv};
use berth_launch::Launcher;

/// Run the web process in the current directory (the image's working
/// directory) using the runtime variables from the environment.
pub async fn launch(command: Vec<String>) -> anyhow::Result<()> {
    let workdir = std::env::current_dir()?;

    let dotenv = berth_launch::load_dotenv(&workdir)?;
    let runtime = RuntimeEnv::from_env()?;
    tracing::debug!(dotenv, ?runtime, "runtime environment read");

    let command = if command.is_empty() {
        BerthConfig::load(&workdir)?.runtime.command
    } else {
        command
    };

    let mut launcher = Launcher::new(runtime, workdir, command);
    match launcher.launch().await? {
        ProcessState::Crashed { code } => match code {
            Some(code) => anyhow::bail!("process crashed with exit code {code}"),
            None => anyhow::bail!("process was killed by a signal"),
        },
        state => {
            println!("Process {state}");
            Ok(())
        }
    }
}
