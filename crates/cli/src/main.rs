use clap::{Parser, Subcommand};
use taskbridge::channels::ChannelHandle;
use taskbridge::exec::AgentRunner;

#[derive(Parser)]
#[command(name = "taskbridge")]
#[command(about = "Run an agent CLI from chat commands and relay its output", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory, a default config, and the workspace directory.
    Init {
        /// Config file path (default: TASKBRIDGE_CONFIG_PATH or ~/.taskbridge/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Run the bridge: connect the chat channel and execute "/claude <task>" commands from the owner.
    Run {
        /// Config file path (default: TASKBRIDGE_CONFIG_PATH or ~/.taskbridge/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// HTTP port for health and webhook (default from config or 15151)
        #[arg(long, short)]
        port: Option<u16>,

        /// Agent working directory (wins over WORKSPACE and agent.workspace)
        #[arg(long, short, value_name = "DIR")]
        workspace: Option<std::path::PathBuf>,
    },

    /// Run one task through the agent locally and print the reply as it would be sent.
    Exec {
        /// Config file path (default: TASKBRIDGE_CONFIG_PATH or ~/.taskbridge/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// Resume the agent's previous session.
        #[arg(long = "continue")]
        continue_session: bool,

        /// Task text.
        #[arg(required = true, trailing_var_arg = true)]
        task: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("taskbridge {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Run {
            config,
            port,
            workspace,
        }) => {
            if let Err(e) = run_bridge(config, port, workspace).await {
                log::error!("bridge failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Exec {
            config,
            continue_session,
            task,
        }) => {
            if let Err(e) = run_exec(config, continue_session, task.join(" ")).await {
                log::error!("exec failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(taskbridge::config::default_config_path);
    let dir = taskbridge::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_bridge(
    config_path: Option<std::path::PathBuf>,
    port: Option<u16>,
    workspace: Option<std::path::PathBuf>,
) -> anyhow::Result<()> {
    let (mut config, path) = taskbridge::config::load_config(config_path)?;
    log::debug!("loaded config from {}", path.display());
    if let Some(p) = port {
        config.gateway.port = p;
    }
    config.agent.workspace_override = workspace;
    log::info!("starting taskbridge on {}:{}", config.gateway.bind, config.gateway.port);
    taskbridge::gateway::run_gateway(config).await
}

/// Prints each segment to stdout in place of a chat channel.
struct StdoutChannel;

#[async_trait::async_trait]
impl ChannelHandle for StdoutChannel {
    fn id(&self) -> &str {
        "stdout"
    }

    fn stop(&self) {}

    async fn send_message(&self, _conversation_id: &str, text: &str) -> Result<(), String> {
        println!("{}\n", text);
        Ok(())
    }
}

async fn run_exec(
    config_path: Option<std::path::PathBuf>,
    continue_session: bool,
    task: String,
) -> anyhow::Result<()> {
    if task.trim().is_empty() {
        anyhow::bail!("no task given");
    }
    let (mut config, _) = taskbridge::config::load_config(config_path)?;
    // the reply is printed below; do not echo it twice
    config.agent.mirror_output = false;
    let executor = taskbridge::exec::AgentExecutor::from_config(&config);
    let policy = taskbridge::delivery::DeliveryPolicy::from(&config.delivery);
    let started = std::time::Instant::now();
    let output = executor.run(task.trim(), continue_session).await?;
    let reply = format!(
        "{}{}",
        output,
        taskbridge::gateway::completion_footer(started.elapsed())
    );
    taskbridge::delivery::deliver(&StdoutChannel, "local", &reply, &policy).await?;
    Ok(())
}
