use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// 配置错误的进程退出码
const EXIT_CONFIG_ERROR: i32 = 23;

#[derive(Parser)]
#[command(
    name = "windrose",
    version,
    about = "Windrose - connection dispatch core for modular traffic forwarding"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file path
    #[arg(short, long, global = true, default_value = "config.yaml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the dispatch core (default when no subcommand given)
    Run,

    /// Validate config file syntax and semantics
    Check,

    /// Generate a sample configuration
    Generate {
        /// Output file path (default: stdout)
        #[arg(short, long)]
        output: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Check) => cmd_check(&cli.config),
        Some(Commands::Generate { output }) => cmd_generate(output.as_deref()),
        Some(Commands::Run) | None => cmd_run(&cli.config).await,
    }
}

async fn cmd_run(config_path: &str) -> Result<()> {
    let config = match windrose::config::load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("config '{}' has errors: {:#}", config_path, e);
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log.level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("windrose starting");

    let app = match windrose::app::App::new(config) {
        Ok(app) => app,
        Err(e) => {
            eprintln!("config '{}' has errors: {:#}", config_path, e);
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };

    app.run().await
}

fn cmd_check(config_path: &str) -> Result<()> {
    match windrose::config::load_config(config_path) {
        Ok(config) => {
            println!("config '{}' is valid", config_path);
            println!("  inbounds:     {}", config.inbounds.len());
            println!("  outbounds:    {}", config.outbounds.len());
            println!("  router rules: {}", config.router.rules.len());
            Ok(())
        }
        Err(e) => {
            eprintln!("config '{}' has errors:", config_path);
            eprintln!("  {:#}", e);
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    }
}

fn cmd_generate(output: Option<&str>) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, SAMPLE_CONFIG)?;
            println!("written to '{}'", path);
        }
        None => {
            print!("{}", SAMPLE_CONFIG);
        }
    }
    Ok(())
}

const SAMPLE_CONFIG: &str = r#"# Windrose sample configuration
log:
  level: info
  # access:
  #   format: text
  #   file: /var/log/windrose/access.log

inbounds:
  - tag: forward-in
    protocol: forward
    listen: "127.0.0.1"
    port: 2080
    settings:
      address: upstream.example.com
      port: 8080
    sniffing:
      enabled: true
      destOverride: [tls, http]

outbounds:
  - tag: direct
    protocol: direct

  - tag: block
    protocol: reject

router:
  domainStrategy: AsIs
  rules:
    - type: field
      outboundTag: block
      domain: [ads, tracker, adservice]

    - type: field
      outboundTag: direct
      ip: ["10.0.0.0/8", "172.16.0.0/12", "192.168.0.0/16"]
"#;
