mod chat;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, bail};
use console::style;

use sensorsql::core::aws::CredentialsProvider;
use sensorsql::core::config::{AppConfig, DEFAULT_CONFIG_FILE};
use sensorsql::core::pipeline::Orchestrator;
use sensorsql::core::terminal::{self, GuideSection};
use sensorsql::interfaces::web::{ApiServer, ConversationLimits};
use sensorsql::logging;

fn print_help() {
    terminal::print_banner();

    GuideSection::new("Questions")
        .command("ask", "Answer one question and print the SQL behind it")
        .command("chat", "Ask follow-up questions in an interactive session")
        .print();

    GuideSection::new("Service")
        .command("serve", "Start the HTTP API for chat front-ends")
        .command("schema", "Show the tables and columns questions can use")
        .print();

    GuideSection::new("Options")
        .command("--config, -c <path>", "Config file (default sensorsql.toml, or SENSORSQL_CONFIG)")
        .command("--question, -q <text>", "Question for `ask` (or pass it as trailing words)")
        .command("--host <addr>, --port <n>", "Listen address for `serve`")
        .print();

    println!(
        " {} {} <command> [options]\n",
        style("Usage:").bold(),
        style("sensorsql").green()
    );
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    Ask { question: String },
    Chat,
    Serve { host: Option<String>, port: Option<u16> },
    Schema,
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CliArgs {
    pub command: Command,
    pub config: Option<PathBuf>,
}

fn flag_value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str> {
    match args.get(i + 1) {
        Some(v) => Ok(v.as_str()),
        None => bail!("{} needs a value", flag),
    }
}

/// `args[0]` is the program name.
pub(crate) fn parse_cli_args(args: &[String]) -> Result<CliArgs> {
    let Some(name) = args.get(1) else {
        return Ok(CliArgs {
            command: Command::Help,
            config: None,
        });
    };

    let mut config = None;
    let mut question: Option<String> = None;
    let mut words: Vec<String> = Vec::new();
    let mut host = None;
    let mut port = None;
    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            flag @ ("--config" | "-c") => {
                config = Some(PathBuf::from(flag_value(args, i, flag)?));
                i += 2;
            }
            flag @ ("--question" | "-q") => {
                question = Some(flag_value(args, i, flag)?.to_string());
                i += 2;
            }
            flag @ "--host" => {
                host = Some(flag_value(args, i, flag)?.to_string());
                i += 2;
            }
            flag @ "--port" => {
                let raw = flag_value(args, i, flag)?;
                let Ok(parsed) = raw.parse::<u16>() else {
                    bail!("--port expects a number, got '{}'", raw);
                };
                port = Some(parsed);
                i += 2;
            }
            other if other.starts_with('-') => bail!("unknown option '{}'", other),
            other => {
                words.push(other.to_string());
                i += 1;
            }
        }
    }

    let command = match name.as_str() {
        "ask" => {
            let question = question.unwrap_or_else(|| words.join(" "));
            if question.trim().is_empty() {
                bail!("`ask` needs a question: sensorsql ask --question \"...\"");
            }
            Command::Ask { question }
        }
        "chat" => Command::Chat,
        "serve" => Command::Serve { host, port },
        "schema" => Command::Schema,
        "help" | "--help" | "-h" => Command::Help,
        other => bail!("unknown command '{}'. Run `sensorsql help`.", other),
    };
    Ok(CliArgs { command, config })
}

fn resolve_config_path(flag: Option<PathBuf>) -> PathBuf {
    flag.or_else(|| std::env::var("SENSORSQL_CONFIG").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

async fn bootstrap(config: &AppConfig) -> Result<Arc<Orchestrator>> {
    let credentials = Arc::new(CredentialsProvider::from_env());
    let orchestrator = Orchestrator::from_config(config, credentials).await?;
    Ok(Arc::new(orchestrator))
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let cli = parse_cli_args(&args)?;
    if cli.command == Command::Help {
        print_help();
        return Ok(());
    }

    let config = AppConfig::load(resolve_config_path(cli.config)).await?;
    logging::init_logging(&config.logging.level);
    let orchestrator = bootstrap(&config).await?;

    match cli.command {
        Command::Ask { question } => {
            let reply = orchestrator
                .answer_with_cancel(&question, Default::default())
                .await;
            terminal::print_reply(&reply.sql, &reply.answer, reply.is_error());
        }
        Command::Chat => chat::run_chat(orchestrator).await?,
        Command::Serve { host, port } => {
            let host = host.unwrap_or(config.server.host.clone());
            let port = port.unwrap_or(config.server.port);
            terminal::print_link("API", &format!("http://{}:{}/api", host, port));
            let limits = ConversationLimits::from_config(&config.server);
            ApiServer::with_limits(orchestrator, limits)
                .serve(&host, port)
                .await?;
        }
        Command::Schema => {
            let catalog = orchestrator.catalog();
            terminal::print_status("Database", &catalog.database);
            for table in catalog.tables() {
                println!("\n {}", style(&table.table).bold().underlined());
                for column in &table.columns {
                    println!("   {:<20} {}", column.name, style(&column.declared_type).dim());
                }
            }
            println!();
        }
        Command::Help => print_help(),
    }
    Ok(())
}
