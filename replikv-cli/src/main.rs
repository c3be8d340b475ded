use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use serde_json::json;
use std::time::Instant;
use tracing::{debug, error, info};

#[derive(Parser, Debug)]
#[command(name = "replikv-cli")]
#[command(about = "ReplikV CLI - operator console for replication slaves", long_about = None)]
struct Args {
    /// Slave host
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Slave admin port
    #[arg(short = 'p', long, default_value = "15600")]
    port: u16,

    /// Command to execute (if not in interactive mode)
    #[arg(trailing_var_arg = true)]
    command: Vec<String>,
}

struct ReplikvClient {
    base_url: String,
    client: reqwest::Client,
}

impl ReplikvClient {
    fn new(host: &str, port: u16) -> Self {
        Self {
            base_url: format!("http://{}:{}", host, port),
            client: reqwest::Client::new(),
        }
    }

    async fn execute_command(&self, command: &str, args: &[String]) -> Result<String> {
        let start = Instant::now();

        let response = match command.to_lowercase().as_str() {
            "status" | "info" => self.cmd_status().await?,
            "controls" => self.cmd_controls().await?,
            "failover_reset" => self.cmd_control("failover_reset", args).await?,
            "new_master" => self.cmd_new_master(args).await?,
            "get" => self.cmd_get(args).await?,
            "set" => self.cmd_set(args).await?,
            "del" | "delete" => self.cmd_del(args).await?,
            "stats" => self.cmd_stats().await?,
            "ping" => self.cmd_ping().await?,
            "help" => self.help_text(),
            _ => {
                return Err(anyhow::anyhow!(
                    "Unknown command '{}'. Type HELP for available commands.",
                    command
                ));
            }
        };

        debug!("{} took {:?}", command, start.elapsed());
        Ok(response)
    }

    async fn cmd_status(&self) -> Result<String> {
        let res = self
            .client
            .get(format!("{}/replication/status", self.base_url))
            .send()
            .await?
            .json::<serde_json::Value>()
            .await?;

        let state = res["state"].as_str().unwrap_or("unknown");
        let state = match state {
            "connected" => state.green(),
            "given_up" => state.red().bold(),
            _ => state.yellow(),
        };

        let mut output = Vec::new();
        output.push("# Replication".to_string());
        output.push(format!(
            "master: {}:{}",
            res["master"]["host"].as_str().unwrap_or("?"),
            res["master"]["port"]
        ));
        output.push(format!("state: {}", state));
        output.push(format!(
            "serving_mode: {}",
            res["serving_mode"].as_str().unwrap_or("unknown")
        ));
        output.push(format!("applied_offset: {}", res["applied_offset"]));
        output.push(format!(
            "master_offset: {}",
            res["master_offset"].as_u64().map_or("-".to_string(), |o| o.to_string())
        ));
        output.push(format!(
            "lag: {}",
            res["lag"].as_u64().map_or("-".to_string(), |o| o.to_string())
        ));
        output.push(String::new());
        output.push("# Failover".to_string());
        output.push(format!("backoff_ms: {}", res["backoff_ms"]));
        output.push(format!("recent_reconnects: {}", res["recent_reconnects"]));
        output.push(format!("given_up: {}", res["given_up"]));
        output.push(format!("total_failures: {}", res["total_failures"]));
        output.push(format!(
            "last_failure_at: {}",
            res["last_failure_at"].as_str().unwrap_or("-")
        ));
        output.push(format!(
            "last_resume_at: {}",
            res["last_resume_at"].as_str().unwrap_or("-")
        ));

        Ok(output.join("\n"))
    }

    async fn cmd_controls(&self) -> Result<String> {
        let res = self
            .client
            .get(format!("{}/admin/controls", self.base_url))
            .send()
            .await?
            .json::<Vec<serde_json::Value>>()
            .await?;

        let lines: Vec<String> = res
            .iter()
            .map(|control| {
                format!(
                    "{}\n    {}",
                    control["name"].as_str().unwrap_or("?").bold(),
                    control["help"].as_str().unwrap_or("")
                )
            })
            .collect();

        Ok(lines.join("\n"))
    }

    async fn cmd_new_master(&self, args: &[String]) -> Result<String> {
        if args.len() != 2 {
            return Err(anyhow::anyhow!("Usage: NEW_MASTER host port"));
        }
        self.cmd_control("new_master", args).await
    }

    async fn cmd_control(&self, command: &str, args: &[String]) -> Result<String> {
        let res = self
            .client
            .post(format!("{}/admin/control", self.base_url))
            .json(&json!({
                "command": command,
                "args": args
            }))
            .send()
            .await?
            .json::<serde_json::Value>()
            .await?;

        let message = res["message"].as_str().unwrap_or("").to_string();
        if res["success"].as_bool().unwrap_or(false) {
            Ok(message.green().to_string())
        } else {
            Err(anyhow::anyhow!("{}", message))
        }
    }

    async fn cmd_set(&self, args: &[String]) -> Result<String> {
        if args.len() < 2 {
            return Err(anyhow::anyhow!("Usage: SET key value [ttl]"));
        }

        let ttl = args.get(2).and_then(|s| s.parse::<u64>().ok());

        let res = self
            .client
            .post(format!("{}/kv/set", self.base_url))
            .json(&json!({
                "key": args[0],
                "value": args[1],
                "ttl": ttl
            }))
            .send()
            .await?
            .json::<serde_json::Value>()
            .await?;

        if res["success"].as_bool().unwrap_or(false) {
            Ok("OK".green().to_string())
        } else {
            Err(anyhow::anyhow!(
                "Error: {}",
                res["error"].as_str().unwrap_or("Unknown")
            ))
        }
    }

    async fn cmd_get(&self, args: &[String]) -> Result<String> {
        if args.is_empty() {
            return Err(anyhow::anyhow!("Usage: GET key"));
        }

        let response = self
            .client
            .get(format!("{}/kv/{}", self.base_url, args[0]))
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok("(nil)".dimmed().to_string());
        }

        let res = response.json::<serde_json::Value>().await?;
        match res["value"].as_str() {
            Some(value) => Ok(format!("\"{}\"", value)),
            None => Err(anyhow::anyhow!(
                "Error: {}",
                res["error"].as_str().unwrap_or("Unknown")
            )),
        }
    }

    async fn cmd_del(&self, args: &[String]) -> Result<String> {
        if args.is_empty() {
            return Err(anyhow::anyhow!("Usage: DEL key"));
        }

        let res = self
            .client
            .delete(format!("{}/kv/{}", self.base_url, args[0]))
            .send()
            .await?
            .json::<serde_json::Value>()
            .await?;

        match res["deleted"].as_bool() {
            Some(deleted) => Ok(format!("(integer) {}", u8::from(deleted))),
            None => Err(anyhow::anyhow!(
                "Error: {}",
                res["error"].as_str().unwrap_or("Unknown")
            )),
        }
    }

    async fn cmd_stats(&self) -> Result<String> {
        let res = self
            .client
            .get(format!("{}/kv/stats", self.base_url))
            .send()
            .await?
            .json::<serde_json::Value>()
            .await?;

        let mut output = Vec::new();
        output.push("# Keyspace".to_string());
        output.push(format!("keys: {}", res["total_keys"]));
        output.push(format!("memory: {} bytes", res["total_memory_bytes"]));
        output.push(String::new());
        output.push("# Operations".to_string());
        output.push(format!("replicated: {}", res["replicated"]));
        output.push(format!("gets: {}", res["gets"]));
        output.push(format!("sets: {}", res["sets"]));
        output.push(format!("dels: {}", res["dels"]));

        Ok(output.join("\n"))
    }

    async fn cmd_ping(&self) -> Result<String> {
        let res = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await?
            .json::<serde_json::Value>()
            .await?;

        if res["status"] == "healthy" {
            Ok("PONG".green().to_string())
        } else {
            Ok("Server unhealthy".red().to_string())
        }
    }

    fn help_text(&self) -> String {
        format!(
            r#"{}

{}
  STATUS                     Show replication and failover state
  CONTROLS                   List operator controls
  FAILOVER_RESET             Forget reconnect history and reconnect
  NEW_MASTER host port       Replicate from a different master

{}
  GET key                    Get the value of key
  SET key value [ttl]        Set key (only while failed over and serving)
  DEL key                    Delete key (only while failed over and serving)
  STATS                      Local store statistics

{}
  PING                       Ping the slave
  HELP                       Show this help message
  QUIT                       Exit the CLI
"#,
            "ReplikV CLI - Available Commands".bold().cyan(),
            "Replication:".bold(),
            "Keys:".bold(),
            "Server:".bold(),
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Use info level by default to show user-facing messages
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_writer(std::io::stdout)
        .with_env_filter(tracing_subscriber::EnvFilter::new(log_level))
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    let args = Args::parse();
    let client = ReplikvClient::new(&args.host, args.port);

    if !args.command.is_empty() {
        // Command mode: execute single command and exit
        let cmd = &args.command[0];
        let cmd_args: Vec<String> = args.command[1..].to_vec();

        match client.execute_command(cmd, &cmd_args).await {
            Ok(output) => {
                info!("{}", output);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "{}", format!("Error: {}", e).red());
                std::process::exit(1);
            }
        }
    } else {
        run_interactive(client, &args.host, args.port).await
    }
}

async fn run_interactive(client: ReplikvClient, host: &str, port: u16) -> Result<()> {
    info!(
        "{}",
        format!("ReplikV CLI v{}", env!("CARGO_PKG_VERSION"))
            .bold()
            .cyan()
    );
    info!("Connected to {}:{}", host, port);
    info!("Type {} for available commands\n", "HELP".bold());

    let mut rl = DefaultEditor::new()?;

    loop {
        let prompt = format!("{}> ", format!("replikv {}:{}", host, port).green());

        match rl.readline(&prompt) {
            Ok(line) => {
                let parts: Vec<String> = line.split_whitespace().map(String::from).collect();
                if parts.is_empty() {
                    continue;
                }

                rl.add_history_entry(&line)?;

                let cmd = &parts[0];
                let args = &parts[1..];

                if cmd.eq_ignore_ascii_case("quit") || cmd.eq_ignore_ascii_case("exit") {
                    info!("Goodbye!");
                    break;
                }

                match client.execute_command(cmd, args).await {
                    Ok(output) => info!("{}", output),
                    Err(e) => {
                        error!(error = %e, "{}", format!("Error: {}", e).red());
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                info!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                info!("Goodbye!");
                break;
            }
            Err(err) => {
                error!(error = ?err, "Readline error: {:?}", err);
                break;
            }
        }
    }

    Ok(())
}
