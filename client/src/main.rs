use clap::Parser;
use client::{ClientConfig, CommandResult, RconClient, RconError};
use log::{info, warn};
use serde::Serialize;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "Run commands on a BattlEye RCon server", long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:2302")]
    server: String,

    /// RCon password
    #[arg(short = 'p', long, default_value = "")]
    password: String,

    /// Login and command timeout in milliseconds
    #[arg(short = 't', long, default_value = "3000")]
    timeout: u64,

    /// Keep printing console messages for this many seconds after the commands
    #[arg(short = 'l', long, default_value = "0")]
    listen: u64,

    /// Print results as JSON lines
    #[arg(long)]
    json: bool,

    /// Commands to run, in order
    commands: Vec<String>,
}

#[derive(Serialize)]
struct Output<'a> {
    command: &'a str,
    #[serde(flatten)]
    result: &'a CommandResult,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    let timeout = Duration::from_millis(args.timeout);
    let config = ClientConfig {
        login_timeout: timeout,
        command_timeout: timeout,
        ..ClientConfig::new(args.server.as_str(), args.password.as_str())
    };

    info!("Connecting to: {}", config.server);
    let mut client = RconClient::bind(config).await?;
    let mut messages = client.take_messages();
    let mut problems = client.take_problems();

    client.connect().await?;

    for command in &args.commands {
        let result = client.send_command(command).await?;
        if args.json {
            println!(
                "{}",
                serde_json::to_string(&Output {
                    command,
                    result: &result
                })?
            );
        } else if result.succeeded {
            println!("{}", result.body);
        } else {
            warn!("No response to '{}'", command);
        }
    }

    if args.listen > 0 {
        info!("Listening for console messages for {}s", args.listen);
        let deadline = tokio::time::sleep(Duration::from_secs(args.listen));
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => break,
                reason = client.wait_for_disconnect() => {
                    warn!("Session ended: {}", reason);
                    break;
                }
                Some(message) = async { messages.as_mut()?.recv().await } => {
                    if args.json {
                        println!("{}", serde_json::to_string(&message)?);
                    } else {
                        println!("{}", message.text);
                    }
                }
                Some(problem) = async { problems.as_mut()?.recv().await } => {
                    warn!("{}", problem);
                }
            }
        }
    }

    match client.disconnect().await {
        Ok(()) | Err(RconError::Closed) => Ok(()),
        Err(err) => Err(err.into()),
    }
}
