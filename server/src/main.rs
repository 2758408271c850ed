use clap::Parser;
use log::info;
use server::{MockServer, ServerSetup};
use std::time::Duration;

/// Parses command-line arguments and serves a single RCon session.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value_t = shared::DEFAULT_RCON_PORT)]
        port: u16,
        /// Password clients must log in with
        #[clap(long, default_value = "password")]
        password: String,
        /// Console messages to send after login, -1 for no limit
        #[clap(short, long, default_value = "0", allow_negative_numbers = true)]
        messages: i32,
        /// Milliseconds between two console messages
        #[clap(long, default_value = "1")]
        message_interval: u64,
        /// Send every console message twice
        #[clap(long)]
        repeat: bool,
        /// Corrupt the checksum of every console message
        #[clap(long)]
        corrupt: bool,
        /// Send multi-part responses out of order
        #[clap(long)]
        disorder: bool,
        /// Never answer keep-alives
        #[clap(long)]
        ignore_keep_alive: bool,
        /// Never answer logins
        #[clap(long)]
        down: bool,
        /// Stop after this many seconds
        #[clap(long)]
        max_run: Option<u64>,
    }

    env_logger::init();
    let args = Args::parse();

    let setup = ServerSetup {
        password: args.password,
        login_server_down: args.down,
        disordered_multi_part: args.disorder,
        console_messages: args.messages,
        repeated_console_messages: args.repeat,
        corrupt_console_messages: args.corrupt,
        dont_answer_keep_alive: args.ignore_keep_alive,
        message_interval: Duration::from_millis(args.message_interval),
        max_run: args.max_run.map(Duration::from_secs),
        ..ServerSetup::default()
    };

    let address = format!("{}:{}", args.host, args.port);
    let server = MockServer::bind(&address, setup).await?;
    let metrics = server.metrics();

    server.run().await?;

    info!("Server metrics: {:?}", metrics.snapshot());
    Ok(())
}
