//! # handoff
//!
//! Command-line client for relay item handoffs. `host` waits for a receiver
//! and prints the connection code; `get` redeems a code and prints the item.

#![deny(unsafe_code)]

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use handoff_client::{
    AlwaysOnline, HandoffMachine, Notice, Phase, Role, WebSocketConfig, WebSocketTransport,
};
use handoff_core::HandoffError;
use handoff_settings::HandoffSettings;

/// Hand an item to another device through a relay.
#[derive(Parser, Debug)]
#[command(name = "handoff", about = "Peer-to-peer item handoff through a relay")]
struct Cli {
    /// Relay URL (overrides settings).
    #[arg(long, global = true)]
    relay: Option<String>,

    /// Log level (overrides settings; `RUST_LOG` wins over both).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Host an item and wait until a receiver picks it up.
    Host {
        /// Item identifier to hand off.
        item: String,
    },
    /// Retrieve the item behind a connection code.
    Get {
        /// Connection code shown on the sending device.
        code: String,
    },
}

impl Cli {
    fn settings(&self) -> Result<HandoffSettings> {
        let mut settings = handoff_settings::get_settings().clone();
        if let Some(url) = &self.relay {
            settings.relay.url.clone_from(url);
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        settings.validate().context("invalid settings")?;
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let settings = cli.settings()?;
    handoff_core::logging::init_subscriber(&settings.logging.level);

    let transport = WebSocketTransport::new(WebSocketConfig::from_settings(&settings.relay));
    tracing::info!(url = transport.url(), "using relay");
    let machine = HandoffMachine::with_transport(Arc::new(transport), Arc::new(AlwaysOnline));

    let role = match start(&machine, &cli.command) {
        Ok(role) => role,
        Err(err) => {
            eprintln!("{}", rejection_message(&err));
            return Ok(ExitCode::FAILURE);
        }
    };
    drive(&machine, role).await
}

/// Issue the request for `command` and return the role it runs as.
fn start(machine: &HandoffMachine, command: &Command) -> Result<Role, HandoffError> {
    match command {
        Command::Host { item } => {
            machine.host_item(item)?;
            Ok(Role::Sender)
        }
        Command::Get { code } => {
            machine.enter_receiver_mode();
            machine.retrieve_item(code)?;
            Ok(Role::Receiver)
        }
    }
}

/// What to tell the user when a request is refused.
fn rejection_message(err: &HandoffError) -> String {
    Notice::for_error(err).map_or_else(|| err.to_string(), |notice| notice.to_string())
}

/// Follow the view until the flow ends, printing what a user needs to see.
async fn drive(machine: &HandoffMachine, role: Role) -> Result<ExitCode> {
    let mut view = machine.view();
    let mut code_shown = false;

    loop {
        let current = view.borrow_and_update().clone();
        if !code_shown && !current.code_text.is_empty() {
            println!("Connection code: {}", current.code_text);
            code_shown = true;
        }
        if current.phase == Phase::Idle {
            return Ok(match (role, current.notice) {
                (Role::Sender, Some(Notice::ItemDelivered)) => {
                    println!("{}", Notice::ItemDelivered);
                    ExitCode::SUCCESS
                }
                (Role::Receiver, Some(Notice::ItemRetrieved)) => {
                    println!("{}", current.data_text);
                    ExitCode::SUCCESS
                }
                (_, Some(notice)) => {
                    eprintln!("{notice}");
                    ExitCode::FAILURE
                }
                (_, None) => ExitCode::FAILURE,
            });
        }

        tokio::select! {
            changed = view.changed() => changed.context("handoff machine stopped")?,
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for ctrl-c")?;
                machine.back_to_idle();
                eprintln!("cancelled");
                return Ok(ExitCode::from(130));
            }
        }
    }
}
