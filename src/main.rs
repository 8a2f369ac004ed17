use std::sync::Arc;

use anyhow::{bail, Context, Result};
use wireless_link_lib::config::LinkConfig;
use wireless_link_lib::serial::LinkEvent;
use wireless_link_lib::session::{GenerationState, LinkController};
use wireless_link_lib::topology::{Mode, PlacedComponent};
use wireless_link_lib::{build_controller, commands, init_logging};

const USAGE: &str = "usage: wireless-link [--config FILE] [--port NAME] <command>

commands:
  ports               list serial ports
  plan <MODES>        show structure and IC sockets for e.g. S,S,P,P,P
  send <STRUCTURE>    connect and generate a structure such as S2P5
  reset               connect and clear the circuit on the board";

enum Command {
    Ports,
    Plan(String),
    Send(String),
    Reset,
}

struct Args {
    config: Option<String>,
    port: Option<String>,
    command: Command,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Args> {
    let mut config = None;
    let mut port = None;
    let mut positional = Vec::new();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => config = Some(args.next().context("--config needs a file")?),
            "--port" => port = Some(args.next().context("--port needs a port name")?),
            "-h" | "--help" => bail!("{}", USAGE),
            _ => positional.push(arg),
        }
    }

    let mut positional = positional.into_iter();
    let command = match (positional.next().as_deref(), positional.next()) {
        (Some("ports"), None) => Command::Ports,
        (Some("plan"), Some(modes)) => Command::Plan(modes),
        (Some("send"), Some(structure)) => Command::Send(structure),
        (Some("reset"), None) => Command::Reset,
        _ => bail!("{}", USAGE),
    };

    Ok(Args { config, port, command })
}

fn parse_modes(modes: &str) -> Result<Vec<PlacedComponent>> {
    modes
        .split(',')
        .filter(|m| !m.trim().is_empty())
        .map(|m| {
            let letter = m.trim().to_ascii_uppercase();
            match letter.chars().next().and_then(Mode::from_letter) {
                Some(mode) if letter.len() == 1 => Ok(PlacedComponent::new("component", "", mode)),
                _ => bail!("unknown mode {:?}, expected S or P", m),
            }
        })
        .collect()
}

async fn connect(controller: &Arc<LinkController>) -> Result<()> {
    let port = commands::connect_link(controller).await.map_err(anyhow::Error::msg)?;
    println!("connected to {}", port.port_name);
    Ok(())
}

fn print_records(controller: &Arc<LinkController>) {
    let mut events = controller.link().subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let LinkEvent::Record(record) = event {
                match serde_json::to_string(&record) {
                    Ok(line) => println!("{}", line),
                    Err(e) => log::warn!("Unprintable record: {}", e),
                }
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args(std::env::args().skip(1))?;

    let mut config = match &args.config {
        Some(path) => LinkConfig::load(path).with_context(|| format!("failed to load {}", path))?,
        None => LinkConfig::default(),
    };
    if args.port.is_some() {
        config.port_name = args.port;
    }
    init_logging(&config.log_level);

    match args.command {
        Command::Ports => {
            for port in commands::list_serial_ports().await.map_err(anyhow::Error::msg)? {
                let marker = if port.is_stlink { " (ST-LINK)" } else { "" };
                println!("{}{}", port.port_name, marker);
            }
        }
        Command::Plan(modes) => {
            let components = parse_modes(&modes)?;
            let structure = commands::encode_structure(components.clone());
            println!("structure: {}", structure);
            for ic in commands::plan_ic_placements(structure, components, false) {
                let kind = if ic.is_parallel { "parallel" } else { "series" };
                println!("IC #{}: {} x{}", ic.ic_number, kind, ic.components.len());
            }
        }
        Command::Send(structure) => {
            let controller = build_controller(config);
            connect(&controller).await?;
            print_records(&controller);

            controller.generate(&structure).await?;
            let outcome = tokio::select! {
                outcome = controller.wait_for_outcome() => Some(outcome),
                _ = tokio::signal::ctrl_c() => None,
            };
            controller.disconnect().await;

            match outcome {
                Some(GenerationState::Success(message)) => println!("generated: {}", message),
                Some(GenerationState::Error(message)) => bail!("generation failed: {}", message),
                _ => println!("interrupted"),
            }
        }
        Command::Reset => {
            let controller = build_controller(config);
            connect(&controller).await?;
            commands::reset_circuit(&controller).await.map_err(anyhow::Error::msg)?;
            controller.disconnect().await;
            println!("reset sent");
        }
    }

    Ok(())
}
