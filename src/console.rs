//! Line-based front-end standing in for the light switch screen

use color_eyre::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::mqtt::mqtt_handler::MQTTStatus;
use crate::toggle::controller_handle::{ToggleError, ToggleHandle};
use crate::toggle::state::ToggleView;

const HELP: &str = "commands: t|toggle, s|status, q|quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Toggle,
    Status,
    Help,
    Quit,
    Unknown(String),
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Option<Self> {
        let cmd = line.trim();
        if cmd.is_empty() {
            return None;
        }
        let command = match cmd.to_ascii_lowercase().as_str() {
            "t" | "toggle" => ConsoleCommand::Toggle,
            "s" | "status" => ConsoleCommand::Status,
            "h" | "help" | "?" => ConsoleCommand::Help,
            "q" | "quit" | "exit" => ConsoleCommand::Quit,
            _ => ConsoleCommand::Unknown(cmd.to_string()),
        };
        Some(command)
    }
}

fn render_status(view: &ToggleView, mqtt: &MQTTStatus) -> String {
    format!(
        "{} | broker {:?}, sent {}, received {}",
        view, mqtt.connection_state, mqtt.messages_sent, mqtt.messages_received
    )
}

/// Prints every view change until the controller goes away
async fn watch_view(mut view_rx: watch::Receiver<ToggleView>) {
    println!("{}", *view_rx.borrow_and_update());
    while view_rx.changed().await.is_ok() {
        println!("{}", *view_rx.borrow_and_update());
    }
    debug!("View watcher stopped");
}

/// Runs until the user quits, stdin ends or Ctrl-C arrives
pub async fn run(toggle: &ToggleHandle, mqtt_status: watch::Receiver<MQTTStatus>) -> Result<()> {
    let watcher = tokio::spawn(watch_view(toggle.subscribe()));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{}", HELP);

    loop {
        if toggle.is_closed() {
            warn!("Controller session closed");
            break;
        }

        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received");
                break;
            }
            line = lines.next_line() => line?,
        };

        let Some(line) = line else {
            info!("Input closed");
            break;
        };

        match ConsoleCommand::parse(&line) {
            None => {}
            Some(ConsoleCommand::Toggle) => match toggle.request_toggle().await {
                Ok(Some(command)) => debug!("Toggle sent {}", command),
                Ok(None) => println!("too fast, toggle ignored"),
                Err(ToggleError::SessionClosed) => {
                    warn!("Controller session closed");
                    break;
                }
                Err(e) => return Err(e.into()),
            },
            Some(ConsoleCommand::Status) => {
                let view = toggle.current_view().await?;
                println!("{}", render_status(&view, &mqtt_status.borrow()));
            }
            Some(ConsoleCommand::Help) => println!("{}", HELP),
            Some(ConsoleCommand::Quit) => break,
            Some(ConsoleCommand::Unknown(cmd)) => println!("unknown command {:?}, {}", cmd, HELP),
        }
    }

    watcher.abort();
    Ok(())
}
