//! Line-oriented operator console.
//!
//! Reads one command per line, maps it onto controller operations and prints
//! status changes as the controller publishes them.

use crate::domain::controller::ConnectionController;
use crate::domain::models::{ConnectionState, Endpoint, Movement, StatusSnapshot};
use std::io::{self, BufRead, Write};
use std::sync::Mutex;
use tracing::debug;

pub const HELP: &str = "\
Commands:
  list                 refresh and show paired devices
  select <n|address>   choose a device by list number or address
  connect | disconnect | toggle
  f | b | l | r | s    forward, backward, left, right, stop
  speed <0.0-1.0>      set speed
  angle <0-180>        set steering angle
  status               show the current state
  help                 show this text
  quit                 disconnect and exit";

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    List,
    Select(String),
    Connect,
    Disconnect,
    Toggle,
    Drive(Movement),
    Speed(f32),
    Angle(f32),
    Status,
    Help,
    Quit,
}

/// Parses one input line. Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let arg = words.next();

    let number = |what: &str| -> Result<f32, String> {
        let raw = arg.ok_or_else(|| format!("{} needs a value", what))?;
        raw.parse::<f32>()
            .map_err(|_| format!("'{}' is not a number", raw))
    };

    let command = match verb.to_lowercase().as_str() {
        "list" | "ls" => ConsoleCommand::List,
        "select" | "use" => ConsoleCommand::Select(
            arg.ok_or_else(|| "select needs a device number or address".to_string())?
                .to_string(),
        ),
        "connect" => ConsoleCommand::Connect,
        "disconnect" => ConsoleCommand::Disconnect,
        "toggle" => ConsoleCommand::Toggle,
        "f" | "forward" => ConsoleCommand::Drive(Movement::Forward),
        "b" | "backward" => ConsoleCommand::Drive(Movement::Backward),
        "l" | "left" => ConsoleCommand::Drive(Movement::Left),
        "r" | "right" => ConsoleCommand::Drive(Movement::Right),
        "s" | "stop" => ConsoleCommand::Drive(Movement::Stop),
        "speed" => ConsoleCommand::Speed(number("speed")?),
        "angle" | "steer" => ConsoleCommand::Angle(number("angle")?),
        "status" => ConsoleCommand::Status,
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "exit" | "q" => ConsoleCommand::Quit,
        other => return Err(format!("Unknown command '{}', try 'help'", other)),
    };
    Ok(Some(command))
}

/// Resolves a `select` argument against the listed endpoints. Numbers are
/// 1-based list positions; anything else is taken as an address.
pub fn resolve_endpoint(arg: &str, endpoints: &[Endpoint]) -> Result<Endpoint, String> {
    if let Ok(n) = arg.parse::<usize>() {
        return n
            .checked_sub(1)
            .and_then(|i| endpoints.get(i))
            .cloned()
            .ok_or_else(|| format!("No device #{}, run 'list' first", n));
    }
    Ok(endpoints
        .iter()
        .find(|e| e.address() == arg)
        .cloned()
        .unwrap_or_else(|| Endpoint::new(arg, None)))
}

pub fn render_status(snapshot: &StatusSnapshot) -> String {
    let state = match snapshot.state {
        ConnectionState::Connected => "CONNECTED",
        ConnectionState::Connecting => "CONNECTING",
        ConnectionState::Disconnected => "DISCONNECTED",
    };
    let device = snapshot
        .selected
        .as_ref()
        .map_or("none".to_string(), |e| e.label().to_string());
    format!(
        "[{}] {} (device: {}, speed: {}, angle: {:.0}°)",
        state, snapshot.message, device, snapshot.speed, snapshot.angle
    )
}

pub fn render_endpoints(endpoints: &[Endpoint]) -> String {
    if endpoints.is_empty() {
        return "  (no paired devices)".to_string();
    }
    endpoints
        .iter()
        .enumerate()
        .map(|(i, e)| format!("  {}. {}", i + 1, e))
        .collect::<Vec<_>>()
        .join("\n")
}

pub enum Flow {
    Continue,
    Quit,
}

pub fn apply(
    controller: &ConnectionController,
    command: ConsoleCommand,
    out: &mut impl Write,
) -> io::Result<Flow> {
    match command {
        ConsoleCommand::List => {
            controller.refresh_endpoints();
            writeln!(out, "{}", render_endpoints(&controller.snapshot().endpoints))?;
        }
        ConsoleCommand::Select(arg) => {
            match resolve_endpoint(&arg, &controller.snapshot().endpoints) {
                Ok(endpoint) => {
                    writeln!(out, "Selected {}", endpoint)?;
                    controller.select_endpoint(endpoint);
                }
                Err(e) => writeln!(out, "{}", e)?,
            }
        }
        ConsoleCommand::Connect => controller.connect(),
        ConsoleCommand::Disconnect => controller.disconnect(),
        ConsoleCommand::Toggle => controller.toggle_connection(),
        ConsoleCommand::Drive(movement) => controller.on_action_start(movement),
        ConsoleCommand::Speed(p) => controller.set_speed(p),
        ConsoleCommand::Angle(a) => controller.set_angle(a),
        ConsoleCommand::Status => writeln!(out, "{}", render_status(&controller.snapshot()))?,
        ConsoleCommand::Help => writeln!(out, "{}", HELP)?,
        ConsoleCommand::Quit => return Ok(Flow::Quit),
    }
    Ok(Flow::Continue)
}

/// Runs the console until `quit` or end of input, then shuts the controller
/// down.
pub fn run(controller: &ConnectionController, input: impl BufRead) -> io::Result<()> {
    let last_line = Mutex::new(String::new());
    let subscription = controller.subscribe(move |snapshot| {
        let line = render_status(snapshot);
        let mut last = last_line.lock().unwrap_or_else(|e| e.into_inner());
        if *last != line {
            println!("{}", line);
            *last = line;
        }
    });

    let mut stdout = io::stdout();
    writeln!(stdout, "{}", HELP)?;

    for line in input.lines() {
        let line = line?;
        match parse_line(&line) {
            Ok(Some(command)) => {
                debug!("Console command {:?}", command);
                if let Flow::Quit = apply(controller, command, &mut stdout)? {
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => writeln!(stdout, "{}", e)?,
        }
    }

    controller.shutdown();
    controller.unsubscribe(subscription);
    Ok(())
}
