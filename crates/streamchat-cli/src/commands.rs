/// A line of user input, parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Plain text: send it, or stop the reply in flight
    Send(String),
    Stop,
    /// Regenerate the assistant turn at this index, or the latest one
    Regenerate(Option<usize>),
    NewThread,
    Threads,
    Open(String),
    Delete(String),
    /// Show the system prompt, or replace it
    System(Option<String>),
    Clear,
    Help,
    Quit,
    /// Input that looked like a command but could not be used
    Invalid(String),
}

pub const HELP: &str = "\
Type a message and press enter to send it. Sending while a reply streams stops it.

  /stop              stop the reply in flight
  /regen [index]     regenerate an assistant reply (default: the latest)
  /new               start a new chat
  /threads           list saved chats
  /open <id>         open a saved chat by id prefix
  /delete <id>       delete a saved chat by id prefix
  /system [text]     show or set the system prompt
  /clear             delete all saved chats
  /help              show this help
  /quit              exit
";

pub fn parse_command(line: &str) -> Command {
    let trimmed = line.trim();
    let Some(rest) = trimmed.strip_prefix('/') else {
        return Command::Send(line.to_string());
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };

    match name {
        "stop" => Command::Stop,
        "regen" | "regenerate" => {
            if arg.is_empty() {
                Command::Regenerate(None)
            } else {
                match arg.parse() {
                    Ok(index) => Command::Regenerate(Some(index)),
                    Err(_) => Command::Invalid(format!("Not a turn index: {arg}")),
                }
            }
        }
        "new" => Command::NewThread,
        "threads" | "history" => Command::Threads,
        "open" | "delete" if arg.is_empty() => {
            Command::Invalid(format!("Usage: /{name} <thread id prefix>"))
        }
        "open" => Command::Open(arg.to_string()),
        "delete" => Command::Delete(arg.to_string()),
        "system" => Command::System((!arg.is_empty()).then(|| arg.to_string())),
        "clear" => Command::Clear,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        _ => Command::Invalid(format!("Unknown command /{name}, try /help")),
    }
}
