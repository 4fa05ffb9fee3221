#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Help,
    Items,
    Give {
        identity: String,
        item_id: u32,
        count: u32,
    },
    List,
    Quit,
    Unknown(String),
}

/// Parses one line of console input. A blank line is `Ok(None)`.
pub fn parse_console_command(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let mut parts = line.trim().split_whitespace();
    let Some(command) = parts.next() else {
        return Ok(None);
    };
    let command = command.to_ascii_lowercase();
    let parsed = match command.as_str() {
        "help" => ConsoleCommand::Help,
        "items" => ConsoleCommand::Items,
        "give" => {
            let identity = parts
                .next()
                .ok_or_else(|| "give is missing the identity".to_string())?
                .to_string();
            let item_id = parse_u32(parts.next(), "item id")?;
            let count = parse_u32(parts.next(), "count")?;
            ConsoleCommand::Give {
                identity,
                item_id,
                count,
            }
        }
        "list" => ConsoleCommand::List,
        "quit" | "exit" => ConsoleCommand::Quit,
        _ => ConsoleCommand::Unknown(command),
    };
    Ok(Some(parsed))
}

fn parse_u32(value: Option<&str>, what: &str) -> Result<u32, String> {
    let value = value.ok_or_else(|| format!("give is missing the {what}"))?;
    value
        .parse::<u32>()
        .map_err(|_| format!("give expected a number for the {what}, got '{value}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_console_command_skips_blank_lines() {
        assert_eq!(parse_console_command("").unwrap(), None);
        assert_eq!(parse_console_command("   ").unwrap(), None);
    }

    #[test]
    fn parse_console_command_parses_help() {
        assert_eq!(
            parse_console_command("help").unwrap(),
            Some(ConsoleCommand::Help)
        );
    }

    #[test]
    fn parse_console_command_parses_give() {
        assert_eq!(
            parse_console_command("give Bob 4 15").unwrap(),
            Some(ConsoleCommand::Give {
                identity: "Bob".to_string(),
                item_id: 4,
                count: 15,
            })
        );
    }

    #[test]
    fn parse_console_command_requires_give_arguments() {
        assert!(parse_console_command("give Bob").is_err());
        assert!(parse_console_command("give Bob four 1").is_err());
    }

    #[test]
    fn parse_console_command_accepts_quit_aliases() {
        assert_eq!(
            parse_console_command("quit").unwrap(),
            Some(ConsoleCommand::Quit)
        );
        assert_eq!(
            parse_console_command("exit").unwrap(),
            Some(ConsoleCommand::Quit)
        );
    }

    #[test]
    fn parse_console_command_keeps_identity_case() {
        assert_eq!(
            parse_console_command("GIVE Alice 1 1").unwrap(),
            Some(ConsoleCommand::Give {
                identity: "Alice".to_string(),
                item_id: 1,
                count: 1,
            })
        );
    }

    #[test]
    fn parse_console_command_handles_unknown() {
        assert_eq!(
            parse_console_command("restart").unwrap(),
            Some(ConsoleCommand::Unknown("restart".to_string()))
        );
    }
}
