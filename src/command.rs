use crate::error::{Result, ShellError};

use std::time::Duration;

use strum::{Display, EnumIter, EnumString, IntoEnumIterator};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Verb {
    Scan,
    Connect,
    Disconnect,
    Services,
    SetChar,
    UnsetChar,
    Read,
    Write,
    Notify,
    #[strum(to_string = "help", serialize = "?")]
    Help,
    #[strum(to_string = "exit", serialize = "quit")]
    Exit,
}

impl Verb {
    fn spec(self) -> CommandSpec {
        let (min_args, max_args, usage, summary) = match self {
            Verb::Scan => (0, 1, "scan [timeout]", "Scan for devices (timeout in seconds)"),
            Verb::Connect => (1, 1, "connect <address-or-name>", "Connect by address or scanned name"),
            Verb::Disconnect => (0, 0, "disconnect", "Disconnect from current device"),
            Verb::Services => (0, 0, "services", "List services & characteristics"),
            Verb::SetChar => (1, 1, "setchar <uuid>", "Set the default characteristic"),
            Verb::UnsetChar => (0, 0, "unsetchar", "Clear the default characteristic"),
            Verb::Read => (0, 1, "read [uuid]", "Read from given or default characteristic"),
            Verb::Write => (1, 2, "write [uuid] <hex>", "Write hex to given or default characteristic"),
            Verb::Notify => (0, 1, "notify [uuid]", "Toggle notifications on given or default characteristic"),
            Verb::Help => (0, 0, "help | ?", "Show this help"),
            Verb::Exit => (0, 0, "exit | quit", "Disconnect and quit the shell"),
        };
        CommandSpec { verb: self, min_args, max_args, usage, summary }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    pub verb: Verb,
    pub min_args: usize,
    pub max_args: usize,
    pub usage: &'static str,
    pub summary: &'static str,
}

/// A line that passed verb and arity checks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation<'a> {
    pub verb: Verb,
    pub args: Vec<&'a str>,
}

pub struct CommandRegistry {
    specs: Vec<CommandSpec>,
}

impl Default for CommandRegistry {
    fn default() -> Self {
        CommandRegistry {
            specs: Verb::iter().map(Verb::spec).collect(),
        }
    }
}

impl CommandRegistry {
    pub fn spec(&self, verb: Verb) -> Option<&CommandSpec> {
        self.specs.iter().find(|spec| spec.verb == verb)
    }

    pub fn verbs(&self) -> String {
        self.specs
            .iter()
            .map(|spec| spec.verb.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Tokenize on whitespace and validate against the table.
    /// Blank lines yield `None`.
    pub fn parse<'a>(&self, line: &'a str) -> Result<Option<Invocation<'a>>> {
        let mut tokens = line.split_whitespace();
        let Some(word) = tokens.next() else {
            return Ok(None);
        };
        let args: Vec<&str> = tokens.collect();

        let unknown = || ShellError::UnknownCommand {
            verb: word.to_owned(),
            available: self.verbs(),
        };
        let verb = word.parse::<Verb>().map_err(|_| unknown())?;
        let spec = self.spec(verb).ok_or_else(unknown)?;
        if args.len() < spec.min_args || args.len() > spec.max_args {
            return Err(ShellError::Usage(spec.usage.to_owned()));
        }
        Ok(Some(Invocation { verb, args }))
    }

    pub fn help_table(&self) -> String {
        let width = self.specs.iter().map(|spec| spec.usage.len()).max().unwrap_or(0);
        self.specs
            .iter()
            .map(|spec| format!("  {:width$}  {}", spec.usage, spec.summary))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Only the hyphenated 8-4-4-4-12 form counts as a UUID at the prompt, so a
/// 32-digit hex payload is never mistaken for one.
pub fn looks_like_uuid(token: &str) -> bool {
    token.len() == 36 && Uuid::try_parse(token).is_ok()
}

pub fn parse_uuid(token: &str, usage: &str) -> Result<Uuid> {
    if !looks_like_uuid(token) {
        return Err(ShellError::Usage(format!("{usage} ('{token}' is not a characteristic UUID)")));
    }
    Uuid::try_parse(token).map_err(|_| ShellError::Usage(usage.to_owned()))
}

/// Seconds as typed after `scan`; must be positive and finite
pub fn parse_timeout(token: &str) -> std::result::Result<Duration, String> {
    let secs: f64 = token
        .parse()
        .map_err(|_| format!("'{token}' is not a number of seconds"))?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err(format!("timeout must be positive, got '{token}'"));
    }
    Duration::try_from_secs_f64(secs).map_err(|err| err.to_string())
}

/// Split `write` arguments into an optional target and the hex payload
pub fn split_write_args<'a>(args: &[&'a str], usage: &str) -> Result<(Option<Uuid>, &'a str)> {
    match args {
        [uuid, data] => Ok((Some(parse_uuid(uuid, usage)?), *data)),
        [only] if looks_like_uuid(only) => Err(ShellError::Usage(usage.to_owned())),
        [data] => Ok((None, *data)),
        _ => Err(ShellError::Usage(usage.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UUID: &str = "00002a37-0000-1000-8000-00805f9b34fb";

    #[test]
    fn blank_lines_are_skipped() {
        let registry = CommandRegistry::default();
        assert_eq!(registry.parse("").unwrap(), None);
        assert_eq!(registry.parse("   \t ").unwrap(), None);
    }

    #[test]
    fn tokens_split_on_any_whitespace() {
        let registry = CommandRegistry::default();
        let inv = registry.parse("  write\t0000  a1b2 ").unwrap().unwrap();
        assert_eq!(inv.verb, Verb::Write);
        assert_eq!(inv.args, vec!["0000", "a1b2"]);
    }

    #[test]
    fn aliases_and_case() {
        let registry = CommandRegistry::default();
        assert_eq!(registry.parse("?").unwrap().unwrap().verb, Verb::Help);
        assert_eq!(registry.parse("quit").unwrap().unwrap().verb, Verb::Exit);
        assert_eq!(registry.parse("SetChar x").unwrap().unwrap().verb, Verb::SetChar);
    }

    #[test]
    fn unknown_verb_lists_commands() {
        let registry = CommandRegistry::default();
        match registry.parse("frobnicate now") {
            Err(ShellError::UnknownCommand { verb, available }) => {
                assert_eq!(verb, "frobnicate");
                assert_eq!(
                    available,
                    "scan, connect, disconnect, services, setchar, unsetchar, read, write, notify, help, exit"
                );
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn arity_is_checked_before_dispatch() {
        let registry = CommandRegistry::default();
        for (line, usage) in [
            ("connect", "connect <address-or-name>"),
            ("connect a b", "connect <address-or-name>"),
            ("disconnect now", "disconnect"),
            ("write", "write [uuid] <hex>"),
            ("write a b c", "write [uuid] <hex>"),
            ("scan 1 2", "scan [timeout]"),
        ] {
            match registry.parse(line) {
                Err(ShellError::Usage(msg)) => assert_eq!(msg, usage, "{line}"),
                other => panic!("{line}: unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn help_table_covers_every_verb() {
        let table = CommandRegistry::default().help_table();
        assert_eq!(table.lines().count(), Verb::iter().count());
        assert!(table.contains("write [uuid] <hex>"));
        assert!(table.contains("help | ?"));
    }

    #[test]
    fn uuid_shape() {
        assert!(looks_like_uuid(UUID));
        assert!(looks_like_uuid(&UUID.to_uppercase()));
        assert!(!looks_like_uuid("00002a3700001000800000805f9b34fb"));
        assert!(!looks_like_uuid("a1b2"));
        assert!(matches!(parse_uuid("a1b2", "read [uuid]"), Err(ShellError::Usage(_))));
    }

    #[test]
    fn timeouts() {
        assert_eq!(parse_timeout("1.0").unwrap(), Duration::from_secs(1));
        assert_eq!(parse_timeout("0.25").unwrap(), Duration::from_millis(250));
        for bad in ["0", "-1", "inf", "NaN", "soon"] {
            assert!(parse_timeout(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn write_args_fall_back_to_default_target() {
        let usage = "write [uuid] <hex>";
        assert_eq!(split_write_args(&["a1b2"], usage).unwrap(), (None, "a1b2"));
        let (target, data) = split_write_args(&[UUID, "ff"], usage).unwrap();
        assert_eq!(target.unwrap().to_string(), UUID);
        assert_eq!(data, "ff");
        assert!(matches!(split_write_args(&[UUID], usage), Err(ShellError::Usage(_))));
        assert!(matches!(split_write_args(&["beef", "ff"], usage), Err(ShellError::Usage(_))));
    }
}
