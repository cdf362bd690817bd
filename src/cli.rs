//! Command line parsing.
//!
//! Short options only, getopt style: flags may be clustered (`-vq`) and an
//! option argument may be attached (`-uroot`) or follow as the next word.

use std::io::{self, Write};

use thiserror::Error;

pub const USAGE: &str = "usage: solterm [options] host [port]";

/// Options the command line may set. `None` leaves the decision to the
/// config file or the built-in default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    pub host: String,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub verbose: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Run(Options),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UsageError {
    #[error("unknown option -{0}")]
    UnknownOption(char),
    #[error("option -{0} requires an argument")]
    MissingArgument(char),
    #[error("missing host")]
    MissingHost,
    #[error("unexpected argument '{0}'")]
    ExtraArgument(String),
    #[error("invalid port '{0}'")]
    InvalidPort(String),
}

/// Write the usage text with every option. Goes to stdout for `-h` and to
/// stderr after a usage error.
pub fn print_help(out: &mut dyn Write) -> io::Result<()> {
    writeln!(out, "{USAGE}")?;
    writeln!(out)?;
    writeln!(out, "Open a serial-over-lan console on a management controller.")?;
    writeln!(out)?;
    writeln!(out, "Options:")?;
    writeln!(out, "  -h            print this text")?;
    writeln!(out, "  -v            verbose (default)")?;
    writeln!(out, "  -q            quiet")?;
    writeln!(out, "  -u user       username (default: admin)")?;
    writeln!(out, "  -p pass       password (default: $AMT_PASSWORD, else prompt)")?;
    writeln!(out)?;
    writeln!(out, "Press ^] to end the session.")?;
    writeln!(out)?;
    writeln!(out, "Configuration: ~/.solterm/config.toml")
}

/// Parse arguments, not including the program name.
pub fn parse_args<I, S>(args: I) -> Result<Command, UsageError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut options = Options::default();
    let mut positional = Vec::new();
    let mut args = args.into_iter().map(Into::into);

    while let Some(arg) = args.next() {
        if arg == "--" {
            positional.extend(args.by_ref());
            break;
        }
        let Some(cluster) = arg.strip_prefix('-').filter(|rest| !rest.is_empty()) else {
            positional.push(arg);
            continue;
        };

        for (i, flag) in cluster.char_indices() {
            match flag {
                'h' => return Ok(Command::Help),
                'v' => options.verbose = Some(true),
                'q' => options.verbose = Some(false),
                'u' | 'p' => {
                    let attached = &cluster[i + flag.len_utf8()..];
                    let value = if attached.is_empty() {
                        args.next().ok_or(UsageError::MissingArgument(flag))?
                    } else {
                        attached.to_string()
                    };
                    if flag == 'u' {
                        options.user = Some(value);
                    } else {
                        options.password = Some(value);
                    }
                    break;
                }
                other => return Err(UsageError::UnknownOption(other)),
            }
        }
    }

    let mut positional = positional.into_iter();
    options.host = positional.next().ok_or(UsageError::MissingHost)?;
    if let Some(port) = positional.next() {
        let parsed = port
            .parse::<u16>()
            .ok()
            .filter(|p| *p != 0)
            .ok_or(UsageError::InvalidPort(port))?;
        options.port = Some(parsed);
    }
    if let Some(extra) = positional.next() {
        return Err(UsageError::ExtraArgument(extra));
    }

    Ok(Command::Run(options))
}
