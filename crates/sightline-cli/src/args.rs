//! CLI argument parsing with clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use sightline_core::geometry::Size;
use sightline_core::vars::is_valid_name;

/// Visual desktop automation.
///
/// Runs scripts that wait for reference images to appear on screen and then
/// click, type, or scroll against them. Matching is resolution independent:
/// a template captured on a 1x display still matches on a 2x display.
#[derive(Debug, Parser)]
#[command(name = "sightline", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run an automation script
    #[command(after_help = "\
Examples:
  sightline run login.sl                          # Drive the live desktop
  sightline run login.sl --templates ./shots      # Templates from another directory
  sightline run login.sl --screen shot.png        # Dry run against a screenshot
  sightline run login.sl --screen shot.png --logical 1440x900
  sightline run login.sl --var user=ada --persist # Preset a variable, persist assignments
  sightline run --inline 'click ok' --json        # Script text on the command line

Exit codes:
  0  completed
  1  script failed to parse
  2  run failed (timeout, missing template, undefined variable, setup error)
  3  aborted (Ctrl+C, SIGTERM, or an abort instruction)")]
    Run(RunArgs),

    /// Parse a script and confirm its templates exist, without running it
    #[command(after_help = "\
Examples:
  sightline check login.sl                        # Validate a script file
  sightline check login.sl --templates ./shots    # Resolve templates from ./shots
  sightline check --inline 'repeat 3 { click ok }' --json

Exit codes:
  0  script parses and every literal template loads
  1  parse error or missing template")]
    Check(CheckArgs),

    /// Inspect or edit persisted variables
    #[command(subcommand)]
    Vars(VarsCommand),

    /// Show an annotated example script
    Examples,
}

#[derive(Debug, clap::Args)]
pub struct ScriptSource {
    /// Script path, or the script text itself with --inline
    pub script: String,

    /// Treat SCRIPT as script text rather than a path
    #[arg(long)]
    pub inline: bool,
}

#[derive(Debug, clap::Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub source: ScriptSource,

    /// Directory holding template images [default: $SIGHTLINE_TEMPLATES or ./templates]
    #[arg(long, value_name = "DIR")]
    pub templates: Option<PathBuf>,

    /// Replay this screenshot instead of capturing the screen (dry run, no real input)
    #[arg(long, value_name = "PNG")]
    pub screen: Option<PathBuf>,

    /// Logical size of the replayed screen, e.g. 1440x900 [default: image size]
    #[arg(long, value_name = "WxH", value_parser = parse_size, requires = "screen")]
    pub logical: Option<Size>,

    /// Preset a variable; overrides persisted values and script defaults
    #[arg(long = "var", value_name = "NAME=VALUE", value_parser = parse_var)]
    pub vars: Vec<(String, String)>,

    /// Read and write variables through the persisted store
    #[arg(long)]
    pub persist: bool,

    /// Print the run report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, clap::Args)]
pub struct CheckArgs {
    #[command(flatten)]
    pub source: ScriptSource,

    /// Directory holding template images [default: $SIGHTLINE_TEMPLATES or ./templates]
    #[arg(long, value_name = "DIR")]
    pub templates: Option<PathBuf>,

    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Subcommand)]
pub enum VarsCommand {
    /// List persisted variables
    List {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print one persisted variable
    Get {
        #[arg(value_parser = parse_name)]
        name: String,
    },

    /// Persist a variable
    Set {
        #[arg(value_parser = parse_name)]
        name: String,
        value: String,
    },

    /// Remove a persisted variable
    Unset {
        #[arg(value_parser = parse_name)]
        name: String,
    },
}

fn parse_name(raw: &str) -> Result<String, String> {
    if is_valid_name(raw) {
        Ok(raw.to_string())
    } else {
        Err(format!(
            "invalid variable name '{raw}' (letters, digits and '_', not starting with a digit)"
        ))
    }
}

fn parse_var(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{raw}'"))?;
    Ok((parse_name(name.trim())?, value.to_string()))
}

fn parse_size(raw: &str) -> Result<Size, String> {
    let (w, h) = raw
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{raw}'"))?;
    let width: u32 = w.trim().parse().map_err(|_| format!("invalid width '{w}'"))?;
    let height: u32 = h.trim().parse().map_err(|_| format!("invalid height '{h}'"))?;
    let size = Size::new(width, height);
    if size.is_empty() {
        return Err("logical size must be non-zero".into());
    }
    Ok(size)
}

/// Annotated sample for the `examples` command.
pub const EXAMPLES_TEXT: &str = r#"Example script: log in and open the inbox

Templates are PNG files under ./templates named by id (login_button.png).
An optional login_button.json next to it may set "threshold" (0..1] and a
search "region" {x, y, width, height} in screenshot pixels.

    # title: Log in
    # description: Opens the app's login form and signs in.

    open "Mail"

    var user = "guest"            # default, overridden by --var or persisted values
    var logins = 0

    click login_button timeout=15s
    click username_field
    type "${user}"
    press tab
    type "${password}"
    press enter

    if found mfa_prompt timeout=3s {
        log "waiting for MFA approval"
        wait 20s
    } else {
        log "no MFA prompt"
    }

    repeat 3 {
        scroll down 5
    }
    try {                         # misses inside only warn
        click cookie_banner_close timeout=2s
        click whats_new_dismiss timeout=2s
    }
    click inbox best_effort=true  # a miss only warns
    logins = logins + 1

Try it without touching the desktop:

    sightline check login.sl
    sightline run login.sl --screen shot.png --logical 1440x900 --var password=hunter2

Keep a counter across runs:

    sightline vars set logins 0
    sightline run login.sl --persist
    sightline vars get logins
"#;

#[cfg(test)]
mod tests {
    use super::{Cli, Commands, VarsCommand};
    use clap::Parser;
    use sightline_core::geometry::Size;

    #[test]
    fn test_run_parses_all_flags() {
        let cli = Cli::parse_from([
            "sightline",
            "run",
            "login.sl",
            "--templates",
            "shots",
            "--screen",
            "shot.png",
            "--logical",
            "1440x900",
            "--var",
            "user=ada",
            "--var",
            "note=a=b",
            "--persist",
            "--json",
        ]);

        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.source.script, "login.sl");
                assert!(!args.source.inline);
                assert_eq!(args.templates.unwrap().to_str(), Some("shots"));
                assert_eq!(args.logical, Some(Size::new(1440, 900)));
                assert_eq!(
                    args.vars,
                    vec![
                        ("user".to_string(), "ada".to_string()),
                        ("note".to_string(), "a=b".to_string())
                    ]
                );
                assert!(args.persist);
                assert!(args.json);
            }
            _ => panic!("Expected run command"),
        }
    }

    #[test]
    fn test_run_inline_script() {
        let cli = Cli::parse_from(["sightline", "run", "--inline", "click ok"]);
        match cli.command {
            Commands::Run(args) => {
                assert!(args.source.inline);
                assert_eq!(args.source.script, "click ok");
                assert!(args.screen.is_none());
            }
            _ => panic!("Expected run command"),
        }
    }

    #[test]
    fn test_check_flags() {
        let cli = Cli::parse_from(["sightline", "check", "a.sl", "--templates", "shots", "--json"]);
        match cli.command {
            Commands::Check(args) => {
                assert_eq!(args.source.script, "a.sl");
                assert_eq!(args.templates.unwrap().to_str(), Some("shots"));
                assert!(args.json);
            }
            _ => panic!("Expected check command"),
        }
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(Cli::try_parse_from(["sightline", "run", "a.sl", "--var", "1x=2"]).is_err());
        assert!(Cli::try_parse_from(["sightline", "run", "a.sl", "--var", "novalue"]).is_err());
        assert!(Cli::try_parse_from([
            "sightline", "run", "a.sl", "--screen", "s.png", "--logical", "0x10"
        ])
        .is_err());
        // --logical only makes sense with a replayed screen.
        assert!(Cli::try_parse_from(["sightline", "run", "a.sl", "--logical", "10x10"]).is_err());
        assert!(Cli::try_parse_from(["sightline", "vars", "get", "bad-name"]).is_err());
    }

    #[test]
    fn test_vars_subcommands() {
        let cli = Cli::parse_from(["sightline", "vars", "set", "count", "3"]);
        match cli.command {
            Commands::Vars(VarsCommand::Set { name, value }) => {
                assert_eq!(name, "count");
                assert_eq!(value, "3");
            }
            _ => panic!("Expected vars set"),
        }

        let cli = Cli::parse_from(["sightline", "vars", "list", "--json"]);
        assert!(matches!(
            cli.command,
            Commands::Vars(VarsCommand::List { json: true })
        ));
    }
}
