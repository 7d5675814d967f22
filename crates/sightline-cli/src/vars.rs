//! The `vars` subcommands.

use std::io::Write;

use sightline_core::vars::Value;

use crate::args::VarsCommand;
use crate::runner::{EXIT_FAILED, EXIT_OK};
use crate::store::FileVariableStore;

pub fn run(
    command: VarsCommand,
    store: &mut FileVariableStore,
    out: &mut impl Write,
) -> anyhow::Result<i32> {
    match command {
        VarsCommand::List { json } => {
            if json {
                writeln!(out, "{}", serde_json::to_string_pretty(store.entries())?)?;
            } else {
                for (name, entry) in store.entries() {
                    writeln!(
                        out,
                        "{name} = {}  (updated {})",
                        entry.value,
                        entry.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
                    )?;
                }
            }
        }
        VarsCommand::Get { name } => match store.entry(&name) {
            Some(entry) => writeln!(out, "{}", entry.value)?,
            None => {
                eprintln!("Error: variable '{name}' is not set");
                return Ok(EXIT_FAILED);
            }
        },
        VarsCommand::Set { name, value } => {
            let value = Value::infer(&value);
            store.insert(&name, value.clone())?;
            writeln!(out, "{name} = {value}")?;
        }
        VarsCommand::Unset { name } => {
            if !store.remove(&name)? {
                eprintln!("variable '{name}' was not set");
            }
        }
    }
    Ok(EXIT_OK)
}
