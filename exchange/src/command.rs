//! Text command parsing
//!
//! Commands arrive as chat text such as `/add_points 42 10`. Parsing is
//! purely syntactic: permissions and account existence are checked when the
//! command is executed. Field names for `/set` come from a closed set, so
//! no user text ever reaches a storage key.

use crate::{Error, Result};
use ledger_core::{AccountId, SettableField};
use rust_decimal::Decimal;
use std::str::FromStr;

/// A parsed chat command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `/start`
    Start,
    /// `/balance`
    Balance,
    /// `/add_points USER_ID AMOUNT`
    AddPoints {
        /// Account to credit
        target: AccountId,
        /// Amount to grant
        amount: Decimal,
    },
    /// `/set USER_ID FIELD VALUE`
    Set {
        /// Account to change
        target: AccountId,
        /// Field to overwrite
        field: SettableField,
        /// New value
        value: Decimal,
    },
    /// `/get_users`
    GetUsers,
    /// `/get_actions`
    GetActions,
    /// `/update_points`
    UpdatePoints,
}

impl Command {
    /// Usage line for the command
    pub fn usage(name: &str) -> Option<&'static str> {
        Some(match name {
            "start" => "/start",
            "balance" => "/balance",
            "add_points" => "/add_points USER_ID AMOUNT",
            "set" => "/set USER_ID balance|pending VALUE",
            "get_users" => "/get_users",
            "get_actions" => "/get_actions",
            "update_points" => "/update_points",
            _ => return None,
        })
    }

    /// Whether only admins may run this command
    pub fn requires_admin(&self) -> bool {
        !matches!(self, Command::Start | Command::Balance)
    }
}

fn arity_error(name: &str, expected: usize) -> Error {
    let usage = Command::usage(name).unwrap_or_default();
    Error::InvalidCommand(format!(
        "this command takes {} argument{}. {}",
        expected,
        if expected == 1 { "" } else { "s" },
        usage
    ))
}

fn argument<T: FromStr>(name: &str, what: &str, raw: &str) -> Result<T> {
    raw.parse().map_err(|_| {
        Error::InvalidCommand(format!(
            "invalid {} '{}'. {}",
            what,
            raw,
            Command::usage(name).unwrap_or_default()
        ))
    })
}

impl FromStr for Command {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self> {
        let mut words = text.split_whitespace();
        let head = words
            .next()
            .ok_or_else(|| Error::InvalidCommand("empty command".to_string()))?;
        let name = head
            .strip_prefix('/')
            .ok_or_else(|| Error::InvalidCommand(format!("'{}' is not a command", head)))?;
        // Group chats address commands as /name@bot
        let name = name.split('@').next().unwrap_or(name);
        let args: Vec<&str> = words.collect();

        let expected = match name {
            "start" | "balance" | "get_users" | "get_actions" | "update_points" => 0,
            "add_points" => 2,
            "set" => 3,
            _ => {
                return Err(Error::InvalidCommand(format!("unknown command /{}", name)));
            }
        };
        if args.len() != expected {
            return Err(arity_error(name, expected));
        }

        Ok(match name {
            "start" => Command::Start,
            "balance" => Command::Balance,
            "get_users" => Command::GetUsers,
            "get_actions" => Command::GetActions,
            "update_points" => Command::UpdatePoints,
            "add_points" => Command::AddPoints {
                target: argument(name, "user id", args[0])?,
                amount: argument(name, "amount", args[1])?,
            },
            _ => Command::Set {
                target: argument(name, "user id", args[0])?,
                field: argument(name, "field", args[1])?,
                value: argument(name, "value", args[2])?,
            },
        })
    }
}
