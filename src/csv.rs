use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::Amount;
use crate::amount::AmountError;
use crate::batch::Command;
use crate::model::{Balance, User};

/// Errors that can occur when reading commands or writing balances
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("failed to open {path}: {source}")]
    Open { path: String, source: csv::Error },

    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: csv::Error },

    #[error("line {line}: unrecognized command type '{cmd_type}'")]
    UnrecognizedType { line: usize, cmd_type: String },

    #[error("line {line}: {cmd_type} missing {field}")]
    MissingField {
        line: usize,
        cmd_type: String,
        field: &'static str,
    },

    #[error("line {line}: invalid amount: {source}")]
    InvalidAmount { line: usize, source: AmountError },

    #[error("failed to write balances: {0}")]
    Write(#[from] csv::Error),

    #[error("failed to flush balances: {0}")]
    Flush(#[from] io::Error),
}

#[derive(Debug, Deserialize)]
struct InputRow {
    r#type: String,
    user: Option<String>,
    peer: Option<String>,
    tx: Option<String>,
    amount: Option<String>,
}

#[derive(Debug, Serialize)]
struct OutputRow<'a> {
    email: &'a str,
    available: String,
    locked: String,
    balance: String,
}

/// Read batch commands from a csv file
pub fn read_commands(
    path: impl AsRef<Path>,
) -> Result<impl Iterator<Item = Result<Command, CsvError>>, CsvError> {
    let path = path.as_ref();
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .map_err(|source| CsvError::Open {
            path: path.display().to_string(),
            source,
        })?;

    Ok(reader
        .into_deserialize::<InputRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            let row = result.map_err(|source| CsvError::Parse { line, source })?;
            parse_row(line, row)
        }))
}

fn parse_row(line: usize, row: InputRow) -> Result<Command, CsvError> {
    let cmd_type = row.r#type.to_ascii_lowercase();
    let required = |value: Option<String>, field: &'static str| {
        value.ok_or_else(|| CsvError::MissingField {
            line,
            cmd_type: cmd_type.clone(),
            field,
        })
    };
    let amount = |value: Option<String>| -> Result<Option<Amount>, CsvError> {
        value
            .map(|s| s.parse::<Amount>())
            .transpose()
            .map_err(|source| CsvError::InvalidAmount { line, source })
    };

    match cmd_type.as_str() {
        "register" => Ok(Command::Register {
            email: required(row.user, "email")?,
            name: row.peer.unwrap_or_default(),
            starting_balance: amount(row.amount)?,
        }),
        "transfer" => {
            let value = amount(row.amount)?.ok_or_else(|| CsvError::MissingField {
                line,
                cmd_type: cmd_type.clone(),
                field: "amount",
            })?;
            Ok(Command::Transfer {
                sender: required(row.user, "sender")?,
                receiver: required(row.peer, "receiver")?,
                tx: required(row.tx, "tx")?,
                amount: value,
            })
        }
        "confirm" => Ok(Command::Confirm {
            user: required(row.user, "user")?,
            tx: required(row.tx, "tx")?,
        }),
        "cancel" => Ok(Command::Cancel {
            user: required(row.user, "user")?,
            tx: required(row.tx, "tx")?,
        }),
        "reverse" => Ok(Command::Reverse {
            tx: required(row.tx, "tx")?,
        }),
        _ => Err(CsvError::UnrecognizedType {
            line,
            cmd_type: row.r#type,
        }),
    }
}

/// Write user balances in csv format
pub fn write_balances<'a>(
    rows: impl IntoIterator<Item = &'a (User, Balance)>,
    out: impl io::Write,
) -> Result<(), CsvError> {
    let mut writer = csv::Writer::from_writer(out);

    for (user, balance) in rows {
        writer.serialize(OutputRow {
            email: &user.email,
            available: balance.available().to_string(),
            locked: balance.locked_balance.to_string(),
            balance: balance.balance.to_string(),
        })?;
    }

    writer.flush()?;
    Ok(())
}
