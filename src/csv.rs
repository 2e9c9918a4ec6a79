use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::Amount;
use crate::amount::AmountError;
use crate::model::{Role, UserId, Wallet, WalletId};
use crate::replay::Operation;

/// Errors that can occur when reading operations or writing balances
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("failed to open csv input: {0}")]
    Open(#[source] csv::Error),

    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: csv::Error },

    #[error("line {line}: unrecognized operation type '{op_type}'")]
    UnrecognizedType { line: usize, op_type: String },

    #[error("line {line}: {op_type} missing {field}")]
    MissingField {
        line: usize,
        op_type: String,
        field: &'static str,
    },

    #[error("line {line}: {source}")]
    Amount { line: usize, source: AmountError },

    #[error("line {line}: {reason}")]
    Role { line: usize, reason: String },

    #[error("failed to write csv output: {0}")]
    Write(#[from] csv::Error),
}

#[derive(Debug, Deserialize)]
struct InputRow {
    r#type: String,
    actor: UserId,
    role: Option<String>,
    to: Option<UserId>,
    amount: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Serialize)]
struct OutputRow {
    user: UserId,
    wallet: WalletId,
    balance: String,
}

impl InputRow {
    fn into_operation(self, line: usize) -> Result<Operation, CsvError> {
        let missing = |op_type: &str, field: &'static str| CsvError::MissingField {
            line,
            op_type: op_type.to_string(),
            field,
        };

        match self.r#type.as_str() {
            "open" => {
                let role = match self.role {
                    Some(role) => role
                        .parse::<Role>()
                        .map_err(|reason| CsvError::Role { line, reason })?,
                    None => Role::default(),
                };
                Ok(Operation::Open {
                    user: self.actor,
                    role,
                })
            }
            op_type @ ("topup" | "transfer") => {
                let to = self.to.ok_or_else(|| missing(op_type, "destination"))?;
                let amount = self
                    .amount
                    .ok_or_else(|| missing(op_type, "amount"))?
                    .parse::<Amount>()
                    .map_err(|source| CsvError::Amount { line, source })?;
                let description = self.description.unwrap_or_default();

                Ok(if op_type == "topup" {
                    Operation::TopUp {
                        actor: self.actor,
                        to,
                        amount,
                        description,
                    }
                } else {
                    Operation::Transfer {
                        actor: self.actor,
                        to,
                        amount,
                        description,
                    }
                })
            }
            other => Err(CsvError::UnrecognizedType {
                line,
                op_type: other.to_string(),
            }),
        }
    }
}

/// Read operations from a csv file with header `type,actor,role,to,amount,description`
pub fn read_operations(
    path: &Path,
) -> Result<impl Iterator<Item = Result<Operation, CsvError>> + use<>, CsvError> {
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(CsvError::Open)?;

    Ok(reader
        .into_deserialize::<InputRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            let row = result.map_err(|source| CsvError::Parse { line, source })?;
            row.into_operation(line)
        }))
}

/// Write wallets as `user,wallet,balance` rows
pub fn write_wallets<'a>(
    out: impl io::Write,
    wallets: impl IntoIterator<Item = &'a Wallet>,
) -> Result<(), CsvError> {
    let mut writer = csv::Writer::from_writer(out);

    for wallet in wallets {
        writer.serialize(OutputRow {
            user: wallet.user,
            wallet: wallet.id,
            balance: wallet.balance.to_string(),
        })?;
    }

    writer.flush().map_err(csv::Error::from)?;
    Ok(())
}
