use anyhow::{bail, Context, Result};
use ledger_engine::transaction::{Transaction, UserId};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Transaction log on disk. Each call to [`TransactionLog::transactions`]
/// reads the file again from the start.
#[derive(Debug, Clone)]
pub struct TransactionLog {
    path: PathBuf,
}

impl TransactionLog {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn transactions(&self) -> Result<impl Iterator<Item = Result<Transaction>>> {
        let file = File::open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;

        Ok(read_transactions(file))
    }
}

/// Lazily parse whitespace-separated records, one per line, in file order.
///
/// Record layouts by leading type tag:
/// - `1 amount user account pin`: deposit, or withdrawal if `amount < 0`
/// - `2 amount user identifier [ignored]`: loan request
/// - `3 amount sender account pin receiver`: transfer of `|amount|`
pub fn read_transactions<R: Read>(reader: R) -> impl Iterator<Item = Result<Transaction>> {
    csv::ReaderBuilder::new()
        .delimiter(b' ')
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader)
        .into_records()
        .map(|row| {
            let row = row.context("Failed to read log record")?;
            parse_record(&row)
        })
}

fn parse_record(row: &csv::StringRecord) -> Result<Transaction> {
    let fields = row
        .iter()
        .filter(|field| !field.is_empty())
        .map(|field| {
            field
                .parse::<i64>()
                .with_context(|| format!("Invalid integer {field:?}"))
        })
        .collect::<Result<Vec<_>>>()?;

    match *fields.as_slice() {
        [1, amount, actor, account_number, pin] => Ok(Transaction::Deposit {
            actor: user_id(actor)?,
            account_number,
            pin,
            amount,
        }),
        [2, amount, user, identifier] | [2, amount, user, identifier, _] => {
            Ok(Transaction::LoanRequest {
                user: user_id(user)?,
                identifier,
                amount: u64::try_from(amount).context("Negative loan amount")?,
            })
        }
        [3, amount, sender, account_number, pin, receiver] => Ok(Transaction::Transfer {
            sender: user_id(sender)?,
            account_number,
            pin,
            receiver: user_id(receiver)?,
            amount: amount.unsigned_abs(),
        }),
        [] => bail!("Empty record"),
        [tag @ 1..=3, ..] => bail!("Record type {tag} with {} fields", fields.len()),
        [tag, ..] => bail!("Unknown record type {tag}"),
    }
}

fn user_id(value: i64) -> Result<UserId> {
    UserId::try_from(value).with_context(|| format!("User id {value} out of range"))
}
