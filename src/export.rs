//! CSV export of transactions.

use crate::transaction::Transaction;
use std::io::Write;

pub const CSV_HEADERS: [&str; 7] = [
    "Date",
    "Posting Date",
    "Description",
    "Amount",
    "Type",
    "Balance",
    "Category",
];

/// Write `transactions` as CSV. Money is printed with two decimals; absent
/// optional fields are empty cells.
pub fn write_csv<W: Write>(writer: W, transactions: &[Transaction]) -> Result<(), csv::Error> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(CSV_HEADERS)?;
    for tx in transactions {
        let kind = tx.kind.to_string();
        let amount = format!("{:.2}", tx.amount);
        let balance = tx.balance.map(|b| format!("{:.2}", b)).unwrap_or_default();
        wtr.write_record([
            tx.date.as_str(),
            tx.posting_date.as_deref().unwrap_or(""),
            tx.description.as_str(),
            amount.as_str(),
            kind.as_str(),
            balance.as_str(),
            tx.category.as_str(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Render `transactions` to a CSV string.
pub fn to_csv_string(transactions: &[Transaction]) -> Result<String, csv::Error> {
    let mut buf = Vec::new();
    write_csv(&mut buf, transactions)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
