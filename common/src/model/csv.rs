use serde::{Deserialize, Serialize};

/// Value class inferred for a CSV column from its first data row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Text,
    Number,
    Currency,
    Email,
    Date,
}

/// Represents the inferred schema of a single CSV column, generated during the
/// verification process on the backend.
///
/// The verification job analyzes the header and the first data row to guess
/// the structure of the file, then checks every remaining row against it. The
/// resulting `Vec<ColumnCheck>` is serialized into the payload of a
/// `JobStatus::Completed` message so that the caller can review the detected
/// schema before binding the source to a template slice.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct ColumnCheck {
    /// The column header title from the CSV file.
    pub title: String,
    /// The data type inferred from the first data row for this column.
    pub column_type: ColumnType,
    /// The actual value from the first data row for this column, shown as an
    /// example next to the inferred type.
    pub first_row: Option<String>,
}
