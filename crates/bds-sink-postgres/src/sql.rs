//! SQL text for the staging-table swap
//!
//! Table names come from configuration, never from the export payload, but
//! they are still quoted everywhere they are interpolated.

use bds_core::Error;

/// Quote an identifier, doubling embedded quotes
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Zero-row query used to learn a table's column shape
pub fn probe(table: &str) -> String {
    format!("SELECT * FROM {} LIMIT 0", quote_ident(table))
}

/// Session-local staging relation with the destination's column shape
pub fn create_staging(table: &str, staging: &str) -> String {
    format!(
        "CREATE TEMP TABLE {} AS SELECT * FROM {} LIMIT 0",
        quote_ident(staging),
        quote_ident(table)
    )
}

/// Bulk copy of header-less CSV into the staging relation
pub fn copy_into(staging: &str) -> String {
    format!("COPY {} FROM STDIN WITH (FORMAT CSV)", quote_ident(staging))
}

pub fn drop_staging(staging: &str) -> String {
    format!("DROP TABLE {}", quote_ident(staging))
}

/// Primary key columns of a table, in key order
pub const PRIMARY_KEY_COLUMNS: &str = "\
SELECT a.attname::text
FROM pg_index i
JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey)
WHERE i.indrelid = $1::text::regclass AND i.indisprimary
ORDER BY array_position(i.indkey::int2[], a.attnum)";

/// Positions of the primary key columns within the table's column list
pub fn key_positions(columns: &[String], primary_key: &[String]) -> Vec<usize> {
    primary_key
        .iter()
        .filter_map(|key| columns.iter().position(|c| c == key))
        .collect()
}

/// Primary-key upsert from the staging relation into the destination
///
/// Non-key columns are overwritten from the staged row. When every column is
/// part of the key there is nothing to update, so conflicts are ignored.
pub fn default_merge(
    table: &str,
    staging: &str,
    columns: &[String],
    primary_key: &[String],
) -> Result<String, Error> {
    if primary_key.is_empty() {
        return Err(Error::load(
            table,
            "table has no primary key and no merge statement is configured",
        ));
    }

    let conflict = primary_key
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");

    let updates = columns
        .iter()
        .filter(|c| !primary_key.contains(*c))
        .map(|c| format!("{col} = EXCLUDED.{col}", col = quote_ident(c)))
        .collect::<Vec<_>>();

    let action = if updates.is_empty() {
        "DO NOTHING".to_string()
    } else {
        format!("DO UPDATE SET {}", updates.join(", "))
    };

    Ok(format!(
        "INSERT INTO {} SELECT * FROM {} ON CONFLICT ({}) {}",
        quote_ident(table),
        quote_ident(staging),
        conflict,
        action
    ))
}
