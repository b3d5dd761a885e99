//! Row encoding for the matching hardware.
//!
//! The stream opens with the delimiter, then every row contributes one symbol per
//! segment of each feature, in the table's stream order, followed by another
//! delimiter.
use crate::error::{ConvertError, Result};
use crate::table::{FeatureTable, DELIMITER};

pub fn encode_rows<'a, I>(table: &FeatureTable, rows: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = &'a [f64]>,
{
    let order = table.stream_order();
    let mut stream = vec![DELIMITER];

    for (index, row) in rows.into_iter().enumerate() {
        encode_row(table, &order, index, row, &mut stream)?;
        stream.push(DELIMITER);
    }

    Ok(stream)
}

fn encode_row(
    table: &FeatureTable,
    order: &[usize],
    index: usize,
    row: &[f64],
    stream: &mut Vec<u8>,
) -> Result<()> {
    for &feature in order {
        let value = *row.get(feature).ok_or(ConvertError::RowWidth {
            row: index,
            feature,
            found: row.len(),
        })?;
        if value.is_nan() {
            return Err(ConvertError::NanValue {
                row: index,
                feature,
            });
        }

        stream.extend(
            table
                .symbols(feature, value)?
                .into_iter()
                .map(|(_, symbol)| symbol),
        );
    }
    Ok(())
}
