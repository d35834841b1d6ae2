/// Typed column decoding for ".dbf" tables.
///
/// Every cell on disk is a fixed-width byte string; a `Collector` turns one
/// column's cells into typed values. Which collector runs is chosen per
/// column, either automatically from the field's native type or by a
/// column-spec string (one character per column, or one character for all).
///
/// Decoding never aborts over bad data: a cell that won't parse becomes a
/// null and a `Problem` row, and the caller gets the whole table plus the
/// problem list.
use std::io;
use std::str;
use encoding::{DecoderTrap, EncodingRef};

use dbf::{DbfError, DbfFieldInfo, DbfTable};

/// Check the interrupt callback every this many rows.
const INTERRUPT_ROW_CADENCE: usize = 1000;

/// A recorded, non-fatal decode discrepancy.
#[derive(Debug,Clone,PartialEq,Eq)]
pub struct Problem {
    pub row: usize,
    pub field: usize,
    pub expected: String,
    pub actual: String,
}

#[derive(Debug)]
pub struct Problems {
    problems: Vec<Problem>,
}

impl Problems {
    pub fn new() -> Problems {
        Problems { problems: Vec::new() }
    }

    pub fn add(&mut self, row: usize, field: usize, expected: &str, actual: &str) {
        debug!("row {} field {}: expected {}, got '{}'", row, field, expected, actual);
        self.problems.push(Problem {
            row: row,
            field: field,
            expected: String::from(expected),
            actual: String::from(actual),
        });
    }

    pub fn into_vec(self) -> Vec<Problem> {
        self.problems
    }
}

/// One decoded column. `Skipped` columns reserve their slot but carry no
/// data.
#[derive(Debug,Clone,PartialEq)]
pub enum Column {
    Skipped,
    Strings(Vec<Option<String>>),
    Integers(Vec<Option<i32>>),
    Doubles(Vec<Option<f64>>),
    Logicals(Vec<Option<bool>>),
}

enum IntParse {
    Value(i32),
    OutOfRange,
    Invalid,
}

/// Strict base-10 integer scan: optional sign, digits, nothing else.
///
/// Values outside `(i32::MIN, i32::MAX]` are an expected edge (the minimum
/// is reserved as the null sentinel), distinguished from trailing garbage
/// so only the latter is reported as a problem.
fn parse_int_strict(s: &str) -> IntParse {
    let bytes = s.as_bytes();
    let digits = match bytes.first() {
        None => return IntParse::Invalid,
        Some(&b'-') | Some(&b'+') => &bytes[1..],
        Some(_) => bytes,
    };
    if digits.is_empty() {
        return IntParse::Invalid;
    }

    let negative = bytes[0] == b'-';
    let mut value: i64 = 0;
    let mut overflow = false;

    for &b in digits {
        if b < b'0' || b > b'9' {
            return IntParse::Invalid;
        }
        if !overflow {
            value = value * 10 + (b - b'0') as i64;
            if value > i32::max_value() as i64 + 1 {
                overflow = true;
            }
        }
    }

    let signed = if negative { -value } else { value };
    if overflow || signed > i32::max_value() as i64 || signed <= i32::min_value() as i64 {
        IntParse::OutOfRange
    } else {
        IntParse::Value(signed as i32)
    }
}

/// A per-column decoder: a tagged variant dispatched in `put()`, so every
/// cell goes through one function and the compiler sees every case.
pub enum Collector {
    Skip,
    Strings {
        values: Vec<Option<String>>,
        encoding: Option<EncodingRef>,
        encoding_name: String,
    },
    Integers { values: Vec<Option<i32>> },
    Doubles { values: Vec<Option<f64>> },
    Logicals { values: Vec<Option<bool>>, native_type: u8 },
}

impl ::std::fmt::Debug for Collector {
    fn fmt(&self, fmt: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
        match *self {
            Collector::Skip => fmt.write_str("Skip"),
            Collector::Strings { ref values, ref encoding_name, .. } => fmt
                .debug_struct("Strings")
                .field("values", values)
                .field("encoding_name", encoding_name)
                .finish(),
            Collector::Integers { ref values } => {
                fmt.debug_struct("Integers").field("values", values).finish()
            }
            Collector::Doubles { ref values } => {
                fmt.debug_struct("Doubles").field("values", values).finish()
            }
            Collector::Logicals { ref values, native_type } => fmt
                .debug_struct("Logicals")
                .field("values", values)
                .field("native_type", &native_type)
                .finish(),
        }
    }
}

impl Collector {
    fn strings(n_rows: usize, encoding: Option<EncodingRef>, encoding_name: &str) -> Collector {
        Collector::Strings {
            values: Vec::with_capacity(n_rows),
            encoding: encoding,
            encoding_name: String::from(encoding_name),
        }
    }

    /// The collector a field gets with no spec: 'I' integer, 'N'/'F'
    /// double, 'L' boolean, anything else text.
    pub fn auto(
        native_type: u8,
        n_rows: usize,
        encoding: Option<EncodingRef>,
        encoding_name: &str,
    ) -> Collector {
        match native_type {
            b'I' => Collector::Integers { values: Vec::with_capacity(n_rows) },
            b'F' | b'N' => Collector::Doubles { values: Vec::with_capacity(n_rows) },
            b'L' => Collector::Logicals {
                values: Vec::with_capacity(n_rows),
                native_type: b'L',
            },
            _ => Collector::strings(n_rows, encoding, encoding_name),
        }
    }

    /// The collector for one column-spec character: `?` auto, `-` skip,
    /// `c` text, `i` integer, `d` double, `l` boolean.
    pub fn user(
        spec: char,
        native_type: u8,
        n_rows: usize,
        encoding: Option<EncodingRef>,
        encoding_name: &str,
    ) -> Result<Collector, DbfError> {
        match spec {
            '?' => Ok(Collector::auto(native_type, n_rows, encoding, encoding_name)),
            '-' => Ok(Collector::Skip),
            'c' => Ok(Collector::strings(n_rows, encoding, encoding_name)),
            'i' => Ok(Collector::Integers { values: Vec::with_capacity(n_rows) }),
            'd' => Ok(Collector::Doubles { values: Vec::with_capacity(n_rows) }),
            'l' => Ok(Collector::Logicals {
                values: Vec::with_capacity(n_rows),
                native_type: native_type,
            }),
            other => Err(DbfError::ColumnSpecError(format!(
                "Can't guess collector from specification '{}'",
                other
            ))),
        }
    }

    /// Decodes one cell into this collector's column.
    pub fn put<R: io::Read + io::Seek>(
        &mut self,
        dbf: &mut DbfTable<R>,
        problems: &mut Problems,
        row: usize,
        field: usize,
    ) -> Result<(), DbfError> {
        match *self {
            Collector::Skip => Ok(()),

            Collector::Strings { ref mut values, encoding, ref encoding_name } => {
                if dbf.is_null(row, field)? {
                    values.push(None);
                    return Ok(());
                }

                let bytes = dbf.raw_value(row, field)?;
                let converted = match encoding {
                    Some(converter) => converter.decode(&bytes, DecoderTrap::Strict).ok(),
                    None => str::from_utf8(&bytes).ok().map(String::from),
                };

                match converted {
                    Some(text) => values.push(Some(text)),
                    None => {
                        let fallback = String::from_utf8_lossy(&bytes).into_owned();
                        problems.add(
                            row,
                            field,
                            &format!("text with encoding '{}'", encoding_name),
                            &fallback,
                        );
                        values.push(Some(fallback));
                    }
                }
                Ok(())
            }

            Collector::Integers { ref mut values } => {
                if dbf.is_null(row, field)? {
                    values.push(None);
                    return Ok(());
                }

                let text = dbf.raw_string(row, field)?;
                match parse_int_strict(&text) {
                    IntParse::Value(value) => values.push(Some(value)),
                    IntParse::OutOfRange => values.push(None),
                    IntParse::Invalid => {
                        problems.add(row, field, "no trailing characters", &text);
                        values.push(None);
                    }
                }
                Ok(())
            }

            Collector::Doubles { ref mut values } => {
                if dbf.is_null(row, field)? {
                    values.push(None);
                    return Ok(());
                }

                // str::parse is whole-string and dot-decimal on every
                // platform, independent of the process locale.
                let text = dbf.raw_string(row, field)?;
                match text.parse::<f64>() {
                    Ok(value) => values.push(Some(value)),
                    Err(_) => {
                        problems.add(row, field, "no trailing characters", &text);
                        values.push(None);
                    }
                }
                Ok(())
            }

            Collector::Logicals { ref mut values, native_type } => {
                if dbf.is_null(row, field)? {
                    values.push(None);
                    return Ok(());
                }

                if native_type == b'L' {
                    let bytes = dbf.raw_value(row, field)?;
                    if bytes.len() > 1 {
                        let actual = String::from_utf8_lossy(&bytes).into_owned();
                        problems.add(row, field, "0x00 or 0x01", &actual);
                        values.push(None);
                    } else {
                        match bytes[0] {
                            0 => values.push(Some(false)),
                            1 => values.push(Some(true)),
                            other => {
                                problems.add(row, field, "0x00 or 0x01", &format!("{:#04x}", other));
                                values.push(None);
                            }
                        }
                    }
                } else {
                    let text = dbf.raw_string(row, field)?;
                    match text.as_str() {
                        "true" | "TRUE" | "T" | "t" | "1" => values.push(Some(true)),
                        "false" | "FALSE" | "F" | "f" | "0" => values.push(Some(false)),
                        _ => {
                            problems.add(row, field, "true/TRUE/t/1/false/FALSE/f/0", &text);
                            values.push(None);
                        }
                    }
                }
                Ok(())
            }
        }
    }

    pub fn into_column(self) -> Column {
        match self {
            Collector::Skip => Column::Skipped,
            Collector::Strings { values, .. } => Column::Strings(values),
            Collector::Integers { values } => Column::Integers(values),
            Collector::Doubles { values } => Column::Doubles(values),
            Collector::Logicals { values, .. } => Column::Logicals(values),
        }
    }
}

/// A fully decoded table: named columns, the row count (kept separately so
/// an all-skipped table still has dimensions), and every decode problem.
#[derive(Debug)]
pub struct DecodedTable {
    pub columns: Vec<(String, Column)>,
    pub n_rows: usize,
    pub problems: Vec<Problem>,
}

fn build_collectors<R: io::Read + io::Seek>(
    dbf: &DbfTable<R>,
    col_spec: &str,
) -> Result<Vec<Collector>, DbfError> {
    let fields: Vec<DbfFieldInfo> = dbf.fields().to_vec();
    let n_rows = dbf.row_count();
    let encoding = dbf.encoding();
    let encoding_name = String::from(dbf.resolved_encoding());

    let spec_chars: Vec<char> = col_spec.chars().collect();

    if spec_chars.is_empty() {
        Ok(fields
            .iter()
            .map(|info| Collector::auto(info.native_type, n_rows, encoding, &encoding_name))
            .collect())
    } else if spec_chars.len() == 1 {
        fields
            .iter()
            .map(|info| Collector::user(spec_chars[0], info.native_type, n_rows, encoding, &encoding_name))
            .collect()
    } else if spec_chars.len() == fields.len() {
        fields
            .iter()
            .zip(spec_chars.iter())
            .map(|(info, &spec)| Collector::user(spec, info.native_type, n_rows, encoding, &encoding_name))
            .collect()
    } else {
        Err(DbfError::ColumnSpecError(format!(
            "Can't use column spec with {} characters for a table with {} fields",
            spec_chars.len(),
            fields.len()
        )))
    }
}

/// Decodes every row of `dbf` under `col_spec`, polling `interrupt` every
/// 1000 rows so a hosting process can abort a long read.
///
/// Iteration is row-major outer, field-major inner: all of a row's fields
/// sit contiguously on disk, so this order reads each record exactly once.
pub fn decode_table_with_interrupt<R: io::Read + io::Seek>(
    dbf: &mut DbfTable<R>,
    col_spec: &str,
    interrupt: &mut FnMut() -> bool,
) -> Result<DecodedTable, DbfError> {
    let mut collectors = build_collectors(dbf, col_spec)?;
    let n_rows = dbf.row_count();
    let mut problems = Problems::new();

    for row in 0..n_rows {
        if (row + 1) % INTERRUPT_ROW_CADENCE == 0 && interrupt() {
            return Err(DbfError::Interrupted);
        }

        for (field, collector) in collectors.iter_mut().enumerate() {
            collector.put(dbf, &mut problems, row, field)?;
        }
    }

    let columns = dbf
        .fields()
        .iter()
        .map(|info| info.name.clone())
        .zip(collectors.into_iter().map(|collector| collector.into_column()))
        .collect();

    Ok(DecodedTable {
        columns: columns,
        n_rows: n_rows,
        problems: problems.into_vec(),
    })
}

/// `decode_table_with_interrupt()` without the interrupt seam.
pub fn decode_table<R: io::Read + io::Seek>(
    dbf: &mut DbfTable<R>,
    col_spec: &str,
) -> Result<DecodedTable, DbfError> {
    decode_table_with_interrupt(dbf, col_spec, &mut || false)
}

#[cfg(test)]
mod test {
    use std::io;
    use dbf::test::{dbf_bytes, table_over};
    use dbf::{DbfError, DbfTable};
    use super::{decode_table, decode_table_with_interrupt, Column};

    fn cell(text: &str, width: usize) -> Vec<u8> {
        let mut bytes = text.as_bytes().to_vec();
        while bytes.len() < width {
            bytes.push(b' ');
        }
        bytes
    }

    fn numeric_cell(text: &str, width: usize) -> Vec<u8> {
        let mut bytes = Vec::new();
        while bytes.len() + text.len() < width {
            bytes.push(b' ');
        }
        bytes.extend_from_slice(text.as_bytes());
        bytes
    }

    #[test]
    fn auto_spec_types_by_native_type() {
        let mut table = table_over(
            &[("name", b'C', 8), ("age", b'N', 5)],
            &[
                vec![cell("fred", 8), numeric_cell("31", 5)],
                vec![cell("wilma", 8), numeric_cell("30.5", 5)],
                vec![cell("dino", 8), numeric_cell("4", 5)],
            ],
            0,
        );

        let decoded = decode_table(&mut table, "").unwrap();

        assert_eq!(3, decoded.n_rows);
        assert_eq!(0, decoded.problems.len());
        assert_eq!("name", decoded.columns[0].0);
        assert_eq!(
            Column::Strings(vec![
                Some(String::from("fred")),
                Some(String::from("wilma")),
                Some(String::from("dino")),
            ]),
            decoded.columns[0].1
        );
        assert_eq!(
            Column::Doubles(vec![Some(31.), Some(30.5), Some(4.)]),
            decoded.columns[1].1
        );
    }

    #[test]
    fn column_spec_length_must_match() {
        let mut table = table_over(&[("a", b'C', 1), ("b", b'C', 1)], &[], 0);

        match decode_table(&mut table, "cc-") {
            Err(DbfError::ColumnSpecError(_)) => {}
            other => panic!("expected ColumnSpecError, got {:?}", other),
        }

        assert!(decode_table(&mut table, "").is_ok());
        assert!(decode_table(&mut table, "c").is_ok());
        assert!(decode_table(&mut table, "c-").is_ok());
    }

    #[test]
    fn unknown_spec_character() {
        let mut table = table_over(&[("a", b'C', 1)], &[], 0);

        match decode_table(&mut table, "x") {
            Err(DbfError::ColumnSpecError(ref message)) => {
                assert!(message.contains("'x'"), "{}", message);
            }
            other => panic!("expected ColumnSpecError, got {:?}", other),
        }
    }

    #[test]
    fn skipped_column_reserves_its_slot() {
        let mut table = table_over(
            &[("a", b'C', 1), ("b", b'N', 2)],
            &[vec![cell("x", 1), numeric_cell("7", 2)]],
            0,
        );

        let decoded = decode_table(&mut table, "-d").unwrap();

        assert_eq!(Column::Skipped, decoded.columns[0].1);
        assert_eq!(Column::Doubles(vec![Some(7.)]), decoded.columns[1].1);
        assert_eq!(1, decoded.n_rows);
    }

    #[test]
    fn integer_parsing() {
        let mut table = table_over(
            &[("n", b'N', 12)],
            &[
                vec![numeric_cell("123", 12)],
                vec![numeric_cell("123abc", 12)],
                vec![numeric_cell("-17", 12)],
                vec![numeric_cell("99999999999", 12)],
                vec![numeric_cell("-2147483648", 12)],
                vec![numeric_cell("2147483647", 12)],
            ],
            0,
        );

        let decoded = decode_table(&mut table, "i").unwrap();

        assert_eq!(
            Column::Integers(vec![
                Some(123),
                None,
                Some(-17),
                None,
                None,
                Some(2147483647),
            ]),
            decoded.columns[0].1
        );

        // Trailing garbage is a problem; out-of-range values are not.
        assert_eq!(1, decoded.problems.len());
        assert_eq!(1, decoded.problems[0].row);
        assert_eq!(0, decoded.problems[0].field);
        assert_eq!("no trailing characters", decoded.problems[0].expected);
        assert_eq!("123abc", decoded.problems[0].actual);
    }

    #[test]
    fn double_parsing() {
        let mut table = table_over(
            &[("x", b'N', 10)],
            &[
                vec![numeric_cell("1.5", 10)],
                vec![numeric_cell("-2.25e2", 10)],
                vec![numeric_cell("1.5oops", 10)],
                vec![numeric_cell("", 10)],
            ],
            0,
        );

        let decoded = decode_table(&mut table, "d").unwrap();

        assert_eq!(
            Column::Doubles(vec![Some(1.5), Some(-225.), None, None]),
            decoded.columns[0].1
        );
        assert_eq!(1, decoded.problems.len());
        assert_eq!("1.5oops", decoded.problems[0].actual);
    }

    #[test]
    fn logical_native_bytes() {
        let mut table = table_over(
            &[("flag", b'L', 1)],
            &[
                vec![vec![0x01]],
                vec![vec![0x00]],
                vec![vec![0x02]],
                vec![vec![b'?']],
            ],
            0,
        );

        let decoded = decode_table(&mut table, "").unwrap();

        assert_eq!(
            Column::Logicals(vec![Some(true), Some(false), None, None]),
            decoded.columns[0].1
        );
        assert_eq!(1, decoded.problems.len());
        assert_eq!("0x00 or 0x01", decoded.problems[0].expected);
        assert_eq!("0x02", decoded.problems[0].actual);
    }

    #[test]
    fn logical_from_text() {
        let mut table = table_over(
            &[("flag", b'C', 5)],
            &[
                vec![cell("true", 5)],
                vec![cell("F", 5)],
                vec![cell("1", 5)],
                vec![cell("maybe", 5)],
            ],
            0,
        );

        let decoded = decode_table(&mut table, "l").unwrap();

        assert_eq!(
            Column::Logicals(vec![Some(true), Some(false), Some(true), None]),
            decoded.columns[0].1
        );
        assert_eq!(1, decoded.problems.len());
        assert_eq!("true/TRUE/t/1/false/FALSE/f/0", decoded.problems[0].expected);
        assert_eq!("maybe", decoded.problems[0].actual);
    }

    #[test]
    fn nulls_become_none_without_problems() {
        let mut table = table_over(
            &[("name", b'C', 4), ("age", b'N', 3)],
            &[
                vec![cell("", 4), numeric_cell("", 3)],
                vec![cell("x", 4), numeric_cell("9", 3)],
            ],
            0,
        );

        let decoded = decode_table(&mut table, "").unwrap();

        assert_eq!(
            Column::Strings(vec![None, Some(String::from("x"))]),
            decoded.columns[0].1
        );
        assert_eq!(Column::Doubles(vec![None, Some(9.)]), decoded.columns[1].1);
        assert_eq!(0, decoded.problems.len());
    }

    #[test]
    fn bad_encoding_passes_raw_bytes_through() {
        // 0xE9 is 'é' in ISO-8859-1 but invalid UTF-8.
        let rows = vec![vec![vec![b'c', b'a', b'f', 0xe9]]];
        let mut table = table_over(&[("name", b'C', 4)], &rows, 0);

        let decoded = decode_table(&mut table, "").unwrap();

        assert_eq!(1, decoded.problems.len());
        assert_eq!("text with encoding 'UTF-8'", decoded.problems[0].expected);
        match decoded.columns[0].1 {
            Column::Strings(ref values) => {
                // Lossy pass-through: the bad byte became U+FFFD.
                assert_eq!("caf\u{fffd}", values[0].as_ref().unwrap());
            }
            ref other => panic!("expected Strings, got {:?}", other),
        }
    }

    #[test]
    fn latin1_declared_encoding_converts() {
        let rows = vec![vec![vec![b'c', b'a', b'f', 0xe9]]];
        let bytes = dbf_bytes(&[("name", b'C', 4)], &rows, 87);
        let mut table = DbfTable::new(io::Cursor::new(bytes), None, None).unwrap();

        assert_eq!("ISO-8859-1", table.resolved_encoding());

        let decoded = decode_table(&mut table, "").unwrap();
        assert_eq!(0, decoded.problems.len());
        match decoded.columns[0].1 {
            Column::Strings(ref values) => {
                assert_eq!("caf\u{e9}", values[0].as_ref().unwrap());
            }
            ref other => panic!("expected Strings, got {:?}", other),
        }
    }

    #[test]
    fn interrupt_stops_the_decode() {
        let rows: Vec<Vec<Vec<u8>>> = (0..2500).map(|i| {
            vec![numeric_cell(&format!("{}", i % 10), 2)]
        }).collect();
        let mut table = table_over(&[("n", b'N', 2)], &rows, 0);

        let mut n_checks = 0;
        let result = decode_table_with_interrupt(&mut table, "i", &mut || {
            n_checks += 1;
            n_checks == 2
        });

        match result {
            Err(DbfError::Interrupted) => {}
            other => panic!("expected Interrupted, got {:?}", other),
        }
        assert_eq!(2, n_checks);
    }

    #[test]
    fn parse_int_strict_cases() {
        use super::{parse_int_strict, IntParse};

        match parse_int_strict("123") {
            IntParse::Value(123) => {}
            _ => panic!("123"),
        }
        match parse_int_strict("+42") {
            IntParse::Value(42) => {}
            _ => panic!("+42"),
        }
        match parse_int_strict("123abc") {
            IntParse::Invalid => {}
            _ => panic!("123abc"),
        }
        match parse_int_strict("-") {
            IntParse::Invalid => {}
            _ => panic!("-"),
        }
        match parse_int_strict("") {
            IntParse::Invalid => {}
            _ => panic!("empty"),
        }
        match parse_int_strict("2147483648") {
            IntParse::OutOfRange => {}
            _ => panic!("2147483648"),
        }
        match parse_int_strict("-2147483648") {
            IntParse::OutOfRange => {}
            _ => panic!("-2147483648 is the null sentinel"),
        }
        match parse_int_strict("-2147483647") {
            IntParse::Value(-2147483647) => {}
            _ => panic!("-2147483647"),
        }
        match parse_int_strict("123456789012345678901234567890") {
            IntParse::OutOfRange => {}
            _ => panic!("very long digit string"),
        }
    }
}
