extern crate shpio;

use std::env;
use std::io;
use std::io::Write;
use std::path::PathBuf;
use std::process;
use shpio::collect::Column;
use shpio::meta;

fn cell_to_string(column: &Column, row: usize) -> String {
    fn option_to_string<T: ToString>(value: &Option<T>) -> String {
        match *value {
            None => String::from("<null>"),
            Some(ref value) => value.to_string(),
        }
    }

    match *column {
        Column::Skipped => String::from("-"),
        Column::Strings(ref values) => option_to_string(&values[row]),
        Column::Integers(ref values) => option_to_string(&values[row]),
        Column::Doubles(ref values) => option_to_string(&values[row]),
        Column::Logicals(ref values) => option_to_string(&values[row]),
    }
}

fn main() {
    let mut args = env::args();

    if args.len() < 2 || args.len() > 3 {
        writeln!(&mut io::stderr(), "Usage: {} <DBF_PATH> [COL_SPEC]", args.next().unwrap()).unwrap();
        process::exit(1);
    }

    args.next();
    let path = PathBuf::from(args.next().unwrap());
    let col_spec = args.next().unwrap_or_else(String::new);

    match meta::read_dbf_table(&path, &col_spec, None) {
        Err(err) => {
            writeln!(&mut io::stderr(), "{}", err).unwrap();
            process::exit(1);
        }
        Ok(table) => {
            let names: Vec<&str> = table.columns.iter().map(|&(ref name, _)| name.as_str()).collect();
            println!("{}", names.join("\t"));

            for row in 0..table.n_rows {
                let cells: Vec<String> = table
                    .columns
                    .iter()
                    .map(|&(_, ref column)| cell_to_string(column, row))
                    .collect();
                println!("{}", cells.join("\t"));
            }

            if !table.problems.is_empty() {
                writeln!(&mut io::stderr(), "{} problems:", table.problems.len()).unwrap();
                for problem in &table.problems {
                    writeln!(
                        &mut io::stderr(),
                        "  row {} field {}: expected {}, got '{}'",
                        problem.row, problem.field, problem.expected, problem.actual
                    ).unwrap();
                }
            }
        }
    }
}
