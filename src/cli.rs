#![cfg(feature = "cli")]

use std::{
    fmt, fs,
    io::{self, Read},
    path,
};

use byteorder::{LittleEndian, ReadBytesExt};
use clap::{arg, command, value_parser};
use forestap::{
    catboost, network, sklearn, stream, treelite, Bundle, ConvertError, ConvertOptions,
    PackConfig,
};

trait Fail<T> {
    fn fail<'a>(self, message: impl FnOnce() -> &'a str) -> T;
}

impl<T, E: fmt::Display> Fail<T> for Result<T, E> {
    fn fail<'a>(self, message: impl FnOnce() -> &'a str) -> T {
        self.unwrap_or_else(|err| {
            eprintln!("{}: {}", message(), err);
            std::process::exit(1);
        })
    }
}

fn main() {
    let matches = command!()
        .about("Convert a tree-based machine learning model into automaton chains and a packed feature table")
        .arg_required_else_help(true)
        .arg(
            arg!(-t --type <MODEL_TYPE> "The type of model that is passed")
                .value_parser(["treelite", "catboost", "sklearn", "bundle"])
                .default_value("treelite"),
        )
        .arg(
            arg!(--capacity <N> "Number of thresholds a bin can hold")
                .value_parser(value_parser!(usize))
                .default_value("254"),
        )
        .arg(
            arg!(--"max-bin-increments" <N> "How many extra bins packing may try before giving up")
                .value_parser(value_parser!(usize))
                .default_value("256"),
        )
        .arg(
            arg!(--bundle <FILE> "Also save the chains and feature table to this file")
                .value_parser(value_parser!(path::PathBuf)),
        )
        .arg(
            arg!(--rows <FILE> "NumPy file of f64 rows to encode into an input stream")
                .value_parser(value_parser!(path::PathBuf))
                .requires("stream"),
        )
        .arg(
            arg!(--stream <FILE> "Path to the resulting input stream")
                .value_parser(value_parser!(path::PathBuf))
                .requires("rows"),
        )
        .arg(arg!(-v --verbose "Log every packing step"))
        .arg(
            arg!(<INPUT_FILE>)
                .required(true)
                .value_parser(value_parser!(path::PathBuf))
                .help("Path to the model JSON dump, or a saved bundle"),
        )
        .arg(
            arg!(<OUTPUT_FILE>)
                .required(true)
                .value_parser(value_parser!(path::PathBuf))
                .help("Path to the resulting network description"),
        )
        .get_matches();

    let level = if matches.get_flag("verbose") {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let model_type: &String = matches.get_one("type").unwrap();
    let capacity: usize = *matches.get_one("capacity").unwrap();
    let max_bin_increments: usize = *matches.get_one("max-bin-increments").unwrap();
    let input_path: &path::PathBuf = matches.get_one("INPUT_FILE").unwrap();
    let output_path: &path::PathBuf = matches.get_one("OUTPUT_FILE").unwrap();

    let options = ConvertOptions {
        pack: PackConfig::new(capacity, max_bin_increments).fail(|| "invalid packing options"),
    };

    let json = fs::read_to_string(input_path).fail(|| "could not read input file");

    let bundle = match model_type.as_str() {
        "bundle" => Bundle::from_json(&json).fail(|| "failed to load bundle"),
        model_type => {
            log::info!("loading model...");
            let forest = match model_type {
                "treelite" => treelite::Model::from_json(&json)
                    .fail(|| "failed to deserialize model")
                    .into_forest(),
                "catboost" => catboost::Model::from_json(&json)
                    .fail(|| "failed to deserialize model")
                    .into_forest(),
                "sklearn" => sklearn::Model::from_json(&json)
                    .fail(|| "failed to deserialize model")
                    .into_forest(),
                _ => unreachable!(),
            }
            .fail(|| "invalid model");

            log::info!("converting model...");
            forestap::convert(&forest, &options).fail(|| "conversion failed")
        }
    };

    if let Some(bundle_path) = matches.get_one::<path::PathBuf>("bundle") {
        log::info!("saving bundle...");
        bundle.save(bundle_path).fail(|| "could not write bundle");
    }

    log::info!("saving network...");
    let network = network::describe(&bundle).fail(|| "could not describe network");
    let network_json = network.to_json().fail(|| "could not serialize network");
    fs::write(output_path, network_json).fail(|| "could not write network");

    if let (Some(rows_path), Some(stream_path)) = (
        matches.get_one::<path::PathBuf>("rows"),
        matches.get_one::<path::PathBuf>("stream"),
    ) {
        log::info!("encoding rows...");
        let (values, columns) = read_rows(rows_path).fail(|| "could not read rows");
        let rows = values.chunks(columns.max(1));
        let encoded = stream::encode_rows(&bundle.table, rows).fail(|| "could not encode rows");
        fs::write(stream_path, encoded).fail(|| "could not write input stream");
    }

    log::info!("done!")
}

/// Reads a C-ordered little-endian `f64` matrix, returning its values and row width.
fn read_rows(path: &path::PathBuf) -> Result<(Vec<f64>, usize), ConvertError> {
    let invalid = |reason: &str| ConvertError::InvalidNumpy(reason.to_string());

    let file = fs::File::open(path)?;
    let mut reader = io::BufReader::new(file);

    let mut magic = [0u8; 6];
    reader.read_exact(&mut magic)?;
    if &magic != b"\x93NUMPY" {
        return Err(invalid("missing magic bytes"));
    }

    let major = reader.read_u8()?;
    let _minor = reader.read_u8()?;
    let header_len = match major {
        1 => reader.read_u16::<LittleEndian>()? as usize,
        2 | 3 => reader.read_u32::<LittleEndian>()? as usize,
        _ => return Err(invalid("unknown format version")),
    };

    let mut header = vec![0u8; header_len];
    reader.read_exact(&mut header)?;
    let header = String::from_utf8_lossy(&header);

    if !header.contains("'descr': '<f8'") {
        return Err(invalid("expected little-endian f64 values"));
    }
    if !header.contains("'fortran_order': False") {
        return Err(invalid("expected C-ordered values"));
    }

    let shape = header
        .split_once("'shape': (")
        .and_then(|(_, rest)| rest.split_once(')'))
        .map(|(shape, _)| shape)
        .ok_or_else(|| invalid("missing shape"))?;
    let dims = shape
        .split(',')
        .map(str::trim)
        .filter(|dim| !dim.is_empty())
        .map(|dim| dim.parse::<usize>().map_err(|_| invalid("malformed shape")))
        .collect::<Result<Vec<_>, _>>()?;
    let (rows, columns) = match dims[..] {
        [rows, columns] => (rows, columns),
        _ => return Err(invalid("expected a two-dimensional array")),
    };

    let mut values = vec![0.0; rows * columns];
    reader.read_f64_into::<LittleEndian>(&mut values)?;

    Ok((values, columns))
}
