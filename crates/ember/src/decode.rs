use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Args};
use ember_contracts::EMBER_DECODE_REPORT_SCHEMA_VERSION;
use ember_runtime::Format;
use serde::Serialize;

use crate::report::{exit_code, write_json, ValueReport};
use crate::GlobalArgs;

#[derive(Debug, Args)]
#[command(group(ArgGroup::new("source").required(true).args(["hex", "text", "input"])))]
pub struct DecodeArgs {
    /// Wire format: json, msgpack or cbor.
    #[arg(long, value_parser = parse_format)]
    pub format: Format,

    /// Input bytes as hex digits (whitespace ignored).
    #[arg(long)]
    pub hex: Option<String>,

    /// Input bytes as literal UTF-8 text.
    #[arg(long)]
    pub text: Option<String>,

    /// Read input bytes from a file.
    #[arg(long, value_name = "PATH")]
    pub input: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct DecodeReport {
    schema_version: &'static str,
    ok: bool,
    format: &'static str,
    value: Option<ValueReport>,
    consumed: Option<usize>,
    error: Option<String>,
}

fn parse_format(s: &str) -> Result<Format, String> {
    Format::parse(s).ok_or_else(|| format!("unknown format {s:?} (expected json, msgpack or cbor)"))
}

pub fn parse_hex(s: &str) -> Result<Vec<u8>> {
    let digits: Vec<u8> = s.bytes().filter(|b| !b.is_ascii_whitespace()).collect();
    if digits.len() % 2 != 0 {
        bail!("hex input has an odd number of digits");
    }
    digits
        .chunks(2)
        .map(|pair| {
            let hi = (pair[0] as char).to_digit(16);
            let lo = (pair[1] as char).to_digit(16);
            match (hi, lo) {
                (Some(hi), Some(lo)) => Ok((hi * 16 + lo) as u8),
                _ => bail!(
                    "invalid hex digit in {:?}",
                    String::from_utf8_lossy(pair)
                ),
            }
        })
        .collect()
}

fn read_source(args: &DecodeArgs) -> Result<Vec<u8>> {
    if let Some(hex) = &args.hex {
        return parse_hex(hex).context("parse --hex");
    }
    if let Some(text) = &args.text {
        return Ok(text.as_bytes().to_vec());
    }
    if let Some(path) = &args.input {
        return std::fs::read(path).with_context(|| format!("read input: {}", path.display()));
    }
    bail!("one of --hex, --text or --input is required")
}

pub fn cmd_decode(global: &GlobalArgs, args: DecodeArgs) -> Result<std::process::ExitCode> {
    let bytes = read_source(&args)?;
    let rt = crate::start_runtime(global, Some(1))?;
    let report = match rt.decode(args.format, &bytes) {
        Ok(d) => DecodeReport {
            schema_version: EMBER_DECODE_REPORT_SCHEMA_VERSION,
            ok: true,
            format: args.format.as_str(),
            value: Some(d.value.into()),
            consumed: Some(d.consumed),
            error: None,
        },
        Err(e) => DecodeReport {
            schema_version: EMBER_DECODE_REPORT_SCHEMA_VERSION,
            ok: false,
            format: args.format.as_str(),
            value: None,
            consumed: None,
            error: Some(e.to_string()),
        },
    };
    rt.shutdown();
    write_json(&report)?;
    Ok(exit_code(report.ok))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_parsing() {
        assert_eq!(parse_hex("c3").unwrap(), vec![0xc3]);
        assert_eq!(parse_hex(" 19 03E8 ").unwrap(), vec![0x19, 0x03, 0xe8]);
        assert_eq!(parse_hex("").unwrap(), Vec::<u8>::new());
        assert!(parse_hex("abc").is_err());
        assert!(parse_hex("zz").is_err());
    }
}
