use anyhow::{Context, Result};
use ember_value::Value;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ValueReport {
    pub kind: &'static str,
    pub repr: String,
}

impl From<Value> for ValueReport {
    fn from(v: Value) -> Self {
        ValueReport {
            kind: v.kind().as_str(),
            repr: v.to_string(),
        }
    }
}

pub fn write_json<T: Serialize>(report: &T) -> Result<()> {
    let mut bytes = serde_json::to_vec(report)?;
    bytes.push(b'\n');
    std::io::Write::write_all(&mut std::io::stdout(), &bytes).context("write stdout")
}

pub fn exit_code(ok: bool) -> std::process::ExitCode {
    if ok {
        std::process::ExitCode::SUCCESS
    } else {
        std::process::ExitCode::from(1)
    }
}
