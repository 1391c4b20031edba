use anyhow::{anyhow, bail, Context, Result};
use clap::Args;
use ember_contracts::EMBER_ATTR_REPORT_SCHEMA_VERSION;
use ember_runtime::{Format, ObjectError, ObjectLayout, Value, ValueKind};
use serde::Serialize;

use crate::report::{exit_code, write_json, ValueReport};
use crate::GlobalArgs;

#[derive(Debug, Args)]
pub struct AttrArgs {
    /// Layout name.
    #[arg(long, default_value = "Object")]
    pub layout: String,

    /// Field declaration as NAME:KIND (kind: int, float, bool, none, ref). Repeatable.
    #[arg(long = "field", value_name = "NAME:KIND", required = true)]
    pub fields: Vec<String>,

    /// Store NAME=JSON_SCALAR before the lookup. Repeatable.
    #[arg(long = "set", value_name = "NAME=VALUE")]
    pub sets: Vec<String>,

    /// Attribute to look up.
    #[arg(long)]
    pub get: String,
}

#[derive(Debug, Serialize)]
struct FieldReport {
    name: String,
    offset: u32,
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct AttrReport {
    schema_version: &'static str,
    ok: bool,
    layout: String,
    fields: Vec<FieldReport>,
    get: String,
    value: Option<ValueReport>,
    error: Option<&'static str>,
    detail: Option<String>,
}

fn parse_field(decl: &str) -> Result<(&str, ValueKind)> {
    let (name, kind) = decl
        .split_once(':')
        .ok_or_else(|| anyhow!("field {decl:?} is not NAME:KIND"))?;
    let kind = ValueKind::parse(kind).ok_or_else(|| anyhow!("unknown kind {kind:?} in {decl:?}"))?;
    if name.is_empty() {
        bail!("field {decl:?} has an empty name");
    }
    Ok((name, kind))
}

fn error_code(e: &ObjectError) -> &'static str {
    match e {
        ObjectError::NotAnObject(_) => "not_an_object",
        ObjectError::UnknownLayout(_) => "unknown_layout",
        ObjectError::AttributeNotFound { .. } => "attribute_not_found",
        ObjectError::KindMismatch { .. } => "kind_mismatch",
        ObjectError::Arena(_) => "arena",
    }
}

pub fn cmd_attr(global: &GlobalArgs, args: AttrArgs) -> Result<std::process::ExitCode> {
    let decls = args
        .fields
        .iter()
        .map(|f| parse_field(f))
        .collect::<Result<Vec<_>>>()?;
    let layout = ObjectLayout::packed(args.layout.clone(), &decls).context("build layout")?;
    let fields = layout
        .fields()
        .iter()
        .map(|f| FieldReport {
            name: f.name_lossy(),
            offset: f.offset,
            kind: f.kind.as_str(),
        })
        .collect();

    let rt = crate::start_runtime(global, Some(1))?;
    let id = rt.register_layout(layout);
    let obj = rt.new_object(id).context("allocate object")?;

    for set in &args.sets {
        let (name, raw) = set
            .split_once('=')
            .ok_or_else(|| anyhow!("--set {set:?} is not NAME=VALUE"))?;
        let value: Value = rt
            .decode(Format::Json, raw.as_bytes())
            .with_context(|| format!("--set {name}: value {raw:?}"))?
            .value;
        rt.set_attr(obj, name.as_bytes(), value)
            .with_context(|| format!("--set {name}"))?;
    }

    let looked_up = rt.get_attr(obj, args.get.as_bytes());
    rt.shutdown();
    let report = AttrReport {
        schema_version: EMBER_ATTR_REPORT_SCHEMA_VERSION,
        ok: looked_up.is_ok(),
        layout: args.layout,
        fields,
        get: args.get,
        value: looked_up.as_ref().ok().map(|v| (*v).into()),
        error: looked_up.as_ref().err().map(error_code),
        detail: looked_up.as_ref().err().map(|e| e.to_string()),
    };
    write_json(&report)?;
    Ok(exit_code(report.ok))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_specs() {
        assert_eq!(parse_field("x:int").unwrap(), ("x", ValueKind::Int));
        assert_eq!(parse_field("next:ref").unwrap(), ("next", ValueKind::Ref));
        assert!(parse_field("x").is_err());
        assert!(parse_field("x:string").is_err());
        assert!(parse_field(":int").is_err());
    }
}
