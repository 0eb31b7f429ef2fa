//! Template back end.
//!
//! Fills textual placeholders in a fixed runtime envelope with the packed
//! tables encoded as a literal constant. The result is a self-contained
//! program: given a model, an optional function library, and an optional
//! batching strategy it returns a ready instance backed by the resident
//! VM.

use serde_json::json;
use trellis_program::ProjectionData;

use crate::error::{Error, Result};
use crate::{CompilerOptions, OutputFormat};

/// The fixed runtime envelope. `@…@` markers are the placeholders of the
/// emitter contract: LIBRARY, SETTERS, ALL_EXPRESSIONS, DERIVED, RESET,
/// NAME, DEBUG_MODE, AST.
const ENVELOPE_TEMPLATE: &str = r#"(function () {
'use strict';
@LIBRARY@
@ALL_EXPRESSIONS@
function @NAME@(model, funcLib, batchingStrategy) {
  var $projectionData = @PROJECTION_DATA@;
  var $vmOptions = { debug: @DEBUG_MODE@, name: '@NAME@' };
  var $instance = $trellisVm($projectionData, model, funcLib || {}, $vmOptions, batchingStrategy);
@SETTERS@
@DERIVED@
@RESET@
@AST@
  return $instance;
}
@EXPORT@
})()
"#;

/// Model-mutation helpers shared by every envelope.
const LIBRARY: &str = r#"function ensurePath(obj, path) {
  if (path.length < 2) { return; }
  for (var i = 0; i < path.length - 1; i++) {
    var key = path[i];
    if (typeof obj[key] !== 'object' || obj[key] === null) {
      obj[key] = (typeof path[i + 1] === 'number' && path[i + 1] >= 0) ? [] : {};
    }
    obj = obj[key];
  }
}
function getAssignableObject(obj, path) {
  return path.reduce(function (acc, key) { return acc[key]; }, obj);
}
function applySetter(obj, key, value) {
  if (typeof value === 'undefined') { delete obj[key]; } else { obj[key] = value; }
}
function $set(obj, path, value) {
  ensurePath(obj, path);
  applySetter(getAssignableObject(obj, path.slice(0, -1)), path[path.length - 1], value);
}
function $push(obj, path, value) {
  ensurePath(obj, path.concat(0));
  getAssignableObject(obj, path).push(value);
}
function $splice(obj, path, args) {
  ensurePath(obj, path.concat(0));
  var target = getAssignableObject(obj, path);
  target.splice.apply(target, args);
}"#;

/// Interpreter binding: resolve the resident VM the envelope runs on.
const ALL_EXPRESSIONS: &str = r#"var $trellisVm = (typeof TrellisVm !== 'undefined')
  ? TrellisVm
  : require('trellis-vm');"#;

/// Emit the filled envelope.
pub fn emit(data: &ProjectionData, options: &CompilerOptions, ast: Option<&str>) -> Result<String> {
    let name = sanitize_name(&options.name)?;
    let tables = serde_json::to_string(data)
        .map_err(|e| Error::Internal(format!("table serialization failed: {e}")))?;

    let mut setters = String::new();
    for setter in &data.setters {
        let setter_name = data
            .setter_name(setter)
            .ok_or_else(|| Error::Internal("setter name is not an interned string".into()))?;
        let name_literal = json!(setter_name).to_string();
        setters.push_str(&format!(
            "  $instance[{name_literal}] = $instance.$invoke.bind($instance, {name_literal});\n"
        ));
    }

    let mut derived = String::from("  // derived hook\n");
    for (i, _) in data.top_level_projections.iter().enumerate() {
        if let Some(tl_name) = data.top_level_name(i) {
            let name_literal = json!(tl_name).to_string();
            derived.push_str(&format!(
                "  $instance.$declareTopLevel({i}, {name_literal});\n"
            ));
        }
    }
    let reset = "  // reset hook";

    let ast_block = match (options.debug, ast) {
        (true, Some(ast)) => {
            format!(
                "  $instance.$ast = function () {{ return {ast}; }};\n  \
                 $instance.$source = function () {{ return null; }};"
            )
        }
        _ => String::new(),
    };

    let export = match options.format {
        OutputFormat::Iife => format!("return {name};"),
        OutputFormat::ModuleExport => format!("module.exports = {name};"),
        OutputFormat::Bytecode => {
            return Err(Error::Internal(
                "bytecode format has no template envelope".into(),
            ))
        }
    };

    Ok(ENVELOPE_TEMPLATE
        .replace("@LIBRARY@", LIBRARY)
        .replace("@ALL_EXPRESSIONS@", ALL_EXPRESSIONS)
        .replace("@PROJECTION_DATA@", &tables)
        .replace("@DEBUG_MODE@", if options.debug { "true" } else { "false" })
        .replace("@SETTERS@", &setters)
        .replace("@DERIVED@", &derived)
        .replace("@RESET@", reset)
        .replace("@AST@", &ast_block)
        .replace("@EXPORT@", &export)
        .replace("@NAME@", &name))
}

/// Instance-factory names must be identifiers.
fn sanitize_name(name: &str) -> Result<String> {
    let valid = !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');
    if valid {
        Ok(name.to_string())
    } else {
        Err(Error::Internal(format!(
            "'{name}' is not a valid instance factory name"
        )))
    }
}
