//! Import of externally supplied server configs.
//!
//! Parsing accepts four document shapes, tried in a fixed order; analysis
//! classifies each extracted entry against the names already stored and
//! rebuilds a canonical [`ServerDefinition`] for the new ones.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde_json::{Map, Value};

use crate::definition::{ServerDefinition, TransportKind};
use crate::synth::adapt;

/// Key wrapping the name→entry map in gateway-style documents.
const WRAPPER_KEY: &str = "mcpServers";

/// Recognized top-level shapes, in priority order.
#[derive(Debug, Clone, PartialEq)]
pub enum ImportShape {
    /// A single object carrying its own `name`.
    SingleNamed(Map<String, Value>),
    /// A list of objects, each carrying `name`.
    NamedList(Vec<Value>),
    /// `{"mcpServers": {name: entry, ...}}`.
    Wrapped(Map<String, Value>),
    /// `{name: entry, ...}`.
    BareMap(Map<String, Value>),
}

impl ImportShape {
    /// Discriminate a parsed JSON value. `None` for scalars.
    pub fn classify(value: Value) -> Option<Self> {
        match value {
            Value::Array(items) => Some(ImportShape::NamedList(items)),
            Value::Object(mut obj) => {
                if obj.contains_key("name") {
                    return Some(ImportShape::SingleNamed(obj));
                }
                if matches!(obj.get(WRAPPER_KEY), Some(Value::Object(_))) {
                    if let Some(Value::Object(inner)) = obj.remove(WRAPPER_KEY) {
                        return Some(ImportShape::Wrapped(inner));
                    }
                }
                Some(ImportShape::BareMap(obj))
            }
            _ => None,
        }
    }
}

/// One named entry extracted from an import document.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedEntry {
    pub name: String,
    pub data: Map<String, Value>,
}

/// Extract `(name, entry)` pairs and document-level warnings from `text`.
///
/// Duplicate names keep the first occurrence. Entries that are not objects,
/// or list items without a usable name, are reported and skipped.
pub fn parse_imported_document(text: &str) -> (Vec<ImportedEntry>, Vec<String>) {
    let mut warnings = Vec::new();

    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            warnings.push(format!("invalid JSON: {}", e));
            return (Vec::new(), warnings);
        }
    };

    let Some(shape) = ImportShape::classify(value) else {
        warnings.push("unsupported JSON format: expected an object or a list of objects".to_string());
        return (Vec::new(), warnings);
    };

    let mut collector = Collector::default();
    match shape {
        ImportShape::SingleNamed(obj) => match name_of(&obj) {
            Some(name) => collector.push(name, obj, &mut warnings),
            None => warnings.push("the object has a missing or empty 'name' field".to_string()),
        },
        ImportShape::NamedList(items) => {
            if items.is_empty() {
                warnings.push("the JSON list is empty".to_string());
            }
            for (index, item) in items.into_iter().enumerate() {
                match item {
                    Value::Object(obj) if obj.contains_key("name") => match name_of(&obj) {
                        Some(name) => collector.push(name, obj, &mut warnings),
                        None => warnings.push(format!(
                            "entry at list index {} has a missing or empty 'name' field",
                            index
                        )),
                    },
                    _ => warnings.push(format!(
                        "element at list index {} is not an object with a 'name' field",
                        index
                    )),
                }
            }
        }
        ImportShape::Wrapped(map) => {
            if map.is_empty() {
                warnings.push(format!("the '{}' object is empty", WRAPPER_KEY));
            }
            collector.push_map(map, &mut warnings);
        }
        ImportShape::BareMap(map) => {
            if map.is_empty() {
                warnings.push("the JSON object is empty".to_string());
            }
            collector.push_map(map, &mut warnings);
        }
    }

    if collector.entries.is_empty() && warnings.is_empty() {
        warnings.push("no server entries could be extracted".to_string());
    }

    tracing::debug!(
        entries = collector.entries.len(),
        warnings = warnings.len(),
        "import document parsed"
    );
    (collector.entries, warnings)
}

/// The entry's name. Numbers and booleans are taken as their JSON text.
fn name_of(obj: &Map<String, Value>) -> Option<String> {
    let name = match obj.get("name")? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!name.is_empty()).then_some(name)
}

#[derive(Default)]
struct Collector {
    seen: HashSet<String>,
    entries: Vec<ImportedEntry>,
}

impl Collector {
    fn push(&mut self, name: String, data: Map<String, Value>, warnings: &mut Vec<String>) {
        if !self.seen.insert(name.clone()) {
            warnings.push(format!(
                "duplicate name '{}' in input, only the first occurrence is kept",
                name
            ));
            return;
        }
        self.entries.push(ImportedEntry { name, data });
    }

    fn push_map(&mut self, map: Map<String, Value>, warnings: &mut Vec<String>) {
        for (key, value) in map {
            let name = key.trim().to_string();
            if name.is_empty() {
                warnings.push("found an entry with an empty server name, skipped".to_string());
                continue;
            }
            match value {
                Value::Object(obj) => self.push(name, obj, warnings),
                _ => warnings.push(format!(
                    "configuration for server '{}' is not an object, skipped",
                    name
                )),
            }
        }
    }
}

/// An entry that could not be turned into a definition.
#[derive(Debug, Clone, PartialEq)]
pub struct InvalidEntry {
    pub name: String,
    pub data: Map<String, Value>,
    pub reason: String,
}

/// Classification of imported entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportAnalysis {
    /// Names already present in the store.
    pub existing: Vec<String>,
    /// Canonical definitions ready to be stored.
    pub valid_new: Vec<ServerDefinition>,
    pub invalid: Vec<InvalidEntry>,
    /// Non-fatal corrections made while rebuilding entries.
    pub notes: Vec<String>,
}

/// Classify `pairs` against `existing_names`.
///
/// A stored name is always "existing", whatever its payload. New entries are
/// de-adapted, their transport inferred and validated; each failure is
/// recorded against its entry and never stops the batch.
pub fn analyze_import(
    existing_names: &BTreeSet<String>,
    pairs: Vec<ImportedEntry>,
    default_enabled: bool,
) -> ImportAnalysis {
    let mut analysis = ImportAnalysis::default();

    for ImportedEntry { name, data } in pairs {
        if existing_names.contains(&name) {
            tracing::debug!(server = %name, "import entry already exists in store");
            analysis.existing.push(name);
            continue;
        }
        match canonicalize(&name, &data, default_enabled, &mut analysis.notes) {
            Ok(def) => analysis.valid_new.push(def),
            Err(reason) => {
                tracing::warn!(server = %name, reason = %reason, "import entry is invalid");
                analysis.invalid.push(InvalidEntry { name, data, reason });
            }
        }
    }

    tracing::info!(
        valid_new = analysis.valid_new.len(),
        existing = analysis.existing.len(),
        invalid = analysis.invalid.len(),
        "import analysis complete"
    );
    analysis
}

/// Optional non-empty string field; a present non-string value is an error.
fn opt_string(data: &Map<String, Value>, key: &str) -> Result<Option<String>, String> {
    match data.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
        Some(_) => Err(format!("'{}' must be a string", key)),
    }
}

fn canonicalize(
    name: &str,
    data: &Map<String, Value>,
    enabled: bool,
    notes: &mut Vec<String>,
) -> Result<ServerDefinition, String> {
    let command = opt_string(data, "command")?;
    let url = opt_string(data, "url")?;
    let declared_type = opt_string(data, "type")?;

    let args: Vec<String> = match data.get("args") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| "'args' must contain only strings".to_string())
            })
            .collect::<Result<_, _>>()?,
        Some(_) => {
            notes.push(format!("'{}': 'args' was not a list, replaced with an empty list", name));
            Vec::new()
        }
    };

    let env: BTreeMap<String, String> = match data.get("env") {
        None | Some(Value::Null) => BTreeMap::new(),
        Some(Value::Object(map)) => map
            .iter()
            .map(|(k, v)| {
                v.as_str()
                    .map(|s| (k.clone(), s.to_string()))
                    .ok_or_else(|| format!("env value for '{}' must be a string", k))
            })
            .collect::<Result<_, _>>()?,
        Some(_) => {
            notes.push(format!("'{}': 'env' was not an object, replaced with an empty map", name));
            BTreeMap::new()
        }
    };

    if let Some(command) = command {
        let (command, args) = adapt::deadapt(&command, &args);
        return Ok(ServerDefinition {
            name: name.to_string(),
            enabled,
            transport: TransportKind::Stdio,
            command: Some(command),
            args,
            env,
            url: None,
        });
    }

    let Some(url) = url else {
        return Err("cannot determine type: 'command' or 'url' must be provided".to_string());
    };
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(format!("'url' must be an http(s) URL, got '{}'", url));
    }

    let transport = match declared_type.as_deref() {
        None => TransportKind::Sse,
        Some(t) => match TransportKind::remote_from_str(t) {
            Some(kind) => kind,
            None => {
                notes.push(format!("'{}': unknown type '{}' with url, defaulting to 'sse'", name, t));
                TransportKind::Sse
            }
        },
    };

    Ok(ServerDefinition {
        name: name.to_string(),
        enabled,
        transport,
        command: None,
        args: Vec::new(),
        env: BTreeMap::new(),
        url: Some(url),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(entries: &[ImportedEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.name.as_str()).collect()
    }

    fn analyze(text: &str, existing: &[&str]) -> (ImportAnalysis, Vec<String>) {
        let (pairs, warnings) = parse_imported_document(text);
        let existing: BTreeSet<String> = existing.iter().map(|s| s.to_string()).collect();
        (analyze_import(&existing, pairs, false), warnings)
    }

    #[test]
    fn test_single_named_object() {
        let (analysis, warnings) =
            analyze(r#"{"name":"demoCmd","command":"npx","args":["-y","pkg"]}"#, &[]);
        assert!(warnings.is_empty());
        assert_eq!(analysis.valid_new.len(), 1);
        let def = &analysis.valid_new[0];
        assert_eq!(def.name, "demoCmd");
        assert_eq!(def.transport, TransportKind::Stdio);
        assert_eq!(def.command.as_deref(), Some("npx"));
        assert_eq!(def.args, vec!["-y".to_string(), "pkg".to_string()]);
        assert!(!def.enabled);
    }

    #[test]
    fn test_list_with_duplicate_name() {
        let (analysis, warnings) =
            analyze(r#"[{"name":"a","url":"http://x"},{"name":"a","url":"http://y"}]"#, &[]);
        assert_eq!(analysis.valid_new.len(), 1);
        assert_eq!(analysis.valid_new[0].url.as_deref(), Some("http://x"));
        assert_eq!(analysis.valid_new[0].transport, TransportKind::Sse);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("duplicate name 'a'"));
    }

    #[test]
    fn test_list_skips_non_objects_and_nameless() {
        let (pairs, warnings) =
            parse_imported_document(r#"[1, {"command":"x"}, {"name":"  "}, {"name":"ok","command":"x"}]"#);
        assert_eq!(names(&pairs), vec!["ok"]);
        assert_eq!(warnings.len(), 3);
    }

    #[test]
    fn test_scalar_names_are_stringified() {
        let (analysis, warnings) = analyze(r#"{"name":42,"command":"uvx"}"#, &[]);
        assert!(warnings.is_empty(), "{warnings:?}");
        assert_eq!(analysis.valid_new.len(), 1);
        assert_eq!(analysis.valid_new[0].name, "42");

        let (pairs, warnings) = parse_imported_document(
            r#"[{"name":7,"command":"x"},{"name":true,"url":"http://y"},{"name":null,"command":"x"},{"name":["a"],"command":"x"}]"#,
        );
        assert_eq!(names(&pairs), vec!["7", "true"]);
        assert_eq!(warnings.len(), 2);
    }

    #[test]
    fn test_wrapped_and_bare_maps() {
        let (pairs, warnings) = parse_imported_document(
            r#"{"mcpServers":{"t":{"command":"uvx"},"bad":"nope"}}"#,
        );
        assert_eq!(names(&pairs), vec!["t"]);
        assert_eq!(warnings.len(), 1);

        let (pairs, warnings) =
            parse_imported_document(r#"{"t":{"command":"uvx"},"r":{"url":"http://h"}}"#);
        let mut got = names(&pairs);
        got.sort();
        assert_eq!(got, vec!["r", "t"]);
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_name_takes_priority_over_wrapper() {
        let (pairs, _) = parse_imported_document(
            r#"{"name":"solo","command":"uvx","mcpServers":{"other":{"command":"x"}}}"#,
        );
        assert_eq!(names(&pairs), vec!["solo"]);
    }

    #[test]
    fn test_invalid_json_and_scalars() {
        let (pairs, warnings) = parse_imported_document("{not json");
        assert!(pairs.is_empty());
        assert!(warnings[0].starts_with("invalid JSON"));

        let (pairs, warnings) = parse_imported_document("42");
        assert!(pairs.is_empty());
        assert!(warnings[0].contains("unsupported"));

        let (_, warnings) = parse_imported_document("{}");
        assert_eq!(warnings, vec!["the JSON object is empty".to_string()]);
    }

    #[test]
    fn test_existing_wins_regardless_of_payload() {
        let (analysis, _) = analyze(r#"{"mcpServers":{"time":{"garbage":true}}}"#, &["time"]);
        assert_eq!(analysis.existing, vec!["time".to_string()]);
        assert!(analysis.invalid.is_empty());
        assert!(analysis.valid_new.is_empty());
    }

    #[test]
    fn test_cannot_determine_type() {
        let (analysis, _) = analyze(r#"{"mcpServers":{"x":{"args":["a"]}}}"#, &[]);
        assert_eq!(analysis.invalid.len(), 1);
        assert!(analysis.invalid[0].reason.contains("cannot determine type"));
    }

    #[test]
    fn test_adapted_entry_is_deadapted() {
        let (analysis, _) = analyze(
            r#"{"mcpServers":{"mem":{"command":"cmd","args":["/c","npx","-y","@mcp/memory"],"env":{"K":"V"}}}}"#,
            &[],
        );
        let def = &analysis.valid_new[0];
        assert_eq!(def.command.as_deref(), Some("npx"));
        assert_eq!(def.args, vec!["@mcp/memory".to_string()]);
        assert_eq!(def.env.get("K").map(String::as_str), Some("V"));
    }

    #[test]
    fn test_explicit_streamable_subtype_and_unknown_type() {
        let (analysis, _) = analyze(
            r#"{"a":{"type":"streamable_http","url":"https://h/mcp"},"b":{"type":"ws","url":"https://h/b"}}"#,
            &[],
        );
        assert_eq!(analysis.valid_new.len(), 2);
        assert_eq!(analysis.valid_new[0].transport, TransportKind::StreamableHttp);
        assert_eq!(analysis.valid_new[1].transport, TransportKind::Sse);
        assert_eq!(analysis.notes.len(), 1);
    }

    #[test]
    fn test_bad_entries_do_not_abort_batch() {
        let (analysis, _) = analyze(
            r#"{"a":{"command":42},"b":{"url":"ftp://x"},"c":{"command":"uvx","args":[1]},"d":{"command":"uvx","args":"str"}}"#,
            &[],
        );
        let invalid: Vec<&str> = analysis.invalid.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(invalid, vec!["a", "b", "c"]);
        assert_eq!(analysis.valid_new.len(), 1);
        assert!(analysis.valid_new[0].args.is_empty());
        assert_eq!(analysis.notes.len(), 1);
    }

    #[test]
    fn test_command_wins_over_url() {
        let (analysis, _) = analyze(r#"{"a":{"command":"uvx","url":"http://h","type":"sse"}}"#, &[]);
        let def = &analysis.valid_new[0];
        assert_eq!(def.transport, TransportKind::Stdio);
        assert!(def.url.is_none());
    }
}
