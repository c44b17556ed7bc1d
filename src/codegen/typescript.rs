//! TypeScript bindings.
//!
//! Each provider becomes one module exporting an input interface and an async
//! wrapper per tool. The wrappers delegate to `callMCPTool` from the shared
//! `mcp-types` module, which forwards to the host-installed bridge.

use std::collections::HashSet;
use std::fmt::Write as _;

use serde_json::{Map, Value};

use super::BindingGenerator;
use crate::error::{GatewayError, Result};
use crate::provider::ToolSchema;

const MAX_SCHEMA_DEPTH: usize = 8;

const RESERVED_WORDS: &[&str] = &[
    "break", "case", "catch", "class", "const", "continue", "debugger", "default", "delete",
    "do", "else", "enum", "export", "extends", "false", "finally", "for", "function", "if",
    "import", "in", "instanceof", "new", "null", "return", "super", "switch", "this", "throw",
    "true", "try", "typeof", "var", "void", "while", "with", "yield", "let", "static",
    "implements", "interface", "package", "private", "protected", "public", "await", "async",
];

const SHARED_TYPES: &str = r#"// Generated by codebraid. Do not edit.

export interface MCPTextContent {
  type: "text";
  text: string;
}

export interface MCPImageContent {
  type: "image";
  data: string;
  mimeType: string;
}

export interface MCPResourceContent {
  type: "resource";
  resource: { uri: string; mimeType?: string; text?: string; blob?: string };
}

export type MCPContent = MCPTextContent | MCPImageContent | MCPResourceContent;

export interface MCPToolResult {
  content: MCPContent[];
  structuredContent?: unknown;
  isError?: boolean;
}

export class MCPToolError extends Error {
  constructor(
    public readonly server: string,
    public readonly tool: string,
    public readonly result: MCPToolResult,
  ) {
    super(`${server}.${tool} failed: ${textOf(result)}`);
    this.name = "MCPToolError";
  }
}

declare global {
  // Installed by the host runtime before any bundle runs.
  var __codebraidCallTool:
    | ((server: string, tool: string, args: unknown) => Promise<MCPToolResult>)
    | undefined;
}

function textOf(result: MCPToolResult): string {
  return result.content
    .filter((c): c is MCPTextContent => c.type === "text")
    .map((c) => c.text)
    .join("\n");
}

export async function callMCPTool<T = unknown>(
  server: string,
  tool: string,
  args: unknown,
): Promise<T> {
  const bridge = globalThis.__codebraidCallTool;
  if (!bridge) {
    throw new Error("codebraid tool bridge is not installed");
  }
  const result = await bridge(server, tool, args ?? {});
  if (result.isError) {
    throw new MCPToolError(server, tool, result);
  }
  if (result.structuredContent !== undefined) {
    return result.structuredContent as T;
  }
  const text = textOf(result);
  try {
    return JSON.parse(text) as T;
  } catch {
    return text as unknown as T;
  }
}
"#;

/// Renders provider catalogs as TypeScript modules.
#[derive(Debug, Clone, Default)]
pub struct TypeScriptGenerator;

impl TypeScriptGenerator {
    pub fn new() -> Self {
        Self
    }
}

impl BindingGenerator for TypeScriptGenerator {
    fn render_provider_artifact(&self, provider: &str, tools: &[ToolSchema]) -> Result<String> {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "// Generated by codebraid for MCP server {}. Do not edit.",
            js_string(provider)
        );
        out.push_str("import { callMCPTool } from \"./mcp-types\";\n\n");
        let _ = writeln!(out, "export const SERVER_NAME = {};", js_string(provider));

        let mut functions = NameAllocator::default();
        let mut interfaces = NameAllocator::default();
        interfaces.reserve("SERVER_NAME");
        functions.reserve("SERVER_NAME");
        functions.reserve("callMCPTool");

        for tool in tools {
            if tool.name.trim().is_empty() {
                return Err(GatewayError::render(provider, "tool with empty name"));
            }
            let input = InputObject::parse(&tool.input_schema).ok_or_else(|| {
                GatewayError::render(
                    provider,
                    format!("tool '{}' input schema is not an object schema", tool.name),
                )
            })?;

            let function_name = functions.allocate(&camel_case(&tool.name));
            let interface_name = interfaces.allocate(&format!("{}Input", pascal_case(&tool.name)));
            out.push('\n');
            render_interface(&mut out, &interface_name, &input);
            out.push('\n');
            render_function(&mut out, tool, &function_name, &interface_name, &input);
        }
        Ok(out)
    }

    fn render_shared_types_artifact(&self) -> String {
        SHARED_TYPES.to_string()
    }

    fn render_index_artifact(&self, providers: &[String]) -> String {
        let mut out = String::from("// Generated by codebraid. Do not edit.\n\n");
        out.push_str("export * from \"./mcp-types\";\n");
        let mut namespaces = NameAllocator::default();
        for provider in providers {
            let namespace = namespaces.allocate(&camel_case(provider));
            let _ = writeln!(
                out,
                "export * as {namespace} from {};",
                js_string(&format!("./{provider}"))
            );
        }
        out
    }
}

/// Top-level input schema of one tool.
struct InputObject<'a> {
    properties: Option<&'a Map<String, Value>>,
    required: HashSet<&'a str>,
}

impl<'a> InputObject<'a> {
    /// `None` when the schema is not an object schema.
    fn parse(schema: &'a Value) -> Option<Self> {
        let object = schema.as_object()?;
        match object.get("type") {
            None => {}
            Some(Value::String(kind)) if kind == "object" => {}
            Some(_) => return None,
        }
        Some(Self {
            properties: object.get("properties").and_then(Value::as_object),
            required: required_names(object),
        })
    }
}

fn render_interface(out: &mut String, name: &str, input: &InputObject<'_>) {
    let _ = writeln!(out, "export interface {name} {{");
    for (key, schema) in input.properties.into_iter().flatten() {
        if let Some(description) = schema.get("description").and_then(Value::as_str) {
            let _ = writeln!(out, "  /** {} */", doc_line(description));
        }
        let optional = if input.required.contains(key.as_str()) { "" } else { "?" };
        let _ = writeln!(
            out,
            "  {}{optional}: {};",
            property_key(key),
            ts_type(schema, 0)
        );
    }
    out.push_str("}\n");
}

fn render_function(
    out: &mut String,
    tool: &ToolSchema,
    function_name: &str,
    interface_name: &str,
    input: &InputObject<'_>,
) {
    if let Some(description) = tool.description.as_deref().filter(|d| !d.trim().is_empty()) {
        out.push_str("/**\n");
        for line in description.lines() {
            let line = doc_line(line);
            if line.is_empty() {
                out.push_str(" *\n");
            } else {
                let _ = writeln!(out, " * {line}");
            }
        }
        out.push_str(" */\n");
    }

    let default = if input.required.is_empty() { " = {}" } else { "" };
    let _ = writeln!(
        out,
        "export async function {function_name}(input: {interface_name}{default}): Promise<unknown> {{"
    );
    let _ = writeln!(
        out,
        "  return callMCPTool(SERVER_NAME, {}, input);",
        js_string(&tool.name)
    );
    out.push_str("}\n");
}

fn required_names(object: &Map<String, Value>) -> HashSet<&str> {
    object
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

/// Map a JSON schema fragment to a TypeScript type expression.
fn ts_type(schema: &Value, depth: usize) -> String {
    if depth > MAX_SCHEMA_DEPTH {
        return "unknown".into();
    }
    let Some(object) = schema.as_object() else {
        return "unknown".into();
    };

    if let Some(constant) = object.get("const") {
        return literal(constant);
    }
    if let Some(variants) = object.get("enum").and_then(Value::as_array) {
        if !variants.is_empty() {
            return union(variants.iter().map(literal));
        }
    }
    for key in ["anyOf", "oneOf"] {
        if let Some(members) = object.get(key).and_then(Value::as_array) {
            return union(members.iter().map(|m| ts_type(m, depth + 1)));
        }
    }
    if let Some(members) = object.get("allOf").and_then(Value::as_array) {
        let parts: Vec<String> = members.iter().map(|m| ts_type(m, depth + 1)).collect();
        return match parts.len() {
            0 => "unknown".into(),
            1 => parts.into_iter().next().unwrap_or_default(),
            _ => parts.join(" & "),
        };
    }

    match object.get("type") {
        Some(Value::String(kind)) => primitive(kind, object, depth),
        Some(Value::Array(kinds)) => union(
            kinds
                .iter()
                .filter_map(Value::as_str)
                .map(|kind| primitive(kind, object, depth)),
        ),
        _ if object.contains_key("properties") => primitive("object", object, depth),
        _ => "unknown".into(),
    }
}

fn primitive(kind: &str, object: &Map<String, Value>, depth: usize) -> String {
    match kind {
        "string" => "string".into(),
        "number" | "integer" => "number".into(),
        "boolean" => "boolean".into(),
        "null" => "null".into(),
        "array" => {
            let item = object
                .get("items")
                .map(|items| ts_type(items, depth + 1))
                .unwrap_or_else(|| "unknown".into());
            if item.contains(' ') {
                format!("({item})[]")
            } else {
                format!("{item}[]")
            }
        }
        "object" => inline_object(object, depth),
        _ => "unknown".into(),
    }
}

fn inline_object(object: &Map<String, Value>, depth: usize) -> String {
    let required = required_names(object);
    match object.get("properties").and_then(Value::as_object) {
        Some(properties) if !properties.is_empty() => {
            let fields: Vec<String> = properties
                .iter()
                .map(|(key, value)| {
                    format!(
                        "{}{}: {}",
                        property_key(key),
                        if required.contains(key.as_str()) { "" } else { "?" },
                        ts_type(value, depth + 1)
                    )
                })
                .collect();
            format!("{{ {} }}", fields.join("; "))
        }
        _ => match object.get("additionalProperties") {
            Some(extra @ Value::Object(_)) => {
                format!("Record<string, {}>", ts_type(extra, depth + 1))
            }
            _ => "Record<string, unknown>".into(),
        },
    }
}

fn union(parts: impl Iterator<Item = String>) -> String {
    let mut seen = Vec::new();
    for part in parts {
        if !seen.contains(&part) {
            seen.push(part);
        }
    }
    if seen.is_empty() {
        "unknown".into()
    } else {
        seen.join(" | ")
    }
}

fn literal(value: &Value) -> String {
    match value {
        Value::String(_) | Value::Number(_) | Value::Bool(_) | Value::Null => value.to_string(),
        _ => "unknown".into(),
    }
}

fn js_string(value: &str) -> String {
    Value::String(value.to_owned()).to_string()
}

fn property_key(key: &str) -> String {
    if is_identifier(key) {
        key.to_owned()
    } else {
        js_string(key)
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

fn doc_line(text: &str) -> String {
    text.trim().replace("*/", "*\\/")
}

fn words(raw: &str) -> Vec<&str> {
    raw.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect()
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

fn lower_first(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_ascii_lowercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

fn camel_case(raw: &str) -> String {
    let parts = words(raw);
    let mut name = String::new();
    for (i, word) in parts.iter().enumerate() {
        if i == 0 {
            name.push_str(&lower_first(word));
        } else {
            name.push_str(&capitalize(word));
        }
    }
    fix_identifier(name, "tool")
}

fn pascal_case(raw: &str) -> String {
    let name: String = words(raw).iter().map(|w| capitalize(w)).collect();
    fix_identifier(name, "Tool")
}

fn fix_identifier(mut name: String, fallback: &str) -> String {
    if name.is_empty() {
        return fallback.to_owned();
    }
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    if RESERVED_WORDS.contains(&name.as_str()) {
        name.push('_');
    }
    name
}

/// Hands out unique identifiers, suffixing repeats with a counter.
#[derive(Default)]
struct NameAllocator {
    taken: HashSet<String>,
}

impl NameAllocator {
    fn reserve(&mut self, name: &str) {
        self.taken.insert(name.to_owned());
    }

    fn allocate(&mut self, base: &str) -> String {
        if self.taken.insert(base.to_owned()) {
            return base.to_owned();
        }
        let mut n = 2;
        loop {
            let candidate = format!("{base}{n}");
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }
}
