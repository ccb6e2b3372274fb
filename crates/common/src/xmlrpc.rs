//! XML-RPC envelope codec
//!
//! Marshals commands and results to and from XML-RPC `methodCall` /
//! `methodResponse` documents. Calls carry a single `<struct>` parameter of
//! named values, which is the dispatcher's wire contract. Both the client
//! transport and the proxy-served endpoints use this module, so one
//! implementation covers both directions.

use crate::protocol::{Command, CommandResult};
use crate::{Error, Result};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use serde_json::{Map, Number, Value};

const PROTOCOL: &str = "xmlrpc";

/// Encode a command as an XML-RPC method call
pub fn encode_call(command: &Command) -> Result<String> {
    let mut writer = Writer::new(Vec::new());
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
        .map_err(|e| Error::Internal(e.to_string()))?;

    write_start(&mut writer, "methodCall")?;
    write_text_element(&mut writer, "methodName", &command.method)?;
    write_start(&mut writer, "params")?;
    write_start(&mut writer, "param")?;
    write_value(&mut writer, &Value::Object(command.params.clone()))?;
    write_end(&mut writer, "param")?;
    write_end(&mut writer, "params")?;
    write_end(&mut writer, "methodCall")?;

    finish(writer)
}

/// Decode an XML-RPC method call into a command
pub fn decode_call(body: &str) -> Result<Command> {
    let doc = parse_document(body)?;
    let (root_name, root) = doc;
    if root_name != "methodCall" {
        return Err(Error::malformed(PROTOCOL, "expected methodCall"));
    }

    let method = match root.get("methodName") {
        Some(XmlNode::Text(name)) => name.clone(),
        _ => return Err(Error::malformed(PROTOCOL, "missing methodName")),
    };

    let mut values = collect_param_values(&root)?;
    let params = match values.len() {
        0 => Map::new(),
        1 => match values.remove(0) {
            Value::Object(map) => map,
            _ => {
                return Err(Error::malformed(
                    PROTOCOL,
                    "expected a single struct of named parameters",
                ))
            }
        },
        _ => {
            return Err(Error::malformed(
                PROTOCOL,
                "expected a single struct of named parameters",
            ))
        }
    };

    Ok(Command { method, params })
}

/// Encode a successful result envelope as a method response
pub fn encode_response(result: &CommandResult) -> Result<String> {
    let mut writer = Writer::new(Vec::new());
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
        .map_err(|e| Error::Internal(e.to_string()))?;

    write_start(&mut writer, "methodResponse")?;
    write_start(&mut writer, "params")?;
    write_start(&mut writer, "param")?;
    write_value(&mut writer, &result.to_value())?;
    write_end(&mut writer, "param")?;
    write_end(&mut writer, "params")?;
    write_end(&mut writer, "methodResponse")?;

    finish(writer)
}

/// Encode a protocol-level fault as a method response
pub fn encode_fault(code: i64, message: &str) -> Result<String> {
    let mut fault = Map::new();
    fault.insert("faultCode".to_string(), Value::Number(code.into()));
    fault.insert("faultString".to_string(), Value::String(message.to_string()));

    let mut writer = Writer::new(Vec::new());
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
        .map_err(|e| Error::Internal(e.to_string()))?;

    write_start(&mut writer, "methodResponse")?;
    write_start(&mut writer, "fault")?;
    write_value(&mut writer, &Value::Object(fault))?;
    write_end(&mut writer, "fault")?;
    write_end(&mut writer, "methodResponse")?;

    finish(writer)
}

/// Decode a method response into a result envelope.
///
/// Faults surface as `Error::RpcFault`, never as a value.
pub fn decode_response(body: &str) -> Result<CommandResult> {
    let (root_name, root) = parse_document(body)?;
    if root_name != "methodResponse" {
        return Err(Error::malformed(PROTOCOL, "expected methodResponse"));
    }

    if let Some(fault_node) = root.get("fault") {
        let value = fault_node
            .first_value()
            .ok_or_else(|| Error::malformed(PROTOCOL, "fault without value"))?;
        let code = value
            .get("faultCode")
            .and_then(Value::as_i64)
            .unwrap_or(-1);
        let message = value
            .get("faultString")
            .and_then(Value::as_str)
            .unwrap_or("unknown fault")
            .to_string();
        return Err(Error::RpcFault { code, message });
    }

    let mut values = collect_param_values(&root)?;
    match values.len() {
        1 => Ok(CommandResult::from_value(values.remove(0))),
        _ => Err(Error::malformed(PROTOCOL, "expected exactly one return value")),
    }
}

// Writing helpers

fn write_start(writer: &mut Writer<Vec<u8>>, name: &str) -> Result<()> {
    writer
        .write_event(Event::Start(BytesStart::new(name)))
        .map_err(|e| Error::Internal(e.to_string()))
}

fn write_end(writer: &mut Writer<Vec<u8>>, name: &str) -> Result<()> {
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .map_err(|e| Error::Internal(e.to_string()))
}

fn write_text_element(writer: &mut Writer<Vec<u8>>, name: &str, text: &str) -> Result<()> {
    write_start(writer, name)?;
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .map_err(|e| Error::Internal(e.to_string()))?;
    write_end(writer, name)
}

fn write_value(writer: &mut Writer<Vec<u8>>, value: &Value) -> Result<()> {
    write_start(writer, "value")?;
    match value {
        Value::Null => {
            writer
                .write_event(Event::Empty(BytesStart::new("nil")))
                .map_err(|e| Error::Internal(e.to_string()))?;
        }
        Value::Bool(b) => {
            write_text_element(writer, "boolean", if *b { "1" } else { "0" })?;
        }
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                write_text_element(writer, "int", &i.to_string())?;
            } else {
                write_text_element(writer, "double", &n.to_string())?;
            }
        }
        Value::String(s) => {
            write_text_element(writer, "string", s)?;
        }
        Value::Array(items) => {
            write_start(writer, "array")?;
            write_start(writer, "data")?;
            for item in items {
                write_value(writer, item)?;
            }
            write_end(writer, "data")?;
            write_end(writer, "array")?;
        }
        Value::Object(map) => {
            write_start(writer, "struct")?;
            for (name, member) in map {
                write_start(writer, "member")?;
                write_text_element(writer, "name", name)?;
                write_value(writer, member)?;
                write_end(writer, "member")?;
            }
            write_end(writer, "struct")?;
        }
    }
    write_end(writer, "value")
}

fn finish(writer: Writer<Vec<u8>>) -> Result<String> {
    String::from_utf8(writer.into_inner())
        .map_err(|e| Error::Internal(format!("non-utf8 output: {}", e)))
}

// Parsing: the document is read into a small element tree first, then the
// XML-RPC structure is interpreted from it. Documents here are tiny (one
// envelope per HTTP request), so the intermediate tree is cheap.

#[derive(Debug)]
enum XmlNode {
    /// Element with child elements, in document order
    Element(Vec<(String, XmlNode)>),
    /// Element with only character data
    Text(String),
}

impl XmlNode {
    fn get(&self, name: &str) -> Option<&XmlNode> {
        match self {
            XmlNode::Element(children) => children
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, node)| node),
            XmlNode::Text(_) => None,
        }
    }

    fn get_all<'a>(&'a self, name: &str) -> Vec<&'a XmlNode> {
        match self {
            XmlNode::Element(children) => children
                .iter()
                .filter(|(n, _)| n == name)
                .map(|(_, node)| node)
                .collect(),
            XmlNode::Text(_) => Vec::new(),
        }
    }

    fn text(&self) -> &str {
        match self {
            XmlNode::Text(s) => s,
            XmlNode::Element(_) => "",
        }
    }

    /// JSON value of the first `<value>` child, if any
    fn first_value(&self) -> Option<Value> {
        self.get("value").and_then(|v| value_to_json(v).ok())
    }
}

fn parse_document(body: &str) -> Result<(String, XmlNode)> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    // Stack of (element name, children collected so far, text collected so far)
    let mut stack: Vec<(String, Vec<(String, XmlNode)>, String)> = Vec::new();
    let mut root: Option<(String, XmlNode)> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                stack.push((name, Vec::new(), String::new()));
            }
            Ok(Event::Empty(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                let node = XmlNode::Element(Vec::new());
                match stack.last_mut() {
                    Some((_, children, _)) => children.push((name, node)),
                    None => root = Some((name, node)),
                }
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| Error::malformed(PROTOCOL, e.to_string()))?;
                if let Some((_, _, buf)) = stack.last_mut() {
                    buf.push_str(&text);
                }
            }
            Ok(Event::End(_)) => {
                let (name, children, text) = stack
                    .pop()
                    .ok_or_else(|| Error::malformed(PROTOCOL, "unbalanced end tag"))?;
                let node = if children.is_empty() {
                    XmlNode::Text(text)
                } else {
                    XmlNode::Element(children)
                };
                match stack.last_mut() {
                    Some((_, parent_children, _)) => parent_children.push((name, node)),
                    None => root = Some((name, node)),
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(Error::malformed(PROTOCOL, e.to_string())),
        }
    }

    if !stack.is_empty() {
        return Err(Error::malformed(PROTOCOL, "truncated document"));
    }
    root.ok_or_else(|| Error::malformed(PROTOCOL, "empty document"))
}

fn collect_param_values(root: &XmlNode) -> Result<Vec<Value>> {
    let mut values = Vec::new();
    if let Some(params) = root.get("params") {
        for param in params.get_all("param") {
            let value = param
                .get("value")
                .ok_or_else(|| Error::malformed(PROTOCOL, "param without value"))?;
            values.push(value_to_json(value)?);
        }
    }
    Ok(values)
}

/// Interpret a `<value>` node as JSON
fn value_to_json(value: &XmlNode) -> Result<Value> {
    let children = match value {
        // Untyped value content is a string per the XML-RPC spec
        XmlNode::Text(s) => return Ok(Value::String(s.clone())),
        XmlNode::Element(children) => children,
    };

    let (type_name, node) = children
        .first()
        .ok_or_else(|| Error::malformed(PROTOCOL, "empty value element"))?;

    match type_name.as_str() {
        "nil" => Ok(Value::Null),
        "string" => Ok(Value::String(node.text().to_string())),
        "boolean" => match node.text() {
            "1" | "true" => Ok(Value::Bool(true)),
            "0" | "false" => Ok(Value::Bool(false)),
            other => Err(Error::malformed(PROTOCOL, format!("bad boolean: {}", other))),
        },
        "int" | "i4" | "i8" => node
            .text()
            .parse::<i64>()
            .map(|i| Value::Number(i.into()))
            .map_err(|e| Error::malformed(PROTOCOL, format!("bad int: {}", e))),
        "double" => node
            .text()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| Error::malformed(PROTOCOL, "bad double")),
        "array" => {
            let data = node
                .get("data")
                .ok_or_else(|| Error::malformed(PROTOCOL, "array without data"))?;
            let mut items = Vec::new();
            for item in data.get_all("value") {
                items.push(value_to_json(item)?);
            }
            Ok(Value::Array(items))
        }
        "struct" => {
            let mut map = Map::new();
            for member in node.get_all("member") {
                let name = member
                    .get("name")
                    .map(XmlNode::text)
                    .ok_or_else(|| Error::malformed(PROTOCOL, "member without name"))?;
                let member_value = member
                    .get("value")
                    .ok_or_else(|| Error::malformed(PROTOCOL, "member without value"))?;
                map.insert(name.to_string(), value_to_json(member_value)?);
            }
            Ok(Value::Object(map))
        }
        other => Err(Error::malformed(
            PROTOCOL,
            format!("unknown value type: {}", other),
        )),
    }
}
