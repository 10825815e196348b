//! Decode a BER-TLV hex string into a tag tree

use emv_common::{tag_name, TlvNode};
use serde_json::{json, Value};

use crate::formatters::{self, FormatMode};

pub fn cmd_decode(input: &str, format_mode: FormatMode) -> Result<(), String> {
    let compact: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    let data = hex::decode(&compact).map_err(|err| format!("invalid hex input: {err}"))?;
    let nodes = emv_common::decode(&data).map_err(|err| format!("decode failed: {err}"))?;

    if format_mode == FormatMode::Json {
        let tree: Vec<Value> = nodes.iter().map(to_json).collect();
        let text = serde_json::to_string_pretty(&tree).map_err(|err| err.to_string())?;
        println!("{text}");
        return Ok(());
    }

    for node in &nodes {
        print_node(node, 0, format_mode);
    }
    Ok(())
}

fn print_node(node: &TlvNode, indent: usize, format_mode: FormatMode) {
    let indent_str = " ".repeat(indent * 2);
    let tag = node.tag();

    if node.is_constructed() {
        println!("{indent_str}[{tag}] {} ({} bytes)", tag_name(tag), node.length());
        for child in node.children() {
            print_node(child, indent + 1, format_mode);
        }
        return;
    }

    let value = node.value();
    let shown = if format_mode == FormatMode::Human && value.len() > 32 {
        format!("{}... ({} bytes)", hex::encode_upper(&value[..32]), value.len())
    } else {
        formatters::format_value(tag, value, format_mode)
    };
    println!("{indent_str}[{tag}] {}: {shown}", tag_name(tag));
}

fn to_json(node: &TlvNode) -> Value {
    let tag = node.tag();
    if node.is_constructed() {
        json!({
            "tag": tag.to_hex(),
            "name": tag_name(tag),
            "length": node.length(),
            "children": node.children().iter().map(to_json).collect::<Vec<_>>(),
        })
    } else {
        json!({
            "tag": tag.to_hex(),
            "name": tag_name(tag),
            "length": node.length(),
            "value": hex::encode_upper(node.value()),
        })
    }
}
