//! Static listings: the tag dictionary and the preset profiles

use emv_card::{CardKind, CardProfile, TerminalKind, TerminalProfile};
use emv_common::tags;
use serde_json::json;

use crate::formatters::FormatMode;

pub fn cmd_tags(format_mode: FormatMode) {
    if format_mode == FormatMode::Json {
        let entries: Vec<_> = tags::known()
            .map(|(tag, info)| {
                json!({ "tag": tag.to_hex(), "name": info.name, "constructed": info.constructed })
            })
            .collect();
        println!("{}", serde_json::Value::Array(entries));
        return;
    }

    for (tag, info) in tags::known() {
        let kind = if info.constructed { "constructed" } else { "primitive" };
        println!("{:<8} {:<11} {}", tag.to_hex(), kind, info.name);
    }
}

pub fn cmd_profiles(format_mode: FormatMode) {
    if format_mode == FormatMode::Json {
        let cards: Vec<_> = CardKind::ALL
            .iter()
            .map(|kind| {
                let profile = CardProfile::preset(*kind);
                json!({
                    "kind": kind.slug(),
                    "description": kind.description(),
                    "interface": profile.interface,
                    "aid": hex::encode_upper(&profile.aid),
                    "kernel": profile.kernel.map(|k| k.to_string()),
                })
            })
            .collect();
        let terminals: Vec<_> = TerminalKind::ALL
            .iter()
            .map(|kind| {
                let profile = TerminalProfile::preset(*kind);
                json!({
                    "kind": kind.slug(),
                    "description": kind.description(),
                    "interfaces": profile.interfaces,
                    "kernels": profile.kernels.iter().map(|k| k.to_string()).collect::<Vec<_>>(),
                })
            })
            .collect();
        println!("{}", json!({ "cards": cards, "terminals": terminals }));
        return;
    }

    println!("Cards:");
    for kind in CardKind::ALL {
        let profile = CardProfile::preset(*kind);
        println!("  {:<24} {:<12} {}", kind.slug(), profile.interface.to_string(), kind.description());
    }
    println!("\nTerminals:");
    for kind in TerminalKind::ALL {
        let profile = TerminalProfile::preset(*kind);
        let kernels: Vec<String> = profile.kernels.iter().map(|k| k.to_string()).collect();
        let kernels = if kernels.is_empty() {
            "-".to_string()
        } else {
            kernels.join(",")
        };
        println!("  {:<24} {:<20} {}", kind.slug(), kernels, kind.description());
    }
}
