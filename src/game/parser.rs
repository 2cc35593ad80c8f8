//! Chat component parsing.
//!
//! Turns the JSON chat components carried by chat packets into the plain
//! display text that gets relayed. Anything that does not yield text is
//! dropped by returning `None`.

use serde_json::Value;

use crate::game::connection::{ChatPacket, POSITION_GAME_INFO};

/// Translation templates with a known display shape. `{0}`, `{1}` are the
/// component's `with` arguments.
const TRANSLATIONS: &[(&str, &str)] = &[
    ("chat.type.text", "<{0}> {1}"),
    ("chat.type.announcement", "[{0}] {1}"),
    ("chat.type.emote", "* {0} {1}"),
    ("multiplayer.player.joined", "{0} joined the game"),
    ("multiplayer.player.left", "{0} left the game"),
    ("chat.type.advancement.task", "{0} has made the advancement {1}"),
    ("chat.type.advancement.goal", "{0} has reached the goal {1}"),
    ("chat.type.advancement.challenge", "{0} has completed the challenge {1}"),
];

/// Extract the display text of a chat packet.
pub fn parse_chat(packet: &ChatPacket) -> Option<String> {
    if packet.position == POSITION_GAME_INFO {
        return None;
    }
    parse_component_json(&packet.json_data)
}

/// Extract display text from a chat component JSON document.
pub fn parse_component_json(json: &str) -> Option<String> {
    let value: Value = serde_json::from_str(json).ok()?;
    let text = flatten(&value);
    let text = text.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

fn flatten(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts.iter().map(flatten).collect(),
        Value::Object(map) => {
            let mut out = match map.get("translate").and_then(Value::as_str) {
                Some(key) => translate(key, map.get("with")),
                None => map
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            };
            if let Some(Value::Array(extra)) = map.get("extra") {
                for part in extra {
                    out.push_str(&flatten(part));
                }
            }
            out
        }
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

fn translate(key: &str, with: Option<&Value>) -> String {
    let args: Vec<String> = match with {
        Some(Value::Array(args)) => args.iter().map(flatten).collect(),
        _ => Vec::new(),
    };

    match TRANSLATIONS.iter().find(|(k, _)| *k == key) {
        Some((_, template)) => args
            .iter()
            .enumerate()
            .fold(template.to_string(), |acc, (i, arg)| {
                acc.replace(&format!("{{{}}}", i), arg)
            }),
        None => args.join(" "),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(json: &str, position: u8) -> ChatPacket {
        ChatPacket {
            json_data: json.to_string(),
            position,
        }
    }

    #[test]
    fn test_player_chat() {
        let json = r#"{"translate":"chat.type.text","with":[{"text":"Steve","clickEvent":{}},"hello there"]}"#;
        assert_eq!(parse_chat(&packet(json, 0)).as_deref(), Some("<Steve> hello there"));
    }

    #[test]
    fn test_announcement_and_emote() {
        let say = r#"{"translate":"chat.type.announcement","with":["Server","restart soon"]}"#;
        assert_eq!(parse_component_json(say).as_deref(), Some("[Server] restart soon"));

        let emote = r#"{"translate":"chat.type.emote","with":["Alex","waves"]}"#;
        assert_eq!(parse_component_json(emote).as_deref(), Some("* Alex waves"));
    }

    #[test]
    fn test_join_message() {
        let json = r#"{"color":"yellow","translate":"multiplayer.player.joined","with":[{"text":"Alex"}]}"#;
        assert_eq!(parse_chat(&packet(json, 1)).as_deref(), Some("Alex joined the game"));
    }

    #[test]
    fn test_plain_text_with_extra() {
        let json = r#"{"text":"","extra":[{"text":"[Plugin] ","color":"gold"},{"text":"Welcome!"}]}"#;
        assert_eq!(parse_component_json(json).as_deref(), Some("[Plugin] Welcome!"));
    }

    #[test]
    fn test_bare_string_component() {
        assert_eq!(parse_component_json(r#""just text""#).as_deref(), Some("just text"));
    }

    #[test]
    fn test_unknown_translation_joins_arguments() {
        let json = r#"{"translate":"death.attack.drown","with":["Steve"]}"#;
        assert_eq!(parse_component_json(json).as_deref(), Some("Steve"));
    }

    #[test]
    fn test_nothing_extractable() {
        assert_eq!(parse_component_json(r#"{"text":""}"#), None);
        assert_eq!(parse_component_json("not json"), None);
        assert_eq!(parse_component_json(r#"{"translate":"unknown.key"}"#), None);
    }

    #[test]
    fn test_game_info_discarded() {
        assert_eq!(parse_chat(&packet(r#"{"text":"action bar"}"#, POSITION_GAME_INFO)), None);
    }
}
