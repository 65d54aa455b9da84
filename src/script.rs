use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::Value;

use crate::comment::Rgba;

/// One comment of a replay script, due at `at_ms` on the preview clock.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptComment {
    pub at_ms: u64,
    pub text: String,
    pub color: Rgba,
    pub velocity: Option<f32>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PlainLine {
    at_ms: Option<u64>,
    text: Option<String>,
    color: Option<String>,
    velocity: Option<f32>,
}

/// Chat envelope as delivered by the nx-jikkyo comment socket. Only the
/// fields the overlay needs are read.
#[derive(Debug, Deserialize)]
struct ChatEnvelope {
    chat: ChatBody,
}

#[derive(Debug, Deserialize)]
struct ChatBody {
    content: Option<String>,
    mail: Option<String>,
    /// Position in hundredths of a second.
    vpos: Option<u64>,
}

/// Parses a JSON-lines replay script.
///
/// Lines are either `{"at_ms", "text", "color", "velocity"}` objects or chat
/// envelopes (`{"chat": {"content", "mail", "vpos"}}`). Other socket
/// messages such as `ping` or `thread` are skipped. A line without a time
/// inherits the previous line's time. The result is ordered by time, ties
/// keeping file order.
pub fn parse_script(raw: &str) -> Result<Vec<ScriptComment>> {
    let mut comments = Vec::new();
    let mut clock_ms = 0_u64;

    for (idx, line) in raw.lines().enumerate() {
        let line_number = idx + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let value: Value = serde_json::from_str(trimmed)
            .with_context(|| format!("line {line_number}: invalid JSON"))?;
        let Some(object) = value.as_object() else {
            bail!("line {line_number}: expected a JSON object");
        };

        let comment = if object.contains_key("chat") {
            let envelope: ChatEnvelope = serde_json::from_value(value)
                .with_context(|| format!("line {line_number}: invalid chat envelope"))?;
            let at_ms = envelope
                .chat
                .vpos
                .map(|vpos| vpos.saturating_mul(10))
                .unwrap_or(clock_ms);
            let color = envelope
                .chat
                .mail
                .as_deref()
                .and_then(Rgba::from_commands)
                .unwrap_or(Rgba::WHITE);
            build_comment(line_number, at_ms, envelope.chat.content, color, None)?
        } else if object.contains_key("text") {
            let plain: PlainLine = serde_json::from_value(value)
                .with_context(|| format!("line {line_number}: invalid comment"))?;
            let color = match plain.color.as_deref() {
                Some(raw) => Rgba::parse(raw).with_context(|| format!("line {line_number}"))?,
                None => Rgba::WHITE,
            };
            if let Some(velocity) = plain.velocity {
                if !velocity.is_finite() || velocity <= 0.0 {
                    bail!("line {line_number}: velocity must be > 0, got {velocity}");
                }
            }
            build_comment(
                line_number,
                plain.at_ms.unwrap_or(clock_ms),
                plain.text,
                color,
                plain.velocity,
            )?
        } else {
            continue;
        };

        clock_ms = comment.at_ms;
        comments.push(comment);
    }

    comments.sort_by_key(|comment| comment.at_ms);
    Ok(comments)
}

fn build_comment(
    line_number: usize,
    at_ms: u64,
    text: Option<String>,
    color: Rgba,
    velocity: Option<f32>,
) -> Result<ScriptComment> {
    let text = text.unwrap_or_default();
    if text.trim().is_empty() {
        bail!("line {line_number}: comment text is empty");
    }
    Ok(ScriptComment {
        at_ms,
        text,
        color,
        velocity,
    })
}

#[cfg(test)]
mod tests {
    use super::parse_script;
    use crate::comment::Rgba;

    #[test]
    fn parses_plain_and_chat_lines() {
        let script = r##"
{"at_ms": 500, "text": "hello", "color": "#FF0000", "velocity": 6.5}
{"ping": {"content": "rs:0"}}
{"chat": {"thread": "1", "no": 12, "vpos": 120, "mail": "184 cyan", "content": "wwww"}}
{"text": "inherits time"}
"##;
        let comments = parse_script(script).unwrap();
        assert_eq!(comments.len(), 3);

        assert_eq!(comments[0].at_ms, 500);
        assert_eq!(comments[0].color, Rgba::opaque(255, 0, 0));
        assert_eq!(comments[0].velocity, Some(6.5));

        assert_eq!(comments[1].at_ms, 1200);
        assert_eq!(comments[1].text, "wwww");
        assert_eq!(comments[1].color, Rgba::opaque(0, 255, 255));

        assert_eq!(comments[2].at_ms, 1200);
        assert_eq!(comments[2].color, Rgba::WHITE);
    }

    #[test]
    fn orders_by_time_keeping_ties_stable() {
        let script = r#"
{"at_ms": 300, "text": "late"}
{"at_ms": 100, "text": "early-1"}
{"at_ms": 100, "text": "early-2"}
"#;
        let texts = parse_script(script)
            .unwrap()
            .into_iter()
            .map(|comment| comment.text)
            .collect::<Vec<_>>();
        assert_eq!(texts, vec!["early-1", "early-2", "late"]);
    }

    #[test]
    fn rejects_empty_text_with_line_number() {
        let error = parse_script("{\"text\": \"ok\"}\n{\"chat\": {\"content\": \"  \"}}\n")
            .unwrap_err();
        assert!(error.to_string().contains("line 2"));
    }

    #[test]
    fn rejects_unknown_plain_fields_and_bad_colors() {
        assert!(parse_script(r#"{"text": "a", "colour": "red"}"#).is_err());
        assert!(parse_script(r#"{"text": "a", "color": "mauve"}"#).is_err());
        assert!(parse_script(r#"{"text": "a", "velocity": 0}"#).is_err());
    }
}
