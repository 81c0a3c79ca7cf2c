//! Block-sequence previews for leaves and paths.

use rd_domain::message::ContentBlock;

use crate::log::truncate_chars;

/// Per-text-block contribution cap.
const TEXT_CHARS: usize = 60;
/// Overall preview cap.
const PREVIEW_CHARS: usize = 100;

/// First 100 chars of a summary built from content blocks: text blocks
/// contribute up to 60 chars of their text, other blocks a bracketed tag.
pub fn preview_blocks(blocks: &[ContentBlock]) -> String {
    let mut parts = Vec::new();
    for block in blocks {
        match block {
            ContentBlock::Text { text } => {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    parts.push(truncate_chars(trimmed, TEXT_CHARS));
                }
            }
            ContentBlock::Thinking { .. } => parts.push("[think]".to_owned()),
            ContentBlock::ToolUse { name, .. } => parts.push(format!("[tool:{name}]")),
            ContentBlock::ToolResult { .. } => parts.push("[result]".to_owned()),
            ContentBlock::Image { .. } => parts.push("[image]".to_owned()),
        }
    }
    truncate_chars(&parts.join(" "), PREVIEW_CHARS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixes_text_and_tags() {
        let blocks = vec![
            ContentBlock::Thinking {
                thinking: "...".into(),
                signature: None,
            },
            ContentBlock::text("I will run the tests now."),
            ContentBlock::ToolUse {
                id: "t1".into(),
                name: "bash".into(),
                input: serde_json::json!({}),
            },
        ];
        assert_eq!(
            preview_blocks(&blocks),
            "[think] I will run the tests now. [tool:bash]"
        );
    }

    #[test]
    fn long_text_clipped_to_60() {
        let text = "a".repeat(80);
        let preview = preview_blocks(&[ContentBlock::text(text)]);
        assert_eq!(preview.len(), 60);
    }

    #[test]
    fn overall_cap_is_100() {
        let blocks: Vec<_> = (0..10)
            .map(|i| ContentBlock::ToolUse {
                id: format!("t{i}"),
                name: "a_rather_long_tool_name".into(),
                input: serde_json::json!({}),
            })
            .collect();
        assert_eq!(preview_blocks(&blocks).chars().count(), 100);
    }

    #[test]
    fn empty_blocks_empty_preview() {
        assert_eq!(preview_blocks(&[]), "");
    }
}
