//! Rendering of highlights into page blocks, and the add/delete plan that
//! brings a page's existing blocks in line with the rendered ones.
//!
//! Blocks are compared by a content signature (block type plus a SHA-256 of
//! the trimmed text), so re-running a sync over unchanged highlights issues
//! no block calls at all.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

use crate::model::Highlight;

/// Notion rejects rich text segments longer than this.
pub const MAX_TEXT_LEN: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BlockKind {
    Heading,
    Callout,
    Quote,
}

impl BlockKind {
    pub fn api_type(&self) -> &'static str {
        match self {
            BlockKind::Heading => "heading_2",
            BlockKind::Callout => "callout",
            BlockKind::Quote => "quote",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Block {
    pub kind: BlockKind,
    pub text: String,
    pub color: &'static str,
    pub emoji: Option<&'static str>,
}

impl Block {
    pub fn heading(text: &str) -> Self {
        Block {
            kind: BlockKind::Heading,
            text: text.to_string(),
            color: "default",
            emoji: None,
        }
    }

    pub fn quote(text: &str) -> Self {
        Block {
            kind: BlockKind::Quote,
            text: text.to_string(),
            color: "default",
            emoji: None,
        }
    }

    pub fn callout(text: &str, style: Option<i32>, color: Option<i32>, is_note: bool) -> Self {
        Block {
            kind: BlockKind::Callout,
            text: text.to_string(),
            color: color_name(color),
            emoji: Some(style_emoji(style, is_note)),
        }
    }

    pub fn signature(&self) -> String {
        signature(self.kind.api_type(), &self.text)
    }
}

/// A block already present on a page.
#[derive(Debug, Clone, PartialEq)]
pub struct ExistingBlock {
    pub id: String,
    pub signature: String,
}

pub fn signature(api_type: &str, text: &str) -> String {
    let digest = Sha256::digest(text.trim().as_bytes());
    format!("{}_{}", api_type, hex::encode(digest))
}

/// Block types this tool writes; anything else on the page belongs to the user.
pub fn is_managed_type(api_type: &str) -> bool {
    matches!(api_type, "heading_1" | "heading_2" | "heading_3" | "callout" | "quote")
}

fn color_name(color: Option<i32>) -> &'static str {
    match color {
        Some(1) => "red",
        Some(2) => "purple",
        Some(3) => "blue",
        Some(4) => "green",
        Some(5) => "yellow",
        _ => "default",
    }
}

fn style_emoji(style: Option<i32>, is_note: bool) -> &'static str {
    if is_note {
        return "✍️";
    }
    match style {
        Some(0) => "💡",
        _ => "〰️",
    }
}

/// Splits on char boundaries so each piece fits in one rich text segment.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(max_chars.max(1))
        .map(|c| c.iter().collect::<String>())
        .collect()
}

/// Renders highlights grouped by chapter, in first-seen chapter order.
pub fn render_highlights(highlights: &[Highlight]) -> Vec<Block> {
    let mut chapters: Vec<Option<&str>> = Vec::new();
    for h in highlights {
        let chapter = h.chapter.as_deref();
        if !chapters.contains(&chapter) {
            chapters.push(chapter);
        }
    }

    let mut blocks = Vec::new();
    for chapter in chapters {
        if let Some(title) = chapter.filter(|t| !t.trim().is_empty()) {
            blocks.push(Block::heading(title));
        }
        for h in highlights.iter().filter(|h| h.chapter.as_deref() == chapter) {
            let note = h.note.as_deref().filter(|n| !n.trim().is_empty());
            if h.text.trim().is_empty() {
                // standalone note with no highlighted passage
                if let Some(note) = note {
                    for piece in chunk_text(note, MAX_TEXT_LEN) {
                        blocks.push(Block::callout(&piece, None, None, true));
                    }
                }
                continue;
            }
            for piece in chunk_text(&h.text, MAX_TEXT_LEN) {
                blocks.push(Block::callout(&piece, h.style, h.color, false));
            }
            if let Some(note) = note {
                for piece in chunk_text(note, MAX_TEXT_LEN) {
                    blocks.push(Block::quote(&piece));
                }
            }
        }
    }
    blocks
}

#[derive(Debug, Default, PartialEq)]
pub struct BlockPlan {
    pub to_add: Vec<Block>,
    pub to_delete: Vec<String>,
    pub kept: usize,
}

impl BlockPlan {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_delete.is_empty()
    }
}

pub fn plan_block_sync(desired: &[Block], existing: &[ExistingBlock]) -> BlockPlan {
    let mut wanted = HashSet::new();
    let mut unique_desired = Vec::new();
    for block in desired {
        if wanted.insert(block.signature()) {
            unique_desired.push(block);
        }
    }

    let mut plan = BlockPlan::default();
    let mut present = HashSet::new();
    for block in existing {
        if wanted.contains(&block.signature) && present.insert(block.signature.clone()) {
            plan.kept += 1;
        } else {
            plan.to_delete.push(block.id.clone());
        }
    }

    plan.to_add = unique_desired
        .into_iter()
        .filter(|b| !present.contains(&b.signature()))
        .cloned()
        .collect();
    plan
}
