//! Code extraction from model responses
//!
//! Model output rarely arrives as bare code. Extraction tries three tiers,
//! strictest first, and always yields something runnable:
//!
//! 1. Fenced blocks: every ``` block, joined in order.
//! 2. Raw: no fences, but the text reads like code - taken verbatim.
//! 3. Commented: prose. Every line is commented out so the candidate
//!    evaluates as a no-op instead of crashing the world with prose.

/// Which tier produced the extracted code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionTier {
    Fenced,
    Raw,
    Commented,
}

/// Extracted code plus how it was obtained.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub code: String,
    pub tier: ExtractionTier,
}

/// Extract runnable code from a model response.
#[must_use]
pub fn extract_code(response: &str) -> Extraction {
    let fenced = fenced_blocks(response);
    if !fenced.is_empty() {
        return Extraction {
            code: fenced.join("\n"),
            tier: ExtractionTier::Fenced,
        };
    }
    if looks_like_code(response) {
        return Extraction {
            code: response.trim().to_string(),
            tier: ExtractionTier::Raw,
        };
    }
    let commented = response
        .lines()
        .map(|line| format!("-- {line}"))
        .collect::<Vec<_>>()
        .join("\n");
    Extraction {
        code: commented,
        tier: ExtractionTier::Commented,
    }
}

/// Contents of every triple-backtick block, in order. A language tag on
/// the opening fence is dropped.
fn fenced_blocks(response: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current: Option<Vec<&str>> = None;
    for line in response.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("```") {
            match current.take() {
                Some(lines) => {
                    let block = lines.join("\n");
                    if !block.trim().is_empty() {
                        blocks.push(block);
                    }
                }
                None => current = Some(Vec::new()),
            }
            continue;
        }
        if let Some(lines) = &mut current {
            lines.push(line);
        }
    }
    // An unterminated fence still counts; models truncate.
    if let Some(lines) = current {
        let block = lines.join("\n");
        if !block.trim().is_empty() {
            blocks.push(block);
        }
    }
    blocks
}

/// Heuristic for tier two: most non-empty lines start like a statement
/// and none of them ends like a sentence.
fn looks_like_code(response: &str) -> bool {
    let lines: Vec<&str> = response
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if lines.is_empty() {
        return false;
    }
    let code_like = lines
        .iter()
        .filter(|line| {
            let starts_like_code = line.starts_with("--")
                || line
                    .chars()
                    .next()
                    .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_');
            let ends_like_prose = line.ends_with('.') || line.ends_with('!') || line.ends_with('?')
                || line.ends_with(':');
            starts_like_code && !ends_like_prose
        })
        .count();
    code_like * 2 > lines.len()
}
