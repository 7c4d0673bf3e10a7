//! Markdown structure scanning for finished responses
//!
//! Usage metrics need the number of fenced code blocks in a response. The
//! scanner here is deliberately conservative: it only counts blocks with a
//! recognizable opening fence line and a closing fence line at least as long,
//! so unterminated fences never count and odd constructions are skipped rather
//! than guessed at.

/// A fenced code block found in markdown text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    /// The first word of the fence's info string, if any (e.g. `ts`)
    pub language: Option<String>,
    pub code: String,
}

/// Scan markdown text for complete fenced code blocks.
///
/// A fence opens on a line whose content starts with three or more backticks
/// followed by an info string without backticks, and closes on a line made up
/// of at least as many backticks and nothing else. A shorter backtick run
/// inside an open block is body text, not a closer.
pub fn code_blocks(text: &str) -> Vec<CodeBlock> {
    let mut blocks = Vec::new();
    let mut open: Option<(usize, Option<String>, Vec<&str>)> = None;

    for line in text.lines() {
        match open.as_mut() {
            None => {
                if let Some((fence_len, language)) = opening_fence(line) {
                    open = Some((fence_len, language, Vec::new()));
                }
            }
            Some((fence_len, _, body)) => {
                if closing_fence(line, *fence_len) {
                    if let Some((_, language, body)) = open.take() {
                        blocks.push(CodeBlock {
                            language,
                            code: body.join("\n"),
                        });
                    }
                } else {
                    body.push(line);
                }
            }
        }
    }

    // A fence still open at the end of the text is not a block
    blocks
}

fn opening_fence(line: &str) -> Option<(usize, Option<String>)> {
    let content = line.trim_start();
    let fence_len = content.chars().take_while(|c| *c == '`').count();
    if fence_len < 3 {
        return None;
    }
    let info = content[fence_len..].trim();
    if info.contains('`') {
        return None;
    }
    let language = info.split_whitespace().next().map(str::to_string);
    Some((fence_len, language))
}

fn closing_fence(line: &str, open_len: usize) -> bool {
    let content = line.trim();
    content.len() >= open_len && content.chars().all(|c| c == '`')
}
