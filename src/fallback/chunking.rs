//! Text chunking policies for fallback backends with request-size limits.
//!
//! Budgets are counted in characters, not bytes.

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Split text into sentences. A sentence ends at `.`, `!`, `?` or `;`
/// followed by whitespace; the whitespace is dropped.
pub fn split_sentences(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut i = 0;

    while i < len {
        current.push(chars[i]);

        let is_boundary = matches!(chars[i], '.' | '!' | '?' | ';')
            && i + 1 < len
            && chars[i + 1].is_whitespace();

        if is_boundary {
            let s = current.trim();
            if !s.is_empty() {
                sentences.push(s.to_string());
            }
            current.clear();
            while i + 1 < len && chars[i + 1].is_whitespace() {
                i += 1;
            }
        }
        i += 1;
    }

    let remainder = current.trim();
    if !remainder.is_empty() {
        sentences.push(remainder.to_string());
    }
    sentences
}

/// Greedily pack whole sentences into chunks of at most `max_len`
/// characters. A sentence longer than the budget on its own is cut at word
/// boundaries with [`split_at_spaces`].
pub fn pack_sentences(text: &str, max_len: usize) -> Vec<String> {
    let max_len = max_len.max(1);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return vec![];
    }
    if char_len(trimmed) <= max_len {
        return vec![trimmed.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();

    for sentence in split_sentences(trimmed) {
        let pieces = if char_len(&sentence) > max_len {
            split_at_spaces(&sentence, max_len)
        } else {
            vec![sentence]
        };

        for piece in pieces {
            let joined_len = if current.is_empty() {
                char_len(&piece)
            } else {
                char_len(&current) + 1 + char_len(&piece)
            };

            if joined_len > max_len {
                if !current.is_empty() {
                    chunks.push(std::mem::take(&mut current));
                }
                current = piece;
            } else {
                if !current.is_empty() {
                    current.push(' ');
                }
                current.push_str(&piece);
            }
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    if chunks.is_empty() {
        vec![trimmed.chars().take(max_len).collect()]
    } else {
        chunks
    }
}

/// Cut text into chunks of at most `max_len` characters at the last space
/// inside the budget, or exactly at the budget when there is none.
pub fn split_at_spaces(text: &str, max_len: usize) -> Vec<String> {
    let max_len = max_len.max(1);
    let mut chunks = Vec::new();
    let mut remaining: Vec<char> = text.trim().chars().collect();

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.iter().collect());
            break;
        }

        let split = remaining[..=max_len]
            .iter()
            .rposition(|c| *c == ' ')
            .filter(|&i| i > 0)
            .unwrap_or(max_len);

        let chunk: String = remaining[..split].iter().collect();
        let chunk = chunk.trim_end();
        if !chunk.is_empty() {
            chunks.push(chunk.to_string());
        }

        let rest: String = remaining[split..].iter().collect();
        remaining = rest.trim_start().chars().collect();
    }

    chunks
}
