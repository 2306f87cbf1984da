//! Split long replies into channel-sized segments.
//!
//! Lengths are counted in UTF-16 code units, the unit Telegram measures messages in. Cuts
//! always land on a char boundary, so an astral character is never split in half.

/// One piece of a longer reply. `index` is 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub text: String,
    pub index: usize,
    pub total: usize,
}

impl Segment {
    /// Text as sent to the channel: prefixed with a part header when the reply has more than one segment.
    pub fn render(&self) -> String {
        if self.total > 1 {
            format!("{}{}", part_header(self.index, self.total), self.text)
        } else {
            self.text.clone()
        }
    }
}

/// Header put in front of each segment of a multi-part reply.
pub fn part_header(index: usize, total: usize) -> String {
    format!("📄 Part {}/{}\n\n", index, total)
}

/// Length of `text` in UTF-16 code units.
pub fn text_len(text: &str) -> usize {
    text.encode_utf16().count()
}

/// Split `text` into pieces of at most `limit` UTF-16 units.
///
/// Prefers the last newline within the limit, unless it falls in the first half; then the last
/// space; otherwise cuts hard at the limit. Whitespace at each cut is dropped. Empty input
/// yields no pieces and no piece is ever empty.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    if limit == 0 {
        return pieces;
    }
    let mut remaining = text;
    while !remaining.is_empty() {
        if text_len(remaining) <= limit {
            pieces.push(remaining.to_string());
            break;
        }
        let cut = break_point(remaining, limit);
        pieces.push(remaining[..cut].to_string());
        remaining = remaining[cut..].trim();
    }
    pieces
}

/// Split `text` into numbered segments whose rendered form (header included) fits in `limit`.
///
/// Text that already fits is returned as a single unlabelled segment.
pub fn segments(text: &str, limit: usize, header_reserve: usize) -> Vec<Segment> {
    let body_limit = if text_len(text) <= limit {
        limit
    } else {
        limit.saturating_sub(header_reserve).max(1)
    };
    let pieces = split_message(text, body_limit);
    let total = pieces.len();
    pieces
        .into_iter()
        .enumerate()
        .map(|(i, text)| Segment {
            text,
            index: i + 1,
            total,
        })
        .collect()
}

/// Byte offset to cut at. `text` is known to be longer than `limit` units.
fn break_point(text: &str, limit: usize) -> usize {
    let mut units = 0;
    let mut hard_cut = None;
    let mut newline = None;
    let mut space = None;
    // A separator starting exactly at the limit still counts.
    for (i, c) in text.char_indices() {
        if units > limit {
            break;
        }
        match c {
            '\n' => newline = Some((i, units)),
            ' ' => space = Some(i),
            _ => {}
        }
        units += c.len_utf16();
        if hard_cut.is_none() && units > limit {
            hard_cut = Some(i);
        }
    }
    let hard_cut = match hard_cut {
        // first char alone is wider than the limit: emit it whole
        Some(0) => text.chars().next().map_or(text.len(), char::len_utf8),
        Some(i) => i,
        None => text.len(),
    };

    newline
        .filter(|&(_, at)| at >= limit / 2)
        .map(|(i, _)| i)
        .or(space)
        .filter(|&i| i > 0)
        .unwrap_or(hard_cut)
}
