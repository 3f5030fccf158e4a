use crate::CaptionFragment;

const PUNCTUATION: &[char] = &['.', '!', '?', '…', ',', ':', ';'];

/// Join caption fragments into one transcript string, ordered by start time.
///
/// A space goes between two fragments unless the first already ends with
/// punctuation or the second begins with it.
pub fn assemble(fragments: &[CaptionFragment]) -> String {
    let mut sorted: Vec<&CaptionFragment> = fragments.iter().collect();
    // stable, so equal start times keep delivery order
    sorted.sort_by(|a, b| a.start.total_cmp(&b.start));

    let texts: Vec<&str> = sorted.iter().map(|f| f.text.trim()).filter(|t| !t.is_empty()).collect();

    let mut out = String::with_capacity(texts.iter().map(|t| t.len() + 1).sum());
    for (i, text) in texts.iter().enumerate() {
        out.push_str(text);
        let needs_space = texts
            .get(i + 1)
            .is_some_and(|next| !text.ends_with(PUNCTUATION) && !next.starts_with(PUNCTUATION));
        if needs_space {
            out.push(' ');
        }
    }
    out
}
