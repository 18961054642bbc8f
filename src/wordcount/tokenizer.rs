use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

/// Word -> occurrences. Ordered so output is stable.
pub type Counts = BTreeMap<String, u64>;

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace pattern"));

// ASCII word characters only: letters, digits and underscore survive.
static NON_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^0-9A-Za-z_]+").expect("valid word pattern"));

/// Split `text` on whitespace runs and strip non-word characters from each
/// piece. Pieces left empty are dropped; case is kept as written.
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    WHITESPACE
        .split(text)
        .map(|piece| NON_WORD.replace_all(piece, "").into_owned())
        .filter(|word| !word.is_empty())
}

/// Fold `(word, n)` pairs into counts.
pub fn reduce_pairs<I>(pairs: I) -> Counts
where
    I: IntoIterator<Item = (String, u64)>,
{
    let mut counts = Counts::new();
    for (word, n) in pairs {
        *counts.entry(word).or_insert(0) += n;
    }
    counts
}

pub fn merge_counts(into: &mut Counts, from: &Counts) {
    for (word, n) in from {
        *into.entry(word.clone()).or_insert(0) += n;
    }
}
