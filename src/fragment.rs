//! Position-derived fragment identifiers.
//!
//! Every fragment gets `"{source}:{page}:{ordinal}"`, where `ordinal`
//! counts fragments within a run of consecutive fragments sharing the same
//! `(source, page)`. The counter restarts whenever that pair differs from
//! the immediately preceding fragment, so re-splitting a document with the
//! same parameters always reproduces the same IDs.
//!
//! Input must be grouped by document. Two documents interleaved page by
//! page would share counters; that is the caller's responsibility.

use crate::models::{Fragment, RawFragment};

/// Assign IDs in a single left-to-right pass.
pub fn assign_ids(raw: Vec<RawFragment>) -> Vec<Fragment> {
    let mut last_page: Option<(String, i64)> = None;
    let mut counter: i64 = 0;
    let mut out = Vec::with_capacity(raw.len());

    for frag in raw {
        let same_page = matches!(
            &last_page,
            Some((source, page)) if *source == frag.source && *page == frag.page
        );
        if same_page {
            counter += 1;
        } else {
            counter = 0;
            last_page = Some((frag.source.clone(), frag.page));
        }

        out.push(Fragment {
            id: fragment_id(&frag.source, frag.page, counter),
            source: frag.source,
            page: frag.page,
            ordinal: counter,
            text: frag.text,
        });
    }

    out
}

pub fn fragment_id(source: &str, page: i64, ordinal: i64) -> String {
    format!("{}:{}:{}", source, page, ordinal)
}

/// Prefix shared by every fragment ID of a source document.
pub fn source_prefix(source: &str) -> String {
    format!("{}:", source)
}
