//! Client-side transcript search over recent recordings.

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::error::BridgeResult;
use crate::model::{transcript_text, FileMeta, SearchMatch, Segment, MILLIS_PER_DAY};

pub const EXCERPT_CONTEXT_CHARS: usize = 200;
const ELLIPSIS: &str = "...";

/// What the search needs from the service.
#[async_trait]
pub trait TranscriptSource: Send + Sync {
    /// Files recorded in the trailing window, in listing order.
    async fn candidates(&self, window_days: u32) -> BridgeResult<Vec<FileMeta>>;

    async fn transcript(&self, file_id: &str) -> BridgeResult<Vec<Segment>>;
}

/// Lower bound (inclusive) of a trailing window ending at `now_ms`.
pub fn window_start(now_ms: i64, window_days: u32) -> i64 {
    now_ms - i64::from(window_days) * MILLIS_PER_DAY
}

pub fn within_window(files: Vec<FileMeta>, now_ms: i64, window_days: u32) -> Vec<FileMeta> {
    let lower_bound = window_start(now_ms, window_days);
    files
        .into_iter()
        .filter(|file| file.started_at_or_after(lower_bound))
        .collect()
}

/// Checks every candidate with at most `concurrency` transcript fetches in flight.
///
/// A file whose transcript cannot be fetched is logged and left out; it never fails the
/// whole search. Missing or unreadable transcripts count as empty text, so the title can
/// still match. Matches keep candidate order.
pub async fn search<S>(
    source: &S,
    query: &str,
    window_days: u32,
    concurrency: usize,
) -> BridgeResult<Vec<SearchMatch>>
where
    S: TranscriptSource + ?Sized,
{
    let candidates = source.candidates(window_days).await?;
    debug!(
        candidates = candidates.len(),
        window_days, concurrency, "searching transcripts"
    );
    let permits = Semaphore::new(concurrency.max(1));

    let checks = candidates
        .iter()
        .map(|file| check_file(source, &permits, file, query));
    let matches: Vec<SearchMatch> = join_all(checks).await.into_iter().flatten().collect();

    debug!(matches = matches.len(), "transcript search finished");
    Ok(matches)
}

async fn check_file<S>(
    source: &S,
    permits: &Semaphore,
    file: &FileMeta,
    query: &str,
) -> Option<SearchMatch>
where
    S: TranscriptSource + ?Sized,
{
    let fetched = {
        let _permit = match permits.acquire().await {
            Ok(permit) => permit,
            Err(err) => {
                warn!(file_id = %file.id, error = %err, "search permit pool closed");
                return None;
            }
        };
        source.transcript(&file.id).await
    };

    let text = match fetched {
        Ok(segments) => transcript_text(&segments),
        Err(err) if err.is_not_found() => String::new(),
        Err(err) if err.is_malformed() => {
            debug!(file_id = %file.id, error = %err, "unreadable transcript; title only");
            String::new()
        }
        Err(err) => {
            warn!(file_id = %file.id, error = %err, "failed to fetch transcript; skipping file");
            return None;
        }
    };

    let title_match = contains_ignore_case(&file.filename, query);
    let text_match = contains_ignore_case(&text, query);
    if !(title_match || text_match) {
        return None;
    }

    Some(SearchMatch {
        file_id: file.id.clone(),
        title: file.filename.clone(),
        start_time: file.start_time,
        duration: file.duration,
        excerpt: extract_excerpt(&text, query, EXCERPT_CONTEXT_CHARS),
    })
}

pub fn contains_ignore_case(text: &str, query: &str) -> bool {
    find_ignore_case(text, query).is_some()
}

/// Character range `[start, end)` of the first case-insensitive occurrence of `query`.
pub fn find_ignore_case(text: &str, query: &str) -> Option<(usize, usize)> {
    let (haystack, origin) = fold_case(text);
    let (needle, _) = fold_case(query);
    if needle.is_empty() {
        return Some((0, 0));
    }
    if needle.len() > haystack.len() {
        return None;
    }
    let pos = haystack
        .windows(needle.len())
        .position(|window| window == needle.as_slice())?;
    Some((origin[pos], origin[pos + needle.len() - 1] + 1))
}

// lowercased chars, each mapped back to the index of the char it came from
fn fold_case(text: &str) -> (Vec<char>, Vec<usize>) {
    let mut folded = Vec::with_capacity(text.len());
    let mut origin = Vec::with_capacity(text.len());
    for (idx, ch) in text.chars().enumerate() {
        for lower in ch.to_lowercase() {
            folded.push(lower);
            origin.push(idx);
        }
    }
    (folded, origin)
}

/// Up to `context` characters either side of the first match, with `...` on each
/// truncated edge. Without a match, the leading `2 * context` characters.
pub fn extract_excerpt(text: &str, query: &str, context: usize) -> String {
    if text.is_empty() {
        return String::new();
    }
    let chars: Vec<char> = text.chars().collect();

    let Some((start, end)) = find_ignore_case(text, query) else {
        let limit = context * 2;
        if chars.len() > limit {
            let mut excerpt: String = chars[..limit].iter().collect();
            excerpt.push_str(ELLIPSIS);
            return excerpt;
        }
        return text.to_string();
    };

    let from = start.saturating_sub(context);
    let to = end.saturating_add(context).min(chars.len());
    let mut excerpt = String::new();
    if from > 0 {
        excerpt.push_str(ELLIPSIS);
    }
    excerpt.extend(&chars[from..to]);
    if to < chars.len() {
        excerpt.push_str(ELLIPSIS);
    }
    excerpt
}
