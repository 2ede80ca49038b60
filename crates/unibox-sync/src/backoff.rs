// SPDX-FileCopyrightText: 2026 Unibox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Rate-limit backoff and cursor pagination over broker calls.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};
use unibox_config::model::SyncConfig;
use unibox_core::{Page, UniboxError};

/// Pacing applied around broker calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    /// Pause before each broker call.
    pub call_delay: Duration,
    /// Pause between consecutive connections.
    pub connection_delay: Duration,
    /// Minimum wait before the single retry of a rate-limited call.
    pub rate_limit_backoff: Duration,
    /// Upper bound on pages fetched per listing.
    pub max_pages: u32,
}

impl Pacing {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            call_delay: Duration::from_millis(config.call_delay_ms),
            connection_delay: Duration::from_millis(config.connection_delay_ms),
            rate_limit_backoff: Duration::from_millis(config.rate_limit_backoff_ms),
            max_pages: config.max_pages,
        }
    }

    /// No delays; used when pacing is handled elsewhere.
    pub fn immediate() -> Self {
        Self {
            call_delay: Duration::ZERO,
            connection_delay: Duration::ZERO,
            rate_limit_backoff: Duration::ZERO,
            max_pages: 50,
        }
    }
}

/// Sleeps for `duration`, skipping the timer entirely when it is zero.
pub async fn pause(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}

/// Runs `op`, retrying exactly once after a backoff if it is rate limited.
///
/// The wait is the larger of `backoff` and the broker's `Retry-After`. A
/// second failure of any kind is returned to the caller.
pub async fn with_rate_limit_retry<T, F, Fut>(
    label: &str,
    backoff: Duration,
    mut op: F,
) -> Result<T, UniboxError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, UniboxError>>,
{
    match op().await {
        Err(e) if e.is_rate_limited() => {
            let wait = e.retry_after().map_or(backoff, |hint| hint.max(backoff));
            warn!(call = label, wait_ms = wait.as_millis() as u64, "rate limited, retrying once");
            pause(wait).await;
            op().await
        }
        other => other,
    }
}

/// Follows a broker cursor until it is exhausted or `pacing.max_pages` is hit.
///
/// Each page is paced and is its own rate-limit retry unit. A failure on the
/// first page is returned; a failure on a later page ends pagination and
/// keeps what was already fetched.
pub async fn collect_pages<T, F, Fut>(
    label: &str,
    pacing: &Pacing,
    mut fetch: F,
) -> Result<Vec<T>, UniboxError>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page<T>, UniboxError>>,
{
    let mut items = Vec::new();
    let mut cursor: Option<String> = None;

    for page_no in 0..pacing.max_pages {
        pause(pacing.call_delay).await;
        let page = with_rate_limit_retry(label, pacing.rate_limit_backoff, || {
            fetch(cursor.clone())
        })
        .await;

        let page = match page {
            Ok(page) => page,
            Err(e) if page_no == 0 => return Err(e),
            Err(e) => {
                warn!(call = label, page = page_no, error = %e, "pagination stopped early");
                break;
            }
        };

        items.extend(page.items);
        match page.next_cursor {
            Some(next) if Some(&next) != cursor.as_ref() => cursor = Some(next),
            Some(_) => {
                warn!(call = label, "broker repeated a cursor, stopping pagination");
                break;
            }
            None => break,
        }
        if page_no + 1 == pacing.max_pages {
            debug!(call = label, max_pages = pacing.max_pages, "page limit reached");
        }
    }

    Ok(items)
}
