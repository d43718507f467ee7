//! Page interaction routines: waits, popup dismissal, scroll/click loops.
//!
//! Every in-page script is a fixed constant; selectors reach the page as
//! JSON string literals, never as code. All routines are stateless over a
//! borrowed [`Page`].

use std::time::Duration;

use chromiumoxide::Page;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::error::Result;
use crate::models::{InteractionOptions, InteractionStrategy, PageLoadWaitOptions, WaitStrategy};

/// Pause after any popup was clicked or removed.
const POPUP_SETTLE: Duration = Duration::from_millis(500);

/// Poll cadence while waiting for a selector to become visible.
const SELECTOR_POLL: Duration = Duration::from_millis(250);

const PAGE_HEIGHT_JS: &str = "Math.max(document.body ? document.body.scrollHeight : 0, document.documentElement.scrollHeight)";

const SCROLL_BOTTOM_JS: &str = "window.scrollTo(0, Math.max(document.body ? document.body.scrollHeight : 0, document.documentElement.scrollHeight))";

/// Encode a selector as a JS string literal (data, not code).
fn js_string(selector: &str) -> String {
    serde_json::Value::String(selector.to_string()).to_string()
}

fn count_items_js(selector: &str) -> String {
    format!("document.querySelectorAll({}).length", js_string(selector))
}

fn any_visible_js(selector: &str) -> String {
    format!(
        "(() => {{ \
           for (const el of document.querySelectorAll({})) {{ \
             const r = el.getBoundingClientRect(); \
             if (el.offsetParent !== null && r.width > 0 && r.height > 0) return true; \
           }} \
           return false; \
         }})()",
        js_string(selector)
    )
}

fn click_first_visible_js(selector: &str) -> String {
    format!(
        "(() => {{ \
           for (const el of document.querySelectorAll({})) {{ \
             const r = el.getBoundingClientRect(); \
             if (el.offsetParent !== null && r.width > 0 && r.height > 0) {{ el.click(); return true; }} \
           }} \
           return false; \
         }})()",
        js_string(selector)
    )
}

/// Click clickable matches, remove the rest; returns elements acted on.
fn dismiss_popups_js(selector: &str) -> String {
    format!(
        "(() => {{ \
           const matches = Array.from(document.querySelectorAll({})); \
           let acted = 0; \
           for (const el of matches) {{ \
             if (typeof el.click === 'function' && el.offsetParent !== null) {{ el.click(); }} else {{ el.remove(); }} \
             acted += 1; \
           }} \
           return acted; \
         }})()",
        js_string(selector)
    )
}

fn remove_nodes_js(selector: &str) -> String {
    format!(
        "(() => {{ \
           const matches = Array.from(document.querySelectorAll({})); \
           for (const el of matches) el.remove(); \
           return matches.length; \
         }})()",
        js_string(selector)
    )
}

async fn eval_u64(page: &Page, script: String) -> Result<u64> {
    Ok(page.evaluate(script).await?.into_value()?)
}

async fn eval_bool(page: &Page, script: String) -> Result<bool> {
    Ok(page.evaluate(script).await?.into_value()?)
}

/// Number of visible-or-not list items currently in the DOM.
pub async fn count_items(page: &Page, selector: &str) -> Result<u64> {
    eval_u64(page, count_items_js(selector)).await
}

/// Apply the configured pre-extraction wait. Never fatal: a selector that
/// never shows up is logged and crawling continues.
pub async fn apply_page_wait(page: &Page, wait: &PageLoadWaitOptions) {
    match wait.strategy {
        WaitStrategy::None => {}
        WaitStrategy::Timeout => sleep(Duration::from_millis(wait.timeout_ms)).await,
        WaitStrategy::Selector => {
            let Some(selector) = wait.selector.as_deref() else {
                warn!("selector wait configured without a selector, skipping");
                return;
            };
            wait_for_visible(page, selector, Duration::from_millis(wait.timeout_ms)).await;
        }
    }
}

async fn wait_for_visible(page: &Page, selector: &str, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    loop {
        match eval_bool(page, any_visible_js(selector)).await {
            Ok(true) => return,
            Ok(false) => {}
            Err(e) => debug!("visibility probe failed for '{selector}': {e}"),
        }
        if Instant::now() >= deadline {
            warn!("timed out waiting for selector '{selector}', continuing");
            return;
        }
        sleep(SELECTOR_POLL).await;
    }
}

/// Dismiss overlays: click clickable matches, remove the rest from the
/// DOM. A selector matching nothing is not an error.
pub async fn close_popups(page: &Page, selectors: &[String]) {
    for selector in selectors {
        match eval_u64(page, dismiss_popups_js(selector)).await {
            Ok(0) => {}
            Ok(acted) => {
                debug!("dismissed {acted} popup elements for '{selector}'");
                sleep(POPUP_SETTLE).await;
            }
            Err(e) => debug!("popup dismissal failed for '{selector}': {e}"),
        }
    }
}

/// Delete excluded subtrees so they never reach extraction.
pub async fn remove_excluded(page: &Page, selectors: &[String]) {
    for selector in selectors {
        match eval_u64(page, remove_nodes_js(selector)).await {
            Ok(0) => {}
            Ok(removed) => debug!("removed {removed} excluded elements for '{selector}'"),
            Err(e) => debug!("exclusion removal failed for '{selector}': {e}"),
        }
    }
}

/// Consecutive non-growing height checks that end a scroll loop.
pub fn stagnation_limit(stagnation_timeout: Duration, scroll_delay: Duration) -> u32 {
    let delay_ms = scroll_delay.as_millis().max(1);
    stagnation_timeout.as_millis().div_ceil(delay_ms).max(1) as u32
}

/// Scroll to the bottom until the page height stops growing.
///
/// A run of `ceil(stagnation_timeout / delay)` non-growing comparisons
/// ends the loop early; `max_scrolls` is the safety cap. Returns scrolls
/// performed.
pub async fn scroll_to_bottom_until_stable(
    page: &Page,
    max_scrolls: u32,
    scroll_delay: Duration,
    stagnation_timeout: Duration,
) -> Result<u32> {
    let limit = stagnation_limit(stagnation_timeout, scroll_delay);
    let mut stagnant = 0u32;
    let mut performed = 0u32;
    let mut last_height = eval_u64(page, PAGE_HEIGHT_JS.to_string()).await?;

    while performed < max_scrolls {
        page.evaluate(SCROLL_BOTTOM_JS.to_string()).await?;
        performed += 1;
        sleep(scroll_delay).await;

        let height = eval_u64(page, PAGE_HEIGHT_JS.to_string()).await?;
        if height > last_height {
            stagnant = 0;
        } else {
            stagnant += 1;
            if stagnant >= limit {
                debug!("page height stable after {performed} scrolls");
                break;
            }
        }
        last_height = height;
    }
    Ok(performed)
}

/// Exactly `max_scrolls` scroll+wait cycles; only an evaluation error
/// stops the loop early.
pub async fn run_fixed_scrolls(page: &Page, max_scrolls: u32, scroll_delay: Duration) -> Result<u32> {
    let mut performed = 0u32;
    for _ in 0..max_scrolls {
        page.evaluate(SCROLL_BOTTOM_JS.to_string()).await?;
        performed += 1;
        sleep(scroll_delay).await;
    }
    Ok(performed)
}

/// Click a "load more" button until it disappears, stops producing items,
/// the item ceiling is reached, or `max_clicks` is spent. Returns clicks
/// performed.
pub async fn run_load_more(
    page: &Page,
    options: &InteractionOptions,
    item_selector: &str,
) -> Result<u32> {
    let Some(button_selector) = options.load_more_button_selector.as_deref() else {
        warn!("loadMoreButton strategy configured without a button selector");
        return Ok(0);
    };
    let scroll_delay = Duration::from_millis(options.scroll_delay_ms);
    let stagnation = Duration::from_millis(options.scroll_stagnation_timeout_ms);

    let mut clicks = 0u32;
    for _ in 0..options.max_clicks {
        let before = count_items(page, item_selector).await?;
        if let Some(max_items) = options.max_items_to_scrape {
            if before as usize >= max_items {
                debug!("item ceiling of {max_items} reached, stopping clicks");
                break;
            }
        }

        // Bring the button into the loaded region before looking for it.
        scroll_to_bottom_until_stable(page, options.max_scrolls, scroll_delay, stagnation).await?;
        if !eval_bool(page, any_visible_js(button_selector)).await? {
            debug!("no visible '{button_selector}' button, stopping clicks");
            break;
        }

        eval_bool(page, click_first_visible_js(button_selector)).await?;
        clicks += 1;
        sleep(Duration::from_millis(options.click_delay_ms)).await;

        let after = count_items(page, item_selector).await?;
        if after <= before {
            debug!("item count unchanged after click ({before}), no more content");
            break;
        }
    }
    Ok(clicks)
}

/// Dispatch the configured interaction strategy.
pub async fn run_interaction(
    page: &Page,
    options: &InteractionOptions,
    item_selector: &str,
) -> Result<()> {
    match options.strategy {
        InteractionStrategy::None => Ok(()),
        InteractionStrategy::InfiniteScroll => {
            let scrolls = scroll_to_bottom_until_stable(
                page,
                options.max_scrolls,
                Duration::from_millis(options.scroll_delay_ms),
                Duration::from_millis(options.scroll_stagnation_timeout_ms),
            )
            .await?;
            debug!("infinite scroll performed {scrolls} scrolls");
            Ok(())
        }
        InteractionStrategy::FixedScrolls => {
            let scrolls = run_fixed_scrolls(
                page,
                options.max_scrolls,
                Duration::from_millis(options.scroll_delay_ms),
            )
            .await?;
            debug!("fixed strategy performed {scrolls} scrolls");
            Ok(())
        }
        InteractionStrategy::LoadMoreButton => {
            let clicks = run_load_more(page, options, item_selector).await?;
            debug!("load-more strategy performed {clicks} clicks");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stagnation_limit_rounds_up() {
        let limit = stagnation_limit(Duration::from_millis(300), Duration::from_millis(100));
        assert_eq!(limit, 3);
        let limit = stagnation_limit(Duration::from_millis(250), Duration::from_millis(100));
        assert_eq!(limit, 3);
    }

    #[test]
    fn stagnation_limit_is_at_least_one() {
        assert_eq!(
            stagnation_limit(Duration::ZERO, Duration::from_millis(100)),
            1
        );
        // A zero delay is treated as 1ms so the division stays defined.
        assert_eq!(
            stagnation_limit(Duration::from_millis(100), Duration::ZERO),
            100
        );
    }

    #[test]
    fn selectors_are_injected_as_json_literals() {
        let script = count_items_js("a[data-kind=\"x\"]");
        assert!(script.contains(r#""a[data-kind=\"x\"]""#));
        assert!(script.starts_with("document.querySelectorAll("));
    }
}
