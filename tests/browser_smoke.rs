//! Live-browser check of snapshot capture, locating and highlighting.
//!
//! Skips unless `ZSXQ_CHROME_BIN` points at a Chrome/Chromium executable.

use std::env;

use anyhow::{Context, Result};
use zsxq_explain::dom_snapshot::DomSnapshot;
use zsxq_explain::harvest::ContentHarvester;
use zsxq_explain::locator::{ContentLocator, ContentRule, PageDocument};
use zsxq_explain::runtime::{BrowserSession, LaunchOptions};
use zsxq_explain::types::ContentPoint;

const PAGE: &str = "data:text/html;charset=utf-8,\
<html><body style='margin:0'>\
<div class='feed'>\
<div class='content' style='height:300px'><p>央行停止购买国债</p>以稳定汇率</div>\
<div class='content' style='height:300px'>利率下行</div>\
</div></body></html>";

fn chrome_available() -> bool {
    env::var_os("ZSXQ_CHROME_BIN").is_some_and(|value| !value.is_empty())
}

#[tokio::test]
async fn live_page_snapshot_locates_and_highlights() -> Result<()> {
    if !chrome_available() {
        eprintln!("skipping: ZSXQ_CHROME_BIN is not set");
        return Ok(());
    }

    let mut browser = BrowserSession::launch(&LaunchOptions::from_env())
        .await
        .context("failed to launch chrome")?;
    browser.open(PAGE).await.context("failed to open test page")?;

    let mut snapshot: DomSnapshot = browser.snapshot().await?;
    assert_eq!(snapshot.scroll_offset(), (0.0, 0.0));

    let locator = ContentLocator::new(ContentRule::default());
    let located = locator.extract(&mut snapshot, ContentPoint::new(20.0, 10.0))?;
    assert_eq!(located.text, "央行停止购买国债以稳定汇率");
    assert!(browser.sync_highlight(&snapshot).await?);

    let mut harvester = ContentHarvester::new();
    assert_eq!(harvester.harvest_snapshot(&snapshot, &ContentRule::default()), 2);

    browser.close().await?;
    Ok(())
}
