//! Collects content blocks across scrolls and feeds them to a summary session.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use crate::dom_snapshot::DomSnapshot;
use crate::locator::{ContentRule, PageDocument, normalize_text};

/// One collected block. `id` is the hex SHA-256 of the normalised text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarvestedBlock {
    pub id: String,
    pub text: String,
    pub harvested_at: DateTime<Utc>,
}

/// Ordered, de-duplicated set of extracted text blocks.
///
/// Blocks are compared by the digest of their normalised text (whitespace
/// runs collapsed, ends trimmed), so a block seen again after re-rendering or
/// scrolling is ignored. Inner whitespace still counts: `利率下行` and
/// `利率 下行` are two blocks.
#[derive(Debug, Default, Clone)]
pub struct ContentHarvester {
    blocks: Vec<HarvestedBlock>,
    seen: HashSet<String>,
}

impl ContentHarvester {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one block stamped with the current time. Returns `false` for
    /// empty or already seen text.
    pub fn push(&mut self, raw: &str) -> bool {
        self.push_at(raw, Utc::now())
    }

    pub fn push_at(&mut self, raw: &str, harvested_at: DateTime<Utc>) -> bool {
        let text = normalize_text(raw);
        if text.is_empty() {
            return false;
        }
        let id = format!("{:x}", Sha256::digest(text.as_bytes()));
        if !self.seen.insert(id.clone()) {
            return false;
        }
        self.blocks.push(HarvestedBlock {
            id,
            text,
            harvested_at,
        });
        true
    }

    /// Add every block, returning how many were new.
    pub fn push_all<I, S>(&mut self, blocks: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        blocks
            .into_iter()
            .filter(|block| self.push(block.as_ref()))
            .count()
    }

    /// Harvest every element of `snapshot` matching `rule`.
    pub fn harvest_snapshot(&mut self, snapshot: &DomSnapshot, rule: &ContentRule) -> usize {
        let texts: Vec<String> = snapshot
            .document_order()
            .into_iter()
            .filter(|id| rule.matches(snapshot, id))
            .map(|id| snapshot.text_content(&id))
            .collect();
        self.push_all(texts)
    }

    pub fn count(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn blocks(&self) -> &[HarvestedBlock] {
        &self.blocks
    }

    pub fn get(&self, id: &str) -> Option<&HarvestedBlock> {
        self.blocks.iter().find(|block| block.id == id)
    }

    /// Blocks harvested within `[start, end]`, inclusive.
    pub fn between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> impl Iterator<Item = &HarvestedBlock> {
        self.blocks
            .iter()
            .filter(move |block| block.harvested_at >= start && block.harvested_at <= end)
    }

    /// All blocks joined by blank lines, in first-seen order.
    pub fn aggregate(&self) -> String {
        self.blocks
            .iter()
            .map(|block| block.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Archive form: `{exportTime, totalCount, contents}`.
    pub fn export_json(&self, exported_at: DateTime<Utc>) -> Value {
        json!({
            "exportTime": exported_at,
            "totalCount": self.blocks.len(),
            "contents": self.blocks,
        })
    }

    pub fn clear(&mut self) {
        self.blocks.clear();
        self.seen.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Rect;
    use chrono::TimeZone;

    fn texts(harvester: &ContentHarvester) -> Vec<&str> {
        harvester.blocks().iter().map(|block| block.text.as_str()).collect()
    }

    #[test]
    fn duplicates_are_dropped_in_first_seen_order() {
        let mut harvester = ContentHarvester::new();
        let added = harvester.push_all(["利率下行", "汇率稳定", "  利率下行\n", "\t汇率  稳定", ""]);
        assert_eq!(added, 3);
        assert_eq!(texts(&harvester), ["利率下行", "汇率稳定", "汇率 稳定"]);
        assert_eq!(harvester.aggregate(), "利率下行\n\n汇率稳定\n\n汇率 稳定");

        harvester.clear();
        assert!(harvester.is_empty());
        assert!(harvester.push("利率下行"));
    }

    #[test]
    fn blocks_carry_digest_ids_and_timestamps() {
        let early = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let mut harvester = ContentHarvester::new();
        assert!(harvester.push_at("央行停止购买国债", early));
        assert!(harvester.push_at("利率下行", late));
        assert!(!harvester.push_at(" 央行停止购买国债 ", late));

        let first = &harvester.blocks()[0];
        assert_eq!(first.id.len(), 64);
        assert_eq!(first.harvested_at, early);
        assert_eq!(harvester.get(&first.id).map(|b| b.text.as_str()), Some("央行停止购买国债"));
        assert!(harvester.get("missing").is_none());

        let window: Vec<&str> = harvester
            .between(late, late)
            .map(|block| block.text.as_str())
            .collect();
        assert_eq!(window, ["利率下行"]);
        assert_eq!(harvester.between(early, late).count(), 2);
    }

    #[test]
    fn export_json_lists_every_block() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap();
        let mut harvester = ContentHarvester::new();
        harvester.push_at("一", at);
        harvester.push_at("二", at);

        let exported = harvester.export_json(at);
        assert_eq!(exported["totalCount"], 2);
        assert_eq!(exported["exportTime"], "2024-03-01T09:30:00Z");
        assert_eq!(exported["contents"][1]["text"], "二");
        assert_eq!(exported["contents"][0]["harvestedAt"], "2024-03-01T09:30:00Z");
        assert_eq!(exported["contents"][0]["id"], harvester.blocks()[0].id);
    }

    #[test]
    fn snapshots_from_successive_scrolls_accumulate() {
        let build = |texts: &[&str]| {
            let mut doc = DomSnapshot::new(Rect::new(0.0, 0.0, 800.0, 2000.0));
            let root = doc.root();
            for (index, text) in texts.iter().enumerate() {
                let y = index as f64 * 100.0;
                let rect = Rect::new(0.0, y, 800.0, 90.0);
                let block = doc.add_element(root, "div", &["content"], rect);
                doc.add_text(block, text);
            }
            let rect = Rect::new(0.0, 1900.0, 800.0, 90.0);
            let aside = doc.add_element(root, "div", &["sidebar"], rect);
            doc.add_text(aside, "广告");
            doc
        };

        let rule = ContentRule::default();
        let mut harvester = ContentHarvester::new();
        assert_eq!(harvester.harvest_snapshot(&build(&["一", "二"]), &rule), 2);
        assert_eq!(harvester.harvest_snapshot(&build(&["二", "三"]), &rule), 1);
        assert_eq!(harvester.aggregate(), "一\n\n二\n\n三");
    }
}
