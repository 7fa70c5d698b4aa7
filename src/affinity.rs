//! Per-endpoint affinity scores learned from listening time.
//!
//! Every endpoint (stream or category page) owns an [`AffinityNode`]. Each
//! stored reward feeds three moving averages over windows of 8, 16 and 32
//! updates. While a window is still filling up its average is the plain
//! running mean; once full it switches to exponential smoothing:
//!
//! ```text
//! m_w = (m_w * (w - 1) + reward) / w      when run_count > w
//! m_w = cumulative_reward / run_count     otherwise
//! ```
//!
//! The sampler only ever sees `m8`, passed through a [`WeightPolicy`] that
//! floors unproven weights to zero and caps runaway ones. `m16` and `m32` are
//! slower diagnostics shown by `radiomuse report`.

use anyhow::{ensure, Context, Result};
use log::{debug, trace};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::config::ColdStart;

/// Window sizes of the moving averages, shortest first.
pub const WINDOWS: [u64; 3] = [8, 16, 32];

/// Learning state of one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AffinityNode {
    pub url: String,
    /// Sum of every reward ever applied
    pub cumulative_reward: Decimal,
    /// Number of updates applied
    pub run_count: u64,
    pub m8: Decimal,
    pub m16: Decimal,
    pub m32: Decimal,
}

impl AffinityNode {
    /// Fresh node with every numeric field at zero.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            cumulative_reward: Decimal::ZERO,
            run_count: 0,
            m8: Decimal::ZERO,
            m16: Decimal::ZERO,
            m32: Decimal::ZERO,
        }
    }

    /// Apply one learning step.
    pub fn apply(&mut self, reward: Decimal) {
        self.cumulative_reward += reward;
        self.run_count += 1;
        let average = self.cumulative_reward / Decimal::from(self.run_count);

        let [w8, w16, w32] = WINDOWS;
        self.m8 = smooth(self.m8, reward, w8, self.run_count, average);
        self.m16 = smooth(self.m16, reward, w16, self.run_count, average);
        self.m32 = smooth(self.m32, reward, w32, self.run_count, average);
    }

    /// Stored (unprocessed) sampling weight.
    pub fn weight(&self) -> Decimal {
        self.m8
    }
}

fn smooth(previous: Decimal, reward: Decimal, window: u64, run_count: u64, average: Decimal) -> Decimal {
    if run_count > window {
        (previous * Decimal::from(window - 1) + reward) / Decimal::from(window)
    } else {
        average
    }
}

/// Read-time shaping of stored weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeightPolicy {
    /// Below this a weight is "never proven good" and presents as zero
    pub lower: Decimal,
    /// Above this a weight presents as exactly this
    pub upper: Decimal,
    pub cold_start: ColdStart,
}

impl Default for WeightPolicy {
    fn default() -> Self {
        Self::new(Decimal::from(10), Decimal::from(7200), ColdStart::CorpusMean)
    }
}

impl WeightPolicy {
    pub fn new(lower: Decimal, upper: Decimal, cold_start: ColdStart) -> Self {
        Self { lower, upper, cold_start }
    }

    /// Weight as the sampler should see it.
    pub fn present(&self, stored: Decimal) -> Decimal {
        if stored < self.lower {
            Decimal::ZERO
        } else if stored > self.upper {
            self.upper
        } else {
            stored
        }
    }
}

/// Persistent mapping from endpoint URL to [`AffinityNode`].
#[derive(Debug, Clone, Copy)]
pub struct AffinityStore<'c> {
    conn: &'c Connection,
    policy: WeightPolicy,
}

impl<'c> AffinityStore<'c> {
    pub fn new(conn: &'c Connection, policy: WeightPolicy) -> Self {
        Self { conn, policy }
    }

    /// Stored node for `url`, if it has ever been updated.
    pub fn node(&self, url: &str) -> Result<Option<AffinityNode>> {
        load_node(self.conn, url)
    }

    /// Apply one learning step to `url`, creating the node on first use.
    pub fn update(&self, url: &str, reward: Decimal) -> Result<AffinityNode> {
        update_on(self.conn, url, reward)
    }

    /// Apply the same reward to every node of a selection path. Returns the
    /// updated nodes in path order.
    pub fn update_path(&self, path: &[String], reward: Decimal) -> Result<Vec<AffinityNode>> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to start path update transaction")?;
        let nodes = path
            .iter()
            .map(|url| update_on(&tx, url, reward))
            .collect::<Result<Vec<_>>>()?;
        tx.commit().context("Commiting path update failed")?;
        Ok(nodes)
    }

    /// Presented weight of `url`. Unseen endpoints follow the cold-start policy.
    pub fn estimate(&self, url: &str) -> Result<Decimal> {
        match stored_weight(self.conn, url)? {
            Some(weight) => Ok(self.policy.present(weight)),
            None => self.cold_start_weight(),
        }
    }

    /// Presented weights of `urls`, in input order.
    pub fn estimate_batch<S: AsRef<str>>(&self, urls: &[S]) -> Result<Vec<Decimal>> {
        let mut cold: Option<Decimal> = None;
        let mut weights = Vec::with_capacity(urls.len());
        for url in urls {
            let weight = match stored_weight(self.conn, url.as_ref())? {
                Some(weight) => self.policy.present(weight),
                None => match cold {
                    Some(weight) => weight,
                    None => {
                        let weight = self.cold_start_weight()?;
                        cold = Some(weight);
                        weight
                    }
                },
            };
            weights.push(weight);
        }
        Ok(weights)
    }

    /// `(weight, url)` pairs ready for the sampler.
    pub fn weigh<'u, I>(&self, urls: I) -> Result<Vec<(Decimal, String)>>
    where
        I: IntoIterator<Item = &'u String>,
    {
        let urls: Vec<&String> = urls.into_iter().collect();
        let weights = self.estimate_batch(&urls)?;
        Ok(weights.into_iter().zip(urls.into_iter().cloned()).collect())
    }

    /// Mean stored weight over all nodes, and the node count.
    pub fn aggregate(&self) -> Result<(Decimal, u64)> {
        let nodes = self.all_nodes()?;
        if nodes.is_empty() {
            return Ok((Decimal::ZERO, 0));
        }
        let count = nodes.len() as u64;
        let total: Decimal = nodes.iter().map(AffinityNode::weight).sum();
        Ok((total / Decimal::from(count), count))
    }

    /// Presented weights of every known endpoint whose URL does not contain
    /// `excluded`. This is the corpus rate-limit evasion draws from.
    pub fn corpus_excluding(&self, excluded: &str) -> Result<Vec<(Decimal, String)>> {
        Ok(self
            .all_nodes()?
            .into_iter()
            .filter(|node| !node.url.contains(excluded))
            .map(|node| (self.policy.present(node.weight()), node.url))
            .collect())
    }

    /// Nodes ordered by stored weight, best first.
    pub fn top(&self, limit: usize) -> Result<Vec<AffinityNode>> {
        let mut nodes = self.all_nodes()?;
        nodes.sort_by(|a, b| b.m8.cmp(&a.m8).then_with(|| a.url.cmp(&b.url)));
        nodes.truncate(limit);
        Ok(nodes)
    }

    fn cold_start_weight(&self) -> Result<Decimal> {
        match self.policy.cold_start {
            ColdStart::Zero => Ok(Decimal::ZERO),
            ColdStart::CorpusMean => {
                let (mean, _) = self.aggregate()?;
                Ok(self.policy.present(mean))
            }
        }
    }

    fn all_nodes(&self) -> Result<Vec<AffinityNode>> {
        let mut stmt = self
            .conn
            .prepare("SELECT url, cumulative_reward, run_count, m8, m16, m32 FROM affinity")
            .context("Invalid SQL statement when SELECTing affinity nodes")?;
        let rows = stmt
            .query_map([], raw_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Cannot query affinity nodes")?;
        rows.into_iter().map(RawNode::parse).collect()
    }
}

struct RawNode {
    url: String,
    cumulative_reward: String,
    run_count: i64,
    m8: String,
    m16: String,
    m32: String,
}

impl RawNode {
    fn parse(self) -> Result<AffinityNode> {
        let url = self.url;
        let decimal = |text: &str| {
            Decimal::from_str(text)
                .with_context(|| format!("Corrupt decimal {text:?} stored for {url}"))
        };
        Ok(AffinityNode {
            cumulative_reward: decimal(&self.cumulative_reward)?,
            run_count: u64::try_from(self.run_count)
                .with_context(|| format!("Negative run count stored for {url}"))?,
            m8: decimal(&self.m8)?,
            m16: decimal(&self.m16)?,
            m32: decimal(&self.m32)?,
            url: url.clone(),
        })
    }
}

fn raw_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawNode> {
    Ok(RawNode {
        url: row.get(0)?,
        cumulative_reward: row.get(1)?,
        run_count: row.get(2)?,
        m8: row.get(3)?,
        m16: row.get(4)?,
        m32: row.get(5)?,
    })
}

fn load_node(conn: &Connection, url: &str) -> Result<Option<AffinityNode>> {
    let raw = conn
        .query_row(
            "SELECT url, cumulative_reward, run_count, m8, m16, m32 FROM affinity WHERE url = ?1",
            [url],
            raw_row,
        )
        .optional()
        .with_context(|| format!("Failed to query affinity for {url}"))?;
    raw.map(RawNode::parse).transpose()
}

fn stored_weight(conn: &Connection, url: &str) -> Result<Option<Decimal>> {
    let text: Option<String> = conn
        .query_row("SELECT m8 FROM affinity WHERE url = ?1", [url], |row| row.get(0))
        .optional()
        .with_context(|| format!("Failed to query weight for {url}"))?;
    text.map(|text| {
        Decimal::from_str(&text).with_context(|| format!("Corrupt weight {text:?} stored for {url}"))
    })
    .transpose()
}

fn update_on(conn: &Connection, url: &str, reward: Decimal) -> Result<AffinityNode> {
    ensure!(reward >= Decimal::ZERO, "reward must not be negative, got {reward}");

    let mut node = load_node(conn, url)?.unwrap_or_else(|| {
        debug!("Creating affinity node for {url}");
        AffinityNode::new(url)
    });
    node.apply(reward);

    conn.execute(
        "INSERT INTO affinity (url, cumulative_reward, run_count, m8, m16, m32)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(url) DO UPDATE SET cumulative_reward = excluded.cumulative_reward,
                                        run_count = excluded.run_count,
                                        m8 = excluded.m8,
                                        m16 = excluded.m16,
                                        m32 = excluded.m32",
        params![
            node.url,
            node.cumulative_reward.to_string(),
            node.run_count as i64,
            node.m8.to_string(),
            node.m16.to_string(),
            node.m32.to_string(),
        ],
    )
    .with_context(|| format!("Invalid SQL statement when UPDATEing affinity for {url}"))?;

    trace!("{url}: runs={} m8={} m16={} m32={}", node.run_count, node.m8, node.m16, node.m32);
    Ok(node)
}
