//! Walking the catalog down to one station.
//!
//! Starting from a [`CatalogTarget`], the [`Selector`] repeatedly resolves
//! the current page, weighs its endpoints and draws one. Category pages are
//! descended into, anything else is the station. Every page visited is
//! recorded in the selection path so the eventual reward reaches the whole
//! chain of decisions that led to the station.
//!
//! When the catalog reports its query limit, the walk is abandoned and the
//! station is drawn straight from every endpoint the affinity store knows,
//! without touching the network again.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use regex::{Regex, RegexBuilder};

use crate::affinity::AffinityStore;
use crate::catalog::{is_quota_exceeded, node_url, CatalogTarget, CatalogWalker};
use crate::sampler;

/// Case-insensitive word filter over titles and URLs.
#[derive(Debug, Clone)]
pub struct Blacklist {
    pattern: Option<Regex>,
}

impl Blacklist {
    pub fn new<S: AsRef<str>>(words: &[S]) -> Result<Self> {
        let alternatives: Vec<String> = words
            .iter()
            .map(|word| word.as_ref().trim())
            .filter(|word| !word.is_empty())
            .map(regex::escape)
            .collect();
        if alternatives.is_empty() {
            return Ok(Self { pattern: None });
        }
        let pattern = RegexBuilder::new(&alternatives.join("|"))
            .case_insensitive(true)
            .build()
            .context("Failed to compile blacklist")?;
        Ok(Self { pattern: Some(pattern) })
    }

    pub fn matches(&self, text: &str) -> bool {
        self.pattern.as_ref().is_some_and(|pattern| pattern.is_match(text))
    }
}

/// Outcome of one walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// Category pages visited, then the station when there is one
    pub path: Vec<String>,
    /// Station to play, `None` for an empty page or a blacklisted pick
    pub endpoint: Option<String>,
    /// Drawn from the known corpus because the catalog refused queries
    pub evaded: bool,
}

impl Selection {
    fn empty(path: Vec<String>) -> Self {
        Self { path, endpoint: None, evaded: false }
    }
}

pub struct Selector<'a> {
    walker: CatalogWalker<'a>,
    affinity: AffinityStore<'a>,
    blacklist: Blacklist,
    /// Endpoints containing this are category pages
    catalog_home: String,
    max_depth: usize,
}

impl<'a> Selector<'a> {
    pub fn new(
        walker: CatalogWalker<'a>,
        affinity: AffinityStore<'a>,
        blacklist: Blacklist,
        catalog_home: impl Into<String>,
        max_depth: usize,
    ) -> Self {
        Self {
            walker,
            affinity,
            blacklist,
            catalog_home: catalog_home.into(),
            max_depth,
        }
    }

    /// Walk from `start` to a station at the given temperature.
    pub fn select(&self, start: &CatalogTarget, temperature: f64) -> Result<Selection> {
        let mut path = Vec::new();
        let mut target = start.clone();

        for depth in 0..self.max_depth {
            if let CatalogTarget::Node(node) = &target {
                path.push(node_url(self.walker.browse_url(), node));
            }
            let (title, urls) = match self.walker.resolve(&target) {
                Ok(page) => page,
                Err(err) if is_quota_exceeded(&err) => {
                    info!("Catalog quota exhausted at depth {depth}: {err:#}");
                    return self.evade(temperature);
                }
                Err(err) => return Err(err),
            };

            if matches!(target, CatalogTarget::Root { .. }) {
                println!("> {title}({temperature:.1})");
            } else {
                println!("> {title}");
            }

            let candidates = self.affinity.weigh(&urls)?;
            let Some(choice) = sampler::choose(&candidates, temperature) else {
                println!("Empty list, restart.");
                return Ok(Selection::empty(path));
            };
            print!("{:3.0}%+ ", choice.share * 100.0);

            if self.blacklist.matches(&title) || self.blacklist.matches(&choice.item) {
                println!("** Blacklisted");
                debug!("Blacklisted {:?} / {}", title, choice.item);
                return Ok(Selection::empty(path));
            }
            if choice.item.contains(&self.catalog_home) {
                target = CatalogTarget::Node(choice.item);
                continue;
            }

            println!();
            path.push(choice.item.clone());
            return Ok(Selection {
                path,
                endpoint: Some(choice.item),
                evaded: false,
            });
        }

        warn!("Catalog nested deeper than {} levels, restarting", self.max_depth);
        Ok(Selection::empty(path))
    }

    fn evade(&self, temperature: f64) -> Result<Selection> {
        println!("\n\n# Jump (403)");
        let corpus = self.affinity.corpus_excluding(&self.catalog_home)?;
        let endpoint = sampler::choose_evasive(&corpus, temperature).map(|choice| choice.item);
        if endpoint.is_none() {
            warn!("Catalog quota exhausted and no known stations to fall back on");
        }
        Ok(Selection {
            path: endpoint.iter().cloned().collect(),
            endpoint,
            evaded: true,
        })
    }
}
