//! Class catalog and selection of the classes to scrape in a run
//!
//! The catalog maps a synset id (wnid) to its name and how many image URLs
//! the ImageNet API knows for it, both overall and flickr-hosted only.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use rand::Rng;
use rand::seq::index;
use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tracing::{info, warn};

/// Share of flickr URLs assumed to still work when judging a class.
pub const FLICKR_MARGIN: f64 = 0.9;

/// Share of all URLs assumed to still work when judging a class.
pub const ALL_URLS_MARGIN: f64 = 0.8;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("catalog is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("class {0} not found in ImageNet")]
    UnknownClass(String),

    #[error(
        "with {images_per_class} images per class there are {available} classes to choose from \
         but {requested} were requested; decrease number of classes or images per class"
    )]
    InsufficientPool {
        available: usize,
        requested: usize,
        images_per_class: usize,
    },
}

pub type CatalogResult<T> = Result<T, CatalogError>;

/// One synset as described by the class info document.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClassEntry {
    #[serde(skip)]
    pub wnid: String,
    pub class_name: String,
    #[serde(deserialize_with = "count_from_any")]
    pub flickr_img_url_count: u64,
    #[serde(deserialize_with = "count_from_any")]
    pub img_url_count: u64,
}

impl ClassEntry {
    /// Available image count for the chosen source category.
    pub fn available(&self, flickr_only: bool) -> u64 {
        if flickr_only {
            self.flickr_img_url_count
        } else {
            self.img_url_count
        }
    }

    /// Whether the class is expected to yield `images_per_class` after losses.
    pub fn has_enough(&self, images_per_class: usize, flickr_only: bool) -> bool {
        let margin = if flickr_only { FLICKR_MARGIN } else { ALL_URLS_MARGIN };
        self.available(flickr_only) as f64 * margin > images_per_class as f64
    }
}

// Counts show up both as numbers and as numeric strings in published catalogs.
fn count_from_any<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Count {
        Number(u64),
        Text(String),
    }

    match Count::deserialize(deserializer)? {
        Count::Number(n) => Ok(n),
        Count::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// All known classes, ordered by wnid.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: BTreeMap<String, ClassEntry>,
}

impl Catalog {
    pub fn from_json(json: &str) -> CatalogResult<Self> {
        let mut entries: BTreeMap<String, ClassEntry> = serde_json::from_str(json)?;
        for (wnid, entry) in entries.iter_mut() {
            entry.wnid = wnid.clone();
        }
        Ok(Self { entries })
    }

    pub fn load(path: &Path) -> CatalogResult<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn get(&self, wnid: &str) -> Option<&ClassEntry> {
        self.entries.get(wnid)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClassEntry> {
        self.entries.values()
    }
}

/// The classes picked for this run, in processing order.
#[derive(Debug, Clone, Default)]
pub struct ScrapeTarget {
    classes: Vec<ClassEntry>,
}

impl ScrapeTarget {
    pub fn classes(&self) -> &[ClassEntry] {
        &self.classes
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn class_names(&self) -> Vec<&str> {
        self.classes.iter().map(|c| c.class_name.as_str()).collect()
    }
}

/// Inputs of the class selection.
#[derive(Debug, Clone)]
pub struct SelectionCriteria {
    pub number_of_classes: usize,
    pub images_per_class: usize,
    pub scrape_only_flickr: bool,
    pub ignore_image_count: bool,
    /// Explicit class ids; sampling is skipped when present.
    pub class_list: Option<Vec<String>>,
}

/// Picks the working set of classes for a run.
pub struct CatalogSelector<'a> {
    catalog: &'a Catalog,
}

impl<'a> CatalogSelector<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    pub fn select<R: Rng + ?Sized>(
        &self,
        criteria: &SelectionCriteria,
        rng: &mut R,
    ) -> CatalogResult<ScrapeTarget> {
        match &criteria.class_list {
            Some(ids) => self.select_listed(ids),
            None => self.sample(criteria, rng),
        }
    }

    /// Every id has to exist; the first unknown one aborts the whole selection.
    pub fn select_listed(&self, ids: &[String]) -> CatalogResult<ScrapeTarget> {
        let classes = ids
            .iter()
            .map(|id| {
                self.catalog
                    .get(id)
                    .cloned()
                    .ok_or_else(|| CatalogError::UnknownClass(id.clone()))
            })
            .collect::<CatalogResult<Vec<_>>>()?;
        Ok(ScrapeTarget { classes })
    }

    /// Classes eligible for sampling under the given criteria.
    pub fn candidate_pool(&self, criteria: &SelectionCriteria) -> Vec<&'a ClassEntry> {
        self.catalog
            .iter()
            .filter(|entry| {
                criteria.ignore_image_count
                    || entry.has_enough(criteria.images_per_class, criteria.scrape_only_flickr)
            })
            .collect()
    }

    pub fn sample<R: Rng + ?Sized>(
        &self,
        criteria: &SelectionCriteria,
        rng: &mut R,
    ) -> CatalogResult<ScrapeTarget> {
        let pool = self.candidate_pool(criteria);

        if pool.len() < criteria.number_of_classes {
            warn!(
                "With {} images per class there are {} to choose from.",
                criteria.images_per_class,
                pool.len()
            );
            warn!("Decrease number of classes or decrease images per class.");

            if !criteria.ignore_image_count {
                return Err(CatalogError::InsufficientPool {
                    available: pool.len(),
                    requested: criteria.number_of_classes,
                    images_per_class: criteria.images_per_class,
                });
            }
        }

        let amount = criteria.number_of_classes.min(pool.len());
        let classes = index::sample(rng, pool.len(), amount)
            .into_iter()
            .map(|i| pool[i].clone())
            .collect::<Vec<_>>();

        info!("Sampled {} of {} candidate classes", classes.len(), pool.len());
        Ok(ScrapeTarget { classes })
    }
}
