//! Filename based routing of result files into category buckets
//!
//! The routing table is an explicit, ordered list of `(pattern, category,
//! variation)` rules. The first matching rule wins, and rules are ordered by
//! specificity:
//!
//! 1. longer category prefixes before shorter ones, so `HEJmerging_` is
//!    checked before `HEJ` even though `HEJ*` would match both,
//! 2. within a category, declared variation rules first, then the optional
//!    `variation_glob` catch-all, then the plain category rule,
//! 3. between variations, longer tags before shorter ones,
//! 4. otherwise declaration order.
//!
//! A file matching the catch-all is a variation nobody declared; it is
//! discarded so it never ends up in the central merge.
//!
//! Classification and merging both go through the same table, so the bucket a
//! file lands in is exactly the set of files a variation merge consumes.

use crate::config::{CategoryConfig, CollectorConfig};
use globset::{Glob, GlobMatcher, GlobSet, GlobSetBuilder};
use itertools::Itertools;
use std::{cmp::Reverse, path::PathBuf};

/// destination of a classified file
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Bucket {
    pub category: usize,
    pub variation: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Bucket(Bucket),
    /// known companion file (run cards, configuration copies)
    Discard,
    Unmatched,
}

// position of a rule within its category
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum RuleKind {
    Variation,
    Undeclared,
    Category,
}

#[derive(Debug, Clone)]
pub struct RouteRule {
    pub pattern: String,
    pub route: Route,
    matcher: GlobMatcher,
    kind: RuleKind,
    prefix_len: usize,
    tag_len: usize,
}

#[derive(Debug, Clone)]
pub struct RoutingTable {
    rules: Vec<RouteRule>,
    discard: GlobSet,
    categories: Vec<CategoryConfig>,
}

fn substitute(pattern: &str, prefix: &str, tag: &str) -> String {
    pattern.replace("{prefix}", prefix).replace("{tag}", tag)
}

impl RoutingTable {
    /// compile all patterns, collecting every failure instead of stopping at the first
    pub fn compile(config: &CollectorConfig) -> Result<Self, Vec<(String, globset::Error)>> {
        let mut errors = Vec::new();
        let mut rules = Vec::new();

        for (category_index, category) in config.categories.iter().enumerate() {
            let prefix = category.prefix.as_str();

            for (variation_index, variation) in category.variations.iter().enumerate() {
                let pattern = substitute(
                    variation.pattern.as_deref().unwrap_or("{prefix}*.{tag}*"),
                    prefix,
                    &variation.tag,
                );

                match Glob::new(&pattern) {
                    Ok(glob) => rules.push(RouteRule {
                        matcher: glob.compile_matcher(),
                        pattern,
                        route: Route::Bucket(Bucket {
                            category: category_index,
                            variation: Some(variation_index),
                        }),
                        kind: RuleKind::Variation,
                        prefix_len: prefix.len(),
                        tag_len: variation.tag.len(),
                    }),
                    Err(error) => errors.push((pattern, error)),
                }
            }

            if let Some(glob) = category.variation_glob.as_deref() {
                let pattern = substitute(glob, prefix, "");
                match Glob::new(&pattern) {
                    Ok(glob) => rules.push(RouteRule {
                        matcher: glob.compile_matcher(),
                        pattern,
                        route: Route::Discard,
                        kind: RuleKind::Undeclared,
                        prefix_len: prefix.len(),
                        tag_len: 0,
                    }),
                    Err(error) => errors.push((pattern, error)),
                }
            }

            let pattern = substitute(
                category.pattern.as_deref().unwrap_or("{prefix}*"),
                prefix,
                "",
            );
            match Glob::new(&pattern) {
                Ok(glob) => rules.push(RouteRule {
                    matcher: glob.compile_matcher(),
                    pattern,
                    route: Route::Bucket(Bucket {
                        category: category_index,
                        variation: None,
                    }),
                    kind: RuleKind::Category,
                    prefix_len: prefix.len(),
                    tag_len: 0,
                }),
                Err(error) => errors.push((pattern, error)),
            }
        }

        // stable, so declaration order breaks the remaining ties
        rules.sort_by_key(|rule| {
            (
                Reverse(rule.prefix_len),
                rule.kind,
                Reverse(rule.tag_len),
            )
        });

        let mut discard = GlobSetBuilder::new();
        for pattern in config.discard.iter() {
            match Glob::new(pattern) {
                Ok(glob) => {
                    discard.add(glob);
                }
                Err(error) => errors.push((pattern.clone(), error)),
            }
        }

        let discard = match discard.build() {
            Ok(discard) => discard,
            Err(error) => {
                errors.push((config.discard.iter().join(", "), error));
                GlobSet::empty()
            }
        };

        if errors.is_empty() {
            Ok(Self {
                rules,
                discard,
                categories: config.categories.clone(),
            })
        } else {
            Err(errors)
        }
    }

    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }

    pub fn categories(&self) -> &[CategoryConfig] {
        &self.categories
    }

    /// route a single file by its name
    pub fn route(&self, file_name: &str) -> Route {
        self.rules
            .iter()
            .find(|rule| rule.matcher.is_match(file_name))
            .map(|rule| rule.route)
            .unwrap_or_else(|| {
                if self.discard.is_match(file_name) {
                    Route::Discard
                } else {
                    Route::Unmatched
                }
            })
    }

    /// directory collecting the files of `bucket` below `results`
    pub fn bucket_dir(&self, results: &std::path::Path, bucket: Bucket) -> PathBuf {
        let category = &self.categories[bucket.category];
        let dir = results.join(&category.bucket);

        match bucket.variation {
            Some(variation) => dir.join(&category.variations[variation].tag),
            None => dir,
        }
    }

    /// human readable name, `category` or `category/tag`
    pub fn bucket_name(&self, bucket: Bucket) -> String {
        let category = &self.categories[bucket.category];

        match bucket.variation {
            Some(variation) => format!("{}/{}", category.name, category.variations[variation].tag),
            None => category.name.clone(),
        }
    }
}

#[cfg(test)]
#[path = "route_test.rs"]
mod route_test;
