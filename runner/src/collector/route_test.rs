use super::{Bucket, Route, RoutingTable};
use crate::{
    config::{CategoryConfig, CollectorConfig, VariationConfig},
    exec::ExternalCommand,
};
use std::path::{Path, PathBuf};

fn category(name: &str, prefix: &str, variations: &[(&str, Option<&str>)]) -> CategoryConfig {
    CategoryConfig {
        name: name.to_string(),
        prefix: prefix.to_string(),
        bucket: format!("{name}-output"),
        output: None,
        extension: String::from("yoda"),
        pattern: None,
        variations: variations
            .iter()
            .map(|(tag, pattern)| VariationConfig {
                tag: tag.to_string(),
                label: None,
                pattern: pattern.map(str::to_string),
            })
            .collect(),
        variation_glob: None,
    }
}

fn collector(categories: Vec<CategoryConfig>) -> CollectorConfig {
    CollectorConfig {
        scratch_root: PathBuf::from("/scratch"),
        results_dir: PathBuf::from("results"),
        merged_dir: String::from("merged"),
        archive_glob: String::from("*.tar.gz"),
        threads: None,
        log: PathBuf::from("classify.log"),
        merge: ExternalCommand::new("yodamerge"),
        prune: None,
        discard: vec![String::from("*.yml"), String::from("Run.dat")],
        categories,
    }
}

fn table() -> RoutingTable {
    RoutingTable::compile(&collector(vec![
        category("hej", "HEJ", &[("MuR2_MuF2", Some("{prefix}*{tag}*"))]),
        category("lo", "LO", &[("MUR2_MUF2", None), ("MUR0.5_MUF0.5", None)]),
        category("hejmerging", "HEJmerging_", &[]),
    ]))
    .unwrap()
}

const LO: usize = 1;

#[test]
pub fn variation_wins_over_generic_category() {
    let table = table();

    assert_eq!(
        table.route("LO-55.yoda"),
        Route::Bucket(Bucket {
            category: LO,
            variation: None
        })
    );
    assert_eq!(
        table.route("LO-55.MUR2_MUF2_PDF123.yoda"),
        Route::Bucket(Bucket {
            category: LO,
            variation: Some(0)
        })
    );
    assert_eq!(
        table.route("LO-67.MUR0.5_MUF0.5_PDF123.yoda"),
        Route::Bucket(Bucket {
            category: LO,
            variation: Some(1)
        })
    );
}

#[test]
pub fn longer_prefix_wins_over_extended_prefix() {
    let table = table();

    // HEJ* and its variation pattern would both match, HEJmerging_ is more specific
    assert_eq!(
        table.route("HEJmerging_55.MuR2_MuF2.yoda"),
        Route::Bucket(Bucket {
            category: 2,
            variation: None
        })
    );
    assert_eq!(
        table.route("HEJ_55.MuR2_MuF2.yoda"),
        Route::Bucket(Bucket {
            category: 0,
            variation: Some(0)
        })
    );
}

#[test]
pub fn rule_order_is_explicit() {
    let patterns: Vec<_> = table()
        .rules()
        .iter()
        .map(|rule| rule.pattern.clone())
        .collect();

    assert_eq!(
        patterns,
        vec![
            "HEJmerging_*",
            "HEJ*MuR2_MuF2*",
            "HEJ*",
            "LO*.MUR0.5_MUF0.5*",
            "LO*.MUR2_MUF2*",
            "LO*",
        ]
    );
}

#[test]
pub fn undeclared_variations_are_discarded() {
    let mut lo = category("lo", "LO", &[("MUR2_MUF2", None)]);
    lo.variation_glob = Some(String::from("{prefix}*.MU*"));
    let table = RoutingTable::compile(&collector(vec![lo])).unwrap();

    let patterns: Vec<_> = table.rules().iter().map(|rule| rule.pattern.as_str()).collect();
    assert_eq!(patterns, vec!["LO*.MUR2_MUF2*", "LO*.MU*", "LO*"]);

    assert_eq!(
        table.route("LO_55.MUR2_MUF2.yoda"),
        Route::Bucket(Bucket {
            category: 0,
            variation: Some(0)
        })
    );
    assert_eq!(table.route("LO_55.MUR1_MUF2.yoda"), Route::Discard);
    assert_eq!(
        table.route("LO_55.yoda"),
        Route::Bucket(Bucket {
            category: 0,
            variation: None
        })
    );
}

#[test]
pub fn companions_are_discarded() {
    let table = table();

    assert_eq!(table.route("config_55.yml"), Route::Discard);
    assert_eq!(table.route("Run.dat"), Route::Discard);
    assert_eq!(table.route("Results.db"), Route::Unmatched);
}

#[test]
pub fn bucket_directories() {
    let table = table();
    let results = Path::new("results");

    assert_eq!(
        table.bucket_dir(
            results,
            Bucket {
                category: LO,
                variation: None
            }
        ),
        PathBuf::from("results/lo-output")
    );
    assert_eq!(
        table.bucket_dir(
            results,
            Bucket {
                category: LO,
                variation: Some(0)
            }
        ),
        PathBuf::from("results/lo-output/MUR2_MUF2")
    );
}

#[test]
pub fn invalid_patterns_are_collected() {
    let mut broken = category("broken", "LO[", &[("a", None)]);
    broken.bucket = String::from("broken");

    let errors = RoutingTable::compile(&collector(vec![broken])).unwrap_err();

    assert_eq!(errors.len(), 2);
}
