use super::{CampaignConfig, ConfigErrors};
use std::path::PathBuf;

const CONFIG: &str = r#"
campaign:
  name: run_sherpackkwl
  n_min: 100
  n_max: 103
  runs: 4
  events: 1000
  user: user
  base_dir: /mt/home/user/setup
  output_dir: gsiftp://se01.example.org/dpm/home/pheno/user/WJETS/Wm_3j/
  extra:
    rivet_dir: /mt/home/user/rivet
scheduler:
  endpoint: ce1.example.org
collector:
  scratch_root: /scratch/user
  discard: ["*.cmnd", "*.yml", "Run.dat"]
  categories:
    - name: lo
      prefix: LO
      bucket: lo-output
      variations:
        - tag: MUR2_MUF2_
        - tag: MUR0.5_MUF0.5_
    - name: hej-pythia
      prefix: HEJmerging_
      bucket: hej-pythia-output
      output: HEJmerging
"#;

fn config() -> CampaignConfig {
    CampaignConfig::from_yaml(CONFIG).unwrap()
}

#[test]
pub fn defaults_are_applied() {
    let config = config();

    assert_eq!(config.campaign.executable, "gridrun-node");
    assert_eq!(config.scheduler.name, "arc");
    assert_eq!(config.scheduler.registry, PathBuf::from("multijobs.dat"));
    assert_eq!(config.scheduler.throttle_ms, 200);
    assert_eq!(config.scheduler.settle_ms, 500);
    assert_eq!(config.transfer.name, "gfal");
    assert_eq!(config.collector.archive_glob, "*.tar.gz");
    assert_eq!(config.collector.merge.exec, PathBuf::from("yodamerge"));
    assert_eq!(config.merged_dir(), PathBuf::from("results/merged"));
}

#[test]
pub fn valid_config_passes_preflight() {
    assert!(!config().preflight_checks());
}

#[test]
pub fn staging_dir_is_keyed_by_output_location() {
    assert_eq!(
        config().staging_dir(),
        PathBuf::from("/scratch/user/tmp_output_Wm_3j")
    );
}

#[test]
pub fn labels_and_outputs() {
    let config = config();
    let lo = &config.collector.categories[0];

    assert_eq!(lo.output_name(), "LO");
    assert_eq!(lo.variations[0].label(), "MUR2-MUF2");
    assert_eq!(lo.variations[1].label(), "MUR0.5-MUF0.5");
    assert_eq!(config.collector.categories[1].output_name(), "HEJmerging");
}

#[test]
pub fn too_many_runs_is_fatal() {
    let mut config = config();
    config.campaign.runs = 5;

    assert!(config.preflight_checks());
}

#[test]
pub fn inverted_range_is_fatal() {
    let mut config = config();
    config.campaign.n_min = 10;
    config.campaign.n_max = 9;

    assert!(config.preflight_checks());
}

#[test]
pub fn duplicated_bucket_is_fatal() {
    let mut config = config();
    config.collector.categories[1].bucket = String::from("lo-output");

    assert!(config.preflight_checks());
}

#[test]
pub fn unsupported_scheduler_is_fatal() {
    let mut config = config();
    config.scheduler.name = String::from("SLURM");

    assert!(config.preflight_checks());
}

#[test]
pub fn unknown_fields_are_rejected() {
    let input = CONFIG.replace("  events: 1000", "  events: 1000\n  evnts: 10");

    assert!(matches!(
        CampaignConfig::from_yaml(&input),
        Err(ConfigErrors::Parse(_))
    ));
}

#[test]
pub fn missing_file_is_reported() {
    assert!(matches!(
        CampaignConfig::load(&PathBuf::from("/nonexistent/campaign.yaml")),
        Err(ConfigErrors::FileNotFound(_))
    ));
}
