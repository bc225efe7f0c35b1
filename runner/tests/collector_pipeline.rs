use gridrun::{
    archive,
    collector::{merge::MergeTool, ResultCollector},
    config::CampaignConfig,
    exec::ExecError,
    transfer::LocalTransfer,
};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tempfile::TempDir;

/// writes the names of its inputs, in the order received, followed by their contents
struct Concat;

impl MergeTool for Concat {
    fn merge(&self, inputs: &[PathBuf], output: &Path) -> Result<(), ExecError> {
        let mut merged = String::new();

        for input in inputs {
            merged.push_str(&input.file_name().unwrap().to_string_lossy());
            merged.push(':');
            merged.push_str(&fs::read_to_string(input).unwrap());
        }
        fs::write(output, merged).unwrap();

        Ok(())
    }
}

struct Failing;

impl MergeTool for Failing {
    fn merge(&self, _: &[PathBuf], output: &Path) -> Result<(), ExecError> {
        Err(ExecError::Status {
            program: "yodamerge".to_string(),
            code: Some(1),
            stderr: format!("cannot write {output:?}"),
        })
    }
}

struct Campaign {
    root: TempDir,
    config: CampaignConfig,
}

impl Campaign {
    fn remote(&self) -> PathBuf {
        self.root.path().join("remote/Wm_3j")
    }

    fn results(&self) -> PathBuf {
        self.root.path().join("results")
    }

    fn collector(&self) -> ResultCollector {
        ResultCollector::new(&self.config).unwrap()
    }
}

fn campaign() -> Campaign {
    let root = tempfile::tempdir().unwrap();
    let dir = root.path().display().to_string();

    let mut config = CampaignConfig::from_yaml(&format!(
        r#"
campaign:
  name: Wm_3j
  n_min: 1
  n_max: 5
  runs: 1
  events: 100
  user: jdoe
  output_dir: {dir}/remote/Wm_3j/
scheduler:
  endpoint: ce.example.org
transfer:
  name: local
collector:
  scratch_root: {dir}/scratch
  results_dir: {dir}/results
  log: {dir}/classify.log
  threads: 3
  discard: ["Run.dat"]
  categories:
    - name: hej
      prefix: HEJ
      bucket: hej-output
      variations:
        - tag: MuR2_MuF2
          pattern: "{{prefix}}*{{tag}}*"
    - name: hej-merging
      prefix: HEJmerging_
      bucket: hej-merging-output
    - name: lo
      prefix: LO
      bucket: lo-output
      variations:
        - tag: MUR2_MUF2
        - tag: MUR0.5_MUF0.5
"#
    ))
    .unwrap();
    assert!(!config.preflight_checks());

    Campaign { root, config }
}

fn result_archive(campaign: &Campaign, seed: u64) {
    let run = campaign.root.path().join(format!("run{seed}"));
    fs::create_dir_all(&run).unwrap();

    let files = [
        format!("HEJ_{seed}.yoda"),
        format!("HEJ_{seed}_MuR2_MuF2.yoda"),
        format!("HEJmerging_{seed}.yoda"),
        format!("LO_{seed}.yoda"),
        format!("LO_{seed}.MUR2_MUF2.yoda"),
        "Run.dat".to_string(),
    ];
    for file in files.iter() {
        fs::write(run.join(file), format!("{seed}\n")).unwrap();
    }

    fs::create_dir_all(campaign.remote()).unwrap();
    archive::pack(
        &run,
        &files,
        &campaign.remote().join(format!("output{seed}.tar.gz")),
    )
    .unwrap();
}

fn names(dir: &Path) -> Vec<String> {
    let mut names = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect::<Vec<_>>();
    names.sort();
    names
}

#[test]
fn files_land_in_the_most_specific_bucket() {
    let campaign = campaign();
    result_archive(&campaign, 55);

    let report = campaign
        .collector()
        .copy(&LocalTransfer, &campaign.config.campaign.output_dir)
        .unwrap();

    assert_eq!(report.fetch.fetched, 1);
    assert_eq!(report.classify.classified, 1);

    let results = campaign.results();
    assert_eq!(
        names(&results.join("hej-merging-output")),
        vec!["HEJmerging_55.yoda"]
    );
    assert_eq!(
        names(&results.join("hej-output")),
        vec!["HEJ_55.yoda", "MuR2_MuF2"]
    );
    assert_eq!(
        names(&results.join("hej-output/MuR2_MuF2")),
        vec!["HEJ_55_MuR2_MuF2.yoda"]
    );
    assert_eq!(
        names(&results.join("lo-output/MUR2_MUF2")),
        vec!["LO_55.MUR2_MUF2.yoda"]
    );
    assert!(!results.join("lo-output/MUR0.5_MUF0.5").exists());

    // companion files never reach a bucket
    assert!(!results.join("Run.dat").exists());

    let log = fs::read_to_string(&campaign.config.collector.log).unwrap();
    assert!(log.contains("[output55.tar.gz] Run.dat discarded"));
    assert!(log.contains("[output55.tar.gz] HEJmerging_55.yoda -> hej-merging"));
}

#[test]
fn classifying_twice_yields_the_same_buckets() {
    let campaign = campaign();
    for seed in [55, 67, 80] {
        result_archive(&campaign, seed);
    }
    let collector = campaign.collector();
    let remote = &campaign.config.campaign.output_dir;

    collector.copy(&LocalTransfer, remote).unwrap();
    let first = names(&campaign.results().join("lo-output"));
    let first_variation = names(&campaign.results().join("lo-output/MUR2_MUF2"));

    let again = collector.copy(&LocalTransfer, remote).unwrap();
    assert_eq!(again.classify.classified, 3);
    assert_eq!(names(&campaign.results().join("lo-output")), first);
    assert_eq!(
        names(&campaign.results().join("lo-output/MUR2_MUF2")),
        first_variation
    );

    // nothing is left to classify once every archive was consumed
    let idle = collector.classify_all().unwrap();
    assert_eq!(idle.archives, 0);
}

#[test]
fn corrupt_archive_does_not_stop_the_others() {
    let campaign = campaign();
    for seed in [55, 67, 80, 94] {
        result_archive(&campaign, seed);
    }
    fs::write(campaign.remote().join("output999.tar.gz"), "not a tarball").unwrap();

    let collector = campaign.collector();
    let report = collector
        .copy(&LocalTransfer, &campaign.config.campaign.output_dir)
        .unwrap();

    assert_eq!(report.fetch.fetched, 5);
    assert_eq!(report.classify.archives, 5);
    assert_eq!(report.classify.classified, 4);
    assert_eq!(
        report.classify.failed,
        vec![collector.staging().join("output999.tar.gz")]
    );
    assert!(collector.staging().join("output999.tar.gz").is_file());

    let dataset = collector.merge(&Concat).unwrap();
    let lo = dataset.get("lo", None).unwrap();
    assert_eq!(lo.inputs, 4);
    assert_eq!(lo.path, campaign.results().join("merged/LO.yoda"));
}

#[test]
fn merge_runs_in_file_name_order_and_consumes_buckets() {
    let campaign = campaign();
    // fetched and classified in an arbitrary order
    for seed in [94, 55, 80, 67] {
        result_archive(&campaign, seed);
    }
    let collector = campaign.collector();
    collector
        .copy(&LocalTransfer, &campaign.config.campaign.output_dir)
        .unwrap();

    let dataset = collector.merge(&Concat).unwrap();

    let variation = dataset.get("lo", Some("MUR2_MUF2")).unwrap();
    assert_eq!(variation.path, campaign.results().join("merged/LO-MUR2-MUF2.yoda"));
    assert_eq!(
        fs::read_to_string(&variation.path).unwrap(),
        "LO_55.MUR2_MUF2.yoda:55\nLO_67.MUR2_MUF2.yoda:67\n\
         LO_80.MUR2_MUF2.yoda:80\nLO_94.MUR2_MUF2.yoda:94\n"
    );

    // the remainder only sees variation-agnostic files
    let hej = dataset.get("hej", None).unwrap();
    assert_eq!(
        fs::read_to_string(&hej.path).unwrap(),
        "HEJ_55.yoda:55\nHEJ_67.yoda:67\nHEJ_80.yoda:80\nHEJ_94.yoda:94\n"
    );
    assert!(dataset.get("hej", Some("MuR2_MuF2")).is_some());
    assert!(dataset.get("hej-merging", None).is_some());
    assert!(dataset.get("lo", Some("MUR0.5_MUF0.5")).is_none());

    assert_eq!(
        names(&campaign.results()),
        vec!["merged".to_string()]
    );
    assert_eq!(
        names(&campaign.results().join("merged")),
        vec![
            "HEJ-MuR2-MuF2.yoda",
            "HEJ.yoda",
            "HEJmerging.yoda",
            "LO-MUR2-MUF2.yoda",
            "LO.yoda"
        ]
    );
}

#[test]
fn failed_merge_keeps_the_bucket() {
    let campaign = campaign();
    result_archive(&campaign, 55);
    let collector = campaign.collector();
    collector
        .copy(&LocalTransfer, &campaign.config.campaign.output_dir)
        .unwrap();

    let error = collector.merge(&Failing).unwrap_err();

    assert_eq!(
        error.to_string(),
        "Merging failed for categories: hej, hej-merging, lo"
    );
    assert!(campaign.results().join("lo-output/LO_55.yoda").is_file());

    collector.clear().unwrap();
    assert!(!collector.staging().exists());
}

#[test]
fn undeclared_variations_stay_out_of_the_central_merge() {
    let mut campaign = campaign();
    campaign.config.collector.categories[2].variation_glob = Some(String::from("{prefix}*.MU*"));
    assert!(!campaign.config.preflight_checks());

    let run = campaign.root.path().join("run55");
    fs::create_dir_all(&run).unwrap();
    let files = ["LO_55.yoda", "LO_55.MUR2_MUF2.yoda", "LO_55.MUR1_MUF2.yoda"];
    for file in files.iter() {
        fs::write(run.join(file), "55\n").unwrap();
    }
    fs::create_dir_all(campaign.remote()).unwrap();
    archive::pack(&run, &files, &campaign.remote().join("output55.tar.gz")).unwrap();

    let collector = campaign.collector();
    collector
        .copy(&LocalTransfer, &campaign.config.campaign.output_dir)
        .unwrap();

    let log = fs::read_to_string(&campaign.config.collector.log).unwrap();
    assert!(log.contains("[output55.tar.gz] LO_55.MUR1_MUF2.yoda discarded"));
    assert_eq!(
        names(&campaign.results().join("lo-output")),
        vec!["LO_55.yoda", "MUR2_MUF2"]
    );

    // left behind by an earlier layout, next to the central files
    fs::write(campaign.results().join("lo-output/LO_67.MUR0.25_MUF1.yoda"), "67\n").unwrap();

    let dataset = collector.merge(&Concat).unwrap();

    let lo = dataset.get("lo", None).unwrap();
    assert_eq!(lo.inputs, 1);
    assert_eq!(fs::read_to_string(&lo.path).unwrap(), "LO_55.yoda:55\n");
    assert_eq!(
        fs::read_to_string(&dataset.get("lo", Some("MUR2_MUF2")).unwrap().path).unwrap(),
        "LO_55.MUR2_MUF2.yoda:55\n"
    );
    assert!(!campaign.results().join("lo-output").exists());
}
